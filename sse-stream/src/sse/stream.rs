//! Connection controller: the HTTP entry point of an event stream.
//!
//! For every request an [`EventStream`] checks that the response can be
//! flushed incrementally, writes the event-stream headers, and then runs
//! three activities until the stream ends:
//!
//! - the caller's [`Handler`], holding a [`Session`] and a [`StreamRequest`]
//!   whose cancellation token is derived from the request's,
//! - the flush scheduler, which flushes the response whenever an `emit`
//!   asks for it and pings on a fixed interval,
//! - the copy loop, which moves bytes from the session's relay into the
//!   response until the handler is done or the client is gone.
//!
//! When the copy loop stops, the handler's token is cancelled and the
//! relay and scheduler are torn down.

use axum::body::Body;
use axum::response::Response;
use futures::future::{BoxFuture, Fuse, FusedFuture, FutureExt};
use http::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use http::request::Parts;
use http::{HeaderMap, Method, Request, StatusCode, Uri};
use std::convert::Infallible;
use std::fmt;
use std::future::{ready, Future, Ready};
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tower::Service;
use tracing::Instrument;

use super::config::SseConfig;
use super::connection::{CloseReason, ConnectionId, ConnectionState};
use super::relay::RelayReader;
use super::rendezvous;
use super::session::Session;
use super::transport::{BodyWriter, ResponseTarget};
use crate::error::{Error, Result};

/// Media type of an event stream.
pub const CONTENT_TYPE_EVENT_STREAM: &str = "text/event-stream";

/// Produces the events of one connection.
///
/// Called once per connection. The handler should emit through the session
/// and return promptly once [`StreamRequest::cancelled`] resolves or an
/// `emit` fails. Any `Fn(Session, StreamRequest) -> impl Future<Output = ()>`
/// closure is a handler.
pub trait Handler: Send + Sync + 'static {
    /// Run the handler for one connection.
    fn call(&self, session: Session, request: StreamRequest) -> BoxFuture<'static, ()>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Session, StreamRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, session: Session, request: StreamRequest) -> BoxFuture<'static, ()> {
        Box::pin(self(session, request))
    }
}

/// The request a handler serves, with a cancellation token tied to the
/// connection.
///
/// The token is a child of any [`CancellationToken`] found in the request
/// extensions, so cancelling the parent (e.g. on server shutdown) ends the
/// stream too.
#[derive(Debug)]
pub struct StreamRequest {
    parts: Parts,
    cancel: CancellationToken,
}

impl StreamRequest {
    /// Request head.
    #[must_use]
    pub fn parts(&self) -> &Parts {
        &self.parts
    }

    /// Request method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    /// Request URI.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    /// Request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// Resolves once the connection is being torn down.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Whether the connection is being torn down.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The connection's cancellation token.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Consume the request, returning its head.
    #[must_use]
    pub fn into_parts(self) -> Parts {
        self.parts
    }
}

/// Serves SSE connections with a [`Handler`].
///
/// # Example
///
/// ```rust,ignore
/// use axum::Router;
/// use sse_stream::sse::{EventStream, Session, StreamRequest};
///
/// let stream = EventStream::new(|session: Session, request: StreamRequest| async move {
///     let _ = session.emit("greeting", "hello".as_bytes()).await;
///     request.cancelled().await;
/// });
///
/// let app: Router = Router::new().route_service("/events", stream);
/// ```
pub struct EventStream<H> {
    handler: Arc<H>,
    config: SseConfig,
}

impl<H: Handler> EventStream<H> {
    /// Create a stream with the default configuration.
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            config: SseConfig::default(),
        }
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: SseConfig) -> Self {
        self.config = config;
        self
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &SseConfig {
        &self.config
    }

    /// Stream one connection into `target` and wait until it has closed.
    ///
    /// Fails with [`Error::FlushUnsupported`] (after setting a 500 status and
    /// without writing any body byte) when the target cannot flush and the
    /// configuration requires it. Otherwise returns why the stream ended.
    pub async fn serve<T: ResponseTarget>(&self, mut target: T, request: Parts) -> Result<CloseReason> {
        let id = ConnectionId::new();
        let span = connection_span(id, &request);

        async move {
            self.prepare(&mut target)?;
            Ok::<_, Error>(self.stream(id, target, request).await)
        }
        .instrument(span)
        .await
    }

    /// Answer `request` with a streaming axum response.
    ///
    /// Must be called inside a Tokio runtime: the stream runs on a spawned
    /// task feeding the returned response body.
    pub fn respond<B>(&self, request: Request<B>) -> Response {
        let (parts, _body) = request.into_parts();
        let id = ConnectionId::new();
        let span = connection_span(id, &parts);

        let (mut writer, body) =
            BodyWriter::channel(self.config.write_buffer_bytes, self.config.body_channel_capacity);
        let prepared = span.in_scope(|| self.prepare(&mut writer));

        let status = writer.status();
        let headers = writer.take_headers();

        // `BodyWriter` always flushes, so the refusal branch is only reachable
        // through `serve` with another target.
        let body = match prepared {
            Ok(()) => {
                let this = self.clone();
                tokio::spawn(
                    async move {
                        this.stream(id, writer, parts).await;
                    }
                    .instrument(span),
                );
                body
            }
            Err(_) => Body::empty(),
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }

    /// `Starting` state: capability check and headers.
    fn prepare<T: ResponseTarget>(&self, target: &mut T) -> Result<()> {
        tracing::debug!(state = %ConnectionState::Starting, "connection state");

        if self.config.require_flush && !target.supports_flush() {
            tracing::error!("response target does not support incremental flush, refusing to stream");
            target.set_status(StatusCode::INTERNAL_SERVER_ERROR);
            tracing::debug!(state = %ConnectionState::Closed, "connection state");
            return Err(Error::FlushUnsupported);
        }

        target.set_status(StatusCode::OK);
        let headers = target.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_EVENT_STREAM));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        Ok(())
    }

    /// `Streaming` through `Closed`.
    async fn stream<T: ResponseTarget>(&self, id: ConnectionId, target: T, request: Parts) -> CloseReason {
        let cancel = request
            .extensions
            .get::<CancellationToken>()
            .map(CancellationToken::child_token)
            .unwrap_or_default();
        let can_flush = target.supports_flush();
        let client_gone = target.closed();
        let transport = Arc::new(Mutex::new(target));
        let (session, mut reader, flush) = Session::open(id, cancel.clone());

        tracing::debug!(state = %ConnectionState::Streaming, "connection state");

        let handler = Arc::clone(&self.handler);
        let handler_session = session.clone();
        let request = StreamRequest {
            parts: request,
            cancel: cancel.clone(),
        };
        tokio::spawn(
            async move {
                let outcome = AssertUnwindSafe(handler.call(handler_session.clone(), request))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(()) => tracing::debug!("handler returned"),
                    Err(_) => tracing::error!("stream handler panicked, ending stream"),
                }
                // Ends the relay whatever the outcome, so the copy loop sees EOF.
                handler_session.close().await;
            }
            .in_current_span(),
        );

        let scheduler = Scheduler {
            session,
            flush,
            transport: Arc::clone(&transport),
            cancel: cancel.clone(),
            keep_alive: self.config.keep_alive_interval(),
            can_flush,
            flush_after_ping: self.config.flush_after_ping,
        };
        let scheduler = tokio::spawn(scheduler.run().in_current_span());

        let mut reason = copy_loop(&mut reader, &transport, &cancel, client_gone).await;

        tracing::debug!(state = %ConnectionState::Draining, reason = %reason, "connection state");
        cancel.cancel();
        reader.close();
        drop(reader);

        match scheduler.await {
            // A failed flush cancels the copy loop; report the real cause.
            Ok(Err(kind)) if reason == CloseReason::Cancelled => {
                reason = CloseReason::ClientDisconnected(kind);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "flush scheduler task failed"),
        }

        if reason == CloseReason::HandlerFinished && can_flush {
            if let Err(e) = transport.lock().await.flush().await {
                reason = CloseReason::ClientDisconnected(e.kind());
            }
        }

        if reason.is_disconnect() {
            tracing::info!(reason = %reason, "client went away, stream closed");
        }
        tracing::debug!(state = %ConnectionState::Closed, reason = %reason, "connection state");
        reason
    }
}

impl<H> Clone for EventStream<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            config: self.config.clone(),
        }
    }
}

impl<H> fmt::Debug for EventStream<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<H, B> Service<Request<B>> for EventStream<H>
where
    H: Handler,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Ready<std::result::Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        ready(Ok(self.respond(request)))
    }
}

fn connection_span(id: ConnectionId, request: &Parts) -> tracing::Span {
    tracing::info_span!("sse_connection", connection_id = %id, path = %request.uri.path())
}

/// Move relay bytes into the response until the relay ends, a write fails,
/// the client goes away, or the connection is cancelled.
async fn copy_loop<T: ResponseTarget>(
    reader: &mut RelayReader,
    transport: &Mutex<T>,
    cancel: &CancellationToken,
    mut client_gone: BoxFuture<'static, ()>,
) -> CloseReason {
    let gone = || {
        tracing::debug!("client went away");
        CloseReason::ClientDisconnected(io::ErrorKind::BrokenPipe)
    };

    loop {
        let chunk = tokio::select! {
            biased;
            () = cancel.cancelled() => return CloseReason::Cancelled,
            () = &mut client_gone => return gone(),
            chunk = reader.recv() => match chunk {
                Some(chunk) => chunk,
                None => return CloseReason::HandlerFinished,
            },
        };

        let written = tokio::select! {
            biased;
            () = cancel.cancelled() => return CloseReason::Cancelled,
            () = &mut client_gone => return gone(),
            written = async { transport.lock().await.write_all(chunk.bytes()).await } => written,
        };

        match written {
            Ok(()) => {
                chunk.release();
            }
            Err(e) => {
                // The unreleased chunk fails the blocked writer.
                tracing::warn!(error = %e, "writing to client failed");
                return CloseReason::ClientDisconnected(e.kind());
            }
        }
    }
}

/// Flush/ping scheduler of one connection.
struct Scheduler<T> {
    session: Session,
    flush: rendezvous::Receiver<()>,
    transport: Arc<Mutex<T>>,
    cancel: CancellationToken,
    keep_alive: Option<Duration>,
    can_flush: bool,
    flush_after_ping: bool,
}

impl<T: ResponseTarget> Scheduler<T> {
    /// Serve flush signals and keep-alive ticks until cancelled. A failed
    /// flush cancels the connection and is returned.
    async fn run(self) -> std::result::Result<(), io::ErrorKind> {
        let Scheduler {
            session,
            mut flush,
            transport,
            cancel,
            keep_alive,
            can_flush,
            flush_after_ping,
        } = self;

        let mut ticker = keep_alive.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        // The ping runs inside the select so flush signals keep being served
        // while it waits for the session guard.
        let mut ping: Fuse<BoxFuture<'static, ()>> = Fuse::terminated();

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                Some(request) = flush.recv() => {
                    request.ack();
                    flush_transport(&transport, can_flush, &cancel).await?;
                }
                () = &mut ping, if !ping.is_terminated() => {
                    if flush_after_ping {
                        flush_transport(&transport, can_flush, &cancel).await?;
                    }
                }
                () = next_tick(&mut ticker), if ping.is_terminated() => {
                    let session = session.clone();
                    ping = async move { session.ping().await }.boxed().fuse();
                }
            }
        }
    }
}

async fn flush_transport<T: ResponseTarget>(
    transport: &Mutex<T>,
    can_flush: bool,
    cancel: &CancellationToken,
) -> std::result::Result<(), io::ErrorKind> {
    if !can_flush {
        return Ok(());
    }

    let flushed = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(()),
        flushed = async { transport.lock().await.flush().await } => flushed,
    };

    flushed.map_err(|e| {
        tracing::warn!(error = %e, "flushing to client failed");
        cancel.cancel();
        e.kind()
    })
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
