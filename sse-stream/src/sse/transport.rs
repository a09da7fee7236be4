//! Response targets the connection controller copies events into.

use async_trait::async_trait;
use axum::body::Body;
use bytes::{Bytes, BytesMut};
use futures::future::{BoxFuture, FutureExt};
use http::{HeaderMap, StatusCode};
use std::convert::Infallible;
use std::io;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// The live HTTP response of one connection.
///
/// Status and headers must be set before the first body byte is written.
/// `write_all` may buffer; `flush` pushes everything buffered to the client.
#[async_trait]
pub trait ResponseTarget: Send + 'static {
    /// Set the response status.
    fn set_status(&mut self, status: StatusCode);

    /// Mutable access to the response headers.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Whether [`ResponseTarget::flush`] can push bytes incrementally.
    fn supports_flush(&self) -> bool;

    /// Append body bytes.
    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Push buffered body bytes to the client now.
    async fn flush(&mut self) -> io::Result<()>;

    /// Resolves once the client has gone away, even if nothing is being
    /// written. The future must not borrow the target.
    ///
    /// The default never resolves; such targets only report a disconnect
    /// through failing writes.
    fn closed(&self) -> BoxFuture<'static, ()> {
        futures::future::pending().boxed()
    }
}

/// [`ResponseTarget`] feeding an axum [`Body`].
///
/// Written bytes collect in a buffer and leave as one body frame per flush.
/// A full buffer flushes on its own. Once hyper drops the body (the client
/// disconnected) writes and flushes fail with `BrokenPipe`.
#[derive(Debug)]
pub struct BodyWriter {
    status: StatusCode,
    headers: HeaderMap,
    buffer: BytesMut,
    capacity: usize,
    frames: mpsc::Sender<Result<Bytes, Infallible>>,
}

impl BodyWriter {
    /// Create a writer and the response body it feeds.
    ///
    /// `buffer_bytes` is the auto-flush threshold, `frame_capacity` how many
    /// flushed frames may wait for hyper before flushing blocks.
    #[must_use]
    pub fn channel(buffer_bytes: usize, frame_capacity: usize) -> (Self, Body) {
        let (frames, rx) = mpsc::channel(frame_capacity.max(1));
        let body = Body::from_stream(ReceiverStream::new(rx));

        let writer = Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            buffer: BytesMut::with_capacity(buffer_bytes),
            capacity: buffer_bytes.max(1),
            frames,
        };

        (writer, body)
    }

    /// Status set so far.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Move the headers out, leaving an empty map.
    pub fn take_headers(&mut self) -> HeaderMap {
        std::mem::take(&mut self.headers)
    }

    /// Whether the response body has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.frames.is_closed()
    }
}

#[async_trait]
impl ResponseTarget for BodyWriter {
    fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn supports_flush(&self) -> bool {
        true
    }

    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.is_closed() {
            return Err(body_dropped());
        }
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() >= self.capacity {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return if self.is_closed() {
                Err(body_dropped())
            } else {
                Ok(())
            };
        }

        let frame = self.buffer.split().freeze();
        self.frames
            .send(Ok(frame))
            .await
            .map_err(|_| body_dropped())
    }

    fn closed(&self) -> BoxFuture<'static, ()> {
        let frames = self.frames.clone();
        async move { frames.closed().await }.boxed()
    }
}

fn body_dropped() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "response body dropped by client")
}
