//! Server-Sent Events (SSE) streaming.
//!
//! A handler gets a [`Session`] per connection and emits named events
//! through it. The session, the connection's flush scheduler and its copy
//! loop are connected by a synchronous byte relay, so a returned `emit`
//! means the event has reached the response and a flush was accepted for it.
//!
//! # Features
//!
//! - **Whole events**: concurrent `emit`s from clones of one session never
//!   interleave on the wire
//! - **Streaming payloads**: event data is read from any `AsyncRead`, so a
//!   payload never has to sit in memory in full
//! - **Keep-alive**: `: ping` comments on a configurable interval
//! - **Disconnect detection**: a failed write cancels the handler's token
//! - **tower integration**: [`EventStream`] is a `Service` for axum routers
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use axum::Router;
//! use sse_stream::sse::{EventStream, Session, StreamRequest};
//! use std::time::Duration;
//!
//! let clock = EventStream::new(|session: Session, request: StreamRequest| async move {
//!     let mut ticker = tokio::time::interval(Duration::from_secs(1));
//!     loop {
//!         tokio::select! {
//!             _ = request.cancelled() => return,
//!             _ = ticker.tick() => {
//!                 if session.emit("tick", "now".as_bytes()).await.is_err() {
//!                     return;
//!                 }
//!             }
//!         }
//!     }
//! });
//!
//! let app: Router = Router::new().route_service("/clock", clock);
//! ```
//!
//! # Wire format
//!
//! ```text
//! event: time
//! data: 2024-01-01T00:00:00Z
//!
//! data: anonymous
//! data: multi-line
//!
//! : ping
//!
//! ```

mod config;
mod connection;
pub mod encoder;
pub mod relay;
pub mod rendezvous;
mod session;
mod stream;
mod transport;

// Re-exports
pub use config::SseConfig;
pub use connection::{CloseReason, ConnectionId, ConnectionState};
pub use encoder::ByteSink;
pub use session::Session;
pub use stream::{EventStream, Handler, StreamRequest, CONTENT_TYPE_EVENT_STREAM};
pub use transport::{BodyWriter, ResponseTarget};
