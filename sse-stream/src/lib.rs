//! # sse-stream
//!
//! Server-Sent Events streaming engine for axum services.
//!
//! A handler receives a [`sse::Session`] per connection and emits named
//! events through it. Every returned `emit` has reached the response and had
//! a flush accepted, concurrent emits never interleave, idle connections get
//! keep-alive pings, and a client that goes away cancels the handler.
//!
//! ## Features
//!
//! - **Event encoding**: `event:`/`data:` framing with streaming payloads
//! - **Backpressure**: a synchronous relay ties `emit` to the client's pace
//! - **Keep-alive**: configurable `: ping` comments
//! - **Configuration**: defaults, TOML files and environment via figment
//! - **Observability**: JSON structured logging with a span per connection
//! - **Graceful shutdown**: open streams are cancelled on SIGTERM/SIGINT
//!
//! ## Example
//!
//! ```rust,no_run
//! use sse_stream::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let greeter = EventStream::new(|session: Session, request: StreamRequest| async move {
//!         if session.emit("greeting", "hello".as_bytes()).await.is_ok() {
//!             request.cancelled().await;
//!         }
//!     })
//!     .with_config(config.sse.clone());
//!
//!     let app = Router::new().route_service("/events", greeter);
//!
//!     Server::new(config).serve(app).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod server;
pub mod sse;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{Config, ServiceConfig};
    pub use crate::error::{Error, Result};
    pub use crate::observability::init_tracing;
    pub use crate::server::Server;
    pub use crate::sse::{
        CloseReason, ConnectionId, EventStream, Handler, Session, SseConfig, StreamRequest,
    };

    pub use axum::Router;
    pub use tokio_util::sync::CancellationToken;
}
