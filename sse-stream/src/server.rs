//! HTTP server with graceful shutdown

use axum::{Extension, Router};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

use crate::{config::Config, error::Result};

/// Server instance
///
/// Every request carries a [`CancellationToken`] extension that is cancelled
/// when shutdown starts, so open event streams end and graceful shutdown
/// does not wait on them forever.
pub struct Server {
    config: Config,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the server with the given router until SIGINT or SIGTERM
    pub async fn serve(self, app: Router) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.service.port));
        let listener = TcpListener::bind(&addr).await?;
        self.serve_on(listener, app, shutdown_signal()).await
    }

    /// Run the server on an already bound listener until `shutdown` resolves
    pub async fn serve_on<F>(self, listener: TcpListener, app: Router, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!("Starting {} on {}", self.config.service.name, addr);
        self.log_stream_config();

        let streams = CancellationToken::new();

        // Layers are applied in reverse order (bottom layer is innermost)
        let app = app
            .layer(Extension(streams.clone()))
            .layer(CorsLayer::permissive())
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().include_headers(true))
                    .on_response(DefaultOnResponse::new().include_headers(true)),
            )
            .layer(CatchPanicLayer::new());

        tracing::info!("Server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Cancelling open event streams");
                streams.cancel();
            })
            .await?;

        tracing::info!("Server shutdown complete");

        Ok(())
    }

    fn log_stream_config(&self) {
        let sse = &self.config.sse;
        tracing::info!("Event stream configuration:");
        match sse.keep_alive_interval() {
            Some(interval) => tracing::info!("  - Keep-alive: every {} seconds", interval.as_secs()),
            None => tracing::info!("  - Keep-alive: disabled"),
        }
        tracing::info!("  - Require flush: {}", sse.require_flush);
        tracing::info!("  - Flush after ping: {}", sse.flush_after_ping);
        tracing::info!("  - Write buffer: {} bytes", sse.write_buffer_bytes);
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    tracing::info!("Shutdown signal received, draining requests...");
}
