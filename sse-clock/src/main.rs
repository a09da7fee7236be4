use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use clap::Parser;
use colored::Colorize;
use sse_stream::prelude::*;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// sse-clock - stream the current time as Server-Sent Events
#[derive(Parser)]
#[command(name = "sse-clock")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to the XDG/system search path)
    #[arg(short, long, env = "SSE_CLOCK_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on, overriding the configuration
    #[arg(short, long)]
    port: Option<u16>,

    /// Milliseconds between two time events
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,
}

/// Emit a `time` event every `interval` until the client goes away.
fn clock(interval: Duration) -> impl Handler {
    move |session: Session, request: StreamRequest| async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = request.cancelled() => return,
                _ = ticker.tick() => {
                    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
                    if let Err(e) = session.emit("time", now.as_bytes()).await {
                        if e.is_disconnect() {
                            tracing::debug!(connection_id = %session.connection_id(), "clock stopped: {}", e);
                        } else {
                            tracing::warn!(connection_id = %session.connection_id(), error = %e, "clock emit failed");
                        }
                        return;
                    }
                }
            }
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::load_for_service("sse-clock").context("loading configuration")?,
    };
    if let Some(port) = cli.port {
        config.service.port = port;
    }

    init_tracing(&config)?;

    let interval = Duration::from_millis(cli.interval_ms.max(1));
    let stream = EventStream::new(clock(interval)).with_config(config.sse.clone());
    let app = Router::new().route_service("/time", stream);

    Server::new(config).serve(app).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        for cause in e.chain().skip(1) {
            eprintln!("\n{} {}", "Caused by:".yellow(), cause);
        }
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use sse_stream::sse::CONTENT_TYPE_EVENT_STREAM;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_clock_streams_time_events() {
        let stream = EventStream::new(clock(Duration::from_millis(10)));
        let request = axum::http::Request::builder()
            .uri("/time")
            .body(axum::body::Body::empty())
            .unwrap();

        let response = stream.oneshot(request).await.unwrap();
        assert_eq!(
            response.headers()[axum::http::header::CONTENT_TYPE],
            CONTENT_TYPE_EVENT_STREAM
        );

        let mut body = response.into_body();
        let frame = body.frame().await.unwrap().unwrap().into_data().unwrap();
        let text = std::str::from_utf8(&frame).unwrap();

        let timestamp = text
            .strip_prefix("event: time\ndata: ")
            .and_then(|rest| rest.strip_suffix("\n\n"))
            .unwrap_or_else(|| panic!("unexpected frame {text:?}"));
        assert!(timestamp.ends_with('Z'));
        chrono::DateTime::parse_from_rfc3339(timestamp).unwrap();
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["sse-clock"]);
        assert_eq!(cli.interval_ms, 1000);
        assert!(cli.port.is_none());
    }
}
