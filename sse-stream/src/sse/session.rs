//! Session writer handed to stream handlers.

use serde::Serialize;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::connection::ConnectionId;
use super::encoder;
use super::relay::{relay, RelayReader, RelayWriter};
use super::rendezvous;
use crate::error::{Error, Result};

/// Write side of one SSE connection.
///
/// Cloning is cheap; all clones share the relay write end and the guard
/// that keeps events whole. At most one `emit` or `ping` writes at a time,
/// so events from concurrent producers never interleave on the wire.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    id: ConnectionId,
    /// The guard. `None` once the session is closed.
    writer: Mutex<Option<RelayWriter>>,
    flush: rendezvous::Sender<()>,
    cancel: CancellationToken,
}

impl Session {
    /// Create a session together with the relay read end and the flush
    /// signal receiver that the connection controller drives.
    pub(crate) fn open(
        id: ConnectionId,
        cancel: CancellationToken,
    ) -> (Self, RelayReader, rendezvous::Receiver<()>) {
        let (writer, reader) = relay();
        let (flush, flush_rx) = rendezvous::channel();

        let session = Self {
            inner: Arc::new(Inner {
                id,
                writer: Mutex::new(Some(writer)),
                flush,
                cancel,
            }),
        };

        (session, reader, flush_rx)
    }

    /// Identifier of the connection this session writes to.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Emit one event and wait until the connection has accepted a flush
    /// for it.
    ///
    /// An empty `name` produces an anonymous event. The payload is streamed
    /// from `data`. Returns [`Error::Cancelled`] once the connection is torn
    /// down and [`Error::Closed`] after [`Session::close`]; a handler should
    /// stop emitting on either.
    pub async fn emit<R>(&self, name: &str, data: R) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        tokio::select! {
            biased;
            () = self.inner.cancel.cancelled() => Err(Error::Cancelled),
            result = self.emit_guarded(name, data) => result,
        }
    }

    /// Emit an event whose payload is `value` serialized as JSON.
    pub async fn emit_json<T>(&self, name: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(value)?;
        self.emit(name, payload.as_slice()).await
    }

    async fn emit_guarded<R>(&self, name: &str, data: R) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut guard = self.inner.writer.lock().await;
        let writer = guard.as_mut().ok_or(Error::Closed)?;

        let written = encoder::write_event(writer, name, data).await?;

        // Still holding the guard: the next event cannot start before the
        // scheduler has taken this flush request.
        self.inner.flush.send(()).await.map_err(|_| Error::Closed)?;

        tracing::trace!(connection_id = %self.inner.id, event = name, bytes = written, "event emitted");
        Ok(())
    }

    /// Write a `: ping` keep-alive comment.
    ///
    /// Best effort: failures are logged, not returned. Unlike [`Session::emit`]
    /// this does not raise a flush signal.
    pub async fn ping(&self) {
        let result = tokio::select! {
            biased;
            () = self.inner.cancel.cancelled() => Err(Error::Cancelled),
            result = self.ping_guarded() => result,
        };

        match result {
            Ok(()) => tracing::trace!(connection_id = %self.inner.id, "keep-alive ping written"),
            Err(Error::Cancelled) | Err(Error::Closed) => {
                tracing::debug!(connection_id = %self.inner.id, "keep-alive ping skipped, stream ending")
            }
            Err(e) => {
                tracing::warn!(connection_id = %self.inner.id, error = %e, "keep-alive ping failed")
            }
        }
    }

    async fn ping_guarded(&self) -> Result<()> {
        let mut guard = self.inner.writer.lock().await;
        let writer = guard.as_mut().ok_or(Error::Closed)?;
        encoder::write_comment(writer, "ping")
            .await
            .map_err(Error::Relay)
    }

    /// Drop the relay write end. The connection's copy loop sees end of
    /// stream once it has drained what was already written.
    pub async fn close(&self) {
        let writer = self.inner.writer.lock().await.take();
        if writer.is_some() {
            tracing::debug!(connection_id = %self.inner.id, "session closed");
        }
    }

    /// Whether [`Session::close`] has run.
    pub async fn is_closed(&self) -> bool {
        self.inner.writer.lock().await.is_none()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("connection_id", &self.inner.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    /// Drain the relay into a buffer, acknowledging every flush request.
    fn drain(
        mut reader: RelayReader,
        mut flush: rendezvous::Receiver<()>,
    ) -> (JoinHandle<Vec<u8>>, JoinHandle<usize>) {
        let bytes = tokio::spawn(async move {
            let mut out = Vec::new();
            while let Some(chunk) = reader.recv().await {
                out.extend_from_slice(&chunk.release());
            }
            out
        });
        let flushes = tokio::spawn(async move {
            let mut count = 0;
            while let Some(request) = flush.recv().await {
                request.ack();
                count += 1;
            }
            count
        });
        (bytes, flushes)
    }

    #[tokio::test]
    async fn test_emit_writes_event_and_signals_flush() {
        let (session, reader, flush) = Session::open(ConnectionId::new(), CancellationToken::new());
        let (bytes, flushes) = drain(reader, flush);

        session
            .emit("time", &b"2024-01-01T00:00:00Z"[..])
            .await
            .unwrap();
        session.close().await;
        drop(session);

        assert_eq!(
            bytes.await.unwrap(),
            b"event: time\ndata: 2024-01-01T00:00:00Z\n\n"
        );
        assert_eq!(flushes.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_emit_blocks_until_flush_accepted() {
        let (session, mut reader, mut flush) =
            Session::open(ConnectionId::new(), CancellationToken::new());

        tokio::spawn(async move {
            while let Some(chunk) = reader.recv().await {
                chunk.release();
            }
        });

        let emitter = {
            let session = session.clone();
            tokio::spawn(async move { session.emit("", &b"x"[..]).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!emitter.is_finished(), "emit returned before its flush was taken");

        flush.recv().await.unwrap().ack();
        emitter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_ping_writes_comment_without_flush_signal() {
        let (session, mut reader, mut flush) =
            Session::open(ConnectionId::new(), CancellationToken::new());

        let collector = tokio::spawn(async move {
            let mut out = Vec::new();
            while let Some(chunk) = reader.recv().await {
                out.extend_from_slice(&chunk.release());
            }
            out
        });

        session.ping().await;
        assert!(flush.try_recv().is_none());

        session.close().await;
        drop(session);
        assert_eq!(collector.await.unwrap(), b": ping\n\n");
    }

    #[tokio::test]
    async fn test_concurrent_emits_do_not_interleave() {
        let (session, reader, flush) = Session::open(ConnectionId::new(), CancellationToken::new());
        let (bytes, flushes) = drain(reader, flush);

        let mut producers = Vec::new();
        for producer in 0..6 {
            let session = session.clone();
            producers.push(tokio::spawn(async move {
                for n in 0..25 {
                    let payload = format!("p{producer}\nn{n}\n{}", "z".repeat(3000));
                    session.emit("tick", payload.as_bytes()).await.unwrap();
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }
        session.close().await;
        drop(session);

        let out = String::from_utf8(bytes.await.unwrap()).unwrap();
        let events: Vec<&str> = out.strip_suffix("\n\n").unwrap().split("\n\n").collect();
        assert_eq!(events.len(), 150);
        assert_eq!(flushes.await.unwrap(), 150);

        for event in events {
            let lines: Vec<&str> = event.split('\n').collect();
            assert_eq!(lines.len(), 4, "malformed event {event:?}");
            assert_eq!(lines[0], "event: tick");
            assert!(lines[1].starts_with("data: p"));
            assert!(lines[2].starts_with("data: n"));
            assert_eq!(lines[3].len(), "data: ".len() + 3000);
        }
    }

    #[tokio::test]
    async fn test_cancel_unblocks_emit_waiting_on_relay() {
        let cancel = CancellationToken::new();
        // Nobody reads the relay, so the write inside emit parks.
        let (session, _reader, _flush) = Session::open(ConnectionId::new(), cancel.clone());

        let emitter = {
            let session = session.clone();
            tokio::spawn(async move { session.emit("stuck", &b"payload"[..]).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!emitter.is_finished());

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), emitter)
            .await
            .expect("emit still blocked after cancellation")
            .unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_emit_after_close_fails() {
        let (session, _reader, _flush) = Session::open(ConnectionId::new(), CancellationToken::new());
        session.close().await;

        assert!(session.is_closed().await);
        let err = session.emit("late", &b"x"[..]).await.unwrap_err();
        assert!(matches!(err, Error::Closed));
    }

    #[tokio::test]
    async fn test_emit_fails_when_reader_gone() {
        let (session, reader, _flush) = Session::open(ConnectionId::new(), CancellationToken::new());
        drop(reader);

        let err = session.emit("gone", &b"x"[..]).await.unwrap_err();
        assert!(matches!(err, Error::EventName(_)));
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn test_emit_json() {
        #[derive(Serialize)]
        struct Tick {
            seq: u32,
        }

        let (session, reader, flush) = Session::open(ConnectionId::new(), CancellationToken::new());
        let (bytes, _flushes) = drain(reader, flush);

        session.emit_json("tick", &Tick { seq: 3 }).await.unwrap();
        session.close().await;
        drop(session);

        assert_eq!(bytes.await.unwrap(), b"event: tick\ndata: {\"seq\":3}\n\n");
    }
}
