//! SSE wire encoding.
//!
//! An event is framed as
//!
//! ```text
//! event: <name>\n        (omitted when the name is empty)
//! data: <payload>\n      (every payload newline becomes "\ndata: ")
//! \n
//! ```
//!
//! The payload is read from an [`AsyncRead`] in fixed-size chunks and
//! rewritten chunk by chunk, so arbitrarily large payloads are never held in
//! memory at once.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::borrow::Cow;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// Prefix of every data line.
pub const DATA_PREFIX: &[u8] = b"data: ";

/// Blank line closing an event.
pub const EVENT_TERMINATOR: &[u8] = b"\n\n";

/// Keep-alive comment written by [`super::Session::ping`].
pub const PING: &[u8] = b": ping\n\n";

/// Replacement for a newline inside a payload.
const DATA_CONTINUATION: &[u8] = b"\ndata: ";

/// Payload bytes read per step.
const READ_CHUNK: usize = 2 * 1024;

/// Destination for encoded bytes.
#[async_trait]
pub trait ByteSink: Send {
    /// Write all of `bytes` or fail.
    async fn write_bytes(&mut self, bytes: Bytes) -> io::Result<()>;
}

#[async_trait]
impl ByteSink for Vec<u8> {
    async fn write_bytes(&mut self, bytes: Bytes) -> io::Result<()> {
        self.extend_from_slice(&bytes);
        Ok(())
    }
}

/// Escape newlines in an event name as the two characters `\n`.
#[must_use]
pub fn escape_name(name: &str) -> Cow<'_, str> {
    if name.contains('\n') {
        Cow::Owned(name.replace('\n', "\\n"))
    } else {
        Cow::Borrowed(name)
    }
}

/// Rewrite one payload chunk so each newline opens a new data line.
#[must_use]
pub fn continue_lines(chunk: &[u8]) -> Bytes {
    let breaks = chunk.iter().filter(|&&b| b == b'\n').count();
    let mut out = BytesMut::with_capacity(chunk.len() + breaks * (DATA_CONTINUATION.len() - 1));

    let mut lines = chunk.split(|&b| b == b'\n');
    if let Some(first) = lines.next() {
        out.put_slice(first);
    }
    for line in lines {
        out.put_slice(DATA_CONTINUATION);
        out.put_slice(line);
    }

    out.freeze()
}

/// Encode one event into `sink`, returning the number of bytes written.
///
/// A failure on the `event:` line is reported as [`Error::EventName`];
/// failures on the data lines or the terminator as [`Error::Relay`]. If
/// reading the payload fails, the event is still terminated so the stream
/// stays framed, and the read error is returned as [`Error::Io`].
pub async fn write_event<S, R>(sink: &mut S, name: &str, mut data: R) -> Result<u64>
where
    S: ByteSink + ?Sized,
    R: AsyncRead + Unpin + Send,
{
    let mut written = 0u64;

    if !name.is_empty() {
        let line = format!("event: {}\n", escape_name(name));
        written += line.len() as u64;
        sink.write_bytes(Bytes::from(line))
            .await
            .map_err(Error::EventName)?;
    }

    sink.write_bytes(Bytes::from_static(DATA_PREFIX))
        .await
        .map_err(Error::Relay)?;
    written += DATA_PREFIX.len() as u64;

    let mut buf = vec![0u8; READ_CHUNK];
    let read_error = loop {
        let n = match data.read(&mut buf).await {
            Ok(0) => break None,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => break Some(e),
        };

        let encoded = continue_lines(&buf[..n]);
        written += encoded.len() as u64;
        sink.write_bytes(encoded).await.map_err(Error::Relay)?;
    };

    sink.write_bytes(Bytes::from_static(EVENT_TERMINATOR))
        .await
        .map_err(Error::Relay)?;
    written += EVENT_TERMINATOR.len() as u64;

    match read_error {
        Some(e) => Err(Error::Io(e)),
        None => Ok(written),
    }
}

/// Write an SSE comment line (`: <text>\n\n`).
pub async fn write_comment<S>(sink: &mut S, text: &str) -> io::Result<()>
where
    S: ByteSink + ?Sized,
{
    let comment = if text.is_empty() {
        Bytes::from_static(b":\n\n")
    } else {
        Bytes::from(format!(": {}\n\n", text.replace('\n', " ")))
    };
    sink.write_bytes(comment).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    async fn encode(name: &str, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        write_event(&mut out, name, payload).await.unwrap();
        out
    }

    /// Split an encoded event into its `event:` line and data lines.
    fn parse(event: &[u8]) -> (Option<String>, Vec<String>) {
        let text = std::str::from_utf8(event).unwrap();
        let body = text.strip_suffix("\n\n").expect("event terminator");
        let mut name = None;
        let mut data = Vec::new();
        for line in body.split('\n') {
            if let Some(n) = line.strip_prefix("event: ") {
                name = Some(n.to_string());
            } else if let Some(d) = line.strip_prefix("data: ") {
                data.push(d.to_string());
            } else {
                panic!("unexpected line {line:?}");
            }
        }
        (name, data)
    }

    #[tokio::test]
    async fn test_named_event() {
        let out = encode("time", b"2024-01-01T00:00:00Z").await;
        assert_eq!(out, b"event: time\ndata: 2024-01-01T00:00:00Z\n\n");
    }

    #[tokio::test]
    async fn test_anonymous_multiline_event() {
        let out = encode("", b"a\nb").await;
        assert_eq!(out, b"data: a\ndata: b\n\n");
    }

    #[tokio::test]
    async fn test_empty_payload() {
        let out = encode("", b"").await;
        assert_eq!(out, b"data: \n\n");
    }

    #[tokio::test]
    async fn test_name_newlines_are_escaped() {
        let out = encode("evil\nname\n", b"x").await;
        let text = std::str::from_utf8(&out).unwrap();
        let event_line = text.lines().next().unwrap();
        assert_eq!(event_line, "event: evil\\nname\\n");
        assert_eq!(text, "event: evil\\nname\\n\ndata: x\n\n");
    }

    #[test]
    fn test_escape_name_borrows_clean_names() {
        assert!(matches!(escape_name("plain"), Cow::Borrowed("plain")));
        assert_eq!(escape_name("a\nb"), "a\\nb");
    }

    #[tokio::test]
    async fn test_data_lines_reassemble_payload() {
        let payloads: [&[u8]; 5] = [b"single", b"\n", b"\n\nleading", b"trailing\n", b"a\n\nb\nc"];

        for payload in payloads {
            let out = encode("", payload).await;
            let (_, lines) = parse(&out);
            let newlines = payload.iter().filter(|&&b| b == b'\n').count();

            assert_eq!(lines.len(), newlines + 1, "payload {payload:?}");
            assert_eq!(lines.join("\n").as_bytes(), payload);
            assert!(out.ends_with(b"\n\n"));
        }
    }

    #[tokio::test]
    async fn test_payload_larger_than_read_chunk() {
        let line = "x".repeat(700);
        let payload = vec![line.as_str(); 10].join("\n");
        assert!(payload.len() > READ_CHUNK);

        let out = encode("bulk", payload.as_bytes()).await;
        let (name, lines) = parse(&out);

        assert_eq!(name.as_deref(), Some("bulk"));
        assert_eq!(lines.len(), 10);
        assert_eq!(lines.join("\n"), payload);
    }

    #[tokio::test]
    async fn test_written_count_matches_output() {
        let mut out = Vec::new();
        let written = write_event(&mut out, "n", &b"1\n2"[..]).await.unwrap();
        assert_eq!(written, out.len() as u64);
    }

    struct FailingSink {
        accepted: usize,
        fail_after: usize,
    }

    #[async_trait]
    impl ByteSink for FailingSink {
        async fn write_bytes(&mut self, _bytes: Bytes) -> io::Result<()> {
            if self.accepted == self.fail_after {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            self.accepted += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_name_write_failure_is_distinct() {
        let mut sink = FailingSink {
            accepted: 0,
            fail_after: 0,
        };
        let err = write_event(&mut sink, "n", &b"x"[..]).await.unwrap_err();
        assert!(matches!(err, Error::EventName(_)));
    }

    #[tokio::test]
    async fn test_data_write_failure_is_reported_directly() {
        let mut sink = FailingSink {
            accepted: 0,
            fail_after: 1,
        };
        let err = write_event(&mut sink, "n", &b"x"[..]).await.unwrap_err();
        assert!(matches!(err, Error::Relay(_)));

        let mut sink = FailingSink {
            accepted: 0,
            fail_after: 0,
        };
        let err = write_event(&mut sink, "", &b"x"[..]).await.unwrap_err();
        assert!(matches!(err, Error::Relay(_)));
    }

    struct BrokenReader;

    impl AsyncRead for BrokenReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::other("source failed")))
        }
    }

    #[tokio::test]
    async fn test_payload_read_failure_still_terminates_event() {
        let mut out = Vec::new();
        let err = write_event(&mut out, "", BrokenReader).await.unwrap_err();

        assert!(matches!(err, Error::Io(_)));
        assert_eq!(out, b"data: \n\n");
    }

    #[tokio::test]
    async fn test_comment() {
        let mut out = Vec::new();
        write_comment(&mut out, "ping").await.unwrap();
        assert_eq!(out, PING);

        let mut out = Vec::new();
        write_comment(&mut out, "").await.unwrap();
        assert_eq!(out, b":\n\n");
    }
}
