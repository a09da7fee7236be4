//! In-process byte relay between a session and its connection's copy loop.
//!
//! The relay has pipe semantics: [`RelayWriter::write`] returns only after the
//! reader has taken the bytes and released the [`Chunk`] carrying them. The
//! copy loop releases a chunk after handing it to the response, so a
//! returned write means the bytes have reached the transport buffer.
//!
//! Dropping the writer ends the reader with `None`. Closing or dropping the
//! reader fails pending and future writes with `BrokenPipe`.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;

use super::encoder::ByteSink;
use super::rendezvous::{self, Delivery};

/// Create a linked writer/reader pair.
#[must_use]
pub fn relay() -> (RelayWriter, RelayReader) {
    let (tx, rx) = rendezvous::channel();
    (RelayWriter { tx }, RelayReader { rx })
}

/// Write end of the relay. Owned by exactly one session.
#[derive(Debug)]
pub struct RelayWriter {
    tx: rendezvous::Sender<Bytes>,
}

impl RelayWriter {
    /// Hand `bytes` to the reader and wait until it has consumed them.
    pub async fn write(&self, bytes: Bytes) -> io::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.tx.send(bytes).await.map_err(|_| broken_pipe())
    }

    /// Whether the read end has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
impl ByteSink for RelayWriter {
    async fn write_bytes(&mut self, bytes: Bytes) -> io::Result<()> {
        self.write(bytes).await
    }
}

/// Read end of the relay. Owned by exactly one connection controller.
#[derive(Debug)]
pub struct RelayReader {
    rx: rendezvous::Receiver<Bytes>,
}

impl RelayReader {
    /// Wait for the next chunk. `None` means the writer is gone.
    pub async fn recv(&mut self) -> Option<Chunk> {
        self.rx.recv().await.map(|delivery| Chunk { delivery })
    }

    /// Stop accepting bytes; writers fail once the reader is dropped.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Bytes taken from the relay whose writer is still blocked.
#[derive(Debug)]
pub struct Chunk {
    delivery: Delivery<Bytes>,
}

impl Chunk {
    /// The bytes carried by this chunk.
    #[must_use]
    pub fn bytes(&self) -> &Bytes {
        self.delivery.get()
    }

    /// Mark the bytes consumed and unblock the writer.
    pub fn release(self) -> Bytes {
        self.delivery.ack()
    }
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "relay read end closed")
}
