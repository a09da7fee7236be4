//! Zero-capacity hand-off between one producer role and one consumer.
//!
//! [`Sender::send`] completes only after the receiving side has taken the
//! value and acknowledged it, so a producer is paced by its consumer rather
//! than by free buffer space. Tokio channels cannot have zero capacity; the
//! hand-off pairs a single-slot channel with a oneshot acknowledgement per
//! value.

use std::fmt;
use tokio::sync::{mpsc, oneshot};

/// The other end of the hand-off is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rendezvous peer closed")]
pub struct Closed;

/// Create a linked sender/receiver pair.
#[must_use]
pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = mpsc::channel(1);
    (Sender { tx }, Receiver { rx })
}

type Envelope<T> = (T, oneshot::Sender<()>);

/// Producing end of a hand-off.
pub struct Sender<T> {
    tx: mpsc::Sender<Envelope<T>>,
}

impl<T> Sender<T> {
    /// Hand `value` over and wait until the receiver acknowledges it.
    ///
    /// Fails with [`Closed`] when the receiver is dropped or closed, or when
    /// it drops the delivery without acknowledging.
    pub async fn send(&self, value: T) -> Result<(), Closed> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx.send((value, ack_tx)).await.map_err(|_| Closed)?;
        ack_rx.await.map_err(|_| Closed)
    }

    /// Whether the receiving side has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Consuming end of a hand-off.
pub struct Receiver<T> {
    rx: mpsc::Receiver<Envelope<T>>,
}

impl<T> Receiver<T> {
    /// Wait for the next value. Returns `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<Delivery<T>> {
        self.rx
            .recv()
            .await
            .map(|(value, ack)| Delivery { value, ack })
    }

    /// Take a value if one is already waiting.
    pub fn try_recv(&mut self) -> Option<Delivery<T>> {
        self.rx
            .try_recv()
            .ok()
            .map(|(value, ack)| Delivery { value, ack })
    }

    /// Stop accepting values. New sends fail right away; a value already
    /// queued can still be received, and its sender fails if the delivery is
    /// dropped without an ack.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver").finish_non_exhaustive()
    }
}

/// A value taken from a [`Receiver`] whose sender is still waiting.
///
/// The sender is released by [`Delivery::ack`]. Dropping the delivery
/// without acknowledging makes the sender's `send` fail with [`Closed`].
pub struct Delivery<T> {
    value: T,
    ack: oneshot::Sender<()>,
}

impl<T> Delivery<T> {
    /// Borrow the delivered value without releasing the sender.
    #[must_use]
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Release the sender and take the value.
    pub fn ack(self) -> T {
        // The sender may have given up waiting; nothing to do then.
        let _ = self.ack.send(());
        self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for Delivery<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}
