//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus is the **distribution** half of the post-commit event contract:
//! operations return their committed events to the caller and publish the
//! same envelopes here for out-of-core consumers (the notification
//! collaborator, reporting projections).
//!
//! Design constraints:
//! - **Transport-agnostic**: in-memory channels, Redis pub/sub, a broker.
//! - **At-least-once**: publication happens after commit; a retried publish
//!   may duplicate, so consumers must be idempotent.
//! - **No persistence**: the state store is the source of truth, the bus
//!   only distributes.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to an event stream.
///
/// Each subscription gets a copy of every event published after it was
/// created (broadcast semantics). Designed for single-threaded consumption;
/// hand the subscription to one worker thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// `publish()` can fail (bus full, transport error). Since envelopes are only
/// published after the producing transaction committed, callers may safely
/// retry publication; duplicates are the consumer's problem (idempotency).
///
/// Implementations must be `Send + Sync`; multiple threads publish
/// concurrently.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
