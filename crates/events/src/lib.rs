//! Event mechanics: the `Event` trait, envelopes, and the bus abstraction.
//!
//! Domain events are produced by business operations and handed back to the
//! caller as an explicit post-commit list; the bus is how out-of-core
//! consumers (the notification collaborator, projections) observe them.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
