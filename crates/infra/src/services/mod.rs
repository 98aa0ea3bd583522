//! Application services: the operations this core exposes to collaborators.
//!
//! Each mutating operation takes an explicit `actor` (audit identity, never
//! ambient state), runs inside one store transaction, and returns a
//! [`Committed`] carrying the result plus the post-commit event list. The
//! same envelopes are published on the configured bus for the notification
//! collaborator; publication failures surface as [`ServiceError::Publish`]
//! after the state change is already durable (at-least-once).

use serde_json::Value as JsonValue;
use thiserror::Error;

use chantier_core::{DomainError, UserId};
use chantier_events::{EventBus, EventEnvelope};
use chantier_invoicing::InvoiceEvent;
use chantier_stock::StockEvent;

use crate::state_store::{StoreError, TxError};

pub mod invoicing;
pub mod stock_adjustment;

pub use invoicing::InvoicingService;
pub use stock_adjustment::StockAdjustmentService;

/// Service-level failure: a domain rejection, a store failure, or a
/// post-commit publication failure.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    /// The transaction committed but publication failed; the events are in
    /// the returned envelopes of a retried call, never lost state.
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<TxError> for ServiceError {
    fn from(value: TxError) -> Self {
        match value {
            TxError::Domain(e) => ServiceError::Domain(e),
            TxError::Store(e) => ServiceError::Store(e),
        }
    }
}

/// A committed operation: its result value and the post-commit event list.
#[derive(Debug, Clone)]
pub struct Committed<T> {
    pub value: T,
    pub events: Vec<EventEnvelope<JsonValue>>,
}

pub(crate) fn invoice_envelope(
    actor: UserId,
    event: &InvoiceEvent,
) -> Result<EventEnvelope<JsonValue>, ServiceError> {
    EventEnvelope::from_typed(actor, event.invoice_id().0, "invoicing.invoice", event)
        .map_err(|e| ServiceError::Publish(format!("envelope serialization failed: {e}")))
}

pub(crate) fn stock_envelope(
    actor: UserId,
    event: &StockEvent,
) -> Result<EventEnvelope<JsonValue>, ServiceError> {
    EventEnvelope::from_typed(actor, event.product_id().0, "stock.product", event)
        .map_err(|e| ServiceError::Publish(format!("envelope serialization failed: {e}")))
}

/// Lifecycle event first, then the stock movements it caused.
pub(crate) fn collect_envelopes(
    actor: UserId,
    invoice_event: Option<&InvoiceEvent>,
    stock_events: &[StockEvent],
) -> Result<Vec<EventEnvelope<JsonValue>>, ServiceError> {
    let mut envelopes = Vec::with_capacity(stock_events.len() + 1);
    if let Some(event) = invoice_event {
        envelopes.push(invoice_envelope(actor, event)?);
    }
    for event in stock_events {
        envelopes.push(stock_envelope(actor, event)?);
    }
    Ok(envelopes)
}

pub(crate) fn publish_all<B>(
    bus: &B,
    envelopes: &[EventEnvelope<JsonValue>],
) -> Result<(), ServiceError>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    for envelope in envelopes {
        bus.publish(envelope.clone())
            .map_err(|e| ServiceError::Publish(format!("{e:?}")))?;
    }
    Ok(())
}

/// A transact closure that succeeds always fills its captures; hitting this
/// means a store implementation committed without running the closure.
pub(crate) fn missing_snapshot() -> ServiceError {
    ServiceError::Store(StoreError::Backend(
        "transaction committed without producing a snapshot".to_string(),
    ))
}
