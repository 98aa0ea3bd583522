//! Stock adjustments: serialized, transactional ledger mutations.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use chantier_core::{DomainError, DomainResult, UserId};
use chantier_events::{EventBus, EventEnvelope};
use chantier_stock::{
    Product, ProductId, StockAdjusted, StockAdjustment, StockDirection, StockEvent,
    stock_level_event,
};

use crate::state_store::{StateStore, TxContext};

use super::{Committed, ServiceError, missing_snapshot, publish_all, stock_envelope};

/// Apply a batch of adjustments to the staged product rows of an enclosing
/// transaction, deriving ledger + level-crossing events.
///
/// The rows are already held under their exclusive locks by the store, so
/// the availability check and the mutation are one step: any
/// `InsufficientStock` (or dangling product reference) aborts the whole
/// transaction, sibling changes included.
pub(crate) fn apply_adjustments(
    ctx: &mut TxContext,
    adjustments: &[StockAdjustment],
    now: DateTime<Utc>,
) -> DomainResult<Vec<StockEvent>> {
    let mut events = Vec::new();

    for adjustment in adjustments {
        if adjustment.is_noop() {
            continue;
        }

        let product = ctx.product_mut(adjustment.product_id)?;
        let previous_quantity = product.quantity();
        let previous_status = product.stock_status();

        product.apply_adjustment(adjustment.direction, adjustment.magnitude, now)?;

        events.push(StockEvent::StockAdjusted(StockAdjusted {
            product_id: adjustment.product_id,
            direction: adjustment.direction,
            magnitude: adjustment.magnitude,
            previous_quantity,
            new_quantity: product.quantity(),
            occurred_at: now,
        }));
        if let Some(level) = stock_level_event(previous_status, product, now) {
            events.push(level);
        }
    }

    Ok(events)
}

/// Serializes concurrent adjustments to the same product behind its row
/// lock and translates domain intent ("subtract 5 units for this sale")
/// into a safe ledger mutation. Exposed to the inventory-management
/// collaborator; the invoicing operations reuse [`apply_adjustments`]
/// inside their own transactions.
#[derive(Debug)]
pub struct StockAdjustmentService<S, B> {
    store: S,
    bus: B,
}

impl<S, B> StockAdjustmentService<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }
}

impl<S, B> StockAdjustmentService<S, B>
where
    S: StateStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Adjust one product's on-hand quantity.
    ///
    /// Runs in its own transaction: lock row, mutate, commit. A magnitude
    /// of zero succeeds without touching the row.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub fn adjust(
        &self,
        actor: UserId,
        product_id: ProductId,
        direction: StockDirection,
        magnitude: u64,
    ) -> Result<Committed<Product>, ServiceError> {
        let now = Utc::now();
        let mut snapshot: Option<Product> = None;
        let mut stock_events: Vec<StockEvent> = Vec::new();

        self.store.transact(None, &[product_id], &mut |ctx| {
            stock_events = apply_adjustments(
                ctx,
                &[StockAdjustment {
                    product_id,
                    direction,
                    magnitude,
                }],
                now,
            )?;
            let product = ctx.products.get(&product_id).ok_or(DomainError::NotFound)?;
            snapshot = Some(product.clone());
            Ok(())
        })?;

        let product = snapshot.ok_or_else(missing_snapshot)?;

        let envelopes = stock_events
            .iter()
            .map(|event| stock_envelope(actor, event))
            .collect::<Result<Vec<_>, _>>()?;
        publish_all(&self.bus, &envelopes)?;

        info!(
            product = %product_id,
            quantity = product.quantity(),
            ?direction,
            magnitude,
            "stock adjusted"
        );

        Ok(Committed {
            value: product,
            events: envelopes,
        })
    }

    /// Products at or below their reorder threshold (external alerting).
    pub fn low_stock_products(&self) -> Result<Vec<Product>, ServiceError> {
        Ok(self.store.low_stock_products()?)
    }

    /// Products with zero on-hand quantity.
    pub fn out_of_stock_products(&self) -> Result<Vec<Product>, ServiceError> {
        Ok(self.store.out_of_stock_products()?)
    }
}
