use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use chantier_core::money::{ensure_non_negative, round_money};
use chantier_core::{AggregateId, AggregateRoot, DomainError, DomainResult, ValueObject};
use chantier_events::Event;

/// Product identifier.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Direction of a ledger mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockDirection {
    Increase,
    Decrease,
}

/// A single intended ledger mutation: "move `magnitude` units of
/// `product_id` in `direction`".
///
/// This is what the invoicing domain emits and the adjustment service
/// applies under the product's row lock. Magnitude zero is a legal no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub product_id: ProductId,
    pub direction: StockDirection,
    pub magnitude: u64,
}

impl StockAdjustment {
    pub fn increase(product_id: ProductId, magnitude: u64) -> Self {
        Self {
            product_id,
            direction: StockDirection::Increase,
            magnitude,
        }
    }

    pub fn decrease(product_id: ProductId, magnitude: u64) -> Self {
        Self {
            product_id,
            direction: StockDirection::Decrease,
            magnitude,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.magnitude == 0
    }
}

impl ValueObject for StockAdjustment {}

/// Coarse stock level, derived from quantity vs. reorder threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockStatus {
    InStock,
    LowStock,
    OutOfStock,
}

/// Aggregate root: Product.
///
/// Holds the per-product on-hand quantity (the stock ledger row) plus the
/// catalog attributes the rest of the system reads. Quantity is only ever
/// mutated through [`Product::apply_adjustment`], and only while the store
/// layer holds this row's exclusive lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    name: String,
    sku: Option<String>,
    unit: Option<String>,
    quantity: u64,
    reorder_threshold: u64,
    buying_price: Decimal,
    selling_price: Decimal,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Product {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ProductId,
        name: impl Into<String>,
        sku: Option<String>,
        unit: Option<String>,
        quantity: u64,
        reorder_threshold: u64,
        buying_price: Decimal,
        selling_price: Decimal,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("product name cannot be empty"));
        }
        ensure_non_negative("buying_price", buying_price)?;
        ensure_non_negative("selling_price", selling_price)?;

        Ok(Self {
            id,
            name,
            sku,
            unit,
            quantity,
            reorder_threshold,
            buying_price,
            selling_price,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sku(&self) -> Option<&str> {
        self.sku.as_deref()
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn quantity(&self) -> u64 {
        self.quantity
    }

    pub fn reorder_threshold(&self) -> u64 {
        self.reorder_threshold
    }

    pub fn buying_price(&self) -> Decimal {
        self.buying_price
    }

    pub fn selling_price(&self) -> Decimal {
        self.selling_price
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    // Stock level probes

    pub fn is_low_stock(&self) -> bool {
        self.quantity <= self.reorder_threshold
    }

    pub fn is_out_of_stock(&self) -> bool {
        self.quantity == 0
    }

    pub fn stock_status(&self) -> StockStatus {
        if self.is_out_of_stock() {
            StockStatus::OutOfStock
        } else if self.is_low_stock() {
            StockStatus::LowStock
        } else {
            StockStatus::InStock
        }
    }

    // Pricing analytics (read-only, all rounded to 2dp half-up)

    pub fn profit_per_unit(&self) -> Decimal {
        round_money(self.selling_price - self.buying_price)
    }

    pub fn profit_margin_percentage(&self) -> Decimal {
        if self.buying_price.is_zero() {
            return Decimal::ZERO;
        }
        let margin =
            (self.selling_price - self.buying_price) / self.buying_price * Decimal::from(100);
        round_money(margin)
    }

    pub fn stock_value(&self) -> Decimal {
        round_money(Decimal::from(self.quantity) * self.buying_price)
    }

    pub fn potential_revenue(&self) -> Decimal {
        round_money(Decimal::from(self.quantity) * self.selling_price)
    }

    pub fn potential_profit(&self) -> Decimal {
        self.potential_revenue() - self.stock_value()
    }

    /// Apply a ledger mutation to the on-hand quantity.
    ///
    /// - magnitude `0` succeeds without touching the row;
    /// - `Decrease` beyond on-hand fails whole with `InsufficientStock`,
    ///   leaving quantity unchanged;
    /// - `Increase` always succeeds (checked against overflow).
    ///
    /// Callers must hold this row's exclusive lock for the enclosing
    /// transaction; the delta is then atomic against the stored value.
    pub fn apply_adjustment(
        &mut self,
        direction: StockDirection,
        magnitude: u64,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if magnitude == 0 {
            return Ok(());
        }

        match direction {
            StockDirection::Decrease => {
                if magnitude > self.quantity {
                    return Err(DomainError::insufficient_stock(self.quantity, magnitude));
                }
                self.quantity -= magnitude;
            }
            StockDirection::Increase => {
                self.quantity = self
                    .quantity
                    .checked_add(magnitude)
                    .ok_or_else(|| DomainError::validation("stock quantity overflow"))?;
            }
        }

        self.version += 1;
        self.updated_at = now;
        Ok(())
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Event: StockAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjusted {
    pub product_id: ProductId,
    pub direction: StockDirection,
    pub magnitude: u64,
    pub previous_quantity: u64,
    pub new_quantity: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockLow. Quantity crossed down to the reorder threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLow {
    pub product_id: ProductId,
    pub quantity: u64,
    pub reorder_threshold: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockDepleted. Quantity reached zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDepleted {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReplenished. Quantity climbed back above the threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReplenished {
    pub product_id: ProductId,
    pub quantity: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    StockAdjusted(StockAdjusted),
    StockLow(StockLow),
    StockDepleted(StockDepleted),
    StockReplenished(StockReplenished),
}

impl StockEvent {
    /// The product this event is about.
    pub fn product_id(&self) -> ProductId {
        match self {
            StockEvent::StockAdjusted(e) => e.product_id,
            StockEvent::StockLow(e) => e.product_id,
            StockEvent::StockDepleted(e) => e.product_id,
            StockEvent::StockReplenished(e) => e.product_id,
        }
    }
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::StockAdjusted(_) => "stock.product.adjusted",
            StockEvent::StockLow(_) => "stock.product.low",
            StockEvent::StockDepleted(_) => "stock.product.depleted",
            StockEvent::StockReplenished(_) => "stock.product.replenished",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::StockAdjusted(e) => e.occurred_at,
            StockEvent::StockLow(e) => e.occurred_at,
            StockEvent::StockDepleted(e) => e.occurred_at,
            StockEvent::StockReplenished(e) => e.occurred_at,
        }
    }
}

/// Derive the level-transition event (if any) for a product whose stock just
/// moved from `previous` to its current status.
///
/// The alert consumers only care about crossings, not every adjustment.
pub fn stock_level_event(
    previous: StockStatus,
    product: &Product,
    occurred_at: DateTime<Utc>,
) -> Option<StockEvent> {
    let current = product.stock_status();
    if current == previous {
        return None;
    }

    Some(match current {
        StockStatus::OutOfStock => StockEvent::StockDepleted(StockDepleted {
            product_id: product.id_typed(),
            occurred_at,
        }),
        StockStatus::LowStock => StockEvent::StockLow(StockLow {
            product_id: product.id_typed(),
            quantity: product.quantity(),
            reorder_threshold: product.reorder_threshold(),
            occurred_at,
        }),
        StockStatus::InStock => StockEvent::StockReplenished(StockReplenished {
            product_id: product.id_typed(),
            quantity: product.quantity(),
            occurred_at,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chantier_core::AggregateId;
    use rust_decimal_macros::dec;

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_product(quantity: u64) -> Product {
        Product::new(
            test_product_id(),
            "Ciment 42.5",
            Some("SKU-001".to_string()),
            Some("sac".to_string()),
            quantity,
            10,
            dec!(50.00),
            dec!(75.00),
            test_time(),
        )
        .unwrap()
    }

    #[test]
    fn rejects_empty_name() {
        let err = Product::new(
            test_product_id(),
            "   ",
            None,
            None,
            0,
            0,
            dec!(0),
            dec!(0),
            test_time(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn rejects_negative_prices() {
        let err = Product::new(
            test_product_id(),
            "Ciment",
            None,
            None,
            0,
            0,
            dec!(-1.00),
            dec!(0),
            test_time(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn decrease_within_stock_succeeds() {
        let mut product = test_product(100);
        product
            .apply_adjustment(StockDirection::Decrease, 30, test_time())
            .unwrap();
        assert_eq!(product.quantity(), 70);
    }

    #[test]
    fn decrease_beyond_stock_fails_and_leaves_quantity_unchanged() {
        let mut product = test_product(10);
        let err = product
            .apply_adjustment(StockDirection::Decrease, 11, test_time())
            .unwrap_err();
        assert_eq!(
            err,
            DomainError::InsufficientStock {
                available: 10,
                requested: 11
            }
        );
        assert_eq!(product.quantity(), 10);
    }

    #[test]
    fn zero_magnitude_is_a_successful_noop() {
        let mut product = test_product(10);
        let version = AggregateRoot::version(&product);
        product
            .apply_adjustment(StockDirection::Decrease, 0, test_time())
            .unwrap();
        product
            .apply_adjustment(StockDirection::Increase, 0, test_time())
            .unwrap();
        assert_eq!(product.quantity(), 10);
        assert_eq!(AggregateRoot::version(&product), version);
    }

    #[test]
    fn increase_always_succeeds() {
        let mut product = test_product(0);
        product
            .apply_adjustment(StockDirection::Increase, 42, test_time())
            .unwrap();
        assert_eq!(product.quantity(), 42);
    }

    #[test]
    fn stock_status_tracks_threshold() {
        let mut product = test_product(100);
        assert_eq!(product.stock_status(), StockStatus::InStock);

        product
            .apply_adjustment(StockDirection::Decrease, 90, test_time())
            .unwrap();
        assert_eq!(product.stock_status(), StockStatus::LowStock);
        assert!(product.is_low_stock());

        product
            .apply_adjustment(StockDirection::Decrease, 10, test_time())
            .unwrap();
        assert_eq!(product.stock_status(), StockStatus::OutOfStock);
        assert!(product.is_out_of_stock());
    }

    #[test]
    fn level_events_fire_only_on_crossings() {
        let mut product = test_product(12);
        let before = product.stock_status();
        product
            .apply_adjustment(StockDirection::Decrease, 1, test_time())
            .unwrap();
        // 12 -> 11, still InStock: no event.
        assert!(stock_level_event(before, &product, test_time()).is_none());

        let before = product.stock_status();
        product
            .apply_adjustment(StockDirection::Decrease, 1, test_time())
            .unwrap();
        // 11 -> 10 == threshold: low stock.
        match stock_level_event(before, &product, test_time()) {
            Some(StockEvent::StockLow(e)) => {
                assert_eq!(e.quantity, 10);
                assert_eq!(e.reorder_threshold, 10);
            }
            other => panic!("expected StockLow, got {other:?}"),
        }

        let before = product.stock_status();
        product
            .apply_adjustment(StockDirection::Decrease, 10, test_time())
            .unwrap();
        assert!(matches!(
            stock_level_event(before, &product, test_time()),
            Some(StockEvent::StockDepleted(_))
        ));

        let before = product.stock_status();
        product
            .apply_adjustment(StockDirection::Increase, 50, test_time())
            .unwrap();
        assert!(matches!(
            stock_level_event(before, &product, test_time()),
            Some(StockEvent::StockReplenished(_))
        ));
    }

    #[test]
    fn pricing_analytics() {
        let product = test_product(100);
        assert_eq!(product.profit_per_unit(), dec!(25.00));
        assert_eq!(product.profit_margin_percentage(), dec!(50.00));
        assert_eq!(product.stock_value(), dec!(5000.00));
        assert_eq!(product.potential_revenue(), dec!(7500.00));
        assert_eq!(product.potential_profit(), dec!(2500.00));
    }

    #[test]
    fn margin_is_zero_when_buying_price_is_zero() {
        let product = Product::new(
            test_product_id(),
            "Gravats",
            None,
            None,
            5,
            2,
            dec!(0),
            dec!(10.00),
            test_time(),
        )
        .unwrap();
        assert_eq!(product.profit_margin_percentage(), Decimal::ZERO);
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 1000,
                ..ProptestConfig::default()
            })]

            /// Property: quantity never goes negative and failed decrements
            /// never change state, for arbitrary adjustment sequences.
            #[test]
            fn quantity_never_negative(
                start in 0u64..500,
                ops in prop::collection::vec((any::<bool>(), 0u64..200), 0..40)
            ) {
                let mut product = test_product(start);
                let mut expected = start;

                for (increase, magnitude) in ops {
                    let direction = if increase {
                        StockDirection::Increase
                    } else {
                        StockDirection::Decrease
                    };
                    let before = product.quantity();
                    match product.apply_adjustment(direction, magnitude, test_time()) {
                        Ok(()) => {
                            expected = if increase {
                                expected + magnitude
                            } else {
                                expected - magnitude
                            };
                        }
                        Err(_) => {
                            // Failed adjustment must leave the row untouched.
                            prop_assert_eq!(product.quantity(), before);
                        }
                    }
                }

                prop_assert_eq!(product.quantity(), expected);
            }
        }
    }
}
