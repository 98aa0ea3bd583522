//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**: two instances
/// with the same attribute values are the same value. `Totals` and
/// `StockAdjustment` are value objects; `Invoice` and `Product` are entities.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
