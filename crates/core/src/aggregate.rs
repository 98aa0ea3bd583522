//! Aggregate root trait for the domain model.

/// Aggregate root marker + minimal interface.
///
/// This is intentionally small so modules can decide how they model state
/// transitions without bringing in any infrastructure concerns.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// Bumped once per committed mutation; useful for audit trails and for
    /// stores that want an optimistic fallback to row locks.
    fn version(&self) -> u64;
}
