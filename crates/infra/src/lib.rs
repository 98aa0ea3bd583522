//! Infrastructure layer: state stores, services, event publication.
//!
//! The domain crates decide; this crate makes those decisions durable.
//! `state_store` owns the transaction boundary and the row-lock provider,
//! `services` exposes the operations callers use (the API layer, batch
//! jobs, the inventory-management collaborator).

pub mod config;
pub mod services;
pub mod state_store;

#[cfg(feature = "redis")]
pub mod event_bus;


pub use services::{Committed, InvoicingService, ServiceError, StockAdjustmentService};
pub use state_store::{InMemoryStateStore, PostgresStateStore, StateStore, StoreError, TxContext, TxError};
