//! Invoicing domain module.
//!
//! This crate contains the invoice aggregate (the DRAFT → ISSUED → PAID
//! state machine and its lines) plus the totals rules, implemented purely
//! as deterministic domain logic (no IO, no HTTP, no storage). Operations
//! return the stock adjustments and lifecycle events for the service layer
//! to apply and publish inside one transaction.

pub mod invoice;
pub mod totals;

pub use invoice::{
    Invoice, InvoiceEvent, InvoiceId, InvoiceLine, InvoiceLineId, InvoiceStatus, IssueCheck,
    LineMutation, LinePatch, NewLine, StatusChange,
};
pub use totals::{Totals, calculate};
