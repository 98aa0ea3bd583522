//! State store: the transaction boundary + row-lock provider.
//!
//! Every state-changing operation runs inside [`StateStore::transact`]:
//! the store acquires the invoice's row lock (when one is in scope),
//! derives the product lock set from the locked invoice's lines plus any
//! explicitly named products, acquires those locks in sorted id order, and
//! hands the closure **copies** of the locked rows in a [`TxContext`].
//! Mutations happen on the copies; the store writes them back only when
//! the closure succeeds. A failing closure discards every staged write, so
//! partial application is never observable to other transactions.

use std::collections::BTreeMap;

use thiserror::Error;

use chantier_core::{DomainError, DomainResult};
use chantier_invoicing::{Invoice, InvoiceId, InvoiceLineId};
use chantier_stock::{Product, ProductId};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryStateStore;
pub use postgres::PostgresStateStore;

/// Infrastructure-level store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row lock was poisoned by a panicking writer.
    #[error("row lock poisoned: {0}")]
    Poisoned(String),

    /// Insert collided with an existing key.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Backend failure (connection, serialization, SQL).
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Failure of a transactional closure: either a domain rejection (the
/// transaction rolled back cleanly) or an infrastructure failure.
#[derive(Debug, Error)]
pub enum TxError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Staged row copies for one transaction.
///
/// `invoice` is the locked invoice row (if one was in scope and exists);
/// `products` holds every locked product row, keyed by id. The closure
/// mutates these copies; commit writes them back under the held locks.
#[derive(Debug, Default)]
pub struct TxContext {
    pub invoice: Option<Invoice>,
    pub products: BTreeMap<ProductId, Product>,
    delete_invoice: bool,
}

impl TxContext {
    pub fn new(invoice: Option<Invoice>, products: BTreeMap<ProductId, Product>) -> Self {
        Self {
            invoice,
            products,
            delete_invoice: false,
        }
    }

    /// The invoice in scope, or `NotFound` if it does not exist (anymore).
    pub fn invoice_mut(&mut self) -> DomainResult<&mut Invoice> {
        self.invoice.as_mut().ok_or(DomainError::NotFound)
    }

    /// A locked product row, or `NotFound` if the reference is dangling.
    pub fn product_mut(&mut self, id: ProductId) -> DomainResult<&mut Product> {
        self.products.get_mut(&id).ok_or(DomainError::NotFound)
    }

    /// Stage removal of the invoice row (and its lines) at commit.
    pub fn mark_invoice_deleted(&mut self) {
        self.delete_invoice = true;
    }

    pub fn invoice_deleted(&self) -> bool {
        self.delete_invoice
    }
}

/// Storage + locking contract consumed by the service layer.
///
/// Implementations must guarantee:
/// - `transact` serializes concurrent transactions touching the same
///   product row (exclusive, transaction-scoped locks); transactions on
///   disjoint rows proceed in parallel;
/// - lock acquisition order is invoice first, then products in sorted id
///   order, so transactions cannot deadlock;
/// - commit is atomic: all staged rows become visible together or not at
///   all.
pub trait StateStore: Send + Sync {
    /// Insert a new product row (inventory-management collaborator).
    fn insert_product(&self, product: Product) -> Result<(), StoreError>;

    /// Insert a newly created invoice row.
    fn insert_invoice(&self, invoice: Invoice) -> Result<(), StoreError>;

    /// Read-only snapshot of an invoice.
    fn load_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError>;

    /// Read-only snapshot of a product.
    fn load_product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// Resolve which invoice owns a line.
    fn find_invoice_by_line(&self, line_id: InvoiceLineId)
    -> Result<Option<InvoiceId>, StoreError>;

    /// Products at or below their reorder threshold.
    fn low_stock_products(&self) -> Result<Vec<Product>, StoreError>;

    /// Products with zero on-hand quantity.
    fn out_of_stock_products(&self) -> Result<Vec<Product>, StoreError>;

    /// Run `f` inside one transaction with exclusive row locks held on
    /// `invoice_id` (when given), on every product referenced by that
    /// invoice's lines, and on `extra_products`.
    fn transact(
        &self,
        invoice_id: Option<InvoiceId>,
        extra_products: &[ProductId],
        f: &mut dyn FnMut(&mut TxContext) -> DomainResult<()>,
    ) -> Result<(), TxError>;
}

impl<S> StateStore for std::sync::Arc<S>
where
    S: StateStore + ?Sized,
{
    fn insert_product(&self, product: Product) -> Result<(), StoreError> {
        (**self).insert_product(product)
    }

    fn insert_invoice(&self, invoice: Invoice) -> Result<(), StoreError> {
        (**self).insert_invoice(invoice)
    }

    fn load_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        (**self).load_invoice(id)
    }

    fn load_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        (**self).load_product(id)
    }

    fn find_invoice_by_line(
        &self,
        line_id: InvoiceLineId,
    ) -> Result<Option<InvoiceId>, StoreError> {
        (**self).find_invoice_by_line(line_id)
    }

    fn low_stock_products(&self) -> Result<Vec<Product>, StoreError> {
        (**self).low_stock_products()
    }

    fn out_of_stock_products(&self) -> Result<Vec<Product>, StoreError> {
        (**self).out_of_stock_products()
    }

    fn transact(
        &self,
        invoice_id: Option<InvoiceId>,
        extra_products: &[ProductId],
        f: &mut dyn FnMut(&mut TxContext) -> DomainResult<()>,
    ) -> Result<(), TxError> {
        (**self).transact(invoice_id, extra_products, f)
    }
}
