//! In-memory state store for tests/dev.
//!
//! Row locks are a table of per-id mutexes; the maps themselves are only
//! touched briefly under an `RwLock` to load copies and to commit staged
//! rows. Not optimized for performance.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use chantier_core::DomainResult;
use chantier_invoicing::{Invoice, InvoiceId, InvoiceLineId};
use chantier_stock::{Product, ProductId};

use super::{StateStore, StoreError, TxContext, TxError};

type RowLock = Arc<Mutex<()>>;

/// In-memory implementation of [`StateStore`].
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    invoices: RwLock<HashMap<InvoiceId, Invoice>>,
    products: RwLock<HashMap<ProductId, Product>>,
    invoice_locks: Mutex<HashMap<InvoiceId, RowLock>>,
    product_locks: Mutex<HashMap<ProductId, RowLock>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn invoice_row_lock(&self, id: InvoiceId) -> Result<RowLock, StoreError> {
        let mut table = self
            .invoice_locks
            .lock()
            .map_err(|_| StoreError::Poisoned("invoice lock table".to_string()))?;
        Ok(table.entry(id).or_default().clone())
    }

    fn product_row_lock(&self, id: ProductId) -> Result<RowLock, StoreError> {
        let mut table = self
            .product_locks
            .lock()
            .map_err(|_| StoreError::Poisoned("product lock table".to_string()))?;
        Ok(table.entry(id).or_default().clone())
    }
}

/// Acquire `locks` front-to-back (callers pass them sorted by id), then run
/// `f` with every guard held. Guards live on the recursion's stack frames
/// and release in reverse order when the call unwinds.
fn with_row_locks(
    locks: &[RowLock],
    f: &mut dyn FnMut() -> Result<(), TxError>,
) -> Result<(), TxError> {
    match locks.split_first() {
        None => f(),
        Some((head, rest)) => {
            let _guard = head
                .lock()
                .map_err(|_| StoreError::Poisoned("product row lock".to_string()))?;
            with_row_locks(rest, f)
        }
    }
}

impl StateStore for InMemoryStateStore {
    fn insert_product(&self, product: Product) -> Result<(), StoreError> {
        let mut map = self
            .products
            .write()
            .map_err(|_| StoreError::Poisoned("products map".to_string()))?;
        if map.contains_key(&product.id_typed()) {
            return Err(StoreError::DuplicateKey(product.id_typed().to_string()));
        }
        map.insert(product.id_typed(), product);
        Ok(())
    }

    fn insert_invoice(&self, invoice: Invoice) -> Result<(), StoreError> {
        let mut map = self
            .invoices
            .write()
            .map_err(|_| StoreError::Poisoned("invoices map".to_string()))?;
        if map.contains_key(&invoice.id_typed()) {
            return Err(StoreError::DuplicateKey(invoice.id_typed().to_string()));
        }
        map.insert(invoice.id_typed(), invoice);
        Ok(())
    }

    fn load_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        let map = self
            .invoices
            .read()
            .map_err(|_| StoreError::Poisoned("invoices map".to_string()))?;
        Ok(map.get(&id).cloned())
    }

    fn load_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let map = self
            .products
            .read()
            .map_err(|_| StoreError::Poisoned("products map".to_string()))?;
        Ok(map.get(&id).cloned())
    }

    fn find_invoice_by_line(
        &self,
        line_id: InvoiceLineId,
    ) -> Result<Option<InvoiceId>, StoreError> {
        let map = self
            .invoices
            .read()
            .map_err(|_| StoreError::Poisoned("invoices map".to_string()))?;
        Ok(map
            .values()
            .find(|invoice| invoice.line(line_id).is_some())
            .map(|invoice| invoice.id_typed()))
    }

    fn low_stock_products(&self) -> Result<Vec<Product>, StoreError> {
        let map = self
            .products
            .read()
            .map_err(|_| StoreError::Poisoned("products map".to_string()))?;
        let mut out: Vec<Product> = map.values().filter(|p| p.is_low_stock()).cloned().collect();
        out.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(out)
    }

    fn out_of_stock_products(&self) -> Result<Vec<Product>, StoreError> {
        let map = self
            .products
            .read()
            .map_err(|_| StoreError::Poisoned("products map".to_string()))?;
        let mut out: Vec<Product> = map
            .values()
            .filter(|p| p.is_out_of_stock())
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(out)
    }

    fn transact(
        &self,
        invoice_id: Option<InvoiceId>,
        extra_products: &[ProductId],
        f: &mut dyn FnMut(&mut TxContext) -> DomainResult<()>,
    ) -> Result<(), TxError> {
        // Invoice lock first: line mutations all require it, so the line set
        // (and with it the product lock scope) is stable once held.
        let invoice_lock = invoice_id
            .map(|id| self.invoice_row_lock(id))
            .transpose()?;
        let _invoice_guard = match &invoice_lock {
            Some(lock) => Some(
                lock.lock()
                    .map_err(|_| StoreError::Poisoned("invoice row lock".to_string()))?,
            ),
            None => None,
        };

        let invoice = match invoice_id {
            Some(id) => self
                .invoices
                .read()
                .map_err(|_| StoreError::Poisoned("invoices map".to_string()))?
                .get(&id)
                .cloned(),
            None => None,
        };

        // Product locks in sorted id order (BTreeSet iteration), the global
        // acquisition order that keeps concurrent transactions deadlock-free.
        let mut scope: BTreeSet<ProductId> = extra_products.iter().copied().collect();
        if let Some(inv) = &invoice {
            scope.extend(inv.referenced_products());
        }
        let locks = scope
            .iter()
            .map(|id| self.product_row_lock(*id))
            .collect::<Result<Vec<_>, _>>()?;

        let mut body = || -> Result<(), TxError> {
            let mut products = BTreeMap::new();
            {
                let map = self
                    .products
                    .read()
                    .map_err(|_| StoreError::Poisoned("products map".to_string()))?;
                for id in &scope {
                    if let Some(product) = map.get(id) {
                        products.insert(*id, product.clone());
                    }
                }
            }

            let mut ctx = TxContext::new(invoice.clone(), products);
            f(&mut ctx).map_err(TxError::Domain)?;

            // Commit staged rows while still holding every lock.
            {
                let mut map = self
                    .products
                    .write()
                    .map_err(|_| StoreError::Poisoned("products map".to_string()))?;
                for (id, product) in ctx.products.iter() {
                    map.insert(*id, product.clone());
                }
            }
            {
                let mut map = self
                    .invoices
                    .write()
                    .map_err(|_| StoreError::Poisoned("invoices map".to_string()))?;
                if ctx.invoice_deleted() {
                    if let Some(id) = invoice_id {
                        map.remove(&id);
                    }
                } else if let Some(inv) = ctx.invoice.take() {
                    map.insert(inv.id_typed(), inv);
                }
            }
            Ok(())
        };

        with_row_locks(&locks, &mut body)
    }
}
