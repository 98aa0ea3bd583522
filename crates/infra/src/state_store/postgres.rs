//! Postgres-backed state store.
//!
//! Row-level locking maps directly onto the database: `transact` opens one
//! SQL transaction, takes `SELECT ... FOR UPDATE` on the invoice row and on
//! the product rows in sorted id order, runs the domain closure on the
//! loaded copies, and writes every staged row back before `COMMIT`. A
//! domain rejection rolls the transaction back, so partial stock effects
//! are never left committed.
//!
//! Rows are stored as JSONB payloads beside the key/query columns
//! (`quantity`, `reorder_threshold` for the low-stock listings, a
//! `line_id → invoice_id` index for line lookups). The payload is the
//! serde form of the domain type, so the domain crates keep their
//! encapsulation.
//!
//! ## Error Mapping
//!
//! | SQLx error | StoreError | Scenario |
//! |------------|------------|----------|
//! | Database (unique violation) | `DuplicateKey` | Insert collided with an existing id |
//! | Database (other) | `Backend` | Constraint or SQL failure |
//! | PoolClosed / Io / other | `Backend` | Connection-level failure |

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use chantier_core::DomainResult;
use chantier_invoicing::{Invoice, InvoiceId, InvoiceLineId};
use chantier_stock::{Product, ProductId};

use super::{StateStore, StoreError, TxContext, TxError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS products (
        id UUID PRIMARY KEY,
        quantity BIGINT NOT NULL CHECK (quantity >= 0),
        reorder_threshold BIGINT NOT NULL,
        payload JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS invoices (
        id UUID PRIMARY KEY,
        payload JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS invoice_lines (
        line_id UUID PRIMARY KEY,
        invoice_id UUID NOT NULL REFERENCES invoices(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_invoice_lines_invoice
        ON invoice_lines(invoice_id)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_products_low_stock
        ON products(quantity, reorder_threshold)
    "#,
];

/// Postgres implementation of [`StateStore`].
///
/// All methods are async internally; the sync [`StateStore`] impl bridges
/// through the ambient tokio runtime handle, mirroring how callers embed
/// this store inside a service that is otherwise synchronous.
#[derive(Debug, Clone)]
pub struct PostgresStateStore {
    pool: Arc<PgPool>,
}

impl PostgresStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("init_schema", e))?;
        }
        Ok(())
    }

    pub async fn insert_product_async(&self, product: Product) -> Result<(), StoreError> {
        let payload = to_payload(&product)?;
        sqlx::query(
            "INSERT INTO products (id, quantity, reorder_threshold, payload, updated_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(*product.id_typed().0.as_uuid())
        .bind(as_db_quantity(product.quantity())?)
        .bind(as_db_quantity(product.reorder_threshold())?)
        .bind(payload)
        .bind(product.updated_at())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert product", e))?;
        Ok(())
    }

    pub async fn insert_invoice_async(&self, invoice: Invoice) -> Result<(), StoreError> {
        let payload = to_payload(&invoice)?;
        sqlx::query("INSERT INTO invoices (id, payload, updated_at) VALUES ($1, $2, $3)")
            .bind(*invoice.id_typed().0.as_uuid())
            .bind(payload)
            .bind(invoice.updated_at())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert invoice", e))?;
        Ok(())
    }

    pub async fn load_invoice_async(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        let row = sqlx::query("SELECT payload FROM invoices WHERE id = $1")
            .bind(*id.0.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load invoice", e))?;
        row.map(|r| from_payload_row(&r)).transpose()
    }

    pub async fn load_product_async(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query("SELECT payload FROM products WHERE id = $1")
            .bind(*id.0.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load product", e))?;
        row.map(|r| from_payload_row(&r)).transpose()
    }

    pub async fn find_invoice_by_line_async(
        &self,
        line_id: InvoiceLineId,
    ) -> Result<Option<InvoiceId>, StoreError> {
        let row = sqlx::query("SELECT invoice_id FROM invoice_lines WHERE line_id = $1")
            .bind(*line_id.0.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find invoice by line", e))?;
        match row {
            Some(row) => {
                let id: Uuid = row
                    .try_get("invoice_id")
                    .map_err(|e| map_sqlx_error("find invoice by line", e))?;
                Ok(Some(InvoiceId::new(chantier_core::AggregateId::from_uuid(
                    id,
                ))))
            }
            None => Ok(None),
        }
    }

    pub async fn low_stock_products_async(&self) -> Result<Vec<Product>, StoreError> {
        let rows =
            sqlx::query("SELECT payload FROM products WHERE quantity <= reorder_threshold")
                .fetch_all(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("low stock products", e))?;
        rows.iter().map(from_payload_row).collect()
    }

    pub async fn out_of_stock_products_async(&self) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query("SELECT payload FROM products WHERE quantity = 0")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("out of stock products", e))?;
        rows.iter().map(from_payload_row).collect()
    }

    /// One SQL transaction: lock, load, decide, write back, commit.
    #[instrument(skip(self, f), fields(invoice_id = ?invoice_id), err)]
    pub async fn transact_async(
        &self,
        invoice_id: Option<InvoiceId>,
        extra_products: &[ProductId],
        f: &mut dyn FnMut(&mut TxContext) -> DomainResult<()>,
    ) -> Result<(), TxError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| TxError::Store(map_sqlx_error("begin", e)))?;

        // Invoice row lock first, then its payload; the line set is stable
        // from here on.
        let invoice: Option<Invoice> = match invoice_id {
            Some(id) => {
                let row = sqlx::query("SELECT payload FROM invoices WHERE id = $1 FOR UPDATE")
                    .bind(*id.0.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| TxError::Store(map_sqlx_error("lock invoice", e)))?;
                row.map(|r| from_payload_row(&r))
                    .transpose()
                    .map_err(TxError::Store)?
            }
            None => None,
        };

        let mut scope: BTreeSet<ProductId> = extra_products.iter().copied().collect();
        if let Some(inv) = &invoice {
            scope.extend(inv.referenced_products());
        }

        let mut products = BTreeMap::new();
        if !scope.is_empty() {
            let ids: Vec<Uuid> = scope.iter().map(|p| *p.0.as_uuid()).collect();
            let rows = sqlx::query(
                "SELECT payload FROM products WHERE id = ANY($1) ORDER BY id FOR UPDATE",
            )
            .bind(&ids)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| TxError::Store(map_sqlx_error("lock products", e)))?;
            for row in &rows {
                let product: Product = from_payload_row(row).map_err(TxError::Store)?;
                products.insert(product.id_typed(), product);
            }
        }

        let mut ctx = TxContext::new(invoice, products);
        if let Err(domain_err) = f(&mut ctx) {
            let _ = tx.rollback().await;
            return Err(TxError::Domain(domain_err));
        }

        for product in ctx.products.values() {
            upsert_product(&mut tx, product)
                .await
                .map_err(TxError::Store)?;
        }

        if ctx.invoice_deleted() {
            if let Some(id) = invoice_id {
                // invoice_lines rows go with the invoice (ON DELETE CASCADE).
                sqlx::query("DELETE FROM invoices WHERE id = $1")
                    .bind(*id.0.as_uuid())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| TxError::Store(map_sqlx_error("delete invoice", e)))?;
            }
        } else if let Some(inv) = &ctx.invoice {
            upsert_invoice(&mut tx, inv).await.map_err(TxError::Store)?;
        }

        tx.commit()
            .await
            .map_err(|e| TxError::Store(map_sqlx_error("commit", e)))?;
        Ok(())
    }
}

// The service layer is synchronous; bridge through the ambient runtime the
// way the process embeds this store (a tokio runtime is already running for
// the pool). `try_current` fails fast outside one.
fn runtime_handle() -> Result<tokio::runtime::Handle, StoreError> {
    tokio::runtime::Handle::try_current()
        .map_err(|_| StoreError::Backend("postgres store requires a tokio runtime".to_string()))
}

impl StateStore for PostgresStateStore {
    fn insert_product(&self, product: Product) -> Result<(), StoreError> {
        runtime_handle()?.block_on(self.insert_product_async(product))
    }

    fn insert_invoice(&self, invoice: Invoice) -> Result<(), StoreError> {
        runtime_handle()?.block_on(self.insert_invoice_async(invoice))
    }

    fn load_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        runtime_handle()?.block_on(self.load_invoice_async(id))
    }

    fn load_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        runtime_handle()?.block_on(self.load_product_async(id))
    }

    fn find_invoice_by_line(
        &self,
        line_id: InvoiceLineId,
    ) -> Result<Option<InvoiceId>, StoreError> {
        runtime_handle()?.block_on(self.find_invoice_by_line_async(line_id))
    }

    fn low_stock_products(&self) -> Result<Vec<Product>, StoreError> {
        runtime_handle()?.block_on(self.low_stock_products_async())
    }

    fn out_of_stock_products(&self) -> Result<Vec<Product>, StoreError> {
        runtime_handle()?.block_on(self.out_of_stock_products_async())
    }

    fn transact(
        &self,
        invoice_id: Option<InvoiceId>,
        extra_products: &[ProductId],
        f: &mut dyn FnMut(&mut TxContext) -> DomainResult<()>,
    ) -> Result<(), TxError> {
        let handle = runtime_handle().map_err(TxError::Store)?;
        handle.block_on(self.transact_async(invoice_id, extra_products, f))
    }
}

async fn upsert_product(
    tx: &mut Transaction<'_, Postgres>,
    product: &Product,
) -> Result<(), StoreError> {
    let payload = to_payload(product)?;
    sqlx::query(
        "INSERT INTO products (id, quantity, reorder_threshold, payload, updated_at) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (id) DO UPDATE SET \
             quantity = EXCLUDED.quantity, \
             reorder_threshold = EXCLUDED.reorder_threshold, \
             payload = EXCLUDED.payload, \
             updated_at = EXCLUDED.updated_at",
    )
    .bind(*product.id_typed().0.as_uuid())
    .bind(as_db_quantity(product.quantity())?)
    .bind(as_db_quantity(product.reorder_threshold())?)
    .bind(payload)
    .bind(product.updated_at())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("upsert product", e))?;
    Ok(())
}

async fn upsert_invoice(
    tx: &mut Transaction<'_, Postgres>,
    invoice: &Invoice,
) -> Result<(), StoreError> {
    let payload = to_payload(invoice)?;
    sqlx::query(
        "INSERT INTO invoices (id, payload, updated_at) VALUES ($1, $2, $3) \
         ON CONFLICT (id) DO UPDATE SET \
             payload = EXCLUDED.payload, \
             updated_at = EXCLUDED.updated_at",
    )
    .bind(*invoice.id_typed().0.as_uuid())
    .bind(payload)
    .bind(invoice.updated_at())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("upsert invoice", e))?;

    // Refresh the line lookup index for this invoice.
    sqlx::query("DELETE FROM invoice_lines WHERE invoice_id = $1")
        .bind(*invoice.id_typed().0.as_uuid())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("refresh line index", e))?;
    for line in invoice.lines() {
        sqlx::query("INSERT INTO invoice_lines (line_id, invoice_id) VALUES ($1, $2)")
            .bind(*line.id_typed().0.as_uuid())
            .bind(*invoice.id_typed().0.as_uuid())
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("refresh line index", e))?;
    }
    Ok(())
}

fn to_payload<T: serde::Serialize>(value: &T) -> Result<JsonValue, StoreError> {
    serde_json::to_value(value)
        .map_err(|e| StoreError::Backend(format!("payload serialization failed: {e}")))
}

fn from_payload_row<T: serde::de::DeserializeOwned>(
    row: &sqlx::postgres::PgRow,
) -> Result<T, StoreError> {
    let payload: JsonValue = row
        .try_get("payload")
        .map_err(|e| map_sqlx_error("read payload", e))?;
    serde_json::from_value(payload)
        .map_err(|e| StoreError::Backend(format!("payload deserialization failed: {e}")))
}

fn as_db_quantity(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Backend("quantity exceeds i64".to_string()))
}

fn map_sqlx_error(operation: &str, error: sqlx::Error) -> StoreError {
    match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::DuplicateKey(format!("{operation}: {db}"))
        }
        _ => StoreError::Backend(format!("{operation}: {error}")),
    }
}
