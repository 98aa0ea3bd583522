//! Invoice lifecycle operations: the external interface of the core.
//!
//! Every operation here is one transaction: the store locks the invoice row
//! plus the product rows in scope, the domain decides on the staged copies,
//! stock deltas are applied by the same code path that checked them, and
//! either everything commits or nothing does.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use chantier_core::{AggregateId, DomainError, ProjectId, UserId};
use chantier_events::{EventBus, EventEnvelope};
use chantier_invoicing::{
    Invoice, InvoiceEvent, InvoiceId, InvoiceLine, InvoiceLineId, IssueCheck, LinePatch, NewLine,
};
use chantier_stock::{Product, ProductId, StockEvent};

use crate::state_store::StateStore;

use super::{
    Committed, ServiceError, collect_envelopes, invoice_envelope, missing_snapshot, publish_all,
    stock_adjustment::apply_adjustments,
};

/// The invoice–stock consistency engine's front door.
///
/// Generic over the state store and the event bus so tests run against the
/// in-memory pair and deployments pick Postgres / Redis.
#[derive(Debug)]
pub struct InvoicingService<S, B> {
    store: S,
    bus: B,
}

impl<S, B> InvoicingService<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }
}

impl<S, B> InvoicingService<S, B>
where
    S: StateStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Create an invoice in DRAFT for a project.
    #[instrument(skip(self))]
    pub fn create_invoice(
        &self,
        actor: UserId,
        project: ProjectId,
        tax_rate: Decimal,
        due_date: Option<NaiveDate>,
    ) -> Result<Committed<Invoice>, ServiceError> {
        let now = Utc::now();
        let (invoice, event) = Invoice::create(
            InvoiceId::new(AggregateId::new()),
            project,
            tax_rate,
            due_date,
            actor,
            now,
        )?;

        self.store.insert_invoice(invoice.clone())?;

        let envelopes = vec![invoice_envelope(actor, &event)?];
        publish_all(&self.bus, &envelopes)?;

        info!(invoice = %invoice.id_typed(), "invoice created");
        Ok(Committed {
            value: invoice,
            events: envelopes,
        })
    }

    /// Add a line to an editable invoice.
    ///
    /// On an issued invoice the new line's quantity is deducted from stock
    /// inside the same transaction; `InsufficientStock` aborts both the
    /// line and the deduction.
    #[instrument(skip(self, input), fields(invoice_id = %invoice_id))]
    pub fn add_line(
        &self,
        actor: UserId,
        invoice_id: InvoiceId,
        input: NewLine,
    ) -> Result<Committed<InvoiceLine>, ServiceError> {
        let now = Utc::now();
        let line_id = InvoiceLineId::new(AggregateId::new());
        let extra: Vec<ProductId> = input.product.into_iter().collect();

        let mut line: Option<InvoiceLine> = None;
        let mut invoice_event: Option<InvoiceEvent> = None;
        let mut stock_events: Vec<StockEvent> = Vec::new();

        self.store.transact(Some(invoice_id), &extra, &mut |ctx| {
            if let Some(product_id) = input.product {
                if !ctx.products.contains_key(&product_id) {
                    return Err(DomainError::validation(
                        "referenced product does not exist",
                    ));
                }
            }

            let mutation = {
                let invoice = ctx.invoice_mut()?;
                invoice.add_line(line_id, input.clone(), now)?
            };
            stock_events = match &mutation.adjustment {
                Some(adjustment) => {
                    apply_adjustments(ctx, std::slice::from_ref(adjustment), now)?
                }
                None => Vec::new(),
            };
            line = Some(mutation.line);
            invoice_event = Some(mutation.event);
            Ok(())
        })?;

        let line = line.ok_or_else(missing_snapshot)?;
        let event = invoice_event.ok_or_else(missing_snapshot)?;

        let envelopes = collect_envelopes(actor, Some(&event), &stock_events)?;
        publish_all(&self.bus, &envelopes)?;

        Ok(Committed {
            value: line,
            events: envelopes,
        })
    }

    /// Update a line's quantity / unit price / discount.
    #[instrument(skip(self), fields(line_id = %line_id))]
    pub fn update_line(
        &self,
        actor: UserId,
        line_id: InvoiceLineId,
        patch: LinePatch,
    ) -> Result<Committed<InvoiceLine>, ServiceError> {
        let now = Utc::now();
        let invoice_id = self
            .store
            .find_invoice_by_line(line_id)?
            .ok_or(DomainError::NotFound)?;

        let mut line: Option<InvoiceLine> = None;
        let mut invoice_event: Option<InvoiceEvent> = None;
        let mut stock_events: Vec<StockEvent> = Vec::new();

        self.store.transact(Some(invoice_id), &[], &mut |ctx| {
            let mutation = {
                let invoice = ctx.invoice_mut()?;
                invoice.update_line(line_id, patch, now)?
            };
            stock_events = match &mutation.adjustment {
                Some(adjustment) => {
                    apply_adjustments(ctx, std::slice::from_ref(adjustment), now)?
                }
                None => Vec::new(),
            };
            line = Some(mutation.line);
            invoice_event = Some(mutation.event);
            Ok(())
        })?;

        let line = line.ok_or_else(missing_snapshot)?;
        let event = invoice_event.ok_or_else(missing_snapshot)?;

        let envelopes = collect_envelopes(actor, Some(&event), &stock_events)?;
        publish_all(&self.bus, &envelopes)?;

        Ok(Committed {
            value: line,
            events: envelopes,
        })
    }

    /// Delete a line; on an issued invoice its quantity is restored.
    #[instrument(skip(self), fields(line_id = %line_id))]
    pub fn delete_line(
        &self,
        actor: UserId,
        line_id: InvoiceLineId,
    ) -> Result<Committed<()>, ServiceError> {
        let now = Utc::now();
        let invoice_id = self
            .store
            .find_invoice_by_line(line_id)?
            .ok_or(DomainError::NotFound)?;

        let mut invoice_event: Option<InvoiceEvent> = None;
        let mut stock_events: Vec<StockEvent> = Vec::new();

        self.store.transact(Some(invoice_id), &[], &mut |ctx| {
            let mutation = {
                let invoice = ctx.invoice_mut()?;
                invoice.remove_line(line_id, now)?
            };
            stock_events = match &mutation.adjustment {
                Some(adjustment) => {
                    apply_adjustments(ctx, std::slice::from_ref(adjustment), now)?
                }
                None => Vec::new(),
            };
            invoice_event = Some(mutation.event);
            Ok(())
        })?;

        let event = invoice_event.ok_or_else(missing_snapshot)?;

        let envelopes = collect_envelopes(actor, Some(&event), &stock_events)?;
        publish_all(&self.bus, &envelopes)?;

        Ok(Committed {
            value: (),
            events: envelopes,
        })
    }

    /// DRAFT → ISSUED: deduct every product line from stock, atomically.
    ///
    /// The availability check and the deduction run under the same product
    /// row locks; a clean abort leaves the invoice in DRAFT and stock
    /// untouched, so a retry deducts exactly once.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub fn issue(
        &self,
        actor: UserId,
        invoice_id: InvoiceId,
    ) -> Result<Committed<Invoice>, ServiceError> {
        let committed = self.transition(actor, invoice_id, |invoice, now| invoice.issue(now))?;
        info!(invoice = %invoice_id, total = %committed.value.total(), "invoice issued");
        Ok(committed)
    }

    /// ISSUED → PAID. No stock effect; freezes the document.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub fn mark_paid(
        &self,
        actor: UserId,
        invoice_id: InvoiceId,
    ) -> Result<Committed<Invoice>, ServiceError> {
        let committed =
            self.transition(actor, invoice_id, |invoice, now| invoice.mark_paid(now))?;
        info!(invoice = %invoice_id, "invoice paid");
        Ok(committed)
    }

    /// ISSUED → DRAFT: restore every product line to stock, atomically.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub fn revert_to_draft(
        &self,
        actor: UserId,
        invoice_id: InvoiceId,
    ) -> Result<Committed<Invoice>, ServiceError> {
        let committed =
            self.transition(actor, invoice_id, |invoice, now| invoice.revert_to_draft(now))?;
        info!(invoice = %invoice_id, "invoice reverted to draft");
        Ok(committed)
    }

    /// Delete an invoice (DRAFT or ISSUED). Stock held by an issued invoice
    /// is restored before the row and its lines are removed, all in one
    /// transaction.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub fn delete_invoice(
        &self,
        actor: UserId,
        invoice_id: InvoiceId,
    ) -> Result<Committed<()>, ServiceError> {
        let now = Utc::now();
        let mut invoice_event: Option<InvoiceEvent> = None;
        let mut stock_events: Vec<StockEvent> = Vec::new();

        self.store.transact(Some(invoice_id), &[], &mut |ctx| {
            let change = {
                let invoice = ctx.invoice_mut()?;
                invoice.prepare_delete(now)?
            };
            stock_events = apply_adjustments(ctx, &change.adjustments, now)?;
            invoice_event = Some(change.event);
            ctx.mark_invoice_deleted();
            Ok(())
        })?;

        let event = invoice_event.ok_or_else(missing_snapshot)?;

        let envelopes = collect_envelopes(actor, Some(&event), &stock_events)?;
        publish_all(&self.bus, &envelopes)?;

        info!(invoice = %invoice_id, "invoice deleted");
        Ok(Committed {
            value: (),
            events: envelopes,
        })
    }

    /// Record a deposit on an editable invoice.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub fn set_deposit(
        &self,
        actor: UserId,
        invoice_id: InvoiceId,
        amount: Decimal,
    ) -> Result<Committed<Invoice>, ServiceError> {
        let now = Utc::now();
        let mut snapshot: Option<Invoice> = None;
        let mut invoice_event: Option<InvoiceEvent> = None;

        self.store.transact(Some(invoice_id), &[], &mut |ctx| {
            let event = {
                let invoice = ctx.invoice_mut()?;
                invoice.set_deposit(amount, now)?
            };
            snapshot = ctx.invoice.clone();
            invoice_event = Some(event);
            Ok(())
        })?;

        let invoice = snapshot.ok_or_else(missing_snapshot)?;
        let event = invoice_event.ok_or_else(missing_snapshot)?;

        let envelopes = vec![invoice_envelope(actor, &event)?];
        publish_all(&self.bus, &envelopes)?;

        Ok(Committed {
            value: invoice,
            events: envelopes,
        })
    }

    /// Read-only precondition probe: could this invoice be issued now?
    ///
    /// Advisory: quantities are read outside the issue transaction's
    /// locks; [`InvoicingService::issue`] repeats the binding check under
    /// them.
    pub fn can_issue(&self, invoice_id: InvoiceId) -> Result<IssueCheck, ServiceError> {
        let invoice = self
            .store
            .load_invoice(invoice_id)?
            .ok_or(DomainError::NotFound)?;

        let check = invoice.can_be_issued();
        if !check.allowed {
            return Ok(check);
        }

        for (product_id, required) in invoice.required_stock() {
            match self.store.load_product(product_id)? {
                None => {
                    return Ok(IssueCheck::rejected(format!(
                        "product {product_id} no longer exists"
                    )));
                }
                Some(product) if product.quantity() < required => {
                    return Ok(IssueCheck::rejected(format!(
                        "insufficient stock for {}: available {}, required {}",
                        product.name(),
                        product.quantity(),
                        required
                    )));
                }
                Some(_) => {}
            }
        }

        Ok(IssueCheck::allowed())
    }

    /// Read-through snapshot of an invoice.
    pub fn get_invoice(&self, invoice_id: InvoiceId) -> Result<Invoice, ServiceError> {
        Ok(self
            .store
            .load_invoice(invoice_id)?
            .ok_or(DomainError::NotFound)?)
    }

    /// Read-through snapshot of a product.
    pub fn get_product(&self, product_id: ProductId) -> Result<Product, ServiceError> {
        Ok(self
            .store
            .load_product(product_id)?
            .ok_or(DomainError::NotFound)?)
    }

    /// Shared shape of issue / mark_paid / revert_to_draft: run the domain
    /// transition, apply its stock effect in the same transaction, publish.
    fn transition(
        &self,
        actor: UserId,
        invoice_id: InvoiceId,
        apply: impl Fn(
            &mut Invoice,
            chrono::DateTime<Utc>,
        ) -> chantier_core::DomainResult<chantier_invoicing::StatusChange>,
    ) -> Result<Committed<Invoice>, ServiceError> {
        let now = Utc::now();
        let mut snapshot: Option<Invoice> = None;
        let mut invoice_event: Option<InvoiceEvent> = None;
        let mut stock_events: Vec<StockEvent> = Vec::new();

        self.store.transact(Some(invoice_id), &[], &mut |ctx| {
            let change = {
                let invoice = ctx.invoice_mut()?;
                apply(invoice, now)?
            };
            stock_events = apply_adjustments(ctx, &change.adjustments, now)?;
            snapshot = ctx.invoice.clone();
            invoice_event = Some(change.event);
            Ok(())
        })?;

        let invoice = snapshot.ok_or_else(missing_snapshot)?;
        let event = invoice_event.ok_or_else(missing_snapshot)?;

        let envelopes = collect_envelopes(actor, Some(&event), &stock_events)?;
        publish_all(&self.bus, &envelopes)?;

        Ok(Committed {
            value: invoice,
            events: envelopes,
        })
    }
}
