use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use chantier_core::money::{ensure_non_negative, ensure_percentage, round_money};
use chantier_core::{
    AggregateId, AggregateRoot, DomainError, DomainResult, Entity, ProjectId, UserId, ValueObject,
};
use chantier_events::Event;
use chantier_stock::{ProductId, StockAdjustment};

use crate::totals;

/// Invoice identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub AggregateId);

impl InvoiceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Invoice line identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceLineId(pub AggregateId);

impl InvoiceLineId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InvoiceLineId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Invoice status lifecycle.
///
/// Stock is deducted while the invoice sits in `Issued` or `Paid`; `Paid`
/// additionally freezes the document against any further edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Issued,
    Paid,
}

impl InvoiceStatus {
    /// Whether product stock currently reflects this invoice's lines.
    pub fn stock_is_affected(self) -> bool {
        matches!(self, InvoiceStatus::Issued | InvoiceStatus::Paid)
    }

    /// Whether lines may still be created/updated/deleted.
    pub fn is_editable(self) -> bool {
        matches!(self, InvoiceStatus::Draft | InvoiceStatus::Issued)
    }
}

impl core::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let label = match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Issued => "ISSUED",
            InvoiceStatus::Paid => "PAID",
        };
        f.write_str(label)
    }
}

/// Input for creating a line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLine {
    pub product: Option<ProductId>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount: Decimal,
}

impl NewLine {
    /// A line selling `quantity` units of a catalog product.
    pub fn for_product(product: ProductId, quantity: Decimal, unit_price: Decimal) -> Self {
        Self {
            product: Some(product),
            description: String::new(),
            quantity,
            unit_price,
            discount: Decimal::ZERO,
        }
    }

    /// A free-text charge with no stock effect.
    pub fn for_service(
        description: impl Into<String>,
        quantity: Decimal,
        unit_price: Decimal,
    ) -> Self {
        Self {
            product: None,
            description: description.into(),
            quantity,
            unit_price,
            discount: Decimal::ZERO,
        }
    }

    pub fn with_discount(mut self, discount: Decimal) -> Self {
        self.discount = discount;
        self
    }
}

/// Partial update for an existing line. Fields left `None` are unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinePatch {
    pub quantity: Option<Decimal>,
    pub unit_price: Option<Decimal>,
    pub discount: Option<Decimal>,
}

impl LinePatch {
    pub fn quantity(quantity: Decimal) -> Self {
        Self {
            quantity: Some(quantity),
            ..Self::default()
        }
    }
}

/// A priced quantity of a product (or a free-text charge) on an invoice.
///
/// `line_total = round2(quantity × unit_price − discount)` and is stored;
/// it is recomputed on every edit, never accepted as input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    id: InvoiceLineId,
    product: Option<ProductId>,
    description: String,
    quantity: Decimal,
    unit_price: Decimal,
    discount: Decimal,
    line_total: Decimal,
    created_at: DateTime<Utc>,
}

impl InvoiceLine {
    /// Validate line input and compute its total.
    ///
    /// Rules:
    /// - quantity > 0; whole-number when the line references a product
    ///   (stock is an integer ledger);
    /// - unit_price ≥ 0, discount ≥ 0, discount ≤ quantity × unit_price
    ///   (a line total is never negative);
    /// - a line carries a product reference or a non-empty description.
    pub fn build(id: InvoiceLineId, input: NewLine, created_at: DateTime<Utc>) -> DomainResult<Self> {
        if input.quantity <= Decimal::ZERO {
            return Err(DomainError::validation("quantity must be greater than 0"));
        }
        ensure_non_negative("unit_price", input.unit_price)?;
        ensure_non_negative("discount", input.discount)?;

        let gross = input.quantity * input.unit_price;
        if input.discount > gross {
            return Err(DomainError::validation(
                "discount cannot exceed quantity x unit_price",
            ));
        }

        if input.product.is_none() && input.description.trim().is_empty() {
            return Err(DomainError::validation(
                "line requires a product or a description",
            ));
        }

        if input.product.is_some() {
            if !input.quantity.fract().is_zero() {
                return Err(DomainError::validation(
                    "product lines require a whole-number quantity",
                ));
            }
            if input.quantity.to_u64().is_none() {
                return Err(DomainError::validation("quantity is out of range"));
            }
        }

        let line_total = round_money(gross - input.discount);

        Ok(Self {
            id,
            product: input.product,
            description: input.description,
            quantity: input.quantity,
            unit_price: input.unit_price,
            discount: input.discount,
            line_total,
            created_at,
        })
    }

    pub fn id_typed(&self) -> InvoiceLineId {
        self.id
    }

    pub fn product(&self) -> Option<ProductId> {
        self.product
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn unit_price(&self) -> Decimal {
        self.unit_price
    }

    pub fn discount(&self) -> Decimal {
        self.discount
    }

    pub fn line_total(&self) -> Decimal {
        self.line_total
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// On-hand units this line binds while the invoice affects stock.
    ///
    /// `None` for description-only lines. Whole-number quantity is enforced
    /// at build time for product lines, so the conversion cannot fail.
    pub fn stock_units(&self) -> Option<u64> {
        self.product.map(|_| self.quantity.to_u64().unwrap_or(0))
    }
}

impl Entity for InvoiceLine {
    type Id = InvoiceLineId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Result of a line create/update/delete on the aggregate: the affected
/// line (for deletes, the removed line), the stock adjustment to apply in
/// the same transaction (if any), and the lifecycle event to publish after
/// commit.
#[derive(Debug, Clone)]
pub struct LineMutation {
    pub line: InvoiceLine,
    pub adjustment: Option<StockAdjustment>,
    pub event: InvoiceEvent,
}

/// Result of a status transition: the stock adjustments to apply in the
/// same transaction and the lifecycle event to publish after commit.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub adjustments: Vec<StockAdjustment>,
    pub event: InvoiceEvent,
}

/// Read-only answer to "could this invoice be issued right now?".
///
/// Advisory only; the binding availability check runs under the issue
/// transaction's locks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCheck {
    pub allowed: bool,
    pub reason: String,
}

impl IssueCheck {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: "invoice can be issued".to_string(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

impl ValueObject for IssueCheck {}

/// Aggregate root: Invoice.
///
/// Owns its lines and the DRAFT → ISSUED → PAID lifecycle. Monetary totals
/// are derived fields: recomputed from the line set after every mutation,
/// never hand-edited. Mutating methods validate preconditions, stage the
/// state change on this in-memory copy, and hand the caller the stock
/// adjustments + events; the store layer makes the whole set durable
/// atomically or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    id: InvoiceId,
    project_id: ProjectId,
    status: InvoiceStatus,
    lines: Vec<InvoiceLine>,
    tax_rate: Decimal,
    subtotal: Decimal,
    tax_amount: Decimal,
    total: Decimal,
    deposit: Decimal,
    due_date: Option<NaiveDate>,
    created_by: UserId,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Invoice {
    pub fn create(
        id: InvoiceId,
        project_id: ProjectId,
        tax_rate: Decimal,
        due_date: Option<NaiveDate>,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<(Self, InvoiceEvent)> {
        ensure_percentage("tax_rate", tax_rate)?;

        let invoice = Self {
            id,
            project_id,
            status: InvoiceStatus::Draft,
            lines: Vec::new(),
            tax_rate,
            subtotal: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            total: Decimal::ZERO,
            deposit: Decimal::ZERO,
            due_date,
            created_by,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        let event = InvoiceEvent::InvoiceCreated(InvoiceCreated {
            invoice_id: id,
            project_id,
            occurred_at: now,
        });

        Ok((invoice, event))
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn lines(&self) -> &[InvoiceLine] {
        &self.lines
    }

    pub fn line(&self, line_id: InvoiceLineId) -> Option<&InvoiceLine> {
        self.lines.iter().find(|l| l.id_typed() == line_id)
    }

    pub fn tax_rate(&self) -> Decimal {
        self.tax_rate
    }

    pub fn subtotal(&self) -> Decimal {
        self.subtotal
    }

    pub fn tax_amount(&self) -> Decimal {
        self.tax_amount
    }

    pub fn total(&self) -> Decimal {
        self.total
    }

    pub fn deposit(&self) -> Decimal {
        self.deposit
    }

    pub fn due_date(&self) -> Option<NaiveDate> {
        self.due_date
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn stock_is_affected(&self) -> bool {
        self.status.stock_is_affected()
    }

    pub fn is_editable(&self) -> bool {
        self.status.is_editable()
    }

    /// Total minus the recorded deposit.
    pub fn total_after_deposit(&self) -> Decimal {
        self.total - self.deposit
    }

    /// Outstanding amount; zero once the invoice is paid.
    pub fn amount_due(&self) -> Decimal {
        if self.status == InvoiceStatus::Paid {
            Decimal::ZERO
        } else {
            self.total_after_deposit()
        }
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        if self.status == InvoiceStatus::Paid {
            return false;
        }
        match self.due_date {
            Some(due) => due < today,
            None => false,
        }
    }

    pub fn days_overdue(&self, today: NaiveDate) -> i64 {
        if !self.is_overdue(today) {
            return 0;
        }
        // is_overdue() guarantees due_date is set here.
        (today - self.due_date.unwrap_or(today)).num_days()
    }

    /// On-hand units required per product if this invoice were issued now.
    pub fn required_stock(&self) -> BTreeMap<ProductId, u64> {
        let mut required = BTreeMap::new();
        for line in &self.lines {
            if let (Some(product_id), Some(units)) = (line.product(), line.stock_units()) {
                *required.entry(product_id).or_insert(0) += units;
            }
        }
        required
    }

    /// Product ids referenced by the current line set (lock scope helper).
    pub fn referenced_products(&self) -> Vec<ProductId> {
        let mut ids: Vec<ProductId> = self.lines.iter().filter_map(|l| l.product()).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
    }

    fn recompute_totals(&mut self, now: DateTime<Utc>) {
        let totals = totals::calculate(&self.lines, self.tax_rate);
        self.subtotal = totals.subtotal;
        self.tax_amount = totals.tax_amount;
        self.total = totals.total;
        self.touch(now);
    }

    fn ensure_lines_editable(&self) -> DomainResult<()> {
        if !self.status.is_editable() {
            return Err(DomainError::edit_not_allowed(
                "paid invoices cannot be modified",
            ));
        }
        Ok(())
    }

    /// Create a line.
    ///
    /// While the invoice is issued, the new line's full quantity is deducted
    /// from stock in the same transaction (the returned adjustment).
    pub fn add_line(
        &mut self,
        line_id: InvoiceLineId,
        input: NewLine,
        now: DateTime<Utc>,
    ) -> DomainResult<LineMutation> {
        self.ensure_lines_editable()?;

        let line = InvoiceLine::build(line_id, input, now)?;

        let adjustment = if self.stock_is_affected() {
            match (line.product(), line.stock_units()) {
                (Some(product_id), Some(units)) => Some(StockAdjustment::decrease(product_id, units)),
                _ => None,
            }
        } else {
            None
        };

        let event = InvoiceEvent::LineAdded(LineAdded {
            invoice_id: self.id,
            line_id,
            product_id: line.product(),
            quantity: line.quantity(),
            line_total: line.line_total(),
            occurred_at: now,
        });

        self.lines.push(line.clone());
        self.recompute_totals(now);

        Ok(LineMutation {
            line,
            adjustment,
            event,
        })
    }

    /// Update a line's quantity / unit price / discount.
    ///
    /// While the invoice is issued, only the **delta** versus the previous
    /// quantity moves stock: an increase deducts the difference, a decrease
    /// restores it.
    pub fn update_line(
        &mut self,
        line_id: InvoiceLineId,
        patch: LinePatch,
        now: DateTime<Utc>,
    ) -> DomainResult<LineMutation> {
        self.ensure_lines_editable()?;

        let idx = self
            .lines
            .iter()
            .position(|l| l.id_typed() == line_id)
            .ok_or(DomainError::NotFound)?;
        let previous = self.lines[idx].clone();

        let updated = InvoiceLine::build(
            line_id,
            NewLine {
                product: previous.product(),
                description: previous.description().to_string(),
                quantity: patch.quantity.unwrap_or_else(|| previous.quantity()),
                unit_price: patch.unit_price.unwrap_or_else(|| previous.unit_price()),
                discount: patch.discount.unwrap_or_else(|| previous.discount()),
            },
            previous.created_at(),
        )?;

        let adjustment = if self.stock_is_affected() {
            match (
                previous.product(),
                previous.stock_units(),
                updated.stock_units(),
            ) {
                (Some(product_id), Some(before), Some(after)) if after > before => {
                    Some(StockAdjustment::decrease(product_id, after - before))
                }
                (Some(product_id), Some(before), Some(after)) if after < before => {
                    Some(StockAdjustment::increase(product_id, before - after))
                }
                _ => None,
            }
        } else {
            None
        };

        let event = InvoiceEvent::LineUpdated(LineUpdated {
            invoice_id: self.id,
            line_id,
            previous_quantity: previous.quantity(),
            quantity: updated.quantity(),
            line_total: updated.line_total(),
            occurred_at: now,
        });

        self.lines[idx] = updated.clone();
        self.recompute_totals(now);

        Ok(LineMutation {
            line: updated,
            adjustment,
            event,
        })
    }

    /// Delete a line.
    ///
    /// While the invoice is issued, the line's full quantity is restored to
    /// stock in the same transaction.
    pub fn remove_line(
        &mut self,
        line_id: InvoiceLineId,
        now: DateTime<Utc>,
    ) -> DomainResult<LineMutation> {
        self.ensure_lines_editable()?;

        let idx = self
            .lines
            .iter()
            .position(|l| l.id_typed() == line_id)
            .ok_or(DomainError::NotFound)?;
        let line = self.lines.remove(idx);

        let adjustment = if self.stock_is_affected() {
            match (line.product(), line.stock_units()) {
                (Some(product_id), Some(units)) => Some(StockAdjustment::increase(product_id, units)),
                _ => None,
            }
        } else {
            None
        };

        let event = InvoiceEvent::LineRemoved(LineRemoved {
            invoice_id: self.id,
            line_id,
            occurred_at: now,
        });

        self.recompute_totals(now);

        Ok(LineMutation {
            line,
            adjustment,
            event,
        })
    }

    /// Record a deposit amount (editable states only).
    pub fn set_deposit(&mut self, amount: Decimal, now: DateTime<Utc>) -> DomainResult<InvoiceEvent> {
        self.ensure_lines_editable()?;
        ensure_non_negative("deposit", amount)?;

        self.deposit = amount;
        self.touch(now);

        Ok(InvoiceEvent::DepositUpdated(DepositUpdated {
            invoice_id: self.id,
            deposit: amount,
            occurred_at: now,
        }))
    }

    /// Structural preconditions for issuing (status, lines, total).
    ///
    /// Stock availability is deliberately not answered here: the binding
    /// check happens when the returned adjustments are applied under the
    /// product row locks.
    pub fn can_be_issued(&self) -> IssueCheck {
        if self.status != InvoiceStatus::Draft {
            return IssueCheck::rejected("invoice is not in draft status");
        }
        if self.lines.is_empty() {
            return IssueCheck::rejected("invoice has no line items");
        }
        if self.total <= Decimal::ZERO {
            return IssueCheck::rejected("invoice total must be greater than 0");
        }
        IssueCheck::allowed()
    }

    /// DRAFT → ISSUED. The single point where document quantities convert
    /// into ledger deductions; one decrease per product line.
    pub fn issue(&mut self, now: DateTime<Utc>) -> DomainResult<StatusChange> {
        let check = self.can_be_issued();
        if !check.allowed {
            return Err(DomainError::invalid_transition(check.reason));
        }

        let adjustments = self.line_adjustments(chantier_stock::StockDirection::Decrease);

        self.status = InvoiceStatus::Issued;
        self.touch(now);

        Ok(StatusChange {
            adjustments,
            event: InvoiceEvent::InvoiceIssued(InvoiceIssued {
                invoice_id: self.id,
                total: self.total,
                occurred_at: now,
            }),
        })
    }

    /// ISSUED → PAID. No stock effect; freezes the document.
    pub fn mark_paid(&mut self, now: DateTime<Utc>) -> DomainResult<StatusChange> {
        if self.status != InvoiceStatus::Issued {
            return Err(DomainError::invalid_transition(
                "only issued invoices can be marked as paid",
            ));
        }

        self.status = InvoiceStatus::Paid;
        self.touch(now);

        Ok(StatusChange {
            adjustments: Vec::new(),
            event: InvoiceEvent::InvoicePaid(InvoicePaid {
                invoice_id: self.id,
                occurred_at: now,
            }),
        })
    }

    /// ISSUED → DRAFT. Full stock restoration, one increase per product line.
    pub fn revert_to_draft(&mut self, now: DateTime<Utc>) -> DomainResult<StatusChange> {
        if self.status != InvoiceStatus::Issued {
            return Err(DomainError::invalid_transition(
                "only issued invoices can revert to draft",
            ));
        }

        let adjustments = self.line_adjustments(chantier_stock::StockDirection::Increase);

        self.status = InvoiceStatus::Draft;
        self.touch(now);

        Ok(StatusChange {
            adjustments,
            event: InvoiceEvent::InvoiceRevertedToDraft(InvoiceRevertedToDraft {
                invoice_id: self.id,
                occurred_at: now,
            }),
        })
    }

    /// Validate deletion and stage the stock restoration it requires.
    ///
    /// Paid invoices must not be deleted. When the invoice currently affects
    /// stock, every product line is restored before the row and its lines
    /// are removed, all inside the caller's transaction.
    pub fn prepare_delete(&self, now: DateTime<Utc>) -> DomainResult<StatusChange> {
        if self.status == InvoiceStatus::Paid {
            return Err(DomainError::edit_not_allowed(
                "paid invoices cannot be deleted",
            ));
        }

        let adjustments = if self.stock_is_affected() {
            self.line_adjustments(chantier_stock::StockDirection::Increase)
        } else {
            Vec::new()
        };

        Ok(StatusChange {
            adjustments,
            event: InvoiceEvent::InvoiceDeleted(InvoiceDeleted {
                invoice_id: self.id,
                occurred_at: now,
            }),
        })
    }

    fn line_adjustments(
        &self,
        direction: chantier_stock::StockDirection,
    ) -> Vec<StockAdjustment> {
        self.lines
            .iter()
            .filter_map(|line| {
                let product_id = line.product()?;
                let units = line.stock_units()?;
                Some(StockAdjustment {
                    product_id,
                    direction,
                    magnitude: units,
                })
            })
            .collect()
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Event: InvoiceCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCreated {
    pub invoice_id: InvoiceId,
    pub project_id: ProjectId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub invoice_id: InvoiceId,
    pub line_id: InvoiceLineId,
    pub product_id: Option<ProductId>,
    pub quantity: Decimal,
    pub line_total: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineUpdated {
    pub invoice_id: InvoiceId,
    pub line_id: InvoiceLineId,
    pub previous_quantity: Decimal,
    pub quantity: Decimal,
    pub line_total: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRemoved {
    pub invoice_id: InvoiceId,
    pub line_id: InvoiceLineId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DepositUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositUpdated {
    pub invoice_id: InvoiceId,
    pub deposit: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceIssued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceIssued {
    pub invoice_id: InvoiceId,
    pub total: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoicePaid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicePaid {
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceRevertedToDraft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRevertedToDraft {
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDeleted {
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceCreated(InvoiceCreated),
    LineAdded(LineAdded),
    LineUpdated(LineUpdated),
    LineRemoved(LineRemoved),
    DepositUpdated(DepositUpdated),
    InvoiceIssued(InvoiceIssued),
    InvoicePaid(InvoicePaid),
    InvoiceRevertedToDraft(InvoiceRevertedToDraft),
    InvoiceDeleted(InvoiceDeleted),
}

impl InvoiceEvent {
    /// The invoice this event is about.
    pub fn invoice_id(&self) -> InvoiceId {
        match self {
            InvoiceEvent::InvoiceCreated(e) => e.invoice_id,
            InvoiceEvent::LineAdded(e) => e.invoice_id,
            InvoiceEvent::LineUpdated(e) => e.invoice_id,
            InvoiceEvent::LineRemoved(e) => e.invoice_id,
            InvoiceEvent::DepositUpdated(e) => e.invoice_id,
            InvoiceEvent::InvoiceIssued(e) => e.invoice_id,
            InvoiceEvent::InvoicePaid(e) => e.invoice_id,
            InvoiceEvent::InvoiceRevertedToDraft(e) => e.invoice_id,
            InvoiceEvent::InvoiceDeleted(e) => e.invoice_id,
        }
    }
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceCreated(_) => "invoicing.invoice.created",
            InvoiceEvent::LineAdded(_) => "invoicing.invoice.line_added",
            InvoiceEvent::LineUpdated(_) => "invoicing.invoice.line_updated",
            InvoiceEvent::LineRemoved(_) => "invoicing.invoice.line_removed",
            InvoiceEvent::DepositUpdated(_) => "invoicing.invoice.deposit_updated",
            InvoiceEvent::InvoiceIssued(_) => "invoicing.invoice.issued",
            InvoiceEvent::InvoicePaid(_) => "invoicing.invoice.paid",
            InvoiceEvent::InvoiceRevertedToDraft(_) => "invoicing.invoice.reverted_to_draft",
            InvoiceEvent::InvoiceDeleted(_) => "invoicing.invoice.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceCreated(e) => e.occurred_at,
            InvoiceEvent::LineAdded(e) => e.occurred_at,
            InvoiceEvent::LineUpdated(e) => e.occurred_at,
            InvoiceEvent::LineRemoved(e) => e.occurred_at,
            InvoiceEvent::DepositUpdated(e) => e.occurred_at,
            InvoiceEvent::InvoiceIssued(e) => e.occurred_at,
            InvoiceEvent::InvoicePaid(e) => e.occurred_at,
            InvoiceEvent::InvoiceRevertedToDraft(e) => e.occurred_at,
            InvoiceEvent::InvoiceDeleted(e) => e.occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chantier_stock::StockDirection;
    use rust_decimal_macros::dec;

    fn test_invoice_id() -> InvoiceId {
        InvoiceId::new(AggregateId::new())
    }

    fn test_line_id() -> InvoiceLineId {
        InvoiceLineId::new(AggregateId::new())
    }

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn draft_invoice(tax_rate: Decimal) -> Invoice {
        let (invoice, _) = Invoice::create(
            test_invoice_id(),
            ProjectId::new(),
            tax_rate,
            None,
            UserId::new(),
            test_time(),
        )
        .unwrap();
        invoice
    }

    fn issued_invoice_with_line(product_id: ProductId, quantity: Decimal) -> (Invoice, InvoiceLineId) {
        let mut invoice = draft_invoice(dec!(0));
        let line_id = test_line_id();
        invoice
            .add_line(
                line_id,
                NewLine::for_product(product_id, quantity, dec!(75.00)),
                test_time(),
            )
            .unwrap();
        invoice.issue(test_time()).unwrap();
        (invoice, line_id)
    }

    #[test]
    fn create_starts_in_draft_with_zero_totals() {
        let invoice = draft_invoice(dec!(19));
        assert_eq!(invoice.status(), InvoiceStatus::Draft);
        assert!(!invoice.stock_is_affected());
        assert!(invoice.is_editable());
        assert_eq!(invoice.total(), Decimal::ZERO);
    }

    #[test]
    fn create_rejects_out_of_range_tax_rate() {
        let err = Invoice::create(
            test_invoice_id(),
            ProjectId::new(),
            dec!(100.5),
            None,
            UserId::new(),
            test_time(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn add_line_on_draft_has_no_stock_effect_and_updates_totals() {
        let mut invoice = draft_invoice(dec!(19));
        let mutation = invoice
            .add_line(
                test_line_id(),
                NewLine::for_product(test_product_id(), dec!(10), dec!(100.00))
                    .with_discount(dec!(50.00)),
                test_time(),
            )
            .unwrap();

        assert!(mutation.adjustment.is_none());
        assert_eq!(invoice.subtotal(), dec!(950.00));
        assert_eq!(invoice.tax_amount(), dec!(180.50));
        assert_eq!(invoice.total(), dec!(1130.50));
    }

    #[test]
    fn totals_follow_every_line_mutation() {
        let mut invoice = draft_invoice(dec!(19));
        let line_id = test_line_id();
        invoice
            .add_line(
                line_id,
                NewLine::for_product(test_product_id(), dec!(100), dec!(150.00))
                    .with_discount(dec!(50.00)),
                test_time(),
            )
            .unwrap();

        assert_eq!(invoice.subtotal(), dec!(14950.00));
        assert_eq!(invoice.tax_amount(), dec!(2840.50));
        assert_eq!(invoice.total(), dec!(17790.50));

        invoice.remove_line(line_id, test_time()).unwrap();
        assert_eq!(invoice.total(), Decimal::ZERO);
    }

    #[test]
    fn line_rejects_discount_exceeding_gross() {
        let mut invoice = draft_invoice(dec!(0));
        let err = invoice
            .add_line(
                test_line_id(),
                NewLine::for_product(test_product_id(), dec!(2), dec!(10.00))
                    .with_discount(dec!(20.01)),
                test_time(),
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn product_line_rejects_fractional_quantity() {
        let mut invoice = draft_invoice(dec!(0));
        let err = invoice
            .add_line(
                test_line_id(),
                NewLine::for_product(test_product_id(), dec!(2.5), dec!(10.00)),
                test_time(),
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn service_line_allows_fractional_quantity_and_has_no_stock_units() {
        let mut invoice = draft_invoice(dec!(0));
        let mutation = invoice
            .add_line(
                test_line_id(),
                NewLine::for_service("main d'oeuvre", dec!(2.5), dec!(1000.00)),
                test_time(),
            )
            .unwrap();
        assert_eq!(mutation.line.stock_units(), None);
        assert_eq!(invoice.total(), dec!(2500.00));
    }

    #[test]
    fn line_requires_product_or_description() {
        let mut invoice = draft_invoice(dec!(0));
        let err = invoice
            .add_line(
                test_line_id(),
                NewLine {
                    product: None,
                    description: "  ".to_string(),
                    quantity: dec!(1),
                    unit_price: dec!(10.00),
                    discount: Decimal::ZERO,
                },
                test_time(),
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn issue_requires_draft_lines_and_positive_total() {
        let mut empty = draft_invoice(dec!(19));
        let err = empty.issue(test_time()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStatusTransition(_)));

        let check = empty.can_be_issued();
        assert!(!check.allowed);
        assert_eq!(check.reason, "invoice has no line items");
    }

    #[test]
    fn issue_emits_one_decrease_per_product_line() {
        let mut invoice = draft_invoice(dec!(0));
        let product_a = test_product_id();
        let product_b = test_product_id();
        invoice
            .add_line(
                test_line_id(),
                NewLine::for_product(product_a, dec!(5), dec!(10.00)),
                test_time(),
            )
            .unwrap();
        invoice
            .add_line(
                test_line_id(),
                NewLine::for_product(product_b, dec!(10), dec!(20.00)),
                test_time(),
            )
            .unwrap();
        invoice
            .add_line(
                test_line_id(),
                NewLine::for_service("livraison", dec!(1), dec!(15.00)),
                test_time(),
            )
            .unwrap();

        let change = invoice.issue(test_time()).unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Issued);
        assert!(invoice.stock_is_affected());
        assert_eq!(change.adjustments.len(), 2);
        assert!(change.adjustments.iter().all(|a| matches!(
            a.direction,
            StockDirection::Decrease
        )));
        assert!(matches!(change.event, InvoiceEvent::InvoiceIssued(_)));
    }

    #[test]
    fn issue_twice_is_rejected() {
        let (mut invoice, _) = issued_invoice_with_line(test_product_id(), dec!(5));
        let err = invoice.issue(test_time()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStatusTransition(_)));
    }

    #[test]
    fn add_line_on_issued_invoice_deducts_immediately() {
        let (mut invoice, _) = issued_invoice_with_line(test_product_id(), dec!(20));
        let product = test_product_id();
        let mutation = invoice
            .add_line(
                test_line_id(),
                NewLine::for_product(product, dec!(15), dec!(75.00)),
                test_time(),
            )
            .unwrap();

        let adjustment = mutation.adjustment.expect("issued invoice must adjust stock");
        assert_eq!(adjustment.product_id, product);
        assert_eq!(adjustment.direction, StockDirection::Decrease);
        assert_eq!(adjustment.magnitude, 15);
    }

    #[test]
    fn update_line_applies_only_the_delta() {
        let product = test_product_id();
        let (mut invoice, line_id) = issued_invoice_with_line(product, dec!(20));

        // 20 -> 35: deduct 15 more.
        let mutation = invoice
            .update_line(line_id, LinePatch::quantity(dec!(35)), test_time())
            .unwrap();
        let adjustment = mutation.adjustment.unwrap();
        assert_eq!(adjustment.direction, StockDirection::Decrease);
        assert_eq!(adjustment.magnitude, 15);

        // 35 -> 30: restore 5.
        let mutation = invoice
            .update_line(line_id, LinePatch::quantity(dec!(30)), test_time())
            .unwrap();
        let adjustment = mutation.adjustment.unwrap();
        assert_eq!(adjustment.direction, StockDirection::Increase);
        assert_eq!(adjustment.magnitude, 5);

        // Price-only change: no stock movement.
        let mutation = invoice
            .update_line(
                line_id,
                LinePatch {
                    unit_price: Some(dec!(80.00)),
                    ..LinePatch::default()
                },
                test_time(),
            )
            .unwrap();
        assert!(mutation.adjustment.is_none());
    }

    #[test]
    fn update_line_on_draft_never_touches_stock() {
        let mut invoice = draft_invoice(dec!(0));
        let line_id = test_line_id();
        invoice
            .add_line(
                line_id,
                NewLine::for_product(test_product_id(), dec!(5), dec!(10.00)),
                test_time(),
            )
            .unwrap();

        let mutation = invoice
            .update_line(line_id, LinePatch::quantity(dec!(50)), test_time())
            .unwrap();
        assert!(mutation.adjustment.is_none());
    }

    #[test]
    fn remove_line_on_issued_invoice_restores_stock() {
        let product = test_product_id();
        let (mut invoice, line_id) = issued_invoice_with_line(product, dec!(40));

        let mutation = invoice.remove_line(line_id, test_time()).unwrap();
        let adjustment = mutation.adjustment.unwrap();
        assert_eq!(adjustment.direction, StockDirection::Increase);
        assert_eq!(adjustment.magnitude, 40);
        assert!(invoice.lines().is_empty());
    }

    #[test]
    fn paid_invoice_rejects_every_line_mutation() {
        let (mut invoice, line_id) = issued_invoice_with_line(test_product_id(), dec!(5));
        invoice.mark_paid(test_time()).unwrap();
        assert!(!invoice.is_editable());

        let err = invoice
            .add_line(
                test_line_id(),
                NewLine::for_product(test_product_id(), dec!(1), dec!(1.00)),
                test_time(),
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::EditNotAllowed(_)));

        let err = invoice
            .update_line(line_id, LinePatch::quantity(dec!(1)), test_time())
            .unwrap_err();
        assert!(matches!(err, DomainError::EditNotAllowed(_)));

        let err = invoice.remove_line(line_id, test_time()).unwrap_err();
        assert!(matches!(err, DomainError::EditNotAllowed(_)));
    }

    #[test]
    fn mark_paid_requires_issued() {
        let mut invoice = draft_invoice(dec!(0));
        let err = invoice.mark_paid(test_time()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStatusTransition(_)));
    }

    #[test]
    fn revert_to_draft_restores_every_product_line() {
        let product = test_product_id();
        let (mut invoice, _) = issued_invoice_with_line(product, dec!(20));

        let change = invoice.revert_to_draft(test_time()).unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Draft);
        assert_eq!(change.adjustments.len(), 1);
        assert_eq!(change.adjustments[0].direction, StockDirection::Increase);
        assert_eq!(change.adjustments[0].magnitude, 20);
    }

    #[test]
    fn revert_requires_issued() {
        let mut invoice = draft_invoice(dec!(0));
        let err = invoice.revert_to_draft(test_time()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStatusTransition(_)));
    }

    #[test]
    fn delete_restores_stock_only_when_issued() {
        let mut draft = draft_invoice(dec!(0));
        draft
            .add_line(
                test_line_id(),
                NewLine::for_product(test_product_id(), dec!(5), dec!(10.00)),
                test_time(),
            )
            .unwrap();
        let change = draft.prepare_delete(test_time()).unwrap();
        assert!(change.adjustments.is_empty());

        let (issued, _) = issued_invoice_with_line(test_product_id(), dec!(25));
        let change = issued.prepare_delete(test_time()).unwrap();
        assert_eq!(change.adjustments.len(), 1);
        assert_eq!(change.adjustments[0].magnitude, 25);
    }

    #[test]
    fn paid_invoice_cannot_be_deleted() {
        let (mut invoice, _) = issued_invoice_with_line(test_product_id(), dec!(5));
        invoice.mark_paid(test_time()).unwrap();
        let err = invoice.prepare_delete(test_time()).unwrap_err();
        assert!(matches!(err, DomainError::EditNotAllowed(_)));
    }

    #[test]
    fn deposit_and_amount_due() {
        let mut invoice = draft_invoice(dec!(0));
        invoice
            .add_line(
                test_line_id(),
                NewLine::for_product(test_product_id(), dec!(10), dec!(100.00)),
                test_time(),
            )
            .unwrap();
        invoice.set_deposit(dec!(250.00), test_time()).unwrap();

        assert_eq!(invoice.total_after_deposit(), dec!(750.00));
        assert_eq!(invoice.amount_due(), dec!(750.00));

        invoice.issue(test_time()).unwrap();
        invoice.mark_paid(test_time()).unwrap();
        assert_eq!(invoice.amount_due(), Decimal::ZERO);

        let err = invoice.set_deposit(dec!(0), test_time()).unwrap_err();
        assert!(matches!(err, DomainError::EditNotAllowed(_)));
    }

    #[test]
    fn overdue_probes() {
        let due = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let (mut invoice, _) = {
            let (invoice, _) = Invoice::create(
                test_invoice_id(),
                ProjectId::new(),
                dec!(0),
                Some(due),
                UserId::new(),
                test_time(),
            )
            .unwrap();
            (invoice, ())
        };
        invoice
            .add_line(
                test_line_id(),
                NewLine::for_product(test_product_id(), dec!(1), dec!(10.00)),
                test_time(),
            )
            .unwrap();

        let before = NaiveDate::from_ymd_opt(2026, 2, 20).unwrap();
        let after = NaiveDate::from_ymd_opt(2026, 3, 11).unwrap();
        assert!(!invoice.is_overdue(before));
        assert!(invoice.is_overdue(after));
        assert_eq!(invoice.days_overdue(after), 10);

        invoice.issue(test_time()).unwrap();
        invoice.mark_paid(test_time()).unwrap();
        assert!(!invoice.is_overdue(after));
        assert_eq!(invoice.days_overdue(after), 0);
    }

    #[test]
    fn required_stock_aggregates_lines_per_product() {
        let mut invoice = draft_invoice(dec!(0));
        let product = test_product_id();
        invoice
            .add_line(
                test_line_id(),
                NewLine::for_product(product, dec!(5), dec!(10.00)),
                test_time(),
            )
            .unwrap();
        invoice
            .add_line(
                test_line_id(),
                NewLine::for_product(product, dec!(7), dec!(10.00)),
                test_time(),
            )
            .unwrap();

        let required = invoice.required_stock();
        assert_eq!(required.get(&product), Some(&12));
        assert_eq!(invoice.referenced_products(), vec![product]);
    }
}
