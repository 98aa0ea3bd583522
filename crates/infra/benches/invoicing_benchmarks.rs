//! Benchmarks for the invoice–stock pipeline.
//!
//! Run with: cargo bench -p chantier-infra

use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use rust_decimal_macros::dec;
use serde_json::Value as JsonValue;

use chantier_core::{AggregateId, ProjectId, UserId};
use chantier_events::{EventEnvelope, InMemoryEventBus};
use chantier_infra::{InMemoryStateStore, InvoicingService, StateStore};
use chantier_invoicing::{InvoiceLine, InvoiceLineId, NewLine};
use chantier_stock::{Product, ProductId};
use chrono::Utc;

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Store = Arc<InMemoryStateStore>;

fn seeded_service() -> (InvoicingService<Store, Bus>, UserId, ProductId) {
    let store: Store = Arc::new(InMemoryStateStore::new());
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let actor = UserId::new();

    let product_id = ProductId::new(AggregateId::new());
    let product = Product::new(
        product_id,
        "Ciment 42.5",
        Some("SKU-001".to_string()),
        None,
        u64::MAX / 2,
        10,
        dec!(50.00),
        dec!(75.00),
        Utc::now(),
    )
    .unwrap();
    store.insert_product(product).unwrap();

    (InvoicingService::new(store, bus), actor, product_id)
}

fn bench_issue_revert_cycle(c: &mut Criterion) {
    let (service, actor, product_id) = seeded_service();

    let invoice = service
        .create_invoice(actor, ProjectId::new(), dec!(19), None)
        .unwrap()
        .value;
    for _ in 0..5 {
        service
            .add_line(
                actor,
                invoice.id_typed(),
                NewLine::for_product(product_id, dec!(3), dec!(75.00)),
            )
            .unwrap();
    }

    c.bench_function("issue_revert_cycle_5_lines", |b| {
        b.iter(|| {
            service.issue(actor, invoice.id_typed()).unwrap();
            service.revert_to_draft(actor, invoice.id_typed()).unwrap();
        })
    });
}

fn bench_totals_calculation(c: &mut Criterion) {
    let lines: Vec<InvoiceLine> = (0..50)
        .map(|i| {
            InvoiceLine::build(
                InvoiceLineId::new(AggregateId::new()),
                NewLine::for_product(
                    ProductId::new(AggregateId::new()),
                    dec!(3),
                    dec!(75.00) + rust_decimal::Decimal::from(i),
                ),
                Utc::now(),
            )
            .unwrap()
        })
        .collect();

    c.bench_function("totals_50_lines", |b| {
        b.iter(|| chantier_invoicing::calculate(&lines, dec!(19)))
    });
}

criterion_group!(benches, bench_issue_revert_cycle, bench_totals_calculation);
criterion_main!(benches);
