//! Invoice totals: pure computation, fixed rounding rules.
//!
//! `subtotal` is the decimal-exact sum of line totals (each already rounded
//! to 2dp at the line); `tax_amount` and `total` are each rounded **once**,
//! half-up. Derived totals are stored on the invoice for query convenience
//! but only ever written by this computation, never accepted as input.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use chantier_core::money::round_money;
use chantier_core::ValueObject;

use crate::invoice::InvoiceLine;

/// Derived monetary totals of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

impl Totals {
    pub fn zero() -> Self {
        Self {
            subtotal: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            total: Decimal::ZERO,
        }
    }
}

impl ValueObject for Totals {}

/// Compute subtotal, tax amount and grand total for a line set.
///
/// `tax_rate` is a percentage (0–100), validated at invoice creation.
pub fn calculate(lines: &[InvoiceLine], tax_rate: Decimal) -> Totals {
    let subtotal: Decimal = lines.iter().map(|line| line.line_total()).sum();
    let tax_amount = round_money(subtotal * tax_rate / Decimal::from(100));
    let total = round_money(subtotal + tax_amount);

    Totals {
        subtotal,
        tax_amount,
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::{InvoiceLineId, NewLine};
    use chantier_core::AggregateId;
    use chantier_stock::ProductId;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn product_line(quantity: Decimal, unit_price: Decimal, discount: Decimal) -> InvoiceLine {
        InvoiceLine::build(
            InvoiceLineId::new(AggregateId::new()),
            NewLine {
                product: Some(ProductId::new(AggregateId::new())),
                description: String::new(),
                quantity,
                unit_price,
                discount,
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn empty_line_set_is_all_zero() {
        let totals = calculate(&[], dec!(19));
        assert_eq!(totals, Totals::zero());
    }

    #[test]
    fn computes_subtotal_tax_and_total() {
        // 100 x 150.00 - 50.00 discount, 19% tax.
        let lines = vec![product_line(dec!(100), dec!(150.00), dec!(50.00))];
        let totals = calculate(&lines, dec!(19));

        assert_eq!(totals.subtotal, dec!(14950.00));
        assert_eq!(totals.tax_amount, dec!(2840.50));
        assert_eq!(totals.total, dec!(17790.50));
    }

    #[test]
    fn tax_rounds_half_up() {
        // 950.00 * 19% = 180.50 exactly; 955.50 * 19% = 181.545 -> 181.55 (half-up).
        let lines = vec![product_line(dec!(10), dec!(95.55), dec!(0))];
        let totals = calculate(&lines, dec!(19));

        assert_eq!(totals.subtotal, dec!(955.50));
        assert_eq!(totals.tax_amount, dec!(181.55));
        assert_eq!(totals.total, dec!(1137.05));
    }

    #[test]
    fn zero_tax_rate_keeps_total_equal_to_subtotal() {
        let lines = vec![
            product_line(dec!(2), dec!(10.00), dec!(0)),
            product_line(dec!(3), dec!(5.00), dec!(2.50)),
        ];
        let totals = calculate(&lines, dec!(0));

        assert_eq!(totals.subtotal, dec!(32.50));
        assert_eq!(totals.tax_amount, dec!(0.00));
        assert_eq!(totals.total, dec!(32.50));
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use chantier_core::money::round_money;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 1000,
                ..ProptestConfig::default()
            })]

            /// Property: total == round2(subtotal + tax_amount) and subtotal
            /// is exactly the sum of line totals.
            #[test]
            fn total_is_derived_exactly(
                quantities in prop::collection::vec(1u64..500, 1..8),
                price_cents in prop::collection::vec(0u64..100_000, 8),
                tax_whole in 0u64..=100,
            ) {
                let lines: Vec<InvoiceLine> = quantities
                    .iter()
                    .zip(price_cents.iter())
                    .map(|(&q, &cents)| {
                        product_line(
                            Decimal::from(q),
                            Decimal::new(cents as i64, 2),
                            Decimal::ZERO,
                        )
                    })
                    .collect();

                let tax_rate = Decimal::from(tax_whole);
                let totals = calculate(&lines, tax_rate);

                let expected_subtotal: Decimal =
                    lines.iter().map(|l| l.line_total()).sum();
                prop_assert_eq!(totals.subtotal, expected_subtotal);
                prop_assert_eq!(
                    totals.total,
                    round_money(totals.subtotal + totals.tax_amount)
                );
            }
        }
    }
}
