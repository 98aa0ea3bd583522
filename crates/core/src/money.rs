//! Monetary values and rounding rules.
//!
//! All money is `rust_decimal::Decimal` carried at two decimal places.
//! Derived values (line totals, tax, grand totals) are rounded **once**,
//! half-up, via [`round_money`]; intermediate sums stay decimal-exact.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{DomainError, DomainResult};

/// Decimal places for stored monetary values.
pub const MONEY_DP: u32 = 2;

/// Round a monetary value to two decimal places, half-up.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Validate that a monetary field is non-negative.
pub fn ensure_non_negative(field: &str, value: Decimal) -> DomainResult<()> {
    if value < Decimal::ZERO {
        return Err(DomainError::validation(format!(
            "{field} cannot be negative"
        )));
    }
    Ok(())
}

/// Validate a percentage field (0–100 inclusive).
pub fn ensure_percentage(field: &str, value: Decimal) -> DomainResult<()> {
    if value < Decimal::ZERO || value > Decimal::from(100) {
        return Err(DomainError::validation(format!(
            "{field} must be between 0 and 100"
        )));
    }
    Ok(())
}
