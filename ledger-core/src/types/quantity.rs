//! Exact decimal quantities
//!
//! All amounts in the ledger are `rust_decimal::Decimal`: exact 96-bit
//! fixed-point values with no NaN or infinity representation, so
//! non-finite quantities are rejected at parse time by construction.
//! Banker's rounding (`MidpointNearestEven`) is the single rounding mode
//! used anywhere in the core; nothing reconfigures it at runtime.

use crate::error::{LedgerError, LedgerResult};
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Parse a decimal string into an exact quantity.
///
/// Accepts plain decimal notation (`-12.50`, `1000`, `0.000001`).
/// Exponent notation, NaN and infinities are rejected with
/// [`LedgerError::InvalidQuantity`].
pub fn parse_quantity(s: &str) -> LedgerResult<Decimal> {
    Decimal::from_str(s.trim()).map_err(|e| LedgerError::InvalidQuantity {
        reason: format!("{s:?}: {e}"),
    })
}

/// Canonical string form of a quantity.
///
/// One value, one string: trailing zeros are stripped, the decimal point
/// is suppressed for integral values, negatives carry a single leading
/// `-`, zero is always `0`, and exponent notation is never produced.
/// Stable across processes and architectures.
pub fn canonical_string(value: &Decimal) -> String {
    if value.is_zero() {
        return "0".to_string();
    }
    value.normalize().to_string()
}

/// Round to `places` decimal places using banker's rounding.
pub fn round_places(value: Decimal, places: u32) -> Decimal {
    value.round_dp_with_strategy(places, RoundingStrategy::MidpointNearestEven)
}
