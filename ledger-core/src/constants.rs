//! Ledger-wide constants and default bounds.

use rust_decimal::Decimal;

/// Reserved wallet for issuance, redemption and obligation lifecycle.
/// Exempt from balance-range validation; may hold any balance.
pub const SYSTEM_WALLET: &str = "system";

/// Unit type tag for cash currencies.
pub const UNIT_TYPE_CASH: &str = "CASH";
/// Unit type tag for equities.
pub const UNIT_TYPE_STOCK: &str = "STOCK";
/// Unit type tag for bilateral contracts (options, forwards, swaps).
pub const UNIT_TYPE_BILATERAL: &str = "BILATERAL";

/// Default decimal precision for cash amounts.
pub const CASH_DECIMAL_PLACES: u32 = 2;
/// Default decimal precision for stock quantities.
pub const STOCK_DECIMAL_PLACES: u32 = 6;

/// Default cascade pass budget for the lifecycle engine.
pub const DEFAULT_MAX_CASCADE_PASSES: u32 = 10;

/// Default minimum balance for cash units (allows large overdrafts).
pub fn default_cash_min_balance() -> Decimal {
    Decimal::from(-1_000_000_000_i64)
}

/// Default minimum balance for stock units when short selling is enabled.
pub fn default_stock_min_balance() -> Decimal {
    Decimal::from(-10_000_000_i64)
}
