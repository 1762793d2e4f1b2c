//! Read-only ledger access
//!
//! [`LedgerView`] is the pure read contract handed to transfer rules,
//! event handlers and smart contracts. Every returned value is a snapshot:
//! it survives subsequent mutation of the ledger. A view handed to pure
//! code is valid only for the duration of that call.

use crate::types::{UnitState, UnitSymbol, WalletId};
use crate::types::Unit;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

/// Read-only interface to ledger state. No mutators.
pub trait LedgerView {
    /// Current logical time of the ledger.
    fn current_time(&self) -> DateTime<Utc>;

    /// Balance of a unit in a wallet. Missing wallet or unit reads as zero.
    fn get_balance(&self, wallet: &WalletId, unit: &UnitSymbol) -> Decimal;

    /// Fresh copy of a unit's state mapping (empty if the unit is unknown).
    fn get_unit_state(&self, unit: &UnitSymbol) -> UnitState;

    /// Declarative clone of a unit definition.
    fn get_unit(&self, unit: &UnitSymbol) -> Option<Unit>;

    /// Materialized snapshot of all non-zero positions for a unit.
    fn get_positions(&self, unit: &UnitSymbol) -> BTreeMap<WalletId, Decimal>;

    /// All registered wallets, including the system wallet.
    fn list_wallets(&self) -> BTreeSet<WalletId>;
}
