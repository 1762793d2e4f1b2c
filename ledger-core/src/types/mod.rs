//! Core value types: identifiers, quantities, state values, units and
//! transactions. All are immutable with construction-time validation.

mod common;
pub mod quantity;
mod state;
mod transaction;
mod unit;

pub use common::{EventId, ExecId, IntentId, Prices, UnitSymbol, WalletId};
pub use state::{state_from_pairs, StateValue, UnitState};
pub use transaction::{
    Move, OriginKind, PendingTransaction, Transaction, TransactionOrigin, UnitStateChange,
};
pub use unit::{bilateral, cash, equity, BilateralRule, TransferRule, TransferViolation, Unit};
