//! Deterministic double-entry ledger core
//!
//! An in-memory accounting kernel that serves simultaneously as a system
//! of record and as a substrate for Monte Carlo simulation. Everything is
//! deterministic: exact decimal arithmetic, content-addressed transaction
//! identity, totally ordered event processing and an invertible audit
//! trail.
//!
//! # Components
//!
//! | Component | Module | Responsibility |
//! |-----------|--------|----------------|
//! | Quantities | [`types::quantity`] | Exact decimals with one canonical string per value |
//! | Canonicalizer | [`canon`] | Deterministic bytes for state values; drives `intent_id` |
//! | Core types | [`types`] | Immutable value types with construction-time invariants |
//! | LedgerView | [`view`] | Read-only interface surfaced to pure code |
//! | Execution core | [`ledger`] | The sole mutation point: validate + apply, atomically |
//! | Unwind | [`ledger`] | Historical reconstruction by reverse log traversal |
//! | Event scheduler | [`scheduler`] | Ordered queue keyed on (time, priority, symbol, id) |
//! | Lifecycle engine | [`lifecycle`] | Scheduled events + contract polling with cascade |
//!
//! # Invariants
//!
//! For every unit and every state reachable from the empty ledger by
//! successful executes:
//!
//! - **Conservation**: balances across all wallets sum to exactly zero
//! - **Range**: every non-system wallet stays inside the unit's bounds
//! - **Log completeness**: replaying the log reproduces the state
//! - **Idempotent history**: an `intent_id` appears at most once in the log
//! - **Canonical identity**: equal content implies equal `intent_id`
//! - **Monotone sequence**: sequence numbers and execution times ascend
//!
//! # Concurrency model
//!
//! Single-writer, single-threaded per ledger instance; no operation
//! blocks or touches a clock, the environment or a random number
//! generator. Parallel simulation clones the ledger and drives the
//! clones on independent threads.
//!
//! # Example
//!
//! ```
//! use ledger_core::{cash, Ledger, Move, OriginKind, PendingTransaction, TransactionOrigin};
//! use ledger_core::{LedgerView, WalletId, UnitSymbol};
//! use rust_decimal::Decimal;
//!
//! let mut ledger = Ledger::new("example");
//! ledger.register_wallet("alice").unwrap();
//! ledger.register_unit(cash("USD", "US Dollar").unwrap()).unwrap();
//!
//! let issue = Move::new(
//!     Decimal::from(1000),
//!     "USD",
//!     WalletId::system(),
//!     "alice",
//!     "issuance",
//! ).unwrap();
//! let origin = TransactionOrigin::new(OriginKind::System, "setup");
//! let pending = PendingTransaction::new(
//!     vec![issue], vec![], vec![], origin, ledger.current_time(),
//! );
//! assert!(ledger.execute(pending).is_applied());
//! assert_eq!(
//!     ledger.get_balance(&WalletId::new("alice"), &UnitSymbol::new("USD")),
//!     Decimal::from(1000),
//! );
//! assert!(ledger.total_supply(&UnitSymbol::new("USD")).is_zero());
//! ```

pub mod canon;
pub mod config;
pub mod constants;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod scheduler;
pub mod types;
pub mod view;

// Re-export the working surface
pub use canon::HashBits;
pub use config::{LedgerConfig, StaleStatePolicy};
pub use constants::SYSTEM_WALLET;
pub use error::{LedgerError, LedgerResult, RejectReason};
pub use ledger::{
    ConservationDiscrepancy, ConservationReport, ExecuteResult, Ledger, StaleStateAdvisory,
};
pub use lifecycle::{LifecycleEngine, SmartContract};
pub use scheduler::{Event, EventHandler, EventOutcome, EventScheduler};
pub use types::{
    bilateral, cash, equity, state_from_pairs, BilateralRule, EventId, ExecId, IntentId, Move,
    OriginKind, PendingTransaction, Prices, StateValue, Transaction, TransactionOrigin,
    TransferRule, TransferViolation, Unit, UnitState, UnitStateChange, UnitSymbol, WalletId,
};
pub use view::LedgerView;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Canonicalization scheme version embedded in identifier domain tags.
pub const CANON_VERSION: &str = "v1";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
        assert_eq!(CANON_VERSION, "v1");
    }
}
