//! Ledger Error Registry
//!
//! Error code format: LGR-{module}-{sequence}
//! - LGR-QTY: Quantity and decimal parsing errors
//! - LGR-MOVE / LGR-UNIT: Value-type construction errors
//! - LGR-REG: Registration errors
//! - LGR-TIME: Logical clock errors
//! - LGR-EXEC: Transaction validation outcomes (see [`RejectReason`])
//! - LGR-LIFE: Lifecycle engine errors
//! - LGR-REPLAY: Log replay errors
//!
//! Validation failures are values, not errors: `execute` returns a
//! discriminated [`crate::ledger::ExecuteResult`] carrying a [`RejectReason`].
//! [`LedgerError`] is reserved for hard failures that must propagate.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// Result type alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Hard errors surfaced by the ledger core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// [LGR-QTY-001] Quantity could not be parsed as an exact decimal
    #[error("[LGR-QTY-001] invalid quantity: {reason}")]
    InvalidQuantity { reason: String },

    /// [LGR-MOVE-001] Move construction invariant violated
    #[error("[LGR-MOVE-001] invalid move: {reason}")]
    InvalidMove { reason: String },

    /// [LGR-UNIT-001] Unit definition invariant violated
    #[error("[LGR-UNIT-001] invalid unit definition: {reason}")]
    InvalidUnit { reason: String },

    /// [LGR-REG-001] Wallet already registered
    #[error("[LGR-REG-001] wallet {wallet} already registered")]
    WalletAlreadyRegistered { wallet: String },

    /// [LGR-REG-002] Unit already registered
    #[error("[LGR-REG-002] unit {symbol} already registered")]
    UnitAlreadyRegistered { symbol: String },

    /// [LGR-TIME-001] Logical time can only move forward
    #[error("[LGR-TIME-001] cannot move time backwards: {target} < {current}")]
    TimeBackwards {
        target: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    /// [LGR-TIME-002] Historical reconstruction target is in the future
    #[error("[LGR-TIME-002] target time {target} is ahead of ledger time {current}")]
    FutureTarget {
        target: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    /// [LGR-LIFE-001] No handler registered for a scheduled action
    #[error("[LGR-LIFE-001] no handler registered for action {action}")]
    UnknownAction { action: String },

    /// [LGR-LIFE-002] Cascade did not reach a fixed point within the pass budget
    #[error("[LGR-LIFE-002] cascade did not settle within {passes} passes")]
    UnboundedCascade { passes: u32 },

    /// [LGR-LIFE-003] A price required by a handler or contract is missing
    #[error("[LGR-LIFE-003] missing price for {symbol}")]
    MissingPrice { symbol: String },

    /// [LGR-LIFE-004] A state key required by a handler or contract is missing
    #[error("[LGR-LIFE-004] unit {symbol} state is missing key {key}")]
    MissingStateKey { symbol: String, key: String },

    /// [LGR-REPLAY-001] Re-executing the log did not reproduce the ledger
    #[error("[LGR-REPLAY-001] replay diverged at {exec_id}: {reason}")]
    ReplayDivergence { exec_id: String, reason: String },

    /// [LGR-TEST-001] Fixture-only operation invoked outside test mode
    #[error("[LGR-TEST-001] set_balance requires test mode")]
    TestModeRequired,

    /// [LGR-EXEC-000] A synthesized transaction was rejected by validation
    #[error("[LGR-EXEC-000] transaction rejected: {0}")]
    Rejected(#[from] RejectReason),
}

/// Stable, programmatic rejection taxonomy for `execute`.
///
/// Every variant carries enough context (symbols, wallets, values) to
/// diagnose the rejection without additional logs. Messages are stable
/// across versions; tests may assert on reason kind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// [LGR-EXEC-001] Move or state change references an unregistered unit
    #[error("[LGR-EXEC-001] unit not registered: {symbol}")]
    UnknownUnit { symbol: String },

    /// [LGR-EXEC-002] units_to_create collides with an existing, different unit
    #[error("[LGR-EXEC-002] unit {symbol} already registered with different content")]
    UnitConflict { symbol: String },

    /// [LGR-EXEC-003] Move references an unregistered wallet
    #[error("[LGR-EXEC-003] wallet not registered: {wallet}")]
    UnknownWallet { wallet: String },

    /// [LGR-EXEC-004] Proposed balance violates the unit's inclusive bounds
    #[error(
        "[LGR-EXEC-004] {wallet} {unit}: proposed balance {proposed} outside [{min}, {max}]"
    )]
    BalanceOutOfRange {
        wallet: String,
        unit: String,
        proposed: Decimal,
        min: Decimal,
        max: Decimal,
    },

    /// [LGR-EXEC-005] The unit's transfer rule vetoed a move
    #[error("[LGR-EXEC-005] transfer rule violation for {unit}: {message}")]
    TransferRule { unit: String, message: String },

    /// [LGR-EXEC-006] Declared old state disagrees with current unit state
    /// (rejection only under [`crate::config::StaleStatePolicy::Reject`])
    #[error("[LGR-EXEC-006] stale state for {unit}.{key}: expected {expected}, found {actual}")]
    StaleState {
        unit: String,
        key: String,
        expected: String,
        actual: String,
    },

    /// [LGR-EXEC-007] Proposed timestamp precedes the ledger clock
    #[error("[LGR-EXEC-007] proposed timestamp {proposed} precedes ledger time {current}")]
    InvalidTimestamp {
        proposed: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    /// [LGR-EXEC-008] A move that should have been impossible to construct
    #[error("[LGR-EXEC-008] degenerate move: {reason}")]
    DegenerateMove { reason: String },
}
