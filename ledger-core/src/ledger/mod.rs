//! Stateful double-entry ledger
//!
//! [`Ledger`] is the central state manager and the only type that mutates
//! ledger state. It implements [`LedgerView`] for safe read-only access by
//! pure functions, executes transactions atomically, and tracks logical
//! time.
//!
//! Design principles:
//! - Always validates: every transaction is checked against balance
//!   constraints, transfer rules and timestamp requirements.
//! - Always logs: every applied transaction lands in the audit trail,
//!   enabling `clone_at` and `replay` for historical reconstruction.
//!
//! Not thread-safe by design: one ledger instance per thread. Parallel
//! Monte Carlo clones the ledger and drives the clones independently.

mod execute;
mod unwind;

pub use execute::ExecuteResult;

use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult, RejectReason};
use crate::types::{
    IntentId, Move, OriginKind, PendingTransaction, StateValue, Transaction, TransactionOrigin,
    Unit, UnitState, UnitSymbol, WalletId,
};
use crate::view::LedgerView;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Advisory emitted when a state change's declared old state disagrees
/// with the unit state found at apply time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaleStateAdvisory {
    pub unit_symbol: UnitSymbol,
    pub key: String,
    pub expected: Option<StateValue>,
    pub actual: Option<StateValue>,
    pub intent_id: IntentId,
}

/// One conservation violation found by [`Ledger::verify_double_entry`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConservationDiscrepancy {
    pub unit_symbol: UnitSymbol,
    pub expected: Decimal,
    pub actual: Decimal,
}

/// Conservation self-check report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConservationReport {
    pub valid: bool,
    pub supplies: BTreeMap<UnitSymbol, Decimal>,
    pub discrepancies: Vec<ConservationDiscrepancy>,
}

/// Double-entry accounting ledger with full validation and audit trail.
#[derive(Clone, Debug)]
pub struct Ledger {
    config: LedgerConfig,
    /// Balances per registered wallet; map keys double as the wallet registry
    balances: BTreeMap<WalletId, BTreeMap<UnitSymbol, Decimal>>,
    units: BTreeMap<UnitSymbol, Unit>,
    log: Vec<Transaction>,
    /// Idempotency index: content hash to the execution that claimed it
    seen_intents: BTreeMap<IntentId, crate::types::ExecId>,
    /// Inverted index unit -> {wallet -> quantity} over non-zero holders
    positions: BTreeMap<UnitSymbol, BTreeMap<WalletId, Decimal>>,
    current_time: DateTime<Utc>,
    next_sequence: u64,
    stale_advisories: Vec<StaleStateAdvisory>,
}

impl Ledger {
    /// Create a ledger with default configuration and the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(LedgerConfig::new(name))
    }

    /// Create a ledger from an explicit configuration.
    pub fn with_config(config: LedgerConfig) -> Self {
        let mut balances = BTreeMap::new();
        // The system wallet exists from birth; issuance needs no setup.
        balances.insert(WalletId::system(), BTreeMap::new());
        let current_time = config.initial_time;
        Self {
            config,
            balances,
            units: BTreeMap::new(),
            log: Vec::new(),
            seen_intents: BTreeMap::new(),
            positions: BTreeMap::new(),
            current_time,
            next_sequence: 0,
            stale_advisories: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // ========================================================
    // Time management
    // ========================================================

    /// Advance the logical clock. Time never moves backwards.
    pub fn advance_time(&mut self, target: DateTime<Utc>) -> LedgerResult<()> {
        if target < self.current_time {
            return Err(LedgerError::TimeBackwards {
                target,
                current: self.current_time,
            });
        }
        self.current_time = target;
        Ok(())
    }

    // ========================================================
    // Registration
    // ========================================================

    /// Register a wallet. The system wallet is pre-registered.
    pub fn register_wallet(&mut self, wallet: impl Into<WalletId>) -> LedgerResult<WalletId> {
        let wallet = wallet.into();
        if self.balances.contains_key(&wallet) {
            return Err(LedgerError::WalletAlreadyRegistered {
                wallet: wallet.to_string(),
            });
        }
        info!(wallet = %wallet, "wallet registered");
        self.balances.insert(wallet.clone(), BTreeMap::new());
        Ok(wallet)
    }

    /// Register a unit through the normal execution path: this issues a
    /// units-only transaction so that registration lands in the log.
    pub fn register_unit(&mut self, unit: Unit) -> LedgerResult<()> {
        unit.validate()?;
        if self.units.contains_key(&unit.symbol) {
            return Err(LedgerError::UnitAlreadyRegistered {
                symbol: unit.symbol.to_string(),
            });
        }
        let origin = TransactionOrigin::new(OriginKind::System, "register_unit")
            .with_unit(unit.symbol.clone());
        let pending = PendingTransaction::with_hash_bits(
            Vec::new(),
            Vec::new(),
            vec![unit],
            origin,
            self.current_time,
            self.config.hash_bits,
        );
        match self.execute(pending) {
            ExecuteResult::Applied(_) | ExecuteResult::AlreadyApplied { .. } => Ok(()),
            ExecuteResult::Rejected(reason) => Err(LedgerError::Rejected(reason)),
            ExecuteResult::NoOp => Ok(()),
        }
    }

    /// Set a wallet balance directly, for test fixtures only.
    ///
    /// Issues a synthetic system-wallet move through the normal execute
    /// path; validation and logging are never bypassed.
    pub fn set_balance(
        &mut self,
        wallet: &WalletId,
        unit: &UnitSymbol,
        target: Decimal,
    ) -> LedgerResult<()> {
        if !self.config.test_mode {
            return Err(LedgerError::TestModeRequired);
        }
        if wallet.is_system() {
            return Err(LedgerError::InvalidMove {
                reason: "cannot set the system wallet balance directly".to_string(),
            });
        }
        if !self.balances.contains_key(wallet) {
            return Err(LedgerError::Rejected(RejectReason::UnknownWallet {
                wallet: wallet.to_string(),
            }));
        }
        if !self.units.contains_key(unit) {
            return Err(LedgerError::Rejected(RejectReason::UnknownUnit {
                symbol: unit.to_string(),
            }));
        }
        let delta = target - self.get_balance(wallet, unit);
        if delta.is_zero() {
            return Ok(());
        }
        let mv = Move::new(
            delta,
            unit.clone(),
            WalletId::system(),
            wallet.clone(),
            "test_fixture",
        )?;
        let origin =
            TransactionOrigin::new(OriginKind::System, "set_balance").with_unit(unit.clone());
        let pending = PendingTransaction::with_hash_bits(
            vec![mv],
            Vec::new(),
            Vec::new(),
            origin,
            self.current_time,
            self.config.hash_bits,
        );
        match self.execute(pending) {
            ExecuteResult::Applied(_) | ExecuteResult::AlreadyApplied { .. } => Ok(()),
            ExecuteResult::Rejected(reason) => Err(LedgerError::Rejected(reason)),
            ExecuteResult::NoOp => Ok(()),
        }
    }

    // ========================================================
    // Reads beyond the LedgerView contract
    // ========================================================

    /// All registered unit symbols, ascending.
    pub fn list_units(&self) -> Vec<UnitSymbol> {
        self.units.keys().cloned().collect()
    }

    /// Symbols of all units carrying the given type tag, ascending.
    pub fn units_of_type(&self, unit_type: &str) -> Vec<UnitSymbol> {
        self.units
            .values()
            .filter(|u| u.unit_type == unit_type)
            .map(|u| u.symbol.clone())
            .collect()
    }

    /// All balances held by a wallet.
    pub fn get_wallet_balances(&self, wallet: &WalletId) -> BTreeMap<UnitSymbol, Decimal> {
        self.balances.get(wallet).cloned().unwrap_or_default()
    }

    pub fn is_registered(&self, wallet: &WalletId) -> bool {
        self.balances.contains_key(wallet)
    }

    /// Total supply of a unit across all wallets. Exactly zero for every
    /// unit by the conservation invariant; callers use this as a self-check.
    pub fn total_supply(&self, unit: &UnitSymbol) -> Decimal {
        self.balances
            .values()
            .filter_map(|per_wallet| per_wallet.get(unit))
            .copied()
            .sum()
    }

    /// Verify conservation for all units, optionally against expected
    /// supplies. Comparisons are exact; amounts are exact decimals.
    pub fn verify_double_entry(
        &self,
        expected_supplies: Option<&BTreeMap<UnitSymbol, Decimal>>,
    ) -> ConservationReport {
        let mut supplies = BTreeMap::new();
        let mut discrepancies = Vec::new();

        for symbol in self.units.keys() {
            let actual = self.total_supply(symbol);
            let expected = expected_supplies
                .and_then(|e| e.get(symbol))
                .copied()
                .unwrap_or(Decimal::ZERO);
            if actual != expected {
                discrepancies.push(ConservationDiscrepancy {
                    unit_symbol: symbol.clone(),
                    expected,
                    actual,
                });
            }
            supplies.insert(symbol.clone(), actual);
        }

        if let Some(expected) = expected_supplies {
            for (symbol, value) in expected {
                if !supplies.contains_key(symbol) {
                    discrepancies.push(ConservationDiscrepancy {
                        unit_symbol: symbol.clone(),
                        expected: *value,
                        actual: Decimal::ZERO,
                    });
                }
            }
        }

        ConservationReport {
            valid: discrepancies.is_empty(),
            supplies,
            discrepancies,
        }
    }

    /// Transactions in execution order.
    pub fn log_iter(&self) -> impl Iterator<Item = &Transaction> {
        self.log.iter()
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    pub fn last_transaction(&self) -> Option<&Transaction> {
        self.log.last()
    }

    /// The sequence number the next successful execute will claim.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Drain recorded stale-state advisories.
    pub fn take_stale_advisories(&mut self) -> Vec<StaleStateAdvisory> {
        std::mem::take(&mut self.stale_advisories)
    }

    // ========================================================
    // Internal helpers shared by execute and unwind
    // ========================================================

    /// Net balance deltas per (wallet, unit), with the accumulated net
    /// rounded once per unit precision cap. Rounding is never applied to
    /// individual moves; callers supply already-rounded quantities.
    pub(crate) fn compute_net(
        &self,
        moves: &[Move],
    ) -> BTreeMap<(WalletId, UnitSymbol), Decimal> {
        let mut net: BTreeMap<(WalletId, UnitSymbol), Decimal> = BTreeMap::new();
        for mv in moves {
            *net.entry((mv.source.clone(), mv.unit_symbol.clone()))
                .or_insert(Decimal::ZERO) -= mv.quantity;
            *net.entry((mv.dest.clone(), mv.unit_symbol.clone()))
                .or_insert(Decimal::ZERO) += mv.quantity;
        }
        for ((_, unit), delta) in net.iter_mut() {
            if let Some(u) = self.units.get(unit) {
                *delta = u.round_balance(*delta);
            }
        }
        net
    }

    /// Write a balance and keep the positions index in sync: holders enter
    /// the index on transition from zero and leave it on transition to zero.
    pub(crate) fn write_balance(
        &mut self,
        wallet: &WalletId,
        unit: &UnitSymbol,
        value: Decimal,
    ) {
        self.balances
            .entry(wallet.clone())
            .or_default()
            .insert(unit.clone(), value);

        if value.is_zero() {
            if let Some(holders) = self.positions.get_mut(unit) {
                holders.remove(wallet);
                if holders.is_empty() {
                    self.positions.remove(unit);
                }
            }
        } else {
            self.positions
                .entry(unit.clone())
                .or_default()
                .insert(wallet.clone(), value);
        }
    }

    pub(crate) fn record_stale_advisory(&mut self, advisory: StaleStateAdvisory) {
        debug!(
            unit = %advisory.unit_symbol,
            key = %advisory.key,
            "stale state advisory recorded"
        );
        self.stale_advisories.push(advisory);
    }
}

impl LedgerView for Ledger {
    fn current_time(&self) -> DateTime<Utc> {
        self.current_time
    }

    fn get_balance(&self, wallet: &WalletId, unit: &UnitSymbol) -> Decimal {
        self.balances
            .get(wallet)
            .and_then(|per_wallet| per_wallet.get(unit))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    fn get_unit_state(&self, unit: &UnitSymbol) -> UnitState {
        self.units
            .get(unit)
            .map(|u| u.state.clone())
            .unwrap_or_default()
    }

    fn get_unit(&self, unit: &UnitSymbol) -> Option<Unit> {
        self.units.get(unit).cloned()
    }

    fn get_positions(&self, unit: &UnitSymbol) -> BTreeMap<WalletId, Decimal> {
        self.positions.get(unit).cloned().unwrap_or_default()
    }

    fn list_wallets(&self) -> BTreeSet<WalletId> {
        self.balances.keys().cloned().collect()
    }
}
