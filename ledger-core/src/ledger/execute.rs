//! Transaction execution: the single mutation point
//!
//! `execute` validates a [`PendingTransaction`] against current state and
//! applies it atomically. All moves succeed together or none do. Execution
//! is idempotent: content already seen (by `intent_id`) is never applied
//! twice.

use super::{Ledger, StaleStateAdvisory};
use crate::config::StaleStatePolicy;
use crate::error::RejectReason;
use crate::types::{
    ExecId, PendingTransaction, Transaction, UnitState, UnitSymbol, WalletId,
};
use crate::view::LedgerView;
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// Outcome of a transaction execution attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecuteResult {
    /// Validated and applied; carries the logged record
    Applied(Transaction),
    /// Content already executed; idempotent success, not an error
    AlreadyApplied { exec_id: ExecId },
    /// Validation failed; the ledger is untouched
    Rejected(RejectReason),
    /// The pending transaction had nothing to do
    NoOp,
}

impl ExecuteResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, ExecuteResult::Applied(_))
    }

    pub fn applied(self) -> Option<Transaction> {
        match self {
            ExecuteResult::Applied(tx) => Some(tx),
            _ => None,
        }
    }

    pub fn rejection(&self) -> Option<&RejectReason> {
        match self {
            ExecuteResult::Rejected(reason) => Some(reason),
            _ => None,
        }
    }
}

/// A validated balance write, precomputed so the apply phase cannot fail.
struct NetEntry {
    wallet: WalletId,
    unit: UnitSymbol,
    new_balance: Decimal,
}

impl Ledger {
    /// Execute a pending transaction atomically.
    ///
    /// Validation performs no writes beyond tentative unit registration,
    /// which is rolled back on any rejection. Once the apply phase starts
    /// every sub-step completes; partial application is impossible by
    /// construction.
    pub fn execute(&mut self, pending: PendingTransaction) -> ExecuteResult {
        if pending.is_empty() {
            return ExecuteResult::NoOp;
        }

        if let Some(exec_id) = self.seen_intents.get(&pending.intent_id) {
            debug!(intent_id = %pending.intent_id, "duplicate intent, already applied");
            return ExecuteResult::AlreadyApplied {
                exec_id: exec_id.clone(),
            };
        }

        // Tentative unit registration, rolled back if validation rejects.
        let mut tentative: Vec<UnitSymbol> = Vec::new();
        for unit in &pending.units_to_create {
            match self.units.get(&unit.symbol) {
                None => {
                    self.units.insert(unit.symbol.clone(), unit.clone());
                    tentative.push(unit.symbol.clone());
                }
                Some(existing) if existing == unit => {}
                Some(_) => {
                    let reason = RejectReason::UnitConflict {
                        symbol: unit.symbol.to_string(),
                    };
                    self.rollback_tentative(&tentative);
                    warn!(intent_id = %pending.intent_id, reason = %reason, "transaction rejected");
                    return ExecuteResult::Rejected(reason);
                }
            }
        }

        let entries = match self.validate_pending(&pending) {
            Ok(entries) => entries,
            Err(reason) => {
                self.rollback_tentative(&tentative);
                warn!(intent_id = %pending.intent_id, reason = %reason, "transaction rejected");
                return ExecuteResult::Rejected(reason);
            }
        };

        let tx = self.apply(pending, entries, tentative);
        debug!(
            exec_id = %tx.exec_id,
            sequence = tx.sequence_number,
            moves = tx.moves.len(),
            "transaction applied"
        );
        ExecuteResult::Applied(tx)
    }

    fn rollback_tentative(&mut self, tentative: &[UnitSymbol]) {
        for symbol in tentative {
            self.units.remove(symbol);
        }
    }

    /// Validation phase. Performs no writes; returns the balance writes the
    /// apply phase will make.
    fn validate_pending(
        &self,
        pending: &PendingTransaction,
    ) -> Result<Vec<NetEntry>, RejectReason> {
        // Registration checks for every referenced unit and wallet.
        for mv in &pending.moves {
            if !self.units.contains_key(&mv.unit_symbol) {
                return Err(RejectReason::UnknownUnit {
                    symbol: mv.unit_symbol.to_string(),
                });
            }
            if !self.balances.contains_key(&mv.source) {
                return Err(RejectReason::UnknownWallet {
                    wallet: mv.source.to_string(),
                });
            }
            if !self.balances.contains_key(&mv.dest) {
                return Err(RejectReason::UnknownWallet {
                    wallet: mv.dest.to_string(),
                });
            }
            // Defensive: unreachable when Move construction is enforced.
            if mv.quantity.is_zero() || mv.source == mv.dest {
                return Err(RejectReason::DegenerateMove {
                    reason: format!("{mv}"),
                });
            }
        }
        for sc in &pending.state_changes {
            if !self.units.contains_key(&sc.unit_symbol) {
                return Err(RejectReason::UnknownUnit {
                    symbol: sc.unit_symbol.to_string(),
                });
            }
        }

        // Net deltas, rounded per unit precision on the accumulated net.
        let net = self.compute_net(&pending.moves);

        // Balance constraints; the system wallet is exempt.
        let mut entries = Vec::with_capacity(net.len());
        for ((wallet, unit), delta) in net {
            let current = self.get_balance(&wallet, &unit);
            let (new_balance, min, max) = match self.units.get(&unit) {
                Some(u) => (u.round_balance(current + delta), u.min_balance, u.max_balance),
                None => (current + delta, Decimal::MIN, None),
            };
            if !wallet.is_system() {
                let out_of_range =
                    new_balance < min || max.map(|m| new_balance > m).unwrap_or(false);
                if out_of_range {
                    return Err(RejectReason::BalanceOutOfRange {
                        wallet: wallet.to_string(),
                        unit: unit.to_string(),
                        proposed: new_balance,
                        min,
                        max: max.unwrap_or(Decimal::MAX),
                    });
                }
            }
            entries.push(NetEntry {
                wallet,
                unit,
                new_balance,
            });
        }

        // Transfer rules, in caller move order. Only the violation is
        // caught; rules cannot signal anything else by construction.
        for mv in &pending.moves {
            if let Some(unit) = self.units.get(&mv.unit_symbol) {
                if let Some(rule) = &unit.transfer_rule {
                    if let Err(violation) = rule.check(self, mv) {
                        return Err(RejectReason::TransferRule {
                            unit: mv.unit_symbol.to_string(),
                            message: violation.message,
                        });
                    }
                }
            }
        }

        // Time only flows forward.
        if pending.proposed_timestamp < self.current_time {
            return Err(RejectReason::InvalidTimestamp {
                proposed: pending.proposed_timestamp,
                current: self.current_time,
            });
        }

        // Stale-state detection; rejection only in strict mode.
        if self.config.stale_state_policy == StaleStatePolicy::Reject {
            for sc in &pending.state_changes {
                if let Some(old) = &sc.old_state {
                    let current = self.get_unit_state(&sc.unit_symbol);
                    if let Some((key, expected, actual)) =
                        first_state_mismatch(old, &current)
                    {
                        return Err(RejectReason::StaleState {
                            unit: sc.unit_symbol.to_string(),
                            key,
                            expected,
                            actual,
                        });
                    }
                }
            }
        }

        Ok(entries)
    }

    /// Apply phase. Precondition: validation succeeded; nothing here fails.
    fn apply(
        &mut self,
        pending: PendingTransaction,
        entries: Vec<NetEntry>,
        created_units: Vec<UnitSymbol>,
    ) -> Transaction {
        for entry in entries {
            self.write_balance(&entry.wallet, &entry.unit, entry.new_balance);
        }

        // State replacements in ascending unit order (sorted at build).
        for sc in &pending.state_changes {
            if let Some(old) = &sc.old_state {
                let current = self.get_unit_state(&sc.unit_symbol);
                for (key, expected, actual) in state_mismatches(old, &current) {
                    warn!(
                        unit = %sc.unit_symbol,
                        key = %key,
                        expected = %expected,
                        actual = %actual,
                        "stale state detected"
                    );
                    self.record_stale_advisory(StaleStateAdvisory {
                        unit_symbol: sc.unit_symbol.clone(),
                        key: key.clone(),
                        expected: old.get(&key).cloned(),
                        actual: current.get(&key).cloned(),
                        intent_id: pending.intent_id.clone(),
                    });
                }
            }
            if let Some(unit) = self.units.get(&sc.unit_symbol) {
                let replaced = unit.with_replaced_state(sc.new_state.clone());
                self.units.insert(sc.unit_symbol.clone(), replaced);
            }
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let execution_time = self.current_time.max(pending.proposed_timestamp);
        let exec_id = ExecId::new(format!(
            "exec:{}:{:012}:{}",
            self.config.name,
            sequence,
            &pending.intent_id.as_str()[..pending.intent_id.as_str().len().min(12)],
        ));

        let tx = Transaction {
            moves: pending.moves,
            state_changes: pending.state_changes,
            units_to_create: pending.units_to_create,
            origin: pending.origin,
            proposed_timestamp: pending.proposed_timestamp,
            intent_id: pending.intent_id.clone(),
            exec_id: exec_id.clone(),
            ledger_name: self.config.name.clone(),
            execution_time,
            sequence_number: sequence,
            created_units,
        };

        self.log.push(tx.clone());
        self.seen_intents.insert(pending.intent_id, exec_id);
        self.current_time = execution_time;
        tx
    }
}

/// All keys on which a declared old state disagrees with the current one,
/// as `(key, expected, actual)` canonical strings.
fn state_mismatches(
    declared: &UnitState,
    current: &UnitState,
) -> Vec<(String, String, String)> {
    let keys: std::collections::BTreeSet<&String> =
        declared.keys().chain(current.keys()).collect();
    let mut mismatches = Vec::new();
    for key in keys {
        let expected = declared.get(key);
        let actual = current.get(key);
        if expected != actual {
            let render = |v: Option<&crate::types::StateValue>| {
                v.map(crate::canon::value_string)
                    .unwrap_or_else(|| "absent".to_string())
            };
            mismatches.push((key.clone(), render(expected), render(actual)));
        }
    }
    mismatches
}

fn first_state_mismatch(
    declared: &UnitState,
    current: &UnitState,
) -> Option<(String, String, String)> {
    state_mismatches(declared, current).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::types::{
        cash, state_from_pairs, Move, OriginKind, StateValue, TransactionOrigin, Unit,
        UnitStateChange,
    };
    use chrono::{TimeZone, Utc};

    fn ledger() -> Ledger {
        let config = LedgerConfig::new("test")
            .with_initial_time(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let mut ledger = Ledger::with_config(config);
        ledger.register_wallet("alice").unwrap();
        ledger.register_wallet("bob").unwrap();
        ledger
            .register_unit(cash("USD", "US Dollar").unwrap())
            .unwrap();
        ledger
    }

    fn origin() -> TransactionOrigin {
        TransactionOrigin::new(OriginKind::UserAction, "test")
    }

    fn issue(ledger: &Ledger, wallet: &str, amount: i64) -> PendingTransaction {
        let mv = Move::new(
            Decimal::from(amount),
            "USD",
            WalletId::system(),
            wallet,
            "issuance",
        )
        .unwrap();
        PendingTransaction::new(vec![mv], vec![], vec![], origin(), ledger.current_time())
    }

    #[test]
    fn test_applied_then_already_applied() {
        let mut ledger = ledger();
        let pending = issue(&ledger, "alice", 1000);

        let first = ledger.execute(pending.clone());
        assert!(first.is_applied());

        let second = ledger.execute(pending);
        assert!(matches!(second, ExecuteResult::AlreadyApplied { .. }));
        assert_eq!(
            ledger.get_balance(&WalletId::new("alice"), &UnitSymbol::new("USD")),
            Decimal::from(1000)
        );
    }

    #[test]
    fn test_unknown_wallet_rejected() {
        let mut ledger = ledger();
        let mv = Move::new(Decimal::from(5), "USD", "alice", "carol", "pay").unwrap();
        let pending =
            PendingTransaction::new(vec![mv], vec![], vec![], origin(), ledger.current_time());
        let result = ledger.execute(pending);
        assert!(matches!(
            result,
            ExecuteResult::Rejected(RejectReason::UnknownWallet { .. })
        ));
    }

    #[test]
    fn test_unknown_unit_rejected_for_state_change() {
        let mut ledger = ledger();
        let sc = UnitStateChange::new("GHOST", None, UnitState::new());
        let pending =
            PendingTransaction::new(vec![], vec![sc], vec![], origin(), ledger.current_time());
        assert!(matches!(
            ledger.execute(pending),
            ExecuteResult::Rejected(RejectReason::UnknownUnit { .. })
        ));
    }

    #[test]
    fn test_tentative_units_rolled_back_on_rejection() {
        let mut ledger = ledger();
        let unit = Unit::new("EUR", "Euro", "CASH").unwrap();
        // References a wallet that does not exist, so validation rejects.
        let mv = Move::new(Decimal::from(5), "EUR", WalletId::system(), "carol", "fx").unwrap();
        let pending = PendingTransaction::new(
            vec![mv],
            vec![],
            vec![unit],
            origin(),
            ledger.current_time(),
        );
        assert!(matches!(
            ledger.execute(pending),
            ExecuteResult::Rejected(RejectReason::UnknownWallet { .. })
        ));
        assert!(ledger.get_unit(&UnitSymbol::new("EUR")).is_none());
        assert_eq!(ledger.log_len(), 1); // only the USD registration
    }

    #[test]
    fn test_unit_conflict_rejected() {
        let mut ledger = ledger();
        let conflicting = Unit::new("USD", "Renamed Dollar", "CASH").unwrap();
        let pending = PendingTransaction::new(
            vec![],
            vec![],
            vec![conflicting],
            origin(),
            ledger.current_time(),
        );
        assert!(matches!(
            ledger.execute(pending),
            ExecuteResult::Rejected(RejectReason::UnitConflict { .. })
        ));
    }

    #[test]
    fn test_balance_out_of_range_rejected() {
        let config = LedgerConfig::new("test");
        let mut ledger = Ledger::with_config(config);
        ledger.register_wallet("alice").unwrap();
        let unit = Unit::new("PTS", "Points", "CASH")
            .unwrap()
            .with_bounds(Decimal::ZERO, Some(Decimal::from(100)))
            .unwrap();
        ledger.register_unit(unit).unwrap();

        let mv = Move::new(
            Decimal::from(150),
            "PTS",
            WalletId::system(),
            "alice",
            "grant",
        )
        .unwrap();
        let pending =
            PendingTransaction::new(vec![mv], vec![], vec![], origin(), ledger.current_time());
        match ledger.execute(pending) {
            ExecuteResult::Rejected(RejectReason::BalanceOutOfRange {
                wallet, proposed, ..
            }) => {
                assert_eq!(wallet, "alice");
                assert_eq!(proposed, Decimal::from(150));
            }
            other => panic!("expected BalanceOutOfRange, got {other:?}"),
        }
        assert_eq!(
            ledger.get_balance(&WalletId::new("alice"), &UnitSymbol::new("PTS")),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_system_wallet_exempt_from_bounds() {
        let mut ledger = ledger();
        // Issuance drives the system wallet deeply negative; that is its job.
        let result = ledger.execute(issue(&ledger, "alice", 1_000_000));
        assert!(result.is_applied());
        assert_eq!(
            ledger.get_balance(&WalletId::system(), &UnitSymbol::new("USD")),
            Decimal::from(-1_000_000)
        );
    }

    #[test]
    fn test_timestamp_before_clock_rejected() {
        let mut ledger = ledger();
        let stale_time = ledger.current_time() - chrono::Duration::hours(1);
        let mv = Move::new(
            Decimal::from(5),
            "USD",
            WalletId::system(),
            "alice",
            "late",
        )
        .unwrap();
        let pending = PendingTransaction::new(vec![mv], vec![], vec![], origin(), stale_time);
        assert!(matches!(
            ledger.execute(pending),
            ExecuteResult::Rejected(RejectReason::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn test_future_timestamp_advances_clock() {
        let mut ledger = ledger();
        let later = ledger.current_time() + chrono::Duration::days(3);
        let mv = Move::new(
            Decimal::from(5),
            "USD",
            WalletId::system(),
            "alice",
            "forward",
        )
        .unwrap();
        let pending = PendingTransaction::new(vec![mv], vec![], vec![], origin(), later);
        let tx = ledger.execute(pending).applied().unwrap();
        assert_eq!(tx.execution_time, later);
        assert_eq!(ledger.current_time(), later);
    }

    #[test]
    fn test_zero_net_transaction_is_valid() {
        let mut ledger = ledger();
        ledger.execute(issue(&ledger, "alice", 100)).applied().unwrap();
        let there = Move::new(Decimal::from(10), "USD", "alice", "bob", "leg1").unwrap();
        let back = Move::new(Decimal::from(10), "USD", "bob", "alice", "leg2").unwrap();
        let pending = PendingTransaction::new(
            vec![there, back],
            vec![],
            vec![],
            origin(),
            ledger.current_time(),
        );
        assert!(ledger.execute(pending).is_applied());
        assert_eq!(
            ledger.get_balance(&WalletId::new("alice"), &UnitSymbol::new("USD")),
            Decimal::from(100)
        );
    }

    #[test]
    fn test_positions_index_tracks_nonzero_holders() {
        let mut ledger = ledger();
        let usd = UnitSymbol::new("USD");
        ledger.execute(issue(&ledger, "alice", 100)).applied().unwrap();
        assert_eq!(ledger.get_positions(&usd).len(), 2); // alice + system

        // Move everything to bob; alice drops out of the index.
        let mv = Move::new(Decimal::from(100), "USD", "alice", "bob", "sweep").unwrap();
        let pending =
            PendingTransaction::new(vec![mv], vec![], vec![], origin(), ledger.current_time());
        ledger.execute(pending).applied().unwrap();

        let positions = ledger.get_positions(&usd);
        assert!(!positions.contains_key(&WalletId::new("alice")));
        assert_eq!(
            positions.get(&WalletId::new("bob")),
            Some(&Decimal::from(100))
        );
    }

    #[test]
    fn test_stale_state_warn_records_advisory() {
        let mut ledger = ledger();
        let usd = UnitSymbol::new("USD");
        let wrong_belief = state_from_pairs([("issuer", StateValue::from("treasury"))]);
        let new_state = state_from_pairs([("issuer", StateValue::from("fed"))]);
        let sc = UnitStateChange::new(usd.clone(), Some(wrong_belief), new_state.clone());
        let pending =
            PendingTransaction::new(vec![], vec![sc], vec![], origin(), ledger.current_time());
        assert!(ledger.execute(pending).is_applied());

        let advisories = ledger.take_stale_advisories();
        assert_eq!(advisories.len(), 1);
        assert_eq!(advisories[0].key, "issuer");
        // The replacement still happened.
        assert_eq!(ledger.get_unit_state(&usd), new_state);
    }

    #[test]
    fn test_stale_state_strict_rejects() {
        let config = LedgerConfig::new("strict")
            .with_stale_state_policy(crate::config::StaleStatePolicy::Reject);
        let mut ledger = Ledger::with_config(config);
        ledger
            .register_unit(cash("USD", "US Dollar").unwrap())
            .unwrap();

        let wrong_belief = state_from_pairs([("issuer", StateValue::from("treasury"))]);
        let sc = UnitStateChange::new("USD", Some(wrong_belief), UnitState::new());
        let pending = PendingTransaction::new(
            vec![],
            vec![sc],
            vec![],
            origin(),
            ledger.current_time(),
        );
        assert!(matches!(
            ledger.execute(pending),
            ExecuteResult::Rejected(RejectReason::StaleState { .. })
        ));
        // State unchanged.
        assert_eq!(
            ledger.get_unit_state(&UnitSymbol::new("USD")),
            state_from_pairs([("issuer", StateValue::from("central_bank"))])
        );
    }

    #[test]
    fn test_registration_only_transaction() {
        let mut ledger = ledger();
        let unit = Unit::new("EUR", "Euro", "CASH").unwrap();
        let pending = PendingTransaction::new(
            vec![],
            vec![],
            vec![unit],
            origin(),
            ledger.current_time(),
        );
        let tx = ledger.execute(pending).applied().unwrap();
        assert_eq!(tx.created_units, vec![UnitSymbol::new("EUR")]);
        assert!(ledger.get_unit(&UnitSymbol::new("EUR")).is_some());
    }

    #[test]
    fn test_noop_for_empty_pending() {
        let mut ledger = ledger();
        let pending = PendingTransaction::empty(&ledger);
        assert!(matches!(ledger.execute(pending), ExecuteResult::NoOp));
        assert_eq!(ledger.log_len(), 1); // nothing new logged
    }

    #[test]
    fn test_exec_id_deterministic() {
        let mut a = ledger();
        let mut b = ledger();
        let pa = issue(&a, "alice", 42);
        let pb = issue(&b, "alice", 42);
        let ta = a.execute(pa).applied().unwrap();
        let tb = b.execute(pb).applied().unwrap();
        assert_eq!(ta.exec_id, tb.exec_id);
        assert_eq!(ta.intent_id, tb.intent_id);
    }
}
