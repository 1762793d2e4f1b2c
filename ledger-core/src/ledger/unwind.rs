//! Historical state reconstruction
//!
//! Initial balances and unit registrations exist in current state but need
//! not exist as log entries, so replaying forward from empty is unsafe.
//! Walking the log backward from current state is: every transaction
//! records complete old/new state snapshots and its net balance effect is
//! exactly invertible.

use super::{ExecuteResult, Ledger};
use crate::error::{LedgerError, LedgerResult};
use crate::types::Transaction;
use crate::view::LedgerView;
use chrono::{DateTime, Utc};
use tracing::debug;

impl Ledger {
    /// Deep copy of this ledger as it existed at `target_time`.
    ///
    /// Clones the current state, then walks the log in reverse, undoing
    /// every transaction whose `execution_time` is after the target:
    /// balances are restored by subtracting the recorded net effect, unit
    /// states are restored from `old_state`, and units first registered by
    /// an unwound transaction are removed. The log is truncated to the
    /// retained prefix and the idempotency set rebuilt from it.
    pub fn clone_at(&self, target_time: DateTime<Utc>) -> LedgerResult<Ledger> {
        if target_time > self.current_time {
            return Err(LedgerError::FutureTarget {
                target: target_time,
                current: self.current_time,
            });
        }

        let mut cloned = self.clone();
        cloned.current_time = target_time;

        // The log is ordered by execution time (monotone sequence
        // invariant), so the reverse walk stops at the first retained entry.
        for tx in self.log.iter().rev() {
            if tx.execution_time <= target_time {
                break;
            }
            cloned.unwind_transaction(tx);
        }

        cloned.log.retain(|tx| tx.execution_time <= target_time);
        cloned.seen_intents = cloned
            .log
            .iter()
            .map(|tx| (tx.intent_id.clone(), tx.exec_id.clone()))
            .collect();
        cloned.next_sequence = cloned
            .log
            .last()
            .map(|tx| tx.sequence_number + 1)
            .unwrap_or(0);
        cloned.stale_advisories.clear();

        debug!(
            target = %target_time,
            retained = cloned.log.len(),
            unwound = self.log.len() - cloned.log.len(),
            "historical clone reconstructed"
        );
        Ok(cloned)
    }

    /// Undo one transaction's effects. Must run while the transaction's
    /// units are still registered (reverse log order guarantees this).
    fn unwind_transaction(&mut self, tx: &Transaction) {
        // Reverse the net balance effect with the same rounding the forward
        // application used, making the unwind an exact inverse.
        let net = self.compute_net(&tx.moves);
        for ((wallet, unit), delta) in net {
            let current = self.get_balance(&wallet, &unit);
            let restored = match self.units.get(&unit) {
                Some(u) => u.round_balance(current - delta),
                None => current - delta,
            };
            self.write_balance(&wallet, &unit, restored);
        }

        // Restore old states in reverse declaration order.
        for sc in tx.state_changes.iter().rev() {
            if let Some(unit) = self.units.get(&sc.unit_symbol) {
                let restored = unit.with_replaced_state(sc.old_state.clone().unwrap_or_default());
                self.units.insert(sc.unit_symbol.clone(), restored);
            }
        }

        // Remove units first registered by this transaction, along with any
        // balances and positions that referenced them.
        for symbol in &tx.created_units {
            self.units.remove(symbol);
            for per_wallet in self.balances.values_mut() {
                per_wallet.remove(symbol);
            }
            self.positions.remove(symbol);
        }
    }

    /// Rebuild a ledger by re-executing the full log from declarative state.
    ///
    /// Wallet registrations and units that predate the log are carried
    /// over; everything else is reproduced transaction by transaction.
    /// Divergence (any replayed transaction failing validation) is a hard
    /// error: it means the log and the state disagree.
    pub fn replay(&self) -> LedgerResult<Ledger> {
        let mut fresh = Ledger::with_config(self.config.clone());

        for wallet in self.balances.keys() {
            if !wallet.is_system() {
                fresh.register_wallet(wallet.clone())?;
            }
        }

        // Units created inside the log will be re-created by their
        // transactions; only pre-log units are carried over directly.
        let created_in_log: std::collections::BTreeSet<_> = self
            .log
            .iter()
            .flat_map(|tx| tx.created_units.iter().cloned())
            .collect();
        for (symbol, unit) in &self.units {
            if !created_in_log.contains(symbol) {
                fresh.units.insert(symbol.clone(), unit.clone());
            }
        }

        for tx in &self.log {
            if tx.execution_time > fresh.current_time {
                fresh.advance_time(tx.execution_time)?;
            }
            match fresh.execute(tx.to_pending()) {
                ExecuteResult::Applied(_) | ExecuteResult::NoOp => {}
                ExecuteResult::AlreadyApplied { .. } => {}
                ExecuteResult::Rejected(reason) => {
                    return Err(LedgerError::ReplayDivergence {
                        exec_id: tx.exec_id.to_string(),
                        reason: reason.to_string(),
                    });
                }
            }
        }

        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::types::{
        cash, Move, OriginKind, PendingTransaction, TransactionOrigin, UnitSymbol, WalletId,
    };
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;

    fn origin() -> TransactionOrigin {
        TransactionOrigin::new(OriginKind::UserAction, "test")
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn seeded_ledger() -> Ledger {
        let mut ledger = Ledger::with_config(
            LedgerConfig::new("unwind").with_initial_time(t0()),
        );
        ledger.register_wallet("alice").unwrap();
        ledger.register_wallet("bob").unwrap();
        ledger
            .register_unit(cash("USD", "US Dollar").unwrap())
            .unwrap();
        let mv = Move::new(
            Decimal::from(1000),
            "USD",
            WalletId::system(),
            "alice",
            "issuance",
        )
        .unwrap();
        let pending =
            PendingTransaction::new(vec![mv], vec![], vec![], origin(), ledger.current_time());
        assert!(ledger.execute(pending).is_applied());
        ledger
    }

    fn balances_of(ledger: &Ledger) -> Vec<(String, String, Decimal)> {
        let usd = UnitSymbol::new("USD");
        ["alice", "bob", "system"]
            .iter()
            .map(|w| {
                (
                    w.to_string(),
                    "USD".to_string(),
                    ledger.get_balance(&WalletId::new(*w), &usd),
                )
            })
            .collect()
    }

    #[test]
    fn test_clone_at_current_time_is_identity() {
        let ledger = seeded_ledger();
        let cloned = ledger.clone_at(ledger.current_time()).unwrap();
        assert_eq!(balances_of(&cloned), balances_of(&ledger));
        assert_eq!(cloned.log_len(), ledger.log_len());
        assert_eq!(cloned.next_sequence(), ledger.next_sequence());
    }

    #[test]
    fn test_clone_at_future_fails() {
        let ledger = seeded_ledger();
        let future = ledger.current_time() + Duration::days(1);
        assert!(matches!(
            ledger.clone_at(future),
            Err(LedgerError::FutureTarget { .. })
        ));
    }

    #[test]
    fn test_clone_at_unwinds_later_transfers() {
        let mut ledger = seeded_ledger();
        let checkpoint_time = ledger.current_time();
        let checkpoint = balances_of(&ledger);

        let t1 = checkpoint_time + Duration::days(1);
        ledger.advance_time(t1).unwrap();
        let mv = Move::new(Decimal::from(250), "USD", "alice", "bob", "payment").unwrap();
        let pending = PendingTransaction::new(vec![mv], vec![], vec![], origin(), t1);
        assert!(ledger.execute(pending).is_applied());

        let rewound = ledger.clone_at(checkpoint_time).unwrap();
        assert_eq!(balances_of(&rewound), checkpoint);
        assert_eq!(rewound.log_len(), 2); // registration + issuance
        assert_eq!(rewound.current_time(), checkpoint_time);

        // The original is untouched.
        assert_eq!(
            ledger.get_balance(&WalletId::new("bob"), &UnitSymbol::new("USD")),
            Decimal::from(250)
        );
    }

    #[test]
    fn test_clone_at_removes_units_created_later() {
        let mut ledger = seeded_ledger();
        let before = ledger.current_time();
        let t1 = before + Duration::days(1);
        ledger.advance_time(t1).unwrap();
        ledger
            .register_unit(cash("EUR", "Euro").unwrap())
            .unwrap();
        assert!(ledger.get_unit(&UnitSymbol::new("EUR")).is_some());

        let rewound = ledger.clone_at(before).unwrap();
        assert!(rewound.get_unit(&UnitSymbol::new("EUR")).is_none());
        assert!(rewound.get_unit(&UnitSymbol::new("USD")).is_some());
    }

    #[test]
    fn test_clone_at_before_first_transaction() {
        let mut ledger = Ledger::with_config(
            LedgerConfig::new("unwind").with_initial_time(t0()),
        );
        ledger.register_wallet("alice").unwrap();
        ledger
            .register_unit(cash("USD", "US Dollar").unwrap())
            .unwrap();

        let after_setup = ledger.current_time();
        let t1 = after_setup + Duration::days(1);
        ledger.advance_time(t1).unwrap();
        let mv = Move::new(
            Decimal::from(10),
            "USD",
            WalletId::system(),
            "alice",
            "issuance",
        )
        .unwrap();
        let pending = PendingTransaction::new(vec![mv], vec![], vec![], origin(), t1);
        ledger.execute(pending).applied().unwrap();

        let rewound = ledger.clone_at(after_setup).unwrap();
        assert!(rewound.get_unit(&UnitSymbol::new("USD")).is_some());
        assert_eq!(
            rewound.get_balance(&WalletId::new("alice"), &UnitSymbol::new("USD")),
            Decimal::ZERO
        );
        assert_eq!(rewound.log_len(), 1); // the registration transaction
    }

    #[test]
    fn test_replay_reproduces_ledger() {
        let mut ledger = seeded_ledger();
        let t1 = ledger.current_time() + Duration::days(1);
        ledger.advance_time(t1).unwrap();
        let mv = Move::new(Decimal::from(250), "USD", "alice", "bob", "payment").unwrap();
        let pending = PendingTransaction::new(vec![mv], vec![], vec![], origin(), t1);
        ledger.execute(pending).applied().unwrap();

        let replayed = ledger.replay().unwrap();
        assert_eq!(balances_of(&replayed), balances_of(&ledger));
        assert_eq!(replayed.current_time(), ledger.current_time());
        assert_eq!(replayed.log_len(), ledger.log_len());
        for (a, b) in replayed.log_iter().zip(ledger.log_iter()) {
            assert_eq!(a.exec_id, b.exec_id);
            assert_eq!(a.sequence_number, b.sequence_number);
            assert_eq!(a.execution_time, b.execution_time);
        }
    }
}
