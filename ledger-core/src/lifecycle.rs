//! Lifecycle engine
//!
//! Combines scheduled events and smart-contract polling into one
//! per-step orchestration:
//!
//! 1. Advance ledger time
//! 2. Process due scheduled events (in the scheduler's total order)
//! 3. Poll smart contracts, by unit type then symbol, ascending
//! 4. Repeat until a pass makes no progress (cascading effects)
//!
//! Follow-up events a handler schedules during a step become visible in
//! the next pass of the same step when due at or before the step
//! timestamp; otherwise they wait for a future step. A step that is still
//! making progress after the pass budget is a configuration error
//! (unbounded cascade) and fails hard.

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{ExecuteResult, Ledger};
use crate::scheduler::{Event, EventScheduler};
use crate::types::{PendingTransaction, Prices, Transaction, UnitSymbol};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lifecycle-aware contract, registered per unit type.
///
/// Contracts are pure and deterministic: they read the view, the
/// timestamp and the prices, and return a (possibly empty) pending
/// transaction. Failures propagate unchanged.
pub trait SmartContract: Send + Sync {
    fn check_lifecycle(
        &self,
        view: &dyn crate::view::LedgerView,
        symbol: &UnitSymbol,
        timestamp: DateTime<Utc>,
        prices: &Prices,
    ) -> LedgerResult<PendingTransaction>;
}

impl<F> SmartContract for F
where
    F: Fn(
            &dyn crate::view::LedgerView,
            &UnitSymbol,
            DateTime<Utc>,
            &Prices,
        ) -> LedgerResult<PendingTransaction>
        + Send
        + Sync,
{
    fn check_lifecycle(
        &self,
        view: &dyn crate::view::LedgerView,
        symbol: &UnitSymbol,
        timestamp: DateTime<Utc>,
        prices: &Prices,
    ) -> LedgerResult<PendingTransaction> {
        self(view, symbol, timestamp, prices)
    }
}

/// Per-step orchestration of scheduled events and contract polling.
pub struct LifecycleEngine {
    ledger: Ledger,
    scheduler: EventScheduler,
    contracts: BTreeMap<String, Arc<dyn SmartContract>>,
}

impl LifecycleEngine {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            ledger,
            scheduler: EventScheduler::new(),
            contracts: BTreeMap::new(),
        }
    }

    pub fn with_scheduler(mut self, scheduler: EventScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }

    pub fn into_ledger(self) -> Ledger {
        self.ledger
    }

    pub fn scheduler(&self) -> &EventScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut EventScheduler {
        &mut self.scheduler
    }

    /// Register a smart contract for a unit type.
    pub fn register_contract(
        &mut self,
        unit_type: impl Into<String>,
        contract: Arc<dyn SmartContract>,
    ) {
        self.contracts.insert(unit_type.into(), contract);
    }

    /// Schedule an event for future execution.
    pub fn schedule(&mut self, event: Event) -> bool {
        self.scheduler.schedule(event)
    }

    /// Advance time and execute all pending lifecycle work at `timestamp`.
    ///
    /// Returns the transactions applied during this step, in execution
    /// order. Fails with [`LedgerError::UnboundedCascade`] when the step
    /// is still producing work after the configured pass budget.
    pub fn step(
        &mut self,
        timestamp: DateTime<Utc>,
        prices: &Prices,
    ) -> LedgerResult<Vec<Transaction>> {
        self.ledger.advance_time(timestamp)?;
        let max_passes = self.ledger.config().max_cascade_passes;
        let mut executed = Vec::new();

        for pass in 0..max_passes {
            let mut progress = false;

            // Phase 1: scheduled events, already totally ordered.
            for event in self.scheduler.get_due(timestamp) {
                let handler = self.scheduler.handler(&event.action).ok_or_else(|| {
                    LedgerError::UnknownAction {
                        action: event.action.clone(),
                    }
                })?;
                let outcome = handler.handle(&event, &self.ledger, prices)?;
                if !outcome.pending.is_empty() {
                    match self.ledger.execute(outcome.pending) {
                        ExecuteResult::Applied(tx) => {
                            executed.push(tx);
                            progress = true;
                        }
                        ExecuteResult::Rejected(reason) => {
                            warn!(
                                event_id = %event.event_id,
                                action = %event.action,
                                reason = %reason,
                                "scheduled event transaction rejected"
                            );
                        }
                        ExecuteResult::AlreadyApplied { .. } | ExecuteResult::NoOp => {}
                    }
                }
                self.scheduler.mark_executed(event.event_id.clone());

                for follow_up in outcome.follow_ups {
                    let due_now = follow_up.trigger_time <= timestamp;
                    if self.scheduler.schedule(follow_up) && due_now {
                        // Newly visible work for the next pass.
                        progress = true;
                    }
                }
            }

            // Phase 2: contract polling, unit types then symbols ascending.
            let unit_types: Vec<String> = self.contracts.keys().cloned().collect();
            for unit_type in unit_types {
                let contract = match self.contracts.get(&unit_type) {
                    Some(contract) => Arc::clone(contract),
                    None => continue,
                };
                for symbol in self.ledger.units_of_type(&unit_type) {
                    let pending =
                        contract.check_lifecycle(&self.ledger, &symbol, timestamp, prices)?;
                    if pending.is_empty() {
                        continue;
                    }
                    match self.ledger.execute(pending) {
                        ExecuteResult::Applied(tx) => {
                            executed.push(tx);
                            progress = true;
                        }
                        ExecuteResult::Rejected(reason) => {
                            warn!(
                                symbol = %symbol,
                                unit_type = %unit_type,
                                reason = %reason,
                                "contract transaction rejected"
                            );
                        }
                        ExecuteResult::AlreadyApplied { .. } | ExecuteResult::NoOp => {}
                    }
                }
            }

            if !progress {
                debug!(
                    passes = pass + 1,
                    executed = executed.len(),
                    "lifecycle step settled"
                );
                return Ok(executed);
            }
        }

        Err(LedgerError::UnboundedCascade { passes: max_passes })
    }

    /// Drive the engine through a sequence of timestamps.
    pub fn run(
        &mut self,
        timestamps: &[DateTime<Utc>],
        prices_at: impl Fn(&DateTime<Utc>) -> Prices,
    ) -> LedgerResult<Vec<Transaction>> {
        let mut all = Vec::new();
        for timestamp in timestamps {
            let prices = prices_at(timestamp);
            all.extend(self.step(*timestamp, &prices)?);
        }
        Ok(all)
    }

    /// Count of events waiting in the scheduler.
    pub fn pending_event_count(&self) -> usize {
        self.scheduler.pending_count()
    }

    /// The next scheduled event, if any.
    pub fn peek_next_event(&self) -> Option<&Event> {
        self.scheduler.peek_next()
    }
}

impl std::fmt::Debug for LifecycleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleEngine")
            .field("ledger", &self.ledger.name())
            .field("scheduler", &self.scheduler)
            .field("contracts", &self.contracts.keys().collect::<Vec<_>>())
            .finish()
    }
}
