//! Scheduled lifecycle events
//!
//! Events are just data; handlers are just functions. The scheduler is an
//! ordered queue with content-addressed deduplication; after execution the
//! transaction log is the audit trail, so no separate event status
//! tracking exists.
//!
//! Ordering key: `(trigger_time, priority, symbol, event_id)` ascending.
//! Ties beyond the symbol are broken by `event_id`, so the order is total.

use crate::canon;
use crate::error::LedgerResult;
use crate::types::{
    state_from_pairs, EventId, PendingTransaction, Prices, StateValue, UnitState, UnitSymbol,
};
use crate::view::LedgerView;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Immutable scheduled lifecycle event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    /// When this event should execute
    pub trigger_time: DateTime<Utc>,
    /// Execution order within the same timestamp (lower runs first)
    pub priority: i32,
    /// Unit symbol this event affects
    pub symbol: UnitSymbol,
    /// Event kind ("dividend", "coupon", "expiry", ...)
    pub action: String,
    /// Event-specific parameters
    pub params: UnitState,
    /// Content-addressed identity, derived from all other fields
    pub event_id: EventId,
}

impl Event {
    pub fn new(
        trigger_time: DateTime<Utc>,
        priority: i32,
        symbol: impl Into<UnitSymbol>,
        action: impl Into<String>,
        params: UnitState,
    ) -> Self {
        let symbol = symbol.into();
        let action = action.into();
        let event_id = canon::event_id(&action, &symbol, &trigger_time, &params);
        Self {
            trigger_time,
            priority,
            symbol,
            action,
            params,
            event_id,
        }
    }

    fn ordering_key(&self) -> (&DateTime<Utc>, &i32, &UnitSymbol, &EventId) {
        (&self.trigger_time, &self.priority, &self.symbol, &self.event_id)
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.ordering_key() == other.ordering_key()
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ordering_key().cmp(&other.ordering_key())
    }
}

/// Handler outcome: the transaction to execute plus any events the handler
/// wants scheduled. Follow-ups due within the current step become visible
/// in the next cascade pass.
#[derive(Clone, Debug)]
pub struct EventOutcome {
    pub pending: PendingTransaction,
    pub follow_ups: Vec<Event>,
}

impl EventOutcome {
    /// An outcome that only executes a transaction.
    pub fn pending(pending: PendingTransaction) -> Self {
        Self {
            pending,
            follow_ups: Vec::new(),
        }
    }

    /// An outcome with nothing to do.
    pub fn empty(view: &dyn LedgerView) -> Self {
        Self::pending(PendingTransaction::empty(view))
    }

    pub fn with_follow_ups(mut self, follow_ups: Vec<Event>) -> Self {
        self.follow_ups = follow_ups;
        self
    }
}

/// Event handler: a pure function from an event and a read-only view to an
/// outcome. Failures propagate unchanged; handlers never swallow errors.
pub trait EventHandler: Send + Sync {
    fn handle(
        &self,
        event: &Event,
        view: &dyn LedgerView,
        prices: &Prices,
    ) -> LedgerResult<EventOutcome>;
}

impl<F> EventHandler for F
where
    F: Fn(&Event, &dyn LedgerView, &Prices) -> LedgerResult<EventOutcome> + Send + Sync,
{
    fn handle(
        &self,
        event: &Event,
        view: &dyn LedgerView,
        prices: &Prices,
    ) -> LedgerResult<EventOutcome> {
        self(event, view, prices)
    }
}

/// Ordered event queue with dedup and a handler registry.
#[derive(Default)]
pub struct EventScheduler {
    queue: BTreeSet<Event>,
    /// Ids currently sitting in the queue
    scheduled: BTreeSet<EventId>,
    /// Ids that have been handled; re-scheduling them is a no-op
    executed: BTreeSet<EventId>,
    handlers: BTreeMap<String, Arc<dyn EventHandler>>,
}

impl EventScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an action kind.
    pub fn register(&mut self, action: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(action.into(), handler);
    }

    pub fn handler(&self, action: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(action).cloned()
    }

    /// Add an event to the queue. Returns `false` (no-op) when an event
    /// with the same id is already scheduled or was already executed.
    pub fn schedule(&mut self, event: Event) -> bool {
        if self.scheduled.contains(&event.event_id) || self.executed.contains(&event.event_id) {
            return false;
        }
        self.scheduled.insert(event.event_id.clone());
        self.queue.insert(event);
        true
    }

    /// Schedule a batch; returns how many were newly enqueued.
    pub fn schedule_many(&mut self, events: impl IntoIterator<Item = Event>) -> usize {
        events.into_iter().filter(|e| self.schedule(e.clone())).count()
    }

    /// Pop and return every event with `trigger_time <= as_of`, in
    /// ordering-key order.
    pub fn get_due(&mut self, as_of: DateTime<Utc>) -> Vec<Event> {
        let mut due = Vec::new();
        while let Some(first) = self.queue.first() {
            if first.trigger_time > as_of {
                break;
            }
            if let Some(event) = self.queue.pop_first() {
                self.scheduled.remove(&event.event_id);
                due.push(event);
            }
        }
        due
    }

    /// Record an event as handled; future schedules of the same id no-op.
    pub fn mark_executed(&mut self, event_id: EventId) {
        self.executed.insert(event_id);
    }

    pub fn is_executed(&self, event_id: &EventId) -> bool {
        self.executed.contains(event_id)
    }

    /// Number of events waiting in the queue.
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// The next event in ordering-key order, without removing it.
    pub fn peek_next(&self) -> Option<&Event> {
        self.queue.first()
    }
}

impl std::fmt::Debug for EventScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventScheduler")
            .field("pending", &self.queue.len())
            .field("executed", &self.executed.len())
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ============================================================
// Event factories
// ============================================================

/// Priority of record-phase events (dividends, splits).
pub const PRIORITY_RECORD: i32 = 0;
/// Priority of payment-phase events (coupons).
pub const PRIORITY_PAYMENT: i32 = 30;
/// Priority of settlement-phase events (maturity, expiry, settlement).
pub const PRIORITY_SETTLEMENT: i32 = 40;

/// Create a dividend event.
pub fn dividend_event(
    symbol: impl Into<UnitSymbol>,
    ex_date: DateTime<Utc>,
    amount_per_share: Decimal,
    currency: impl Into<String>,
    payment_date: Option<DateTime<Utc>>,
) -> Event {
    let mut params = state_from_pairs([
        ("amount_per_share", StateValue::Decimal(amount_per_share)),
        ("currency", StateValue::Str(currency.into())),
    ]);
    if let Some(date) = payment_date {
        params.insert("payment_date".to_string(), StateValue::Timestamp(date));
    }
    Event::new(ex_date, PRIORITY_RECORD, symbol, "dividend", params)
}

/// Create a bond coupon payment event.
pub fn coupon_event(
    bond_symbol: impl Into<UnitSymbol>,
    payment_date: DateTime<Utc>,
    coupon_amount: Decimal,
    currency: impl Into<String>,
) -> Event {
    let params = state_from_pairs([
        ("coupon_amount", StateValue::Decimal(coupon_amount)),
        ("currency", StateValue::Str(currency.into())),
    ]);
    Event::new(payment_date, PRIORITY_PAYMENT, bond_symbol, "coupon", params)
}

/// Create a bond maturity/redemption event.
pub fn maturity_event(
    bond_symbol: impl Into<UnitSymbol>,
    maturity_date: DateTime<Utc>,
    redemption_price: Decimal,
    currency: impl Into<String>,
) -> Event {
    let params = state_from_pairs([
        ("redemption_price", StateValue::Decimal(redemption_price)),
        ("currency", StateValue::Str(currency.into())),
    ]);
    Event::new(
        maturity_date,
        PRIORITY_SETTLEMENT,
        bond_symbol,
        "maturity",
        params,
    )
}

/// Create an option/derivative expiry event.
pub fn expiry_event(
    symbol: impl Into<UnitSymbol>,
    expiry_date: DateTime<Utc>,
    underlying: impl Into<String>,
) -> Event {
    let params = state_from_pairs([("underlying", StateValue::Str(underlying.into()))]);
    Event::new(expiry_date, PRIORITY_SETTLEMENT, symbol, "expiry", params)
}

/// Create a settlement event (forwards, deferred cash).
pub fn settlement_event(
    symbol: impl Into<UnitSymbol>,
    settlement_date: DateTime<Utc>,
    underlying: Option<String>,
) -> Event {
    let mut params = UnitState::new();
    if let Some(underlying) = underlying {
        params.insert("underlying".to_string(), StateValue::Str(underlying));
    }
    Event::new(
        settlement_date,
        PRIORITY_SETTLEMENT,
        symbol,
        "settlement",
        params,
    )
}

/// Create a stock split event.
pub fn split_event(
    symbol: impl Into<UnitSymbol>,
    effective_date: DateTime<Utc>,
    ratio: Decimal,
) -> Event {
    let params = state_from_pairs([("ratio", StateValue::Decimal(ratio))]);
    Event::new(effective_date, PRIORITY_RECORD, symbol, "split", params)
}
