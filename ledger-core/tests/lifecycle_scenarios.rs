//! Lifecycle engine scenarios: cascades, cascade overflow, contract
//! polling and multi-step runs.

use chrono::{DateTime, Duration, TimeZone, Utc};
use ledger_core::{
    cash, state_from_pairs, Event, EventOutcome, Ledger, LedgerConfig, LedgerError, LedgerView,
    LifecycleEngine, Move, OriginKind, PendingTransaction, Prices, StateValue, TransactionOrigin,
    UnitState, UnitStateChange, UnitSymbol, WalletId,
};
use rust_decimal::Decimal;
use std::sync::Arc;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

fn base_ledger(name: &str, max_passes: u32) -> Ledger {
    let mut ledger = Ledger::with_config(
        LedgerConfig::new(name)
            .with_initial_time(t0())
            .with_max_cascade_passes(max_passes),
    );
    ledger.register_wallet("alice").unwrap();
    ledger.register_wallet("bob").unwrap();
    ledger.register_unit(cash("USD", "US Dollar").unwrap()).unwrap();
    ledger
}

fn usd() -> UnitSymbol {
    UnitSymbol::new("USD")
}

fn alice() -> WalletId {
    WalletId::new("alice")
}

/// Handler that pays one dollar per event and chains follow-up events at
/// the same trigger time until the `n` parameter reaches `limit`.
fn chain_handler(limit: i64) -> Arc<dyn ledger_core::EventHandler> {
    Arc::new(
        move |event: &Event,
              view: &dyn LedgerView,
              _prices: &Prices|
              -> ledger_core::LedgerResult<EventOutcome> {
            let n = event
                .params
                .get("n")
                .and_then(StateValue::as_int)
                .unwrap_or(0);
            let mv = Move::new(
                Decimal::ONE,
                "USD",
                WalletId::system(),
                "alice",
                format!("chain_{n}"),
            )?;
            let pending = PendingTransaction::build(
                view,
                vec![mv],
                vec![],
                TransactionOrigin::new(OriginKind::Lifecycle, "chain")
                    .with_unit(event.symbol.clone()),
            );
            let mut outcome = EventOutcome::pending(pending);
            if n < limit {
                outcome = outcome.with_follow_ups(vec![Event::new(
                    event.trigger_time,
                    event.priority,
                    event.symbol.clone(),
                    event.action.clone(),
                    state_from_pairs([("n", StateValue::Int(n + 1))]),
                )]);
            }
            Ok(outcome)
        },
    )
}

#[test]
fn cascade_settles_within_pass_budget() {
    let mut engine = LifecycleEngine::new(base_ledger("cascade", 3));
    engine
        .scheduler_mut()
        .register("chain", chain_handler(1));
    engine.schedule(Event::new(
        t0(),
        0,
        "USD",
        "chain",
        state_from_pairs([("n", StateValue::Int(0))]),
    ));

    let executed = engine.step(t0(), &Prices::new()).unwrap();
    // E1 fires in pass 1 and schedules E2 at the same timestamp; E2 fires
    // in pass 2; pass 3 finds nothing and settles.
    assert_eq!(executed.len(), 2);
    assert_eq!(
        engine.ledger().get_balance(&alice(), &usd()),
        Decimal::from(2)
    );
    assert_eq!(engine.pending_event_count(), 0);
}

#[test]
fn unbounded_cascade_is_fatal() {
    let mut engine = LifecycleEngine::new(base_ledger("runaway", 3));
    // No limit: every event chains another one due at the same instant.
    engine
        .scheduler_mut()
        .register("chain", chain_handler(i64::MAX));
    engine.schedule(Event::new(
        t0(),
        0,
        "USD",
        "chain",
        state_from_pairs([("n", StateValue::Int(0))]),
    ));

    let result = engine.step(t0(), &Prices::new());
    assert!(matches!(
        result,
        Err(LedgerError::UnboundedCascade { passes: 3 })
    ));
}

#[test]
fn unknown_action_propagates() {
    let mut engine = LifecycleEngine::new(base_ledger("unknown", 10));
    engine.schedule(Event::new(t0(), 0, "USD", "mystery", UnitState::new()));
    assert!(matches!(
        engine.step(t0(), &Prices::new()),
        Err(LedgerError::UnknownAction { .. })
    ));
}

#[test]
fn handler_failure_propagates() {
    let mut engine = LifecycleEngine::new(base_ledger("failing", 10));
    engine.scheduler_mut().register(
        "explode",
        Arc::new(
            |event: &Event,
             _view: &dyn LedgerView,
             prices: &Prices|
             -> ledger_core::LedgerResult<EventOutcome> {
                // Handlers must not swallow their own failures.
                match prices.get(event.symbol.as_str()) {
                    Some(_) => unreachable!("price is never present in this test"),
                    None => Err(LedgerError::MissingPrice {
                        symbol: event.symbol.to_string(),
                    }),
                }
            },
        ),
    );
    engine.schedule(Event::new(t0(), 0, "USD", "explode", UnitState::new()));
    assert!(matches!(
        engine.step(t0(), &Prices::new()),
        Err(LedgerError::MissingPrice { .. })
    ));
}

#[test]
fn declining_handler_still_marks_event_executed() {
    let mut engine = LifecycleEngine::new(base_ledger("decline", 10));
    engine.scheduler_mut().register(
        "noop",
        Arc::new(
            |_event: &Event,
             view: &dyn LedgerView,
             _prices: &Prices|
             -> ledger_core::LedgerResult<EventOutcome> {
                Ok(EventOutcome::empty(view))
            },
        ),
    );
    let event = Event::new(t0(), 0, "USD", "noop", UnitState::new());
    let id = event.event_id.clone();
    engine.schedule(event.clone());

    let executed = engine.step(t0(), &Prices::new()).unwrap();
    assert!(executed.is_empty());
    assert!(engine.scheduler().is_executed(&id));
    // The handled event cannot come back.
    assert!(!engine.schedule(event));
}

/// Cash-settling forward contract used by the polling scenarios.
///
/// Settles `(price(underlying) - strike) * notional` from the short to the
/// long wallet once the clock reaches `settle_date`, then marks the unit
/// settled.
fn forward_contract() -> Arc<dyn ledger_core::SmartContract> {
    Arc::new(
        |view: &dyn LedgerView,
         symbol: &UnitSymbol,
         timestamp: DateTime<Utc>,
         prices: &Prices|
         -> ledger_core::LedgerResult<PendingTransaction> {
            let state = view.get_unit_state(symbol);
            let settled = state
                .get("settled")
                .and_then(StateValue::as_bool)
                .unwrap_or(false);
            let settle_date = state
                .get("settle_date")
                .and_then(StateValue::as_timestamp)
                .ok_or_else(|| LedgerError::MissingStateKey {
                    symbol: symbol.to_string(),
                    key: "settle_date".to_string(),
                })?;
            if settled || timestamp < settle_date {
                return Ok(PendingTransaction::empty(view));
            }

            let underlying = state
                .get("underlying")
                .and_then(|v| v.as_str().map(str::to_string))
                .ok_or_else(|| LedgerError::MissingStateKey {
                    symbol: symbol.to_string(),
                    key: "underlying".to_string(),
                })?;
            let price = prices
                .get(underlying.as_str())
                .copied()
                .ok_or_else(|| LedgerError::MissingPrice {
                    symbol: symbol.to_string(),
                })?;
            let strike = state
                .get("strike")
                .and_then(StateValue::as_decimal)
                .unwrap_or(Decimal::ZERO);
            let notional = state
                .get("notional")
                .and_then(StateValue::as_decimal)
                .unwrap_or(Decimal::ONE);

            let payoff = (price - strike) * notional;
            let mut moves = Vec::new();
            if !payoff.is_zero() {
                moves.push(Move::new(
                    payoff,
                    "USD",
                    "bob",
                    "alice",
                    format!("settle_{symbol}"),
                )?);
            }
            let mut new_state = state.clone();
            new_state.insert("settled".to_string(), StateValue::Bool(true));
            let changes = vec![UnitStateChange::new(
                symbol.clone(),
                Some(state),
                new_state,
            )];
            Ok(PendingTransaction::build(
                view,
                moves,
                changes,
                TransactionOrigin::new(OriginKind::Lifecycle, "forward_settlement")
                    .with_unit(symbol.clone())
                    .with_event_kind("SETTLEMENT"),
            ))
        },
    )
}

fn forward_unit(symbol: &str, settle_date: DateTime<Utc>) -> ledger_core::Unit {
    ledger_core::Unit::new(symbol, format!("Forward {symbol}"), "FORWARD")
        .unwrap()
        .with_state(state_from_pairs([
            ("underlying", StateValue::from("AAPL")),
            ("strike", StateValue::Decimal(Decimal::from(100))),
            ("notional", StateValue::Decimal(Decimal::from(10))),
            ("settle_date", StateValue::Timestamp(settle_date)),
            ("settled", StateValue::Bool(false)),
        ]))
}

fn aapl_prices(price: i64) -> Prices {
    let mut prices = Prices::new();
    prices.insert(UnitSymbol::new("AAPL"), Decimal::from(price));
    prices
}

#[test]
fn contract_polls_and_settles_once() {
    let settle = t0() + Duration::days(30);
    let mut ledger = base_ledger("forward", 10);
    ledger.register_unit(forward_unit("FWD1", settle)).unwrap();

    let mut engine = LifecycleEngine::new(ledger);
    engine.register_contract("FORWARD", forward_contract());

    // Before settlement: contract declines to act.
    let executed = engine.step(t0() + Duration::days(1), &aapl_prices(105)).unwrap();
    assert!(executed.is_empty());

    // At settlement: one transaction, (105 - 100) * 10 from bob to alice.
    let executed = engine.step(settle, &aapl_prices(105)).unwrap();
    assert_eq!(executed.len(), 1);
    assert_eq!(
        engine.ledger().get_balance(&alice(), &usd()),
        Decimal::from(50)
    );
    assert_eq!(
        engine
            .ledger()
            .get_unit_state(&UnitSymbol::new("FWD1"))
            .get("settled")
            .and_then(StateValue::as_bool),
        Some(true)
    );

    // After settlement: nothing further fires.
    let executed = engine
        .step(settle + Duration::days(1), &aapl_prices(140))
        .unwrap();
    assert!(executed.is_empty());
}

#[test]
fn contract_polling_order_is_deterministic() {
    let settle = t0() + Duration::days(5);
    let mut ledger = base_ledger("ordering", 10);
    // Registered out of order; polling must visit symbols ascending.
    ledger.register_unit(forward_unit("FWD_B", settle)).unwrap();
    ledger.register_unit(forward_unit("FWD_A", settle)).unwrap();

    let mut engine = LifecycleEngine::new(ledger);
    engine.register_contract("FORWARD", forward_contract());

    let executed = engine.step(settle, &aapl_prices(101)).unwrap();
    assert_eq!(executed.len(), 2);
    let touched: Vec<String> = executed
        .iter()
        .map(|tx| {
            tx.state_changes[0].unit_symbol.as_str().to_string()
        })
        .collect();
    assert_eq!(touched, vec!["FWD_A".to_string(), "FWD_B".to_string()]);
}

#[test]
fn run_drives_multiple_steps() {
    let settle = t0() + Duration::days(10);
    let mut ledger = base_ledger("run", 10);
    ledger.register_unit(forward_unit("FWD1", settle)).unwrap();

    let mut engine = LifecycleEngine::new(ledger);
    engine.register_contract("FORWARD", forward_contract());

    let timestamps = vec![
        t0() + Duration::days(1),
        t0() + Duration::days(5),
        settle,
        settle + Duration::days(1),
    ];
    let executed = engine
        .run(&timestamps, |_| aapl_prices(108))
        .unwrap();
    assert_eq!(executed.len(), 1);
    assert_eq!(
        engine.ledger().get_balance(&alice(), &usd()),
        Decimal::from(80)
    );

    // The full run replays deterministically from the log.
    let replayed = engine.ledger().replay().unwrap();
    assert_eq!(
        replayed.get_balance(&alice(), &usd()),
        engine.ledger().get_balance(&alice(), &usd())
    );
    assert_eq!(replayed.current_time(), engine.ledger().current_time());
}

#[test]
fn scheduled_event_ordering_respects_priority() {
    let mut engine = LifecycleEngine::new(base_ledger("priority", 10));

    // Both actions pay alice; amounts differ so the log reveals order.
    let pay = |amount: i64| -> Arc<dyn ledger_core::EventHandler> {
        Arc::new(
            move |_event: &Event,
                  view: &dyn LedgerView,
                  _prices: &Prices|
                  -> ledger_core::LedgerResult<EventOutcome> {
                let mv = Move::new(
                    Decimal::from(amount),
                    "USD",
                    WalletId::system(),
                    "alice",
                    format!("pay_{amount}"),
                )?;
                Ok(EventOutcome::pending(PendingTransaction::build(
                    view,
                    vec![mv],
                    vec![],
                    TransactionOrigin::new(OriginKind::Lifecycle, "pay"),
                )))
            },
        )
    };
    engine.scheduler_mut().register("settle", pay(40));
    engine.scheduler_mut().register("record", pay(1));

    // Settlement phase (priority 40) must run after record phase (0).
    engine.schedule(Event::new(t0(), 40, "USD", "settle", UnitState::new()));
    engine.schedule(Event::new(t0(), 0, "USD", "record", UnitState::new()));

    let executed = engine.step(t0(), &Prices::new()).unwrap();
    let amounts: Vec<Decimal> = executed
        .iter()
        .map(|tx| tx.moves[0].quantity)
        .collect();
    assert_eq!(amounts, vec![Decimal::from(1), Decimal::from(40)]);
}
