//! Transaction value types
//!
//! A [`PendingTransaction`] is intent: everything needed to describe an
//! atomic state change, identified by its content hash. A [`Transaction`]
//! is fact: the same content plus ledger-assigned execution metadata.

use crate::canon::{self, HashBits};
use crate::error::{LedgerError, LedgerResult};
use crate::types::{ExecId, IntentId, StateValue, Unit, UnitState, UnitSymbol, WalletId};
use crate::view::LedgerView;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A single signed transfer of one unit between two distinct wallets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub quantity: Decimal,
    pub unit_symbol: UnitSymbol,
    pub source: WalletId,
    pub dest: WalletId,
    pub contract_id: String,
}

impl Move {
    /// Construct a move, enforcing the construction-time invariants:
    /// non-zero quantity, non-empty identifiers, `source != dest`.
    pub fn new(
        quantity: Decimal,
        unit_symbol: impl Into<UnitSymbol>,
        source: impl Into<WalletId>,
        dest: impl Into<WalletId>,
        contract_id: impl Into<String>,
    ) -> LedgerResult<Self> {
        let mv = Self {
            quantity,
            unit_symbol: unit_symbol.into(),
            source: source.into(),
            dest: dest.into(),
            contract_id: contract_id.into(),
        };
        if mv.unit_symbol.as_str().trim().is_empty() {
            return Err(LedgerError::InvalidMove {
                reason: "unit_symbol cannot be empty".to_string(),
            });
        }
        if mv.source.as_str().trim().is_empty() {
            return Err(LedgerError::InvalidMove {
                reason: "source cannot be empty".to_string(),
            });
        }
        if mv.dest.as_str().trim().is_empty() {
            return Err(LedgerError::InvalidMove {
                reason: "dest cannot be empty".to_string(),
            });
        }
        if mv.contract_id.trim().is_empty() {
            return Err(LedgerError::InvalidMove {
                reason: "contract_id cannot be empty".to_string(),
            });
        }
        if mv.quantity.is_zero() {
            return Err(LedgerError::InvalidQuantity {
                reason: format!("move quantity for {} is zero", mv.unit_symbol),
            });
        }
        if mv.source == mv.dest {
            return Err(LedgerError::InvalidMove {
                reason: format!("source and dest must differ, got {}", mv.source),
            });
        }
        Ok(mv)
    }
}

impl std::fmt::Display for Move {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}: {} -> {}",
            self.quantity, self.unit_symbol, self.source, self.dest
        )
    }
}

/// Declarative full-state replacement for a named unit.
///
/// `new_state` is the complete replacement; `old_state` is the proposer's
/// belief at build time, recorded for stale detection and for unwind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStateChange {
    pub unit_symbol: UnitSymbol,
    pub old_state: Option<UnitState>,
    pub new_state: UnitState,
}

impl UnitStateChange {
    pub fn new(
        unit_symbol: impl Into<UnitSymbol>,
        old_state: Option<UnitState>,
        new_state: UnitState,
    ) -> Self {
        Self {
            unit_symbol: unit_symbol.into(),
            old_state,
            new_state,
        }
    }

    /// Keys that differ between the old and new state, with both values.
    pub fn changed_fields(
        &self,
    ) -> BTreeMap<String, (Option<StateValue>, Option<StateValue>)> {
        let empty = UnitState::new();
        let old = self.old_state.as_ref().unwrap_or(&empty);
        let mut changes = BTreeMap::new();
        let keys: BTreeSet<&String> = old.keys().chain(self.new_state.keys()).collect();
        for key in keys {
            let old_val = old.get(key);
            let new_val = self.new_state.get(key);
            if old_val != new_val {
                changes.insert(key.clone(), (old_val.cloned(), new_val.cloned()));
            }
        }
        changes
    }
}

/// Classification of where a transaction originated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginKind {
    /// Manual user-initiated transaction
    UserAction,
    /// Unit contract (trade execution)
    Contract,
    /// Automatic lifecycle event (expiry, coupon, settlement)
    Lifecycle,
    /// System operations (issuance, registration, fixtures)
    System,
    /// External system integration
    External,
}

impl OriginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OriginKind::UserAction => "user_action",
            OriginKind::Contract => "contract",
            OriginKind::Lifecycle => "lifecycle",
            OriginKind::System => "system",
            OriginKind::External => "external",
        }
    }
}

/// Provenance record attached to every transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOrigin {
    pub kind: OriginKind,
    pub source_id: String,
    pub unit_symbol: Option<UnitSymbol>,
    pub event_kind: Option<String>,
    pub random_seed: Option<u64>,
    pub inputs: Option<UnitState>,
}

impl TransactionOrigin {
    pub fn new(kind: OriginKind, source_id: impl Into<String>) -> Self {
        Self {
            kind,
            source_id: source_id.into(),
            unit_symbol: None,
            event_kind: None,
            random_seed: None,
            inputs: None,
        }
    }

    pub fn with_unit(mut self, unit_symbol: impl Into<UnitSymbol>) -> Self {
        self.unit_symbol = Some(unit_symbol.into());
        self
    }

    pub fn with_event_kind(mut self, event_kind: impl Into<String>) -> Self {
        self.event_kind = Some(event_kind.into());
        self
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    pub fn with_inputs(mut self, inputs: UnitState) -> Self {
        self.inputs = Some(inputs);
        self
    }

    /// Canonicalizable form used for intent-id derivation.
    pub fn to_state_value(&self) -> StateValue {
        let mut map = BTreeMap::new();
        map.insert("kind".to_string(), StateValue::from(self.kind.as_str()));
        map.insert(
            "source_id".to_string(),
            StateValue::from(self.source_id.as_str()),
        );
        if let Some(symbol) = &self.unit_symbol {
            map.insert("unit".to_string(), StateValue::from(symbol.as_str()));
        }
        if let Some(event) = &self.event_kind {
            map.insert("event".to_string(), StateValue::from(event.as_str()));
        }
        if let Some(seed) = self.random_seed {
            map.insert("seed".to_string(), StateValue::from(seed.to_string()));
        }
        if let Some(inputs) = &self.inputs {
            map.insert("inputs".to_string(), StateValue::Map(inputs.clone()));
        }
        StateValue::Map(map)
    }
}

impl std::fmt::Display for TransactionOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.source_id)?;
        if let Some(symbol) = &self.unit_symbol {
            write!(f, " unit={symbol}")?;
        }
        if let Some(event) = &self.event_kind {
            write!(f, " event={event}")?;
        }
        Ok(())
    }
}

/// A transaction specification before execution: intent.
///
/// `intent_id` is a pure function of all other fields; equal content
/// produces equal identifiers regardless of move ordering, map insertion
/// order or decimal representation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub moves: Vec<Move>,
    /// Ordered by unit symbol ascending
    pub state_changes: Vec<UnitStateChange>,
    /// Ordered by symbol ascending
    pub units_to_create: Vec<Unit>,
    pub origin: TransactionOrigin,
    pub proposed_timestamp: DateTime<Utc>,
    pub intent_id: IntentId,
}

impl PendingTransaction {
    /// Build a pending transaction; sorts state changes and unit creations
    /// into canonical order and derives the intent identifier (128-bit).
    pub fn new(
        moves: Vec<Move>,
        state_changes: Vec<UnitStateChange>,
        units_to_create: Vec<Unit>,
        origin: TransactionOrigin,
        proposed_timestamp: DateTime<Utc>,
    ) -> Self {
        Self::with_hash_bits(
            moves,
            state_changes,
            units_to_create,
            origin,
            proposed_timestamp,
            HashBits::default(),
        )
    }

    /// As [`PendingTransaction::new`] with an explicit identifier width.
    pub fn with_hash_bits(
        moves: Vec<Move>,
        mut state_changes: Vec<UnitStateChange>,
        mut units_to_create: Vec<Unit>,
        origin: TransactionOrigin,
        proposed_timestamp: DateTime<Utc>,
        bits: HashBits,
    ) -> Self {
        state_changes.sort_by(|a, b| a.unit_symbol.cmp(&b.unit_symbol));
        units_to_create.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        let intent_id = canon::intent_id(
            &moves,
            &state_changes,
            &units_to_create,
            &origin,
            &proposed_timestamp,
            bits,
        );
        Self {
            moves,
            state_changes,
            units_to_create,
            origin,
            proposed_timestamp,
            intent_id,
        }
    }

    /// Standard constructor for contracts: the proposed timestamp is the
    /// view's current time.
    pub fn build(
        view: &dyn LedgerView,
        moves: Vec<Move>,
        state_changes: Vec<UnitStateChange>,
        origin: TransactionOrigin,
    ) -> Self {
        Self::new(moves, state_changes, Vec::new(), origin, view.current_time())
    }

    /// A transaction with nothing to do, for contracts that decline to act.
    pub fn empty(view: &dyn LedgerView) -> Self {
        Self::new(
            Vec::new(),
            Vec::new(),
            Vec::new(),
            TransactionOrigin::new(OriginKind::Contract, "noop"),
            view.current_time(),
        )
    }

    /// True when there are no moves, no state changes and no units to create.
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty() && self.state_changes.is_empty() && self.units_to_create.is_empty()
    }
}

/// An executed, immutable ledger record: fact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub moves: Vec<Move>,
    pub state_changes: Vec<UnitStateChange>,
    pub units_to_create: Vec<Unit>,
    pub origin: TransactionOrigin,
    /// When the pending transaction was proposed
    pub proposed_timestamp: DateTime<Utc>,
    /// Content hash carried over from the pending transaction
    pub intent_id: IntentId,
    /// Deterministic execution identifier, unique within the ledger
    pub exec_id: ExecId,
    pub ledger_name: String,
    /// When the ledger applied this transaction
    pub execution_time: DateTime<Utc>,
    /// Monotonic sequence within the ledger
    pub sequence_number: u64,
    /// Symbols actually first registered by this transaction
    pub created_units: Vec<UnitSymbol>,
}

impl Transaction {
    /// Contract identifiers referenced by this transaction's moves.
    pub fn contract_ids(&self) -> BTreeSet<String> {
        self.moves.iter().map(|m| m.contract_id.clone()).collect()
    }

    /// Rebuild the pending form, preserving the original intent identifier.
    /// Used by log replay.
    pub fn to_pending(&self) -> PendingTransaction {
        PendingTransaction {
            moves: self.moves.clone(),
            state_changes: self.state_changes.clone(),
            units_to_create: self.units_to_create.clone(),
            origin: self.origin.clone(),
            proposed_timestamp: self.proposed_timestamp,
            intent_id: self.intent_id.clone(),
        }
    }
}
