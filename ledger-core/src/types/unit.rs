//! Unit definitions and transfer rules
//!
//! A [`Unit`] is the immutable definition of an asset type: symbol, bounds,
//! optional precision cap, optional transfer rule, and a state mapping.
//! State "mutates" only by replacement: [`Unit::with_replaced_state`]
//! produces a new instance that preserves declarative identity.

use crate::constants::{
    default_cash_min_balance, default_stock_min_balance, CASH_DECIMAL_PLACES,
    STOCK_DECIMAL_PLACES, UNIT_TYPE_CASH, UNIT_TYPE_STOCK,
};
use crate::error::{LedgerError, LedgerResult};
use crate::types::quantity::round_places;
use crate::types::{state_from_pairs, Move, StateValue, UnitState, UnitSymbol, WalletId};
use crate::view::LedgerView;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A transfer rule veto. The execution core catches exactly this type;
/// rules cannot signal any other failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferViolation {
    pub message: String,
}

impl TransferViolation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Pluggable per-unit move validation.
///
/// Rules are pure: they read the view and the move and either accept or
/// veto with a [`TransferViolation`]. Closures with the matching signature
/// implement the trait directly.
pub trait TransferRule: Send + Sync {
    fn check(&self, view: &dyn LedgerView, mv: &Move) -> Result<(), TransferViolation>;
}

impl<F> TransferRule for F
where
    F: Fn(&dyn LedgerView, &Move) -> Result<(), TransferViolation> + Send + Sync,
{
    fn check(&self, view: &dyn LedgerView, mv: &Move) -> Result<(), TransferViolation> {
        self(view, mv)
    }
}

/// Immutable definition of an asset type.
#[derive(Clone, Serialize, Deserialize)]
pub struct Unit {
    /// Symbol, unique within a ledger
    pub symbol: UnitSymbol,
    /// Human-readable name
    pub name: String,
    /// Free-form tag used by the lifecycle engine to dispatch contracts
    pub unit_type: String,
    /// Inclusive minimum balance for non-system wallets
    pub min_balance: Decimal,
    /// Inclusive maximum balance for non-system wallets (`None` = unbounded)
    pub max_balance: Option<Decimal>,
    /// Precision cap applied to balances during validation accumulation
    pub decimal_places: Option<u32>,
    /// Optional move validation; rules are code and never serialize
    #[serde(skip)]
    pub transfer_rule: Option<Arc<dyn TransferRule>>,
    /// Term sheet data, lifecycle information and other unit metadata
    pub state: UnitState,
}

impl Unit {
    /// Create a unit with zero/unbounded balance limits and empty state.
    pub fn new(
        symbol: impl Into<UnitSymbol>,
        name: impl Into<String>,
        unit_type: impl Into<String>,
    ) -> LedgerResult<Self> {
        let unit = Self {
            symbol: symbol.into(),
            name: name.into(),
            unit_type: unit_type.into(),
            min_balance: Decimal::ZERO,
            max_balance: None,
            decimal_places: None,
            transfer_rule: None,
            state: UnitState::new(),
        };
        unit.validate()?;
        Ok(unit)
    }

    /// Set inclusive balance bounds.
    pub fn with_bounds(
        mut self,
        min_balance: Decimal,
        max_balance: Option<Decimal>,
    ) -> LedgerResult<Self> {
        if let Some(max) = max_balance {
            if min_balance > max {
                return Err(LedgerError::InvalidUnit {
                    reason: format!(
                        "{}: min_balance {min_balance} exceeds max_balance {max}",
                        self.symbol
                    ),
                });
            }
        }
        self.min_balance = min_balance;
        self.max_balance = max_balance;
        Ok(self)
    }

    /// Set the balance precision cap.
    pub fn with_decimal_places(mut self, places: u32) -> Self {
        self.decimal_places = Some(places);
        self
    }

    /// Attach a transfer rule.
    pub fn with_transfer_rule(mut self, rule: Arc<dyn TransferRule>) -> Self {
        self.transfer_rule = Some(rule);
        self
    }

    /// Set the initial state mapping.
    pub fn with_state(mut self, state: UnitState) -> Self {
        self.state = state;
        self
    }

    /// Definition-level invariants, checked at construction and registration.
    pub fn validate(&self) -> LedgerResult<()> {
        if self.symbol.as_str().trim().is_empty() {
            return Err(LedgerError::InvalidUnit {
                reason: "symbol cannot be empty".to_string(),
            });
        }
        if self.unit_type.trim().is_empty() {
            return Err(LedgerError::InvalidUnit {
                reason: format!("{}: unit_type cannot be empty", self.symbol),
            });
        }
        if let Some(max) = self.max_balance {
            if self.min_balance > max {
                return Err(LedgerError::InvalidUnit {
                    reason: format!(
                        "{}: min_balance {} exceeds max_balance {max}",
                        self.symbol, self.min_balance
                    ),
                });
            }
        }
        Ok(())
    }

    /// Round a balance to this unit's precision cap. Identity when no cap.
    pub fn round_balance(&self, value: Decimal) -> Decimal {
        match self.decimal_places {
            Some(places) => round_places(value, places),
            None => value,
        }
    }

    /// New instance with `state` fully replaced; declarative identity and
    /// the transfer rule are preserved.
    pub fn with_replaced_state(&self, state: UnitState) -> Self {
        Self {
            symbol: self.symbol.clone(),
            name: self.name.clone(),
            unit_type: self.unit_type.clone(),
            min_balance: self.min_balance,
            max_balance: self.max_balance,
            decimal_places: self.decimal_places,
            transfer_rule: self.transfer_rule.clone(),
            state,
        }
    }
}

// Equality covers declarative fields and state; rules are code, not content.
impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol
            && self.name == other.name
            && self.unit_type == other.unit_type
            && self.min_balance == other.min_balance
            && self.max_balance == other.max_balance
            && self.decimal_places == other.decimal_places
            && self.state == other.state
    }
}

impl Eq for Unit {}

impl std::fmt::Debug for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unit")
            .field("symbol", &self.symbol)
            .field("name", &self.name)
            .field("unit_type", &self.unit_type)
            .field("min_balance", &self.min_balance)
            .field("max_balance", &self.max_balance)
            .field("decimal_places", &self.decimal_places)
            .field("transfer_rule", &self.transfer_rule.is_some())
            .field("state", &self.state)
            .finish()
    }
}

/// Restrict a bilateral unit to its original counterparties.
///
/// Only the wallets recorded in the unit state as `long_wallet` and
/// `short_wallet` may participate in moves. During novation a temporary
/// `_novation_from` entry grants the transferring wallet permission.
#[derive(Clone, Copy, Debug, Default)]
pub struct BilateralRule;

impl TransferRule for BilateralRule {
    fn check(&self, view: &dyn LedgerView, mv: &Move) -> Result<(), TransferViolation> {
        let state = view.get_unit_state(&mv.unit_symbol);
        let long = state.get("long_wallet").and_then(|v| v.as_str().map(str::to_string));
        let short = state.get("short_wallet").and_then(|v| v.as_str().map(str::to_string));

        let (long, short) = match (long, short) {
            (Some(l), Some(s)) => (l, s),
            _ => {
                return Err(TransferViolation::new(format!(
                    "bilateral unit {} missing counterparty state",
                    mv.unit_symbol
                )))
            }
        };

        let novation_from = state
            .get("_novation_from")
            .and_then(|v| v.as_str().map(str::to_string));

        let authorized = |wallet: &WalletId| {
            wallet.as_str() == long
                || wallet.as_str() == short
                || novation_from.as_deref() == Some(wallet.as_str())
        };

        if !authorized(&mv.source) {
            return Err(TransferViolation::new(format!(
                "bilateral {}: {} not authorized",
                mv.unit_symbol, mv.source
            )));
        }
        if !authorized(&mv.dest) {
            return Err(TransferViolation::new(format!(
                "bilateral {}: {} not authorized",
                mv.unit_symbol, mv.dest
            )));
        }
        Ok(())
    }
}

/// Create a cash currency unit with a large overdraft allowance.
pub fn cash(symbol: impl Into<UnitSymbol>, name: impl Into<String>) -> LedgerResult<Unit> {
    Ok(Unit::new(symbol, name, UNIT_TYPE_CASH)?
        .with_bounds(default_cash_min_balance(), None)?
        .with_decimal_places(CASH_DECIMAL_PLACES)
        .with_state(state_from_pairs([(
            "issuer",
            StateValue::from("central_bank"),
        )])))
}

/// Create an equity unit with short selling enabled.
pub fn equity(symbol: impl Into<UnitSymbol>, name: impl Into<String>) -> LedgerResult<Unit> {
    Ok(Unit::new(symbol, name, UNIT_TYPE_STOCK)?
        .with_bounds(default_stock_min_balance(), None)?
        .with_decimal_places(STOCK_DECIMAL_PLACES))
}

/// Create a bilateral contract unit restricted to two counterparties.
pub fn bilateral(
    symbol: impl Into<UnitSymbol>,
    name: impl Into<String>,
    unit_type: impl Into<String>,
    long_wallet: &WalletId,
    short_wallet: &WalletId,
) -> LedgerResult<Unit> {
    Ok(Unit::new(symbol, name, unit_type)?
        .with_bounds(Decimal::from(-1_000_000_i64), None)?
        .with_transfer_rule(Arc::new(BilateralRule))
        .with_state(state_from_pairs([
            ("long_wallet", StateValue::from(long_wallet.as_str())),
            ("short_wallet", StateValue::from(short_wallet.as_str())),
        ])))
}
