//! Unit state values
//!
//! Unit state is an ordered mapping from string key to [`StateValue`].
//! State is immutable: updates replace the whole mapping with a new one
//! (see [`crate::types::UnitStateChange`]). Every value admitted here has
//! exactly one canonical byte form (see [`crate::canon`]), which keeps
//! state hashable into content-addressed identifiers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered state mapping attached to a unit.
pub type UnitState = BTreeMap<String, StateValue>;

/// A canonicalizable state value. Nested arbitrarily.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateValue {
    Null,
    Bool(bool),
    Int(i64),
    Decimal(Decimal),
    Str(String),
    Timestamp(DateTime<Utc>),
    Map(BTreeMap<String, StateValue>),
    List(Vec<StateValue>),
}

impl StateValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StateValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            StateValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            StateValue::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            StateValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, StateValue::Null)
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        StateValue::Bool(value)
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        StateValue::Int(value)
    }
}

impl From<Decimal> for StateValue {
    fn from(value: Decimal) -> Self {
        StateValue::Decimal(value)
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::Str(value.to_string())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::Str(value)
    }
}

impl From<DateTime<Utc>> for StateValue {
    fn from(value: DateTime<Utc>) -> Self {
        StateValue::Timestamp(value)
    }
}

/// Build a [`UnitState`] from key/value pairs.
pub fn state_from_pairs<K, I>(pairs: I) -> UnitState
where
    K: Into<String>,
    I: IntoIterator<Item = (K, StateValue)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
