//! Canonicalization engine
//!
//! Deterministic byte form for every allowed state value, and the
//! content-addressed identifiers derived from it. Canonicalization is the
//! sole source of transaction and event identity: equal content always
//! produces equal identifiers, independent of construction order, decimal
//! representation (`100` vs `100.00`) or process.
//!
//! Encoding rules (recursive):
//! - `null`, `true`, `false`
//! - integers in base 10, single `-` for negatives
//! - decimals as `D:<canonical string>` (see [`crate::types::quantity`])
//! - strings length-prefixed as `s:<len>:<bytes>` (delimiters cannot be
//!   forged); map keys use the same form
//! - timestamps as `T:<ISO-8601 with fixed microsecond precision>`
//! - maps as `{k1=v1;k2=v2;…}` with keys in byte-wise lexicographic order
//! - sequences as `[v1,v2,…]` without reordering
//!
//! Sections of an identifier payload are joined with the ASCII record
//! separator and prefixed with a domain tag, then hashed with SHA-256.

use crate::types::quantity::canonical_string;
use crate::types::{
    EventId, IntentId, Move, StateValue, TransactionOrigin, Unit, UnitState, UnitStateChange,
    UnitSymbol,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Domain separation tags for identifier derivation.
pub mod domain_tags {
    /// Tag for transaction intent identifiers
    pub const INTENT: &str = "ledger:intent:v1\u{0}";
    /// Tag for scheduled-event identifiers
    pub const EVENT: &str = "ledger:event:v1\u{0}";
}

/// Section separator inside an identifier payload (ASCII record separator).
const SECTION_SEPARATOR: char = '\u{1e}';

/// Identifier width in bits of SHA-256 output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashBits {
    /// 128 bits, 32 lowercase hex characters (default)
    B128,
    /// Full 256 bits, 64 lowercase hex characters
    B256,
}

impl Default for HashBits {
    fn default() -> Self {
        Self::B128
    }
}

impl HashBits {
    fn hex_len(self) -> usize {
        match self {
            HashBits::B128 => 32,
            HashBits::B256 => 64,
        }
    }
}

/// Canonical ISO-8601 timestamp with fixed microsecond precision.
pub fn canonical_timestamp(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Canonical string form of a state value.
pub fn value_string(value: &StateValue) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Canonical string form of a unit state mapping.
pub fn state_string(state: &UnitState) -> String {
    let mut out = String::new();
    write_map(&mut out, state);
    out
}

/// Canonical form of an optional state (absent beliefs encode as `null`).
pub fn opt_state_string(state: Option<&UnitState>) -> String {
    match state {
        Some(s) => state_string(s),
        None => "null".to_string(),
    }
}

fn write_value(out: &mut String, value: &StateValue) {
    match value {
        StateValue::Null => out.push_str("null"),
        StateValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        StateValue::Int(i) => {
            let _ = write!(out, "{i}");
        }
        StateValue::Decimal(d) => {
            out.push_str("D:");
            out.push_str(&canonical_string(d));
        }
        StateValue::Str(s) => write_str(out, s),
        StateValue::Timestamp(t) => {
            out.push_str("T:");
            out.push_str(&canonical_timestamp(t));
        }
        StateValue::Map(map) => write_map(out, map),
        StateValue::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
    }
}

fn write_map(out: &mut String, map: &UnitState) {
    out.push('{');
    // BTreeMap iteration is byte-wise lexicographic by key
    for (i, (key, value)) in map.iter().enumerate() {
        if i > 0 {
            out.push(';');
        }
        write_str(out, key);
        out.push('=');
        write_value(out, value);
    }
    out.push('}');
}

fn write_str(out: &mut String, s: &str) {
    let _ = write!(out, "s:{}:{}", s.len(), s);
}

fn hash_hex(payload: &str, bits: HashBits) -> String {
    let digest = Sha256::digest(payload.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(bits.hex_len());
    hex
}

/// Compute the content-addressed intent identifier of a transaction.
///
/// The identifier is a pure function of the transaction content: moves
/// (order-insensitive), state changes, the declarative fields of units to
/// create, the proposed timestamp and the origin. Nothing ledger-assigned
/// participates.
pub fn intent_id(
    moves: &[Move],
    state_changes: &[UnitStateChange],
    units_to_create: &[Unit],
    origin: &TransactionOrigin,
    proposed_timestamp: &DateTime<Utc>,
    bits: HashBits,
) -> IntentId {
    let mut payload = String::from(domain_tags::INTENT);

    // Moves in a stable order, independent of caller ordering
    let mut ordered: Vec<&Move> = moves.iter().collect();
    ordered.sort_by_key(|m| {
        (
            m.unit_symbol.clone(),
            m.source.clone(),
            m.dest.clone(),
            m.contract_id.clone(),
            canonical_string(&m.quantity),
        )
    });
    for mv in ordered {
        payload.push(SECTION_SEPARATOR);
        payload.push_str("move:");
        write_str(&mut payload, mv.unit_symbol.as_str());
        payload.push('|');
        write_str(&mut payload, mv.source.as_str());
        payload.push('|');
        write_str(&mut payload, mv.dest.as_str());
        payload.push('|');
        write_str(&mut payload, &mv.contract_id);
        payload.push('|');
        payload.push_str("D:");
        payload.push_str(&canonical_string(&mv.quantity));
    }

    let mut changes: Vec<&UnitStateChange> = state_changes.iter().collect();
    changes.sort_by_key(|sc| sc.unit_symbol.clone());
    for sc in changes {
        payload.push(SECTION_SEPARATOR);
        payload.push_str("sc:");
        write_str(&mut payload, sc.unit_symbol.as_str());
        payload.push('|');
        payload.push_str(&opt_state_string(sc.old_state.as_ref()));
        payload.push('|');
        payload.push_str(&state_string(&sc.new_state));
    }

    // Declarative unit fields only; execution state never participates
    let mut units: Vec<&Unit> = units_to_create.iter().collect();
    units.sort_by_key(|u| u.symbol.clone());
    for unit in units {
        payload.push(SECTION_SEPARATOR);
        payload.push_str("unit:");
        write_str(&mut payload, unit.symbol.as_str());
        payload.push('|');
        write_str(&mut payload, &unit.name);
        payload.push('|');
        write_str(&mut payload, &unit.unit_type);
        payload.push('|');
        payload.push_str("D:");
        payload.push_str(&canonical_string(&unit.min_balance));
        payload.push('|');
        match unit.max_balance {
            Some(max) => {
                payload.push_str("D:");
                payload.push_str(&canonical_string(&max));
            }
            None => payload.push_str("none"),
        }
        payload.push('|');
        match unit.decimal_places {
            Some(dp) => {
                let _ = write!(payload, "dp:{dp}");
            }
            None => payload.push_str("dp:none"),
        }
    }

    payload.push(SECTION_SEPARATOR);
    payload.push_str("ts:");
    payload.push_str(&canonical_timestamp(proposed_timestamp));

    payload.push(SECTION_SEPARATOR);
    payload.push_str("origin:");
    payload.push_str(&value_string(&origin.to_state_value()));

    IntentId::new(hash_hex(&payload, bits))
}

/// Compute the content-addressed identifier of a scheduled event.
pub fn event_id(
    action: &str,
    symbol: &UnitSymbol,
    trigger_time: &DateTime<Utc>,
    params: &UnitState,
) -> EventId {
    let mut payload = String::from(domain_tags::EVENT);
    payload.push(SECTION_SEPARATOR);
    write_str(&mut payload, action);
    payload.push(SECTION_SEPARATOR);
    write_str(&mut payload, symbol.as_str());
    payload.push(SECTION_SEPARATOR);
    payload.push_str("T:");
    payload.push_str(&canonical_timestamp(trigger_time));
    payload.push(SECTION_SEPARATOR);
    payload.push_str(&state_string(params));

    EventId::new(hash_hex(&payload, HashBits::B128))
}
