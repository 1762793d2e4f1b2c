//! Basic identifier types
//!
//! Naming conventions:
//! - `_id` suffix: content-derived or ledger-assigned identifiers
//! - Symbols and wallet names are opaque strings wrapped in newtypes
//!   (non-interchangeable at the type level)

use crate::constants::SYSTEM_WALLET;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id! {
    /// Wallet identifier (opaque string)
    WalletId
}

string_id! {
    /// Unit symbol, unique within a ledger
    UnitSymbol
}

string_id! {
    /// Content-addressed transaction identity (lowercase hex)
    IntentId
}

string_id! {
    /// Ledger-assigned execution identifier
    ExecId
}

string_id! {
    /// Content-addressed scheduled-event identity (lowercase hex)
    EventId
}

impl WalletId {
    /// The reserved system wallet.
    pub fn system() -> Self {
        Self(SYSTEM_WALLET.to_string())
    }

    /// Whether this is the reserved system wallet.
    pub fn is_system(&self) -> bool {
        self.0 == SYSTEM_WALLET
    }
}

/// Market prices keyed by unit symbol, passed into every lifecycle step.
/// The core never reads prices from any other source.
pub type Prices = BTreeMap<UnitSymbol, Decimal>;
