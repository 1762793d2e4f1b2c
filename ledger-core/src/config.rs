//! Ledger configuration
//!
//! All options are immutable once a ledger is constructed.

use crate::canon::HashBits;
use crate::constants::DEFAULT_MAX_CASCADE_PASSES;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Policy for handling state changes whose declared old state disagrees
/// with the current unit state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleStatePolicy {
    /// Record an advisory and apply anyway (default)
    Warn,
    /// Reject the transaction
    Reject,
}

impl Default for StaleStatePolicy {
    fn default() -> Self {
        Self::Warn
    }
}

/// Immutable per-ledger configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Ledger identifier, embedded in execution ids
    pub name: String,
    /// Starting logical time
    pub initial_time: DateTime<Utc>,
    /// Stale-state handling (see [`StaleStatePolicy`])
    pub stale_state_policy: StaleStatePolicy,
    /// Cascade pass budget for the lifecycle engine (at least 1)
    pub max_cascade_passes: u32,
    /// Width of content-addressed identifiers
    pub hash_bits: HashBits,
    /// Enables the fixture-only `set_balance` operation
    pub test_mode: bool,
}

impl LedgerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial_time: DateTime::<Utc>::UNIX_EPOCH,
            stale_state_policy: StaleStatePolicy::default(),
            max_cascade_passes: DEFAULT_MAX_CASCADE_PASSES,
            hash_bits: HashBits::default(),
            test_mode: false,
        }
    }

    pub fn with_initial_time(mut self, initial_time: DateTime<Utc>) -> Self {
        self.initial_time = initial_time;
        self
    }

    pub fn with_stale_state_policy(mut self, policy: StaleStatePolicy) -> Self {
        self.stale_state_policy = policy;
        self
    }

    /// Set the cascade pass budget; values below 1 are clamped to 1.
    pub fn with_max_cascade_passes(mut self, passes: u32) -> Self {
        self.max_cascade_passes = passes.max(1);
        self
    }

    pub fn with_hash_bits(mut self, bits: HashBits) -> Self {
        self.hash_bits = bits;
        self
    }

    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::new("ledger")
    }
}
