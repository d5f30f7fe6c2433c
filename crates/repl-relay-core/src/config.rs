//! Relay configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::traits::SlotToken;

/// Environment variable overriding the identity slot.
pub const SLOT_ENV: &str = "REPL_RELAY_SLOT";

/// Slot used when none is configured.
pub const DEFAULT_SLOT: SlotToken =
    SlotToken::new(Uuid::from_u128(0x5c1b_7a9e_2d4f_4e0b_9f3a_61c8_0e27_d4b5));

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid slot token {value:?}: {source}")]
    InvalidSlot { value: String, source: uuid::Error },
}

/// Relay configuration.
///
/// Every field has a default, so a partial JSON document is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Identity slot of the session kind this relay drives.
    pub slot: SlotToken,

    /// Dispatch events retained for replay.
    pub event_history: usize,

    /// Capacity of the live event broadcast channel.
    pub event_capacity: usize,

    /// Whether `execute_immediate` may create the session front-end.
    pub immediate_creates_session: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            slot: DEFAULT_SLOT,
            event_history: 1024,
            event_capacity: 256,
            immediate_creates_session: true,
        }
    }
}

impl RelayConfig {
    /// Create a default configuration for `slot`.
    #[must_use]
    pub fn new(slot: SlotToken) -> Self {
        Self {
            slot,
            ..Self::default()
        }
    }

    /// Parse a JSON document.
    ///
    /// # Errors
    /// Returns error if the document is not a valid configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a JSON configuration file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Apply overrides from the process environment.
    ///
    /// # Errors
    /// Returns error if an override has an invalid value.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// # Errors
    /// Returns error if an override has an invalid value.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(SLOT_ENV) {
            let id = Uuid::parse_str(value.trim())
                .map_err(|source| ConfigError::InvalidSlot { value, source })?;
            self.slot = SlotToken::new(id);
            tracing::debug!(slot = %self.slot, "Slot overridden from {SLOT_ENV}");
        }
        Ok(self)
    }
}
