/// Index configuration.
///
/// Every field has a default, so an empty JSON object is a valid config.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::membership::ids::GroupID;
use crate::membership::limits::{
    DEFAULT_EVENT_CHANNEL_CAPACITY, MAX_ENTRY_PAYLOAD_BYTES, MAX_ENTRY_PAYLOAD_CEILING,
    MAX_EVENT_CHANNEL_CAPACITY, MIN_ENTRY_PAYLOAD_BYTES,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Configuration-level failures. Fatal at construction time.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Founding key is not a valid Ed25519 public key")]
    InvalidFoundingKey,

    #[error("Group id does not match the founding key")]
    GroupIdMismatch,

    #[error("Group {0} is already registered")]
    DuplicateGroup(GroupID),

    #[error("Group {0} is not registered")]
    UnknownGroup(GroupID),

    #[error("Log-write key is not a valid Ed25519 public key")]
    InvalidWriteKey,

    #[error("Unknown store type: {0}")]
    UnknownStoreType(String),

    #[error("max_entry_bytes must be within {min}..={max}, got {got}")]
    EntryLimitOutOfRange { got: usize, min: usize, max: usize },

    #[error("event_channel_capacity must be within 1..={max}, got {got}")]
    EventCapacityOutOfRange { got: usize, max: usize },

    #[error("Invitation signature does not verify")]
    InvalidInvitation,

    #[error("Invalid encoding: {0}")]
    Encoding(String),

    #[error("Config parse failed: {0}")]
    Parse(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// IndexConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Raw payloads larger than this are rejected as malformed before decoding.
    pub max_entry_bytes: usize,
    /// Buffered membership events per subscriber before the slowest lags.
    pub event_channel_capacity: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_entry_bytes: MAX_ENTRY_PAYLOAD_BYTES,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl IndexConfig {
    /// Parse and validate a JSON config.
    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        let config: IndexConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_ENTRY_PAYLOAD_BYTES..=MAX_ENTRY_PAYLOAD_CEILING).contains(&self.max_entry_bytes) {
            return Err(ConfigError::EntryLimitOutOfRange {
                got: self.max_entry_bytes,
                min: MIN_ENTRY_PAYLOAD_BYTES,
                max: MAX_ENTRY_PAYLOAD_CEILING,
            });
        }
        if self.event_channel_capacity == 0
            || self.event_channel_capacity > MAX_EVENT_CHANNEL_CAPACITY
        {
            return Err(ConfigError::EventCapacityOutOfRange {
                got: self.event_channel_capacity,
                max: MAX_EVENT_CHANNEL_CAPACITY,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        IndexConfig::default().validate().unwrap();
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = IndexConfig::from_json("{}").unwrap();
        assert_eq!(config, IndexConfig::default());
    }

    #[test]
    fn test_partial_json_overrides() {
        let config = IndexConfig::from_json(r#"{"max_entry_bytes": 4096}"#).unwrap();
        assert_eq!(config.max_entry_bytes, 4096);
        assert_eq!(config.event_channel_capacity, DEFAULT_EVENT_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_entry_limit_out_of_range() {
        let err = IndexConfig::from_json(r#"{"max_entry_bytes": 10}"#).unwrap_err();
        assert!(matches!(err, ConfigError::EntryLimitOutOfRange { got: 10, .. }));
    }

    #[test]
    fn test_zero_event_capacity_rejected() {
        let config = IndexConfig {
            event_channel_capacity: 0,
            ..IndexConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EventCapacityOutOfRange { got: 0, .. })
        ));
    }

    #[test]
    fn test_bad_json_is_parse_error() {
        let err = IndexConfig::from_json("not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
