//! Core types for agentdex.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::PLACEHOLDER_KEY_PREFIX;
use crate::error::CoreError;

/// Identity of a stored agent record within one chain.
///
/// Confirmed agents are keyed by their on-chain id. Agent id 0 is reserved
/// for placeholders: the locator is known but no on-chain id has been
/// confirmed yet, so placeholders are keyed by locator instead. Two
/// placeholders on the same chain never collide on id 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    /// A confirmed on-chain agent id (never zero).
    Agent(U256),

    /// A placeholder identified by its locator key.
    Placeholder(String),
}

impl RecordKey {
    /// Build the key for an agent id, falling back to the locator when the id
    /// is the placeholder sentinel.
    pub fn new(agent_id: U256, locator: &str) -> Self {
        if agent_id.is_zero() {
            RecordKey::Placeholder(locator.to_string())
        } else {
            RecordKey::Agent(agent_id)
        }
    }

    /// Whether this key names a placeholder record.
    pub fn is_placeholder(&self) -> bool {
        matches!(self, RecordKey::Placeholder(_))
    }

    /// The agent id stored alongside this key (zero for placeholders).
    pub fn agent_id(&self) -> U256 {
        match self {
            RecordKey::Agent(id) => *id,
            RecordKey::Placeholder(_) => U256::ZERO,
        }
    }

    /// Storage representation: the decimal id, or `placeholder:<locator>`.
    pub fn storage_key(&self) -> String {
        match self {
            RecordKey::Agent(id) => id.to_string(),
            RecordKey::Placeholder(locator) => format!("{}{}", PLACEHOLDER_KEY_PREFIX, locator),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

impl FromStr for RecordKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(locator) = s.strip_prefix(PLACEHOLDER_KEY_PREFIX) {
            if locator.is_empty() {
                return Err(CoreError::InvalidRecordKey(s.to_string()));
            }
            return Ok(RecordKey::Placeholder(locator.to_string()));
        }

        let id = U256::from_str_radix(s, 10).map_err(|_| CoreError::InvalidRecordKey(s.to_string()))?;
        if id.is_zero() {
            return Err(CoreError::InvalidRecordKey(s.to_string()));
        }
        Ok(RecordKey::Agent(id))
    }
}

/// Identity registry event layout a discovery came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSchemaVersion {
    /// `AgentRegistered` / `AgentUpdated`: locator carried in the event data.
    DirectFields,

    /// `Registered` / `URIUpdated`: event carries a registration document URI.
    Registration,
}

impl EventSchemaVersion {
    /// Short label used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSchemaVersion::DirectFields => "direct_fields",
            EventSchemaVersion::Registration => "registration",
        }
    }
}

/// A normalized discovery produced from one registry log.
///
/// Transient: consumed immediately by the ingest path, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryEvent {
    /// Configured chain name.
    pub chain: String,

    /// On-chain agent id.
    pub agent_id: U256,

    /// Locator of the agent card (domain, URL or `ipfs://` URI).
    pub locator: String,

    /// Agent address (direct-fields layout) or owner (registration layout).
    pub owner_or_address: Option<Address>,

    /// Event layout the discovery was decoded from.
    pub schema: EventSchemaVersion,

    /// Block the log was emitted in, when the provider reported it.
    pub block_number: Option<u64>,
}

/// A stored agent record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Configured chain name (or the seed label for seed-crawled placeholders).
    pub chain: String,

    /// Identity registry the agent was read from (none for seed crawls).
    pub registry_address: Option<Address>,

    /// On-chain agent id, zero for placeholders.
    pub agent_id: U256,

    /// Storage-stable locator key.
    pub locator: String,

    /// Locator the card was fetched from.
    pub source_locator: String,

    /// Agent card document.
    pub metadata: serde_json::Value,

    /// Unix timestamp of the first successful store.
    pub first_seen_at: i64,

    /// Unix timestamp of the latest store.
    pub last_updated_at: i64,
}

impl AgentRecord {
    /// Key this record is stored under.
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.agent_id, &self.locator)
    }

    /// Whether this record is a placeholder awaiting an on-chain id.
    pub fn is_placeholder(&self) -> bool {
        self.agent_id.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_key_for_placeholder_uses_locator() {
        let a = RecordKey::new(U256::ZERO, "alpha.example");
        let b = RecordKey::new(U256::ZERO, "beta.example");

        assert!(a.is_placeholder());
        assert_ne!(a, b);
        assert_eq!(a.agent_id(), U256::ZERO);
        assert_eq!(a.storage_key(), "placeholder:alpha.example");
    }

    #[test]
    fn test_record_key_for_agent() {
        let key = RecordKey::new(U256::from(42u64), "alpha.example");

        assert_eq!(key, RecordKey::Agent(U256::from(42u64)));
        assert!(!key.is_placeholder());
        assert_eq!(key.storage_key(), "42");
    }

    #[test]
    fn test_record_key_parse() {
        assert_eq!(
            "7".parse::<RecordKey>().unwrap(),
            RecordKey::Agent(U256::from(7u64))
        );
        assert_eq!(
            "placeholder:alpha.example".parse::<RecordKey>().unwrap(),
            RecordKey::Placeholder("alpha.example".to_string())
        );
        assert!("0".parse::<RecordKey>().is_err());
        assert!("placeholder:".parse::<RecordKey>().is_err());
        assert!("abc".parse::<RecordKey>().is_err());
    }

    #[test]
    fn test_agent_record_key() {
        let record = AgentRecord {
            chain: "sepolia".to_string(),
            registry_address: None,
            agent_id: U256::ZERO,
            locator: "alpha.example".to_string(),
            source_locator: "https://alpha.example/agent".to_string(),
            metadata: serde_json::json!({"name": "alpha"}),
            first_seen_at: 1,
            last_updated_at: 1,
        };

        assert!(record.is_placeholder());
        assert_eq!(
            record.key(),
            RecordKey::Placeholder("alpha.example".to_string())
        );
    }
}
