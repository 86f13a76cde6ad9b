//! Identity registry event catalogue and decoding.
//!
//! Registries in the wild emit one of several event layouts. The layout is
//! picked from the first topic only; [`decode_log`] turns a raw log into an
//! [`IdentityEvent`] and [`EventDecoder`] finishes the job by resolving
//! registration documents into agent locators.

use agentdex_core::{
    DiscoveryEvent, EventSchemaVersion, A2A_ENDPOINT_NAME, DID_ENDPOINT_NAME, MCP_ENDPOINT_NAME,
};
use alloy::primitives::{Address, B256, U256};
use alloy::sol;
use alloy::sol_types::SolEvent;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace, warn};

use super::provider::RawLog;
use crate::metadata::MetadataFetcher;

sol! {
    /// Direct-fields registration: the locator travels in the event.
    #[derive(Debug, PartialEq, Eq)]
    event AgentRegistered(uint256 indexed agentId, string agentDomain, address agentAddress);

    /// Direct-fields update, same layout as `AgentRegistered`.
    #[derive(Debug, PartialEq, Eq)]
    event AgentUpdated(uint256 indexed agentId, string agentDomain, address agentAddress);

    /// ERC-721 style registration: data carries a registration document URI.
    #[derive(Debug, PartialEq, Eq)]
    event Registered(uint256 indexed agentId, string tokenURI, address indexed owner);

    /// Registration document moved.
    #[derive(Debug, PartialEq, Eq)]
    event URIUpdated(uint256 indexed agentId, string newURI, address indexed updatedBy);

    /// Key/value metadata write.
    #[derive(Debug, PartialEq, Eq)]
    event MetadataSet(uint256 indexed agentId, string indexed indexedKey, string key, bytes value);
}

/// Known identity registry events, keyed by signature hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSchema {
    /// `AgentRegistered(uint256,string,address)`
    AgentRegistered,
    /// `AgentUpdated(uint256,string,address)`
    AgentUpdated,
    /// `Registered(uint256,string,address)`
    Registered,
    /// `URIUpdated(uint256,string,address)`
    UriUpdated,
    /// `MetadataSet(uint256,string,string,bytes)`
    MetadataSet,
}

impl EventSchema {
    /// Every schema the decoder recognises.
    pub const ALL: [EventSchema; 5] = [
        EventSchema::AgentRegistered,
        EventSchema::AgentUpdated,
        EventSchema::Registered,
        EventSchema::UriUpdated,
        EventSchema::MetadataSet,
    ];

    /// Resolve a log's first topic.
    pub fn from_signature(topic: B256) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.signature_hash() == topic)
    }

    /// Event signature hash (topic 0).
    pub fn signature_hash(&self) -> B256 {
        match self {
            EventSchema::AgentRegistered => AgentRegistered::SIGNATURE_HASH,
            EventSchema::AgentUpdated => AgentUpdated::SIGNATURE_HASH,
            EventSchema::Registered => Registered::SIGNATURE_HASH,
            EventSchema::UriUpdated => URIUpdated::SIGNATURE_HASH,
            EventSchema::MetadataSet => MetadataSet::SIGNATURE_HASH,
        }
    }

    /// Solidity event name.
    pub fn name(&self) -> &'static str {
        match self {
            EventSchema::AgentRegistered => "AgentRegistered",
            EventSchema::AgentUpdated => "AgentUpdated",
            EventSchema::Registered => "Registered",
            EventSchema::UriUpdated => "URIUpdated",
            EventSchema::MetadataSet => "MetadataSet",
        }
    }

    /// Discovery layout this event belongs to, if it can yield a locator.
    pub fn version(&self) -> Option<EventSchemaVersion> {
        match self {
            EventSchema::AgentRegistered | EventSchema::AgentUpdated => {
                Some(EventSchemaVersion::DirectFields)
            }
            EventSchema::Registered | EventSchema::UriUpdated => {
                Some(EventSchemaVersion::Registration)
            }
            EventSchema::MetadataSet => None,
        }
    }
}

/// A decoded identity registry log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEvent {
    /// Locator carried directly in the event.
    Direct {
        /// Event the log matched
        schema: EventSchema,
        /// Registry-assigned agent id
        agent_id: U256,
        /// Agent domain or URL
        locator: String,
        /// Agent account
        agent_address: Address,
    },

    /// Event names a registration document that has to be fetched.
    Registration {
        /// Event the log matched
        schema: EventSchema,
        /// Registry-assigned agent id
        agent_id: U256,
        /// Token URI of the registration document
        document_uri: String,
        /// Token owner
        owner: Address,
    },

    /// Metadata key write; nothing to store.
    MetadataUpdate {
        /// Agent whose metadata changed
        agent_id: U256,
        /// Metadata key written
        key: String,
    },

    /// Signature not in the catalogue.
    Ignored,
}

/// Log that matched a known signature but could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Log carried no topics at all.
    #[error("log has no topics")]
    MissingTopics,

    /// Topic count or payload did not match the event ABI.
    #[error("malformed {event} log: {source}")]
    Abi {
        /// Event the signature matched
        event: &'static str,
        /// ABI decoder error
        #[source]
        source: alloy::sol_types::Error,
    },
}

/// Decode one raw log.
pub fn decode_log(log: &RawLog) -> Result<IdentityEvent, DecodeError> {
    let Some(signature) = log.topics.first() else {
        return Err(DecodeError::MissingTopics);
    };

    let Some(schema) = EventSchema::from_signature(*signature) else {
        return Ok(IdentityEvent::Ignored);
    };

    let abi = |source| DecodeError::Abi {
        event: schema.name(),
        source,
    };
    let topics = log.topics.iter().copied();

    let event = match schema {
        EventSchema::AgentRegistered => {
            let e = AgentRegistered::decode_raw_log(topics, &log.data, true).map_err(abi)?;
            IdentityEvent::Direct {
                schema,
                agent_id: e.agentId,
                locator: e.agentDomain,
                agent_address: e.agentAddress,
            }
        }
        EventSchema::AgentUpdated => {
            let e = AgentUpdated::decode_raw_log(topics, &log.data, true).map_err(abi)?;
            IdentityEvent::Direct {
                schema,
                agent_id: e.agentId,
                locator: e.agentDomain,
                agent_address: e.agentAddress,
            }
        }
        EventSchema::Registered => {
            let e = Registered::decode_raw_log(topics, &log.data, true).map_err(abi)?;
            IdentityEvent::Registration {
                schema,
                agent_id: e.agentId,
                document_uri: e.tokenURI,
                owner: e.owner,
            }
        }
        EventSchema::UriUpdated => {
            let e = URIUpdated::decode_raw_log(topics, &log.data, true).map_err(abi)?;
            IdentityEvent::Registration {
                schema,
                agent_id: e.agentId,
                document_uri: e.newURI,
                owner: e.updatedBy,
            }
        }
        EventSchema::MetadataSet => {
            let e = MetadataSet::decode_raw_log(topics, &log.data, true).map_err(abi)?;
            IdentityEvent::MetadataUpdate {
                agent_id: e.agentId,
                key: e.key,
            }
        }
    };

    Ok(event)
}

/// Endpoint value of the first `endpoints` entry named `name`
/// (case-insensitive, trimmed). Empty endpoints count as absent.
pub fn find_endpoint(document: &Value, name: &str) -> Option<String> {
    document
        .get("endpoints")?
        .as_array()?
        .iter()
        .filter(|entry| {
            entry
                .get("name")
                .and_then(Value::as_str)
                .is_some_and(|n| n.trim().eq_ignore_ascii_case(name))
        })
        .find_map(|entry| {
            let endpoint = entry.get("endpoint")?.as_str()?.trim();
            (!endpoint.is_empty()).then(|| endpoint.to_string())
        })
}

/// The A2A endpoint of a registration document.
pub fn a2a_endpoint(document: &Value) -> Option<String> {
    find_endpoint(document, A2A_ENDPOINT_NAME)
}

/// Endpoints a registration document advertises. Only `a2a` leads to a
/// stored card; the others are reported when it is missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationEndpoints {
    /// Agent-to-agent endpoint
    pub a2a: Option<String>,

    /// Model Context Protocol endpoint
    pub mcp: Option<String>,

    /// Decentralized identifier
    pub did: Option<String>,
}

impl RegistrationEndpoints {
    /// Read every known endpoint from a registration document.
    pub fn from_document(document: &Value) -> Self {
        Self {
            a2a: a2a_endpoint(document),
            mcp: find_endpoint(document, MCP_ENDPOINT_NAME),
            did: find_endpoint(document, DID_ENDPOINT_NAME),
        }
    }
}

/// Turns registry logs into discoveries.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    fetcher: MetadataFetcher,
}

impl EventDecoder {
    /// Create a decoder that resolves registration documents with `fetcher`.
    pub fn new(fetcher: MetadataFetcher) -> Self {
        Self { fetcher }
    }

    /// Decode a log into a discovery, if it names an agent locator.
    ///
    /// Decode failures and unresolvable registrations are logged and yield
    /// `None`; they never propagate.
    pub async fn discover(&self, chain: &str, log: &RawLog) -> Option<DiscoveryEvent> {
        let block = log.block_number;

        let event = match decode_log(log) {
            Ok(event) => event,
            Err(DecodeError::MissingTopics) => {
                debug!(chain, block = ?block, "Skipping log without topics");
                return None;
            }
            Err(e) => {
                warn!(chain, block = ?block, error = %e, "Failed to decode registry log");
                return None;
            }
        };

        match event {
            IdentityEvent::Direct {
                schema,
                agent_id,
                locator,
                agent_address,
            } => {
                if locator.trim().is_empty() {
                    debug!(chain, %agent_id, event = schema.name(), "Event carries empty locator");
                    return None;
                }
                Some(DiscoveryEvent {
                    chain: chain.to_string(),
                    agent_id,
                    locator: locator.trim().to_string(),
                    owner_or_address: Some(agent_address),
                    schema: EventSchemaVersion::DirectFields,
                    block_number: block,
                })
            }
            IdentityEvent::Registration {
                schema,
                agent_id,
                document_uri,
                owner,
            } => {
                debug!(chain, %agent_id, event = schema.name(), uri = %document_uri, "Resolving registration document");
                let locator = self.resolve_registration(agent_id, &document_uri).await?;
                Some(DiscoveryEvent {
                    chain: chain.to_string(),
                    agent_id,
                    locator,
                    owner_or_address: Some(owner),
                    schema: EventSchemaVersion::Registration,
                    block_number: block,
                })
            }
            IdentityEvent::MetadataUpdate { agent_id, key } => {
                debug!(chain, %agent_id, key = %key, "Metadata updated");
                None
            }
            IdentityEvent::Ignored => {
                trace!(chain, block = ?block, "Ignoring unrecognized event");
                None
            }
        }
    }

    /// Fetch a registration document and return its A2A endpoint.
    pub async fn resolve_registration(&self, agent_id: U256, document_uri: &str) -> Option<String> {
        let document = match self.fetcher.fetch_document(document_uri).await {
            Ok(document) => document,
            Err(e) => {
                warn!(%agent_id, uri = %document_uri, error = %e, "Failed to fetch registration document");
                return None;
            }
        };

        let endpoints = RegistrationEndpoints::from_document(&document);
        if endpoints.a2a.is_none() {
            warn!(
                %agent_id,
                uri = %document_uri,
                mcp = ?endpoints.mcp,
                did = ?endpoints.did,
                "Registration document has no A2A endpoint"
            );
        }
        endpoints.a2a
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, Bytes, LogData};
    use axum::http::{StatusCode, Uri};
    use axum::response::IntoResponse;
    use axum::{Json, Router};
    use serde_json::json;
    use std::time::Duration;

    const AGENT: Address = address!("00000000000000000000000000000000000000aa");
    const OWNER: Address = address!("00000000000000000000000000000000000000bb");

    fn raw(data: LogData) -> RawLog {
        RawLog::new(Address::ZERO, data.topics().to_vec(), data.data.clone()).at_block(7)
    }

    fn decoder() -> EventDecoder {
        EventDecoder::new(MetadataFetcher::new(vec![], Duration::from_secs(2), 64 * 1024).unwrap())
    }

    #[test]
    fn test_decode_direct_fields() {
        let log = raw(AgentRegistered {
            agentId: U256::from(42u64),
            agentDomain: "alpha.example".to_string(),
            agentAddress: AGENT,
        }
        .encode_log_data());

        assert_eq!(
            decode_log(&log).unwrap(),
            IdentityEvent::Direct {
                schema: EventSchema::AgentRegistered,
                agent_id: U256::from(42u64),
                locator: "alpha.example".to_string(),
                agent_address: AGENT,
            }
        );

        let update = raw(AgentUpdated {
            agentId: U256::from(42u64),
            agentDomain: "beta.example".to_string(),
            agentAddress: AGENT,
        }
        .encode_log_data());
        assert!(matches!(
            decode_log(&update).unwrap(),
            IdentityEvent::Direct { schema: EventSchema::AgentUpdated, .. }
        ));
    }

    #[test]
    fn test_decode_registration() {
        let log = raw(Registered {
            agentId: U256::from(5u64),
            tokenURI: "ipfs://QmReg".to_string(),
            owner: OWNER,
        }
        .encode_log_data());

        assert_eq!(
            decode_log(&log).unwrap(),
            IdentityEvent::Registration {
                schema: EventSchema::Registered,
                agent_id: U256::from(5u64),
                document_uri: "ipfs://QmReg".to_string(),
                owner: OWNER,
            }
        );
        assert_eq!(
            EventSchema::Registered.version(),
            Some(EventSchemaVersion::Registration)
        );
    }

    #[test]
    fn test_decode_metadata_set() {
        let log = raw(MetadataSet {
            agentId: U256::from(5u64),
            indexedKey: B256::ZERO,
            key: "agentWallet".to_string(),
            value: Bytes::from_static(b"\x01"),
        }
        .encode_log_data());

        assert_eq!(
            decode_log(&log).unwrap(),
            IdentityEvent::MetadataUpdate {
                agent_id: U256::from(5u64),
                key: "agentWallet".to_string(),
            }
        );
        assert_eq!(EventSchema::MetadataSet.version(), None);
    }

    #[test]
    fn test_unknown_signature_is_ignored() {
        let log = RawLog::new(Address::ZERO, vec![B256::repeat_byte(0x11)], Bytes::new());
        assert_eq!(decode_log(&log).unwrap(), IdentityEvent::Ignored);
    }

    #[test]
    fn test_malformed_logs() {
        let empty = RawLog::new(Address::ZERO, vec![], Bytes::new());
        assert!(matches!(decode_log(&empty), Err(DecodeError::MissingTopics)));

        let truncated = RawLog::new(
            Address::ZERO,
            vec![AgentRegistered::SIGNATURE_HASH],
            Bytes::from_static(&[0u8; 3]),
        );
        assert!(matches!(
            decode_log(&truncated),
            Err(DecodeError::Abi { event: "AgentRegistered", .. })
        ));
    }

    #[test]
    fn test_schema_signatures_are_distinct() {
        for schema in EventSchema::ALL {
            assert_eq!(EventSchema::from_signature(schema.signature_hash()), Some(schema));
        }
    }

    #[test]
    fn test_a2a_endpoint() {
        let document = json!({
            "endpoints": [
                {"name": "MCP", "endpoint": "https://mcp.example"},
                {"name": " a2a ", "endpoint": ""},
                {"name": "A2A", "endpoint": " https://agent.example/a2a "}
            ]
        });
        assert_eq!(
            a2a_endpoint(&document).as_deref(),
            Some("https://agent.example/a2a")
        );
        assert_eq!(
            find_endpoint(&document, "mcp").as_deref(),
            Some("https://mcp.example")
        );

        assert_eq!(a2a_endpoint(&json!({"endpoints": []})), None);
        assert_eq!(a2a_endpoint(&json!({"endpoints": "A2A"})), None);
        assert_eq!(a2a_endpoint(&json!({})), None);
    }

    #[test]
    fn test_registration_endpoints() {
        let document = json!({
            "endpoints": [
                {"name": "MCP", "endpoint": "https://mcp.example"},
                {"name": "did", "endpoint": "did:web:agent.example"}
            ]
        });
        assert_eq!(
            RegistrationEndpoints::from_document(&document),
            RegistrationEndpoints {
                a2a: None,
                mcp: Some("https://mcp.example".to_string()),
                did: Some("did:web:agent.example".to_string()),
            }
        );

        assert_eq!(
            RegistrationEndpoints::from_document(&json!({})),
            RegistrationEndpoints::default()
        );
    }

    async fn registration_server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = Router::new().fallback(|uri: Uri| async move {
            match uri.path() {
                "/reg.json" => Json(json!({
                    "endpoints": [{"name": "A2A", "endpoint": "https://agent.example"}]
                }))
                .into_response(),
                "/no-a2a.json" => Json(json!({
                    "endpoints": [{"name": "MCP", "endpoint": "https://mcp.example"}]
                }))
                .into_response(),
                _ => StatusCode::NOT_FOUND.into_response(),
            }
        });
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_discover_direct_event() {
        let log = raw(AgentRegistered {
            agentId: U256::from(42u64),
            agentDomain: " alpha.example ".to_string(),
            agentAddress: AGENT,
        }
        .encode_log_data());

        let event = decoder().discover("sepolia", &log).await.unwrap();
        assert_eq!(event.chain, "sepolia");
        assert_eq!(event.agent_id, U256::from(42u64));
        assert_eq!(event.locator, "alpha.example");
        assert_eq!(event.owner_or_address, Some(AGENT));
        assert_eq!(event.schema, EventSchemaVersion::DirectFields);
        assert_eq!(event.block_number, Some(7));
    }

    #[tokio::test]
    async fn test_discover_registration_resolves_a2a() {
        let base = registration_server().await;
        let log = raw(Registered {
            agentId: U256::from(9u64),
            tokenURI: format!("{}/reg.json", base),
            owner: OWNER,
        }
        .encode_log_data());

        let event = decoder().discover("sepolia", &log).await.unwrap();
        assert_eq!(event.locator, "https://agent.example");
        assert_eq!(event.owner_or_address, Some(OWNER));
        assert_eq!(event.schema, EventSchemaVersion::Registration);
    }

    #[tokio::test]
    async fn test_discover_registration_without_a2a() {
        let base = registration_server().await;
        let decoder = decoder();

        let log = raw(Registered {
            agentId: U256::from(9u64),
            tokenURI: format!("{}/no-a2a.json", base),
            owner: OWNER,
        }
        .encode_log_data());
        assert!(decoder.discover("sepolia", &log).await.is_none());

        let missing = raw(URIUpdated {
            agentId: U256::from(9u64),
            newURI: format!("{}/gone.json", base),
            updatedBy: OWNER,
        }
        .encode_log_data());
        assert!(decoder.discover("sepolia", &missing).await.is_none());
    }

    #[tokio::test]
    async fn test_discover_skips_inert_and_unknown() {
        let decoder = decoder();

        let metadata = raw(MetadataSet {
            agentId: U256::from(1u64),
            indexedKey: B256::ZERO,
            key: "k".to_string(),
            value: Bytes::new(),
        }
        .encode_log_data());
        assert!(decoder.discover("sepolia", &metadata).await.is_none());

        let unknown = RawLog::new(Address::ZERO, vec![B256::repeat_byte(1)], Bytes::new());
        assert!(decoder.discover("sepolia", &unknown).await.is_none());

        let empty_locator = raw(AgentRegistered {
            agentId: U256::from(2u64),
            agentDomain: "".to_string(),
            agentAddress: AGENT,
        }
        .encode_log_data());
        assert!(decoder.discover("sepolia", &empty_locator).await.is_none());
    }
}
