//! Canonical constants shared by every agentdex component.

/// Relative path at which an agent serves its agent card.
pub const WELL_KNOWN_AGENT_CARD_PATH: &str = "/.well-known/agent-card.json";

/// URI scheme of content-addressed locators.
pub const IPFS_SCHEME: &str = "ipfs://";

/// Suffix marking a locator key derived from a content hash.
pub const CONTENT_ADDRESSED_KEY_SUFFIX: &str = ".ipfs";

/// Number of CID characters kept in a content-addressed locator key.
pub const CONTENT_KEY_PREFIX_LEN: usize = 16;

/// Storage key prefix of placeholder records (agent id 0).
pub const PLACEHOLDER_KEY_PREFIX: &str = "placeholder:";

/// Chain label given to records discovered without any chain context.
pub const DEFAULT_SEED_CHAIN: &str = "default";

/// Name of the registration endpoint that carries the agent card locator.
pub const A2A_ENDPOINT_NAME: &str = "A2A";

/// Registration endpoint name of a Model Context Protocol server.
pub const MCP_ENDPOINT_NAME: &str = "MCP";

/// Registration endpoint name of a decentralized identifier.
pub const DID_ENDPOINT_NAME: &str = "DID";
