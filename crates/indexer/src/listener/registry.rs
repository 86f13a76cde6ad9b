//! Typed reads against an ERC-8004 identity registry.
//!
//! Deployed registries expose one of two read layouts; the layout is declared
//! per chain in configuration and each has its own decode path.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::provider::ChainClient;

sol! {
    /// Agent tuple returned by `agent_info` registries.
    #[derive(Debug, PartialEq, Eq)]
    struct AgentInfo {
        uint256 agentId;
        string agentDomain;
        address agentAddress;
    }

    /// Read surface of the identity registries the indexer understands.
    interface IIdentityRegistry {
        function getAgentCount() external view returns (uint256 count);
        function getAgent(uint256 agentId) external view returns (AgentInfo memory info);
        function resolveByDomain(string agentDomain) external view returns (AgentInfo memory info);
        function totalSupply() external view returns (uint256 supply);
        function tokenURI(uint256 tokenId) external view returns (string uri);
    }
}

/// Read layout of an identity registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryLayout {
    /// `getAgentCount` / `getAgent` / `resolveByDomain`.
    #[default]
    AgentInfo,

    /// ERC-721 style `totalSupply` / `tokenURI`, no reverse lookup.
    TokenUri,
}

impl fmt::Display for RegistryLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryLayout::AgentInfo => f.write_str("agent_info"),
            RegistryLayout::TokenUri => f.write_str("token_uri"),
        }
    }
}

/// What a registry returned for one agent id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentLocator {
    /// Locator of the agent card itself.
    Card(String),

    /// URI of a registration document that names the card endpoint.
    Registration(String),
}

impl AgentLocator {
    /// The raw string, whichever kind it is.
    pub fn as_str(&self) -> &str {
        match self {
            AgentLocator::Card(s) | AgentLocator::Registration(s) => s,
        }
    }

    /// Whether the registry returned nothing usable.
    pub fn is_empty(&self) -> bool {
        self.as_str().trim().is_empty()
    }
}

/// Identity registry bound to a chain client.
#[derive(Clone)]
pub struct IdentityRegistry {
    client: Arc<dyn ChainClient>,
    address: Address,
    layout: RegistryLayout,
}

impl IdentityRegistry {
    /// Bind a registry address with its declared layout.
    pub fn new(client: Arc<dyn ChainClient>, address: Address, layout: RegistryLayout) -> Self {
        Self {
            client,
            address,
            layout,
        }
    }

    /// Registry contract address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Declared layout.
    pub fn layout(&self) -> RegistryLayout {
        self.layout
    }

    /// Whether locators can be mapped back to agent ids.
    pub fn supports_reverse_lookup(&self) -> bool {
        matches!(self.layout, RegistryLayout::AgentInfo)
    }

    /// Number of registered agents (ids are `1..=count`).
    pub async fn agent_count(&self) -> Result<U256> {
        match self.layout {
            RegistryLayout::AgentInfo => {
                let ret = self
                    .read(IIdentityRegistry::getAgentCountCall {})
                    .await
                    .context("getAgentCount failed")?;
                Ok(ret.count)
            }
            RegistryLayout::TokenUri => {
                let ret = self
                    .read(IIdentityRegistry::totalSupplyCall {})
                    .await
                    .context("totalSupply failed")?;
                Ok(ret.supply)
            }
        }
    }

    /// Locator registered for one agent id.
    pub async fn agent_locator(&self, agent_id: U256) -> Result<AgentLocator> {
        match self.layout {
            RegistryLayout::AgentInfo => {
                let ret = self
                    .read(IIdentityRegistry::getAgentCall { agentId: agent_id })
                    .await
                    .with_context(|| format!("getAgent({}) failed", agent_id))?;
                Ok(AgentLocator::Card(ret.info.agentDomain))
            }
            RegistryLayout::TokenUri => {
                let ret = self
                    .read(IIdentityRegistry::tokenURICall { tokenId: agent_id })
                    .await
                    .with_context(|| format!("tokenURI({}) failed", agent_id))?;
                Ok(AgentLocator::Registration(ret.uri))
            }
        }
    }

    /// Reverse lookup of a locator to its agent id.
    ///
    /// `Ok(None)` when the registry knows no agent for it (zero id) or the
    /// layout has no reverse lookup.
    pub async fn resolve_by_domain(&self, locator: &str) -> Result<Option<U256>> {
        if !self.supports_reverse_lookup() {
            return Ok(None);
        }

        let ret = self
            .read(IIdentityRegistry::resolveByDomainCall {
                agentDomain: locator.to_string(),
            })
            .await
            .with_context(|| format!("resolveByDomain({}) failed", locator))?;

        let id = ret.info.agentId;
        Ok((!id.is_zero()).then_some(id))
    }

    async fn read<C: SolCall>(&self, call: C) -> Result<C::Return> {
        let output = self
            .client
            .call(self.address, Bytes::from(call.abi_encode()))
            .await?;

        C::abi_decode_returns(&output, true)
            .with_context(|| format!("Failed to decode {} output", C::SIGNATURE))
    }
}
