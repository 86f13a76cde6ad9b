//! # agentdex core
//!
//! Domain types shared by the agentdex indexer components.
//!
//! ## Features
//!
//! - **Ethereum Types**: Alloy primitives for addresses and `uint256` agent ids
//! - **Record Keys**: confirmed agents keyed by id, placeholders keyed by locator
//! - **Locators**: parsing of domain / URL / `ipfs://` locators, well-known
//!   agent card URLs and storage-stable locator keys
//! - **Constants**: well-known path, placeholder and seed labels

#![warn(missing_docs)]

pub mod constants;
pub mod error;
pub mod locator;
pub mod types;

// Re-export commonly used items
pub use constants::*;
pub use error::{CoreError, Result};
pub use locator::{slugify, with_well_known_path, Locator};
pub use types::*;

// Re-export Alloy primitives for convenience
pub use alloy_primitives::{Address, B256, U256};
