//! Chain-side discovery: identity registry events, typed registry reads and
//! the per-chain watcher.
//!
//! This module provides:
//! - Chain client capability and its alloy implementation
//! - Event catalogue and decoding
//! - Typed identity registry reads per wire layout
//! - The per-chain watcher state machine and its supervisor

pub mod events;
pub mod provider;
pub mod registry;
pub mod supervisor;
pub mod watcher;

pub use events::{EventDecoder, IdentityEvent};
pub use provider::{AlloyChainClient, AlloyConnector, ChainClient, ChainConnector, RawLog};
pub use registry::{IdentityRegistry, RegistryLayout};
pub use supervisor::{BackoffPolicy, Supervisor};
pub use watcher::{ChainWatcher, Cursor, CursorStep, WatcherState};
