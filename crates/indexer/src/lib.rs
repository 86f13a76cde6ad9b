//! ERC-8004 agent discovery for agentdex.
//!
//! This crate provides:
//! - Per-chain watchers over identity registry events (subscription with
//!   polling fallback, supervised restarts)
//! - Event decoding for both registry event layouts
//! - Agent card retrieval over HTTPS, IPFS gateways and data URIs
//! - One-shot registry backfill
//! - Seed crawling and placeholder reconciliation
//! - SQLite storage of agent records
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  agentdex-indexer                            │
//! │                                              │
//! │  per chain:                                  │
//! │  ┌──────────────┐   ┌──────────────┐         │
//! │  │ ChainWatcher │   │  Backfiller  │ ← RPC   │
//! │  │ (supervised) │   │  (one-shot)  │         │
//! │  └──────┬───────┘   └──────┬───────┘         │
//! │         │                  │                 │
//! │  every tick:               │                 │
//! │  ┌──────────────┐  ┌───────┴──────┐          │
//! │  │ SeedCrawler  │→ │  Reconciler  │          │
//! │  └──────┬───────┘  └──────┬───────┘          │
//! │         │                 │                  │
//! │      ┌──▼─────────────────▼──┐               │
//! │      │  Ingestor             │ ← HTTPS/IPFS  │
//! │      │  (fetch card, upsert) │   agent cards │
//! │      └──────────┬────────────┘               │
//! │                 │                            │
//! │          ┌──────▼──────┐                     │
//! │          │  Storage    │ ← SQLite            │
//! │          │  (agents)   │                     │
//! │          └─────────────┘                     │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The [`coordinator::Coordinator`] wires these together and owns the single
//! cancellation token every task observes.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backfill;
pub mod config;
pub mod coordinator;
pub mod ingest;
pub mod listener;
pub mod metadata;
pub mod reconcile;
pub mod seeds;
pub mod storage;

// Re-export common types
pub use agentdex_core::*;
