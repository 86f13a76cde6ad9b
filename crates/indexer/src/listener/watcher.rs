//! Live discovery for one chain.
//!
//! A watcher session moves through:
//!
//! ```text
//! Connecting ──subscribe ok──────────▶ Subscribed ──stream error/end──▶ (Interrupted)
//!     │
//!     ├──subscriptions unsupported──▶ Polling ──head read fails──▶ (Interrupted)
//!     │
//!     └──any other error────────────▶ (Fatal) on the first connect,
//!                                      (Interrupted) once a session has run
//! ```
//!
//! Cancellation ends a session from any state. Interrupted sessions are
//! restarted by the [`Supervisor`](super::supervisor::Supervisor) after a
//! backoff delay; fatal ones are not.

use anyhow::{anyhow, Result};
use futures_util::StreamExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::provider::{is_subscription_unsupported, ChainClient, LogStream, RawLog};
use crate::ingest::{ChainContext, Ingestor, LogOutcome};

/// Where a watcher currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Opening a log subscription.
    Connecting,

    /// Streaming logs from a live subscription.
    Subscribed,

    /// Reading heads and log ranges on an interval.
    Polling,

    /// Waiting out a restart delay.
    Backoff,

    /// Cancelled or failed fatally.
    Stopped,
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WatcherState::Connecting => "connecting",
            WatcherState::Subscribed => "subscribed",
            WatcherState::Polling => "polling",
            WatcherState::Backoff => "backoff",
            WatcherState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// How a watcher session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// Cancellation observed; do not restart.
    Cancelled,

    /// Transient failure; restart after backoff.
    Interrupted(anyhow::Error),

    /// Unrecoverable failure; the chain is left to backfill and reconcile.
    Fatal(anyhow::Error),
}

/// Last block whose logs the polling path has processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    position: u64,
}

/// What a new head means for the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStep {
    /// Head unchanged.
    Idle,

    /// Head went backwards; the skipped range is not replayed.
    Reorg {
        /// Cursor position before the reset
        from: u64,
        /// New head the cursor was reset to
        to: u64,
    },

    /// New blocks to process.
    Advance {
        /// First unprocessed block
        from: u64,
        /// Current head, inclusive
        to: u64,
    },
}

impl Cursor {
    /// Start at `head`.
    pub fn new(head: u64) -> Self {
        Self { position: head }
    }

    /// Current position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Compare a fresh head against the cursor.
    ///
    /// A reorg resets the cursor immediately. An advance leaves it alone
    /// until [`Cursor::commit`] is called for the processed blocks.
    pub fn observe(&mut self, head: u64) -> CursorStep {
        if head < self.position {
            let from = self.position;
            self.position = head;
            CursorStep::Reorg { from, to: head }
        } else if head == self.position {
            CursorStep::Idle
        } else {
            CursorStep::Advance {
                from: self.position + 1,
                to: head,
            }
        }
    }

    /// Mark every block up to `block` as processed. Never moves backwards.
    pub fn commit(&mut self, block: u64) {
        self.position = self.position.max(block);
    }
}

/// Split `from..=to` into inclusive ranges of at most `limit` blocks.
pub fn block_ranges(from: u64, to: u64, limit: u64) -> Vec<(u64, u64)> {
    let limit = limit.max(1);
    let mut ranges = Vec::new();
    let mut start = from;

    while start <= to {
        let end = start.saturating_add(limit - 1).min(to);
        ranges.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }

    ranges
}

/// Per-chain live watcher.
pub struct ChainWatcher {
    chain: ChainContext,
    client: Arc<dyn ChainClient>,
    ingestor: Ingestor,
    poll_interval: Duration,
    log_range_limit: u64,
    state: WatcherState,
    cursor: Option<Cursor>,
    connected: bool,
}

impl ChainWatcher {
    /// Create a watcher for one chain's identity registry.
    pub fn new(
        chain: ChainContext,
        client: Arc<dyn ChainClient>,
        ingestor: Ingestor,
        poll_interval: Duration,
        log_range_limit: u64,
    ) -> Self {
        Self {
            chain,
            client,
            ingestor,
            poll_interval,
            log_range_limit,
            state: WatcherState::Connecting,
            cursor: None,
            connected: false,
        }
    }

    /// Chain being watched.
    pub fn chain(&self) -> &ChainContext {
        &self.chain
    }

    /// Current state.
    pub fn state(&self) -> WatcherState {
        self.state
    }

    /// Polling cursor, once polling has started.
    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor
    }

    pub(crate) fn set_state(&mut self, state: WatcherState) {
        if self.state != state {
            debug!(chain = %self.chain.name, from = %self.state, to = %state, "Watcher state change");
            self.state = state;
        }
    }

    /// Whether any session has reached the node (subscribed or polling).
    pub fn has_connected(&self) -> bool {
        self.connected
    }

    /// Run one session: connect, then stream or poll until it ends.
    ///
    /// A subscribe error other than "unsupported" is fatal only before the
    /// first successful connect. Afterwards it interrupts the session.
    pub async fn run_session(&mut self, cancel: &CancellationToken) -> SessionEnd {
        self.set_state(WatcherState::Connecting);

        let subscribed = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.client.subscribe_logs(self.chain.registry) => Some(result),
        };
        let Some(subscribed) = subscribed else {
            return self.cancelled();
        };

        match subscribed {
            Ok(stream) => {
                info!(chain = %self.chain.name, registry = %self.chain.registry, "Subscribed to identity registry logs");
                self.connected = true;
                self.set_state(WatcherState::Subscribed);
                self.run_subscribed(stream, cancel).await
            }
            Err(e) if is_subscription_unsupported(&e) => {
                info!(
                    chain = %self.chain.name,
                    interval_secs = self.poll_interval.as_secs(),
                    "Subscriptions unsupported, falling back to polling"
                );
                self.connected = true;
                self.set_state(WatcherState::Polling);
                self.run_polling(cancel).await
            }
            Err(e) if self.connected => SessionEnd::Interrupted(e),
            Err(e) => {
                self.set_state(WatcherState::Stopped);
                SessionEnd::Fatal(e)
            }
        }
    }

    async fn run_subscribed(&mut self, mut stream: LogStream, cancel: &CancellationToken) -> SessionEnd {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return self.cancelled(),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(log)) => {
                    if !self.dispatch(&log, cancel).await {
                        return self.cancelled();
                    }
                }
                Some(Err(e)) => return SessionEnd::Interrupted(e),
                None => return SessionEnd::Interrupted(anyhow!("log subscription closed")),
            }
        }
    }

    async fn run_polling(&mut self, cancel: &CancellationToken) -> SessionEnd {
        let started = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.start_cursor() => Some(result),
        };
        match started {
            None => return self.cancelled(),
            Some(Err(e)) => return SessionEnd::Interrupted(e),
            Some(Ok(_)) => {}
        }

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await; // First tick completes immediately, skip it

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return self.cancelled(),
                _ = interval.tick() => {}
            }

            if let Err(e) = self.poll_once(cancel).await {
                warn!(chain = %self.chain.name, error = %format!("{:#}", e), "Polling failed, retrying next tick");
            }
        }
    }

    /// Record the current head as the polling cursor.
    pub async fn start_cursor(&mut self) -> Result<u64> {
        let head = self.client.current_block_number().await?;
        self.cursor = Some(Cursor::new(head));
        info!(chain = %self.chain.name, head, "Polling from current head");
        Ok(head)
    }

    /// One polling step: read the head and process any new blocks.
    ///
    /// On error the cursor stays at the last fully processed range.
    pub async fn poll_once(&mut self, cancel: &CancellationToken) -> Result<CursorStep> {
        let Some(mut cursor) = self.cursor else {
            self.start_cursor().await?;
            return Ok(CursorStep::Idle);
        };

        let head = self.client.current_block_number().await?;
        let step = cursor.observe(head);
        self.cursor = Some(cursor);

        let (from, to) = match step {
            CursorStep::Idle => return Ok(step),
            CursorStep::Reorg { from, to } => {
                warn!(chain = %self.chain.name, from, to, "Head moved backwards, resetting cursor without replay");
                return Ok(step);
            }
            CursorStep::Advance { from, to } => (from, to),
        };

        for (start, end) in block_ranges(from, to, self.log_range_limit) {
            let mut logs = self
                .client
                .filter_logs(self.chain.registry, start, end)
                .await?;
            logs.sort_by_key(|log| (log.block_number, log.log_index));

            debug!(chain = %self.chain.name, start, end, logs = logs.len(), "Fetched registry logs");

            for log in &logs {
                if !self.dispatch(log, cancel).await {
                    return Ok(step);
                }
            }

            cursor.commit(end);
            self.cursor = Some(cursor);
        }

        Ok(step)
    }

    /// Hand one log to the ingest path. Returns `false` if cancelled first.
    async fn dispatch(&self, log: &RawLog, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return false,
            outcome = self.ingestor.handle_log(&self.chain, log) => outcome,
        };

        match outcome {
            Ok(LogOutcome::Stored { agent_id, key }) => {
                debug!(chain = %self.chain.name, %agent_id, key = %key, block = ?log.block_number, "Log ingested");
            }
            Ok(LogOutcome::Ignored) | Ok(LogOutcome::Unfetchable { .. }) => {}
            Err(e) => {
                warn!(chain = %self.chain.name, block = ?log.block_number, error = %format!("{:#}", e), "Failed to store discovered agent");
            }
        }

        true
    }

    fn cancelled(&mut self) -> SessionEnd {
        self.set_state(WatcherState::Stopped);
        SessionEnd::Cancelled
    }
}
