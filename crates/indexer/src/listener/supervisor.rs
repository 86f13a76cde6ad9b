//! Watcher supervision.

use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::watcher::{ChainWatcher, SessionEnd, WatcherState};

/// Exponential restart delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl BackoffPolicy {
    /// Start at `initial`, doubling per failure up to `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            next: initial,
        }
    }

    /// Delay before the next restart; advances the policy.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }

    /// Back to the initial delay.
    pub fn reset(&mut self) {
        self.next = self.initial;
    }

    /// A session that ran at least this long counts as healthy.
    pub fn healthy_after(&self) -> Duration {
        self.max
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(3), Duration::from_secs(60))
    }
}

/// Restarts a chain watcher's sessions until cancellation or a fatal error.
pub struct Supervisor {
    watcher: ChainWatcher,
    policy: BackoffPolicy,
}

impl Supervisor {
    /// Supervise `watcher` with `policy`.
    pub fn new(watcher: ChainWatcher, policy: BackoffPolicy) -> Self {
        Self { watcher, policy }
    }

    /// Run until cancelled or the watcher fails fatally.
    ///
    /// Returns the watcher so callers can inspect its final state.
    pub async fn run(mut self, cancel: CancellationToken) -> ChainWatcher {
        let chain = self.watcher.chain().name.clone();

        loop {
            let started = Instant::now();

            match self.watcher.run_session(&cancel).await {
                SessionEnd::Cancelled => {
                    info!(chain = %chain, "Watcher stopped");
                    break;
                }
                SessionEnd::Fatal(e) => {
                    error!(
                        chain = %chain,
                        error = %format!("{:#}", e),
                        "Watcher stopped, chain continues with backfill and reconcile only"
                    );
                    break;
                }
                SessionEnd::Interrupted(e) => {
                    if started.elapsed() >= self.policy.healthy_after() {
                        self.policy.reset();
                    }
                    let delay = self.policy.next_delay();

                    warn!(
                        chain = %chain,
                        error = %format!("{:#}", e),
                        delay_ms = delay.as_millis() as u64,
                        "Watcher session interrupted, reconnecting after backoff"
                    );

                    self.watcher.set_state(WatcherState::Backoff);
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            self.watcher.set_state(WatcherState::Stopped);
                            break;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.watcher
    }
}
