//! Bounded polling for the dev server inside a sandbox.
//!
//! The poller ticks at a fixed interval up to a fixed ceiling. Each tick asks
//! the probe whether the port is listening and, failing that, inspects the
//! tail of the process log for a ready or fatal phrase. The wait never exceeds
//! the ceiling: probe calls are bounded by the same deadline.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::types::DevServerConfig;

/// Log phrases meaning the server is up.
const READY_PHRASES: &[&str] = &["Local:", "ready in"];

/// Log phrases meaning the server will not come up.
const FATAL_PHRASES: &[&str] = &["Error:", "EADDRINUSE", "failed"];

/// What the poller asks of the sandbox each tick.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Whether something listens on the dev server port
    async fn port_listening(&self) -> bool;

    /// Last lines of the dev server log ("" when unavailable)
    async fn recent_log(&self) -> String;
}

/// Which check confirmed readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadySignal {
    Port,
    Log,
}

/// Outcome of a readiness wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Readiness {
    Ready {
        signal: ReadySignal,
        tick: u32,
        elapsed_ms: u64,
    },
    /// A fatal phrase showed up in the log
    Failed { tick: u32, log: String },
    /// The ceiling elapsed without a verdict
    TimedOut { elapsed_ms: u64 },
    Cancelled,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Fixed-interval, fixed-ceiling readiness loop.
#[derive(Debug, Clone)]
pub struct ReadinessPoller {
    interval: Duration,
    ceiling: Duration,
    ready_phrases: Vec<String>,
    fatal_phrases: Vec<String>,
}

impl ReadinessPoller {
    pub fn new(interval: Duration, ceiling: Duration) -> Self {
        Self {
            interval,
            ceiling,
            ready_phrases: READY_PHRASES.iter().map(|s| s.to_string()).collect(),
            fatal_phrases: FATAL_PHRASES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Poller for the configured dev server; `localhost:<port>` also counts as ready.
    pub fn for_dev_server(config: &DevServerConfig) -> Self {
        let mut poller = Self::new(config.poll_interval(), config.ready_timeout());
        poller.ready_phrases.push(format!("localhost:{}", config.port));
        poller
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    fn max_ticks(&self) -> u32 {
        if self.interval.is_zero() {
            return 1;
        }
        (self.ceiling.as_millis() / self.interval.as_millis()).max(1) as u32
    }

    /// When tick `tick` runs its checks.
    fn tick_at(&self, start: Instant, tick: u32) -> Instant {
        let last_start = start + self.ceiling.saturating_sub(self.interval / 2);
        (start + self.interval * tick).min(last_start)
    }

    /// Poll until ready, failed, timed out or cancelled.
    pub async fn wait(&self, probe: &dyn ReadinessProbe, cancel: &CancellationToken) -> Readiness {
        let start = Instant::now();
        let deadline = start + self.ceiling;

        for tick in 1..=self.max_ticks() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(tick, "Readiness wait cancelled");
                    return Readiness::Cancelled;
                }
                _ = sleep_until(self.tick_at(start, tick)) => {}
            }

            let elapsed_ms = start.elapsed().as_millis() as u64;

            let listening = tokio::select! {
                _ = cancel.cancelled() => return Readiness::Cancelled,
                r = timeout_at(deadline, probe.port_listening()) => r.unwrap_or(false),
            };
            if listening {
                info!(tick, elapsed_ms, "Dev server is listening");
                return Readiness::Ready {
                    signal: ReadySignal::Port,
                    tick,
                    elapsed_ms,
                };
            }

            let log = tokio::select! {
                _ = cancel.cancelled() => return Readiness::Cancelled,
                r = timeout_at(deadline, probe.recent_log()) => r.unwrap_or_default(),
            };
            debug!(tick, elapsed_ms, log = %log.trim(), "Dev server log");

            if self.ready_phrases.iter().any(|p| log.contains(p.as_str())) {
                info!(tick, elapsed_ms, "Dev server startup detected in logs");
                return Readiness::Ready {
                    signal: ReadySignal::Log,
                    tick,
                    elapsed_ms,
                };
            }

            if self.fatal_phrases.iter().any(|p| log.contains(p.as_str())) {
                warn!(tick, elapsed_ms, log = %log.trim(), "Dev server startup error detected");
                return Readiness::Failed { tick, log };
            }

            if Instant::now() >= deadline {
                break;
            }
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        warn!(elapsed_ms, "Dev server did not become ready within timeout");
        Readiness::TimedOut { elapsed_ms }
    }
}
