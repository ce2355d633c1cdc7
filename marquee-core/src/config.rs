use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Global knobs for the scraping task-execution core.
///
/// All fields carry defaults so deployments can adopt individual settings
/// without supplying a full configuration payload.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    /// Worker pool sizing and deadlines.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Timeout/retry policy applied to upstream fetches.
    #[serde(default)]
    pub fetch: FetchPolicy,
    /// Upstream hosts consulted by the streaming-source runners.
    #[serde(default)]
    pub upstreams: UpstreamConfig,
}

/// Sizing and deadline settings for the persistent worker pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of persistent worker units. Fixed for the pool lifetime.
    pub size: usize,
    /// Wall-clock budget a task may occupy a worker before the unit is
    /// forcibly terminated. Starts at dispatch, not at enqueue.
    pub task_deadline_ms: u64,
    /// Optional bound on backlog wait. A task queued longer than this
    /// settles as a timeout without ever being dispatched. `None` preserves
    /// dispatch-time-only deadlines.
    #[serde(default)]
    pub max_queue_wait_ms: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 4,
            task_deadline_ms: 30_000,
            max_queue_wait_ms: None,
        }
    }
}

impl PoolConfig {
    pub fn task_deadline(&self) -> Duration {
        Duration::from_millis(self.task_deadline_ms)
    }

    pub fn max_queue_wait(&self) -> Option<Duration> {
        self.max_queue_wait_ms.map(Duration::from_millis)
    }
}

/// Timeout and retry policy for a single upstream fetch.
///
/// Every call starts its own fresh retry budget; there is no circuit
/// breaking across calls.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FetchPolicy {
    /// Per-attempt timeout. The in-flight request is aborted on expiry.
    pub timeout_ms: u64,
    /// Additional attempts after the first, so `max_retries + 1` total.
    pub max_retries: u32,
    /// Unit of linear backoff: attempt n waits `backoff_unit * n` first.
    pub backoff_unit_ms: u64,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_retries: 2,
            backoff_unit_ms: 1_000,
        }
    }
}

impl FetchPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }
}

/// Upstream streaming hosts the source runners consult.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// URL templates with a `{tmdb_id}` placeholder, tried in order.
    pub hosts: Vec<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            hosts: vec![
                "https://vidsrc.example/embed/movie/{tmdb_id}".to_string(),
                "https://superembed.example/e/{tmdb_id}".to_string(),
            ],
        }
    }
}
