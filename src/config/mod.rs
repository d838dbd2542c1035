//! Spout configuration.
//!
//! One [`SpoutConfig`] drives a coordinator and every virtual spout under
//! it. Defaults match production cadence: a 2 s monitor sweep, 30 s state
//! flushes, and a 10 s shutdown drain deadline.

use crate::error::{Result, SidelineError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How long the coordinator monitor sleeps between sweeps of the pending
/// spout queue, in milliseconds.
pub const DEFAULT_MONITOR_INTERVAL_MS: u64 = 2000;

/// How often each virtual spout persists its offset state, in milliseconds.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 30_000;

/// How long `close()` waits for running spouts to drain before abandoning
/// the wait, in milliseconds.
pub const DEFAULT_MAX_STOP_WAIT_MS: u64 = 10_000;

/// Bound on the shared output queue between spout workers and the host.
pub const DEFAULT_OUTPUT_QUEUE_CAPACITY: usize = 10_000;

/// Bound on un-acked messages tracked per virtual spout.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 100_000;

/// Configuration for the spout coordinator and its virtual spouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpoutConfig {
    /// Commit-log broker addresses, `host:port`. Required to open a broker
    /// consumer. (`kafka.brokers`)
    pub brokers: Vec<String>,
    /// Consumer id prefix for virtual spouts created by sidelining.
    pub consumer_id_prefix: String,
    /// Monitor sweep interval in milliseconds.
    pub monitor_interval_ms: u64,
    /// Offset flush interval in milliseconds.
    pub flush_interval_ms: u64,
    /// Shutdown drain deadline in milliseconds.
    pub max_stop_wait_ms: u64,
    /// Capacity of the bounded output queue.
    pub output_queue_capacity: usize,
    /// Maximum un-acked messages tracked per spout before polling pauses.
    pub max_in_flight: usize,
    /// Durable state store settings.
    pub persistence: PersistenceConfig,
}

impl Default for SpoutConfig {
    fn default() -> Self {
        Self {
            brokers: Vec::new(),
            consumer_id_prefix: "sideline".to_string(),
            monitor_interval_ms: DEFAULT_MONITOR_INTERVAL_MS,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            max_stop_wait_ms: DEFAULT_MAX_STOP_WAIT_MS,
            output_queue_capacity: DEFAULT_OUTPUT_QUEUE_CAPACITY,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            persistence: PersistenceConfig::default(),
        }
    }
}

impl SpoutConfig {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn max_stop_wait(&self) -> Duration {
        Duration::from_millis(self.max_stop_wait_ms)
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.brokers.is_empty() {
            return Err(SidelineError::config("at least one broker is required"));
        }
        if self.output_queue_capacity == 0 {
            return Err(SidelineError::config(
                "output queue capacity must be greater than zero",
            ));
        }
        if self.max_in_flight == 0 {
            return Err(SidelineError::config(
                "max in-flight must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Durable state store settings.
///
/// `root` is the path prefix under which consumer state and sideline
/// requests are stored; a missing root is an illegal state at manager open.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Store endpoints, `host:port`. (`persistence.zk.servers`)
    #[serde(default)]
    pub servers: Vec<String>,
    /// Required path prefix under which state is stored.
    /// (`persistence.zk.root`)
    #[serde(default)]
    pub root: Option<PathBuf>,
}

impl PersistenceConfig {
    /// The configured root, or an illegal-state error when absent.
    pub fn require_root(&self) -> Result<&PathBuf> {
        self.root.as_ref().ok_or_else(|| {
            SidelineError::illegal_state("persistence root is not configured")
        })
    }
}
