pub mod assembler;
pub mod registry;
pub mod sampler;
pub mod stream;

pub use assembler::assemble;
pub use registry::{StreamRegistry, DEFAULT_INTERVAL_MS};
pub use sampler::{sample_command, sample_thread_pool};
pub use stream::{UtilizationStream, UtilizationSubscription};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::source::{CommandKey, ThreadPoolKey};

pub type CommandUtilizationMap = HashMap<CommandKey, CommandUtilization>;
pub type ThreadPoolUtilizationMap = HashMap<ThreadPoolKey, PoolUtilization>;

/// Utilization of one command at the moment it was sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommandUtilization {
    /// Executions currently in flight
    pub concurrent_executions: u32,
    /// Calls waiting for a slot
    pub queued: u32,
    /// Calls turned away since the command was registered
    pub rejected: u64,
}

/// Utilization of one thread pool at the moment it was sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolUtilization {
    pub active_threads: u32,
    pub queue_size: u32,
    pub core_pool_size: u32,
    pub pool_size: u32,
    pub max_pool_size: u32,
}

impl PoolUtilization {
    /// Fraction of the maximum pool size that is busy, `0.0` for an empty pool.
    pub fn saturation(&self) -> f64 {
        if self.max_pool_size == 0 {
            return 0.0;
        }
        f64::from(self.active_threads) / f64::from(self.max_pool_size)
    }
}

/// One tick's worth of utilization, shared read-only with every subscriber.
///
/// The maps sit behind `Arc` so the projection streams can hand out the
/// exact map the full snapshot carries.
#[derive(Debug, Clone, Serialize)]
pub struct UtilizationSnapshot {
    /// Milliseconds since the owning publisher was created (monotonic)
    pub timestamp_ms: u64,
    /// Wall-clock time the snapshot was assembled, after every source was read
    pub captured_at: DateTime<Utc>,
    pub command_utilization: Arc<CommandUtilizationMap>,
    pub thread_pool_utilization: Arc<ThreadPoolUtilizationMap>,
}

impl UtilizationSnapshot {
    pub fn new(
        timestamp_ms: u64,
        command_utilization: CommandUtilizationMap,
        thread_pool_utilization: ThreadPoolUtilizationMap,
    ) -> Self {
        Self {
            timestamp_ms,
            captured_at: Utc::now(),
            command_utilization: Arc::new(command_utilization),
            thread_pool_utilization: Arc::new(thread_pool_utilization),
        }
    }

    pub fn command(&self, key: &str) -> Option<&CommandUtilization> {
        self.command_utilization.get(key)
    }

    pub fn thread_pool(&self, key: &str) -> Option<&PoolUtilization> {
        self.thread_pool_utilization.get(key)
    }

    /// Total in-flight executions across every command.
    pub fn total_concurrent_executions(&self) -> u64 {
        self.command_utilization
            .values()
            .map(|c| u64::from(c.concurrent_executions))
            .sum()
    }
}
