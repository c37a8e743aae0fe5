//! In-process reference implementations of the source traits.
//!
//! A host that already has its own command/pool bookkeeping implements the
//! traits directly; everything else (the demo binary, tests, small services)
//! can register these atomic counters instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::{
    CommandKey, CommandMetricsSource, MetricsRegistry, RawCommandCounters, RawThreadPoolCounters,
    ThreadPoolKey, ThreadPoolMetricsSource,
};
use crate::error::SourceError;

// ─── Registry ────────────────────────────────────────────────────

/// Keyed set of live sources. Registering an existing key replaces it.
#[derive(Default)]
pub struct InMemoryMetricsRegistry {
    commands: RwLock<HashMap<CommandKey, Arc<dyn CommandMetricsSource>>>,
    thread_pools: RwLock<HashMap<ThreadPoolKey, Arc<dyn ThreadPoolMetricsSource>>>,
}

impl InMemoryMetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the source previously registered under the same key, if any.
    pub fn register_command(
        &self,
        source: Arc<dyn CommandMetricsSource>,
    ) -> Option<Arc<dyn CommandMetricsSource>> {
        let key = source.command_key().clone();
        debug!(command = %key, "registering command metrics");
        self.commands.write().insert(key, source)
    }

    pub fn deregister_command(&self, key: &str) -> bool {
        self.commands.write().remove(key).is_some()
    }

    pub fn register_thread_pool(
        &self,
        source: Arc<dyn ThreadPoolMetricsSource>,
    ) -> Option<Arc<dyn ThreadPoolMetricsSource>> {
        let key = source.thread_pool_key().clone();
        debug!(thread_pool = %key, "registering thread-pool metrics");
        self.thread_pools.write().insert(key, source)
    }

    pub fn deregister_thread_pool(&self, key: &str) -> bool {
        self.thread_pools.write().remove(key).is_some()
    }

    pub fn command_count(&self) -> usize {
        self.commands.read().len()
    }

    pub fn thread_pool_count(&self) -> usize {
        self.thread_pools.read().len()
    }
}

impl MetricsRegistry for InMemoryMetricsRegistry {
    // The read lock is held only long enough to clone the `Arc`s.
    fn command_sources(&self) -> Result<Vec<Arc<dyn CommandMetricsSource>>, SourceError> {
        Ok(self.commands.read().values().cloned().collect())
    }

    fn thread_pool_sources(&self) -> Result<Vec<Arc<dyn ThreadPoolMetricsSource>>, SourceError> {
        Ok(self.thread_pools.read().values().cloned().collect())
    }
}

// ─── Atomic command metrics ──────────────────────────────────────

/// Lock-free live counters for one command.
///
/// Gauges saturate at zero, so unbalanced `mark_*` calls never produce
/// negative readings.
#[derive(Debug)]
pub struct AtomicCommandMetrics {
    key: CommandKey,
    concurrent_executions: AtomicI64,
    queued: AtomicI64,
    rejected: AtomicI64,
}

impl AtomicCommandMetrics {
    pub fn new(key: impl Into<CommandKey>) -> Self {
        Self {
            key: key.into(),
            concurrent_executions: AtomicI64::new(0),
            queued: AtomicI64::new(0),
            rejected: AtomicI64::new(0),
        }
    }

    pub fn mark_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Execution begins. Pass `from_queue` when the call was waiting first.
    pub fn mark_started(&self, from_queue: bool) {
        if from_queue {
            saturating_decrement(&self.queued);
        }
        self.concurrent_executions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_finished(&self) {
        saturating_decrement(&self.concurrent_executions);
    }

    /// The call was turned away before executing (bulkhead full, circuit open).
    pub fn mark_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }
}

impl CommandMetricsSource for AtomicCommandMetrics {
    fn command_key(&self) -> &CommandKey {
        &self.key
    }

    fn counters(&self) -> Result<RawCommandCounters, SourceError> {
        Ok(RawCommandCounters {
            concurrent_executions: self.concurrent_executions.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        })
    }
}

// ─── Atomic thread-pool metrics ──────────────────────────────────

/// Lock-free live counters for one thread pool.
///
/// `pool_size` tracks the high-water mark of active threads, clamped between
/// the core and maximum sizes, the way a growing executor would report it.
#[derive(Debug)]
pub struct AtomicThreadPoolMetrics {
    key: ThreadPoolKey,
    core_pool_size: i64,
    max_pool_size: i64,
    active_threads: AtomicI64,
    pool_size: AtomicI64,
    queue_size: AtomicI64,
}

impl AtomicThreadPoolMetrics {
    pub fn new(key: impl Into<ThreadPoolKey>, core_pool_size: u32, max_pool_size: u32) -> Self {
        let core = i64::from(core_pool_size);
        let max = i64::from(max_pool_size.max(core_pool_size));
        Self {
            key: key.into(),
            core_pool_size: core,
            max_pool_size: max,
            active_threads: AtomicI64::new(0),
            pool_size: AtomicI64::new(core),
            queue_size: AtomicI64::new(0),
        }
    }

    pub fn mark_task_queued(&self) {
        self.queue_size.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_task_dequeued(&self) {
        saturating_decrement(&self.queue_size);
    }

    pub fn mark_thread_active(&self) {
        let active = self.active_threads.fetch_add(1, Ordering::Relaxed) + 1;
        self.pool_size
            .fetch_max(active.min(self.max_pool_size), Ordering::Relaxed);
    }

    pub fn mark_thread_idle(&self) {
        saturating_decrement(&self.active_threads);
    }
}

impl ThreadPoolMetricsSource for AtomicThreadPoolMetrics {
    fn thread_pool_key(&self) -> &ThreadPoolKey {
        &self.key
    }

    fn counters(&self) -> Result<RawThreadPoolCounters, SourceError> {
        Ok(RawThreadPoolCounters {
            active_threads: self.active_threads.load(Ordering::Relaxed),
            queue_size: self.queue_size.load(Ordering::Relaxed),
            core_pool_size: self.core_pool_size,
            pool_size: self.pool_size.load(Ordering::Relaxed),
            max_pool_size: self.max_pool_size,
        })
    }
}

fn saturating_decrement(counter: &AtomicI64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        (v > 0).then(|| v - 1)
    });
}
