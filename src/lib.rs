//! Periodic, ref-counted utilization sampling for circuit-breaker commands
//! and thread pools.
//!
//! A [`UtilizationStream`] samples every live command and thread pool once
//! per interval, but only while someone is subscribed, and broadcasts one
//! shared [`UtilizationSnapshot`] per tick to all subscribers.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_stream::StreamExt;
//! use utilization_stream::{AtomicCommandMetrics, InMemoryMetricsRegistry, StreamRegistry};
//!
//! # async fn demo() {
//! let metrics = Arc::new(InMemoryMetricsRegistry::new());
//! metrics.register_command(Arc::new(AtomicCommandMetrics::new("GetUser")));
//!
//! let streams = StreamRegistry::new(metrics);
//! let mut ticks = streams.singleton().observe();
//! if let Some(snapshot) = ticks.next().await {
//!     println!("{:?}", snapshot.command("GetUser"));
//! }
//! # }
//! ```

pub mod error;
pub mod source;
pub mod utilization;

pub use error::{AssemblyError, Error, Result, SourceError};
pub use source::{
    AtomicCommandMetrics, AtomicThreadPoolMetrics, CommandKey, CommandMetricsSource,
    InMemoryMetricsRegistry, MetricsRegistry, RawCommandCounters, RawThreadPoolCounters,
    ThreadPoolKey, ThreadPoolMetricsSource,
};
pub use utilization::{
    assemble, sample_command, sample_thread_pool, CommandUtilization, CommandUtilizationMap,
    PoolUtilization, StreamRegistry, ThreadPoolUtilizationMap, UtilizationSnapshot,
    UtilizationStream, UtilizationSubscription, DEFAULT_INTERVAL_MS,
};
