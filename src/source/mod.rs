//! Inbound contract: the live command and thread-pool metrics this crate
//! samples. The circuit-breaker runtime owns the counters; this crate only
//! reads them through the traits below.

pub mod memory;

pub use memory::{AtomicCommandMetrics, AtomicThreadPoolMetrics, InMemoryMetricsRegistry};

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::SourceError;

// ─── Keys ────────────────────────────────────────────────────────

macro_rules! string_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(name: impl Into<String>) -> Self {
                Self(name.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                Self::new(name)
            }
        }

        impl From<String> for $name {
            fn from(name: String) -> Self {
                Self(name)
            }
        }

        // Lets `map["CmdA"]` work on snapshot maps.
        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_key!(
    /// Stable name of one circuit-breaker command.
    CommandKey
);

string_key!(
    /// Stable name of one bulkhead thread pool.
    ThreadPoolKey
);

// ─── Raw counters ────────────────────────────────────────────────

/// Counters exactly as a command source reports them.
///
/// Signed on purpose: the values come from outside this crate and the
/// sampler is the one place that decides whether they make sense.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawCommandCounters {
    pub concurrent_executions: i64,
    pub queued: i64,
    pub rejected: i64,
}

/// Counters exactly as a thread-pool source reports them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawThreadPoolCounters {
    pub active_threads: i64,
    pub queue_size: i64,
    pub core_pool_size: i64,
    pub pool_size: i64,
    pub max_pool_size: i64,
}

// ─── Source traits ───────────────────────────────────────────────

/// Read-only view of one command's live metrics.
pub trait CommandMetricsSource: Send + Sync {
    fn command_key(&self) -> &CommandKey;

    /// Read the current counters. Must not mutate anything.
    fn counters(&self) -> Result<RawCommandCounters, SourceError>;
}

/// Read-only view of one thread pool's live metrics.
pub trait ThreadPoolMetricsSource: Send + Sync {
    fn thread_pool_key(&self) -> &ThreadPoolKey;

    fn counters(&self) -> Result<RawThreadPoolCounters, SourceError>;
}

/// Enumerates whatever commands and pools are live right now.
///
/// Called once per tick. Implementations should hand back a cheap copy of
/// their current membership rather than hold a lock while the caller samples.
pub trait MetricsRegistry: Send + Sync {
    fn command_sources(&self) -> Result<Vec<Arc<dyn CommandMetricsSource>>, SourceError>;

    fn thread_pool_sources(&self) -> Result<Vec<Arc<dyn ThreadPoolMetricsSource>>, SourceError>;
}
