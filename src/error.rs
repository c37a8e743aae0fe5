use thiserror::Error;

// ─── Source errors ───────────────────────────────────────────────

/// Failure reading one metrics source, or enumerating the registry.
///
/// Raised by the samplers and by [`MetricsRegistry`] implementations.
/// A per-source failure only ever costs that key its slot in the current
/// snapshot; it is never surfaced on the stream.
///
/// [`MetricsRegistry`]: crate::source::MetricsRegistry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The source could not be read at all this tick.
    #[error("metrics source `{key}` unavailable: {reason}")]
    Unavailable { key: String, reason: String },

    /// The source answered, but a counter holds an impossible value.
    #[error("metrics source `{key}` reported malformed `{counter}` = {value}")]
    Malformed {
        key: String,
        counter: &'static str,
        value: i64,
    },

    /// Listing the live sources failed.
    #[error("failed to enumerate metrics sources: {0}")]
    Enumeration(String),
}

// ─── Assembly errors ─────────────────────────────────────────────

/// A whole tick could not be assembled. The publisher skips the tick and
/// keeps its schedule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    #[error("command enumeration failed: {0}")]
    Commands(#[source] SourceError),

    #[error("thread-pool enumeration failed: {0}")]
    ThreadPools(#[source] SourceError),
}

// ─── Crate-level errors ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Publishers need a non-zero sampling interval.
    #[error("sampling interval must be at least 1 ms, got {0} ms")]
    InvalidInterval(u64),

    /// [`StreamRegistry::install_global`] was called twice.
    ///
    /// [`StreamRegistry::install_global`]: crate::StreamRegistry::install_global
    #[error("a global stream registry is already installed")]
    GlobalAlreadyInstalled,
}

pub type Result<T> = std::result::Result<T, Error>;
