use crate::error::SourceError;
use crate::source::{CommandMetricsSource, ThreadPoolMetricsSource};

use super::{CommandUtilization, PoolUtilization};

/// Reduce one command source to its utilization record.
///
/// Reads the counters once; no timer or publisher involved.
pub fn sample_command(source: &dyn CommandMetricsSource) -> Result<CommandUtilization, SourceError> {
    let raw = source.counters()?;
    let key = source.command_key().as_str();

    Ok(CommandUtilization {
        concurrent_executions: gauge(key, "concurrent_executions", raw.concurrent_executions)?,
        queued: gauge(key, "queued", raw.queued)?,
        rejected: counter(key, "rejected", raw.rejected)?,
    })
}

/// Reduce one thread-pool source to its utilization record.
pub fn sample_thread_pool(source: &dyn ThreadPoolMetricsSource) -> Result<PoolUtilization, SourceError> {
    let raw = source.counters()?;
    let key = source.thread_pool_key().as_str();

    Ok(PoolUtilization {
        active_threads: gauge(key, "active_threads", raw.active_threads)?,
        queue_size: gauge(key, "queue_size", raw.queue_size)?,
        core_pool_size: gauge(key, "core_pool_size", raw.core_pool_size)?,
        pool_size: gauge(key, "pool_size", raw.pool_size)?,
        max_pool_size: gauge(key, "max_pool_size", raw.max_pool_size)?,
    })
}

/// Negative readings are malformed; oversized ones clamp to `u32::MAX`.
fn gauge(key: &str, name: &'static str, value: i64) -> Result<u32, SourceError> {
    let value = counter(key, name, value)?;
    Ok(u32::try_from(value).unwrap_or(u32::MAX))
}

fn counter(key: &str, name: &'static str, value: i64) -> Result<u64, SourceError> {
    u64::try_from(value).map_err(|_| SourceError::Malformed {
        key: key.to_owned(),
        counter: name,
        value,
    })
}
