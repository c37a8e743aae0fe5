use tracing::{debug, warn};

use crate::error::AssemblyError;
use crate::source::MetricsRegistry;

use super::sampler::{sample_command, sample_thread_pool};
use super::{CommandUtilizationMap, ThreadPoolUtilizationMap, UtilizationSnapshot};

/// Build one snapshot from whatever the registry holds right now.
///
/// A source that fails to read is left out of this snapshot only. Failing to
/// enumerate either kind of source fails the whole call, and the publisher
/// skips the tick.
pub fn assemble(
    registry: &dyn MetricsRegistry,
    timestamp_ms: u64,
) -> Result<UtilizationSnapshot, AssemblyError> {
    let command_sources = registry.command_sources().map_err(AssemblyError::Commands)?;
    let pool_sources = registry
        .thread_pool_sources()
        .map_err(AssemblyError::ThreadPools)?;

    // ── Commands ────────────────────────────────────────────────
    let mut commands = CommandUtilizationMap::with_capacity(command_sources.len());
    for source in &command_sources {
        let key = source.command_key();
        match sample_command(source.as_ref()) {
            Ok(utilization) => {
                if commands.insert(key.clone(), utilization).is_some() {
                    debug!(command = %key, "duplicate command key, keeping last sample");
                }
            }
            Err(e) => warn!(command = %key, error = %e, "skipping command this tick"),
        }
    }

    // ── Thread pools ────────────────────────────────────────────
    let mut pools = ThreadPoolUtilizationMap::with_capacity(pool_sources.len());
    for source in &pool_sources {
        let key = source.thread_pool_key();
        match sample_thread_pool(source.as_ref()) {
            Ok(utilization) => {
                if pools.insert(key.clone(), utilization).is_some() {
                    debug!(thread_pool = %key, "duplicate thread-pool key, keeping last sample");
                }
            }
            Err(e) => warn!(thread_pool = %key, error = %e, "skipping thread pool this tick"),
        }
    }

    Ok(UtilizationSnapshot::new(timestamp_ms, commands, pools))
}
