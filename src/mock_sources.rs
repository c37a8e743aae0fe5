use std::sync::Arc;

use tracing::info;
use utilization_stream::{AtomicCommandMetrics, AtomicThreadPoolMetrics, InMemoryMetricsRegistry};

// ─── Name pools ──────────────────────────────────────────────────

static COMMANDS: &[&str] = &[
    "GetUser",
    "CreateSession",
    "ListProducts",
    "ChargeCard",
    "SendEmail",
    "ResolveAddress",
    "FetchInventory",
    "RenderInvoice",
];

static POOLS: &[&str] = &["UserService", "PaymentGateway", "Notifications", "Catalog"];

/// Core / max thread counts handed to every simulated pool.
const CORE_POOL_SIZE: u32 = 4;
const MAX_POOL_SIZE: u32 = 10;

// ─── Public types ────────────────────────────────────────────────

/// A command together with the pool it executes on.
pub struct SimulatedCommand {
    pub metrics: Arc<AtomicCommandMetrics>,
    pub pool: Arc<AtomicThreadPoolMetrics>,
}

pub struct SimulatedSources {
    pub commands: Vec<SimulatedCommand>,
}

// ─── Seeding ─────────────────────────────────────────────────────

/// Register `commands` commands spread round-robin over `pools` pools.
///
/// Names repeat with a numeric suffix once the name pools run out.
pub fn seed(registry: &InMemoryMetricsRegistry, commands: usize, pools: usize) -> SimulatedSources {
    let pools: Vec<Arc<AtomicThreadPoolMetrics>> = (0..pools.max(1))
        .map(|i| {
            let pool = Arc::new(AtomicThreadPoolMetrics::new(
                name(POOLS, i),
                CORE_POOL_SIZE,
                MAX_POOL_SIZE,
            ));
            registry.register_thread_pool(pool.clone());
            pool
        })
        .collect();

    let commands: Vec<SimulatedCommand> = (0..commands)
        .map(|i| {
            let metrics = Arc::new(AtomicCommandMetrics::new(name(COMMANDS, i)));
            registry.register_command(metrics.clone());
            SimulatedCommand {
                metrics,
                pool: Arc::clone(&pools[i % pools.len()]),
            }
        })
        .collect();

    info!(
        commands = registry.command_count(),
        thread_pools = registry.thread_pool_count(),
        "seeded simulated metrics sources"
    );

    SimulatedSources { commands }
}

fn name(pool: &[&str], i: usize) -> String {
    let base = pool[i % pool.len()];
    match i / pool.len() {
        0 => base.to_owned(),
        round => format!("{base}{}", round + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_stay_unique_past_the_pool() {
        let names: Vec<String> = (0..10).map(|i| name(COMMANDS, i)).collect();
        assert_eq!(names[0], "GetUser");
        assert_eq!(names[8], "GetUser2");
        assert_eq!(names[9], "CreateSession2");
    }

    #[test]
    fn seeds_round_robin_over_pools() {
        let registry = InMemoryMetricsRegistry::new();
        let sources = seed(&registry, 5, 2);

        assert_eq!(registry.command_count(), 5);
        assert_eq!(registry.thread_pool_count(), 2);
        assert!(Arc::ptr_eq(&sources.commands[0].pool, &sources.commands[2].pool));
        assert!(!Arc::ptr_eq(&sources.commands[0].pool, &sources.commands[1].pool));
    }
}
