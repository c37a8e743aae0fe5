use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use utilization_stream::ThreadPoolMetricsSource;

use crate::mock_sources::{SimulatedCommand, SimulatedSources};

/// Share of executions that wait in the pool queue first.
const QUEUED_PCT: u8 = 20;

// ─── Public entry point ──────────────────────────────────────────

/// Spawns `concurrency` Tokio tasks that simulate command executions until
/// the deadline or the `running` flag is set to false.
pub async fn run(
    running: Arc<AtomicBool>,
    sources: Arc<SimulatedSources>,
    concurrency: u32,
    duration_secs: u64,
) {
    let deadline = Instant::now() + Duration::from_secs(duration_secs);
    info!(concurrency, duration_secs, "load generator started");

    let mut handles = Vec::with_capacity(concurrency as usize);

    for worker_id in 0..concurrency {
        let running = running.clone();
        let sources = sources.clone();

        handles.push(tokio::spawn(async move {
            worker(worker_id, running, sources, deadline).await;
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    running.store(false, Ordering::SeqCst);
    info!("load generator finished");
}

// ─── Worker loop ─────────────────────────────────────────────────

async fn worker(id: u32, running: Arc<AtomicBool>, sources: Arc<SimulatedSources>, deadline: Instant) {
    // Each worker gets its own deterministic RNG seeded uniquely.
    let mut rng = StdRng::seed_from_u64(1000 + u64::from(id));

    while running.load(Ordering::Relaxed) && Instant::now() < deadline {
        let idx = rng.gen_range(0..sources.commands.len());
        execute(&mut rng, &sources.commands[idx]).await;

        tokio::time::sleep(Duration::from_millis(rng.gen_range(1..=10))).await;
    }

    debug!(worker = id, "load worker stopped");
}

// ─── One simulated execution ─────────────────────────────────────

async fn execute(rng: &mut StdRng, command: &SimulatedCommand) {
    let SimulatedCommand { metrics, pool } = command;

    // Bulkhead full: turn the call away.
    if pool_is_full(command) {
        metrics.mark_rejected();
        return;
    }

    let queued = rng.gen_range(0u8..100) < QUEUED_PCT;
    if queued {
        metrics.mark_queued();
        pool.mark_task_queued();
        tokio::time::sleep(Duration::from_millis(rng.gen_range(1..=20))).await;
        pool.mark_task_dequeued();
    }

    metrics.mark_started(queued);
    pool.mark_thread_active();

    tokio::time::sleep(Duration::from_millis(rng.gen_range(5..=80))).await;

    pool.mark_thread_idle();
    metrics.mark_finished();
}

fn pool_is_full(command: &SimulatedCommand) -> bool {
    command
        .pool
        .counters()
        .map(|c| c.active_threads >= c.max_pool_size)
        .unwrap_or(false)
}
