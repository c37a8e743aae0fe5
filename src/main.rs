use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use utilization_stream::{
    InMemoryMetricsRegistry, StreamRegistry, ThreadPoolUtilizationMap, UtilizationSubscription,
};

mod config;
mod load_generator;
mod mock_sources;

use config::{ConfigError, DemoConfig};

/// Pools busier than this are called out by the pool watcher.
const SATURATION_WARN: f64 = 0.8;

#[derive(Debug, Error)]
enum DemoError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Stream(#[from] utilization_stream::Error),
}

#[tokio::main]
async fn main() -> Result<(), DemoError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = DemoConfig::parse();
    config.validate()?;

    // ── 1. Register simulated commands and pools ─────────────────
    let metrics = Arc::new(InMemoryMetricsRegistry::new());
    let sources = Arc::new(mock_sources::seed(&metrics, config.commands, config.pools));

    // ── 2. Install the process-wide stream registry ──────────────
    let streams = StreamRegistry::new(metrics)
        .with_default_interval(config.interval_ms)?
        .install_global()?;
    let stream = streams.singleton();
    info!(
        interval_ms = stream.interval_ms(),
        active = stream.is_active(),
        "utilization stream ready"
    );

    // ── 3. Start simulated traffic ───────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let mut load = tokio::spawn(load_generator::run(
        running.clone(),
        sources,
        config.concurrency,
        config.duration_secs,
    ));

    // ── 4. Attach subscribers ────────────────────────────────────
    let mut consumers = Vec::with_capacity(config.subscribers + 1);
    for id in 0..config.subscribers {
        consumers.push(tokio::spawn(consume(id, stream.observe(), config.json)));
    }
    consumers.push(tokio::spawn(watch_pools(
        stream.observe_thread_pool_utilization(),
    )));
    info!(
        active = stream.is_active(),
        subscribers = stream.subscriber_count(),
        "sampling"
    );

    // ── 5. Run until the load finishes or Ctrl-C ─────────────────
    tokio::select! {
        _ = &mut load => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, stopping load");
            running.store(false, Ordering::SeqCst);
            let _ = load.await;
        }
    }

    // ── 6. Detach everyone; sampling stops with the last one ─────
    for consumer in consumers {
        consumer.abort();
        let _ = consumer.await;
    }
    info!(active = stream.is_active(), "all subscribers detached");

    Ok(())
}

async fn consume(id: usize, mut ticks: UtilizationSubscription, json: bool) {
    while let Some(snapshot) = ticks.next().await {
        if json {
            match serde_json::to_string(snapshot.as_ref()) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(subscriber = id, error = %e, "failed to encode snapshot"),
            }
            continue;
        }

        info!(
            subscriber = id,
            timestamp_ms = snapshot.timestamp_ms,
            commands = snapshot.command_utilization.len(),
            thread_pools = snapshot.thread_pool_utilization.len(),
            in_flight = snapshot.total_concurrent_executions(),
            "tick"
        );
    }
}

async fn watch_pools(mut pools: impl Stream<Item = Arc<ThreadPoolUtilizationMap>> + Unpin) {
    while let Some(map) = pools.next().await {
        for (key, pool) in map.iter() {
            if pool.saturation() >= SATURATION_WARN {
                warn!(
                    thread_pool = %key,
                    active = pool.active_threads,
                    max = pool.max_pool_size,
                    queued = pool.queue_size,
                    "thread pool near saturation"
                );
            }
        }
    }
}
