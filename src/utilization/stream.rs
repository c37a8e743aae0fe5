//! Ref-counted, periodic, multicast utilization stream.
//!
//! While at least one [`UtilizationSubscription`] is alive, a single Tokio
//! task wakes up every interval, assembles one [`UtilizationSnapshot`] and
//! broadcasts the same `Arc` to every subscriber. Dropping the last
//! subscription stops the task; nothing runs while nobody is listening.
//!
//! ```text
//!   observe() ──► subscribers 0→1 ──► spawn ticker ──┐
//!                                                    │ every interval
//!                                     assemble() ◄───┘
//!                                         │
//!                        broadcast::Sender<Arc<UtilizationSnapshot>>
//!                         │              │               │
//!                   subscription   command view    pool view
//!
//!   drop(last subscription) ──► subscribers 1→0 ──► abort ticker
//! ```

use std::fmt;
use std::num::NonZeroU64;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, trace};

use crate::error::{Error, Result};
use crate::source::MetricsRegistry;

use super::assembler::assemble;
use super::{CommandUtilizationMap, ThreadPoolUtilizationMap, UtilizationSnapshot};

// ─── Configuration ───────────────────────────────────────────────

/// Only the newest tick is retained for a subscriber that falls behind.
const BROADCAST_CAPACITY: usize = 1;

// ─── Public types ────────────────────────────────────────────────

/// The ticking publisher.
///
/// Cheap to keep around: it does no work until [`observe`](Self::observe)
/// is called, and goes back to doing nothing once every subscription is
/// dropped. Reusable across any number of activation cycles.
pub struct UtilizationStream {
    shared: Arc<Shared>,
}

/// A live handle on the stream. Dropping it unsubscribes.
///
/// Yields every tick's snapshot from the moment it was created. A consumer
/// that cannot keep up skips to the latest tick instead of slowing the timer.
pub struct UtilizationSubscription {
    inner: BroadcastStream<Arc<UtilizationSnapshot>>,
    _guard: SubscriberGuard,
}

// ─── Internal state ──────────────────────────────────────────────

struct Shared {
    interval: Duration,
    registry: Arc<dyn MetricsRegistry>,
    /// Zero point for snapshot timestamps
    epoch: Instant,
    sender: broadcast::Sender<Arc<UtilizationSnapshot>>,
    active: AtomicBool,
    /// Bumped on every activation; a ticker from an older cycle stops itself.
    generation: AtomicU64,
    activation: Mutex<Activation>,
}

#[derive(Default)]
struct Activation {
    subscribers: usize,
    ticker: Option<JoinHandle<()>>,
}

struct SubscriberGuard {
    shared: Arc<Shared>,
}

// ─── UtilizationStream impl ──────────────────────────────────────

impl UtilizationStream {
    /// Build an inactive publisher sampling `registry` every `interval_ms`.
    pub fn new(interval_ms: u64, registry: Arc<dyn MetricsRegistry>) -> Result<Self> {
        let interval = NonZeroU64::new(interval_ms).ok_or(Error::InvalidInterval(interval_ms))?;
        Ok(Self::with_interval(interval, registry))
    }

    pub(crate) fn with_interval(interval_ms: NonZeroU64, registry: Arc<dyn MetricsRegistry>) -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                interval: Duration::from_millis(interval_ms.get()),
                registry,
                epoch: Instant::now(),
                sender,
                active: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                activation: Mutex::new(Activation::default()),
            }),
        }
    }

    /// Subscribe to the full snapshot stream.
    ///
    /// The first subscription starts the timer; the first snapshot arrives
    /// one interval later, never at subscribe time.
    ///
    /// # Panics
    ///
    /// Starting the timer spawns a task, so this must be called from within
    /// a Tokio runtime.
    pub fn observe(&self) -> UtilizationSubscription {
        let receiver = self.shared.subscribe();
        UtilizationSubscription {
            inner: BroadcastStream::new(receiver),
            _guard: SubscriberGuard {
                shared: Arc::clone(&self.shared),
            },
        }
    }

    /// Only the command map of each tick. Counts as a subscriber.
    pub fn observe_command_utilization(
        &self,
    ) -> impl Stream<Item = Arc<CommandUtilizationMap>> + Send + Unpin + 'static {
        self.observe()
            .map(|snapshot| Arc::clone(&snapshot.command_utilization))
    }

    /// Only the thread-pool map of each tick. Counts as a subscriber.
    pub fn observe_thread_pool_utilization(
        &self,
    ) -> impl Stream<Item = Arc<ThreadPoolUtilizationMap>> + Send + Unpin + 'static {
        self.observe()
            .map(|snapshot| Arc::clone(&snapshot.thread_pool_utilization))
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    pub fn interval_ms(&self) -> u64 {
        self.shared.interval.as_millis() as u64
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.activation.lock().subscribers
    }
}

impl fmt::Debug for UtilizationStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UtilizationStream")
            .field("interval_ms", &self.interval_ms())
            .field("active", &self.is_active())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

// ─── Shared impl ─────────────────────────────────────────────────

impl Shared {
    /// 0→1 starts the ticker. The receiver is created under the same lock,
    /// so it cannot miss the first tick of the cycle it started.
    fn subscribe(self: &Arc<Self>) -> broadcast::Receiver<Arc<UtilizationSnapshot>> {
        let mut activation = self.activation.lock();
        let receiver = self.sender.subscribe();
        activation.subscribers += 1;

        if activation.subscribers == 1 {
            let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
            let first_tick = Instant::now() + self.interval;
            activation.ticker = Some(tokio::spawn(
                Arc::clone(self).run_ticker(generation, first_tick),
            ));
            self.active.store(true, Ordering::Release);
            debug!(
                interval_ms = self.interval.as_millis() as u64,
                generation, "utilization stream activated"
            );
        }

        receiver
    }

    /// 1→0 stops the ticker. A tick already being broadcast completes.
    fn unsubscribe(&self) {
        let mut activation = self.activation.lock();
        activation.subscribers = activation.subscribers.saturating_sub(1);

        if activation.subscribers == 0 {
            if let Some(ticker) = activation.ticker.take() {
                ticker.abort();
            }
            if self.active.swap(false, Ordering::AcqRel) {
                debug!("utilization stream deactivated");
            }
        }
    }

    async fn run_ticker(self: Arc<Self>, generation: u64, first_tick: Instant) {
        let mut ticker = tokio::time::interval_at(first_tick, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let fired_at = ticker.tick().await;

            if self.generation.load(Ordering::Acquire) != generation
                || !self.active.load(Ordering::Acquire)
            {
                break;
            }

            let timestamp_ms =
                u64::try_from(fired_at.duration_since(self.epoch).as_millis()).unwrap_or(u64::MAX);

            match assemble(self.registry.as_ref(), timestamp_ms) {
                Ok(snapshot) => {
                    // Subscribers may have come and gone while assembling.
                    // Generation only moves under this lock, and send never blocks.
                    let activation = self.activation.lock();
                    if self.generation.load(Ordering::Acquire) != generation
                        || activation.subscribers == 0
                    {
                        debug!(timestamp_ms, generation, "dropping tick from a finished cycle");
                        break;
                    }
                    // Err only means nobody is listening right now.
                    let delivered = self.sender.send(Arc::new(snapshot)).unwrap_or(0);
                    drop(activation);
                    trace!(timestamp_ms, delivered, "utilization tick broadcast");
                }
                Err(e) => error!(timestamp_ms, error = %e, "utilization tick skipped"),
            }
        }
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.shared.unsubscribe();
    }
}

// ─── Subscription impl ───────────────────────────────────────────

impl Stream for UtilizationSubscription {
    type Item = Arc<UtilizationSnapshot>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(snapshot))) => return Poll::Ready(Some(snapshot)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    debug!(skipped, "subscriber lagged, skipping to latest tick");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl fmt::Debug for UtilizationSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UtilizationSubscription").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::source::{
        AtomicCommandMetrics, AtomicThreadPoolMetrics, CommandMetricsSource,
        InMemoryMetricsRegistry, ThreadPoolMetricsSource,
    };
    use std::sync::atomic::AtomicUsize;
    use tokio::time::{sleep, timeout};

    /// Counts assemblies; optionally fails enumeration on one of them.
    #[derive(Default)]
    struct CountingRegistry {
        inner: InMemoryMetricsRegistry,
        assemblies: AtomicUsize,
        fail_on: Option<usize>,
    }

    impl CountingRegistry {
        fn assemblies(&self) -> usize {
            self.assemblies.load(Ordering::SeqCst)
        }
    }

    impl MetricsRegistry for CountingRegistry {
        fn command_sources(
            &self,
        ) -> std::result::Result<Vec<Arc<dyn CommandMetricsSource>>, SourceError> {
            let n = self.assemblies.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on == Some(n) {
                return Err(SourceError::Enumeration(format!("planned failure {n}")));
            }
            self.inner.command_sources()
        }

        fn thread_pool_sources(
            &self,
        ) -> std::result::Result<Vec<Arc<dyn ThreadPoolMetricsSource>>, SourceError> {
            self.inner.thread_pool_sources()
        }
    }

    fn stream(interval_ms: u64) -> (UtilizationStream, Arc<CountingRegistry>) {
        let registry = Arc::new(CountingRegistry::default());
        registry
            .inner
            .register_command(Arc::new(AtomicCommandMetrics::new("CmdA")));
        registry
            .inner
            .register_thread_pool(Arc::new(AtomicThreadPoolMetrics::new("PoolX", 2, 4)));
        let stream = UtilizationStream::new(interval_ms, registry.clone()).unwrap();
        (stream, registry)
    }

    #[test]
    fn zero_interval_is_rejected() {
        let registry = Arc::new(InMemoryMetricsRegistry::new());
        let err = UtilizationStream::new(0, registry).unwrap_err();
        assert_eq!(err, Error::InvalidInterval(0));
    }

    #[tokio::test(start_paused = true)]
    async fn activation_follows_subscriber_count() {
        let (stream, _) = stream(100);
        assert!(!stream.is_active());

        let first = stream.observe();
        assert!(stream.is_active());
        let second = stream.observe();
        assert_eq!(stream.subscriber_count(), 2);

        drop(first);
        assert!(stream.is_active());
        drop(second);
        assert!(!stream.is_active());
        assert_eq!(stream.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_a_full_interval() {
        let (stream, registry) = stream(100);
        let mut sub = stream.observe();

        assert!(timeout(Duration::from_millis(99), sub.next()).await.is_err());
        assert_eq!(registry.assemblies(), 0);

        let snapshot = sub.next().await.unwrap();
        assert_eq!(snapshot.timestamp_ms, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_share_one_assembly_per_tick() {
        let (stream, registry) = stream(100);
        let mut subs = [stream.observe(), stream.observe(), stream.observe()];

        let mut timestamps = Vec::new();
        for _ in 0..3 {
            let first = subs[0].next().await.unwrap();
            for sub in &mut subs[1..] {
                let other = sub.next().await.unwrap();
                assert!(Arc::ptr_eq(&first, &other));
            }
            timestamps.push(first.timestamp_ms);
        }

        assert_eq!(timestamps, vec![100, 200, 300]);
        assert_eq!(registry.assemblies(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn no_assembly_after_last_unsubscribe() {
        let (stream, registry) = stream(100);
        let mut sub = stream.observe();
        sub.next().await.unwrap();
        drop(sub);

        assert!(!stream.is_active());
        let seen = registry.assemblies();
        sleep(Duration::from_secs(1)).await;
        assert_eq!(registry.assemblies(), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn reactivates_after_going_idle() {
        let (stream, registry) = stream(100);
        let mut sub = stream.observe();
        let before = sub.next().await.unwrap();
        drop(sub);

        sleep(Duration::from_millis(450)).await;
        let mut sub = stream.observe();
        assert!(stream.is_active());
        let after = sub.next().await.unwrap();

        assert_eq!(before.timestamp_ms, 100);
        assert_eq!(after.timestamp_ms, 650);
        assert_eq!(registry.assemblies(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn projections_see_the_same_tick() {
        let (stream, registry) = stream(100);
        let mut full = stream.observe();
        let mut commands = stream.observe_command_utilization();
        let mut pools = stream.observe_thread_pool_utilization();
        assert_eq!(stream.subscriber_count(), 3);

        let snapshot = full.next().await.unwrap();
        let command_map = commands.next().await.unwrap();
        let pool_map = pools.next().await.unwrap();

        assert!(Arc::ptr_eq(&command_map, &snapshot.command_utilization));
        assert!(Arc::ptr_eq(&pool_map, &snapshot.thread_pool_utilization));
        assert!(command_map.contains_key("CmdA"));
        assert!(pool_map.contains_key("PoolX"));
        assert_eq!(registry.assemblies(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn projection_alone_activates_the_stream() {
        let (stream, _) = stream(100);
        let mut pools = stream.observe_thread_pool_utilization();
        assert!(stream.is_active());

        assert!(pools.next().await.unwrap().contains_key("PoolX"));
        drop(pools);
        assert!(!stream.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_assembly_skips_only_that_tick() {
        let registry = Arc::new(CountingRegistry {
            fail_on: Some(2),
            ..CountingRegistry::default()
        });
        let stream = UtilizationStream::new(100, registry.clone()).unwrap();
        let mut sub = stream.observe();

        let first = sub.next().await.unwrap();
        let next = sub.next().await.unwrap();

        assert_eq!(first.timestamp_ms, 100);
        assert_eq!(next.timestamp_ms, 300);
        assert!(stream.is_active());
        assert_eq!(registry.assemblies(), 3);
    }

    /// Holds the first enumeration until released, keeping a tick mid-assembly.
    #[derive(Default)]
    struct GatedRegistry {
        inner: InMemoryMetricsRegistry,
        calls: AtomicUsize,
        entered: AtomicBool,
        released: AtomicBool,
    }

    impl MetricsRegistry for GatedRegistry {
        fn command_sources(
            &self,
        ) -> std::result::Result<Vec<Arc<dyn CommandMetricsSource>>, SourceError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.entered.store(true, Ordering::SeqCst);
                while !self.released.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
            self.inner.command_sources()
        }

        fn thread_pool_sources(
            &self,
        ) -> std::result::Result<Vec<Arc<dyn ThreadPoolMetricsSource>>, SourceError> {
            self.inner.thread_pool_sources()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn tick_from_previous_cycle_is_not_delivered() {
        let registry = Arc::new(GatedRegistry::default());
        registry
            .inner
            .register_command(Arc::new(AtomicCommandMetrics::new("CmdA")));
        let stream = UtilizationStream::new(200, registry.clone()).unwrap();

        let first = stream.observe();
        timeout(Duration::from_secs(2), async {
            while !registry.entered.load(Ordering::SeqCst) {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        drop(first);
        let activated_at = Instant::now();
        let mut second = stream.observe();
        registry.released.store(true, Ordering::SeqCst);

        assert!(timeout(Duration::from_millis(100), second.next()).await.is_err());

        let snapshot = timeout(Duration::from_secs(2), second.next())
            .await
            .unwrap()
            .unwrap();
        assert!(activated_at.elapsed() >= Duration::from_millis(200));
        assert!(snapshot.command("CmdA").is_some());
        assert_eq!(registry.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn lagging_subscriber_skips_to_latest() {
        let (stream, _) = stream(100);
        let mut fast = stream.observe();
        let mut slow = stream.observe();

        for _ in 0..3 {
            fast.next().await.unwrap();
        }

        let latest = slow.next().await.unwrap();
        assert_eq!(latest.timestamp_ms, 300);
    }
}
