//! Owner of the shared publisher.
//!
//! A `StreamRegistry` is an ordinary value: build one around a
//! [`MetricsRegistry`] and pass it to whoever needs the stream. Hosts that
//! want a single process-wide handle can [`install_global`] one at startup.
//!
//! [`install_global`]: StreamRegistry::install_global

use std::num::NonZeroU64;
use std::sync::{Arc, OnceLock};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::source::MetricsRegistry;

use super::stream::UtilizationStream;

/// Interval the shared publisher uses unless configured otherwise.
pub const DEFAULT_INTERVAL_MS: u64 = 500;

const DEFAULT_INTERVAL: NonZeroU64 = match NonZeroU64::new(DEFAULT_INTERVAL_MS) {
    Some(interval) => interval,
    None => panic!("DEFAULT_INTERVAL_MS must be non-zero"),
};

static GLOBAL: OnceLock<StreamRegistry> = OnceLock::new();

pub struct StreamRegistry {
    metrics: Arc<dyn MetricsRegistry>,
    default_interval_ms: NonZeroU64,
    shared: OnceLock<Arc<UtilizationStream>>,
}

impl StreamRegistry {
    pub fn new(metrics: Arc<dyn MetricsRegistry>) -> Self {
        Self {
            metrics,
            default_interval_ms: DEFAULT_INTERVAL,
            shared: OnceLock::new(),
        }
    }

    /// Override the shared publisher's interval. Only possible before the
    /// registry is built, so the interval can never change after first use.
    pub fn with_default_interval(mut self, interval_ms: u64) -> Result<Self> {
        self.default_interval_ms =
            NonZeroU64::new(interval_ms).ok_or(Error::InvalidInterval(interval_ms))?;
        Ok(self)
    }

    /// The shared publisher, created on first call.
    pub fn singleton(&self) -> Arc<UtilizationStream> {
        let stream = self.shared.get_or_init(|| {
            debug!(
                interval_ms = self.default_interval_ms.get(),
                "creating shared utilization stream"
            );
            Arc::new(UtilizationStream::with_interval(
                self.default_interval_ms,
                Arc::clone(&self.metrics),
            ))
        });
        Arc::clone(stream)
    }

    /// An independent publisher: own timer, own subscribers, own activation.
    /// Leaves the shared publisher untouched.
    pub fn new_instance(&self, interval_ms: u64) -> Result<UtilizationStream> {
        UtilizationStream::new(interval_ms, Arc::clone(&self.metrics))
    }

    pub fn default_interval_ms(&self) -> u64 {
        self.default_interval_ms.get()
    }

    /// Make this registry the process-wide one. Fails if one is installed.
    pub fn install_global(self) -> Result<&'static StreamRegistry> {
        GLOBAL
            .set(self)
            .map_err(|_| Error::GlobalAlreadyInstalled)?;
        info!("global utilization stream registry installed");
        GLOBAL.get().ok_or(Error::GlobalAlreadyInstalled)
    }

    pub fn global() -> Option<&'static StreamRegistry> {
        GLOBAL.get()
    }
}
