//! Adaptive per-source timeouts
//!
//! The tracker keeps a bounded history of successful response times for every
//! source and derives connect/read/total timeouts from latency percentiles, so a
//! slow-but-healthy site gets patience while a fast one fails quickly.

use crate::config::duration_serde;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Connect, read and total timeouts applied to one request
///
/// `total` is always at least `connect + read`; constructors raise it when needed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Time allowed to establish the connection
    #[serde(with = "duration_serde")]
    pub connect: Duration,
    /// Time allowed to read the response body once headers arrived
    #[serde(with = "duration_serde")]
    pub read: Duration,
    /// Upper bound for the whole request
    #[serde(with = "duration_serde")]
    pub total: Duration,
}

impl TimeoutConfig {
    /// Build a timeout set, raising `total` to `connect + read` if it is smaller
    pub fn new(connect: Duration, read: Duration, total: Duration) -> Self {
        Self {
            connect,
            read,
            total: total.max(connect + read),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(10),
            Duration::from_secs(30),
            Duration::from_secs(60),
        )
    }
}

/// Latency percentiles for one source (nearest-rank)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LatencyPercentiles {
    /// Median
    pub p50: Duration,
    /// 95th percentile
    pub p95: Duration,
    /// 99th percentile
    pub p99: Duration,
    /// Number of samples the percentiles were computed from
    pub samples: usize,
}

/// Per-source response time history and timeout recommendations
#[derive(Debug)]
pub struct TimeoutTracker {
    capacity: usize,
    default: TimeoutConfig,
    min_samples: usize,
    adaptive: bool,
    inner: Mutex<TrackerState>,
}

#[derive(Debug, Default)]
struct TrackerState {
    history: HashMap<String, VecDeque<Duration>>,
    overrides: HashMap<String, TimeoutConfig>,
}

impl TimeoutTracker {
    /// Create a tracker
    ///
    /// * `capacity` - samples kept per source (oldest dropped first)
    /// * `default` - timeouts used when nothing better is known
    /// * `min_samples` - samples `resolve` needs before trusting a recommendation
    pub fn new(capacity: usize, default: TimeoutConfig, min_samples: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            default,
            min_samples,
            adaptive: true,
            inner: Mutex::new(TrackerState::default()),
        }
    }

    /// Build a tracker from the timeout section of the configuration
    pub fn from_settings(settings: &crate::config::TimeoutSettings) -> Self {
        let mut tracker = Self::new(
            settings.history_capacity,
            settings.default,
            settings.min_samples,
        );
        tracker.adaptive = settings.adaptive;
        tracker
    }

    /// Append a successful call's duration to the source's history
    pub fn record(&self, source: &str, duration: Duration) {
        let mut state = self.lock();
        let history = state
            .history
            .entry(source.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(duration);
    }

    /// Number of samples currently held for a source
    pub fn sample_count(&self, source: &str) -> usize {
        self.lock().history.get(source).map_or(0, VecDeque::len)
    }

    /// p50/p95/p99 of the source's history, or `None` when it has no samples
    pub fn percentiles(&self, source: &str) -> Option<LatencyPercentiles> {
        let mut samples: Vec<Duration> = {
            let state = self.lock();
            state.history.get(source)?.iter().copied().collect()
        };
        if samples.is_empty() {
            return None;
        }
        samples.sort_unstable();
        Some(LatencyPercentiles {
            p50: nearest_rank(&samples, 50.0),
            p95: nearest_rank(&samples, 95.0),
            p99: nearest_rank(&samples, 99.0),
            samples: samples.len(),
        })
    }

    /// Recommend timeouts from observed latency; `None` below `min_samples`
    ///
    /// connect = max(5s, 1.5·p50 + 5s), read = max(15s, 1.2·p95 + 10s),
    /// total = max(30s, 1.1·p99 + 15s).
    pub fn recommend(&self, source: &str, min_samples: usize) -> Option<TimeoutConfig> {
        let p = self.percentiles(source)?;
        if p.samples < min_samples {
            return None;
        }
        let connect = Duration::from_secs_f64(1.5 * p.p50.as_secs_f64() + 5.0)
            .max(Duration::from_secs(5));
        let read = Duration::from_secs_f64(1.2 * p.p95.as_secs_f64() + 10.0)
            .max(Duration::from_secs(15));
        let total = Duration::from_secs_f64(1.1 * p.p99.as_secs_f64() + 15.0)
            .max(Duration::from_secs(30));
        Some(TimeoutConfig::new(connect, read, total))
    }

    /// Register a static override that beats any adaptive recommendation
    pub fn set_override(&self, source: &str, timeouts: TimeoutConfig) {
        self.lock().overrides.insert(source.to_string(), timeouts);
    }

    /// Timeouts for the next request to `source`
    ///
    /// Precedence: static override, adaptive recommendation, global default.
    pub fn resolve(&self, source: &str) -> TimeoutConfig {
        if let Some(timeouts) = self.lock().overrides.get(source) {
            return *timeouts;
        }
        if self.adaptive
            && let Some(recommended) = self.recommend(source, self.min_samples)
        {
            tracing::trace!(source, ?recommended, "Using adaptive timeouts");
            return recommended;
        }
        self.default
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        // A poisoned lock only means another task panicked mid-update; the map is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Nearest-rank percentile over sorted, non-empty samples
fn nearest_rank(sorted: &[Duration], percentile: f64) -> Duration {
    let rank = ((percentile / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
