//! Where outcomes go.
use metrics_util::{AtomicBucket, Summary};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;
#[allow(unused)]
use tracing::{debug, error, trace, warn};
use volley_core::{CheckStatistics, LatencyStatistics, Outcome, RunStatistics};

/// Number of samples buffered lock-free before they are folded into the sketch.
const FLUSH_EVERY: u64 = 1024;

/// Receives outcomes from every VU concurrently.
///
/// The scheduler and its workers only ever write to a sink; aggregation and reporting are
/// entirely up to the implementation.
pub trait MetricsSink: Send + Sync {
    fn record_outcome(&self, outcome: &Outcome);

    fn record_check(&self, name: &str, passed: bool);

    /// Called once per completed iteration. `passed` is false if any of its checks failed.
    fn record_iteration(&self, _duration: Duration, _passed: bool) {}

    /// Called by the scheduler after each reconciliation with the number of live VUs.
    fn record_vus(&self, _active: usize) {}

    /// Called once at the end of a run with the number of VUs abandoned mid-iteration.
    fn record_interrupted(&self, _count: u64) {}
}

/// Default sink. Accumulates everything needed for an end of run [`RunStatistics`], and also
/// emits through the `metrics` facade when the `metrics` feature is enabled.
pub struct SummarySink {
    requests: AtomicU64,
    failed_requests: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    iterations: AtomicU64,
    failed_iterations: AtomicU64,
    interrupted_iterations: AtomicU64,
    min_vus: AtomicUsize,
    max_vus: AtomicUsize,
    latency: DurationAccumulator,
    iteration_duration: DurationAccumulator,
    checks: RwLock<Vec<CheckCounters>>,
}

struct CheckCounters {
    name: String,
    passed: AtomicU64,
    failed: AtomicU64,
}

impl Default for SummarySink {
    fn default() -> Self {
        Self::new()
    }
}

impl SummarySink {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            iterations: AtomicU64::new(0),
            failed_iterations: AtomicU64::new(0),
            interrupted_iterations: AtomicU64::new(0),
            min_vus: AtomicUsize::new(usize::MAX),
            max_vus: AtomicUsize::new(0),
            latency: DurationAccumulator::new(),
            iteration_duration: DurationAccumulator::new(),
            checks: RwLock::new(vec![]),
        }
    }

    /// Snapshot of everything recorded so far. `elapsed` is the wall time the run took, used for
    /// rates.
    pub fn summary(&self, elapsed: Duration) -> RunStatistics {
        let checks = self
            .checks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|c| CheckStatistics {
                name: c.name.clone(),
                passed: c.passed.load(Ordering::Relaxed),
                failed: c.failed.load(Ordering::Relaxed),
            })
            .collect();

        let max_vus = self.max_vus.load(Ordering::Relaxed);
        RunStatistics {
            elapsed,
            iterations: self.iterations.load(Ordering::Relaxed),
            failed_iterations: self.failed_iterations.load(Ordering::Relaxed),
            interrupted_iterations: self.interrupted_iterations.load(Ordering::Relaxed),
            iteration_duration: self.iteration_duration.statistics(),
            checks,
            requests: self.requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            latency: self.latency.statistics(),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            min_vus: self.min_vus.load(Ordering::Relaxed).min(max_vus),
            max_vus,
        }
    }

    fn with_check<F: Fn(&CheckCounters)>(&self, name: &str, f: F) {
        {
            let checks = self.checks.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(counters) = checks.iter().find(|c| c.name == name) {
                f(counters);
                return;
            }
        }

        let mut checks = self.checks.write().unwrap_or_else(PoisonError::into_inner);
        // NOTE: Another VU may have registered it while we waited on the write lock.
        if let Some(counters) = checks.iter().find(|c| c.name == name) {
            f(counters);
        } else {
            let counters = CheckCounters {
                name: name.to_string(),
                passed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            };
            f(&counters);
            checks.push(counters);
        }
    }
}

impl MetricsSink for SummarySink {
    fn record_outcome(&self, outcome: &Outcome) {
        let Some(req) = &outcome.request else {
            return;
        };

        self.requests.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(req.bytes_sent, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(req.bytes_received, Ordering::Relaxed);
        if req.is_failed() {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(latency) = req.latency {
            self.latency.record(latency);
        }

        #[cfg(feature = "metrics")]
        {
            use volley_core::{
                DATA_RECEIVED, DATA_SENT, HTTP_REQS, HTTP_REQ_DURATION, HTTP_REQ_FAILED,
                NAME_LABEL,
            };

            metrics::counter!(HTTP_REQS, NAME_LABEL => req.name).increment(1);
            metrics::counter!(DATA_SENT).increment(req.bytes_sent);
            metrics::counter!(DATA_RECEIVED).increment(req.bytes_received);
            if req.is_failed() {
                metrics::counter!(HTTP_REQ_FAILED, NAME_LABEL => req.name).increment(1);
            }
            if let Some(latency) = req.latency {
                metrics::histogram!(HTTP_REQ_DURATION, NAME_LABEL => req.name)
                    .record(latency.as_secs_f64());
            }
        }
    }

    fn record_check(&self, name: &str, passed: bool) {
        self.with_check(name, |c| {
            if passed {
                c.passed.fetch_add(1, Ordering::Relaxed);
            } else {
                c.failed.fetch_add(1, Ordering::Relaxed);
            }
        });

        #[cfg(feature = "metrics")]
        {
            use volley_core::{CHECKS_FAILED, CHECKS_PASSED, NAME_LABEL};

            let metric = if passed { CHECKS_PASSED } else { CHECKS_FAILED };
            metrics::counter!(metric, NAME_LABEL => name.to_string()).increment(1);
        }
    }

    fn record_iteration(&self, duration: Duration, passed: bool) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
        if !passed {
            self.failed_iterations.fetch_add(1, Ordering::Relaxed);
        }
        self.iteration_duration.record(duration);

        #[cfg(feature = "metrics")]
        {
            metrics::counter!(volley_core::ITERATIONS).increment(1);
            if !passed {
                metrics::counter!(volley_core::ITERATIONS_FAILED).increment(1);
            }
            metrics::histogram!(volley_core::ITERATION_DURATION).record(duration.as_secs_f64());
        }
    }

    fn record_vus(&self, active: usize) {
        self.min_vus.fetch_min(active, Ordering::Relaxed);
        self.max_vus.fetch_max(active, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        metrics::gauge!(volley_core::VUS).set(active as f64);
    }

    fn record_interrupted(&self, count: u64) {
        self.interrupted_iterations
            .fetch_add(count, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        metrics::counter!(volley_core::ITERATIONS_INTERRUPTED).increment(count);
    }
}

/// Exact min/max/mean plus a DDSketch for quantiles.
///
/// Samples first land in a lock-free bucket and are only folded into the sketch (which needs a
/// lock) every `FLUSH_EVERY` records, or when statistics are requested.
struct DurationAccumulator {
    count: AtomicU64,
    sum_nanos: AtomicU64,
    min_nanos: AtomicU64,
    max_nanos: AtomicU64,
    pending: AtomicBucket<Duration>,
    sketch: Mutex<Summary>,
}

impl DurationAccumulator {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum_nanos: AtomicU64::new(0),
            min_nanos: AtomicU64::new(u64::MAX),
            max_nanos: AtomicU64::new(0),
            pending: AtomicBucket::new(),
            sketch: Mutex::new(Summary::with_defaults()),
        }
    }

    fn record(&self, duration: Duration) {
        let nanos = duration.as_nanos().min(u64::MAX as u128) as u64;
        self.sum_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.min_nanos.fetch_min(nanos, Ordering::Relaxed);
        self.max_nanos.fetch_max(nanos, Ordering::Relaxed);
        self.pending.push(duration);

        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if count % FLUSH_EVERY == 0 {
            self.flush();
        }
    }

    fn flush(&self) {
        let mut sketch = self.sketch.lock().unwrap_or_else(PoisonError::into_inner);
        self.pending.clear_with(|durations| {
            for duration in durations {
                sketch.add(duration.as_secs_f64());
            }
        });
    }

    fn statistics(&self) -> LatencyStatistics {
        self.flush();

        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return LatencyStatistics::default();
        }

        let min = Duration::from_nanos(self.min_nanos.load(Ordering::Relaxed));
        let max = Duration::from_nanos(self.max_nanos.load(Ordering::Relaxed));
        let avg = Duration::from_nanos(self.sum_nanos.load(Ordering::Relaxed) / count);

        let sketch = self.sketch.lock().unwrap_or_else(PoisonError::into_inner);
        let quantile = |q: f64| match sketch.quantile(q) {
            // Sketch estimates are only accurate to a relative error, so keep them within the
            // exact bounds.
            Some(secs) if secs.is_finite() => Duration::from_secs_f64(secs.max(0.)).clamp(min, max),
            _ => {
                error!("No latency estimate for quantile {q}");
                min
            }
        };

        // Estimates are forced monotone so the report never shows p99 < p90.
        let p50 = quantile(0.5);
        let p90 = quantile(0.9).max(p50);
        let p95 = quantile(0.95).max(p90);
        let p99 = quantile(0.99).max(p95);

        LatencyStatistics {
            avg,
            min,
            p50,
            p90,
            p95,
            p99,
            max,
        }
    }
}
