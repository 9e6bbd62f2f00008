//! Metrics Collector
//!
//! Records the timing and outcome of every work unit into a fixed-capacity
//! rolling window and keeps cumulative per-kind counters alongside.
//! Recording never fails.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::domain::WorkKind;

/// Default rolling window capacity
pub const DEFAULT_WINDOW_SIZE: usize = 1000;

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Rolling window capacity
    pub window_size: usize,
    /// Feed the latency histogram
    pub histograms_enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            histograms_enabled: true,
        }
    }
}

/// Counter metric
#[derive(Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge metric
#[derive(Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Histogram bucket
#[derive(Debug, Clone, Serialize)]
pub struct HistogramBucket {
    /// Upper bound (inclusive)
    pub le: f64,
    /// Cumulative count of observations
    pub count: u64,
}

/// Histogram metric
pub struct Histogram {
    boundaries: Vec<f64>,
    buckets: Vec<AtomicU64>,
    /// Sum of observations in microunits
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create with custom buckets
    pub fn with_buckets(mut boundaries: Vec<f64>) -> Self {
        boundaries.retain(|b| b.is_finite());
        boundaries.sort_by(|a, b| a.total_cmp(b));
        let buckets = boundaries.iter().map(|_| AtomicU64::new(0)).collect();

        Self {
            boundaries,
            buckets,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Buckets for request latency in seconds
    pub fn latency() -> Self {
        Self::with_buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
        ])
    }

    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum
            .fetch_add((value.max(0.0) * 1_000_000.0).round() as u64, Ordering::Relaxed);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            if value <= boundary {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn observe_duration(&self, duration: Duration) {
        self.observe(duration.as_secs_f64());
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    pub fn buckets(&self) -> Vec<HistogramBucket> {
        self.boundaries
            .iter()
            .zip(self.buckets.iter())
            .map(|(&le, count)| HistogramBucket {
                le,
                count: count.load(Ordering::Relaxed),
            })
            .collect()
    }
}

/// Outcome of a recorded request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SampleOutcome {
    Success,
    /// Failure labelled with the error kind
    Failure(&'static str),
}

impl SampleOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SampleOutcome::Success)
    }
}

/// One entry of the rolling window
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub kind: WorkKind,
    pub latency: Duration,
    pub outcome: SampleOutcome,
}

#[derive(Default)]
struct KindCounters {
    total: Counter,
    succeeded: Counter,
    failed: Counter,
}

/// Rolling-window metrics collector
pub struct MetricsCollector {
    config: MetricsConfig,
    window: Mutex<VecDeque<Sample>>,
    per_kind: [KindCounters; 4],
    latency: Histogram,
    /// Named counters created on demand
    counters: RwLock<HashMap<String, Arc<Counter>>>,
    /// Named gauges created on demand
    gauges: RwLock<HashMap<String, Arc<Gauge>>>,
    start_time: Instant,
}

impl MetricsCollector {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            window: Mutex::new(VecDeque::with_capacity(config.window_size)),
            config,
            per_kind: Default::default(),
            latency: Histogram::latency(),
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    pub fn default_config() -> Self {
        Self::new(MetricsConfig::default())
    }

    /// Append a sample, evicting the oldest one when the window is full
    pub fn record(&self, kind: WorkKind, latency: Duration, outcome: SampleOutcome) {
        let counters = &self.per_kind[kind.index()];
        counters.total.inc();
        match outcome {
            SampleOutcome::Success => counters.succeeded.inc(),
            SampleOutcome::Failure(error) => {
                counters.failed.inc();
                self.counter(&format!("errors_total_{}", error)).inc();
            }
        }

        if self.config.histograms_enabled {
            self.latency.observe_duration(latency);
        }

        if self.config.window_size == 0 {
            return;
        }
        let mut window = self.window.lock();
        if window.len() >= self.config.window_size {
            window.pop_front();
        }
        window.push_back(Sample {
            kind,
            latency,
            outcome,
        });
    }

    /// Arithmetic mean latency over the window, zero when empty
    pub fn average_latency(&self) -> Duration {
        let window = self.window.lock();
        if window.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = window.iter().map(|s| s.latency).sum();
        total / window.len() as u32
    }

    /// Number of samples currently in the window
    pub fn window_len(&self) -> usize {
        self.window.lock().len()
    }

    /// Copy of the window, oldest first
    pub fn window(&self) -> Vec<Sample> {
        self.window.lock().iter().copied().collect()
    }

    /// Get or create a named counter
    pub fn counter(&self, name: &str) -> Arc<Counter> {
        if let Some(counter) = self.counters.read().get(name) {
            return counter.clone();
        }

        self.counters
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Counter::new()))
            .clone()
    }

    /// Get or create a named gauge
    pub fn gauge(&self, name: &str) -> Arc<Gauge> {
        if let Some(gauge) = self.gauges.read().get(name) {
            return gauge.clone();
        }

        self.gauges
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Gauge::new()))
            .clone()
    }

    pub fn latency_histogram(&self) -> &Histogram {
        &self.latency
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Cumulative per-kind counts plus the current window average
    pub fn snapshot(&self) -> MetricsSnapshot {
        let per_kind: BTreeMap<String, KindSnapshot> = WorkKind::ALL
            .iter()
            .map(|kind| {
                let c = &self.per_kind[kind.index()];
                (
                    kind.to_string(),
                    KindSnapshot {
                        total: c.total.get(),
                        succeeded: c.succeeded.get(),
                        failed: c.failed.get(),
                    },
                )
            })
            .collect();

        let total_requests = per_kind.values().map(|k| k.total).sum();
        let total_errors = per_kind.values().map(|k| k.failed).sum();

        MetricsSnapshot {
            per_kind,
            total_requests,
            total_errors,
            window_len: self.window_len(),
            average_latency_ms: self.average_latency().as_secs_f64() * 1000.0,
            counters: self
                .counters
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), v.get()))
                .collect(),
            uptime_seconds: self.uptime().as_secs(),
        }
    }

    /// Export metrics as text (Prometheus format)
    pub fn export_text(&self) -> String {
        let mut output = String::new();

        output.push_str("# TYPE requests_total counter\n");
        for kind in WorkKind::ALL {
            let c = &self.per_kind[kind.index()];
            output.push_str(&format!(
                "requests_total{{kind=\"{}\",outcome=\"success\"}} {}\n",
                kind,
                c.succeeded.get()
            ));
            output.push_str(&format!(
                "requests_total{{kind=\"{}\",outcome=\"failure\"}} {}\n",
                kind,
                c.failed.get()
            ));
        }

        let mut counters: Vec<_> = self
            .counters
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.get()))
            .collect();
        counters.sort();
        for (name, value) in counters {
            output.push_str(&format!("# TYPE {} counter\n{} {}\n", name, name, value));
        }

        let mut gauges: Vec<_> = self
            .gauges
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.get()))
            .collect();
        gauges.sort();
        for (name, value) in gauges {
            output.push_str(&format!("# TYPE {} gauge\n{} {}\n", name, name, value));
        }

        output.push_str("# TYPE request_latency_seconds histogram\n");
        for bucket in self.latency.buckets() {
            output.push_str(&format!(
                "request_latency_seconds_bucket{{le=\"{}\"}} {}\n",
                bucket.le, bucket.count
            ));
        }
        output.push_str(&format!(
            "request_latency_seconds_bucket{{le=\"+Inf\"}} {}\n",
            self.latency.count()
        ));
        output.push_str(&format!("request_latency_seconds_sum {}\n", self.latency.sum()));
        output.push_str(&format!(
            "request_latency_seconds_count {}\n",
            self.latency.count()
        ));

        output
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Per-kind cumulative counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindSnapshot {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Read-only view of the collector
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub per_kind: BTreeMap<String, KindSnapshot>,
    pub total_requests: u64,
    pub total_errors: u64,
    pub window_len: usize,
    /// Mean latency over the rolling window
    pub average_latency_ms: f64,
    /// Named counters (error kinds, replication outcomes)
    pub counters: BTreeMap<String, u64>,
    pub uptime_seconds: u64,
}

impl MetricsSnapshot {
    pub fn kind(&self, kind: WorkKind) -> KindSnapshot {
        self.per_kind
            .get(kind.as_str())
            .copied()
            .unwrap_or_default()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        counter.inc();
        counter.inc();
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_histogram() {
        let histogram = Histogram::latency();
        histogram.observe_duration(ms(3));
        histogram.observe_duration(ms(30));

        assert_eq!(histogram.count(), 2);
        assert!((histogram.sum() - 0.033).abs() < 1e-4);
        let buckets = histogram.buckets();
        assert_eq!(buckets[0].count, 0); // le 1ms
        assert_eq!(buckets[1].count, 1); // le 5ms
        assert_eq!(buckets[5].count, 2); // le 100ms
    }

    #[test]
    fn test_average_latency_empty_is_zero() {
        let collector = MetricsCollector::default_config();
        assert_eq!(collector.average_latency(), Duration::ZERO);
    }

    #[test]
    fn test_average_latency() {
        let collector = MetricsCollector::default_config();
        collector.record(WorkKind::Read, ms(10), SampleOutcome::Success);
        collector.record(WorkKind::Write, ms(30), SampleOutcome::Success);
        assert_eq!(collector.average_latency(), ms(20));
    }

    #[test]
    fn test_window_evicts_oldest() {
        let collector = MetricsCollector::new(MetricsConfig {
            window_size: 3,
            ..Default::default()
        });
        for i in 1..=5 {
            collector.record(WorkKind::Read, ms(i * 10), SampleOutcome::Success);
        }

        let window = collector.window();
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].latency, ms(30));
        assert_eq!(collector.average_latency(), ms(40));

        // Cumulative counters are not windowed
        assert_eq!(collector.snapshot().kind(WorkKind::Read).total, 5);
    }

    #[test]
    fn test_snapshot_counts_failures() {
        let collector = MetricsCollector::default_config();
        collector.record(WorkKind::Write, ms(5), SampleOutcome::Success);
        collector.record(WorkKind::Write, ms(5), SampleOutcome::Failure("overloaded"));
        collector.record(WorkKind::Search, ms(5), SampleOutcome::Failure("no_healthy_server"));

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.total_errors, 2);
        assert_eq!(
            snapshot.kind(WorkKind::Write),
            KindSnapshot {
                total: 2,
                succeeded: 1,
                failed: 1
            }
        );
        assert_eq!(snapshot.counters.get("errors_total_overloaded"), Some(&1));
        assert_eq!(snapshot.kind(WorkKind::Upload).total, 0);
    }

    #[test]
    fn test_zero_window_still_counts() {
        let collector = MetricsCollector::new(MetricsConfig {
            window_size: 0,
            ..Default::default()
        });
        collector.record(WorkKind::Read, ms(5), SampleOutcome::Success);
        assert_eq!(collector.window_len(), 0);
        assert_eq!(collector.average_latency(), Duration::ZERO);
        assert_eq!(collector.snapshot().total_requests, 1);
    }

    #[test]
    fn test_same_counter_returned() {
        let collector = MetricsCollector::default_config();
        let c1 = collector.counter("replication_failures_total");
        let c2 = collector.counter("replication_failures_total");
        c1.inc();
        assert_eq!(c2.get(), 1);
    }

    #[test]
    fn test_export_text() {
        let collector = MetricsCollector::default_config();
        collector.record(WorkKind::Read, ms(2), SampleOutcome::Success);
        collector.gauge("cache_entries").set(42);

        let output = collector.export_text();
        assert!(output.contains("requests_total{kind=\"read\",outcome=\"success\"} 1"));
        assert!(output.contains("cache_entries 42"));
        assert!(output.contains("request_latency_seconds_count 1"));
    }

    #[test]
    fn test_concurrent_record() {
        use std::thread;

        let collector = Arc::new(MetricsCollector::new(MetricsConfig {
            window_size: 100,
            ..Default::default()
        }));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let collector = collector.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        collector.record(WorkKind::Read, ms(1), SampleOutcome::Success);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(collector.window_len(), 100);
        assert_eq!(collector.snapshot().total_requests, 2000);
    }
}
