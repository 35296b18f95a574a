//! Observability: timing histograms (p50/p95/p99) and event counters.
//! Histograms are fixed-capacity rings so a long listening session never grows memory.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A span measuring elapsed time from creation to explicit end.
pub struct TimingSpan {
    name: &'static str,
    start: Instant,
    registry: Arc<MetricsRegistry>,
}

impl TimingSpan {
    pub fn new(name: &'static str, registry: Arc<MetricsRegistry>) -> Self {
        Self {
            name,
            start: Instant::now(),
            registry,
        }
    }

    /// End the span, recording elapsed duration in microseconds.
    pub fn finish(self) -> f64 {
        let elapsed_us = self.start.elapsed().as_micros() as f64;
        self.registry.record(self.name, elapsed_us);
        elapsed_us
    }
}

/// Fixed-capacity ring buffer for histogram samples.
struct SampleRing {
    samples: Vec<f64>,
    pos: usize,
    count: usize,
    capacity: usize,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity],
            pos: 0,
            count: 0,
            capacity,
        }
    }

    fn push(&mut self, value: f64) {
        self.samples[self.pos] = value;
        self.pos = (self.pos + 1) % self.capacity;
        if self.count < self.capacity {
            self.count += 1;
        }
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples[..self.count].to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((p / 100.0) * (self.count as f64 - 1.0)).round() as usize;
        sorted[idx.min(self.count - 1)]
    }
}

/// Histograms and counters for all named metrics.
pub struct MetricsRegistry {
    histograms: Mutex<HashMap<&'static str, SampleRing>>,
    counters: Mutex<HashMap<&'static str, Arc<AtomicU64>>>,
    ring_capacity: usize,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(ring_capacity: usize) -> Self {
        Self {
            histograms: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
            ring_capacity: ring_capacity.max(1),
        }
    }

    /// Record a sample (in microseconds) for the named metric.
    pub fn record(&self, name: &'static str, value_us: f64) {
        let mut hists = self.histograms.lock();
        hists
            .entry(name)
            .or_insert_with(|| SampleRing::new(self.ring_capacity))
            .push(value_us);
    }

    /// Start a timing span that records on finish.
    pub fn span(self: &Arc<Self>, name: &'static str) -> TimingSpan {
        TimingSpan::new(name, Arc::clone(self))
    }

    /// Increment a named counter by one.
    pub fn increment(&self, name: &'static str) {
        self.counter(name).fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn counter(&self, name: &'static str) -> Arc<AtomicU64> {
        let mut counters = self.counters.lock();
        Arc::clone(counters.entry(name).or_default())
    }

    /// Get percentile for a metric (p value 0-100). Returns microseconds.
    pub fn percentile(&self, name: &str, p: f64) -> f64 {
        let hists = self.histograms.lock();
        hists
            .get(name)
            .map(|ring| ring.percentile(p))
            .unwrap_or(0.0)
    }

    /// Summary of all histograms at p50/p95/p99 plus all counters.
    pub fn summary(&self) -> MetricsSnapshot {
        let timings = self
            .histograms
            .lock()
            .iter()
            .map(|(&name, ring)| {
                (
                    name.to_string(),
                    MetricSummary {
                        p50_us: ring.percentile(50.0),
                        p95_us: ring.percentile(95.0),
                        p99_us: ring.percentile(99.0),
                        count: ring.count,
                    },
                )
            })
            .collect();
        let counters = self
            .counters
            .lock()
            .iter()
            .map(|(&name, c)| (name.to_string(), c.load(Ordering::Relaxed)))
            .collect();
        MetricsSnapshot { timings, counters }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricSummary {
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    pub timings: HashMap<String, MetricSummary>,
    pub counters: HashMap<String, u64>,
}

/// Well-known metric names (constants to avoid typos).
pub mod metric_names {
    pub const INGEST: &str = "t_ingest";
    pub const QUEUE_WAIT_EFFECTS: &str = "queue_wait_effects";
    /// Successful pulses only; failures land in `HAPTIC_FAILURES`.
    pub const HAPTIC_PULSE: &str = "t_haptic_pulse";
    pub const LISTENER_NOTIFY: &str = "t_listener_notify";

    pub const SAMPLES_INGESTED: &str = "samples_ingested";
    pub const SAMPLES_DROPPED: &str = "samples_dropped";
    pub const SHAKES_EMITTED: &str = "shakes_emitted";
    pub const SHAKES_SUPPRESSED: &str = "shakes_suppressed";
    pub const HAPTIC_FAILURES: &str = "haptic_failures";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentiles() {
        let registry = MetricsRegistry::new();
        for v in 1..=100 {
            registry.record(metric_names::INGEST, v as f64);
        }
        assert_eq!(registry.percentile(metric_names::INGEST, 0.0), 1.0);
        assert_eq!(registry.percentile(metric_names::INGEST, 100.0), 100.0);
        assert_eq!(registry.percentile("missing", 50.0), 0.0);
    }

    #[test]
    fn test_ring_keeps_most_recent() {
        let registry = MetricsRegistry::with_capacity(4);
        for v in [100.0, 100.0, 1.0, 2.0, 3.0, 4.0] {
            registry.record(metric_names::HAPTIC_PULSE, v);
        }
        assert_eq!(registry.percentile(metric_names::HAPTIC_PULSE, 100.0), 4.0);
        let summary = registry.summary();
        assert_eq!(summary.timings[metric_names::HAPTIC_PULSE].count, 4);
    }

    #[test]
    fn test_counters() {
        let registry = MetricsRegistry::new();
        registry.increment(metric_names::SHAKES_EMITTED);
        registry.increment(metric_names::SHAKES_EMITTED);
        assert_eq!(registry.count(metric_names::SHAKES_EMITTED), 2);
        assert_eq!(registry.count(metric_names::SAMPLES_DROPPED), 0);
        assert_eq!(registry.summary().counters[metric_names::SHAKES_EMITTED], 2);
    }
}
