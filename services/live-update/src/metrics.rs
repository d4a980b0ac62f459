//! Harvest loop metrics
//!
//! Lock-free counters per polling domain plus a bounded tick-latency
//! sample, exported as a flat map for Prometheus-style scraping.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// The five harvest domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Domain {
    Depth,
    Chart,
    Tape,
    Candles,
    Quotes,
}

impl Domain {
    pub fn all() -> &'static [Domain] {
        &[
            Domain::Depth,
            Domain::Chart,
            Domain::Tape,
            Domain::Candles,
            Domain::Quotes,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Depth => "depth",
            Domain::Chart => "chart",
            Domain::Tape => "tape",
            Domain::Candles => "candles",
            Domain::Quotes => "quotes",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters for one domain.
pub struct DomainMetrics {
    pub ticks: AtomicU64,
    pub items_harvested: AtomicU64,
    pub tick_failures: AtomicU64,
    pub pushes_delivered: AtomicU64,
    pub pushes_skipped: AtomicU64,
    pub tick_ns: Mutex<LatencyTracker>,
}

impl DomainMetrics {
    fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            items_harvested: AtomicU64::new(0),
            tick_failures: AtomicU64::new(0),
            pushes_delivered: AtomicU64::new(0),
            pushes_skipped: AtomicU64::new(0),
            tick_ns: Mutex::new(LatencyTracker::new(1000)),
        }
    }
}

pub struct ProcessorMetrics {
    domains: [DomainMetrics; 5],
}

impl ProcessorMetrics {
    pub fn new() -> Self {
        Self {
            domains: std::array::from_fn(|_| DomainMetrics::new()),
        }
    }

    pub fn domain(&self, domain: Domain) -> &DomainMetrics {
        &self.domains[domain.index()]
    }

    /// Record a completed tick and its duration.
    pub fn record_tick(&self, domain: Domain, duration_ns: u64) {
        let m = self.domain(domain);
        m.ticks.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut tracker) = m.tick_ns.lock() {
            tracker.record(duration_ns);
        }
    }

    pub fn record_harvested(&self, domain: Domain, items: usize) {
        self.domain(domain)
            .items_harvested
            .fetch_add(items as u64, Ordering::Relaxed);
    }

    /// Record a pair (or the quote batch) whose harvest or push failed.
    pub fn record_failure(&self, domain: Domain) {
        self.domain(domain).tick_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_push(&self, domain: Domain, delivered: bool) {
        let m = self.domain(domain);
        if delivered {
            m.pushes_delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            m.pushes_skipped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn ticks(&self, domain: Domain) -> u64 {
        self.domain(domain).ticks.load(Ordering::Relaxed)
    }

    pub fn failures(&self, domain: Domain) -> u64 {
        self.domain(domain).tick_failures.load(Ordering::Relaxed)
    }

    /// p99 tick duration in nanoseconds.
    pub fn tick_p99(&self, domain: Domain) -> Option<u64> {
        self.domain(domain)
            .tick_ns
            .lock()
            .ok()
            .and_then(|tracker| tracker.percentile(99))
    }

    /// Export metrics as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        for domain in Domain::all() {
            let d = self.domain(*domain);
            m.insert(format!("{domain}_ticks"), d.ticks.load(Ordering::Relaxed));
            m.insert(format!("{domain}_items_harvested"), d.items_harvested.load(Ordering::Relaxed));
            m.insert(format!("{domain}_tick_failures"), d.tick_failures.load(Ordering::Relaxed));
            m.insert(format!("{domain}_pushes_delivered"), d.pushes_delivered.load(Ordering::Relaxed));
            m.insert(format!("{domain}_pushes_skipped"), d.pushes_skipped.load(Ordering::Relaxed));
        }
        m
    }
}

impl Default for ProcessorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks latency samples for percentile calculation.
pub struct LatencyTracker {
    samples: Vec<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_samples),
            max_samples,
        }
    }

    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.remove(0);
        }
        self.samples.push(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted = self.samples.clone();
        sorted.sort_unstable();

        let idx = (p as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_per_domain() {
        let metrics = ProcessorMetrics::new();
        metrics.record_tick(Domain::Depth, 100);
        metrics.record_tick(Domain::Depth, 300);
        metrics.record_failure(Domain::Chart);
        metrics.record_harvested(Domain::Tape, 7);
        metrics.record_push(Domain::Quotes, false);

        assert_eq!(metrics.ticks(Domain::Depth), 2);
        assert_eq!(metrics.ticks(Domain::Chart), 0);
        assert_eq!(metrics.failures(Domain::Chart), 1);
        assert_eq!(metrics.tick_p99(Domain::Depth), Some(100));

        let exported = metrics.export();
        assert_eq!(exported["tape_items_harvested"], 7);
        assert_eq!(exported["quotes_pushes_skipped"], 1);
        assert_eq!(exported.len(), 25);
    }

    #[test]
    fn test_latency_tracker_window() {
        let mut tracker = LatencyTracker::new(3);
        assert_eq!(tracker.percentile(50), None);
        for v in [5, 1, 9, 7] {
            tracker.record(v);
        }
        // 5 evicted
        assert_eq!(tracker.percentile(0), Some(1));
        assert_eq!(tracker.percentile(100), Some(9));
    }
}
