//! Atomic-counter metrics sink.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::domain::{Counter, MetricsSink, MetricsSnapshot};

/// `MetricsSink` keeping process-local counters
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: [AtomicU64; Counter::ALL.len()],
    active_connections: AtomicUsize,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(counter: Counter) -> usize {
        Counter::ALL
            .iter()
            .position(|c| *c == counter)
            .unwrap_or_default()
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[Self::slot(counter)].load(Ordering::Relaxed)
    }
}

impl MetricsSink for InMemoryMetrics {
    fn increment(&self, counter: Counter) {
        self.counters[Self::slot(counter)].fetch_add(1, Ordering::Relaxed);
        tracing::trace!("metric {} incremented", counter.as_str());
    }

    fn set_active_connections(&self, count: usize) {
        self.active_connections.store(count, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_connections: self.active_connections.load(Ordering::Relaxed),
            counters: Counter::ALL
                .iter()
                .map(|c| (c.as_str(), self.get(*c)))
                .collect(),
        }
    }
}
