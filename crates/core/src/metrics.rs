//! Bounded history of control-plane request metrics.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, SystemTime};

/// Default number of records kept before the oldest is evicted.
pub const DEFAULT_CAPACITY: usize = 1000;

/// One completed (or failed) request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMetric {
    pub url: String,
    pub method: String,
    /// `None` when the request failed before a response arrived.
    pub status_code: Option<u16>,
    pub duration: Duration,
    pub request_bytes: u64,
    pub response_bytes: u64,
    pub recorded_at: SystemTime,
    pub success: bool,
}

/// Totals over the retained history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatedMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Mean of whole-millisecond durations, truncated. Zero when empty.
    pub average_response_time: Duration,
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    pub requests_by_status_code: BTreeMap<u16, u64>,
}

/// FIFO of [`RequestMetric`]s capped at `capacity`.
///
/// Not synchronised; the metrics interceptor wraps it in a mutex.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    capacity: usize,
    history: VecDeque<RequestMetric>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            history: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
        }
    }

    pub fn record(&mut self, metric: RequestMetric) {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(metric);
    }

    pub fn aggregated(&self) -> AggregatedMetrics {
        if self.history.is_empty() {
            return AggregatedMetrics::default();
        }

        let total = self.history.len() as u64;
        let successful = self.history.iter().filter(|m| m.success).count() as u64;
        let total_millis: u128 = self.history.iter().map(|m| m.duration.as_millis()).sum();

        let mut by_status = BTreeMap::new();
        for code in self.history.iter().filter_map(|m| m.status_code) {
            *by_status.entry(code).or_insert(0) += 1;
        }

        AggregatedMetrics {
            total_requests: total,
            successful_requests: successful,
            failed_requests: total - successful,
            average_response_time: Duration::from_millis((total_millis / total as u128) as u64),
            total_bytes_sent: self.history.iter().map(|m| m.request_bytes).sum(),
            total_bytes_received: self.history.iter().map(|m| m.response_bytes).sum(),
            requests_by_status_code: by_status,
        }
    }

    /// The last `count` records, oldest first.
    pub fn recent(&self, count: usize) -> Vec<RequestMetric> {
        let skip = self.history.len().saturating_sub(count);
        self.history.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(i: u64, status: Option<u16>, success: bool) -> RequestMetric {
        RequestMetric {
            url: format!("https://nvr.local/api/{i}"),
            method: "GET".into(),
            status_code: status,
            duration: Duration::from_millis(10 + i),
            request_bytes: 100,
            response_bytes: 1000,
            recorded_at: SystemTime::now(),
            success,
        }
    }

    #[test]
    fn empty_aggregate_is_zero() {
        let collector = MetricsCollector::new();
        assert_eq!(collector.aggregated(), AggregatedMetrics::default());
    }

    #[test]
    fn aggregates_counts_and_bytes() {
        let mut collector = MetricsCollector::new();
        collector.record(metric(0, Some(200), true));
        collector.record(metric(1, Some(200), true));
        collector.record(metric(2, Some(503), false));
        collector.record(metric(3, None, false));

        let agg = collector.aggregated();
        assert_eq!(agg.total_requests, 4);
        assert_eq!(agg.successful_requests, 2);
        assert_eq!(agg.failed_requests, 2);
        // (10 + 11 + 12 + 13) / 4 = 11.5 -> 11
        assert_eq!(agg.average_response_time, Duration::from_millis(11));
        assert_eq!(agg.total_bytes_sent, 400);
        assert_eq!(agg.total_bytes_received, 4000);
        assert_eq!(agg.requests_by_status_code.get(&200), Some(&2));
        assert_eq!(agg.requests_by_status_code.get(&503), Some(&1));
        assert_eq!(agg.requests_by_status_code.len(), 2);
    }

    #[test]
    fn history_is_bounded_and_recent_is_ordered() {
        let mut collector = MetricsCollector::with_capacity(100);
        for i in 0..150 {
            collector.record(metric(i, Some(200), true));
        }
        assert_eq!(collector.len(), 100);
        assert_eq!(collector.aggregated().total_requests, 100);

        let recent = collector.recent(50);
        assert_eq!(recent.len(), 50);
        assert_eq!(recent[0].url, "https://nvr.local/api/100");
        assert_eq!(recent[49].url, "https://nvr.local/api/149");

        collector.clear();
        assert!(collector.is_empty());
        assert_eq!(collector.aggregated().total_requests, 0);
    }

    #[test]
    fn default_capacity_keeps_150() {
        let mut collector = MetricsCollector::default();
        for i in 0..150 {
            collector.record(metric(i, Some(204), true));
        }
        assert_eq!(collector.aggregated().total_requests, 150);
        assert_eq!(collector.recent(500).len(), 150);
    }
}
