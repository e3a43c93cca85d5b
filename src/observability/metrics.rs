//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Aggregate request counters keyed by (algorithm, service, outcome)
//! - Keep per-endpoint latency histograms
//! - Mirror every update to the `metrics` facade for Prometheus scraping
//!
//! # Metrics
//! - `balancer_requests_total` (counter): by service, algorithm, outcome
//! - `balancer_endpoint_latency_ms` (histogram): observed latency by endpoint
//! - `balancer_endpoint_health` (gauge): 1=healthy, 0=unhealthy
//! - `balancer_endpoint_connections` (gauge): current connection count
//!
//! Updates are atomic increments; nothing on the request path waits on a reader.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use serde::Serialize;

use crate::load_balancer::Algorithm;

/// Upper bounds (ms) of the latency buckets; a final overflow bucket follows.
const LATENCY_BUCKETS_MS: [u64; 10] = [5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];

/// Install the Prometheus recorder with an HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus metrics listener started");
    Ok(())
}

/// What happened to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Outcome {
    /// An endpoint was selected.
    Routed,
    /// No active, healthy endpoint existed.
    NoAvailableEndpoints,
    /// The request could not be balanced as asked (ip_hash without a client IP).
    Rejected,
    /// The caller reported the dispatched request succeeded.
    Succeeded,
    /// The caller reported the dispatched request failed.
    Failed,
}

impl Outcome {
    /// Whether this outcome ends a balance request, as opposed to reporting
    /// how a dispatched request went.
    pub fn is_balance_request(self) -> bool {
        matches!(
            self,
            Outcome::Routed | Outcome::NoAvailableEndpoints | Outcome::Rejected
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Routed => "routed",
            Outcome::NoAvailableEndpoints => "no_available_endpoints",
            Outcome::Rejected => "rejected",
            Outcome::Succeeded => "succeeded",
            Outcome::Failed => "failed",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct LatencyHistogram {
    buckets: [AtomicU64; LATENCY_BUCKETS_MS.len() + 1],
    count: AtomicU64,
    sum_ms: AtomicU64,
    min_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum_ms: AtomicU64::new(0),
            min_ms: AtomicU64::new(u64::MAX),
            max_ms: AtomicU64::new(0),
        }
    }
}

impl LatencyHistogram {
    fn record(&self, ms: u64) {
        let bucket = LATENCY_BUCKETS_MS
            .iter()
            .position(|upper| ms <= *upper)
            .unwrap_or(LATENCY_BUCKETS_MS.len());
        self.buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.min_ms.fetch_min(ms, Ordering::Relaxed);
        self.max_ms.fetch_max(ms, Ordering::Relaxed);
    }

    /// Bucket upper bound containing the given quantile; `max` for the overflow bucket.
    fn quantile(&self, counts: &[u64], total: u64, q: f64, max: u64) -> u64 {
        let rank = ((total as f64) * q).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (i, count) in counts.iter().enumerate() {
            seen += count;
            if seen >= rank {
                return LATENCY_BUCKETS_MS.get(i).map_or(max, |upper| (*upper).min(max));
            }
        }
        max
    }

    fn summary(&self) -> LatencySummary {
        let counts: Vec<u64> = self
            .buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect();
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return LatencySummary::default();
        }
        let total: u64 = counts.iter().sum();
        let max = self.max_ms.load(Ordering::Relaxed);
        LatencySummary {
            count,
            mean_ms: self.sum_ms.load(Ordering::Relaxed) as f64 / count as f64,
            min_ms: self.min_ms.load(Ordering::Relaxed),
            max_ms: max,
            p50_ms: self.quantile(&counts, total, 0.50, max),
            p95_ms: self.quantile(&counts, total, 0.95, max),
            p99_ms: self.quantile(&counts, total, 0.99, max),
        }
    }
}

/// Latency digest for one endpoint. Quantiles are bucket upper bounds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub count: u64,
    pub mean_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

/// Per-service counters broken down by outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceCounts {
    pub routed: u64,
    pub no_available_endpoints: u64,
    pub rejected: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl ServiceCounts {
    /// Balance requests seen, whatever their outcome.
    pub fn requests(&self) -> u64 {
        self.routed + self.no_available_endpoints + self.rejected
    }

    fn add(&mut self, outcome: Outcome, n: u64) {
        match outcome {
            Outcome::Routed => self.routed += n,
            Outcome::NoAvailableEndpoints => self.no_available_endpoints += n,
            Outcome::Rejected => self.rejected += n,
            Outcome::Succeeded => self.succeeded += n,
            Outcome::Failed => self.failed += n,
        }
    }
}

/// Point-in-time copy of everything the aggregator holds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Balance requests, whatever their outcome.
    pub total_requests: u64,
    /// Balance requests per algorithm used.
    pub per_algorithm: BTreeMap<String, u64>,
    pub per_service: BTreeMap<String, ServiceCounts>,
    pub per_endpoint_latency: BTreeMap<String, LatencySummary>,
}

/// Rolling counters and latency histograms.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    total_requests: AtomicU64,
    counters: DashMap<(Algorithm, String, Outcome), AtomicU64>,
    latencies: DashMap<String, LatencyHistogram>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one event for `(algorithm, service, outcome)`.
    pub fn record_request(&self, algorithm: Algorithm, service: &str, outcome: Outcome) {
        if outcome.is_balance_request() {
            self.total_requests.fetch_add(1, Ordering::Relaxed);
        }

        let key = (algorithm, service.to_string(), outcome);
        match self.counters.get(&key) {
            Some(counter) => {
                counter.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                self.counters
                    .entry(key)
                    .or_default()
                    .fetch_add(1, Ordering::Relaxed);
            }
        }

        metrics::counter!(
            "balancer_requests_total",
            "service" => service.to_string(),
            "algorithm" => algorithm.name(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
    }

    /// Record an observed latency for an endpoint.
    pub fn record_latency(&self, endpoint_id: &str, elapsed: Duration) {
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        match self.latencies.get(endpoint_id) {
            Some(histogram) => histogram.record(ms),
            None => self
                .latencies
                .entry(endpoint_id.to_string())
                .or_default()
                .record(ms),
        }

        metrics::histogram!(
            "balancer_endpoint_latency_ms",
            "endpoint" => endpoint_id.to_string()
        )
        .record(ms as f64);
    }

    /// Forget an endpoint's latency history.
    pub fn remove_endpoint(&self, endpoint_id: &str) {
        self.latencies.remove(endpoint_id);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot {
            total_requests: self.total_requests(),
            ..MetricsSnapshot::default()
        };

        for entry in self.counters.iter() {
            let (algorithm, service, outcome) = entry.key();
            let n = entry.value().load(Ordering::Relaxed);
            snapshot
                .per_service
                .entry(service.clone())
                .or_default()
                .add(*outcome, n);
            if outcome.is_balance_request() {
                *snapshot
                    .per_algorithm
                    .entry(algorithm.name().to_string())
                    .or_default() += n;
            }
        }

        for entry in self.latencies.iter() {
            snapshot
                .per_endpoint_latency
                .insert(entry.key().clone(), entry.value().summary());
        }

        snapshot
    }
}

/// Gauge mirror of an endpoint's health.
pub fn record_endpoint_health(endpoint_id: &str, healthy: bool) {
    metrics::gauge!("balancer_endpoint_health", "endpoint" => endpoint_id.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

/// Gauge mirror of an endpoint's connection count.
pub fn record_endpoint_connections(endpoint_id: &str, connections: usize) {
    metrics::gauge!("balancer_endpoint_connections", "endpoint" => endpoint_id.to_string())
        .set(connections as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_by_service_and_algorithm() {
        let m = MetricsAggregator::new();
        m.record_request(Algorithm::RoundRobin, "checkout", Outcome::Routed);
        m.record_request(Algorithm::RoundRobin, "checkout", Outcome::Routed);
        m.record_request(Algorithm::IpHash, "checkout", Outcome::NoAvailableEndpoints);
        m.record_request(Algorithm::RoundRobin, "billing", Outcome::Routed);
        m.record_request(Algorithm::RoundRobin, "billing", Outcome::Succeeded);

        let s = m.snapshot();
        assert_eq!(s.total_requests, 4);
        assert_eq!(s.per_algorithm["round_robin"], 3);
        assert_eq!(s.per_algorithm["ip_hash"], 1);
        assert_eq!(
            s.per_service["checkout"],
            ServiceCounts {
                routed: 2,
                no_available_endpoints: 1,
                ..ServiceCounts::default()
            }
        );
        assert_eq!(s.per_service["billing"].succeeded, 1);
        assert_eq!(s.per_service["billing"].requests(), 1);
    }

    #[test]
    fn test_rejected_counts_as_request() {
        let m = MetricsAggregator::new();
        m.record_request(Algorithm::IpHash, "sessions", Outcome::Rejected);

        let s = m.snapshot();
        assert_eq!(s.total_requests, 1);
        assert_eq!(s.per_algorithm["ip_hash"], 1);
        assert_eq!(s.per_service["sessions"].rejected, 1);
        assert_eq!(s.per_service["sessions"].requests(), 1);
    }

    #[test]
    fn test_latency_summary() {
        let m = MetricsAggregator::new();
        for ms in [3, 8, 20, 40, 90, 90, 90, 90, 90, 4000] {
            m.record_latency("e1", Duration::from_millis(ms));
        }
        let summary = &m.snapshot().per_endpoint_latency["e1"];
        assert_eq!(summary.count, 10);
        assert_eq!(summary.min_ms, 3);
        assert_eq!(summary.max_ms, 4000);
        assert_eq!(summary.p50_ms, 100);
        assert_eq!(summary.p99_ms, 4000);
        assert!((summary.mean_ms - 452.1).abs() < 1e-9);
    }

    #[test]
    fn test_overflow_bucket_reports_max() {
        let m = MetricsAggregator::new();
        m.record_latency("slow", Duration::from_secs(12));
        let summary = &m.snapshot().per_endpoint_latency["slow"];
        assert_eq!(summary.p50_ms, 12_000);
    }

    #[test]
    fn test_remove_endpoint() {
        let m = MetricsAggregator::new();
        m.record_latency("e1", Duration::from_millis(1));
        m.remove_endpoint("e1");
        assert!(m.snapshot().per_endpoint_latency.is_empty());
    }

    #[test]
    fn test_concurrent_increments() {
        let m = std::sync::Arc::new(MetricsAggregator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = m.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        m.record_request(Algorithm::LeastConnections, "svc", Outcome::Routed);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(m.total_requests(), 4000);
        assert_eq!(m.snapshot().per_service["svc"].routed, 4000);
    }
}
