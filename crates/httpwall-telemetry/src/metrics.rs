//! Request-level counters for the rule chains

use httpwall_policy::ChainResult;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics collector for chain evaluation
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    total_requests: AtomicU64,
    chain_runs: AtomicU64,
    rules_fired: AtomicU64,
    aborts: AtomicU64,
    anomalies: AtomicU64,
    blocked_requests: AtomicU64,
    total_latency_us: AtomicU64,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                total_requests: AtomicU64::new(0),
                chain_runs: AtomicU64::new(0),
                rules_fired: AtomicU64::new(0),
                aborts: AtomicU64::new(0),
                anomalies: AtomicU64::new(0),
                blocked_requests: AtomicU64::new(0),
                total_latency_us: AtomicU64::new(0),
            }),
        }
    }

    /// Record a request entering the boundary
    pub fn record_request(&self) {
        self.inner.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request answered by the enforcer instead of the application
    pub fn record_blocked(&self) {
        self.inner.blocked_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold one chain run into the counters
    pub fn record_chain(&self, result: &ChainResult) {
        let inner = &self.inner;
        inner.chain_runs.fetch_add(1, Ordering::Relaxed);
        inner
            .rules_fired
            .fetch_add(result.fired().count() as u64, Ordering::Relaxed);
        inner
            .anomalies
            .fetch_add(result.anomalies().count() as u64, Ordering::Relaxed);
        if !result.is_allowed() {
            inner.aborts.fetch_add(1, Ordering::Relaxed);
        }
        inner
            .total_latency_us
            .fetch_add(result.latency.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = &self.inner;
        MetricsSnapshot {
            total_requests: inner.total_requests.load(Ordering::Relaxed),
            chain_runs: inner.chain_runs.load(Ordering::Relaxed),
            rules_fired: inner.rules_fired.load(Ordering::Relaxed),
            aborts: inner.aborts.load(Ordering::Relaxed),
            anomalies: inner.anomalies.load(Ordering::Relaxed),
            blocked_requests: inner.blocked_requests.load(Ordering::Relaxed),
            total_latency_us: inner.total_latency_us.load(Ordering::Relaxed),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of current metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub chain_runs: u64,
    pub rules_fired: u64,
    pub aborts: u64,
    pub anomalies: u64,
    pub blocked_requests: u64,
    pub total_latency_us: u64,
}

impl MetricsSnapshot {
    /// Average time spent in a chain run
    pub fn avg_chain_latency_us(&self) -> u64 {
        if self.chain_runs == 0 {
            0
        } else {
            self.total_latency_us / self.chain_runs
        }
    }

    /// Share of chain runs that were aborted
    pub fn abort_rate(&self) -> f64 {
        if self.chain_runs == 0 {
            0.0
        } else {
            self.aborts as f64 / self.chain_runs as f64
        }
    }

    /// Share of requests that never reached the client as produced
    pub fn block_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.blocked_requests as f64 / self.total_requests as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpwall_policy::{Disposition, FlushedResponse, Outcome, RuleOutcome};
    use std::time::Duration;

    fn result(outcomes: Vec<(&str, Outcome)>, abort: bool, latency_us: u64) -> ChainResult {
        let outcomes: Vec<RuleOutcome> = outcomes
            .into_iter()
            .map(|(id, outcome)| RuleOutcome {
                rule_id: id.to_string(),
                outcome,
            })
            .collect();
        let disposition = match (abort, outcomes.last()) {
            (true, Some(last)) => Disposition::Abort {
                rule_id: last.rule_id.clone(),
                outcome: last.outcome.clone(),
            },
            _ => Disposition::Allow,
        };
        ChainResult {
            disposition,
            outcomes,
            flushed: FlushedResponse::default(),
            latency: Duration::from_micros(latency_us),
        }
    }

    #[test]
    fn test_metrics_collection() {
        let metrics = MetricsCollector::new();

        metrics.record_request();
        metrics.record_chain(&result(
            vec![("a", Outcome::applied()), ("b", Outcome::anomaly("bad input")), ("c", Outcome::no_op())],
            false,
            300,
        ));
        metrics.record_request();
        metrics.record_chain(&result(vec![("d", Outcome::abort(None))], true, 100));
        metrics.record_blocked();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.chain_runs, 2);
        assert_eq!(snapshot.rules_fired, 2);
        assert_eq!(snapshot.anomalies, 1);
        assert_eq!(snapshot.aborts, 1);
        assert_eq!(snapshot.avg_chain_latency_us(), 200);
        assert_eq!(snapshot.abort_rate(), 0.5);
        assert_eq!(snapshot.block_rate(), 0.5);
    }

    #[test]
    fn test_empty_snapshot_rates() {
        let snapshot = MetricsCollector::default().snapshot();
        assert_eq!(snapshot.avg_chain_latency_us(), 0);
        assert_eq!(snapshot.abort_rate(), 0.0);
        assert_eq!(snapshot.block_rate(), 0.0);
    }
}
