//! Per-node dispatch accounting.
//!
//! The [`LoadBalancer`] keeps a request counter and a failure counter per
//! node. Counters are monotonically increasing for the life of the engine and
//! are exported through the metrics snapshot and Prometheus.
//!
//! Thread-safe: counters are atomics inside a `DashMap`, so concurrent
//! requests on different nodes never contend on a single lock.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::metrics;

#[derive(Debug, Default)]
struct NodeCounters {
    requests: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time counters for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct NodeCounts {
    /// Dispatch attempts routed to the node.
    pub requests: u64,
    /// Attempts that ended in a capacity rejection, timeout or workload error.
    pub failures: u64,
}

impl NodeCounts {
    /// `failures / requests`, or `0.0` before the first request.
    pub fn failure_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.failures as f64 / self.requests as f64
        }
    }
}

/// Per-node request and failure counters.
///
/// # Panics
///
/// This type and its methods never panic.
#[derive(Debug, Default)]
pub struct LoadBalancer {
    counters: DashMap<String, NodeCounters>,
}

impl LoadBalancer {
    /// Create an empty balancer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a balancer with zeroed counters for each of `node_ids`, so
    /// idle nodes still appear in snapshots.
    pub fn with_nodes<'a>(node_ids: impl IntoIterator<Item = &'a str>) -> Self {
        let lb = Self::new();
        for id in node_ids {
            lb.counters.entry(id.to_string()).or_default();
        }
        lb
    }

    /// Count one dispatch attempt to `node_id`.
    pub fn record_dispatch(&self, node_id: &str) {
        self.counters
            .entry(node_id.to_string())
            .or_default()
            .requests
            .fetch_add(1, Ordering::Relaxed);
        metrics::inc_request(node_id);
    }

    /// Count one failed attempt on `node_id`. `kind` labels the failure in
    /// Prometheus (`capacity`, `timeout`, `workload`, …).
    pub fn record_failure(&self, node_id: &str, kind: &str) {
        self.counters
            .entry(node_id.to_string())
            .or_default()
            .failures
            .fetch_add(1, Ordering::Relaxed);
        metrics::inc_failure(node_id, kind);
    }

    /// Counters for one node, if it has been seen.
    pub fn counts(&self, node_id: &str) -> Option<NodeCounts> {
        self.counters.get(node_id).map(|c| NodeCounts {
            requests: c.requests.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
        })
    }

    /// Counters for every node, sorted by id.
    pub fn snapshot(&self) -> BTreeMap<String, NodeCounts> {
        self.counters
            .iter()
            .map(|e| {
                (
                    e.key().clone(),
                    NodeCounts {
                        requests: e.requests.load(Ordering::Relaxed),
                        failures: e.failures.load(Ordering::Relaxed),
                    },
                )
            })
            .collect()
    }
}
