//! # Health Monitor
//!
//! ## Responsibility
//! Periodically probe every node, count consecutive failed probes, and derive
//! each node's status from that count:
//!
//! ```text
//! failures:  0        1..=2          3..=4       >=5
//! status:    active   maintenance    degraded    offline
//! ```
//!
//! A single successful probe resets the counter to 0 (and the node to
//! `active`) immediately.
//!
//! ## Guarantees
//! - Sole writer of node `status`/`health`.
//! - Concurrent: every node is probed in parallel each cycle, and each probe
//!   is bounded by `probe_timeout`, so one slow node never holds up another.
//! - Non-throwing: probe errors only advance the state machine and are
//!   logged at `warn`.
//!
//! ## NOT Responsible For
//! - Gathering telemetry (that belongs to a [`HealthProbe`] implementation)
//! - Choosing nodes (see: `routing`)

mod probe;

pub use probe::{HealthProbe, ProbeError, SimulatedProbe};

use crate::events::{EngineEvent, EventBus};
use crate::fleet::{HealthSnapshot, Node, NodeRegistry, NodeStatus};
use crate::metrics;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One set of measurements returned by a [`HealthProbe`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthSample {
    /// Round-trip latency in ms.
    pub latency_ms: f64,
    /// CPU usage percent.
    pub cpu_usage: f64,
    /// Memory usage percent.
    pub memory_usage: f64,
    /// Disk usage percent.
    pub disk_usage: f64,
    /// Network usage percent.
    pub network_usage: f64,
    /// Error rate percent.
    pub error_rate: f64,
}

impl HealthSample {
    fn snapshot_at(&self, at: DateTime<Utc>) -> HealthSnapshot {
        HealthSnapshot {
            latency_ms: self.latency_ms,
            cpu_usage: self.cpu_usage,
            memory_usage: self.memory_usage,
            disk_usage: self.disk_usage,
            network_usage: self.network_usage,
            last_checked_at: Some(at),
        }
    }
}

fn default_latency_ms() -> f64 {
    30.0
}

fn default_cpu_usage() -> f64 {
    85.0
}

fn default_memory_usage() -> f64 {
    80.0
}

fn default_disk_usage() -> f64 {
    85.0
}

fn default_network_usage() -> f64 {
    80.0
}

fn default_error_rate() -> f64 {
    10.0
}

/// Upper bounds (exclusive) a sample must stay under to count as a success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HealthThresholds {
    /// Maximum latency in ms. Default: `30`.
    #[serde(default = "default_latency_ms")]
    pub latency_ms: f64,
    /// Maximum CPU usage percent. Default: `85`.
    #[serde(default = "default_cpu_usage")]
    pub cpu_usage: f64,
    /// Maximum memory usage percent. Default: `80`.
    #[serde(default = "default_memory_usage")]
    pub memory_usage: f64,
    /// Maximum disk usage percent. Default: `85`.
    #[serde(default = "default_disk_usage")]
    pub disk_usage: f64,
    /// Maximum network usage percent. Default: `80`.
    #[serde(default = "default_network_usage")]
    pub network_usage: f64,
    /// Maximum error rate percent. Default: `10`.
    #[serde(default = "default_error_rate")]
    pub error_rate: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            latency_ms: default_latency_ms(),
            cpu_usage: default_cpu_usage(),
            memory_usage: default_memory_usage(),
            disk_usage: default_disk_usage(),
            network_usage: default_network_usage(),
            error_rate: default_error_rate(),
        }
    }
}

impl HealthThresholds {
    /// Names of every threshold `sample` breaches; empty when healthy.
    pub fn breaches(&self, sample: &HealthSample) -> Vec<&'static str> {
        let checks = [
            ("latency", sample.latency_ms, self.latency_ms),
            ("cpu", sample.cpu_usage, self.cpu_usage),
            ("memory", sample.memory_usage, self.memory_usage),
            ("disk", sample.disk_usage, self.disk_usage),
            ("network", sample.network_usage, self.network_usage),
            ("error_rate", sample.error_rate, self.error_rate),
        ];
        checks
            .into_iter()
            // NaN compares false and is treated as a breach.
            .filter(|(_, value, limit)| !(value < limit))
            .map(|(name, _, _)| name)
            .collect()
    }

    /// `true` if `sample` is within every threshold.
    pub fn is_healthy(&self, sample: &HealthSample) -> bool {
        self.breaches(sample).is_empty()
    }
}

/// Per-node bookkeeping owned by the monitor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HealthRecord {
    /// Sequential failed probes since the last success.
    pub consecutive_failures: u32,
    /// Time of the last successful probe.
    pub last_success: Option<DateTime<Utc>>,
    /// Most recent sample, if the probe returned one.
    pub last_sample: Option<HealthSample>,
}

impl HealthRecord {
    /// Status implied by the failure counter.
    pub fn status(&self) -> NodeStatus {
        NodeStatus::from_consecutive_failures(self.consecutive_failures)
    }
}

/// Periodic, concurrent health prober for the whole fleet.
pub struct HealthMonitor {
    registry: Arc<NodeRegistry>,
    probe: Arc<dyn HealthProbe>,
    thresholds: HealthThresholds,
    interval: Duration,
    probe_timeout: Duration,
    records: DashMap<String, HealthRecord>,
    events: EventBus,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("nodes", &self.registry.len())
            .field("thresholds", &self.thresholds)
            .field("interval", &self.interval)
            .field("probe_timeout", &self.probe_timeout)
            .finish()
    }
}

impl HealthMonitor {
    /// Create a monitor. Every node starts with a zeroed record.
    ///
    /// # Arguments
    ///
    /// * `registry`: Fleet whose nodes are probed and updated.
    /// * `probe`: Telemetry source.
    /// * `thresholds`: Success criteria for a sample.
    /// * `interval`: Time between probe cycles.
    /// * `probe_timeout`: Bound on a single probe; elapsing counts as a failure.
    /// * `events`: Bus for `node:unhealthy` events.
    pub fn new(
        registry: Arc<NodeRegistry>,
        probe: Arc<dyn HealthProbe>,
        thresholds: HealthThresholds,
        interval: Duration,
        probe_timeout: Duration,
        events: EventBus,
    ) -> Self {
        let records = DashMap::with_capacity(registry.len());
        for node in registry.nodes() {
            records.insert(node.id().to_string(), HealthRecord::default());
        }
        Self {
            registry,
            probe,
            thresholds,
            interval,
            probe_timeout,
            records,
            events,
        }
    }

    /// Probe every node once, concurrently, and apply the results.
    pub async fn check_all(&self) {
        let checks = self.registry.nodes().iter().map(|node| self.check_node(node));
        let statuses = futures::future::join_all(checks).await;
        let active = statuses
            .iter()
            .filter(|s| **s == NodeStatus::Active)
            .count();
        debug!(nodes = statuses.len(), active = active, "health cycle complete");
    }

    /// Probe a single node, advance its state machine, and write back the
    /// derived status and health snapshot. Returns the new status.
    pub async fn check_node(&self, node: &Arc<Node>) -> NodeStatus {
        let outcome = tokio::time::timeout(self.probe_timeout, self.probe.probe(node)).await;

        let (sample, failure) = match outcome {
            Ok(Ok(sample)) => {
                let breaches = self.thresholds.breaches(&sample);
                let failure = (!breaches.is_empty())
                    .then(|| format!("thresholds breached: {}", breaches.join(",")));
                (Some(sample), failure)
            }
            Ok(Err(e)) => (None, Some(e.to_string())),
            Err(_) => (
                None,
                Some(format!("probe timed out after {}ms", self.probe_timeout.as_millis())),
            ),
        };

        let now = Utc::now();
        let (previous, record) = {
            let mut entry = self.records.entry(node.id().to_string()).or_default();
            let previous = entry.status();
            match &failure {
                None => {
                    entry.consecutive_failures = 0;
                    entry.last_success = Some(now);
                }
                Some(_) => {
                    entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
                }
            }
            if sample.is_some() {
                entry.last_sample = sample;
            }
            (previous, entry.clone())
        };

        let status = record.status();
        let snapshot = match sample {
            Some(s) => s.snapshot_at(now),
            None => HealthSnapshot {
                last_checked_at: Some(now),
                ..node.health()
            },
        };
        node.apply_health(status, snapshot);
        metrics::set_node_status(node.id(), status);

        if let Some(reason) = &failure {
            warn!(
                node_id = node.id(),
                consecutive_failures = record.consecutive_failures,
                status = %status,
                reason = %reason,
                "health probe failed"
            );
        }

        if status != previous {
            info!(
                node_id = node.id(),
                from = %previous,
                to = %status,
                "node status changed"
            );
            if status != NodeStatus::Active {
                self.events.publish(EngineEvent::NodeUnhealthy {
                    node_id: node.id().to_string(),
                    status,
                });
            }
        }

        status
    }

    /// Current record for `node_id`.
    pub fn record(&self, node_id: &str) -> Option<HealthRecord> {
        self.records.get(node_id).map(|r| r.clone())
    }

    /// Configured probe interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the periodic probe loop.
    ///
    /// The loop runs until `shutdown` flips or its sender is dropped. The
    /// first cycle runs immediately.
    pub fn start(
        self: &Arc<Self>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.check_all().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("health monitor shutdown signal received");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::{Capacity, GeoPoint, NodeDescriptor};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Probe whose verdict is flipped by the test.
    struct SwitchProbe {
        healthy: AtomicBool,
        calls: AtomicUsize,
    }

    impl SwitchProbe {
        fn new(healthy: bool) -> Self {
            Self {
                healthy: AtomicBool::new(healthy),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl HealthProbe for SwitchProbe {
        async fn probe(&self, _node: &Node) -> Result<HealthSample, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.healthy.load(Ordering::SeqCst) {
                Ok(HealthSample {
                    latency_ms: 5.0,
                    cpu_usage: 20.0,
                    memory_usage: 30.0,
                    disk_usage: 40.0,
                    network_usage: 10.0,
                    error_rate: 0.5,
                })
            } else {
                Err(ProbeError::Unreachable("connection refused".into()))
            }
        }
    }

    /// Probe that never answers.
    struct HangingProbe;

    #[async_trait]
    impl HealthProbe for HangingProbe {
        async fn probe(&self, _node: &Node) -> Result<HealthSample, ProbeError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(HealthSample::default())
        }
    }

    /// Probe that hangs for one node and answers immediately for the rest.
    struct StallOneProbe {
        stalled: &'static str,
    }

    #[async_trait]
    impl HealthProbe for StallOneProbe {
        async fn probe(&self, node: &Node) -> Result<HealthSample, ProbeError> {
            if node.id() == self.stalled {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(healthy_sample())
        }
    }

    fn registry() -> Arc<NodeRegistry> {
        let d = |id: &str| NodeDescriptor {
            id: id.into(),
            region: "eu".into(),
            location: GeoPoint::new(50.0, 8.0),
            endpoints: vec![],
            capacity: Capacity {
                cpu: 16.0,
                memory_gb: 32.0,
                storage_gb: 500.0,
                bandwidth_gbps: 10.0,
            },
        };
        Arc::new(NodeRegistry::new(vec![d("n1"), d("n2")]).expect("test: registry"))
    }

    fn monitor(probe: Arc<dyn HealthProbe>, events: EventBus) -> HealthMonitor {
        HealthMonitor::new(
            registry(),
            probe,
            HealthThresholds::default(),
            Duration::from_millis(20),
            Duration::from_millis(50),
            events,
        )
    }

    fn healthy_sample() -> HealthSample {
        HealthSample {
            latency_ms: 10.0,
            cpu_usage: 50.0,
            memory_usage: 50.0,
            disk_usage: 50.0,
            network_usage: 50.0,
            error_rate: 1.0,
        }
    }

    #[test]
    fn test_thresholds_accept_healthy_sample() {
        assert!(HealthThresholds::default().is_healthy(&healthy_sample()));
    }

    #[test]
    fn test_each_threshold_breach_is_reported() {
        let t = HealthThresholds::default();
        let cases: [(fn(&mut HealthSample), &str); 6] = [
            (|s| s.latency_ms = 30.0, "latency"),
            (|s| s.cpu_usage = 85.0, "cpu"),
            (|s| s.memory_usage = 80.0, "memory"),
            (|s| s.disk_usage = 90.0, "disk"),
            (|s| s.network_usage = 81.0, "network"),
            (|s| s.error_rate = 10.0, "error_rate"),
        ];
        for (breach, name) in cases {
            let mut sample = healthy_sample();
            breach(&mut sample);
            assert_eq!(t.breaches(&sample), vec![name]);
        }
    }

    #[test]
    fn test_nan_metric_is_a_breach() {
        let t = HealthThresholds::default();
        let s = HealthSample {
            cpu_usage: f64::NAN,
            ..healthy_sample()
        };
        assert!(!t.is_healthy(&s));
    }

    #[tokio::test]
    async fn test_state_machine_walks_to_offline_and_resets() {
        let probe = Arc::new(SwitchProbe::new(false));
        let m = monitor(probe.clone(), EventBus::new(16));
        let node = m.registry.get("n1").expect("test: node");

        let expected = [
            NodeStatus::Maintenance,
            NodeStatus::Maintenance,
            NodeStatus::Degraded,
            NodeStatus::Degraded,
            NodeStatus::Offline,
            NodeStatus::Offline,
        ];
        for want in expected {
            assert_eq!(m.check_node(&node).await, want);
            assert_eq!(node.status(), want);
        }
        assert_eq!(m.record("n1").map(|r| r.consecutive_failures), Some(6));

        probe.healthy.store(true, Ordering::SeqCst);
        assert_eq!(m.check_node(&node).await, NodeStatus::Active);
        let record = m.record("n1").expect("test: record");
        assert_eq!(record.consecutive_failures, 0);
        assert!(record.last_success.is_some());
        assert!(node.is_healthy());
    }

    #[tokio::test]
    async fn test_threshold_breach_counts_as_failure() {
        struct HotProbe;
        #[async_trait]
        impl HealthProbe for HotProbe {
            async fn probe(&self, _node: &Node) -> Result<HealthSample, ProbeError> {
                Ok(HealthSample {
                    cpu_usage: 99.0,
                    ..HealthSample::default()
                })
            }
        }

        let m = monitor(Arc::new(HotProbe), EventBus::new(16));
        let node = m.registry.get("n2").expect("test: node");
        assert_eq!(m.check_node(&node).await, NodeStatus::Maintenance);
        // The breaching sample is still recorded as the node's health.
        assert_eq!(node.health().cpu_usage, 99.0);
    }

    #[tokio::test]
    async fn test_probe_timeout_counts_as_failure() {
        let m = monitor(Arc::new(HangingProbe), EventBus::new(16));
        let node = m.registry.get("n1").expect("test: node");
        let status = tokio::time::timeout(Duration::from_secs(2), m.check_node(&node))
            .await
            .expect("test: probe timeout must bound the check");
        assert_eq!(status, NodeStatus::Maintenance);
    }

    #[tokio::test]
    async fn test_stalled_node_does_not_delay_other_checks() {
        let m = Arc::new(HealthMonitor::new(
            registry(),
            Arc::new(StallOneProbe { stalled: "n1" }),
            HealthThresholds::default(),
            Duration::from_millis(20),
            Duration::from_secs(10),
            EventBus::new(16),
        ));
        let n1 = m.registry.get("n1").expect("test: n1");
        let n2 = m.registry.get("n2").expect("test: n2");

        let stalled = {
            let m = Arc::clone(&m);
            let n1 = Arc::clone(&n1);
            tokio::spawn(async move { m.check_node(&n1).await })
        };
        tokio::task::yield_now().await;

        let status = tokio::time::timeout(Duration::from_millis(500), m.check_node(&n2))
            .await
            .expect("test: n2 check must not wait on n1");
        assert_eq!(status, NodeStatus::Active);
        assert!(n2.health().last_checked_at.is_some());
        assert_eq!(n2.health().cpu_usage, healthy_sample().cpu_usage);

        // n1 is still inside its probe window and untouched.
        assert!(!stalled.is_finished());
        assert!(n1.health().last_checked_at.is_none());
        stalled.abort();
    }

    #[tokio::test]
    async fn test_check_all_is_bounded_by_check_timeout_not_stalled_node() {
        let m = HealthMonitor::new(
            registry(),
            Arc::new(StallOneProbe { stalled: "n1" }),
            HealthThresholds::default(),
            Duration::from_millis(20),
            Duration::from_millis(100),
            EventBus::new(16),
        );
        tokio::time::timeout(Duration::from_secs(2), m.check_all())
            .await
            .expect("test: sweep bounded by check timeout");
        let n1 = m.registry.get("n1").expect("test: n1");
        let n2 = m.registry.get("n2").expect("test: n2");
        assert_eq!(n1.status(), NodeStatus::Maintenance);
        assert_eq!(n2.status(), NodeStatus::Active);
        assert!(n2.health().last_checked_at.is_some());
    }

    #[tokio::test]
    async fn test_check_all_probes_every_node() {
        let probe = Arc::new(SwitchProbe::new(true));
        let m = monitor(probe.clone(), EventBus::new(16));
        m.check_all().await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
        for node in m.registry.nodes() {
            assert!(node.health().last_checked_at.is_some());
        }
    }

    #[tokio::test]
    async fn test_unhealthy_event_emitted_on_transition_only() {
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let m = monitor(Arc::new(SwitchProbe::new(false)), events);
        let node = m.registry.get("n1").expect("test: node");

        m.check_node(&node).await; // active -> maintenance
        m.check_node(&node).await; // maintenance -> maintenance (no event)
        m.check_node(&node).await; // maintenance -> degraded

        let first = rx.try_recv().expect("test: first event");
        assert_eq!(
            first,
            EngineEvent::NodeUnhealthy {
                node_id: "n1".into(),
                status: NodeStatus::Maintenance
            }
        );
        let second = rx.try_recv().expect("test: second event");
        assert_eq!(
            second,
            EngineEvent::NodeUnhealthy {
                node_id: "n1".into(),
                status: NodeStatus::Degraded
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_start_loop_stops_on_shutdown() {
        let probe = Arc::new(SwitchProbe::new(true));
        let m = Arc::new(monitor(probe.clone(), EventBus::new(16)));
        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = m.start(rx);

        tokio::time::sleep(Duration::from_millis(70)).await;
        let _ = tx.send(true);
        let joined = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(joined.is_ok());
        assert!(probe.calls.load(Ordering::SeqCst) >= 2);
    }
}
