//! # Edge Engine
//!
//! ## Responsibility
//! Own every component and drive one request through them:
//!
//! ```text
//! validate ─▶ cache ─(miss)─▶ select ─▶ execute ─(fail)─▶ failover
//!                                          │                  │
//!                                          └──▶ populate cache, check latency target
//! ```
//!
//! ## Guarantees
//! - [`EdgeEngine::handle`] never errors: every outcome is a [`Response`]
//!   whose status encodes it.
//! - Writes (`storage put/delete`, `cache set`) never read from or populate
//!   the response cache, and drop any cached read of the same key.
//! - A cached slot read never outlives the slot it was read from.
//! - Lifecycle: [`start`](EdgeEngine::start) spawns the health loop once;
//!   [`shutdown`](EdgeEngine::shutdown) stops it and closes the event bus.
//!
//! ## NOT Responsible For
//! - Transport: requests arrive as values and leave as values
//! - Retrying beyond the single failover attempt

use crate::balancer::{LoadBalancer, NodeCounts};
use crate::cache::{cache_key, CacheLayer, CacheStats};
use crate::config::{validation, EngineConfig};
use crate::events::{EngineEvent, EventBus};
use crate::executor::{LocalDispatcher, RequestExecutor, WorkloadDispatcher};
use crate::failover::{FailoverHandler, FailoverOutcome};
use crate::fleet::NodeRegistry;
use crate::health::{HealthMonitor, HealthProbe, SimulatedProbe};
use crate::metrics;
use crate::request::{CacheOp, Request, StorageOp, Workload};
use crate::response::{CacheResult, Response, ResponseMetadata, ResponseStatus, WorkloadResult};
use crate::routing::ScoringRouter;
use crate::RouterError;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Point-in-time operational summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Request and failure counts per node.
    pub nodes: BTreeMap<String, NodeCounts>,
    /// Response cache statistics.
    pub cache: CacheStats,
    /// Fraction of regions with at least one active node.
    pub fleet_coverage: f64,
    /// Failover invocations.
    pub failovers: u64,
    /// Responses that exceeded their latency target.
    pub latency_violations: u64,
}

/// The routing engine.
pub struct EdgeEngine {
    config: EngineConfig,
    registry: Arc<NodeRegistry>,
    monitor: Arc<HealthMonitor>,
    router: Arc<ScoringRouter>,
    balancer: Arc<LoadBalancer>,
    executor: Arc<RequestExecutor>,
    failover: FailoverHandler,
    cache: CacheLayer,
    events: EventBus,
    shutdown_tx: watch::Sender<bool>,
    health_task: Mutex<Option<JoinHandle<()>>>,
    latency_violations: AtomicU64,
}

impl std::fmt::Debug for EdgeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeEngine")
            .field("nodes", &self.registry.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl EdgeEngine {
    /// Build an engine from a validated config, a telemetry source and a
    /// workload dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Config`] if `config` fails validation.
    pub fn new(
        config: EngineConfig,
        probe: Arc<dyn HealthProbe>,
        dispatcher: Arc<dyn WorkloadDispatcher>,
    ) -> Result<Self, RouterError> {
        validation::validate(&config).map_err(|errors| {
            RouterError::Config(
                errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        })?;

        let events = EventBus::new(config.engine.event_capacity);
        let registry = Arc::new(
            NodeRegistry::new(config.fleet.clone())?
                .with_utilization_ceiling(config.scoring.utilization_ceiling),
        );
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            probe,
            config.health.thresholds.clone(),
            Duration::from_millis(config.health.interval_ms),
            Duration::from_millis(config.health.probe_timeout_ms),
            events.clone(),
        ));
        let router = Arc::new(ScoringRouter::new(
            Arc::clone(&registry),
            config.scoring.clone(),
            config.engine.target_latency_ms as f64,
            events.clone(),
        ));
        let balancer = Arc::new(LoadBalancer::with_nodes(
            registry.nodes().iter().map(|n| n.id()),
        ));
        let executor = Arc::new(RequestExecutor::new(
            dispatcher,
            Arc::clone(&balancer),
            config.scoring.utilization_ceiling,
            config.engine.global_max_latency(),
        ));
        let failover = FailoverHandler::new(Arc::clone(&router), Arc::clone(&executor));
        let cache = CacheLayer::new(config.cache.max_entries);
        let (shutdown_tx, _) = watch::channel(false);

        info!(
            nodes = registry.len(),
            regions = registry.regions().len(),
            global_max_latency_ms = config.engine.global_max_latency_ms,
            "edge engine initialised"
        );

        Ok(Self {
            config,
            registry,
            monitor,
            router,
            balancer,
            executor,
            failover,
            cache,
            events,
            shutdown_tx,
            health_task: Mutex::new(None),
            latency_violations: AtomicU64::new(0),
        })
    }

    /// Build an engine with the simulated probe and the in-process dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Config`] if `config` fails validation.
    pub fn with_defaults(config: EngineConfig) -> Result<Self, RouterError> {
        Self::new(
            config,
            Arc::new(SimulatedProbe::default()),
            Arc::new(LocalDispatcher::new()),
        )
    }

    /// Spawn the health loop. Calling it again while running is a no-op.
    pub fn start(&self) {
        let mut task = self.health_task.lock();
        if task.is_some() {
            return;
        }
        *task = Some(self.monitor.start(self.shutdown_tx.subscribe()));
        info!(interval_ms = self.config.health.interval_ms, "health loop started");
    }

    /// `true` while the health loop is running.
    pub fn is_running(&self) -> bool {
        self.health_task.lock().is_some()
    }

    /// Stop the health loop, wait for it to exit, and close the event bus.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.health_task.lock().take();
        if let Some(handle) = task {
            if let Err(e) = handle.await {
                warn!(error = %e, "health loop ended abnormally");
            }
        }
        self.events.close();
        info!("edge engine shut down");
    }

    /// Route and execute one request.
    pub async fn handle(&self, request: Request) -> Response {
        let started = Instant::now();
        let response = self.process(&request, started).await;
        metrics::record_request_duration(response.status, started.elapsed());
        response
    }

    async fn process(&self, request: &Request, started: Instant) -> Response {
        let elapsed_ms = || started.elapsed().as_secs_f64() * 1000.0;

        if let Err(e) = request.workload.validate() {
            debug!(request_id = %request.id, error = %e, "request rejected");
            return Response::failure(
                &request.id,
                None,
                ResponseStatus::Error,
                e.to_string(),
                elapsed_ms(),
            );
        }

        let cacheable = request.workload.is_cacheable();
        let key = cache_key(&request.workload);
        if cacheable {
            if let Some(data) = self.cached(&key) {
                metrics::record_cache_lookup(true);
                debug!(request_id = %request.id, key = %key, "served from cache");
                return Response::cached(&request.id, data, elapsed_ms());
            }
            metrics::record_cache_lookup(false);
        }

        let selection = match self.router.select(request) {
            Ok(s) => s,
            Err(e) => {
                warn!(request_id = %request.id, error = %e, "no node available");
                return Response::failure(
                    &request.id,
                    None,
                    e.response_status(),
                    e.to_string(),
                    elapsed_ms(),
                );
            }
        };

        let network_ms = selection.breakdown.estimated_latency_ms;
        let outcome = self
            .executor
            .execute(&selection.node, request, network_ms)
            .await;
        let (selection, execution) = match outcome {
            Ok(execution) => (selection, execution),
            Err(primary) => match self
                .failover
                .handle(request, selection.node.id(), &primary)
                .await
            {
                FailoverOutcome::Recovered {
                    selection,
                    execution,
                } => (selection, execution),
                FailoverOutcome::Unrecoverable { reason } => {
                    return Response::failure(
                        &request.id,
                        Some(selection.node.id().to_string()),
                        primary.response_status(),
                        reason,
                        elapsed_ms(),
                    );
                }
            },
        };

        if cacheable {
            self.populate(key, &request.workload, &execution.result);
        } else if let Some(stale) = cached_read_of(&request.workload) {
            self.cache.delete(&stale);
        }

        let node = &selection.node;
        let response = Response::success(
            &request.id,
            node.id(),
            execution.result,
            execution.network_latency_ms,
            execution.processing_time.as_secs_f64() * 1000.0,
            ResponseMetadata::for_node(node.region(), selection.breakdown.distance_km),
        );

        let threshold_ms = request
            .requirements
            .max_latency_ms
            .unwrap_or(self.config.engine.target_latency_ms) as f64;
        if response.latency_ms > threshold_ms {
            self.latency_violations.fetch_add(1, Ordering::Relaxed);
            metrics::inc_latency_violation(node.id());
            warn!(
                request_id = %request.id,
                node_id = %node.id(),
                latency_ms = response.latency_ms,
                threshold_ms,
                "latency target exceeded"
            );
            self.events.publish(EngineEvent::LatencyViolation {
                request_id: request.id.clone(),
                node_id: node.id().to_string(),
                latency_ms: response.latency_ms,
                threshold_ms,
            });
        }

        response
    }

    fn cached(&self, key: &str) -> Option<WorkloadResult> {
        let raw = self.cache.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(key = %key, error = %e, "dropping undecodable cache entry");
                self.cache.delete(key);
                None
            }
        }
    }

    fn populate(&self, key: String, workload: &Workload, result: &WorkloadResult) {
        let Some(ttl) = self.cache_ttl(workload, result) else {
            return;
        };
        match serde_json::to_string(result) {
            Ok(raw) => self.cache.set(key, raw, ttl),
            Err(e) => warn!(error = %e, "result not cacheable"),
        }
    }

    /// How long `result` may be served from the response cache; `None` when
    /// it must not be cached at all.
    ///
    /// A slot read lives no longer than the slot it came from. Slot misses
    /// and hits of unknown lifetime are never cached.
    fn cache_ttl(&self, workload: &Workload, result: &WorkloadResult) -> Option<Duration> {
        let ttl = self.config.cache.ttl_secs.for_kind(workload.kind());
        match result {
            WorkloadResult::Cache(CacheResult {
                hit: true,
                expires_in_ms: Some(left),
                ..
            }) => Some(ttl.min(Duration::from_millis(*left))).filter(|d| !d.is_zero()),
            WorkloadResult::Cache(_) => None,
            _ => Some(ttl),
        }
    }

    /// Operational summary: per-node counters, cache stats, coverage.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            nodes: self.balancer.snapshot(),
            cache: self.cache.stats(),
            fleet_coverage: self.registry.coverage(),
            failovers: self.failover.invocations(),
            latency_violations: self.latency_violations.load(Ordering::Relaxed),
        }
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// The fleet.
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// The health monitor, for on-demand probe cycles.
    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    /// The configuration in effect.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Cache key of the read that a write to the same key would make stale.
fn cached_read_of(workload: &Workload) -> Option<String> {
    match workload {
        Workload::Storage {
            operation: StorageOp::Put | StorageOp::Delete,
            key,
            ..
        } => Some(cache_key(&Workload::Storage {
            operation: StorageOp::Get,
            key: key.clone(),
            value: None,
        })),
        Workload::Cache {
            operation: CacheOp::Set,
            key,
            ..
        } => Some(cache_key(&Workload::Cache {
            operation: CacheOp::Get,
            key: key.clone(),
            value: None,
            ttl_secs: None,
        })),
        _ => None,
    }
}
