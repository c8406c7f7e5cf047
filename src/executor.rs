//! # Stage: Request Executor
//!
//! ## Responsibility
//! Dispatch a request to the node the router chose, enforcing a capacity
//! check and a timeout at the point of dispatch, and keep the per-node
//! request/failure counters current.
//!
//! ## Guarantees
//! - Every dispatch attempt is counted, before anything can fail.
//! - Capacity is re-checked here regardless of what the router decided:
//!   each requested dimension must be `<= utilization_ceiling × capacity`.
//! - Bounded: the workload runs under `min(request.timeout, global_max_latency)`.
//! - Capacity rejections, timeouts and workload errors all count as failures.
//!
//! ## NOT Responsible For
//! - Choosing nodes (see: `routing`)
//! - Recovering from failure (see: `failover`)
//! - Real network transport: [`WorkloadDispatcher`] is the seam where one
//!   plugs in; [`LocalDispatcher`] evaluates workloads in-process.

use crate::balancer::LoadBalancer;
use crate::fleet::Node;
use crate::request::{CacheOp, ComputeOp, Request, StorageOp, Workload};
use crate::response::{
    AnalyticsResult, CacheResult, ComputeResult, StorageResult, WorkloadResult,
};
use crate::RouterError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// TTL of node-side cache slots written without an explicit `ttl_secs`.
pub const DEFAULT_SLOT_TTL: Duration = Duration::from_secs(3600);

/// Runs a workload on a node.
///
/// Implementations must be thread-safe (Send + Sync) for use across tasks.
/// The trait is object-safe to allow dynamic dispatch via
/// `Arc<dyn WorkloadDispatcher>`.
#[async_trait]
pub trait WorkloadDispatcher: Send + Sync {
    /// Execute `workload` on `node` and return its result.
    async fn dispatch(&self, node: &Node, workload: &Workload)
        -> Result<WorkloadResult, RouterError>;
}

// ============================================================================
// Local Dispatcher
// ============================================================================

/// In-process dispatcher.
///
/// Evaluates all four workload kinds for real: compute and analytics are
/// pure functions of the payload; storage and cache workloads read and write
/// a key/value store private to each node. A processing delay can be
/// simulated globally or per node, and nodes can be marked as failing, which
/// makes the demo binary and tests able to exercise timeouts and failover.
#[derive(Debug, Default)]
pub struct LocalDispatcher {
    delay: Duration,
    node_delays: HashMap<String, Duration>,
    failing: HashSet<String>,
    storage: DashMap<(String, String), String>,
    slots: DashMap<(String, String), (String, Instant)>,
}

impl LocalDispatcher {
    /// Dispatcher with no simulated delay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated processing time for every node.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Simulated processing time for one node, overriding the global delay.
    pub fn with_node_delay(mut self, node_id: impl Into<String>, delay: Duration) -> Self {
        self.node_delays.insert(node_id.into(), delay);
        self
    }

    /// Make every dispatch to `node_id` fail with a workload error.
    pub fn with_failing_node(mut self, node_id: impl Into<String>) -> Self {
        self.failing.insert(node_id.into());
        self
    }

    fn delay_for(&self, node_id: &str) -> Duration {
        self.node_delays.get(node_id).copied().unwrap_or(self.delay)
    }

    fn storage(&self, node: &str, op: StorageOp, key: &str, value: Option<&str>) -> StorageResult {
        let slot = (node.to_string(), key.to_string());
        match op {
            StorageOp::Put => {
                let body = value.unwrap_or_default().to_string();
                let bytes = body.len();
                let previous = self.storage.insert(slot, body);
                StorageResult {
                    operation: op,
                    key: key.to_string(),
                    found: previous.is_some(),
                    value: None,
                    bytes,
                }
            }
            StorageOp::Get => {
                let value = self.storage.get(&slot).map(|v| v.value().clone());
                StorageResult {
                    operation: op,
                    key: key.to_string(),
                    found: value.is_some(),
                    bytes: value.as_ref().map_or(0, String::len),
                    value,
                }
            }
            StorageOp::Delete => {
                let removed = self.storage.remove(&slot).map(|(_, v)| v);
                StorageResult {
                    operation: op,
                    key: key.to_string(),
                    found: removed.is_some(),
                    value: None,
                    bytes: removed.as_ref().map_or(0, String::len),
                }
            }
        }
    }

    fn cache(
        &self,
        node: &str,
        op: CacheOp,
        key: &str,
        value: Option<&str>,
        ttl_secs: Option<u64>,
    ) -> CacheResult {
        let slot = (node.to_string(), key.to_string());
        match op {
            CacheOp::Set => {
                let ttl = ttl_secs.map_or(DEFAULT_SLOT_TTL, Duration::from_secs);
                let previous = self.slots.insert(
                    slot,
                    (value.unwrap_or_default().to_string(), Instant::now() + ttl),
                );
                CacheResult {
                    operation: op,
                    key: key.to_string(),
                    hit: previous.is_some(),
                    value: None,
                    expires_in_ms: None,
                }
            }
            CacheOp::Get => {
                let now = Instant::now();
                let live = self
                    .slots
                    .get(&slot)
                    .filter(|e| now < e.1)
                    .map(|e| (e.0.clone(), e.1 - now));
                CacheResult {
                    operation: op,
                    key: key.to_string(),
                    hit: live.is_some(),
                    expires_in_ms: live.as_ref().map(|(_, left)| left.as_millis() as u64),
                    value: live.map(|(v, _)| v),
                }
            }
        }
    }
}

fn compute(op: ComputeOp, operands: &[f64]) -> Result<ComputeResult, RouterError> {
    if operands.is_empty() {
        return Err(RouterError::WorkloadExecution(
            "compute: no operands".to_string(),
        ));
    }
    let value: f64 = match op {
        ComputeOp::Sum => operands.iter().sum(),
        ComputeOp::Product => operands.iter().product(),
        ComputeOp::Mean => operands.iter().sum::<f64>() / operands.len() as f64,
        ComputeOp::Max => operands.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        ComputeOp::Min => operands.iter().copied().fold(f64::INFINITY, f64::min),
    };
    if !value.is_finite() {
        return Err(RouterError::WorkloadExecution(format!(
            "compute: {op:?} overflowed"
        )));
    }
    Ok(ComputeResult {
        operation: op,
        value,
        operand_count: operands.len(),
    })
}

fn analytics(metric: &str, points: &[f64]) -> Result<AnalyticsResult, RouterError> {
    if points.is_empty() {
        return Err(RouterError::WorkloadExecution(
            "analytics: no points".to_string(),
        ));
    }
    let mut sorted = points.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    // Nearest-rank percentile.
    let rank = ((0.95 * n as f64).ceil() as usize).clamp(1, n);
    Ok(AnalyticsResult {
        metric: metric.to_string(),
        count: n,
        mean: sorted.iter().sum::<f64>() / n as f64,
        min: sorted[0],
        max: sorted[n - 1],
        p95: sorted[rank - 1],
    })
}

#[async_trait]
impl WorkloadDispatcher for LocalDispatcher {
    async fn dispatch(
        &self,
        node: &Node,
        workload: &Workload,
    ) -> Result<WorkloadResult, RouterError> {
        let delay = self.delay_for(node.id());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(node.id()) {
            return Err(RouterError::WorkloadExecution(format!(
                "node {} rejected the workload",
                node.id()
            )));
        }

        let result = match workload {
            Workload::Compute {
                operation,
                operands,
            } => WorkloadResult::Compute(compute(*operation, operands)?),
            Workload::Storage {
                operation,
                key,
                value,
            } => {
                let stored = self.storage(node.id(), *operation, key, value.as_deref());
                WorkloadResult::Storage(stored)
            }
            Workload::Cache {
                operation,
                key,
                value,
                ttl_secs,
            } => WorkloadResult::Cache(self.cache(
                node.id(),
                *operation,
                key,
                value.as_deref(),
                *ttl_secs,
            )),
            Workload::Analytics { metric, points } => {
                WorkloadResult::Analytics(analytics(metric, points)?)
            }
        };
        Ok(result)
    }
}

// ============================================================================
// Request Executor
// ============================================================================

/// A successful dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    /// Workload result.
    pub result: WorkloadResult,
    /// Measured time spent in the dispatcher.
    pub processing_time: Duration,
    /// Modelled network latency to the node, in ms.
    pub network_latency_ms: f64,
}

/// Dispatches requests under capacity and timeout guards.
pub struct RequestExecutor {
    dispatcher: Arc<dyn WorkloadDispatcher>,
    balancer: Arc<LoadBalancer>,
    utilization_ceiling: f64,
    global_max_latency: Duration,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("utilization_ceiling", &self.utilization_ceiling)
            .field("global_max_latency", &self.global_max_latency)
            .finish()
    }
}

impl RequestExecutor {
    /// Create an executor.
    ///
    /// # Arguments
    ///
    /// * `dispatcher`: Where workloads actually run.
    /// * `balancer`: Counters updated on every attempt.
    /// * `utilization_ceiling`: Fraction of node capacity a request may claim.
    /// * `global_max_latency`: Upper bound on any request's timeout.
    pub fn new(
        dispatcher: Arc<dyn WorkloadDispatcher>,
        balancer: Arc<LoadBalancer>,
        utilization_ceiling: f64,
        global_max_latency: Duration,
    ) -> Self {
        Self {
            dispatcher,
            balancer,
            utilization_ceiling,
            global_max_latency,
        }
    }

    /// Timeout applied to `request`: `min(request.timeout, global_max_latency)`.
    pub fn budget(&self, request: &Request) -> Duration {
        request.timeout().min(self.global_max_latency)
    }

    /// The counters this executor updates.
    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    /// Dispatch `request` to `node`.
    ///
    /// # Errors
    ///
    /// - [`RouterError::CapacityExceeded`] if a requirement exceeds the
    ///   utilisation ceiling of `node`.
    /// - [`RouterError::Timeout`] if the workload does not finish within
    ///   [`budget`](Self::budget).
    /// - Whatever the dispatcher returns, typically
    ///   [`RouterError::WorkloadExecution`].
    ///
    /// Each of these is recorded as a failure against `node`.
    pub async fn execute(
        &self,
        node: &Arc<Node>,
        request: &Request,
        network_latency_ms: f64,
    ) -> Result<Execution, RouterError> {
        let node_id = node.id();
        self.balancer.record_dispatch(node_id);

        if let Some(v) = node
            .capacity()
            .check(&request.requirements, self.utilization_ceiling)
        {
            self.balancer.record_failure(node_id, "capacity");
            warn!(
                request_id = %request.id,
                node_id = %node_id,
                dimension = v.dimension,
                requested = v.requested,
                ceiling = v.ceiling,
                "capacity exceeded at dispatch"
            );
            return Err(RouterError::CapacityExceeded {
                node_id: node_id.to_string(),
                dimension: v.dimension,
                requested: v.requested,
                ceiling: v.ceiling,
            });
        }

        let budget = self.budget(request);
        let started = Instant::now();
        let outcome =
            tokio::time::timeout(budget, self.dispatcher.dispatch(node, &request.workload)).await;
        let processing_time = started.elapsed();

        match outcome {
            Ok(Ok(result)) => {
                debug!(
                    request_id = %request.id,
                    node_id = %node_id,
                    processing_ms = processing_time.as_secs_f64() * 1000.0,
                    "dispatch complete"
                );
                Ok(Execution {
                    result,
                    processing_time,
                    network_latency_ms,
                })
            }
            Ok(Err(e)) => {
                self.balancer.record_failure(node_id, "workload");
                warn!(request_id = %request.id, node_id = %node_id, error = %e, "dispatch failed");
                Err(e)
            }
            Err(_) => {
                self.balancer.record_failure(node_id, "timeout");
                let budget_ms = budget.as_millis() as u64;
                warn!(
                    request_id = %request.id,
                    node_id = %node_id,
                    budget_ms,
                    "dispatch timed out"
                );
                Err(RouterError::Timeout {
                    node_id: node_id.to_string(),
                    budget_ms,
                })
            }
        }
    }
}
