//! # Node Registry
//!
//! ## Responsibility
//! Single source of truth for fleet membership and capacity. Nodes are
//! created from [`NodeDescriptor`]s at startup and never removed.
//!
//! ## Guarantees
//! - Ordered: iteration follows configuration order, which makes scoring
//!   tie-breaks deterministic within a process run.
//! - Single writer: a node's `status` and `health` are written only by the
//!   health monitor (`apply_health` is crate-private); everyone else reads.
//! - Lock-free status reads: status lives in an atomic, so the router never
//!   waits on the health monitor.
//!
//! ## NOT Responsible For
//! - Probing nodes (see: `health`)
//! - Ranking candidates (see: `routing`)
//! - Reserving capacity: eligibility is advisory, nothing is debited on
//!   assignment.

pub mod geo;

pub use geo::GeoPoint;

use crate::request::ResourceRequirements;
use crate::RouterError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Default fraction of stated capacity a single request may claim.
pub const DEFAULT_UTILIZATION_CEILING: f64 = 0.8;

/// Operational status of a node, derived from consecutive probe failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Serving traffic.
    Active,
    /// 1–2 consecutive failed probes.
    Maintenance,
    /// 3–4 consecutive failed probes.
    Degraded,
    /// 5 or more consecutive failed probes.
    Offline,
}

impl NodeStatus {
    /// Map a consecutive-failure count onto a status.
    ///
    /// This is the only way a status is ever derived.
    pub fn from_consecutive_failures(failures: u32) -> Self {
        match failures {
            0 => Self::Active,
            1..=2 => Self::Maintenance,
            3..=4 => Self::Degraded,
            _ => Self::Offline,
        }
    }

    /// Numeric encoding used for the status gauge and atomic storage.
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Maintenance => 1,
            Self::Degraded => 2,
            Self::Offline => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Active,
            1 => Self::Maintenance,
            2 => Self::Degraded,
            _ => Self::Offline,
        }
    }

    /// Lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Maintenance => "maintenance",
            Self::Degraded => "degraded",
            Self::Offline => "offline",
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stated capacity of a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Capacity {
    /// vCPUs.
    pub cpu: f64,
    /// Memory in GB.
    pub memory_gb: f64,
    /// Storage in GB.
    pub storage_gb: f64,
    /// Bandwidth in Gbps.
    pub bandwidth_gbps: f64,
}

/// A requirement that does not fit under a node's utilisation ceiling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacityViolation {
    /// Dimension name (`cpu`, `memory`, `storage`, `bandwidth`).
    pub dimension: &'static str,
    /// Amount requested, in the node's unit.
    pub requested: f64,
    /// Maximum admissible amount.
    pub ceiling: f64,
}

impl Capacity {
    /// Return the first dimension in which `req` exceeds `ceiling × capacity`.
    ///
    /// Absent requirement fields are unconstrained.
    pub fn check(&self, req: &ResourceRequirements, ceiling: f64) -> Option<CapacityViolation> {
        let dims = [
            ("cpu", req.cpu, self.cpu),
            ("memory", req.memory_gb, self.memory_gb),
            ("storage", req.storage_gb, self.storage_gb),
            ("bandwidth", req.min_bandwidth_gbps(), self.bandwidth_gbps),
        ];
        dims.into_iter().find_map(|(dimension, requested, capacity)| {
            let requested = requested?;
            let limit = capacity * ceiling;
            (requested > limit).then_some(CapacityViolation {
                dimension,
                requested,
                ceiling: limit,
            })
        })
    }
}

/// Fleet configuration entry for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NodeDescriptor {
    /// Unique node id.
    pub id: String,
    /// Region label (e.g. `"eu-central"`).
    pub region: String,
    /// Physical location.
    pub location: GeoPoint,
    /// Reachable endpoints (opaque to the router).
    #[serde(default)]
    pub endpoints: Vec<String>,
    /// Stated capacity.
    pub capacity: Capacity,
}

/// Last health snapshot written by the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Probe round-trip latency in ms.
    pub latency_ms: f64,
    /// CPU usage percent.
    pub cpu_usage: f64,
    /// Memory usage percent.
    pub memory_usage: f64,
    /// Disk usage percent.
    pub disk_usage: f64,
    /// Network usage percent.
    pub network_usage: f64,
    /// When the snapshot was taken; `None` until the first probe completes.
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// A node in the fleet.
///
/// Identity, location and capacity are immutable. `status` and `health` are
/// interior-mutable and written only by the health monitor.
#[derive(Debug)]
pub struct Node {
    id: String,
    region: String,
    location: GeoPoint,
    endpoints: Vec<String>,
    capacity: Capacity,
    status: AtomicU8,
    health: RwLock<HealthSnapshot>,
}

impl Node {
    /// Build an active node with an empty health snapshot.
    pub fn new(descriptor: NodeDescriptor) -> Self {
        Self {
            id: descriptor.id,
            region: descriptor.region,
            location: descriptor.location,
            endpoints: descriptor.endpoints,
            capacity: descriptor.capacity,
            status: AtomicU8::new(NodeStatus::Active.as_u8()),
            health: RwLock::new(HealthSnapshot::default()),
        }
    }

    /// Node id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Region label.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Physical location.
    pub fn location(&self) -> GeoPoint {
        self.location
    }

    /// Configured endpoints.
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Stated capacity.
    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    /// Current status.
    pub fn status(&self) -> NodeStatus {
        NodeStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// `true` iff the node is [`NodeStatus::Active`].
    pub fn is_healthy(&self) -> bool {
        self.status() == NodeStatus::Active
    }

    /// Copy of the latest health snapshot.
    pub fn health(&self) -> HealthSnapshot {
        *self.health.read()
    }

    /// Overwrite status and health. Only the health monitor calls this.
    pub(crate) fn apply_health(&self, status: NodeStatus, health: HealthSnapshot) {
        *self.health.write() = health;
        self.status.store(status.as_u8(), Ordering::Release);
    }
}

/// Ordered, immutable-membership registry of fleet nodes.
#[derive(Debug)]
pub struct NodeRegistry {
    nodes: Vec<Arc<Node>>,
    index: HashMap<String, usize>,
    utilization_ceiling: f64,
}

impl NodeRegistry {
    /// Build a registry from fleet descriptors, in order.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Config`] on duplicate node ids.
    pub fn new(descriptors: Vec<NodeDescriptor>) -> Result<Self, RouterError> {
        let mut nodes = Vec::with_capacity(descriptors.len());
        let mut index = HashMap::with_capacity(descriptors.len());
        for d in descriptors {
            if index.contains_key(&d.id) {
                return Err(RouterError::Config(format!("duplicate node id '{}'", d.id)));
            }
            index.insert(d.id.clone(), nodes.len());
            nodes.push(Arc::new(Node::new(d)));
        }
        Ok(Self {
            nodes,
            index,
            utilization_ceiling: DEFAULT_UTILIZATION_CEILING,
        })
    }

    /// Override the utilisation ceiling used by [`list_candidates`](Self::list_candidates).
    pub fn with_utilization_ceiling(mut self, ceiling: f64) -> Self {
        self.utilization_ceiling = ceiling;
        self
    }

    /// The utilisation ceiling in effect.
    pub fn utilization_ceiling(&self) -> f64 {
        self.utilization_ceiling
    }

    /// Active nodes whose capacity admits `req` under the utilisation
    /// ceiling, in registry order. Pure read, no side effects.
    pub fn list_candidates(&self, req: &ResourceRequirements) -> Vec<Arc<Node>> {
        self.nodes
            .iter()
            .filter(|n| n.is_healthy())
            .filter(|n| n.capacity().check(req, self.utilization_ceiling).is_none())
            .cloned()
            .collect()
    }

    /// Look up a node by id.
    pub fn get(&self, id: &str) -> Option<Arc<Node>> {
        self.index.get(id).and_then(|&i| self.nodes.get(i)).cloned()
    }

    /// All nodes in registry order.
    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// `true` if the fleet is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Distinct regions, sorted.
    pub fn regions(&self) -> BTreeSet<String> {
        self.nodes.iter().map(|n| n.region().to_string()).collect()
    }

    /// Fraction of regions with at least one active node. `0.0` for an
    /// empty fleet.
    pub fn coverage(&self) -> f64 {
        let regions = self.regions();
        if regions.is_empty() {
            return 0.0;
        }
        let covered: BTreeSet<&str> = self
            .nodes
            .iter()
            .filter(|n| n.is_healthy())
            .map(|n| n.region())
            .collect();
        covered.len() as f64 / regions.len() as f64
    }
}
