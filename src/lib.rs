//! # tokio-edge-router
//!
//! Health-aware request routing and load balancing for a geographically
//! distributed fleet of edge nodes, built on Tokio.
//!
//! ## Architecture
//!
//! ```text
//! Request ─▶ Cache ─(miss)─▶ ScoringRouter ─▶ RequestExecutor ─▶ Response
//!              ▲                  │                 │
//!              │            NodeRegistry      FailoverHandler
//!              └──── populate ◀───┘                 │
//!                                   LoadBalancer counters, EventBus
//!
//! HealthMonitor (own interval) ─▶ NodeRegistry status/health
//! ```
//!
//! The single entry point is [`EdgeEngine::handle`], which always returns a
//! [`Response`]; failures are encoded in [`ResponseStatus`] rather than
//! propagated to the caller.

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod balancer;
pub mod cache;
pub mod config;
pub mod engine;
pub mod events;
pub mod executor;
pub mod failover;
pub mod fleet;
pub mod health;
pub mod metrics;
pub mod request;
pub mod response;
pub mod routing;

// Re-exports for convenience
pub use balancer::{LoadBalancer, NodeCounts};
pub use cache::{cache_key, CacheLayer, CacheStats};
pub use config::EngineConfig;
pub use engine::{EdgeEngine, MetricsSnapshot};
pub use events::{EngineEvent, EventBus};
pub use executor::{Execution, LocalDispatcher, RequestExecutor, WorkloadDispatcher};
pub use failover::{FailoverHandler, FailoverOutcome};
pub use fleet::{Capacity, GeoPoint, HealthSnapshot, Node, NodeDescriptor, NodeRegistry, NodeStatus};
pub use health::{HealthMonitor, HealthProbe, HealthRecord, HealthSample, HealthThresholds};
pub use request::{Priority, Request, ResourceRequirements, Workload, WorkloadKind};
pub use response::{Response, ResponseMetadata, ResponseStatus, WorkloadResult};
pub use routing::{NodeScorer, ScoreBreakdown, ScoringRouter, Selection};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"`: structured JSON output for log aggregators
/// - anything else (including unset): human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`RouterError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Example
///
/// ```no_run
/// # use tokio_edge_router::{init_tracing, RouterError};
/// # fn example() -> Result<(), RouterError> {
/// init_tracing()?;
/// # Ok(()) }
/// ```
pub fn init_tracing() -> Result<(), RouterError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| RouterError::Other(format!("tracing init failed: {e}")))
}

/// Top-level routing errors.
///
/// These never escape [`EdgeEngine::handle`]; they are mapped onto a
/// terminal [`ResponseStatus`] via [`RouterError::response_status`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouterError {
    /// No node passed the capacity and health filters for this request.
    #[error("no suitable node for request {request_id}")]
    NoSuitableNode {
        /// The request that could not be placed.
        request_id: String,
    },

    /// The chosen node cannot host the request under its utilisation ceiling.
    #[error(
        "capacity exceeded on node {node_id}: {dimension} requested {requested}, ceiling {ceiling}"
    )]
    CapacityExceeded {
        /// Node that rejected the request.
        node_id: String,
        /// Resource dimension that overflowed (`cpu`, `memory`, `storage`).
        dimension: &'static str,
        /// Amount requested.
        requested: f64,
        /// Maximum admissible amount on this node.
        ceiling: f64,
    },

    /// Dispatch exceeded its time budget.
    #[error("request timed out on node {node_id} after {budget_ms}ms")]
    Timeout {
        /// Node the request was dispatched to.
        node_id: String,
        /// The budget that elapsed, in milliseconds.
        budget_ms: u64,
    },

    /// The workload-specific operation failed.
    #[error("workload execution failed: {0}")]
    WorkloadExecution(String),

    /// The request payload failed schema validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A configuration value is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

impl RouterError {
    /// Map this error onto the status carried by a terminal response.
    pub fn response_status(&self) -> ResponseStatus {
        match self {
            Self::NoSuitableNode { .. } => ResponseStatus::NodeUnavailable,
            Self::Timeout { .. } => ResponseStatus::Timeout,
            _ => ResponseStatus::Error,
        }
    }

    /// Short, stable label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoSuitableNode { .. } => "no_suitable_node",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::Timeout { .. } => "timeout",
            Self::WorkloadExecution(_) => "workload_execution",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Config(_) => "config",
            Self::Other(_) => "other",
        }
    }
}
