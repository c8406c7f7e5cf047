//! Outbound response model and per-workload result shapes.

use crate::request::{CacheOp, ComputeOp, StorageOp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// The workload completed (on a node or from cache).
    Success,
    /// The workload failed and failover could not recover it.
    Error,
    /// The primary dispatch timed out and failover could not recover it.
    Timeout,
    /// No node was eligible to serve the request.
    NodeUnavailable,
}

impl ResponseStatus {
    /// Lowercase label for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::NodeUnavailable => "node_unavailable",
        }
    }
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a compute workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeResult {
    /// Reduction that was applied.
    pub operation: ComputeOp,
    /// Reduced value.
    pub value: f64,
    /// Number of operands consumed.
    pub operand_count: usize,
}

/// Result of a storage workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageResult {
    /// Operation that was applied.
    pub operation: StorageOp,
    /// Object key.
    pub key: String,
    /// Whether the key existed before the operation.
    pub found: bool,
    /// Object body for `get`, `None` otherwise or when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Size in bytes of the stored or returned body.
    pub bytes: usize,
}

/// Result of a cache workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheResult {
    /// Operation that was applied.
    pub operation: CacheOp,
    /// Slot key.
    pub key: String,
    /// For `get`, whether a live value was present; for `set`, whether the
    /// slot already existed.
    pub hit: bool,
    /// Slot value for a `get` hit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Remaining slot lifetime in ms at the time of a `get` hit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in_ms: Option<u64>,
}

/// Result of an analytics workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsResult {
    /// Metric name echoed back.
    pub metric: String,
    /// Number of points.
    pub count: usize,
    /// Arithmetic mean.
    pub mean: f64,
    /// Smallest point.
    pub min: f64,
    /// Largest point.
    pub max: f64,
    /// 95th percentile (nearest rank).
    pub p95: f64,
}

/// Per-kind workload result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkloadResult {
    /// Compute result.
    Compute(ComputeResult),
    /// Storage result.
    Storage(StorageResult),
    /// Cache result.
    Cache(CacheResult),
    /// Analytics result.
    Analytics(AnalyticsResult),
}

/// Placement metadata attached to a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Region of the serving node.
    pub region: String,
    /// Great-circle distance from the request origin, in km.
    pub distance_km: f64,
    /// Estimated network hop count.
    pub hops: u32,
    /// Transport tag (`"cache"` for cache hits).
    pub protocol: String,
    /// Payload compression tag.
    pub compression: String,
}

impl ResponseMetadata {
    /// Protocol tag for responses served by a node.
    pub const NODE_PROTOCOL: &'static str = "http/2";
    /// Protocol tag for responses served from the engine cache.
    pub const CACHE_PROTOCOL: &'static str = "cache";

    /// Metadata for a response served by a node `distance_km` away.
    pub fn for_node(region: impl Into<String>, distance_km: f64) -> Self {
        Self {
            region: region.into(),
            distance_km,
            hops: estimate_hops(distance_km),
            protocol: Self::NODE_PROTOCOL.to_string(),
            compression: "none".to_string(),
        }
    }
}

/// One hop per started 1000 km, with a floor of one.
pub fn estimate_hops(distance_km: f64) -> u32 {
    let hops = (distance_km / 1000.0).ceil();
    if hops.is_finite() && hops >= 1.0 {
        hops as u32
    } else {
        1
    }
}

/// Response returned for every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Unique response id.
    pub id: String,
    /// The request this answers.
    pub request_id: String,
    /// Serving node, absent when no node was reached.
    pub node_id: Option<String>,
    /// Workload result on success.
    pub data: Option<WorkloadResult>,
    /// Total latency (network + processing) in ms.
    pub latency_ms: f64,
    /// Estimated network component in ms.
    pub network_latency_ms: f64,
    /// Measured processing component in ms.
    pub processing_time_ms: f64,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Terminal status.
    pub status: ResponseStatus,
    /// Failure description for non-success statuses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Placement metadata, absent when no node was reached.
    pub metadata: Option<ResponseMetadata>,
}

impl Response {
    /// Build a success response.
    pub fn success(
        request_id: impl Into<String>,
        node_id: impl Into<String>,
        data: WorkloadResult,
        network_latency_ms: f64,
        processing_time_ms: f64,
        metadata: ResponseMetadata,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: request_id.into(),
            node_id: Some(node_id.into()),
            data: Some(data),
            latency_ms: network_latency_ms + processing_time_ms,
            network_latency_ms,
            processing_time_ms,
            timestamp: Utc::now(),
            status: ResponseStatus::Success,
            error: None,
            metadata: Some(metadata),
        }
    }

    /// Build a success response served from the engine cache.
    ///
    /// No node is involved: `node_id` is `None`, hops are `0` and the
    /// protocol tag is [`ResponseMetadata::CACHE_PROTOCOL`].
    pub fn cached(request_id: impl Into<String>, data: WorkloadResult, elapsed_ms: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: request_id.into(),
            node_id: None,
            data: Some(data),
            latency_ms: elapsed_ms,
            network_latency_ms: 0.0,
            processing_time_ms: elapsed_ms,
            timestamp: Utc::now(),
            status: ResponseStatus::Success,
            error: None,
            metadata: Some(ResponseMetadata {
                region: "edge-cache".to_string(),
                distance_km: 0.0,
                hops: 0,
                protocol: ResponseMetadata::CACHE_PROTOCOL.to_string(),
                compression: "none".to_string(),
            }),
        }
    }

    /// Build a terminal failure response.
    pub fn failure(
        request_id: impl Into<String>,
        node_id: Option<String>,
        status: ResponseStatus,
        error: impl Into<String>,
        elapsed_ms: f64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: request_id.into(),
            node_id,
            data: None,
            latency_ms: elapsed_ms,
            network_latency_ms: 0.0,
            processing_time_ms: elapsed_ms,
            timestamp: Utc::now(),
            status,
            error: Some(error.into()),
            metadata: None,
        }
    }

    /// Return `true` for [`ResponseStatus::Success`].
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}
