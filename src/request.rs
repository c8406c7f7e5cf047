//! Inbound request model.
//!
//! A [`Request`] is immutable once built and lives for one routing cycle.
//! Its payload is a [`Workload`], a tagged union over the four supported
//! workload kinds, each with its own schema checked by
//! [`Workload::validate`] before the request is routed.

use crate::fleet::GeoPoint;
use crate::RouterError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default per-request timeout when the caller does not set one.
const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Request priority. Carried through to logs and events; it does not alter
/// scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Must be served ahead of everything else.
    Critical,
    /// Elevated priority.
    High,
    /// Default priority.
    #[default]
    Normal,
    /// Best effort.
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        };
        f.write_str(s)
    }
}

/// Resource requirements attached to a request.
///
/// Absent fields impose no constraint. Units: `cpu` in vCPUs, `memory_gb`
/// and `storage_gb` in GB, `min_bandwidth_mbps` in Mbps (node bandwidth is
/// advertised in Gbps).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// Latency budget for this request in milliseconds.
    pub max_latency_ms: Option<u64>,
    /// Minimum bandwidth in Mbps.
    pub min_bandwidth_mbps: Option<f64>,
    /// Required vCPUs.
    pub cpu: Option<f64>,
    /// Required memory in GB.
    pub memory_gb: Option<f64>,
    /// Required storage in GB.
    pub storage_gb: Option<f64>,
}

impl ResourceRequirements {
    /// Minimum bandwidth converted to Gbps, the unit nodes advertise.
    pub fn min_bandwidth_gbps(&self) -> Option<f64> {
        self.min_bandwidth_mbps.map(|mbps| mbps / 1000.0)
    }
}

/// Discriminant of a [`Workload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    /// Numeric computation.
    Compute,
    /// Durable key/value storage.
    Storage,
    /// Edge key/value cache.
    Cache,
    /// Aggregate statistics over a series.
    Analytics,
}

impl WorkloadKind {
    /// Lowercase name used in cache keys, metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compute => "compute",
            Self::Storage => "storage",
            Self::Cache => "cache",
            Self::Analytics => "analytics",
        }
    }
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arithmetic reduction applied by a compute workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeOp {
    /// Sum of operands.
    Sum,
    /// Product of operands.
    Product,
    /// Arithmetic mean of operands.
    Mean,
    /// Largest operand.
    Max,
    /// Smallest operand.
    Min,
}

/// Operation for a storage workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageOp {
    /// Write `value` under `key`.
    Put,
    /// Read `key`.
    Get,
    /// Remove `key`.
    Delete,
}

/// Operation for a cache workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOp {
    /// Read `key`.
    Get,
    /// Write `value` under `key`.
    Set,
}

/// Workload payload, one variant per supported workload kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Workload {
    /// Reduce a list of operands.
    Compute {
        /// Reduction to apply.
        operation: ComputeOp,
        /// Input values; must be non-empty and finite.
        operands: Vec<f64>,
    },
    /// Read or write a durable object.
    Storage {
        /// Storage operation.
        operation: StorageOp,
        /// Object key; must be non-empty.
        key: String,
        /// Object body, required for `put`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    /// Read or write an edge cache slot.
    Cache {
        /// Cache operation.
        operation: CacheOp,
        /// Slot key; must be non-empty.
        key: String,
        /// Slot value, required for `set`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        /// Caller-chosen TTL, overriding the engine default for this kind.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ttl_secs: Option<u64>,
    },
    /// Summarise a numeric series.
    Analytics {
        /// Name of the metric being summarised.
        metric: String,
        /// Data points; must be non-empty and finite.
        points: Vec<f64>,
    },
}

impl Workload {
    /// Return the discriminant of this workload.
    pub fn kind(&self) -> WorkloadKind {
        match self {
            Self::Compute { .. } => WorkloadKind::Compute,
            Self::Storage { .. } => WorkloadKind::Storage,
            Self::Cache { .. } => WorkloadKind::Cache,
            Self::Analytics { .. } => WorkloadKind::Analytics,
        }
    }

    /// Return `true` for read-only workloads whose results may be cached.
    ///
    /// Writes (`storage put/delete`, `cache set`) always reach a node.
    pub fn is_cacheable(&self) -> bool {
        match self {
            Self::Compute { .. } | Self::Analytics { .. } => true,
            Self::Storage { operation, .. } => *operation == StorageOp::Get,
            Self::Cache { operation, .. } => *operation == CacheOp::Get,
        }
    }

    /// Check the per-kind schema.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::InvalidRequest`] describing the first violation.
    pub fn validate(&self) -> Result<(), RouterError> {
        match self {
            Self::Compute { operands, .. } => {
                if operands.is_empty() {
                    return Err(invalid("compute.operands must not be empty"));
                }
                if operands.iter().any(|v| !v.is_finite()) {
                    return Err(invalid("compute.operands must be finite"));
                }
            }
            Self::Storage {
                operation,
                key,
                value,
            } => {
                if key.trim().is_empty() {
                    return Err(invalid("storage.key must not be empty"));
                }
                match operation {
                    StorageOp::Put if value.is_none() => {
                        return Err(invalid("storage.put requires a value"));
                    }
                    StorageOp::Get | StorageOp::Delete if value.is_some() => {
                        return Err(invalid("storage.value only applies to put"));
                    }
                    _ => {}
                }
            }
            Self::Cache {
                operation,
                key,
                value,
                ttl_secs,
            } => {
                if key.trim().is_empty() {
                    return Err(invalid("cache.key must not be empty"));
                }
                if *operation == CacheOp::Set && value.is_none() {
                    return Err(invalid("cache.set requires a value"));
                }
                // A read is keyed on its whole payload; extra fields would
                // split it from the key that writes invalidate.
                if *operation == CacheOp::Get && (value.is_some() || ttl_secs.is_some()) {
                    return Err(invalid("cache.value and cache.ttl_secs only apply to set"));
                }
                if *ttl_secs == Some(0) {
                    return Err(invalid("cache.ttl_secs must be at least 1"));
                }
            }
            Self::Analytics { metric, points } => {
                if metric.trim().is_empty() {
                    return Err(invalid("analytics.metric must not be empty"));
                }
                if points.is_empty() {
                    return Err(invalid("analytics.points must not be empty"));
                }
                if points.iter().any(|v| !v.is_finite()) {
                    return Err(invalid("analytics.points must be finite"));
                }
            }
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> RouterError {
    RouterError::InvalidRequest(msg.to_string())
}

/// A routing request.
///
/// # Example
///
/// ```rust
/// use tokio_edge_router::request::{ComputeOp, Request, Workload};
/// use tokio_edge_router::GeoPoint;
///
/// let req = Request::new(
///     Workload::Compute { operation: ComputeOp::Sum, operands: vec![1.0, 2.0] },
///     GeoPoint::new(50.11, 8.68),
/// )
/// .with_timeout_ms(250);
/// assert_eq!(req.timeout().as_millis(), 250);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Unique request id.
    pub id: String,
    /// Typed payload.
    pub workload: Workload,
    /// Priority class.
    #[serde(default)]
    pub priority: Priority,
    /// Where the request originated.
    pub origin: GeoPoint,
    /// Resource requirements.
    #[serde(default)]
    pub requirements: ResourceRequirements,
    /// Caller-side timeout in milliseconds.
    pub timeout_ms: u64,
    /// Submission time.
    pub submitted_at: DateTime<Utc>,
}

impl Request {
    /// Create a request with a fresh id, normal priority, no resource
    /// requirements and the default timeout.
    pub fn new(workload: Workload, origin: GeoPoint) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workload,
            priority: Priority::default(),
            origin,
            requirements: ResourceRequirements::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            submitted_at: Utc::now(),
        }
    }

    /// Replace the generated id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the priority class.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the resource requirements.
    pub fn with_requirements(mut self, requirements: ResourceRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    /// Set the caller-side timeout in milliseconds.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Caller-side timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Workload kind shorthand.
    pub fn kind(&self) -> WorkloadKind {
        self.workload.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> GeoPoint {
        GeoPoint::new(50.0, 8.0)
    }

    #[test]
    fn test_request_builder_sets_fields() {
        let req = Request::new(
            Workload::Analytics {
                metric: "rps".into(),
                points: vec![1.0],
            },
            origin(),
        )
        .with_id("req-1")
        .with_priority(Priority::Critical)
        .with_timeout_ms(10);

        assert_eq!(req.id, "req-1");
        assert_eq!(req.priority, Priority::Critical);
        assert_eq!(req.timeout(), Duration::from_millis(10));
        assert_eq!(req.kind(), WorkloadKind::Analytics);
    }

    #[test]
    fn test_request_ids_are_unique() {
        let w = Workload::Compute {
            operation: ComputeOp::Sum,
            operands: vec![1.0],
        };
        let a = Request::new(w.clone(), origin());
        let b = Request::new(w, origin());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_validate_rejects_empty_operands() {
        let w = Workload::Compute {
            operation: ComputeOp::Mean,
            operands: vec![],
        };
        assert!(matches!(w.validate(), Err(RouterError::InvalidRequest(_))));
    }

    #[test]
    fn test_validate_rejects_non_finite_points() {
        let w = Workload::Analytics {
            metric: "lat".into(),
            points: vec![1.0, f64::INFINITY],
        };
        assert!(w.validate().is_err());
    }

    #[test]
    fn test_validate_storage_put_requires_value() {
        let w = Workload::Storage {
            operation: StorageOp::Put,
            key: "k".into(),
            value: None,
        };
        assert!(w.validate().is_err());

        let ok = Workload::Storage {
            operation: StorageOp::Get,
            key: "k".into(),
            value: None,
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_validate_cache_rejects_zero_ttl_and_blank_key() {
        let zero = Workload::Cache {
            operation: CacheOp::Set,
            key: "k".into(),
            value: Some("v".into()),
            ttl_secs: Some(0),
        };
        assert!(zero.validate().is_err());

        let blank = Workload::Cache {
            operation: CacheOp::Get,
            key: "  ".into(),
            value: None,
            ttl_secs: None,
        };
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_validate_reads_reject_write_only_fields() {
        let get_with_ttl = Workload::Cache {
            operation: CacheOp::Get,
            key: "k".into(),
            value: None,
            ttl_secs: Some(30),
        };
        let get_with_value = Workload::Cache {
            operation: CacheOp::Get,
            key: "k".into(),
            value: Some("v".into()),
            ttl_secs: None,
        };
        let storage_get_with_value = Workload::Storage {
            operation: StorageOp::Get,
            key: "k".into(),
            value: Some("v".into()),
        };
        for w in [get_with_ttl, get_with_value, storage_get_with_value] {
            let msg = match w.validate() {
                Err(RouterError::InvalidRequest(m)) => m,
                other => panic!("{w:?} accepted: {other:?}"),
            };
            assert!(msg.contains("only appl"), "{msg}");
        }
    }

    #[test]
    fn test_writes_are_not_cacheable() {
        let put = Workload::Storage {
            operation: StorageOp::Put,
            key: "k".into(),
            value: Some("v".into()),
        };
        let set = Workload::Cache {
            operation: CacheOp::Set,
            key: "k".into(),
            value: Some("v".into()),
            ttl_secs: None,
        };
        let get = Workload::Cache {
            operation: CacheOp::Get,
            key: "k".into(),
            value: None,
            ttl_secs: None,
        };
        assert!(!put.is_cacheable());
        assert!(!set.is_cacheable());
        assert!(get.is_cacheable());
    }

    #[test]
    fn test_workload_deserializes_from_tagged_json() {
        let json = r#"{"type":"compute","operation":"product","operands":[2.0,3.0]}"#;
        let w: Workload = serde_json::from_str(json).unwrap_or(Workload::Compute {
            operation: ComputeOp::Sum,
            operands: vec![],
        });
        assert_eq!(
            w,
            Workload::Compute {
                operation: ComputeOp::Product,
                operands: vec![2.0, 3.0],
            }
        );
    }

    #[test]
    fn test_bandwidth_converts_to_gbps() {
        let r = ResourceRequirements {
            min_bandwidth_mbps: Some(2500.0),
            ..ResourceRequirements::default()
        };
        assert_eq!(r.min_bandwidth_gbps(), Some(2.5));
    }
}
