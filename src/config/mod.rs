//! # Stage: Declarative Engine Configuration
//!
//! ## Responsibility
//! Parse and validate TOML engine configuration: latency budgets, health
//! probing, scoring weights, cache sizing and the fleet itself.
//! ```text
//! cargo run -- --config edge.toml
//! ```
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same `EngineConfig`
//! - Validated: all semantic constraints are checked before a config is accepted
//! - Defaulted: every field except the fleet entries has a documented default
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - Building the engine from config (that belongs to `engine`)
//! - Reloading at runtime: the fleet is read-only initial state

pub mod loader;
pub mod validation;

use crate::fleet::NodeDescriptor;
use crate::health::HealthThresholds;
use crate::request::WorkloadKind;
use crate::routing::ScoringConfig;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ── Default value functions ──────────────────────────────────────────────

/// Default hard cap on any request's timeout: 50ms.
fn default_global_max_latency_ms() -> u64 {
    50
}

/// Default soft latency target: 30ms.
fn default_target_latency_ms() -> u64 {
    30
}

/// Default per-subscriber event buffer.
fn default_event_capacity() -> usize {
    1024
}

/// Default probe interval: 5s.
fn default_interval_ms() -> u64 {
    5000
}

/// Default per-probe timeout: 2s.
fn default_probe_timeout_ms() -> u64 {
    2000
}

/// Default cache bound: 10 000 entries.
fn default_max_entries() -> usize {
    10_000
}

fn default_compute_ttl() -> u64 {
    60
}

fn default_storage_ttl() -> u64 {
    300
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_analytics_ttl() -> u64 {
    120
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for an engine instance.
///
/// # Example
///
/// ```toml
/// [engine]
/// global_max_latency_ms = 50
///
/// [[fleet]]
/// id = "fra-1"
/// region = "eu-central"
/// location = { latitude = 50.11, longitude = 8.68 }
/// capacity = { cpu = 64.0, memory_gb = 256.0, storage_gb = 2000.0, bandwidth_gbps = 10.0 }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct EngineConfig {
    /// Latency budgets and event buffering.
    #[serde(default)]
    pub engine: EngineSection,
    /// Health probing.
    #[serde(default)]
    pub health: HealthSection,
    /// Node scoring.
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Response cache.
    #[serde(default)]
    pub cache: CacheSection,
    /// Fleet inventory, in routing tie-break order.
    #[serde(default)]
    pub fleet: Vec<NodeDescriptor>,
}

/// Latency budgets and event buffering.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct EngineSection {
    /// Upper bound on any request's execution timeout. Default: `50`.
    #[serde(default = "default_global_max_latency_ms")]
    pub global_max_latency_ms: u64,
    /// Soft latency target used for scoring and violation detection when a
    /// request carries no `max_latency_ms`. Default: `30`.
    #[serde(default = "default_target_latency_ms")]
    pub target_latency_ms: u64,
    /// Events buffered per subscriber before the slowest one lags. Default: `1024`.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            global_max_latency_ms: default_global_max_latency_ms(),
            target_latency_ms: default_target_latency_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl EngineSection {
    /// `global_max_latency_ms` as a [`Duration`].
    pub fn global_max_latency(&self) -> Duration {
        Duration::from_millis(self.global_max_latency_ms)
    }
}

/// Health probing.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct HealthSection {
    /// Time between probe cycles. Default: `5000`.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Time a single probe may take before it counts as failed. Default: `2000`.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Per-metric success thresholds.
    #[serde(default)]
    pub thresholds: HealthThresholds,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            thresholds: HealthThresholds::default(),
        }
    }
}

/// Response cache sizing and lifetimes.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CacheSection {
    /// Maximum entries before FIFO eviction; `0` = unbounded. Default: `10000`.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Per-workload-kind TTLs.
    #[serde(default)]
    pub ttl_secs: TtlConfig,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl_secs: TtlConfig::default(),
        }
    }
}

/// Cache lifetime per workload kind, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct TtlConfig {
    /// Default: `60`.
    #[serde(default = "default_compute_ttl")]
    pub compute: u64,
    /// Default: `300`.
    #[serde(default = "default_storage_ttl")]
    pub storage: u64,
    /// Default: `3600`.
    #[serde(default = "default_cache_ttl")]
    pub cache: u64,
    /// Default: `120`.
    #[serde(default = "default_analytics_ttl")]
    pub analytics: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            compute: default_compute_ttl(),
            storage: default_storage_ttl(),
            cache: default_cache_ttl(),
            analytics: default_analytics_ttl(),
        }
    }
}

impl TtlConfig {
    /// TTL for results of `kind`.
    pub fn for_kind(&self, kind: WorkloadKind) -> Duration {
        let secs = match kind {
            WorkloadKind::Compute => self.compute,
            WorkloadKind::Storage => self.storage,
            WorkloadKind::Cache => self.cache,
            WorkloadKind::Analytics => self.analytics,
        };
        Duration::from_secs(secs)
    }
}

/// Export the JSON Schema for `EngineConfig`.
///
/// This enables IDE autocomplete when editing TOML config files.
///
/// # Errors
///
/// Returns `serde_json::Error` if schema serialization fails.
pub fn json_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(EngineConfig);
    serde_json::to_string_pretty(&schema)
}
