//! Prometheus metrics for the edge router.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The helper functions
//! (`inc_request`, `record_cache_lookup`, …) are no-ops if `init_metrics` was
//! never called, so the engine is always safe to run and observability
//! simply degrades gracefully.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `edge_requests_total` | Counter | `node` |
//! | `edge_failures_total` | Counter | `node`, `kind` |
//! | `edge_cache_lookups_total` | Counter | `outcome` |
//! | `edge_request_duration_seconds` | Histogram | `status` |
//! | `edge_latency_violations_total` | Counter | `node` |
//! | `edge_failover_total` | Counter | `outcome` |
//! | `edge_node_status` | Gauge | `node` |

use crate::fleet::NodeStatus;
use crate::response::ResponseStatus;
use crate::RouterError;
use prometheus::{
    core::Collector, CounterVec, Encoder, HistogramOpts, HistogramVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;
use std::time::Duration;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All Prometheus metrics for the engine, bundled together so they can be
/// stored in a single [`OnceLock`] and initialised atomically.
pub struct Metrics {
    /// Prometheus registry that owns all metric descriptors.
    pub registry: Registry,
    /// Dispatch attempts per node.
    pub requests_total: CounterVec,
    /// Failed dispatch attempts by node and failure kind.
    pub failures_total: CounterVec,
    /// Cache lookups by outcome (`hit`, `miss`).
    pub cache_lookups: CounterVec,
    /// End-to-end request latency by terminal status.
    pub request_duration: HistogramVec,
    /// Responses slower than their latency target, per serving node.
    pub latency_violations: CounterVec,
    /// Failover invocations by outcome (`recovered`, `unrecoverable`).
    pub failover_total: CounterVec,
    /// Node status, encoded `0` active … `3` offline.
    pub node_status: IntGaugeVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn register<C: Collector + Clone + 'static>(registry: &Registry, c: C) -> Result<C, RouterError> {
    registry
        .register(Box::new(c.clone()))
        .map_err(|e| RouterError::Other(format!("metrics registration failed: {e}")))?;
    Ok(c)
}

fn init_err(e: prometheus::Error) -> RouterError {
    RouterError::Other(format!("metrics init failed: {e}"))
}

impl Metrics {
    /// Build a bundle whose metric names start with `{prefix}_`.
    fn build(prefix: &str) -> Result<Self, RouterError> {
        let registry = Registry::new();
        let name = |suffix: &str| format!("{prefix}_{suffix}");

        let requests_total = register(
            &registry,
            CounterVec::new(
                Opts::new(name("requests_total"), "Dispatch attempts per node"),
                &["node"],
            )
            .map_err(init_err)?,
        )?;
        let failures_total = register(
            &registry,
            CounterVec::new(
                Opts::new(name("failures_total"), "Failed dispatch attempts by kind"),
                &["node", "kind"],
            )
            .map_err(init_err)?,
        )?;
        let cache_lookups = register(
            &registry,
            CounterVec::new(
                Opts::new(name("cache_lookups_total"), "Cache lookups by outcome"),
                &["outcome"],
            )
            .map_err(init_err)?,
        )?;
        let request_duration = register(
            &registry,
            HistogramVec::new(
                HistogramOpts::new(
                    name("request_duration_seconds"),
                    "End-to-end request latency by status",
                )
                .buckets(vec![0.001, 0.005, 0.01, 0.02, 0.03, 0.05, 0.1, 0.25, 1.0]),
                &["status"],
            )
            .map_err(init_err)?,
        )?;
        let latency_violations = register(
            &registry,
            CounterVec::new(
                Opts::new(
                    name("latency_violations_total"),
                    "Responses exceeding their latency target",
                ),
                &["node"],
            )
            .map_err(init_err)?,
        )?;
        let failover_total = register(
            &registry,
            CounterVec::new(
                Opts::new(name("failover_total"), "Failover invocations by outcome"),
                &["outcome"],
            )
            .map_err(init_err)?,
        )?;
        let node_status = register(
            &registry,
            IntGaugeVec::new(
                Opts::new(name("node_status"), "Node status (0 active .. 3 offline)"),
                &["node"],
            )
            .map_err(init_err)?,
        )?;

        Ok(Self {
            registry,
            requests_total,
            failures_total,
            cache_lookups,
            request_duration,
            latency_violations,
            failover_total,
            node_status,
        })
    }
}

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise all Prometheus metrics and register them with a private registry.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`RouterError::Other`] if metric construction or registry
/// registration fails.
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), RouterError> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    // Losing a race is harmless: both bundles carry identical descriptors.
    let _ = METRICS.set(Metrics::build("edge")?);
    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

// ── Public helper functions ────────────────────────────────────────────────

/// Count one dispatch attempt on `node`.
///
/// No-op if metrics have not been initialised.
pub fn inc_request(node: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.requests_total.get_metric_with_label_values(&[node]) {
            c.inc();
        }
    }
}

/// Count one failed attempt on `node`, labelled by failure `kind`.
///
/// No-op if metrics have not been initialised.
pub fn inc_failure(node: &str, kind: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.failures_total.get_metric_with_label_values(&[node, kind]) {
            c.inc();
        }
    }
}

/// Count a cache lookup.
pub fn record_cache_lookup(hit: bool) {
    if let Some(m) = metrics() {
        let outcome = if hit { "hit" } else { "miss" };
        if let Ok(c) = m.cache_lookups.get_metric_with_label_values(&[outcome]) {
            c.inc();
        }
    }
}

/// Observe the end-to-end duration of a request that ended in `status`.
pub fn record_request_duration(status: ResponseStatus, d: Duration) {
    if let Some(m) = metrics() {
        if let Ok(h) = m
            .request_duration
            .get_metric_with_label_values(&[status.as_str()])
        {
            h.observe(d.as_secs_f64());
        }
    }
}

/// Count a latency-target violation on `node`.
pub fn inc_latency_violation(node: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.latency_violations.get_metric_with_label_values(&[node]) {
            c.inc();
        }
    }
}

/// Count a failover invocation.
pub fn inc_failover(recovered: bool) {
    if let Some(m) = metrics() {
        let outcome = if recovered { "recovered" } else { "unrecoverable" };
        if let Ok(c) = m.failover_total.get_metric_with_label_values(&[outcome]) {
            c.inc();
        }
    }
}

/// Publish the current status of `node`.
pub fn set_node_status(node: &str, status: NodeStatus) {
    if let Some(m) = metrics() {
        if let Ok(g) = m.node_status.get_metric_with_label_values(&[node]) {
            g.set(i64::from(status.as_u8()));
        }
    }
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or if
/// encoding fails.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    let Some(m) = metrics() else {
        return String::new();
    };
    let families = m.registry.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
