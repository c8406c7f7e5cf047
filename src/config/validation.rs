//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`EngineConfig`] that cannot
//! be expressed through the type system alone (range checks, unique node
//! ids, weights summing to one).
//!
//! ## Guarantees
//! - Every validation rule has at least one test that triggers it
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - File I/O (that belongs to `loader`)

use super::EngineConfig;
use crate::routing::config as scoring;
use std::collections::HashSet;

/// Errors arising from configuration parsing, validation, or I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "health.interval_ms").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

fn invalid(field: impl Into<String>, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.into(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Validate all semantic constraints on an [`EngineConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
///
/// # Returns
///
/// - `Ok(())` if all constraints pass.
/// - `Err(Vec<ConfigError>)` with every violation found.
///
/// # Panics
///
/// This function never panics.
pub fn validate(config: &EngineConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Engine ───────────────────────────────────────────────────────
    if config.engine.global_max_latency_ms == 0 {
        errors.push(invalid("engine.global_max_latency_ms", 0, "must be at least 1"));
    }
    if config.engine.target_latency_ms == 0 {
        errors.push(invalid("engine.target_latency_ms", 0, "must be at least 1"));
    }
    if config.engine.event_capacity == 0 {
        errors.push(invalid("engine.event_capacity", 0, "must be at least 1"));
    }

    // ── Health ───────────────────────────────────────────────────────
    if config.health.interval_ms == 0 {
        errors.push(invalid("health.interval_ms", 0, "must be at least 1"));
    }
    if config.health.probe_timeout_ms == 0 {
        errors.push(invalid("health.probe_timeout_ms", 0, "must be at least 1"));
    }
    let t = &config.health.thresholds;
    if !(t.latency_ms > 0.0) {
        errors.push(invalid("health.thresholds.latency_ms", t.latency_ms, "must be > 0"));
    }
    for (name, value) in [
        ("cpu_usage", t.cpu_usage),
        ("memory_usage", t.memory_usage),
        ("disk_usage", t.disk_usage),
        ("network_usage", t.network_usage),
        ("error_rate", t.error_rate),
    ] {
        if !(value > 0.0 && value <= 100.0) {
            errors.push(invalid(
                format!("health.thresholds.{name}"),
                value,
                "must be a percentage in (0, 100]",
            ));
        }
    }

    // ── Scoring ──────────────────────────────────────────────────────
    errors.extend(
        scoring::validate(&config.scoring)
            .into_iter()
            .map(|msg| ConfigError::Validation(format!("scoring: {msg}"))),
    );

    // ── Fleet ────────────────────────────────────────────────────────
    let mut seen = HashSet::new();
    for (i, node) in config.fleet.iter().enumerate() {
        let path = format!("fleet[{i}]");
        if node.id.trim().is_empty() {
            errors.push(invalid(format!("{path}.id"), "\"\"", "must not be empty"));
        } else if !seen.insert(node.id.as_str()) {
            errors.push(invalid(format!("{path}.id"), &node.id, "duplicate node id"));
        }
        if !node.location.is_valid() {
            errors.push(invalid(
                format!("{path}.location"),
                format!("({}, {})", node.location.latitude, node.location.longitude),
                "latitude must be in [-90, 90] and longitude in [-180, 180]",
            ));
        }
        let c = &node.capacity;
        for (name, value) in [
            ("cpu", c.cpu),
            ("memory_gb", c.memory_gb),
            ("storage_gb", c.storage_gb),
            ("bandwidth_gbps", c.bandwidth_gbps),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                errors.push(invalid(
                    format!("{path}.capacity.{name}"),
                    value,
                    "must be a positive finite number",
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
