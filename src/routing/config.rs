//! Scoring configuration types.
//!
//! Provides [`ScoringConfig`] for tuning sub-score weights and the latency
//! model. All fields have defaults and are (de)serialisable via serde for
//! TOML/JSON config files.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ── Default value functions ────────────────────────────────────────────

/// Default weight of the latency sub-score.
fn default_latency_weight() -> f64 {
    0.4
}

/// Default weight of the health sub-score.
fn default_health_weight() -> f64 {
    0.3
}

/// Default weight of the capacity sub-score.
fn default_capacity_weight() -> f64 {
    0.2
}

/// Default weight of the distance sub-score.
fn default_distance_weight() -> f64 {
    0.1
}

/// Roughly half of Earth's circumference; distance normalising ceiling.
fn default_distance_ceiling_km() -> f64 {
    20_000.0
}

/// Propagation-delay slope of the latency model.
fn default_ms_per_1000km() -> f64 {
    100.0
}

/// Fixed per-request network overhead of the latency model.
fn default_base_overhead_ms() -> f64 {
    5.0
}

/// Fraction of stated capacity a single request may claim.
fn default_utilization_ceiling() -> f64 {
    crate::fleet::DEFAULT_UTILIZATION_CEILING
}

// ── ScoringWeights ─────────────────────────────────────────────────────

/// Weights of the four sub-scores in the composite score.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ScoringWeights {
    /// Weight of the latency sub-score. Default: `0.4`.
    #[serde(default = "default_latency_weight")]
    pub latency: f64,
    /// Weight of the health sub-score. Default: `0.3`.
    #[serde(default = "default_health_weight")]
    pub health: f64,
    /// Weight of the capacity sub-score. Default: `0.2`.
    #[serde(default = "default_capacity_weight")]
    pub capacity: f64,
    /// Weight of the distance sub-score. Default: `0.1`.
    #[serde(default = "default_distance_weight")]
    pub distance: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            latency: default_latency_weight(),
            health: default_health_weight(),
            capacity: default_capacity_weight(),
            distance: default_distance_weight(),
        }
    }
}

impl ScoringWeights {
    /// Sum of all weights.
    pub fn total(&self) -> f64 {
        self.latency + self.health + self.capacity + self.distance
    }
}

// ── ScoringConfig ──────────────────────────────────────────────────────

/// Configuration for node scoring.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ScoringConfig {
    /// Sub-score weights.
    #[serde(default)]
    pub weights: ScoringWeights,

    /// Distance at which the distance sub-score reaches zero. Default: `20000`.
    #[serde(default = "default_distance_ceiling_km")]
    pub distance_ceiling_km: f64,

    /// Estimated milliseconds per 1000 km of distance. Default: `100`.
    #[serde(default = "default_ms_per_1000km")]
    pub ms_per_1000km: f64,

    /// Fixed overhead added to every latency estimate. Default: `5`.
    #[serde(default = "default_base_overhead_ms")]
    pub base_overhead_ms: f64,

    /// Fraction of stated capacity a request may claim, applied both when
    /// listing candidates and at dispatch. Default: `0.8`.
    #[serde(default = "default_utilization_ceiling")]
    pub utilization_ceiling: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            distance_ceiling_km: default_distance_ceiling_km(),
            ms_per_1000km: default_ms_per_1000km(),
            base_overhead_ms: default_base_overhead_ms(),
            utilization_ceiling: default_utilization_ceiling(),
        }
    }
}

/// Validate a [`ScoringConfig`], returning a list of human-readable errors.
///
/// An empty `Vec` means the config is valid.
pub fn validate(config: &ScoringConfig) -> Vec<String> {
    let mut errors = Vec::new();

    let w = &config.weights;
    for (name, value) in [
        ("latency", w.latency),
        ("health", w.health),
        ("capacity", w.capacity),
        ("distance", w.distance),
    ] {
        if !(0.0..=1.0).contains(&value) {
            errors.push(format!("weights.{name} must be in [0.0, 1.0], got {value}"));
        }
    }

    if (w.total() - 1.0).abs() > 1e-6 {
        errors.push(format!("weights must sum to 1.0, got {}", w.total()));
    }

    if config.distance_ceiling_km <= 0.0 {
        errors.push(format!(
            "distance_ceiling_km must be > 0, got {}",
            config.distance_ceiling_km
        ));
    }

    if config.ms_per_1000km < 0.0 {
        errors.push(format!(
            "ms_per_1000km must be >= 0, got {}",
            config.ms_per_1000km
        ));
    }

    if config.base_overhead_ms < 0.0 {
        errors.push(format!(
            "base_overhead_ms must be >= 0, got {}",
            config.base_overhead_ms
        ));
    }

    if config.utilization_ceiling <= 0.0 || config.utilization_ceiling > 1.0 {
        errors.push(format!(
            "utilization_ceiling must be in (0.0, 1.0], got {}",
            config.utilization_ceiling
        ));
    }

    errors
}

// ── Tests ──────────────────────────────────────────────────────────────
