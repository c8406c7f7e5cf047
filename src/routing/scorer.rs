//! Composite node scoring.
//!
//! Produces a score in `0.0..=1.0` for one (node, request) pair from four
//! weighted sub-scores:
//!
//! | Sub-score  | Default weight | Formula                                             |
//! |------------|----------------|-----------------------------------------------------|
//! | latency    | 0.4            | `1 - estimated_latency / budget`                    |
//! | health     | 0.3            | mean of `1 - usage/100` over cpu, memory, disk, net |
//! | capacity   | 0.2            | mean of `min(1, capacity / requirement)`            |
//! | distance   | 0.1            | `1 - distance_km / distance_ceiling_km`             |
//!
//! Every sub-score is clamped to `[0.0, 1.0]` before weighting. Scoring is a
//! pure function of node state and request: no randomness, no I/O.

use super::config::ScoringConfig;
use crate::fleet::geo::estimate_latency_ms;
use crate::fleet::Node;
use crate::request::Request;
use serde::Serialize;

/// Per-factor breakdown of a composite score.
///
/// Useful for debugging and logging routing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    /// Latency sub-score.
    pub latency: f64,
    /// Health sub-score.
    pub health: f64,
    /// Capacity sub-score.
    pub capacity: f64,
    /// Distance sub-score.
    pub distance: f64,
    /// Great-circle distance from the request origin, in km.
    pub distance_km: f64,
    /// Modelled network latency, in ms, capped at the budget.
    pub estimated_latency_ms: f64,
    /// Weighted composite score.
    pub total: f64,
}

/// Stateless node scorer.
///
/// # Panics
///
/// This type and its methods never panic.
#[derive(Debug, Clone, Default)]
pub struct NodeScorer {
    config: ScoringConfig,
}

impl NodeScorer {
    /// Create a scorer from a scoring configuration.
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// The configuration in effect.
    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score `node` for `request` against a latency budget in milliseconds.
    ///
    /// # Arguments
    ///
    /// * `node`: Candidate node; its latest health snapshot is read once.
    /// * `request`: Request being routed.
    /// * `budget_ms`: Latency budget. A non-positive budget yields a latency
    ///   sub-score of `0.0`.
    ///
    /// # Returns
    ///
    /// A [`ScoreBreakdown`] whose `total` lies in `[0.0, 1.0]` when the
    /// weights sum to one.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn score(&self, node: &Node, request: &Request, budget_ms: f64) -> ScoreBreakdown {
        let distance_km = request.origin.distance_km(&node.location());
        let estimated_latency_ms = estimate_latency_ms(
            distance_km,
            self.config.ms_per_1000km,
            self.config.base_overhead_ms,
            budget_ms,
        );

        let latency = if budget_ms > 0.0 {
            clamp_score(1.0 - estimated_latency_ms / budget_ms)
        } else {
            0.0
        };
        let health = health_score(node);
        let capacity = capacity_score(node, request);
        let distance = clamp_score(1.0 - distance_km / self.config.distance_ceiling_km);

        let w = &self.config.weights;
        let total = clamp_score(
            latency * w.latency + health * w.health + capacity * w.capacity + distance * w.distance,
        );

        ScoreBreakdown {
            latency,
            health,
            capacity,
            distance,
            distance_km,
            estimated_latency_ms,
            total,
        }
    }
}

fn health_score(node: &Node) -> f64 {
    let h = node.health();
    let parts = [h.cpu_usage, h.memory_usage, h.disk_usage, h.network_usage];
    let sum: f64 = parts.iter().map(|u| clamp_score(1.0 - u / 100.0)).sum();
    sum / parts.len() as f64
}

fn capacity_score(node: &Node, request: &Request) -> f64 {
    let cap = node.capacity();
    let req = &request.requirements;
    let parts = [
        (cap.cpu, req.cpu),
        (cap.memory_gb, req.memory_gb),
        (cap.storage_gb, req.storage_gb),
        (cap.bandwidth_gbps, req.min_bandwidth_gbps()),
    ];
    let sum: f64 = parts
        .iter()
        .map(|&(have, want)| {
            // Absent or zero requirement: compare against one unit.
            let want = want.filter(|w| *w > 0.0).unwrap_or(1.0);
            clamp_score(have / want).min(1.0)
        })
        .sum();
    sum / parts.len() as f64
}

/// Clamp a score to `[0.0, 1.0]`; NaN maps to `0.0`.
fn clamp_score(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
