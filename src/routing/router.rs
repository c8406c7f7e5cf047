//! Node selection.
//!
//! The [`ScoringRouter`] asks the [`NodeRegistry`] for eligible candidates,
//! scores each with a [`NodeScorer`] and picks the maximum. Ties go to the
//! candidate seen first in registry order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::config::ScoringConfig;
use super::scorer::{NodeScorer, ScoreBreakdown};
use crate::events::{EngineEvent, EventBus};
use crate::fleet::{Node, NodeRegistry};
use crate::request::Request;
use crate::RouterError;

/// The outcome of a successful selection.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Chosen node.
    pub node: Arc<Node>,
    /// Score breakdown of the chosen node.
    pub breakdown: ScoreBreakdown,
    /// Number of other candidates that were scored.
    pub alternatives: usize,
}

/// Health-aware, geography-aware node router.
///
/// Reads node status and health without taking locks on the health monitor;
/// never mutates node state.
///
/// # Panics
///
/// This type and its methods never panic.
pub struct ScoringRouter {
    registry: Arc<NodeRegistry>,
    scorer: NodeScorer,
    target_latency_ms: f64,
    events: EventBus,

    selections: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for ScoringRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoringRouter")
            .field("nodes", &self.registry.len())
            .field("config", self.scorer.config())
            .field("target_latency_ms", &self.target_latency_ms)
            .finish()
    }
}

impl ScoringRouter {
    /// Create a router over `registry`.
    ///
    /// # Arguments
    ///
    /// * `registry`: Fleet to choose from.
    /// * `config`: Scoring weights and latency model.
    /// * `target_latency_ms`: Latency budget used when a request carries no
    ///   `max_latency_ms` of its own.
    /// * `events`: Bus receiving `node:selected` events.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn new(
        registry: Arc<NodeRegistry>,
        config: ScoringConfig,
        target_latency_ms: f64,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            scorer: NodeScorer::new(config),
            target_latency_ms,
            events,
            selections: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Latency budget applied to `request` when scoring, in ms.
    pub fn budget_ms(&self, request: &Request) -> f64 {
        request
            .requirements
            .max_latency_ms
            .map(|ms| ms as f64)
            .unwrap_or(self.target_latency_ms)
    }

    /// Select the best node for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::NoSuitableNode`] when no active node satisfies
    /// the request's capacity requirements.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn select(&self, request: &Request) -> Result<Selection, RouterError> {
        self.select_excluding(request, &[])
    }

    /// Select the best node for `request`, skipping the ids in `excluded`.
    ///
    /// Used by failover to find an alternate for a node that just failed.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::NoSuitableNode`] when every eligible node is
    /// excluded or none is eligible.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn select_excluding(
        &self,
        request: &Request,
        excluded: &[&str],
    ) -> Result<Selection, RouterError> {
        let budget_ms = self.budget_ms(request);
        let candidates: Vec<Arc<Node>> = self
            .registry
            .list_candidates(&request.requirements)
            .into_iter()
            .filter(|n| n.is_healthy() && !excluded.contains(&n.id()))
            .collect();

        let mut best: Option<(Arc<Node>, ScoreBreakdown)> = None;
        for node in &candidates {
            let breakdown = self.scorer.score(node, request, budget_ms);
            let better = match &best {
                // Strict comparison keeps the first-seen node on ties.
                Some((_, top)) => breakdown.total > top.total,
                None => true,
            };
            if better {
                best = Some((Arc::clone(node), breakdown));
            }
        }

        let Some((node, breakdown)) = best else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(
                request_id = %request.id,
                excluded = excluded.len(),
                "no suitable node"
            );
            return Err(RouterError::NoSuitableNode {
                request_id: request.id.clone(),
            });
        };

        let alternatives = candidates.len().saturating_sub(1);
        self.selections.fetch_add(1, Ordering::Relaxed);
        debug!(
            request_id = %request.id,
            node_id = %node.id(),
            score = breakdown.total,
            distance_km = breakdown.distance_km,
            alternatives,
            "node selected"
        );
        self.events.publish(EngineEvent::NodeSelected {
            request_id: request.id.clone(),
            node_id: node.id().to_string(),
            score: breakdown.total,
            alternatives,
        });

        Ok(Selection {
            node,
            breakdown,
            alternatives,
        })
    }

    /// Number of successful selections so far.
    pub fn selections(&self) -> u64 {
        self.selections.load(Ordering::Relaxed)
    }

    /// Number of selections that found no suitable node.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// The registry this router reads from.
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
