//! # Stage: Scoring Router
//!
//! ## Responsibility
//! Choose the best node for a request. Candidates come from the node
//! registry (active, within the utilisation ceiling); each is ranked by a
//! weighted composite of latency, health, capacity and distance sub-scores.
//!
//! ## Guarantees
//! - Deterministic: for fixed node state and a fixed request the same node is
//!   chosen on every call. Ties go to the first node in registry order.
//! - Read-only: routing never mutates node status or health.
//! - Bounded: every sub-score and the composite lie in `[0.0, 1.0]`.
//!
//! ## NOT Responsible For
//! - Dispatching the request (see: `executor`)
//! - Measuring live latency: network latency is modelled from distance
//! - Reserving capacity on the chosen node

pub mod config;
pub mod router;
pub mod scorer;

// Re-exports for convenience
pub use config::{ScoringConfig, ScoringWeights};
pub use router::{ScoringRouter, Selection};
pub use scorer::{NodeScorer, ScoreBreakdown};
