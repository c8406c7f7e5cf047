//! # Stage: Failover
//!
//! ## Responsibility
//! Give a request one more chance after its primary dispatch failed: pick
//! the best alternate node (excluding the one that failed) and dispatch
//! there once.
//!
//! ## Guarantees
//! - Invoked exactly once per failed primary dispatch; invocations are
//!   counted.
//! - Single attempt: an alternate failure is final, there is no nested
//!   failover.
//! - Non-throwing: the outcome is always a [`FailoverOutcome`].
//!
//! ## NOT Responsible For
//! - Deciding the terminal response status (see: `engine`)
//! - Marking the failed node unhealthy; only probes change node status

use crate::executor::{Execution, RequestExecutor};
use crate::metrics;
use crate::request::Request;
use crate::routing::{ScoringRouter, Selection};
use crate::RouterError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a failover attempt.
#[derive(Debug, Clone)]
pub enum FailoverOutcome {
    /// An alternate node served the request.
    Recovered {
        /// The alternate that was chosen.
        selection: Selection,
        /// Its successful execution.
        execution: Execution,
    },
    /// No alternate existed, or the alternate failed as well.
    Unrecoverable {
        /// Human-readable description of why recovery failed.
        reason: String,
    },
}

impl FailoverOutcome {
    /// `true` for [`FailoverOutcome::Recovered`].
    pub fn is_recovered(&self) -> bool {
        matches!(self, Self::Recovered { .. })
    }
}

/// Reroutes failed requests to an alternate node.
#[derive(Debug)]
pub struct FailoverHandler {
    router: Arc<ScoringRouter>,
    executor: Arc<RequestExecutor>,
    invocations: AtomicU64,
    recoveries: AtomicU64,
}

impl FailoverHandler {
    /// Create a handler that shares the engine's router and executor.
    pub fn new(router: Arc<ScoringRouter>, executor: Arc<RequestExecutor>) -> Self {
        Self {
            router,
            executor,
            invocations: AtomicU64::new(0),
            recoveries: AtomicU64::new(0),
        }
    }

    /// Attempt recovery for `request` after `failed_node` failed with `cause`.
    pub async fn handle(
        &self,
        request: &Request,
        failed_node: &str,
        cause: &RouterError,
    ) -> FailoverOutcome {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        info!(
            request_id = %request.id,
            failed_node = %failed_node,
            cause = cause.kind(),
            "failover invoked"
        );

        let selection = match self.router.select_excluding(request, &[failed_node]) {
            Ok(s) => s,
            Err(e) => {
                warn!(request_id = %request.id, error = %e, "failover found no alternate");
                metrics::inc_failover(false);
                return FailoverOutcome::Unrecoverable {
                    reason: format!("{cause}; no alternate node available"),
                };
            }
        };

        match self
            .executor
            .execute(&selection.node, request, selection.breakdown.estimated_latency_ms)
            .await
        {
            Ok(execution) => {
                self.recoveries.fetch_add(1, Ordering::Relaxed);
                metrics::inc_failover(true);
                info!(
                    request_id = %request.id,
                    node_id = %selection.node.id(),
                    "failover recovered"
                );
                FailoverOutcome::Recovered {
                    selection,
                    execution,
                }
            }
            Err(e) => {
                metrics::inc_failover(false);
                warn!(
                    request_id = %request.id,
                    node_id = %selection.node.id(),
                    error = %e,
                    "failover alternate failed"
                );
                FailoverOutcome::Unrecoverable {
                    reason: format!("{cause}; alternate {} failed: {e}", selection.node.id()),
                }
            }
        }
    }

    /// Number of times [`handle`](Self::handle) was called.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Number of invocations that recovered.
    pub fn recoveries(&self) -> u64 {
        self.recoveries.load(Ordering::Relaxed)
    }
}
