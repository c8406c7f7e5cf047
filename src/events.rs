//! Engine-owned event bus.
//!
//! A bounded [`broadcast`] channel carrying [`EngineEvent`]s to any number of
//! observability subscribers. The bus is created with the engine and closed
//! on shutdown: closing drops the sender, so subscribers drain what is
//! buffered and then observe [`broadcast::error::RecvError::Closed`].
//!
//! Publishing is best-effort. No subscribers, a lagging subscriber, or a
//! closed bus never affect request processing.

use crate::fleet::NodeStatus;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Observability events emitted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum EngineEvent {
    /// A node was chosen for a request.
    #[serde(rename = "node:selected")]
    NodeSelected {
        /// Request being routed.
        request_id: String,
        /// Winning node.
        node_id: String,
        /// Winning composite score.
        score: f64,
        /// Number of other candidates that were scored.
        alternatives: usize,
    },
    /// A node left the `active` state.
    #[serde(rename = "node:unhealthy")]
    NodeUnhealthy {
        /// Affected node.
        node_id: String,
        /// New status.
        status: NodeStatus,
    },
    /// A successful response exceeded its latency target.
    #[serde(rename = "latency:violation")]
    LatencyViolation {
        /// Slow request.
        request_id: String,
        /// Node that served it.
        node_id: String,
        /// Observed total latency in ms.
        latency_ms: f64,
        /// Target that was exceeded, in ms.
        threshold_ms: f64,
    },
}

impl EngineEvent {
    /// Wire name of the event (`node:selected`, …).
    pub fn name(&self) -> &'static str {
        match self {
            Self::NodeSelected { .. } => "node:selected",
            Self::NodeUnhealthy { .. } => "node:unhealthy",
            Self::LatencyViolation { .. } => "latency:violation",
        }
    }
}

/// Cloneable handle to the engine's event channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Debug)]
struct BusInner {
    tx: RwLock<Option<broadcast::Sender<EngineEvent>>>,
    published: AtomicU64,
    undelivered: AtomicU64,
}

impl EventBus {
    /// Create an open bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(BusInner {
                tx: RwLock::new(Some(tx)),
                published: AtomicU64::new(0),
                undelivered: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to future events.
    ///
    /// On a closed bus the returned receiver reports `Closed` immediately.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        match self.inner.tx.read().as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(1);
                drop(tx);
                rx
            }
        }
    }

    /// Publish an event. No-op once the bus is closed.
    pub fn publish(&self, event: EngineEvent) {
        let guard = self.inner.tx.read();
        let Some(tx) = guard.as_ref() else {
            return;
        };
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        if tx.send(event).is_err() {
            // No receivers; not an error.
            self.inner.undelivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Close the bus. Idempotent.
    pub fn close(&self) {
        self.inner.tx.write().take();
    }

    /// `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.tx.read().is_none()
    }

    /// Events accepted while open.
    pub fn published(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    /// Events accepted while nobody was subscribed.
    pub fn undelivered(&self) -> u64 {
        self.inner.undelivered.load(Ordering::Relaxed)
    }
}
