//! Probe contract and a simulated telemetry source.
//!
//! The monitor only sees the [`HealthProbe`] trait, so a production build can
//! plug in live telemetry (agent push, HTTP scrape, …) without touching the
//! state machine.

use super::HealthSample;
use crate::fleet::Node;
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

/// Failure to obtain a sample from a node.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ProbeError {
    /// The node could not be reached.
    #[error("node unreachable: {0}")]
    Unreachable(String),

    /// The node answered with something that is not a health sample.
    #[error("malformed probe response: {0}")]
    Malformed(String),
}

/// Source of health samples for a node.
///
/// Implementations must be `Send + Sync`; the monitor calls `probe` for many
/// nodes concurrently.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Measure `node` once.
    async fn probe(&self, node: &Node) -> Result<HealthSample, ProbeError>;
}

/// Probe that fabricates plausible metrics.
///
/// Usage figures are drawn uniformly from ranges that mostly sit under the
/// default thresholds; `spike_rate` is the chance a sample is pushed over
/// them and `unreachable_rate` the chance the probe errors outright. Used
/// by the demo binary and benches.
#[derive(Debug, Clone)]
pub struct SimulatedProbe {
    spike_rate: f64,
    unreachable_rate: f64,
    delay: Duration,
}

impl Default for SimulatedProbe {
    fn default() -> Self {
        Self::new(0.05, 0.01)
    }
}

impl SimulatedProbe {
    /// Create a probe with the given spike and unreachable probabilities,
    /// each clamped to `0.0..=1.0`.
    pub fn new(spike_rate: f64, unreachable_rate: f64) -> Self {
        Self {
            spike_rate: spike_rate.clamp(0.0, 1.0),
            unreachable_rate: unreachable_rate.clamp(0.0, 1.0),
            delay: Duration::from_millis(2),
        }
    }

    /// Simulated probe round-trip.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn sample(&self) -> Result<HealthSample, ProbeError> {
        let mut rng = rand::thread_rng();
        if rng.gen_bool(self.unreachable_rate) {
            return Err(ProbeError::Unreachable("simulated packet loss".into()));
        }
        let mut sample = HealthSample {
            latency_ms: rng.gen_range(2.0..25.0),
            cpu_usage: rng.gen_range(10.0..75.0),
            memory_usage: rng.gen_range(20.0..70.0),
            disk_usage: rng.gen_range(15.0..70.0),
            network_usage: rng.gen_range(5.0..60.0),
            error_rate: rng.gen_range(0.0..3.0),
        };
        if rng.gen_bool(self.spike_rate) {
            sample.cpu_usage = rng.gen_range(85.0..100.0);
            sample.latency_ms = rng.gen_range(30.0..120.0);
        }
        Ok(sample)
    }
}

#[async_trait]
impl HealthProbe for SimulatedProbe {
    async fn probe(&self, _node: &Node) -> Result<HealthSample, ProbeError> {
        tokio::time::sleep(self.delay).await;
        self.sample()
    }
}
