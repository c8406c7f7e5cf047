//! Demo binary for tokio-edge-router
//!
//! Builds an engine over a five-node fleet (or the fleet in `--config`),
//! starts health monitoring, fires a burst of mixed workloads from random
//! origins, and prints the resulting metrics snapshot.
//!
//! ## Usage
//!
//! ```text
//! edge-router [--config edge.toml] [--requests 40]
//! ```
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json`: structured JSON output (production)
//! - `RUST_LOG=info`: log level filter

use futures::future::join_all;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_edge_router::config::loader::load_from_file;
use tokio_edge_router::health::SimulatedProbe;
use tokio_edge_router::request::{CacheOp, ComputeOp, StorageOp};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_edge_router::{
    init_tracing, metrics, Capacity, EdgeEngine, EngineConfig, EngineEvent, GeoPoint,
    LocalDispatcher, NodeDescriptor, Priority, Request, Workload,
};
use tracing::{debug, error, info, warn};

struct Args {
    config: Option<PathBuf>,
    requests: usize,
}

/// Log engine events until the bus closes; returns how many were seen.
///
/// A subscriber that falls behind skips the overwritten events and keeps
/// reading.
async fn drain_events(mut events: broadcast::Receiver<EngineEvent>) -> usize {
    let mut seen = 0usize;
    loop {
        match events.recv().await {
            Ok(event) => {
                seen += 1;
                debug!(event = event.name(), "engine event");
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event log lagged behind the bus");
            }
            Err(RecvError::Closed) => break,
        }
    }
    seen
}

/// Parse command-line arguments manually (no external arg parser dependency).
fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = None;
    let mut requests = 40;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                let path = args.get(i).ok_or("--config requires a path")?;
                config = Some(PathBuf::from(path));
            }
            "--requests" | "-n" => {
                i += 1;
                let n = args.get(i).ok_or("--requests requires a value")?;
                requests = n
                    .parse()
                    .map_err(|_| format!("invalid request count: {n}"))?;
            }
            "--help" | "-h" => {
                return Err("usage: edge-router [--config PATH] [--requests N]".to_string());
            }
            other => return Err(format!("unknown argument: {other}")),
        }
        i += 1;
    }
    Ok(Args { config, requests })
}

fn node(id: &str, region: &str, lat: f64, lon: f64, cpu: f64) -> NodeDescriptor {
    NodeDescriptor {
        id: id.to_string(),
        region: region.to_string(),
        location: GeoPoint::new(lat, lon),
        endpoints: vec![format!("https://{id}.edge.local")],
        capacity: Capacity {
            cpu,
            memory_gb: cpu * 4.0,
            storage_gb: 2000.0,
            bandwidth_gbps: 10.0,
        },
    }
}

fn demo_fleet() -> Vec<NodeDescriptor> {
    vec![
        node("fra-1", "eu-central", 50.1109, 8.6821, 64.0),
        node("lhr-1", "eu-west", 51.5074, -0.1278, 32.0),
        node("iad-1", "us-east", 38.9072, -77.0369, 64.0),
        node("nrt-1", "ap-northeast", 35.6762, 139.6503, 32.0),
        node("sin-1", "ap-southeast", 1.3521, 103.8198, 16.0),
    ]
}

fn random_request(i: usize) -> Request {
    let mut rng = rand::thread_rng();
    let origin = GeoPoint::new(rng.gen_range(-60.0..65.0), rng.gen_range(-180.0..180.0));
    let workload = match i % 5 {
        0 => Workload::Compute {
            operation: ComputeOp::Sum,
            operands: vec![1.0, 2.0, 3.0],
        },
        1 => Workload::Analytics {
            metric: "rps".to_string(),
            points: (0..32).map(|_| rng.gen_range(0.0..1000.0)).collect(),
        },
        2 => Workload::Storage {
            operation: StorageOp::Put,
            key: format!("object-{}", i % 7),
            value: Some("payload".to_string()),
        },
        3 => Workload::Cache {
            operation: CacheOp::Get,
            key: format!("session-{}", i % 3),
            value: None,
            ttl_secs: None,
        },
        _ => Workload::Compute {
            operation: ComputeOp::Mean,
            operands: (0..8).map(f64::from).collect(),
        },
    };
    let priority = if i % 10 == 0 {
        Priority::High
    } else {
        Priority::Normal
    };
    Request::new(workload, origin)
        .with_id(format!("demo-req-{i:03}"))
        .with_priority(priority)
        .with_timeout_ms(rng.gen_range(5..100))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = init_tracing();
    metrics::init_metrics()?;

    let args = match parse_args() {
        Ok(a) => a,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let config = match &args.config {
        Some(path) => load_from_file(path)?,
        None => EngineConfig {
            fleet: demo_fleet(),
            ..EngineConfig::default()
        },
    };

    info!(nodes = config.fleet.len(), requests = args.requests, "starting edge-router demo");

    let engine = Arc::new(EdgeEngine::new(
        config,
        Arc::new(SimulatedProbe::new(0.15, 0.05)),
        Arc::new(LocalDispatcher::new().with_delay(Duration::from_millis(3))),
    )?);

    let event_log = tokio::spawn(drain_events(engine.subscribe()));

    engine.start();
    // Let the first probe cycle land.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let responses = join_all((0..args.requests).map(|i| {
        let engine = Arc::clone(&engine);
        async move { engine.handle(random_request(i)).await }
    }))
    .await;

    for r in &responses {
        info!(
            request_id = %r.request_id,
            status = %r.status,
            node_id = r.node_id.as_deref().unwrap_or("-"),
            latency_ms = r.latency_ms,
            "response"
        );
    }

    // Replay the first request to show a cache hit.
    let replay = engine.handle(random_request(0)).await;
    info!(
        status = %replay.status,
        protocol = ?replay.metadata.as_ref().map(|m| m.protocol.as_str()),
        "replayed request"
    );

    let snapshot = engine.metrics_snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    engine.shutdown().await;
    match event_log.await {
        Ok(seen) => info!(events = seen, "event stream closed"),
        Err(e) => error!(error = %e, "event logger failed"),
    }

    print!("{}", metrics::gather_metrics());
    Ok(())
}
