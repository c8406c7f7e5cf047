//! # Engine Integration
//!
//! Exercises [`EdgeEngine`] through its public surface only: the response
//! cache, write invalidation, the event bus lifecycle, latency violations,
//! and building an engine from a TOML file on disk.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_edge_router::config::loader::load_from_file;
use tokio_edge_router::request::{CacheOp, ComputeOp, StorageOp};
use tokio_edge_router::response::{CacheResult, StorageResult};
use tokio_edge_router::{
    Capacity, EdgeEngine, EngineConfig, EngineEvent, GeoPoint, LocalDispatcher, NodeDescriptor,
    Request, ResourceRequirements, ResponseMetadata, ResponseStatus, RouterError, Workload,
    WorkloadResult,
};

fn frankfurt() -> NodeDescriptor {
    NodeDescriptor {
        id: "fra-1".into(),
        region: "eu-central".into(),
        location: GeoPoint::new(50.1109, 8.6821),
        endpoints: vec!["https://fra-1.edge.internal".into()],
        capacity: Capacity {
            cpu: 64.0,
            memory_gb: 256.0,
            storage_gb: 2000.0,
            bandwidth_gbps: 10.0,
        },
    }
}

fn engine() -> EdgeEngine {
    EdgeEngine::with_defaults(EngineConfig {
        fleet: vec![frankfurt()],
        ..EngineConfig::default()
    })
    .expect("test: engine")
}

fn near_frankfurt(workload: Workload) -> Request {
    Request::new(workload, GeoPoint::new(50.0, 8.5))
}

fn storage(operation: StorageOp, key: &str, value: Option<&str>) -> Request {
    near_frankfurt(Workload::Storage {
        operation,
        key: key.into(),
        value: value.map(str::to_string),
    })
}

fn stored_value(r: &tokio_edge_router::Response) -> Option<String> {
    match &r.data {
        Some(WorkloadResult::Storage(StorageResult { value, .. })) => value.clone(),
        _ => None,
    }
}

fn served_from_cache(r: &tokio_edge_router::Response) -> bool {
    r.metadata.as_ref().map(|m| m.protocol.as_str()) == Some(ResponseMetadata::CACHE_PROTOCOL)
}

#[tokio::test]
async fn test_repeated_read_hits_cache_and_skips_node() {
    let e = engine();
    let req = || {
        near_frankfurt(Workload::Analytics {
            metric: "rps".into(),
            points: vec![10.0, 20.0, 30.0, 40.0],
        })
    };

    let first = e.handle(req()).await;
    let second = e.handle(req()).await;

    assert!(first.is_success());
    assert!(!served_from_cache(&first));
    assert!(served_from_cache(&second));
    assert_eq!(second.node_id, None);
    assert_eq!(second.metadata.as_ref().map(|m| m.hops), Some(0));
    assert_eq!(first.data, second.data);

    let snap = e.metrics_snapshot();
    assert_eq!(snap.cache.hits, 1);
    assert_eq!(snap.cache.misses, 1);
    assert_eq!(snap.cache.entries, 1);
    assert_eq!(snap.nodes.get("fra-1").map(|c| c.requests), Some(1));
}

#[tokio::test]
async fn test_write_invalidates_cached_read() {
    let e = engine();

    assert!(e.handle(storage(StorageOp::Put, "cart", Some("v1"))).await.is_success());
    let read = e.handle(storage(StorageOp::Get, "cart", None)).await;
    assert_eq!(stored_value(&read), Some("v1".into()));

    let cached = e.handle(storage(StorageOp::Get, "cart", None)).await;
    assert!(served_from_cache(&cached));

    assert!(e.handle(storage(StorageOp::Put, "cart", Some("v2"))).await.is_success());
    let fresh = e.handle(storage(StorageOp::Get, "cart", None)).await;
    assert!(!served_from_cache(&fresh));
    assert_eq!(stored_value(&fresh), Some("v2".into()));
}

#[tokio::test]
async fn test_cache_set_then_get_round_trips_through_node() {
    let e = engine();
    let set = near_frankfurt(Workload::Cache {
        operation: CacheOp::Set,
        key: "session-1".into(),
        value: Some("token".into()),
        ttl_secs: Some(60),
    });
    let get = near_frankfurt(Workload::Cache {
        operation: CacheOp::Get,
        key: "session-1".into(),
        value: None,
        ttl_secs: None,
    });

    assert!(e.handle(set).await.is_success());
    let r = e.handle(get).await;
    match r.data {
        Some(WorkloadResult::Cache(CacheResult { hit, value, .. })) => {
            assert!(hit);
            assert_eq!(value.as_deref(), Some("token"));
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

fn slot(operation: CacheOp, key: &str, value: Option<&str>, ttl_secs: Option<u64>) -> Request {
    near_frankfurt(Workload::Cache {
        operation,
        key: key.into(),
        value: value.map(str::to_string),
        ttl_secs,
    })
}

fn slot_hit(r: &tokio_edge_router::Response) -> Option<(bool, Option<String>)> {
    match &r.data {
        Some(WorkloadResult::Cache(c)) => Some((c.hit, c.value.clone())),
        _ => None,
    }
}

#[tokio::test]
async fn test_cached_slot_read_expires_with_the_slot() {
    let e = engine();
    let get = || slot(CacheOp::Get, "s", None, None);

    assert!(e.handle(slot(CacheOp::Set, "s", Some("tok"), Some(1))).await.is_success());
    let live = e.handle(get()).await;
    assert_eq!(slot_hit(&live), Some((true, Some("tok".into()))));
    assert!(served_from_cache(&e.handle(get()).await));

    tokio::time::sleep(Duration::from_millis(1_200)).await;

    let expired = e.handle(get()).await;
    assert!(expired.is_success());
    assert!(!served_from_cache(&expired));
    assert_eq!(slot_hit(&expired), Some((false, None)));
}

#[tokio::test]
async fn test_slot_miss_is_not_cached() {
    let e = engine();
    let first = e.handle(slot(CacheOp::Get, "later", None, None)).await;
    assert_eq!(slot_hit(&first), Some((false, None)));

    assert!(e.handle(slot(CacheOp::Set, "later", Some("v"), None)).await.is_success());
    let second = e.handle(slot(CacheOp::Get, "later", None, None)).await;
    assert!(!served_from_cache(&second));
    assert_eq!(slot_hit(&second), Some((true, Some("v".into()))));
}

#[tokio::test]
async fn test_slot_write_invalidates_cached_read() {
    let e = engine();
    let get = || slot(CacheOp::Get, "k", None, None);

    assert!(e.handle(slot(CacheOp::Set, "k", Some("v1"), Some(30))).await.is_success());
    assert_eq!(slot_hit(&e.handle(get()).await), Some((true, Some("v1".into()))));
    assert!(served_from_cache(&e.handle(get()).await));

    assert!(e.handle(slot(CacheOp::Set, "k", Some("v2"), Some(30))).await.is_success());
    let fresh = e.handle(get()).await;
    assert!(!served_from_cache(&fresh));
    assert_eq!(slot_hit(&fresh), Some((true, Some("v2".into()))));
}

#[tokio::test]
async fn test_slot_read_carrying_ttl_is_rejected() {
    let e = engine();
    assert!(e.handle(slot(CacheOp::Set, "k", Some("v1"), None)).await.is_success());
    let r = e.handle(slot(CacheOp::Get, "k", None, Some(30))).await;
    assert_eq!(r.status, ResponseStatus::Error);
    assert!(r.node_id.is_none());
}

#[tokio::test]
async fn test_events_flow_until_shutdown_closes_bus() {
    let e = engine();
    let mut rx = e.subscribe();
    e.start();

    let req = near_frankfurt(Workload::Compute {
        operation: ComputeOp::Max,
        operands: vec![3.0, 9.0, 4.0],
    })
    .with_id("evt-1");
    assert!(e.handle(req).await.is_success());

    e.shutdown().await;
    assert!(!e.is_running());

    let mut selected = None;
    loop {
        match rx.recv().await {
            Ok(EngineEvent::NodeSelected {
                request_id,
                node_id,
                ..
            }) => selected = Some((request_id, node_id)),
            Ok(_) => continue,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
    assert_eq!(selected, Some(("evt-1".to_string(), "fra-1".to_string())));

    // A subscriber created after shutdown sees a closed stream immediately.
    let mut late = e.subscribe();
    assert!(matches!(late.recv().await, Err(RecvError::Closed)));
}

#[tokio::test]
async fn test_latency_violation_is_counted_and_published() {
    let e = EdgeEngine::new(
        EngineConfig {
            fleet: vec![frankfurt()],
            ..EngineConfig::default()
        },
        Arc::new(tokio_edge_router::health::SimulatedProbe::new(0.0, 0.0)),
        Arc::new(LocalDispatcher::new().with_delay(Duration::from_millis(3))),
    )
    .expect("test: engine");
    let mut rx = e.subscribe();

    let req = near_frankfurt(Workload::Compute {
        operation: ComputeOp::Sum,
        operands: vec![1.0],
    })
    .with_id("slow-1")
    .with_requirements(ResourceRequirements {
        max_latency_ms: Some(1),
        ..ResourceRequirements::default()
    });
    let r = e.handle(req).await;

    assert!(r.is_success());
    assert!(r.latency_ms > 1.0);
    assert_eq!(e.metrics_snapshot().latency_violations, 1);

    let mut violation = None;
    while let Ok(event) = rx.try_recv() {
        if let EngineEvent::LatencyViolation {
            request_id,
            threshold_ms,
            ..
        } = event
        {
            violation = Some((request_id, threshold_ms));
        }
    }
    assert_eq!(violation, Some(("slow-1".to_string(), 1.0)));
}

#[tokio::test]
async fn test_fast_nearby_request_is_not_a_violation() {
    let e = engine();
    let r = e
        .handle(near_frankfurt(Workload::Compute {
            operation: ComputeOp::Mean,
            operands: vec![2.0, 4.0],
        }))
        .await;
    assert!(r.is_success());
    assert_eq!(e.metrics_snapshot().latency_violations, 0);
}

#[tokio::test]
async fn test_invalid_workload_never_reaches_a_node() {
    let e = engine();
    let r = e.handle(storage(StorageOp::Put, "k", None)).await;
    assert_eq!(r.status, ResponseStatus::Error);
    assert!(r.error.as_deref().unwrap_or_default().contains("requires a value"));
    assert_eq!(e.metrics_snapshot().nodes.get("fra-1").map(|c| c.requests), Some(0));
}

#[tokio::test]
async fn test_engine_built_from_toml_file() {
    let toml = r#"
[engine]
global_max_latency_ms = 40
target_latency_ms = 25

[cache]
max_entries = 2

[[fleet]]
id = "fra-1"
region = "eu-central"
location = { latitude = 50.1109, longitude = 8.6821 }
capacity = { cpu = 64.0, memory_gb = 256.0, storage_gb = 2000.0, bandwidth_gbps = 10.0 }

[[fleet]]
id = "iad-1"
region = "us-east"
location = { latitude = 38.9072, longitude = -77.0369 }
capacity = { cpu = 64.0, memory_gb = 256.0, storage_gb = 2000.0, bandwidth_gbps = 10.0 }
"#;
    let dir = tempfile::tempdir().expect("test: tempdir");
    let path = dir.path().join("edge.toml");
    let mut f = std::fs::File::create(&path).expect("test: create");
    f.write_all(toml.as_bytes()).expect("test: write");
    drop(f);

    let config = load_from_file(&path).expect("test: load");
    let e = EdgeEngine::with_defaults(config).expect("test: engine");
    assert_eq!(e.registry().len(), 2);
    assert_eq!(e.config().engine.target_latency_ms, 25);

    let near_dc = Request::new(
        Workload::Compute {
            operation: ComputeOp::Sum,
            operands: vec![1.0],
        },
        GeoPoint::new(38.9, -77.0),
    );
    let r = e.handle(near_dc).await;
    assert_eq!(r.node_id.as_deref(), Some("iad-1"));

    // Cache bound of two: a third distinct read evicts the oldest.
    for n in 0..3 {
        let req = Request::new(
            Workload::Compute {
                operation: ComputeOp::Product,
                operands: vec![n as f64, 2.0],
            },
            GeoPoint::new(50.0, 8.5),
        );
        assert!(e.handle(req).await.is_success());
    }
    let cache = e.metrics_snapshot().cache;
    assert_eq!(cache.entries, 2);
    assert!(cache.evictions >= 2);
}

#[test]
fn test_invalid_config_is_rejected_at_construction() {
    let mut bad = frankfurt();
    bad.capacity.cpu = 0.0;
    let result = EdgeEngine::with_defaults(EngineConfig {
        fleet: vec![bad],
        ..EngineConfig::default()
    });
    match result {
        Err(RouterError::Config(msg)) => assert!(msg.contains("fleet[0].capacity.cpu")),
        other => panic!("expected config error, got {other:?}"),
    }
}
