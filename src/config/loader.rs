//! Reading an engine description from TOML.
//!
//! ## Responsibility
//! Turn an operator's `edge.toml` (fleet roster, latency budgets, health
//! thresholds, scoring weights, cache sizing) into an [`EngineConfig`] that
//! has already passed every rule in [`validation`].
//!
//! ## Guarantees
//! - No config leaves this module unvalidated
//! - Every violated rule is reported in one error, one rule per line
//! - Errors name the file or source they came from
//!
//! ## NOT Responsible For
//! - Reacting to edits of a running engine's file

use std::path::Path;

use tracing::debug;

use super::validation::{self, ConfigError};
use super::EngineConfig;

/// Read and validate the engine description at `path`.
///
/// Fails with [`ConfigError::Io`] when the file cannot be read; otherwise
/// behaves like [`load_from_str`] with the path as the source name.
///
/// ```rust,ignore
/// use tokio_edge_router::config::loader::load_from_file;
/// use std::path::Path;
///
/// let config = load_from_file(Path::new("edge.toml"))?;
/// println!("fleet size: {}", config.fleet.len());
/// ```
pub fn load_from_file(path: &Path) -> Result<EngineConfig, ConfigError> {
    let source_name = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: source_name.clone(),
        source: e,
    })?;
    load_from_str(&content, &source_name)
}

/// Parse and validate an engine description held in memory.
///
/// A TOML syntax or shape error (a fleet entry without `capacity`, say) is
/// [`ConfigError::Parse`]; a well-formed file that breaks a rule such as a
/// duplicate node id is [`ConfigError::Validation`].
///
/// # Panics
///
/// This function never panics.
pub fn load_from_str(content: &str, source_name: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    if let Err(violations) = validation::validate(&config) {
        let lines: Vec<String> = violations.iter().map(ToString::to_string).collect();
        return Err(ConfigError::Validation(lines.join("\n")));
    }

    debug!(
        source = source_name,
        nodes = config.fleet.len(),
        "engine config loaded"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID_TOML: &str = r#"
[engine]
global_max_latency_ms = 40
target_latency_ms = 25

[health]
interval_ms = 1000
probe_timeout_ms = 500

[health.thresholds]
cpu_usage = 90.0

[scoring.weights]
latency = 0.5
health = 0.2
capacity = 0.2
distance = 0.1

[cache]
max_entries = 500

[[fleet]]
id = "fra-1"
region = "eu-central"
location = { latitude = 50.1109, longitude = 8.6821 }
endpoints = ["https://fra-1.edge.internal"]
capacity = { cpu = 64.0, memory_gb = 256.0, storage_gb = 2000.0, bandwidth_gbps = 10.0 }

[[fleet]]
id = "nrt-1"
region = "ap-northeast"
location = { latitude = 35.6762, longitude = 139.6503 }
capacity = { cpu = 32.0, memory_gb = 128.0, storage_gb = 1000.0, bandwidth_gbps = 10.0 }
"#;

    #[test]
    fn test_load_from_str_valid_toml_succeeds() {
        let config = load_from_str(VALID_TOML, "test").expect("test: valid config");
        assert_eq!(config.engine.global_max_latency_ms, 40);
        assert_eq!(config.health.thresholds.cpu_usage, 90.0);
        assert_eq!(config.health.thresholds.memory_usage, 80.0);
        assert_eq!(config.scoring.weights.latency, 0.5);
        assert_eq!(config.cache.max_entries, 500);
        assert_eq!(config.fleet.len(), 2);
        assert_eq!(config.fleet[0].endpoints.len(), 1);
        assert!(config.fleet[1].endpoints.is_empty());
    }

    #[test]
    fn test_load_from_str_invalid_toml_returns_parse_error() {
        let result = load_from_str("not valid toml [[[", "bad.toml");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_from_str_validation_failure_returns_validation_error() {
        let result = load_from_str("[engine]\nglobal_max_latency_ms = 0\n", "zero.toml");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_load_from_str_missing_capacity_returns_parse_error() {
        let toml_str = r#"
[[fleet]]
id = "x"
region = "eu"
location = { latitude = 0.0, longitude = 0.0 }
"#;
        let result = load_from_str(toml_str, "no-capacity.toml");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_from_str_source_name_appears_in_error() {
        let msg = load_from_str("invalid [[[", "my-source.toml")
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        assert!(msg.contains("my-source.toml"));
    }

    #[test]
    fn test_load_from_file_valid_toml_succeeds() {
        let dir = tempfile::tempdir().expect("test: create tempdir");
        let path = dir.path().join("edge.toml");
        let mut f = std::fs::File::create(&path).expect("test: create file");
        f.write_all(VALID_TOML.as_bytes()).expect("test: write");
        drop(f);

        let config = load_from_file(&path).expect("test: load from file");
        assert_eq!(config.fleet[0].id, "fra-1");
    }

    #[test]
    fn test_load_from_file_missing_file_returns_io_error() {
        let result = load_from_file(Path::new("/nonexistent/path/edge.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_every_fleet_violation_is_reported_together() {
        let broken = VALID_TOML
            .replace("nrt-1", "fra-1")
            .replace("latitude = 35.6762", "latitude = 135.0");
        match load_from_str(&broken, "broken.toml") {
            Err(ConfigError::Validation(msg)) => {
                assert!(msg.contains("duplicate node id"), "{msg}");
                assert!(msg.lines().count() >= 2, "{msg}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_load_from_file_duplicate_ids_returns_validation_error() {
        let dir = tempfile::tempdir().expect("test: create tempdir");
        let path = dir.path().join("dup.toml");
        let dup = VALID_TOML.replace("nrt-1", "fra-1");
        std::fs::write(&path, dup).expect("test: write");

        match load_from_file(&path) {
            Err(ConfigError::Validation(msg)) => assert!(msg.contains("duplicate node id")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
