//! Edge Case Testing
//!
//! Boundary conditions for descriptor parsing, configuration resolution, and
//! the embedded `SQLite` executor:
//! - Malformed and repeated descriptor segments
//! - Placeholder and blank credential values
//! - Values containing `=`, quotes, and control characters
//! - Unicode and large result sets through the cache

use cloudops::config::{self, Fragment, SkipReason};
use cloudops::{CloudOpsError, Configuration, MapEnv, Provider, RawParams, ResolveOptions, SchemaModel};
use pretty_assertions::assert_eq;

// ============================================================================
// Test Helpers
// ============================================================================

fn resolve_with(params: &str, env: &MapEnv) -> cloudops::Result<Configuration> {
    config::resolve(&config::parse(params), &RawParams::new(), env, ResolveOptions::default())
}

fn resolve(params: &str) -> cloudops::Result<Configuration> {
    resolve_with(params, &MapEnv::new())
}

const GCP: &str = "gcp.projectIds=proj-1,proj-2;gcp.credentialsPath=/etc/cloudops/gcp.json";

// ============================================================================
// Descriptor Parsing
// ============================================================================

#[test]
fn test_only_separators() {
    let fragments = config::parse_fragments(";;;");
    assert_eq!(fragments.len(), 4);
    assert!(fragments.iter().all(|f| matches!(f, Fragment::Skipped { reason: SkipReason::Empty, .. })));
    assert!(config::parse(";;;").is_empty());
}

#[test]
fn test_garbage_segments_do_not_block_valid_ones() {
    let config = resolve(&format!("garbage;=x;{GCP};also garbage")).unwrap();
    assert!(config.is_enabled(Provider::Gcp));
}

#[test]
fn test_value_with_equals_and_spaces() {
    let params = config::parse("  gcp.credentialsPath =  /tmp/key=v1.json  ");
    assert_eq!(params.get("gcp.credentialsPath"), Some("/tmp/key=v1.json"));
}

#[test]
fn test_unknown_keys_are_ignored() {
    let config = resolve(&format!("{GCP};gcp.zone=europe-west1-b;unrelated=1")).unwrap();
    let gcp = config.provider(Provider::Gcp).unwrap();
    assert_eq!(gcp.fields().count(), 2);
}

#[test]
fn test_keys_are_case_sensitive() {
    let config = resolve("GCP.projectIds=p;GCP.credentialsPath=/etc/gcp.json").unwrap();
    assert!(config.provider(Provider::Gcp).is_none());
}

#[test]
fn test_repeated_key_last_wins() {
    let config = resolve("cache.ttlMinutes=1;cache.ttlMinutes=7").unwrap();
    assert_eq!(config.cache_policy().ttl_minutes(), 7);
}

// ============================================================================
// Resolution
// ============================================================================

#[test]
fn test_environment_only_provider() {
    let env = MapEnv::new()
        .with("GCP_PROJECT_IDS", "env-project")
        .with("GOOGLE_APPLICATION_CREDENTIALS", "/var/run/gcp.json");
    let config = resolve_with("", &env).unwrap();
    assert_eq!(config.provider(Provider::Gcp).unwrap().get("projectIds"), Some("env-project"));
}

#[test]
fn test_placeholder_in_environment_is_absent() {
    let env = MapEnv::new()
        .with("GCP_PROJECT_IDS", "your-project-id")
        .with("GOOGLE_APPLICATION_CREDENTIALS", "/path/to/service-account.json");
    let config = resolve_with("", &env).unwrap();
    assert!(config.providers().is_empty());
}

#[test]
fn test_placeholder_mixed_with_real_values_is_partial() {
    let err = resolve("gcp.projectIds=real-project;gcp.credentialsPath=your-credentials").unwrap_err();
    match err {
        CloudOpsError::IncompleteProvider { provider, missing } => {
            assert_eq!(provider, "gcp");
            assert_eq!(missing, vec!["gcp.credentialsPath"]);
        }
        other => panic!("expected IncompleteProvider, got {other:?}"),
    }
}

#[test]
fn test_whitespace_value_falls_back_to_environment() {
    let env = MapEnv::new().with("CLOUDOPS_CACHE_ENABLED", "false");
    let config = resolve_with("cache.enabled=   ", &env).unwrap();
    assert!(!config.cache_policy().enabled);
}

#[test]
fn test_huge_ttl_is_rejected_not_wrapped() {
    let config = resolve(&format!("cache.ttlMinutes={}", u64::MAX)).unwrap();
    assert_eq!(config.cache_policy().ttl_minutes(), 5);
    assert_eq!(config.warnings().len(), 1);
}

#[test]
fn test_zero_ttl_is_accepted() {
    let config = resolve("cache.ttlMinutes=0").unwrap();
    assert_eq!(config.cache_policy().ttl_minutes(), 0);
    assert!(config.warnings().is_empty());
}

#[test]
fn test_allow_list_of_only_commas_enables_nothing() {
    let config = resolve(&format!("{GCP};providers= , ")).unwrap();
    assert!(config.enabled_providers().is_empty());
    assert_eq!(config.providers().len(), 1);
}

#[test]
fn test_warning_does_not_echo_secrets() {
    let config = resolve(&format!("{GCP};cache.debugMode=yes")).unwrap();
    let warning = config.warnings()[0].to_string();
    assert!(warning.contains("cache.debugMode"));
    assert!(!warning.contains("gcp.json"));
}

// ============================================================================
// Model Escaping
// ============================================================================

#[test]
fn test_control_characters_survive_model_round_trip() {
    let mut properties = RawParams::new();
    properties.insert("gcp.projectIds", "tab\there");
    properties.insert("gcp.credentialsPath", "C:\\keys\\\"prod\"\r\n.json");
    let config = config::resolve(&RawParams::new(), &properties, &MapEnv::new(), ResolveOptions::default())
        .unwrap();

    let model = SchemaModel::build(&config);
    let value: serde_json::Value = serde_json::from_str(&model.to_json()).unwrap();
    let gcp = &value["schemas"][0]["operand"]["gcp"];
    assert_eq!(gcp["projectIds"], "tab\there");
    assert_eq!(gcp["credentialsPath"], "C:\\keys\\\"prod\"\r\n.json");
}

// ============================================================================
// Embedded Engine
// ============================================================================

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use pretty_assertions::assert_eq;
    use cloudops::engine::sqlite::SqliteFactory;
    use cloudops::{CacheSource, Driver, Predicate, QueryRequest, SortKey};
    use std::path::PathBuf;

    fn inventory(name: &str, rows: usize) -> PathBuf {
        let path = std::env::temp_dir().join(format!("cloudops_edge_{name}_{}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let conn = rusqlite::Connection::open(&path).expect("Failed to create database");
        conn.execute(
            "CREATE TABLE storage_resources (resource_id TEXT NOT NULL, cloud_provider TEXT NOT NULL, name TEXT, size_gb REAL)",
            [],
        )
        .expect("Failed to create table");
        conn.execute_batch("BEGIN").expect("Failed to begin");
        let mut insert = conn
            .prepare("INSERT INTO storage_resources VALUES (?, ?, ?, ?)")
            .expect("Failed to prepare insert");
        for i in 0..rows {
            let provider = ["azure", "gcp", "aws"][i % 3];
            insert
                .execute(rusqlite::params![format!("res-{i:05}"), provider, format!("bucket-{i}"), i as f64 * 1.5])
                .expect("Failed to insert");
        }
        insert
            .execute(rusqlite::params!["res-unicode", "gcp", "数据-🚀-ñ", 0.25])
            .expect("Failed to insert");
        conn.execute_batch("COMMIT").expect("Failed to commit");
        path
    }

    fn driver(path: &PathBuf) -> Driver {
        Driver::builder(SqliteFactory::new(path)).env(MapEnv::new()).build()
    }

    #[test]
    fn test_unicode_values_round_trip() {
        let path = inventory("unicode", 3);
        let conn = driver(&path)
            .connect(Some(&*format!("jdbc:cloudops:{GCP}")), &RawParams::new())
            .unwrap()
            .unwrap();

        let outcome = conn
            .execute(&QueryRequest::scan("storage_resources").filter(Predicate::eq("resource_id", "res-unicode")))
            .unwrap();
        assert_eq!(outcome.result.rows[0][2], serde_json::json!("数据-🚀-ñ"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_large_result_is_cached_whole() {
        let path = inventory("large", 3000);
        let conn = driver(&path)
            .connect(Some(&*format!("jdbc:cloudops:{GCP}")), &RawParams::new())
            .unwrap()
            .unwrap();
        let request = QueryRequest::scan("storage_resources").order_by(SortKey::asc("resource_id"));

        let first = conn.execute(&request).unwrap();
        let second = conn.execute(&request).unwrap();

        assert_eq!(first.result.row_count(), 1001);
        assert_eq!(second.source, CacheSource::Hit);
        assert_eq!(first.result, second.result);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_database_fails_at_connect() {
        let err = driver(&PathBuf::from("/nonexistent/inventory.db"))
            .connect(Some("jdbc:cloudops:"), &RawParams::new())
            .unwrap_err();
        assert_eq!(err.error_code(), "ENGINE_ERROR");
    }

    #[test]
    fn test_unconfigured_connection_sees_no_rows() {
        let path = inventory("empty", 9);
        let conn = driver(&path).connect(Some("jdbc:cloudops:"), &RawParams::new()).unwrap().unwrap();
        let outcome = conn.execute(&QueryRequest::scan("storage_resources")).unwrap();
        assert_eq!(outcome.result.row_count(), 0);
        assert_eq!(outcome.result.columns.len(), 4);

        let _ = std::fs::remove_file(&path);
    }
}
