//! 从配置文件启动

use std::io::Write;
use std::sync::Arc;
use tripgate::{
    config::GovernorConfig, error::TripGateError, governor::Governor, storage::MemoryStorage,
};

fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[tokio::test]
async fn test_bootstrap_from_yaml_file() {
    let file = write_config(
        ".yaml",
        r#"
namespace: "shop"
admission_lock:
  ttl_ms: 200
  max_attempts: 50
  retry_interval_ms: 1
resources:
  - resource: "search"
    kind: "qps"
    window_seconds: 60
    critical_threshold: 2
  - resource: "payment"
    kind: "continuous_error"
    window_seconds: 10
    critical_threshold: 2
    open_seconds: 5
"#,
    );

    let config = GovernorConfig::from_file(file.path()).unwrap();
    assert_eq!(config.admission_lock.ttl_ms, 200);

    let governor = Governor::new(config, Arc::new(MemoryStorage::new())).unwrap();
    assert_eq!(governor.register_configured_resources().await.unwrap(), 2);

    assert!(governor.admit("search").await.unwrap().allowed);
    assert!(governor.admit("search").await.unwrap().allowed);
    assert!(!governor.admit("search").await.unwrap().allowed);
    assert!(governor.admit("payment").await.unwrap().token.is_some());
}

#[tokio::test]
async fn test_bootstrap_from_toml_file() {
    let file = write_config(
        ".toml",
        r#"
namespace = "shop"

[[resources]]
resource = "payment"
kind = 2
window_seconds = 10
critical_threshold = 0.5
open_seconds = 30
min_samples = 20
"#,
    );

    let config = GovernorConfig::from_file(file.path()).unwrap();
    assert_eq!(config.resources.len(), 1);
    assert_eq!(config.resources[0].min_samples, 20);
}

#[test]
fn test_unsupported_extension() {
    let file = write_config(".json", "{}");
    assert!(matches!(
        GovernorConfig::from_file(file.path()),
        Err(TripGateError::ConfigError(_))
    ));
}

#[test]
fn test_missing_file() {
    assert!(matches!(
        GovernorConfig::from_file("/nonexistent/tripgate.yaml"),
        Err(TripGateError::ConfigError(_))
    ));
}

#[test]
fn test_invalid_rule_in_file() {
    let file = write_config(
        ".yaml",
        r#"
resources:
  - resource: "search"
    kind: 7
    window_seconds: 1
    critical_threshold: 1
"#,
    );
    assert!(matches!(
        GovernorConfig::from_file(file.path()),
        Err(TripGateError::InvalidRuleKind(_))
    ));
}
