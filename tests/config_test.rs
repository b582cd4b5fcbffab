//! Integration tests for configuration loading

use std::io::Write;
use tempfile::NamedTempFile;
use valet_gate::infra::{Config, FusionMode};

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "test-site"

[gates]
ids = ["North", "South"]

[scoring]
proximity_weight = 0.5
heading_weight = 0.3
dwell_weight = 0.2

[dispatch]
confidence_threshold = 85
min_spacing_ms = 4000
max_spacing_ms = 20000
signal_loss_ms = 60000
in_transit_after_ms = 120000

[history]
capacity = 5

[fusion]
mode = "direct"
fallback = 10.0

[http]
port = 8088

[metrics]
interval_secs = 15
prometheus_enabled = false

[mqtt]
host = "test-host"
port = 1884
username = "valet"
password = "secret"

[mqtt_egress]
enabled = true
dispatch_topic = "site/dispatch"
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "test-site");
    let gates: Vec<&str> = config.gates().iter().map(|g| g.as_str()).collect();
    assert_eq!(gates, vec!["North", "South"]);
    assert_eq!(config.weights().proximity, 0.5);

    let engine = config.engine();
    assert_eq!(engine.confidence_threshold, 85);
    assert_eq!(engine.min_spacing_ms, 4000);
    assert_eq!(engine.max_spacing_ms, 20000);
    assert_eq!(engine.signal_loss_ms, 60000);
    assert_eq!(engine.in_transit_after_ms, Some(120000));

    assert_eq!(config.history_capacity(), 5);
    assert_eq!(config.fusion_mode(), FusionMode::Direct);
    assert_eq!(config.fusion_fallback(), Some(10.0));
    assert_eq!(config.http_port(), 8088);
    assert_eq!(config.metrics_interval_secs(), 15);
    assert!(!config.prometheus_enabled());
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_username(), Some("valet"));
    assert_eq!(config.mqtt_password(), Some("secret"));
    assert!(config.mqtt_egress_enabled());
    assert_eq!(config.mqtt_egress_dispatch_topic(), "site/dispatch");
    // Unset keys in a present section keep their defaults
    assert_eq!(config.mqtt_egress_metrics_topic(), "valet/metrics");
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml").unwrap();
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.gates().len(), 4);
    assert_eq!(config.fusion_mode(), FusionMode::Simulated);
}

#[test]
fn test_invalid_file_is_fatal() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[scoring]\nproximity_weight = -1.0\n").unwrap();
    temp_file.flush().unwrap();

    let err = Config::load_from_path(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("proximity"), "{err:#}");
}

#[test]
fn test_unparsable_file_is_fatal() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[dispatch\nconfidence_threshold = \"high\"").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::load_from_path(temp_file.path()).is_err());
}

#[test]
fn test_dev_config_loads() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/dev.toml");
    let config = Config::from_file(path).unwrap();
    assert_eq!(config.site_id(), "dev");
    assert_eq!(config.engine().confidence_threshold, 90);
}
