//! Configuration loading from TOML files
//!
//! Config file is selected via `--config <path>` (default: config/dev.toml).
//! Every section is optional; omitted values fall back to the defaults below.
//! A missing file runs with defaults, but a file that fails to parse or
//! validate is a fatal startup error.

use crate::domain::error::ConfigError;
use crate::domain::types::GateSet;
use crate::services::engine::EngineConfig;
use crate::services::history::DEFAULT_HISTORY_CAPACITY;
use crate::services::scorer::ScoreWeights;
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionMode {
    /// Random fill for unreported signals
    Simulated,
    /// Reported signals only
    Direct,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique site identifier (e.g., "airport-p3")
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "valet".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatesConfig {
    /// Gate ids in tie-break order
    #[serde(default = "default_gate_ids")]
    pub ids: Vec<String>,
}

impl Default for GatesConfig {
    fn default() -> Self {
        Self { ids: default_gate_ids() }
    }
}

fn default_gate_ids() -> Vec<String> {
    ["A", "B", "C", "D"].iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_proximity_weight")]
    pub proximity_weight: f64,
    #[serde(default = "default_heading_weight")]
    pub heading_weight: f64,
    #[serde(default = "default_dwell_weight")]
    pub dwell_weight: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            proximity_weight: default_proximity_weight(),
            heading_weight: default_heading_weight(),
            dwell_weight: default_dwell_weight(),
        }
    }
}

fn default_proximity_weight() -> f64 {
    0.4
}

fn default_heading_weight() -> f64 {
    0.4
}

fn default_dwell_weight() -> f64 {
    0.2
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Confidence must be strictly above this to commit or redirect
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: u8,
    #[serde(default = "default_min_spacing_ms")]
    pub min_spacing_ms: u64,
    #[serde(default = "default_max_spacing_ms")]
    pub max_spacing_ms: u64,
    #[serde(default = "default_signal_loss_ms")]
    pub signal_loss_ms: u64,
    /// Derive in-transit from time since dispatch (unset: explicit only)
    #[serde(default)]
    pub in_transit_after_ms: Option<u64>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            min_spacing_ms: default_min_spacing_ms(),
            max_spacing_ms: default_max_spacing_ms(),
            signal_loss_ms: default_signal_loss_ms(),
            in_transit_after_ms: None,
        }
    }
}

fn default_confidence_threshold() -> u8 {
    90
}

fn default_min_spacing_ms() -> u64 {
    5_000
}

fn default_max_spacing_ms() -> u64 {
    15_000
}

fn default_signal_loss_ms() -> u64 {
    90_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { capacity: default_history_capacity() }
    }
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

#[derive(Debug, Clone, Deserialize)]
pub struct FusionConfig {
    #[serde(default = "default_fusion_mode")]
    pub mode: FusionMode,
    /// Substitute for missing signals in direct mode (unset: reject)
    #[serde(default)]
    pub fallback: Option<f64>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self { mode: default_fusion_mode(), fallback: None }
    }
}

fn default_fusion_mode() -> FusionMode {
    FusionMode::Simulated
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// HTTP API port (0 to disable)
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: default_http_port() }
    }
}

fn default_http_port() -> u16 {
    4000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Serve `/metrics` on the HTTP port
    #[serde(default = "default_prometheus_enabled")]
    pub prometheus_enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_metrics_interval(),
            prometheus_enabled: default_prometheus_enabled(),
        }
    }
}

fn default_prometheus_enabled() -> bool {
    true
}

fn default_metrics_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self { host: default_mqtt_host(), port: default_mqtt_port(), username: None, password: None }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttEgressConfig {
    /// Enable MQTT egress publishing
    #[serde(default)]
    pub enabled: bool,
    /// Topic for dispatch transitions (QoS 1)
    #[serde(default = "default_dispatch_topic")]
    pub dispatch_topic: String,
    /// Topic for metrics summaries, published once per `[metrics]` interval (QoS 0)
    #[serde(default = "default_metrics_topic")]
    pub metrics_topic: String,
}

impl Default for MqttEgressConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dispatch_topic: default_dispatch_topic(),
            metrics_topic: default_metrics_topic(),
        }
    }
}

fn default_dispatch_topic() -> String {
    "valet/dispatch".to_string()
}

fn default_metrics_topic() -> String {
    "valet/metrics".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub gates: GatesConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub mqtt_egress: MqttEgressConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    gates: GateSet,
    weights: ScoreWeights,
    engine: EngineConfig,
    history_capacity: usize,
    fusion_mode: FusionMode,
    fusion_fallback: Option<f64>,
    http_port: u16,
    metrics_interval_secs: u64,
    prometheus_enabled: bool,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    mqtt_egress_enabled: bool,
    mqtt_egress_dispatch_topic: String,
    mqtt_egress_metrics_topic: String,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        // Defaults are valid by construction
        match Self::from_toml(TomlConfig::default(), "default") {
            Ok(config) => config,
            Err(e) => unreachable!("default config invalid: {e}"),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str, source: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)
            .with_context(|| format!("Failed to parse config file {source}"))?;

        Self::from_toml(toml_config, source)
            .with_context(|| format!("Invalid configuration in {source}"))
    }

    /// Load configuration - a missing file runs with defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        match fs::metadata(path) {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(config_file = %path.display(), "config_file_missing_using_defaults");
                Ok(Self::default())
            }
            _ => Self::from_file(path),
        }
    }

    fn from_toml(toml_config: TomlConfig, source: &str) -> Result<Self, ConfigError> {
        let gates = GateSet::new(&toml_config.gates.ids)?;

        let scoring = &toml_config.scoring;
        let weights = ScoreWeights::new(
            scoring.proximity_weight,
            scoring.heading_weight,
            scoring.dwell_weight,
        )?;

        let dispatch = &toml_config.dispatch;
        let engine = EngineConfig {
            confidence_threshold: dispatch.confidence_threshold,
            min_spacing_ms: dispatch.min_spacing_ms,
            max_spacing_ms: dispatch.max_spacing_ms,
            signal_loss_ms: dispatch.signal_loss_ms,
            in_transit_after_ms: dispatch.in_transit_after_ms,
        };
        engine.validate()?;

        // The commit rule compares the two newest samples
        if toml_config.history.capacity < 2 {
            return Err(ConfigError::HistoryTooSmall(toml_config.history.capacity));
        }

        if let Some(fallback) = toml_config.fusion.fallback {
            if !fallback.is_finite() {
                return Err(ConfigError::InvalidWeight { name: "fusion.fallback", value: fallback });
            }
        }

        Ok(Self {
            site_id: toml_config.site.id,
            gates,
            weights,
            engine,
            history_capacity: toml_config.history.capacity,
            fusion_mode: toml_config.fusion.mode,
            fusion_fallback: toml_config.fusion.fallback,
            http_port: toml_config.http.port,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_enabled: toml_config.metrics.prometheus_enabled,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            mqtt_egress_enabled: toml_config.mqtt_egress.enabled,
            mqtt_egress_dispatch_topic: toml_config.mqtt_egress.dispatch_topic,
            mqtt_egress_metrics_topic: toml_config.mqtt_egress.metrics_topic,
            config_file: source.to_string(),
        })
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn gates(&self) -> &GateSet {
        &self.gates
    }

    pub fn weights(&self) -> ScoreWeights {
        self.weights
    }

    pub fn engine(&self) -> EngineConfig {
        self.engine
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity
    }

    pub fn fusion_mode(&self) -> FusionMode {
        self.fusion_mode
    }

    pub fn fusion_fallback(&self) -> Option<f64> {
        self.fusion_fallback
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_enabled(&self) -> bool {
        self.prometheus_enabled
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    // MQTT Egress getters
    pub fn mqtt_egress_enabled(&self) -> bool {
        self.mqtt_egress_enabled
    }

    pub fn mqtt_egress_dispatch_topic(&self) -> &str {
        &self.mqtt_egress_dispatch_topic
    }

    pub fn mqtt_egress_metrics_topic(&self) -> &str {
        &self.mqtt_egress_metrics_topic
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "valet");
        assert_eq!(config.gates().len(), 4);
        assert_eq!(config.weights(), ScoreWeights::default());
        assert_eq!(config.engine(), EngineConfig::default());
        assert_eq!(config.history_capacity(), 10);
        assert_eq!(config.fusion_mode(), FusionMode::Simulated);
        assert_eq!(config.http_port(), 4000);
        assert!(config.prometheus_enabled());
        assert!(!config.mqtt_egress_enabled());
        assert_eq!(config.config_file(), "default");
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::from_toml_str("", "inline").unwrap();
        assert_eq!(config.gates(), &GateSet::default());
        assert_eq!(config.mqtt_egress_dispatch_topic(), "valet/dispatch");
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml_str(
            r#"
[dispatch]
confidence_threshold = 85
in_transit_after_ms = 60000

[fusion]
mode = "direct"
fallback = 0.0
"#,
            "inline",
        )
        .unwrap();

        let engine = config.engine();
        assert_eq!(engine.confidence_threshold, 85);
        assert_eq!(engine.min_spacing_ms, 5_000);
        assert_eq!(engine.in_transit_after_ms, Some(60_000));
        assert_eq!(config.fusion_mode(), FusionMode::Direct);
        assert_eq!(config.fusion_fallback(), Some(0.0));
    }

    #[test]
    fn test_empty_gate_set_is_fatal() {
        let err = Config::from_toml_str("[gates]\nids = []\n", "inline").unwrap_err();
        let root = err.root_cause().to_string();
        assert!(root.contains("at least one gate"), "{root}");
    }

    #[test]
    fn test_duplicate_gate_is_fatal() {
        assert!(Config::from_toml_str("[gates]\nids = [\"A\", \"A\"]\n", "inline").is_err());
    }

    #[test]
    fn test_bad_spacing_is_fatal() {
        let toml = "[dispatch]\nmin_spacing_ms = 20000\nmax_spacing_ms = 10000\n";
        assert!(Config::from_toml_str(toml, "inline").is_err());
    }

    #[test]
    fn test_tiny_history_is_fatal() {
        assert!(Config::from_toml_str("[history]\ncapacity = 1\n", "inline").is_err());
    }

    #[test]
    fn test_unparsable_is_error() {
        assert!(Config::from_toml_str("[gates\nids = 3", "inline").is_err());
    }
}
