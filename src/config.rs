//! Configuration for the Stampede Shield engine.
//!
//! Every threshold the engine uses lives here as a named, tunable value.
//! [`Config::validate`] enforces the startup invariants; a configuration
//! that fails validation must not be run.

use crate::core::alert::AlertLevel;
use crate::core::zones::ZoneId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tolerance used when checking that the CPI weights sum to 1.00.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Main configuration for the engine process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Fusion and scoring parameters
    pub engine: EngineConfig,

    /// Ingress/egress sockets
    pub network: NetworkConfig,

    /// Outbound webhook notifications
    pub notify: NotifyConfig,

    /// Path for exported snapshots and persisted statistics
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stampede-shield");

        Self {
            engine: EngineConfig::default(),
            network: NetworkConfig::default(),
            notify: NotifyConfig::default(),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit path, falling back to defaults
    /// when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the given path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stampede-shield")
            .join("config.json")
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Check every startup invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;

        if self.network.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "network.queue_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parameters of the fusion and scoring engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cadence of the periodic tick
    #[serde(with = "duration_ms")]
    pub tick_interval: Duration,

    /// Zone to node bindings
    pub zones: Vec<ZoneConfig>,

    pub window: WindowConfig,
    pub detection: DetectionThresholds,
    pub audio: AudioConfig,
    pub composite: CompositeConfig,
    pub alert: AlertConfig,
    pub health: HealthConfig,

    /// Maximum number of ranked recommendations per snapshot
    pub max_actions: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(500),
            zones: vec![
                ZoneConfig::new(ZoneId::Entry, &["NODE_A"]),
                ZoneConfig::new(ZoneId::Center, &["NODE_C"]),
                ZoneConfig::new(ZoneId::Exit, &["NODE_B"]),
            ],
            window: WindowConfig::default(),
            detection: DetectionThresholds::default(),
            audio: AudioConfig::default(),
            composite: CompositeConfig::default(),
            alert: AlertConfig::default(),
            health: HealthConfig::default(),
            max_actions: 5,
        }
    }
}

impl EngineConfig {
    /// Validate the engine invariants. Fails fast on the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "tick_interval must be greater than zero".to_string(),
            ));
        }

        if self.zones.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one zone must be configured".to_string(),
            ));
        }

        let mut seen_zones = HashSet::new();
        let mut seen_nodes = HashSet::new();
        for zone in &self.zones {
            if !seen_zones.insert(zone.id) {
                return Err(ConfigError::Invalid(format!(
                    "zone {} is configured more than once",
                    zone.id
                )));
            }
            if zone.nodes.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "zone {} is mapped to zero nodes",
                    zone.id
                )));
            }
            for node in &zone.nodes {
                if node.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "zone {} has an empty node id",
                        zone.id
                    )));
                }
                if !seen_nodes.insert(node.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "node {node} is bound to more than one zone"
                    )));
                }
            }
        }

        if let Some(ref mic) = self.audio.microphone_node {
            if !seen_nodes.contains(mic.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "microphone node {mic} is not bound to any zone"
                )));
            }
        }

        self.window.validate()?;
        self.detection.validate()?;
        self.audio.validate()?;
        self.composite.validate()?;
        self.alert.validate()?;

        if self.health.heartbeat_interval.is_zero() || self.health.timeout_multiplier == 0 {
            return Err(ConfigError::Invalid(
                "health.heartbeat_interval and health.timeout_multiplier must be non-zero"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Age after which a reused distance value counts as stale.
    pub fn stale_after(&self) -> chrono::Duration {
        let cycles = self.window.stale_after_cycles.max(1);
        chrono::Duration::from_std(self.tick_interval * cycles)
            .unwrap_or_else(|_| chrono::Duration::seconds(1))
    }
}

/// A zone and the node ids that feed it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub id: ZoneId,
    pub nodes: Vec<String>,
}

impl ZoneConfig {
    pub fn new(id: ZoneId, nodes: &[&str]) -> Self {
        Self {
            id,
            nodes: nodes.iter().map(|n| n.to_string()).collect(),
        }
    }
}

/// Per-zone sliding window parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Number of samples retained per zone
    pub size: usize,
    /// Minimum samples before a zone is classified
    pub min_samples: usize,
    /// Distance reported by an empty corridor (cm)
    pub max_expected_distance_cm: f64,
    /// Readings beyond this range are treated as a failed echo (cm)
    pub sensor_max_range_cm: f64,
    /// Missed tick cycles after which a reused distance is stale
    pub stale_after_cycles: u32,
    /// How far ahead of receipt a reading timestamp may be
    #[serde(with = "duration_ms")]
    pub max_clock_skew: Duration,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            size: 20,
            min_samples: 10,
            max_expected_distance_cm: 400.0,
            sensor_max_range_cm: 400.0,
            stale_after_cycles: 2,
            max_clock_skew: Duration::from_secs(2),
        }
    }
}

impl WindowConfig {
    pub fn max_clock_skew(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.max_clock_skew)
            .unwrap_or_else(|_| chrono::Duration::seconds(2))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_samples == 0 || self.size < self.min_samples {
            return Err(ConfigError::Invalid(format!(
                "window.size ({}) must be >= window.min_samples ({}) >= 1",
                self.size, self.min_samples
            )));
        }
        if self.max_expected_distance_cm <= 0.0 || self.sensor_max_range_cm <= 0.0 {
            return Err(ConfigError::Invalid(
                "window distances must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Thresholds for the detection classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionThresholds {
    /// Distance variance (cm²) below which a zone reading is "stable"
    pub stability_variance: f64,
    /// Below this mean distance a stable, idle reading is a wall (cm)
    pub wall_cm: f64,
    /// Below this mean distance a stable, idle reading is a static object (cm)
    pub near_cm: f64,
    /// Beyond this mean distance an idle zone is clear (cm)
    pub far_cm: f64,
    /// Motion fraction at or below which a zone counts as idle
    pub idle_motion_fraction: f64,
    /// Motion fraction band of a single person
    pub single_motion_min: f64,
    pub single_motion_max: f64,
    /// Motion fraction above which a zone is a crowd regardless of variance
    pub crowd_motion_fraction: f64,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            stability_variance: 25.0,
            wall_cm: 15.0,
            near_cm: 30.0,
            far_cm: 150.0,
            idle_motion_fraction: 0.05,
            single_motion_min: 0.1,
            single_motion_max: 0.4,
            crowd_motion_fraction: 0.6,
        }
    }
}

impl DetectionThresholds {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0 < self.wall_cm && self.wall_cm < self.near_cm && self.near_cm < self.far_cm) {
            return Err(ConfigError::Invalid(format!(
                "detection distances must satisfy 0 < wall_cm ({}) < near_cm ({}) < far_cm ({})",
                self.wall_cm, self.near_cm, self.far_cm
            )));
        }
        if self.single_motion_min > self.single_motion_max {
            return Err(ConfigError::Invalid(format!(
                "detection.single_motion_min ({}) must not exceed single_motion_max ({})",
                self.single_motion_min, self.single_motion_max
            )));
        }
        let fractions = [
            self.idle_motion_fraction,
            self.single_motion_min,
            self.single_motion_max,
            self.crowd_motion_fraction,
        ];
        if fractions.iter().any(|f| !(0.0..=1.0).contains(f))
            || self.idle_motion_fraction >= self.crowd_motion_fraction
        {
            return Err(ConfigError::Invalid(
                "detection motion fractions must lie in [0, 1] with idle below crowd".to_string(),
            ));
        }
        if self.stability_variance < 0.0 {
            return Err(ConfigError::Invalid(
                "detection.stability_variance must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Audio scoring and calibration parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Node carrying the microphone, if any
    pub microphone_node: Option<String>,
    /// Raw RMS that maps to a score of 100
    pub max_expected_rms: f64,
    /// Baseline used until the first calibration completes
    pub default_baseline: f64,
    /// Audio samples averaged for the automatic startup calibration
    pub startup_samples: usize,
    /// Capacity of the raw audio sample buffer used for calibration
    pub calibration_buffer: usize,
    /// Maximum age of samples used by an explicit calibration
    #[serde(with = "duration_ms")]
    pub calibration_window: Duration,
    /// Score bands for the qualitative audio state
    pub quiet_below: f64,
    pub loud_from: f64,
    pub scream_from: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            microphone_node: Some("NODE_C".to_string()),
            max_expected_rms: 1000.0,
            default_baseline: 0.0,
            startup_samples: 20,
            calibration_buffer: 40,
            calibration_window: Duration::from_secs(10),
            quiet_below: 10.0,
            loud_from: 40.0,
            scream_from: 70.0,
        }
    }
}

impl AudioConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_expected_rms <= self.default_baseline {
            return Err(ConfigError::Invalid(
                "audio.max_expected_rms must exceed audio.default_baseline".to_string(),
            ));
        }
        if !(self.quiet_below < self.loud_from && self.loud_from < self.scream_from) {
            return Err(ConfigError::Invalid(
                "audio state bands must be ascending".to_string(),
            ));
        }
        if self.calibration_buffer == 0 {
            return Err(ConfigError::Invalid(
                "audio.calibration_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fixed weights of the composite risk score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpiWeights {
    pub movement: f64,
    pub audio: f64,
    pub trend: f64,
    pub density: f64,
}

impl Default for CpiWeights {
    fn default() -> Self {
        Self {
            movement: 0.56,
            audio: 0.35,
            trend: 0.06,
            density: 0.03,
        }
    }
}

impl CpiWeights {
    pub fn sum(&self) -> f64 {
        self.movement + self.audio + self.trend + self.density
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let all = [self.movement, self.audio, self.trend, self.density];
        if all.iter().any(|w| !w.is_finite() || *w <= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "CPI weights must all be positive: {self:?}"
            )));
        }
        if (self.sum() - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::Invalid(format!(
                "CPI weights must sum to 1.00, got {:.6}",
                self.sum()
            )));
        }
        Ok(())
    }
}

/// Composite scorer parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeConfig {
    pub weights: CpiWeights,
    /// Fraction a component loses on each tick without a new reading
    pub decay_rate: f64,
    /// Number of CPI samples in the trend regression
    pub trend_lookback: usize,
    /// Trend points per (CPI point per tick) of slope
    pub trend_scale: f64,
    /// Number of CPI snapshots retained
    pub history_capacity: usize,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            weights: CpiWeights::default(),
            decay_rate: 0.10,
            trend_lookback: 10,
            trend_scale: 20.0,
            history_capacity: 240,
        }
    }
}

impl CompositeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.weights.validate()?;
        if !(0.0..1.0).contains(&self.decay_rate) {
            return Err(ConfigError::Invalid(
                "composite.decay_rate must be in [0, 1)".to_string(),
            ));
        }
        if self.trend_lookback < 2 || self.history_capacity < self.trend_lookback {
            return Err(ConfigError::Invalid(
                "composite.trend_lookback must be >= 2 and fit in history_capacity".to_string(),
            ));
        }
        Ok(())
    }
}

/// Lower bounds of the LOW, MODERATE, HIGH and CRITICAL bands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBands {
    pub low: f64,
    pub moderate: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for ScoreBands {
    fn default() -> Self {
        Self {
            low: 25.0,
            moderate: 45.0,
            high: 65.0,
            critical: 85.0,
        }
    }
}

/// Alert state machine parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub bands: ScoreBands,
    /// Consecutive ticks a higher target must hold before the level rises
    pub dwell_ticks: u32,
    /// Movement needed to enter CRITICAL when the audio component is zero
    pub critical_movement_floor: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            bands: ScoreBands::default(),
            dwell_ticks: 2,
            critical_movement_floor: 30.0,
        }
    }
}

impl AlertConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.bands;
        let ascending = 0.0 < b.low && b.low < b.moderate && b.moderate < b.high
            && b.high < b.critical
            && b.critical <= 100.0;
        if !ascending {
            return Err(ConfigError::Invalid(format!(
                "alert bands must be ascending within (0, 100]: {b:?}"
            )));
        }
        if self.dwell_ticks == 0 {
            return Err(ConfigError::Invalid(
                "alert.dwell_ticks must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Node liveness parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Expected heartbeat cadence
    #[serde(with = "duration_ms")]
    pub heartbeat_interval: Duration,
    /// Missed intervals before a node is marked offline
    pub timeout_multiplier: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            timeout_multiplier: 3,
        }
    }
}

impl HealthConfig {
    pub fn timeout(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.heartbeat_interval * self.timeout_multiplier)
            .unwrap_or_else(|_| chrono::Duration::seconds(30))
    }
}

/// Socket configuration for ingress and egress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// UDP bind address for node readings and heartbeats
    pub udp_bind: String,
    /// HTTP bind address for the dashboard API
    pub http_bind: String,
    /// Destination of alert-level commands to the nodes (usually broadcast)
    pub firmware_command_addr: Option<String>,
    /// Ticks between re-sends of the current alert level
    pub rebroadcast_ticks: u64,
    /// Capacity of the engine command queue
    pub queue_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            udp_bind: "0.0.0.0:4444".to_string(),
            http_bind: "127.0.0.1:8000".to_string(),
            firmware_command_addr: Some("255.255.255.255:5006".to_string()),
            rebroadcast_ticks: 10,
            queue_capacity: 4096,
        }
    }
}

/// Webhook notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Webhook URL; notifications are disabled when unset
    pub url: Option<String>,
    /// Optional bearer token
    pub token: Option<String>,
    /// Lowest level that triggers a notification
    pub min_level: AlertLevel,
    /// Minimum gap between two notifications for the same level
    #[serde(with = "duration_ms")]
    pub cooldown: Duration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            min_level: AlertLevel::High,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    /// A startup invariant is violated; the engine refuses to run.
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.tick_interval, Duration::from_millis(500));
        assert_eq!(config.engine.window.size, 20);
        assert_eq!(config.engine.alert.dwell_ticks, 2);
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        let weights = CpiWeights::default();
        assert!((weights.sum() - 1.0).abs() < WEIGHT_SUM_TOLERANCE);
        assert!(weights.validate().is_ok());
    }

    #[test]
    fn test_weights_not_summing_to_one_rejected() {
        let mut config = EngineConfig::default();
        config.composite.weights.movement = 0.60;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zone_without_nodes_rejected() {
        let mut config = EngineConfig::default();
        config.zones[1].nodes.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("zero nodes"));
    }

    #[test]
    fn test_node_bound_twice_rejected() {
        let mut config = EngineConfig::default();
        config.zones[2].nodes.push("NODE_A".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unbound_microphone_rejected() {
        let mut config = EngineConfig::default();
        config.audio.microphone_node = Some("NODE_Z".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_detection_thresholds_out_of_order_rejected() {
        let mut config = EngineConfig::default();
        config.detection.near_cm = 10.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("wall_cm"));

        let mut config = EngineConfig::default();
        config.detection.single_motion_min = 0.5;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.detection.idle_motion_fraction = 0.7;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "engine": { "tick_interval": 250, "max_actions": 3 } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.engine.tick_interval, Duration::from_millis(250));
        assert_eq!(config.engine.max_actions, 3);
        assert_eq!(config.engine.zones.len(), 3);
        assert_eq!(config.network.queue_capacity, 4096);
    }

    #[test]
    fn test_health_timeout_is_three_intervals() {
        let health = HealthConfig::default();
        assert_eq!(health.timeout(), chrono::Duration::seconds(30));
    }
}
