//! Configuration loading from TOML files

use crate::domain::types::{DriverId, GeofenceZone, StudentId, ZoneId};
use anyhow::Context;
use serde::Deserialize;
use smallvec::smallvec;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    /// Unique bus identifier (e.g., "bus-01")
    #[serde(default = "default_bus_id")]
    pub id: String,
    pub driver_id: i64,
}

fn default_bus_id() -> String {
    "bus-01".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicsConfig {
    /// Event-table change feed (QoS 1)
    #[serde(default = "default_changes_topic")]
    pub changes: String,
    /// Driver action intake (QoS 0)
    #[serde(default = "default_actions_topic")]
    pub actions: String,
    /// Derived status snapshots for list-view UIs (QoS 0)
    #[serde(default = "default_status_topic")]
    pub status: String,
    /// Periodic metrics snapshots (QoS 0)
    #[serde(default = "default_metrics_topic")]
    pub metrics: String,
}

fn default_changes_topic() -> String {
    "fleet/changes".to_string()
}

fn default_actions_topic() -> String {
    "fleet/actions".to_string()
}

fn default_status_topic() -> String {
    "fleet/status".to_string()
}

fn default_metrics_topic() -> String {
    "fleet/metrics".to_string()
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            changes: default_changes_topic(),
            actions: default_actions_topic(),
            status: default_status_topic(),
            metrics: default_metrics_topic(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    /// Messaging push endpoint (POST, one call per recipient)
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_push_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_push_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeofenceConfig {
    #[serde(default = "default_radius_km")]
    pub default_radius_km: f64,
    /// Stand-in for real ETA when estimating arrival minutes
    #[serde(default = "default_speed_kmh")]
    pub average_speed_kmh: f64,
    /// Fixed location-ping interval
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// GPS position endpoint polled by the location monitor (empty disables)
    #[serde(default)]
    pub position_url: String,
}

fn default_radius_km() -> f64 {
    0.5
}

fn default_speed_kmh() -> f64 {
    30.0
}

fn default_ping_interval_secs() -> u64 {
    15
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            default_radius_km: default_radius_km(),
            average_speed_kmh: default_speed_kmh(),
            ping_interval_secs: default_ping_interval_secs(),
            position_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RosterConfig {
    #[serde(default = "default_roster_file")]
    pub file: String,
}

fn default_roster_file() -> String {
    "config/roster.json".to_string()
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self { file: default_roster_file() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhaseConfig {
    /// JSON state file for the persisted trip phase (empty disables persistence)
    #[serde(default = "default_phase_state_file")]
    pub state_file: String,
}

fn default_phase_state_file() -> String {
    "state/trip_phase.json".to_string()
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self { state_file: default_phase_state_file() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DayLogConfig {
    /// File path for completed-day summaries (JSONL format)
    #[serde(default = "default_daylog_file")]
    pub file: String,
}

fn default_daylog_file() -> String {
    "attendance_days.jsonl".to_string()
}

impl Default for DayLogConfig {
    fn default() -> Self {
        Self { file: default_daylog_file() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

fn default_metrics_interval() -> u64 {
    10
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { bind_address: default_broker_bind_address(), port: default_broker_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    pub bus: BusConfig,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub topics: TopicsConfig,
    pub push: PushConfig,
    #[serde(default)]
    pub geofence: GeofenceConfig,
    #[serde(default)]
    pub roster: RosterConfig,
    #[serde(default)]
    pub phase: PhaseConfig,
    #[serde(default)]
    pub daylog: DayLogConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub zones: Vec<GeofenceZone>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    bus_id: String,
    driver_id: DriverId,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    changes_topic: String,
    actions_topic: String,
    status_topic: String,
    metrics_topic: String,
    push_url: String,
    push_token: Option<String>,
    push_timeout_ms: u64,
    default_radius_km: f64,
    average_speed_kmh: f64,
    ping_interval_secs: u64,
    position_url: String,
    roster_file: String,
    phase_state_file: String,
    daylog_file: String,
    metrics_interval_secs: u64,
    broker_bind_address: String,
    broker_port: u16,
    zones: Vec<GeofenceZone>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bus_id: "bus-01".to_string(),
            driver_id: DriverId(1),
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_username: None,
            mqtt_password: None,
            changes_topic: default_changes_topic(),
            actions_topic: default_actions_topic(),
            status_topic: default_status_topic(),
            metrics_topic: default_metrics_topic(),
            push_url: "http://localhost:9080/push".to_string(),
            push_token: None,
            push_timeout_ms: 2000,
            default_radius_km: 0.5,
            average_speed_kmh: 30.0,
            ping_interval_secs: 15,
            position_url: String::new(),
            roster_file: default_roster_file(),
            phase_state_file: default_phase_state_file(),
            daylog_file: default_daylog_file(),
            metrics_interval_secs: 10,
            broker_bind_address: "0.0.0.0".to_string(),
            broker_port: 1883,
            zones: Self::default_zones(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    fn default_zones() -> Vec<GeofenceZone> {
        vec![
            GeofenceZone {
                id: ZoneId(101),
                name: "STOP_1".to_string(),
                lat: 10.762622,
                lon: 106.660172,
                radius_km: None,
                students: smallvec![StudentId(1), StudentId(2)],
            },
            GeofenceZone {
                id: ZoneId(102),
                name: "STOP_2".to_string(),
                lat: 10.776889,
                lon: 106.700806,
                radius_km: None,
                students: smallvec![StudentId(3)],
            },
        ]
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self {
            bus_id: toml_config.bus.id,
            driver_id: DriverId(toml_config.bus.driver_id),
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            changes_topic: toml_config.topics.changes,
            actions_topic: toml_config.topics.actions,
            status_topic: toml_config.topics.status,
            metrics_topic: toml_config.topics.metrics,
            push_url: toml_config.push.url,
            push_token: toml_config.push.token,
            push_timeout_ms: toml_config.push.timeout_ms,
            default_radius_km: toml_config.geofence.default_radius_km,
            average_speed_kmh: toml_config.geofence.average_speed_kmh,
            ping_interval_secs: toml_config.geofence.ping_interval_secs,
            position_url: toml_config.geofence.position_url,
            roster_file: toml_config.roster.file,
            phase_state_file: toml_config.phase.state_file,
            daylog_file: toml_config.daylog.file,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
            zones: toml_config.zones,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration from a path - falls back to defaults on failure
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn bus_id(&self) -> &str {
        &self.bus_id
    }

    pub fn driver_id(&self) -> DriverId {
        self.driver_id
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

    pub fn changes_topic(&self) -> &str {
        &self.changes_topic
    }

    pub fn actions_topic(&self) -> &str {
        &self.actions_topic
    }

    pub fn status_topic(&self) -> &str {
        &self.status_topic
    }

    pub fn metrics_topic(&self) -> &str {
        &self.metrics_topic
    }

    pub fn push_url(&self) -> &str {
        &self.push_url
    }

    pub fn push_token(&self) -> Option<&str> {
        self.push_token.as_deref()
    }

    pub fn push_timeout_ms(&self) -> u64 {
        self.push_timeout_ms
    }

    pub fn default_radius_km(&self) -> f64 {
        self.default_radius_km
    }

    pub fn average_speed_kmh(&self) -> f64 {
        self.average_speed_kmh
    }

    pub fn ping_interval_secs(&self) -> u64 {
        self.ping_interval_secs
    }

    pub fn position_url(&self) -> &str {
        &self.position_url
    }

    pub fn roster_file(&self) -> &str {
        &self.roster_file
    }

    pub fn phase_state_file(&self) -> &str {
        &self.phase_state_file
    }

    pub fn daylog_file(&self) -> &str {
        &self.daylog_file
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker_bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn zones(&self) -> &[GeofenceZone] {
        &self.zones
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the driver id
    #[cfg(test)]
    pub fn with_driver_id(mut self, id: i64) -> Self {
        self.driver_id = DriverId(id);
        self
    }

    /// Builder method for tests to replace the zone list
    #[cfg(test)]
    pub fn with_zones(mut self, zones: Vec<GeofenceZone>) -> Self {
        self.zones = zones;
        self
    }

    /// Builder method for tests to set the default trigger radius
    #[cfg(test)]
    pub fn with_default_radius_km(mut self, km: f64) -> Self {
        self.default_radius_km = km;
        self
    }

    /// Builder method for tests to disable phase persistence
    #[cfg(test)]
    pub fn without_phase_state_file(mut self) -> Self {
        self.phase_state_file = String::new();
        self
    }

    /// Builder method for tests to redirect or disable the day log
    #[cfg(test)]
    pub fn with_daylog_file(mut self, file: &str) -> Self {
        self.daylog_file = file.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bus_id(), "bus-01");
        assert_eq!(config.driver_id(), DriverId(1));
        assert_eq!(config.mqtt_host(), "localhost");
        assert_eq!(config.mqtt_port(), 1883);
        assert_eq!(config.changes_topic(), "fleet/changes");
        assert_eq!(config.default_radius_km(), 0.5);
        assert_eq!(config.average_speed_kmh(), 30.0);
        assert_eq!(config.ping_interval_secs(), 15);
        assert_eq!(config.zones().len(), 2);
    }

    #[test]
    fn test_topics_default_to_fleet_names() {
        // A config without a [topics] section must still get usable topics
        let topics = TopicsConfig::default();
        assert_eq!(topics.changes, "fleet/changes");
        assert_eq!(topics.actions, "fleet/actions");
        assert_eq!(topics.status, "fleet/status");
        assert_eq!(topics.metrics, "fleet/metrics");
    }

    #[test]
    fn test_daylog_file_default() {
        let daylog = DayLogConfig::default();
        assert_eq!(daylog.file, "attendance_days.jsonl");
        assert!(!daylog.file.is_empty());

        let config = Config::default();
        assert_eq!(config.daylog_file(), "attendance_days.jsonl");
    }
}
