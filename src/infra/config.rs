//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::types::{
    FixPriority, FixRequestPolicy, GeographicPoint, ZoneId, DEFAULT_RADIUS_M, FIXED_ZONE_ID,
};
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneConfig {
    #[serde(default = "default_zone_id")]
    pub id: String,
    #[serde(default = "default_radius_m")]
    pub radius_m: f32,
}

fn default_zone_id() -> String {
    FIXED_ZONE_ID.to_string()
}

fn default_radius_m() -> f32 {
    DEFAULT_RADIUS_M
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self { id: default_zone_id(), radius_m: default_radius_m() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_priority")]
    pub priority: FixPriority,
    #[serde(default = "default_wait_for_accurate")]
    pub wait_for_accurate: bool,
    /// Age after which an outstanding fix request yields to a new exit signal
    #[serde(default = "default_supersede_after_ms")]
    pub supersede_after_ms: u64,
}

fn default_interval_ms() -> u64 {
    15_000
}

fn default_min_interval_ms() -> u64 {
    5_000
}

fn default_priority() -> FixPriority {
    FixPriority::HighAccuracy
}

fn default_wait_for_accurate() -> bool {
    true
}

fn default_supersede_after_ms() -> u64 {
    30_000 // two update intervals
}

impl Default for FixConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            min_interval_ms: default_min_interval_ms(),
            priority: default_priority(),
            wait_for_accurate: default_wait_for_accurate(),
            supersede_after_ms: default_supersede_after_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_notification_title")]
    pub title: String,
    #[serde(default = "default_notification_icon")]
    pub icon: String,
}

fn default_notification_title() -> String {
    "Location Updater".to_string()
}

fn default_notification_icon() -> String {
    "ic_person_pin_circle".to_string()
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { title: default_notification_title(), icon: default_notification_icon() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default)]
    pub prometheus_port: u16,
}

fn default_metrics_interval_secs() -> u64 {
    60
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs(), prometheus_port: 0 }
    }
}

/// Simulated subject and platform behaviour for the binary
#[derive(Debug, Clone, Deserialize)]
pub struct SimConfig {
    #[serde(default = "default_start_latitude")]
    pub start_latitude: f64,
    #[serde(default = "default_start_longitude")]
    pub start_longitude: f64,
    /// Meters moved per step
    #[serde(default = "default_step_m")]
    pub step_m: f64,
    /// Compass heading in degrees (0 = north)
    #[serde(default = "default_heading_deg")]
    pub heading_deg: f64,
    /// Heading change applied per step
    #[serde(default)]
    pub turn_deg: f64,
    #[serde(default = "default_step_interval_ms")]
    pub step_interval_ms: u64,
    /// Delay before a requested fix is delivered
    #[serde(default = "default_fix_delay_ms")]
    pub fix_delay_ms: u64,
    #[serde(default = "default_true")]
    pub permission_granted: bool,
    #[serde(default = "default_true")]
    pub location_enabled: bool,
}

fn default_start_latitude() -> f64 {
    -23.5505
}

fn default_start_longitude() -> f64 {
    -46.6333
}

fn default_step_m() -> f64 {
    25.0
}

fn default_heading_deg() -> f64 {
    45.0
}

fn default_step_interval_ms() -> u64 {
    1_000
}

fn default_fix_delay_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            start_latitude: default_start_latitude(),
            start_longitude: default_start_longitude(),
            step_m: default_step_m(),
            heading_deg: default_heading_deg(),
            turn_deg: 0.0,
            step_interval_ms: default_step_interval_ms(),
            fix_delay_ms: default_fix_delay_ms(),
            permission_granted: true,
            location_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub zone: ZoneConfig,
    #[serde(default)]
    pub fix: FixConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub sim: SimConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    zone_id: String,
    radius_m: f32,
    fix_interval_ms: u64,
    fix_min_interval_ms: u64,
    fix_priority: FixPriority,
    wait_for_accurate: bool,
    supersede_after_ms: u64,
    notification_title: String,
    notification_icon: String,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    sim: SimConfig,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            zone_id: toml_config.zone.id,
            radius_m: toml_config.zone.radius_m,
            fix_interval_ms: toml_config.fix.interval_ms,
            fix_min_interval_ms: toml_config.fix.min_interval_ms,
            fix_priority: toml_config.fix.priority,
            wait_for_accurate: toml_config.fix.wait_for_accurate,
            supersede_after_ms: toml_config.fix.supersede_after_ms,
            notification_title: toml_config.notification.title,
            notification_icon: toml_config.notification.icon,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            sim: toml_config.sim,
            config_file,
        }
    }

    /// Determine config file path: `--config` value, then CONFIG_FILE, then the default
    pub fn resolve_config_path(cli_path: Option<&str>) -> String {
        if let Some(path) = cli_path {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        if toml_config.zone.radius_m <= 0.0 {
            anyhow::bail!(
                "Invalid zone radius {} in {}: must be positive",
                toml_config.zone.radius_m,
                path.display()
            );
        }

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration from a path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(cli_path: Option<&str>) -> Self {
        Self::load_from_path(&Self::resolve_config_path(cli_path))
    }

    pub fn zone_id(&self) -> ZoneId {
        ZoneId(self.zone_id.clone())
    }

    pub fn radius_m(&self) -> f32 {
        self.radius_m
    }

    pub fn fix_policy(&self) -> FixRequestPolicy {
        FixRequestPolicy {
            interval: Duration::from_millis(self.fix_interval_ms),
            min_interval: Duration::from_millis(self.fix_min_interval_ms),
            priority: self.fix_priority,
            wait_for_accurate: self.wait_for_accurate,
        }
    }

    pub fn supersede_after(&self) -> Duration {
        Duration::from_millis(self.supersede_after_ms)
    }

    pub fn notification_title(&self) -> &str {
        &self.notification_title
    }

    pub fn notification_icon(&self) -> &str {
        &self.notification_icon
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn sim(&self) -> &SimConfig {
        &self.sim
    }

    pub fn sim_start(&self) -> GeographicPoint {
        GeographicPoint::new(self.sim.start_latitude, self.sim.start_longitude)
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method to override how long a fix request may stall
    /// before a new exit signal abandons it
    pub fn with_supersede_after_ms(mut self, ms: u64) -> Self {
        self.supersede_after_ms = ms;
        self
    }

    pub fn with_radius_m(mut self, radius_m: f32) -> Self {
        self.radius_m = radius_m;
        self
    }
}
