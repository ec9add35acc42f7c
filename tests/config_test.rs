//! Integration tests for configuration loading

use geofence_tracker::domain::types::{FixPriority, ZoneId, DEFAULT_RADIUS_M};
use geofence_tracker::infra::Config;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[test]
fn test_load_config_from_file() {
    let temp_file = write_config(
        r#"
[zone]
id = "home"
radius_m = 250.0

[fix]
interval_ms = 10000
min_interval_ms = 2000
priority = "balanced"
wait_for_accurate = false
supersede_after_ms = 45000

[notification]
title = "Tracking"
icon = "ic_pin"

[metrics]
interval_secs = 15
prometheus_port = 9091

[sim]
start_latitude = 51.5
start_longitude = -0.12
step_m = 10.0
"#,
    );

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.zone_id(), ZoneId::from("home"));
    assert_eq!(config.radius_m(), 250.0);

    let policy = config.fix_policy();
    assert_eq!(policy.interval, Duration::from_secs(10));
    assert_eq!(policy.min_interval, Duration::from_secs(2));
    assert_eq!(policy.priority, FixPriority::Balanced);
    assert!(!policy.wait_for_accurate);
    assert_eq!(config.supersede_after(), Duration::from_secs(45));

    assert_eq!(config.notification_title(), "Tracking");
    assert_eq!(config.notification_icon(), "ic_pin");
    assert_eq!(config.metrics_interval_secs(), 15);
    assert_eq!(config.prometheus_port(), 9091);

    assert_eq!(config.sim_start().latitude, 51.5);
    assert_eq!(config.sim().step_m, 10.0);
    // Unset sim keys keep their defaults
    assert_eq!(config.sim().step_interval_ms, 1000);
}

#[test]
fn test_partial_config_uses_defaults() {
    let temp_file = write_config(
        r#"
[metrics]
prometheus_port = 9100
"#,
    );

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.zone_id(), ZoneId::fixed());
    assert_eq!(config.radius_m(), DEFAULT_RADIUS_M);
    assert_eq!(config.fix_policy().priority, FixPriority::HighAccuracy);
    assert_eq!(config.supersede_after(), Duration::from_secs(30));
    assert_eq!(config.notification_title(), "Location Updater");
    assert_eq!(config.prometheus_port(), 9100);
}

#[test]
fn test_non_positive_radius_rejected() {
    let temp_file = write_config(
        r#"
[zone]
radius_m = 0.0
"#,
    );

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("radius"));
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.zone_id(), ZoneId::fixed());
    assert_eq!(config.radius_m(), DEFAULT_RADIUS_M);
    assert_eq!(config.prometheus_port(), 0);
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_config_file_env_used_without_cli_path() {
    let temp_file = write_config(
        r#"
[zone]
radius_m = 90.0
"#,
    );
    let path = temp_file.path().display().to_string();

    // Only test in this binary that touches CONFIG_FILE
    std::env::set_var("CONFIG_FILE", &path);
    assert_eq!(Config::resolve_config_path(None), path);
    assert_eq!(Config::load(None).radius_m(), 90.0);
    assert_eq!(Config::resolve_config_path(Some("config/dev.toml")), "config/dev.toml");
    std::env::remove_var("CONFIG_FILE");
}
