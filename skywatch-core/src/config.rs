//! Configuration file management for skywatch.
//!
//! Reads/writes `~/.skywatch/config.yaml` with the reference point, radii,
//! throttle intervals, feed endpoint, schedule, dashboard, and webhook URL.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::geo::Coordinate;
use crate::types::{Result, SkywatchError};

pub const DEFAULT_FEED_URL: &str = "https://opensky-network.org/api";

/// Full configuration structure.
#[derive(Debug, Clone)]
pub struct Config {
    pub reference: ReferenceConfig,
    pub radius: RadiusConfig,
    pub throttle: ThrottleConfig,
    pub feed: FeedConfig,
    pub schedule: ScheduleConfig,
    pub dashboard: DashboardConfig,
    pub webhook: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReferenceConfig {
    pub name: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RadiusConfig {
    pub alert_m: f64,
    pub acquisition_m: f64,
}

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub feed_poll_secs: u64,
    pub alert_secs: u64,
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub url: String,
    pub timeout_secs: u64,
    pub background_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub foreground_secs: u64,
    pub background_secs: u64,
}

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            reference: ReferenceConfig {
                name: "home".into(),
                lat: None,
                lon: None,
            },
            radius: RadiusConfig {
                alert_m: 10_000.0,
                acquisition_m: 20_000.0,
            },
            throttle: ThrottleConfig {
                feed_poll_secs: 30,
                alert_secs: 300,
            },
            feed: FeedConfig {
                url: DEFAULT_FEED_URL.into(),
                timeout_secs: 10,
                background_timeout_secs: 5,
            },
            schedule: ScheduleConfig {
                foreground_secs: 15,
                background_secs: 3600,
            },
            dashboard: DashboardConfig {
                host: "127.0.0.1".into(),
                port: 8080,
            },
            webhook: None,
        }
    }
}

impl Config {
    /// Configured reference point, if both coordinates are set.
    pub fn reference_coordinate(&self) -> Option<Coordinate> {
        match (self.reference.lat, self.reference.lon) {
            (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon)),
            _ => None,
        }
    }

    pub fn feed_poll_interval(&self) -> Duration {
        Duration::from_secs(self.throttle.feed_poll_secs)
    }

    pub fn alert_interval(&self) -> Duration {
        Duration::from_secs(self.throttle.alert_secs)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let r = &self.radius;
        if !(r.alert_m.is_finite() && r.alert_m > 0.0) {
            return Err(SkywatchError::Config(format!(
                "alert radius must be positive, got {}",
                r.alert_m
            )));
        }
        if !(r.acquisition_m.is_finite() && r.acquisition_m > 0.0) {
            return Err(SkywatchError::Config(format!(
                "acquisition radius must be positive, got {}",
                r.acquisition_m
            )));
        }
        if r.alert_m > r.acquisition_m {
            return Err(SkywatchError::Config(format!(
                "alert radius {} m exceeds acquisition radius {} m",
                r.alert_m, r.acquisition_m
            )));
        }
        if let Some(c) = self.reference_coordinate() {
            if !c.is_valid() {
                return Err(SkywatchError::Config(format!(
                    "reference ({}, {}) is out of range",
                    c.lat, c.lon
                )));
            }
        }
        if self.feed.timeout_secs == 0 || self.feed.background_timeout_secs == 0 {
            return Err(SkywatchError::Config("feed timeouts must be non-zero".into()));
        }
        Ok(())
    }
}

/// Get the config directory path (`~/.skywatch/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".skywatch")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.skywatch/config.yaml`.
///
/// Returns default config if file doesn't exist.
pub fn load_config() -> Config {
    load_config_from(&config_file())
}

/// Load config from an explicit path, falling back to defaults.
pub fn load_config_from(path: &Path) -> Config {
    if !path.exists() {
        return Config::default();
    }

    match std::fs::read_to_string(path) {
        Ok(text) => parse_config(&text),
        Err(e) => {
            tracing::warn!(path = %path.display(), "unreadable config, using defaults: {e}");
            Config::default()
        }
    }
}

/// Save config to `~/.skywatch/config.yaml`.
pub fn save_config(config: &Config) -> Result<PathBuf> {
    let path = config_file();
    save_config_to(config, &path)?;
    Ok(path)
}

/// Save config to an explicit path, creating parent directories.
pub fn save_config_to(config: &Config, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, serialize_config(config))?;
    Ok(())
}

/// Parse simple YAML-like config text. Unknown keys are ignored.
fn parse_config(text: &str) -> Config {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for line in text.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');

        let Some((key, val)) = stripped.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            if val.is_empty() {
                current_section = Some(key.to_string());
            } else {
                current_section = None;
                if key == "webhook" {
                    config.webhook = parse_string_value(val);
                }
            }
            continue;
        }

        let Some(section) = current_section.as_deref() else {
            continue;
        };

        match (section, key) {
            ("reference", "name") => {
                if let Some(v) = parse_string_value(val) {
                    config.reference.name = v;
                }
            }
            ("reference", "lat") => config.reference.lat = parse_float_value(val),
            ("reference", "lon") => config.reference.lon = parse_float_value(val),
            ("radius", "alert_m") => set_float(&mut config.radius.alert_m, val),
            ("radius", "acquisition_m") => set_float(&mut config.radius.acquisition_m, val),
            ("throttle", "feed_poll_secs") => set_u64(&mut config.throttle.feed_poll_secs, val),
            ("throttle", "alert_secs") => set_u64(&mut config.throttle.alert_secs, val),
            ("feed", "url") => {
                if let Some(v) = parse_string_value(val) {
                    config.feed.url = v;
                }
            }
            ("feed", "timeout_secs") => set_u64(&mut config.feed.timeout_secs, val),
            ("feed", "background_timeout_secs") => {
                set_u64(&mut config.feed.background_timeout_secs, val)
            }
            ("schedule", "foreground_secs") => set_u64(&mut config.schedule.foreground_secs, val),
            ("schedule", "background_secs") => set_u64(&mut config.schedule.background_secs, val),
            ("dashboard", "host") => {
                if let Some(v) = parse_string_value(val) {
                    config.dashboard.host = v;
                }
            }
            ("dashboard", "port") => {
                if let Ok(v) = val.parse::<u16>() {
                    config.dashboard.port = v;
                }
            }
            _ => {}
        }
    }

    config
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

fn parse_float_value(val: &str) -> Option<f64> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    val.parse().ok()
}

fn set_float(slot: &mut f64, val: &str) {
    if let Some(v) = parse_float_value(val) {
        *slot = v;
    }
}

fn set_u64(slot: &mut u64, val: &str) {
    if let Ok(v) = val.parse::<u64>() {
        *slot = v;
    }
}

/// Serialize config to YAML-like text.
fn serialize_config(config: &Config) -> String {
    let opt = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_else(|| "null".into());

    let mut lines = vec!["# skywatch configuration".to_string(), String::new()];

    lines.push("reference:".into());
    lines.push(format!("  name: \"{}\"", config.reference.name));
    lines.push(format!("  lat: {}", opt(config.reference.lat)));
    lines.push(format!("  lon: {}", opt(config.reference.lon)));
    lines.push(String::new());

    lines.push("radius:".into());
    lines.push(format!("  alert_m: {}", config.radius.alert_m));
    lines.push(format!("  acquisition_m: {}", config.radius.acquisition_m));
    lines.push(String::new());

    lines.push("throttle:".into());
    lines.push(format!("  feed_poll_secs: {}", config.throttle.feed_poll_secs));
    lines.push(format!("  alert_secs: {}", config.throttle.alert_secs));
    lines.push(String::new());

    lines.push("feed:".into());
    lines.push(format!("  url: \"{}\"", config.feed.url));
    lines.push(format!("  timeout_secs: {}", config.feed.timeout_secs));
    lines.push(format!(
        "  background_timeout_secs: {}",
        config.feed.background_timeout_secs
    ));
    lines.push(String::new());

    lines.push("schedule:".into());
    lines.push(format!("  foreground_secs: {}", config.schedule.foreground_secs));
    lines.push(format!("  background_secs: {}", config.schedule.background_secs));
    lines.push(String::new());

    lines.push("dashboard:".into());
    lines.push(format!("  host: \"{}\"", config.dashboard.host));
    lines.push(format!("  port: {}", config.dashboard.port));
    lines.push(String::new());

    match &config.webhook {
        Some(url) => lines.push(format!("webhook: \"{url}\"")),
        None => lines.push("webhook: null".into()),
    }

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
