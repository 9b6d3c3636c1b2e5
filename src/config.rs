//! Daemon configuration.
//!
//! Settings come from an optional JSON config file named by `SIGN_RELAY_CONFIG`,
//! overlaid by `SIGN_RELAY_*` environment variables, then validated.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::DistanceRange;

const DEFAULT_DB_PATH: &str = "sign_relay.db";
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8766";
const DEFAULT_UPSTREAM_VIDEO: &str = "ws://127.0.0.1:8000/ws/video";
const DEFAULT_UPSTREAM_CONTROL: &str = "ws://127.0.0.1:8000/ws/control";
const DEFAULT_RECONNECT_MS: u64 = 3000;
const DEFAULT_DISTANCE_MIN_CM: f64 = 50.0;
const DEFAULT_DISTANCE_MAX_CM: f64 = 150.0;
const DEFAULT_ACCEPT_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Deserialize, Default)]
struct RelaydConfigFile {
    db_path: Option<String>,
    listen_addr: Option<String>,
    upstream: Option<UpstreamConfigFile>,
    thresholds: Option<ThresholdConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct UpstreamConfigFile {
    video_url: Option<String>,
    control_url: Option<String>,
    reconnect_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ThresholdConfigFile {
    distance_min_cm: Option<f64>,
    distance_max_cm: Option<f64>,
    confidence: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RelaydConfig {
    pub db_path: String,
    pub listen_addr: String,
    pub upstream: UpstreamSettings,
    pub distance: DistanceRange,
    pub accept_confidence: f64,
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub video_url: String,
    pub control_url: String,
    pub reconnect_delay: Duration,
}

impl RelaydConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SIGN_RELAY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RelaydConfigFile) -> Self {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let listen_addr = file
            .listen_addr
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let upstream = UpstreamSettings {
            video_url: file
                .upstream
                .as_ref()
                .and_then(|up| up.video_url.clone())
                .unwrap_or_else(|| DEFAULT_UPSTREAM_VIDEO.to_string()),
            control_url: file
                .upstream
                .as_ref()
                .and_then(|up| up.control_url.clone())
                .unwrap_or_else(|| DEFAULT_UPSTREAM_CONTROL.to_string()),
            reconnect_delay: Duration::from_millis(
                file.upstream
                    .as_ref()
                    .and_then(|up| up.reconnect_ms)
                    .unwrap_or(DEFAULT_RECONNECT_MS),
            ),
        };
        let distance = DistanceRange {
            min_cm: file
                .thresholds
                .as_ref()
                .and_then(|t| t.distance_min_cm)
                .unwrap_or(DEFAULT_DISTANCE_MIN_CM),
            max_cm: file
                .thresholds
                .as_ref()
                .and_then(|t| t.distance_max_cm)
                .unwrap_or(DEFAULT_DISTANCE_MAX_CM),
        };
        let accept_confidence = file
            .thresholds
            .and_then(|t| t.confidence)
            .unwrap_or(DEFAULT_ACCEPT_CONFIDENCE);
        Self {
            db_path,
            listen_addr,
            upstream,
            distance,
            accept_confidence,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("SIGN_RELAY_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(addr) = std::env::var("SIGN_RELAY_LISTEN_ADDR") {
            if !addr.trim().is_empty() {
                self.listen_addr = addr;
            }
        }
        if let Ok(url) = std::env::var("SIGN_RELAY_UPSTREAM_VIDEO") {
            if !url.trim().is_empty() {
                self.upstream.video_url = url;
            }
        }
        if let Ok(url) = std::env::var("SIGN_RELAY_UPSTREAM_CONTROL") {
            if !url.trim().is_empty() {
                self.upstream.control_url = url;
            }
        }
        if let Ok(ms) = std::env::var("SIGN_RELAY_RECONNECT_MS") {
            let ms: u64 = ms
                .parse()
                .map_err(|_| anyhow!("SIGN_RELAY_RECONNECT_MS must be an integer number of milliseconds"))?;
            self.upstream.reconnect_delay = Duration::from_millis(ms);
        }
        if let Ok(min) = std::env::var("SIGN_RELAY_DISTANCE_MIN") {
            self.distance.min_cm = min
                .parse()
                .map_err(|_| anyhow!("SIGN_RELAY_DISTANCE_MIN must be a number of centimeters"))?;
        }
        if let Ok(max) = std::env::var("SIGN_RELAY_DISTANCE_MAX") {
            self.distance.max_cm = max
                .parse()
                .map_err(|_| anyhow!("SIGN_RELAY_DISTANCE_MAX must be a number of centimeters"))?;
        }
        if let Ok(confidence) = std::env::var("SIGN_RELAY_CONFIDENCE") {
            self.accept_confidence = confidence
                .parse()
                .map_err(|_| anyhow!("SIGN_RELAY_CONFIDENCE must be a number in 0.0..=1.0"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.distance.min_cm < 0.0 || self.distance.max_cm < self.distance.min_cm {
            return Err(anyhow!(
                "distance range {}..{} cm invalid, expected 0 <= min <= max",
                self.distance.min_cm,
                self.distance.max_cm
            ));
        }
        if !(0.0..=1.0).contains(&self.accept_confidence) {
            return Err(anyhow!(
                "acceptance confidence {} out of range, expected 0.0..=1.0",
                self.accept_confidence
            ));
        }
        if self.upstream.reconnect_delay.is_zero() {
            return Err(anyhow!("reconnect delay must be greater than zero"));
        }
        for (name, url) in [
            ("upstream video url", &self.upstream.video_url),
            ("upstream control url", &self.upstream.control_url),
        ] {
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                return Err(anyhow!("{} must be a ws:// or wss:// url, got '{}'", name, url));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<RelaydConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
