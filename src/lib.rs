//! Sign-language translation relay.
//!
//! This crate implements the relay and persistence service that sits between
//! an external sign-recognition inference service and the browser UI:
//!
//! 1. **Control/Video Relay**: two independent WebSocket channels. Frames and
//!    predictions flow downstream to the UI; operator commands flow upstream
//!    to the inference service.
//! 2. **Device Relay**: a third channel bridging an ESP32 distance sensor to
//!    the UI and back to the sensor's display.
//! 3. **Persistence**: sessions, translations, calibration, and system logs
//!    in SQLite behind a store trait.
//! 4. **Presentation**: the client-side view model (decoded frames, latest
//!    prediction, bounded history) that a UI front-end drives.
//!
//! # Module Structure
//!
//! - `relay`: listener, channel handlers, upstream links
//! - `storage`: `SessionStore` trait, SQLite and in-memory stores
//! - `frame`: data-URI frame decoding onto a fixed drawing surface
//! - `view`: view model, translation history, confidence presentation
//! - `config`: daemon configuration (file + environment)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod config;
pub mod frame;
pub mod relay;
pub mod storage;
pub mod view;

pub use frame::{decode_data_uri, DecodedFrame, SURFACE_HEIGHT, SURFACE_WIDTH};
pub use relay::device::push_display_text;
pub use relay::message::{CameraStatus, CommandKind, ControlCommand, DeviceMessage, StreamMessage};
pub use relay::upstream::{CommandSink, ReconnectTimer, UpstreamLink, UpstreamRole};
pub use relay::{
    ActiveSession, Registry, RelayContext, RelayHandle, RelayServer, SharedStore, Thresholds,
};
pub use storage::{
    Calibration, InMemorySessionStore, SessionRecord, SessionStore, SqliteSessionStore,
    SystemLogRecord, TranslationRecord,
};
pub use view::{
    ConfidenceBand, TranslationHistory, ViewModel, ViewSnapshot, ACCEPT_CONFIDENCE,
    HISTORY_CAPACITY,
};

/// Current time as whole seconds since the Unix epoch.
pub fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

// -------------------- Proximity --------------------

/// Distance range accepted as "in position" in front of the camera, in
/// centimeters. Bounds are inclusive on both ends.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DistanceRange {
    pub min_cm: f64,
    pub max_cm: f64,
}

impl DistanceRange {
    pub fn new(min_cm: f64, max_cm: f64) -> Self {
        Self { min_cm, max_cm }
    }
}

impl Default for DistanceRange {
    fn default() -> Self {
        Self {
            min_cm: 50.0,
            max_cm: 150.0,
        }
    }
}

/// Proximity of a signer relative to the accepted distance range.
///
/// The display texts are the exact strings the sensor's display firmware
/// expects, so they are part of the wire contract and never localized here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProximityState {
    /// Beyond the far bound; the signer should come closer.
    TooFar,
    /// Inside the near bound; the signer should back away.
    TooClose,
    /// Within the accepted range.
    InRange,
}

impl ProximityState {
    /// Classify a measured distance against a range. Values equal to either
    /// bound count as in range.
    pub fn classify(distance_cm: f64, range: DistanceRange) -> Self {
        if distance_cm > range.max_cm {
            ProximityState::TooFar
        } else if distance_cm < range.min_cm {
            ProximityState::TooClose
        } else {
            ProximityState::InRange
        }
    }

    pub fn display_text(&self) -> &'static str {
        match self {
            ProximityState::TooFar => "ACERCARSE",
            ProximityState::TooClose => "ALEJARSE",
            ProximityState::InRange => "DISTANCIA OK",
        }
    }
}

// -------------------- Predictions --------------------

/// Classifier outputs that are status markers rather than translations.
/// These never reach the history or the translations table.
pub const SENTINEL_PREDICTIONS: [&str; 3] = [
    "NO_HANDS_DETECTED",
    "SECUENCIA_INCOMPLETA",
    "ERROR_PREDICCION",
];

pub fn is_sentinel_prediction(prediction: &str) -> bool {
    SENTINEL_PREDICTIONS.contains(&prediction)
}

// -------------------- System log events --------------------

/// Severity of a system log entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "INFO" => Some(Severity::Info),
            "WARNING" => Some(Severity::Warning),
            "ERROR" => Some(Severity::Error),
            _ => None,
        }
    }
}

pub const EVENT_SESSION_STARTED: &str = "SESSION_STARTED";
pub const EVENT_SESSION_ENDED: &str = "SESSION_ENDED";
pub const EVENT_TRANSLATION_SAVE_ERROR: &str = "TRANSLATION_SAVE_ERROR";
pub const EVENT_UPSTREAM_ERROR: &str = "UPSTREAM_ERROR";
