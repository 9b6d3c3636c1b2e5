//! Presentation-side view model.
//!
//! Mirrors what the browser UI renders: the current frame on its canvas, the
//! latest prediction with a confidence bar, a bounded history of accepted
//! translations, and the connection indicator. Every applied message
//! produces a fresh immutable snapshot, replaced atomically, so a frame
//! handler and a status handler can never expose a half-updated state.

use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::frame::{decode_data_uri, DecodedFrame};
use crate::relay::message::{message_type, CameraStatus, ControlCommand, StreamMessage};
use crate::relay::upstream::ReconnectTimer;
use crate::{is_sentinel_prediction, now_s};

/// Visible history keeps this many entries, most recent first.
pub const HISTORY_CAPACITY: usize = 10;

/// Predictions at or below this confidence never enter the history.
pub const ACCEPT_CONFIDENCE: f64 = 0.7;

// -------------------- Translation history --------------------

#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    pub text: String,
    pub confidence: f64,
    pub at_s: u64,
    /// Whether the relay reported the prediction as persisted.
    pub saved: bool,
}

/// Bounded most-recent-first list of accepted predictions.
#[derive(Clone, Debug, Default)]
pub struct TranslationHistory {
    entries: VecDeque<HistoryEntry>,
}

impl TranslationHistory {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Append a prediction if it clears the acceptance filter. The oldest
    /// entry falls off once the capacity is reached.
    pub fn accept(&mut self, prediction: &str, confidence: f64, saved: bool, at_s: u64) -> bool {
        if confidence <= ACCEPT_CONFIDENCE || is_sentinel_prediction(prediction) {
            return false;
        }
        while self.entries.len() >= HISTORY_CAPACITY {
            self.entries.pop_back();
        }
        self.entries.push_front(HistoryEntry {
            text: prediction.to_string(),
            confidence,
            at_s,
            saved,
        });
        true
    }

    /// Entries from most recent to oldest.
    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// -------------------- Confidence presentation --------------------

/// Color band for the confidence bar.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    pub fn for_confidence(confidence: f64) -> Self {
        if confidence > 0.8 {
            ConfidenceBand::High
        } else if confidence > 0.6 {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            ConfidenceBand::High => "#10b981",
            ConfidenceBand::Medium => "#f59e0b",
            ConfidenceBand::Low => "#ef4444",
        }
    }
}

// -------------------- Snapshot --------------------

/// Latest distance reading relayed from a device.
#[derive(Clone, Debug, PartialEq)]
pub struct DistanceReading {
    pub distance_cm: f64,
    pub device_id: String,
    pub status: String,
}

/// Immutable UI state. A new snapshot replaces the previous one wholesale.
#[derive(Clone, Debug, Default)]
pub struct ViewSnapshot {
    pub translation: String,
    pub confidence: f64,
    pub camera: Option<CameraStatus>,
    pub camera_info: Option<Value>,
    pub system_status: Option<Map<String, Value>>,
    pub distance: Option<DistanceReading>,
    pub session_id: Option<i64>,
    pub fps: f64,
    pub processing_time: f64,
    pub frames_processed: u64,
    pub connected: bool,
    pub processing: bool,
}

// -------------------- View model --------------------

pub struct ViewModel {
    snapshot: Arc<ViewSnapshot>,
    history: TranslationHistory,
    surface: Option<DecodedFrame>,
    reconnect: ReconnectTimer,
}

impl ViewModel {
    pub fn new() -> Self {
        Self {
            snapshot: Arc::new(ViewSnapshot::default()),
            history: TranslationHistory::new(),
            surface: None,
            reconnect: ReconnectTimer::default(),
        }
    }

    /// The current immutable state.
    pub fn snapshot(&self) -> Arc<ViewSnapshot> {
        self.snapshot.clone()
    }

    pub fn history(&self) -> &TranslationHistory {
        &self.history
    }

    /// The last decoded frame, drawn at surface size.
    pub fn surface(&self) -> Option<&DecodedFrame> {
        self.surface.as_ref()
    }

    pub fn confidence_bar_width_pct(&self) -> f64 {
        self.snapshot.confidence * 100.0
    }

    pub fn confidence_band(&self) -> ConfidenceBand {
        ConfidenceBand::for_confidence(self.snapshot.confidence)
    }

    /// Apply one raw channel payload. Malformed payloads are logged and
    /// dropped; the view keeps its previous state.
    pub fn apply(&mut self, raw: &str) {
        let msg = match StreamMessage::from_json(raw) {
            Ok(msg) => msg,
            Err(err) => {
                log::warn!("view dropping malformed message: {}", err);
                return;
            }
        };

        let mut next = (*self.snapshot).clone();
        match msg {
            StreamMessage::VideoFrame {
                frame,
                prediction,
                confidence,
                camera_info,
                fps,
                processing_time,
                translation_saved,
                extra: _,
            } => {
                if let Some(frame) = frame.as_deref() {
                    match decode_data_uri(frame) {
                        Ok(decoded) => self.surface = Some(decoded),
                        Err(err) => log::warn!("frame dropped: {}", err),
                    }
                }
                if let Some(prediction) = prediction {
                    let confidence = confidence.unwrap_or(0.0);
                    next.translation = prediction.clone();
                    next.confidence = confidence;
                    let at_s = now_s().unwrap_or(0);
                    self.history.accept(
                        &prediction,
                        confidence,
                        translation_saved.unwrap_or(false),
                        at_s,
                    );
                }
                if camera_info.is_some() {
                    next.camera_info = camera_info;
                }
                if let Some(fps) = fps {
                    next.fps = fps;
                }
                if let Some(processing_time) = processing_time {
                    next.processing_time = processing_time;
                }
                next.frames_processed += 1;
            }
            StreamMessage::CameraStatus { camera_status, .. } => {
                next.camera = Some(camera_status);
            }
            StreamMessage::SystemStatus { status } => {
                next.system_status = Some(status);
            }
            StreamMessage::DistanceUpdate {
                distance,
                device_id,
                status,
            } => {
                next.distance = Some(DistanceReading {
                    distance_cm: distance,
                    device_id,
                    status,
                });
            }
            StreamMessage::SessionStarted { session_id } => {
                next.session_id = Some(session_id);
            }
            StreamMessage::SessionStopped { .. } => {
                next.session_id = None;
            }
            StreamMessage::Error { message } => {
                log::error!("backend error: {}", message);
            }
            StreamMessage::Status { .. } | StreamMessage::DeviceAlert { .. } => {}
            StreamMessage::Unknown => {
                log::debug!("view ignoring message type {:?}", message_type(raw));
            }
        }
        self.snapshot = Arc::new(next);
    }

    // ---------------- Operator actions ----------------

    /// Toggle the processing flag. Purely cosmetic: it gates nothing that
    /// is actually received.
    pub fn start_processing(&mut self) {
        self.replace(|next| next.processing = true);
    }

    pub fn stop_processing(&mut self) {
        self.replace(|next| next.processing = false);
    }

    /// Reset clears the local view regardless of whether the command could
    /// be sent; the classifier reset itself happens upstream.
    pub fn reset_classifier(&mut self) -> Option<String> {
        self.history.clear();
        self.replace(|next| {
            next.translation.clear();
            next.confidence = 0.0;
        });
        self.command("reset_classifier")
    }

    pub fn request_status(&self) -> Option<String> {
        self.command("get_status")
    }

    pub fn start_session_command(&self) -> Option<String> {
        self.command("start_session")
    }

    pub fn stop_session_command(&self) -> Option<String> {
        self.command("stop_session")
    }

    /// Build an outbound command payload. The only gate is connectivity:
    /// when the channel is down the command is dropped with a warning.
    fn command(&self, name: &str) -> Option<String> {
        if !self.snapshot.connected {
            log::warn!("control channel not connected, '{}' dropped", name);
            return None;
        }
        match ControlCommand::new(name).to_json() {
            Ok(json) => Some(json),
            Err(err) => {
                log::error!("failed to serialize command '{}': {}", name, err);
                None
            }
        }
    }

    // ---------------- Connection state ----------------

    pub fn channel_opened(&mut self) {
        self.replace(|next| next.connected = true);
    }

    /// A closed channel flips the indicator and arms exactly one reconnect
    /// attempt at the fixed delay.
    pub fn channel_closed(&mut self) {
        self.replace(|next| next.connected = false);
        self.reconnect.schedule();
    }

    /// The wait the embedding client should sleep before redialing, if a
    /// reconnect is due.
    pub fn take_reconnect(&mut self) -> Option<std::time::Duration> {
        self.reconnect.take()
    }

    fn replace<F: FnOnce(&mut ViewSnapshot)>(&mut self, update: F) {
        let mut next = (*self.snapshot).clone();
        update(&mut next);
        self.snapshot = Arc::new(next);
    }
}

impl Default for ViewModel {
    fn default() -> Self {
        Self::new()
    }
}
