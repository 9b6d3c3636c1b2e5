//! Wire message shapes for the relay channels.
//!
//! Every payload is JSON with a `type` discriminator. Unknown discriminators
//! parse into the `Unknown` variants so a malformed or novel message can be
//! logged and dropped without failing the channel.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Messages on the video and control channels (inference service <-> UI).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// One processed camera frame, optionally with a prediction attached.
    VideoFrame {
        /// data-URI encoded JPEG.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prediction: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        camera_info: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fps: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        processing_time: Option<f64>,
        /// Set by the relay when the prediction was persisted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        translation_saved: Option<bool>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    CameraStatus {
        camera_status: CameraStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Arbitrary status object, merged into client-visible state as-is.
    SystemStatus {
        #[serde(flatten)]
        status: Map<String, Value>,
    },
    Error {
        message: String,
    },
    SessionStarted {
        session_id: i64,
    },
    SessionStopped {
        session_id: i64,
    },
    /// Relay -> UI: a distance sensor reading with its classified state.
    DistanceUpdate {
        distance: f64,
        device_id: String,
        status: String,
    },
    /// Relay -> UI: free-text alert raised by a device.
    DeviceAlert {
        device_id: String,
        message: String,
    },
    /// Relay -> device greeting on connect.
    Status {
        message: String,
    },
    #[serde(other)]
    Unknown,
}

impl StreamMessage {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("parse stream message")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("serialize stream message")
    }
}

/// Camera description reported by the inference service.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub fps: f64,
    #[serde(default)]
    pub actual_width: u32,
    #[serde(default)]
    pub actual_height: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Messages arriving on the device channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceMessage {
    /// Distance reading in centimeters.
    Distance { value: f64 },
    /// Free-text alert raised by the device.
    Alert { message: String },
    #[serde(other)]
    Unknown,
}

impl DeviceMessage {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("parse device message")
    }
}

/// Operator command sent from the UI over the control channel.
///
/// Extra fields ride along untouched (e.g. `camera_config` for
/// `switch_camera`), so forwarding upstream re-serializes losslessly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControlCommand {
    pub command: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ControlCommand {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("parse control command")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("serialize control command")
    }

    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            extra: Map::new(),
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self.command.as_str() {
            "start_session" => CommandKind::StartSession,
            "stop_session" => CommandKind::StopSession,
            "reset_classifier" => CommandKind::ResetClassifier,
            "get_status" => CommandKind::GetStatus,
            "get_cameras" => CommandKind::GetCameras,
            "switch_camera" => CommandKind::SwitchCamera,
            _ => CommandKind::Unknown,
        }
    }
}

/// Dispatch classes for control commands. Session commands are handled by
/// the relay itself; the rest are forwarded to the inference service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    StartSession,
    StopSession,
    ResetClassifier,
    GetStatus,
    GetCameras,
    SwitchCamera,
    Unknown,
}

impl CommandKind {
    /// Commands the relay answers locally rather than forwarding.
    pub fn handled_locally(&self) -> bool {
        matches!(self, CommandKind::StartSession | CommandKind::StopSession)
    }
}

/// Peek at the `type` discriminator of a raw payload, for log lines about
/// messages that did not parse into a known shape.
pub fn message_type(raw: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw).ok()?;
    value
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_frame_parses_with_optional_fields() {
        let raw = r#"{
            "type": "video_frame",
            "frame": "data:image/jpeg;base64,AAAA",
            "prediction": "HOLA",
            "confidence": 0.85,
            "camera_info": {"name": "laptop"},
            "timestamp": 12.5
        }"#;
        match StreamMessage::from_json(raw).unwrap() {
            StreamMessage::VideoFrame {
                frame,
                prediction,
                confidence,
                extra,
                ..
            } => {
                assert!(frame.unwrap().starts_with("data:image/jpeg"));
                assert_eq!(prediction.as_deref(), Some("HOLA"));
                assert_eq!(confidence, Some(0.85));
                assert!(extra.contains_key("timestamp"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn camera_status_parses() {
        let raw = r#"{
            "type": "camera_status",
            "camera_status": {
                "name": "laptop",
                "status": "connected",
                "fps": 29.7,
                "actual_width": 640,
                "actual_height": 480
            }
        }"#;
        match StreamMessage::from_json(raw).unwrap() {
            StreamMessage::CameraStatus { camera_status, .. } => {
                assert_eq!(camera_status.name, "laptop");
                assert_eq!(camera_status.actual_width, 640);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn unknown_type_is_tolerated() {
        let msg = StreamMessage::from_json(r#"{"type":"telemetry","x":1}"#).unwrap();
        assert!(matches!(msg, StreamMessage::Unknown));
        assert_eq!(
            message_type(r#"{"type":"telemetry","x":1}"#).as_deref(),
            Some("telemetry")
        );
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(StreamMessage::from_json("not json").is_err());
        assert!(DeviceMessage::from_json("{").is_err());
    }

    #[test]
    fn device_messages_parse() {
        match DeviceMessage::from_json(r#"{"type":"distance","value":87.5}"#).unwrap() {
            DeviceMessage::Distance { value } => assert_eq!(value, 87.5),
            other => panic!("unexpected message: {:?}", other),
        }
        match DeviceMessage::from_json(r#"{"type":"alert","message":"low battery"}"#).unwrap() {
            DeviceMessage::Alert { message } => assert_eq!(message, "low battery"),
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(matches!(
            DeviceMessage::from_json(r#"{"type":"ping"}"#).unwrap(),
            DeviceMessage::Unknown
        ));
    }

    #[test]
    fn command_extras_survive_round_trip() {
        let raw = r#"{"command":"switch_camera","camera_config":{"name":"esp32"}}"#;
        let cmd = ControlCommand::from_json(raw).unwrap();
        assert_eq!(cmd.kind(), CommandKind::SwitchCamera);
        let round = cmd.to_json().unwrap();
        let reparsed = ControlCommand::from_json(&round).unwrap();
        assert_eq!(reparsed.extra["camera_config"]["name"], "esp32");
    }

    #[test]
    fn command_kinds_dispatch() {
        for (name, kind, local) in [
            ("start_session", CommandKind::StartSession, true),
            ("stop_session", CommandKind::StopSession, true),
            ("reset_classifier", CommandKind::ResetClassifier, false),
            ("get_status", CommandKind::GetStatus, false),
            ("get_cameras", CommandKind::GetCameras, false),
            ("switch_camera", CommandKind::SwitchCamera, false),
            ("self_destruct", CommandKind::Unknown, false),
        ] {
            let cmd = ControlCommand::new(name);
            assert_eq!(cmd.kind(), kind);
            assert_eq!(cmd.kind().handled_locally(), local);
        }
    }
}
