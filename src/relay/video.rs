//! Video channel dispatch.
//!
//! Messages arriving on the upstream video link fan out to the subscribed UI
//! clients. The only transformation is the `translation_saved` annotation on
//! frames whose prediction was persisted. Malformed payloads are logged and
//! dropped; the link stays up.

use super::message::{message_type, StreamMessage};
use super::RelayContext;
use crate::{is_sentinel_prediction, Severity, EVENT_TRANSLATION_SAVE_ERROR, EVENT_UPSTREAM_ERROR};

pub fn handle_stream_message(ctx: &RelayContext, raw: &str) {
    let msg = match StreamMessage::from_json(raw) {
        Ok(msg) => msg,
        Err(err) => {
            log::warn!("dropping malformed video message: {}", err);
            return;
        }
    };

    match msg {
        StreamMessage::VideoFrame {
            frame,
            prediction,
            confidence,
            camera_info,
            fps,
            processing_time,
            translation_saved: _,
            extra,
        } => {
            let saved = persist_accepted(ctx, prediction.as_deref(), confidence);
            let annotated = StreamMessage::VideoFrame {
                frame,
                prediction,
                confidence,
                camera_info,
                fps,
                processing_time,
                translation_saved: saved.then_some(true),
                extra,
            };
            match annotated.to_json() {
                Ok(json) => {
                    ctx.video_clients.broadcast(&json);
                }
                Err(err) => log::error!("failed to re-serialize video frame: {}", err),
            }
        }
        StreamMessage::CameraStatus { .. } => {
            // The UI handles camera status on either channel.
            ctx.video_clients.broadcast(raw);
            ctx.control_clients.broadcast(raw);
        }
        StreamMessage::SystemStatus { .. } => {
            ctx.control_clients.broadcast(raw);
        }
        StreamMessage::Error { ref message } => {
            log::warn!("upstream error: {}", message);
            ctx.control_clients.broadcast(raw);
            log_upstream_error(ctx, message);
        }
        StreamMessage::SessionStarted { .. } | StreamMessage::SessionStopped { .. } => {
            // Session rows are owned here; upstream session chatter is noise.
            log::debug!("ignoring upstream session message");
        }
        StreamMessage::Unknown => {
            log::debug!(
                "dropping unrecognized video message type {:?}",
                message_type(raw)
            );
        }
        other => {
            log::debug!("unexpected message on video link: {:?}", other);
        }
    }
}

/// Persist a prediction when a session is open, confidence clears the bar,
/// and the value is a real translation. Returns whether a row was written.
fn persist_accepted(ctx: &RelayContext, prediction: Option<&str>, confidence: Option<f64>) -> bool {
    let (Some(prediction), Some(confidence)) = (prediction, confidence) else {
        return false;
    };
    if confidence <= ctx.thresholds.accept_confidence || is_sentinel_prediction(prediction) {
        return false;
    }
    let Some(session_id) = ctx.session.current() else {
        return false;
    };

    let mut store = ctx.store.lock().expect("store poisoned");
    match store.save_translation(session_id, prediction, confidence) {
        Ok(_) => {
            log::info!(
                "saved translation '{}' ({:.2}) for session {}",
                prediction,
                confidence,
                session_id
            );
            true
        }
        Err(err) => {
            log::error!("failed to save translation: {}", err);
            if let Err(log_err) = store.log_system_event(
                session_id,
                EVENT_TRANSLATION_SAVE_ERROR,
                &err.to_string(),
                Severity::Error,
            ) {
                log::error!("failed to record save error: {}", log_err);
            }
            false
        }
    }
}

fn log_upstream_error(ctx: &RelayContext, message: &str) {
    let Some(session_id) = ctx.session.current() else {
        return;
    };
    let mut store = ctx.store.lock().expect("store poisoned");
    if let Err(err) =
        store.log_system_event(session_id, EVENT_UPSTREAM_ERROR, message, Severity::Error)
    {
        log::error!("failed to record upstream error: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::upstream::CommandSink;
    use crate::relay::Thresholds;
    use crate::storage::{InMemorySessionStore, SessionStore};
    use crate::RelayContext;
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};

    fn test_ctx() -> Arc<RelayContext> {
        RelayContext::new(
            Arc::new(Mutex::new(InMemorySessionStore::new())),
            Thresholds::default(),
            CommandSink::detached(),
        )
    }

    fn open_session(ctx: &RelayContext) -> i64 {
        let id = ctx
            .store
            .lock()
            .unwrap()
            .create_session(1000)
            .expect("create session");
        ctx.session.set(id);
        id
    }

    #[test]
    fn accepted_frame_is_annotated_and_persisted() {
        let ctx = test_ctx();
        let session_id = open_session(&ctx);
        let (tx, rx) = mpsc::channel();
        ctx.video_clients.register("ui", tx);

        handle_stream_message(
            &ctx,
            r#"{"type":"video_frame","prediction":"HOLA","confidence":0.85}"#,
        );

        let forwarded = rx.try_recv().expect("frame forwarded");
        assert!(forwarded.contains(r#""translation_saved":true"#));
        let translations = ctx
            .store
            .lock()
            .unwrap()
            .session_translations(session_id)
            .unwrap();
        assert_eq!(translations.len(), 1);
        assert_eq!(translations[0].text_output, "HOLA");
        assert_eq!(translations[0].confidence, 0.85);
    }

    #[test]
    fn low_confidence_is_forwarded_but_not_persisted() {
        let ctx = test_ctx();
        let session_id = open_session(&ctx);
        let (tx, rx) = mpsc::channel();
        ctx.video_clients.register("ui", tx);

        handle_stream_message(
            &ctx,
            r#"{"type":"video_frame","prediction":"HOLA","confidence":0.7}"#,
        );

        let forwarded = rx.try_recv().expect("frame forwarded");
        assert!(!forwarded.contains("translation_saved"));
        assert!(ctx
            .store
            .lock()
            .unwrap()
            .session_translations(session_id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn sentinel_prediction_is_never_persisted() {
        let ctx = test_ctx();
        let session_id = open_session(&ctx);

        handle_stream_message(
            &ctx,
            r#"{"type":"video_frame","prediction":"NO_HANDS_DETECTED","confidence":0.99}"#,
        );

        assert!(ctx
            .store
            .lock()
            .unwrap()
            .session_translations(session_id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn no_open_session_means_no_persistence() {
        let ctx = test_ctx();
        let (tx, rx) = mpsc::channel();
        ctx.video_clients.register("ui", tx);

        handle_stream_message(
            &ctx,
            r#"{"type":"video_frame","prediction":"HOLA","confidence":0.9}"#,
        );

        // Still forwarded, just not saved anywhere.
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn malformed_payload_keeps_channel_alive() {
        let ctx = test_ctx();
        let (tx, rx) = mpsc::channel();
        ctx.video_clients.register("ui", tx);

        handle_stream_message(&ctx, "definitely not json");
        assert!(rx.try_recv().is_err());

        handle_stream_message(&ctx, r#"{"type":"video_frame","confidence":0.5}"#);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn upstream_error_is_logged_against_session() {
        let ctx = test_ctx();
        let session_id = open_session(&ctx);
        let (tx, rx) = mpsc::channel();
        ctx.control_clients.register("ui", tx);

        handle_stream_message(&ctx, r#"{"type":"error","message":"camera fault"}"#);

        assert!(rx.try_recv().unwrap().contains("camera fault"));
        let logs = ctx.store.lock().unwrap().session_logs(session_id).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].event_type, "UPSTREAM_ERROR");
        assert_eq!(logs[0].severity, "ERROR");
    }

    #[test]
    fn camera_status_reaches_both_channels() {
        let ctx = test_ctx();
        let (tx_v, rx_v) = mpsc::channel();
        let (tx_c, rx_c) = mpsc::channel();
        ctx.video_clients.register("ui-video", tx_v);
        ctx.control_clients.register("ui-control", tx_c);

        handle_stream_message(
            &ctx,
            r#"{"type":"camera_status","camera_status":{"name":"laptop","status":"connected"}}"#,
        );

        assert!(rx_v.try_recv().is_ok());
        assert!(rx_c.try_recv().is_ok());
    }
}
