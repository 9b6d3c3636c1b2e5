//! Control channel dispatch.
//!
//! UI clients issue `{command: ...}` payloads. Session commands are answered
//! by the relay itself, since the session rows live here; everything else is
//! forwarded verbatim to the inference service. Responses coming back on the
//! upstream control link are broadcast to all control subscribers.

use anyhow::Result;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::{self, Sender};
use tungstenite::WebSocket;

use super::message::{message_type, CommandKind, ControlCommand, StreamMessage};
use super::{connection_loop, RelayContext};
use crate::{now_s, Severity, EVENT_SESSION_ENDED, EVENT_SESSION_STARTED};

pub fn run_control_connection(
    ws: WebSocket<TcpStream>,
    peer: SocketAddr,
    ctx: &RelayContext,
    shutdown: &AtomicBool,
) -> Result<()> {
    let key = peer.to_string();
    let (tx, rx) = mpsc::channel();
    ctx.control_clients.register(&key, tx.clone());
    log::info!("control client connected: {}", key);
    connection_loop(ws, rx, shutdown, |text| {
        handle_client_command(ctx, text, &tx);
    });
    ctx.control_clients.unregister(&key);
    log::info!("control client disconnected: {}", key);
    Ok(())
}

/// Dispatch one command from a UI client. `reply` is the issuing client's
/// outbound queue; only that client sees command responses.
pub fn handle_client_command(ctx: &RelayContext, raw: &str, reply: &Sender<String>) {
    let cmd = match ControlCommand::from_json(raw) {
        Ok(cmd) => cmd,
        Err(err) => {
            log::warn!("dropping malformed control command: {}", err);
            return;
        }
    };

    match cmd.kind() {
        CommandKind::StartSession => start_session(ctx, reply),
        CommandKind::StopSession => stop_session(ctx, reply),
        CommandKind::Unknown => {
            log::warn!("unrecognized command: {}", cmd.command);
            send_reply(
                reply,
                &StreamMessage::Error {
                    message: format!("unrecognized command: {}", cmd.command),
                },
            );
        }
        _ => {
            if !ctx.commands.send(raw) {
                log::warn!("command '{}' dropped, upstream link down", cmd.command);
            }
        }
    }
}

fn start_session(ctx: &RelayContext, reply: &Sender<String>) {
    // Starting while a session is open reuses it; the UI start button is
    // not required to pair with a stop.
    if let Some(session_id) = ctx.session.current() {
        log::debug!("session {} already open", session_id);
        send_reply(reply, &StreamMessage::SessionStarted { session_id });
        return;
    }

    let result = (|| -> Result<i64> {
        let now = now_s()?;
        let mut store = ctx.store.lock().expect("store poisoned");
        let session_id = store.create_session(now)?;
        store.log_system_event(
            session_id,
            EVENT_SESSION_STARTED,
            "session opened by operator",
            Severity::Info,
        )?;
        Ok(session_id)
    })();

    match result {
        Ok(session_id) => {
            ctx.session.set(session_id);
            log::info!("session {} started", session_id);
            send_reply(reply, &StreamMessage::SessionStarted { session_id });
        }
        Err(err) => {
            log::error!("failed to start session: {}", err);
            send_reply(
                reply,
                &StreamMessage::Error {
                    message: format!("failed to start session: {}", err),
                },
            );
        }
    }
}

fn stop_session(ctx: &RelayContext, reply: &Sender<String>) {
    let Some(session_id) = ctx.session.clear() else {
        send_reply(
            reply,
            &StreamMessage::Error {
                message: "no session is open".to_string(),
            },
        );
        return;
    };

    let result = (|| -> Result<()> {
        let now = now_s()?;
        let mut store = ctx.store.lock().expect("store poisoned");
        store.end_session(session_id, now)?;
        store.log_system_event(
            session_id,
            EVENT_SESSION_ENDED,
            "session closed by operator",
            Severity::Info,
        )?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            log::info!("session {} stopped", session_id);
            send_reply(reply, &StreamMessage::SessionStopped { session_id });
        }
        Err(err) => {
            log::error!("failed to stop session {}: {}", session_id, err);
            send_reply(
                reply,
                &StreamMessage::Error {
                    message: format!("failed to stop session: {}", err),
                },
            );
        }
    }
}

/// Responses from the inference service fan out to every control client.
pub fn handle_upstream_message(ctx: &RelayContext, raw: &str) {
    match StreamMessage::from_json(raw) {
        Ok(StreamMessage::Unknown) => {
            log::debug!(
                "dropping unrecognized control response type {:?}",
                message_type(raw)
            );
        }
        Ok(_) => {
            ctx.control_clients.broadcast(raw);
        }
        Err(err) => {
            log::warn!("dropping malformed control response: {}", err);
        }
    }
}

fn send_reply(reply: &Sender<String>, msg: &StreamMessage) {
    match msg.to_json() {
        Ok(json) => {
            if reply.send(json).is_err() {
                log::warn!("reply dropped, client connection gone");
            }
        }
        Err(err) => log::error!("failed to serialize reply: {}", err),
    }
}
