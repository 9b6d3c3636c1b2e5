//! Device channel dispatch.
//!
//! ESP32 distance sensors connect here. Connections are keyed by peer
//! address only, so two devices behind one origin collide (last one wins) —
//! a known limitation of the deployment this models. Readings are classified
//! against the active distance range; the resulting display text goes back
//! to the originating device as a bare text frame (the firmware renders it
//! verbatim) and a structured update is broadcast to the UI's control
//! channel. No retry, no acknowledgement, no ordering guarantee.

use anyhow::Result;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::{self, Sender};
use tungstenite::WebSocket;

use super::message::{message_type, DeviceMessage, StreamMessage};
use super::{connection_loop, RelayContext};
use crate::ProximityState;

pub fn run_device_connection(
    ws: WebSocket<TcpStream>,
    peer: SocketAddr,
    ctx: &RelayContext,
    shutdown: &AtomicBool,
) -> Result<()> {
    let device_id = peer.ip().to_string();
    let (tx, rx) = mpsc::channel();

    let greeting = StreamMessage::Status {
        message: "CONECTADO".to_string(),
    };
    if let Ok(json) = greeting.to_json() {
        let _ = tx.send(json);
    }

    ctx.device_clients.register(&device_id, tx.clone());
    log::info!("device connected: {}", device_id);
    connection_loop(ws, rx, shutdown, |text| {
        handle_device_message(ctx, &device_id, text, &tx);
    });
    ctx.device_clients.unregister(&device_id);
    log::info!("device disconnected: {}", device_id);
    Ok(())
}

pub fn handle_device_message(
    ctx: &RelayContext,
    device_id: &str,
    raw: &str,
    reply: &Sender<String>,
) {
    let msg = match DeviceMessage::from_json(raw) {
        Ok(msg) => msg,
        Err(err) => {
            log::warn!("dropping malformed message from device {}: {}", device_id, err);
            return;
        }
    };

    match msg {
        DeviceMessage::Distance { value } => {
            let state = ProximityState::classify(value, ctx.thresholds.distance);
            log::debug!("device {} distance {} cm -> {}", device_id, value, state.display_text());

            if reply.send(state.display_text().to_string()).is_err() {
                log::warn!("display text dropped, device {} connection gone", device_id);
            }

            let update = StreamMessage::DistanceUpdate {
                distance: value,
                device_id: device_id.to_string(),
                status: state.display_text().to_string(),
            };
            match update.to_json() {
                Ok(json) => {
                    ctx.control_clients.broadcast(&json);
                }
                Err(err) => log::error!("failed to serialize distance update: {}", err),
            }
        }
        DeviceMessage::Alert { message } => {
            log::info!("alert from device {}: {}", device_id, message);
            let alert = StreamMessage::DeviceAlert {
                device_id: device_id.to_string(),
                message,
            };
            match alert.to_json() {
                Ok(json) => {
                    ctx.control_clients.broadcast(&json);
                }
                Err(err) => log::error!("failed to serialize device alert: {}", err),
            }
        }
        DeviceMessage::Unknown => {
            log::debug!(
                "dropping unrecognized device message type {:?} from {}",
                message_type(raw),
                device_id
            );
        }
    }
}

/// Push display text to one device, or to every connected device when no
/// id is given. Returns the number of deliveries.
pub fn push_display_text(ctx: &RelayContext, device_id: Option<&str>, text: &str) -> usize {
    match device_id {
        Some(id) => ctx.device_clients.send_to(id, text) as usize,
        None => ctx.device_clients.broadcast(text),
    }
}
