//! Upstream links to the inference service.
//!
//! The relay dials one WebSocket per channel: the video link carries frames
//! and predictions downstream, the control link carries commands upstream and
//! status responses back. The links are fully independent; no ordering is
//! guaranteed between them.
//!
//! Reconnect policy: a closed link schedules exactly one reconnect attempt
//! after a fixed delay. There is no backoff growth and no retry cap, and
//! repeated closures never compound the delay. Deliberately weak, kept as
//! the system has always behaved.

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use super::{control, video, RelayContext};
use crate::{now_s, Severity, EVENT_SESSION_ENDED};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

const READ_TIMEOUT: Duration = Duration::from_millis(50);

// -------------------- Reconnect timer --------------------

/// Fixed-delay reconnect scheduling. One closure arms the timer once;
/// arming an already-armed timer is a no-op, so back-to-back closures
/// produce a single wait of the same fixed length.
#[derive(Debug)]
pub struct ReconnectTimer {
    delay: Duration,
    pending: bool,
}

impl ReconnectTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: false,
        }
    }

    /// Arm the timer. Returns true if this closure scheduled the attempt,
    /// false if one was already pending.
    pub fn schedule(&mut self) -> bool {
        if self.pending {
            return false;
        }
        self.pending = true;
        true
    }

    /// Consume the pending attempt, if any, yielding the wait duration.
    pub fn take(&mut self) -> Option<Duration> {
        if self.pending {
            self.pending = false;
            Some(self.delay)
        } else {
            None
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }
}

impl Default for ReconnectTimer {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAY)
    }
}

// -------------------- Command sink --------------------

/// Entry point for forwarding operator commands to the inference service.
///
/// Commands sent while the control link is down are dropped with a warning,
/// never queued; there is no retry and no acknowledgement.
#[derive(Clone)]
pub struct CommandSink {
    tx: Sender<String>,
    connected: Arc<AtomicBool>,
}

impl CommandSink {
    pub fn new() -> (Self, Receiver<String>) {
        let (tx, rx) = mpsc::channel();
        (
            Self {
                tx,
                connected: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    /// A sink with no upstream behind it; every send warns and drops.
    pub fn detached() -> Self {
        let (sink, _rx) = Self::new();
        sink
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Forward a raw command payload. Returns false when the link is down
    /// or gone; the payload is dropped.
    pub fn send(&self, raw: &str) -> bool {
        if !self.is_connected() {
            log::warn!("upstream control link not connected, command dropped");
            return false;
        }
        if self.tx.send(raw.to_string()).is_err() {
            log::warn!("upstream control link gone, command dropped");
            return false;
        }
        true
    }
}

// -------------------- Upstream link --------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpstreamRole {
    Video,
    Control,
}

impl UpstreamRole {
    fn name(&self) -> &'static str {
        match self {
            UpstreamRole::Video => "video",
            UpstreamRole::Control => "control",
        }
    }
}

pub struct UpstreamLink {
    role: UpstreamRole,
    url: String,
    ctx: Arc<RelayContext>,
    reconnect_delay: Duration,
}

impl UpstreamLink {
    pub fn new(
        role: UpstreamRole,
        url: &str,
        ctx: Arc<RelayContext>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            role,
            url: url.to_string(),
            ctx,
            reconnect_delay,
        }
    }

    /// Run the link on its own thread until shutdown. The control link owns
    /// the receiving half of the command sink; the video link passes None.
    pub fn spawn(
        self,
        shutdown: Arc<AtomicBool>,
        commands: Option<Receiver<String>>,
    ) -> JoinHandle<()> {
        std::thread::spawn(move || self.run(shutdown, commands))
    }

    fn run(self, shutdown: Arc<AtomicBool>, commands: Option<Receiver<String>>) {
        let mut timer = ReconnectTimer::new(self.reconnect_delay);
        while !shutdown.load(Ordering::SeqCst) {
            match tungstenite::connect(self.url.as_str()) {
                Ok((ws, _response)) => {
                    log::info!("upstream {} link connected to {}", self.role.name(), self.url);
                    if self.role == UpstreamRole::Control {
                        self.ctx.commands.set_connected(true);
                    }
                    self.pump(ws, &shutdown, commands.as_ref());
                    if self.role == UpstreamRole::Control {
                        self.ctx.commands.set_connected(false);
                    }
                    self.on_disconnect();
                }
                Err(err) => {
                    log::warn!(
                        "upstream {} link to {} failed: {}",
                        self.role.name(),
                        self.url,
                        err
                    );
                }
            }
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            timer.schedule();
            if let Some(delay) = timer.take() {
                log::info!(
                    "retrying upstream {} link in {} ms",
                    self.role.name(),
                    delay.as_millis()
                );
                std::thread::sleep(delay);
            }
        }
    }

    /// Read/forward loop for one connected socket.
    fn pump(
        &self,
        mut ws: WebSocket<MaybeTlsStream<TcpStream>>,
        shutdown: &AtomicBool,
        commands: Option<&Receiver<String>>,
    ) {
        if let MaybeTlsStream::Plain(stream) = ws.get_ref() {
            if let Err(err) = stream.set_read_timeout(Some(READ_TIMEOUT)) {
                log::warn!("failed to set upstream read timeout: {}", err);
            }
        }

        loop {
            if shutdown.load(Ordering::SeqCst) {
                let _ = ws.close(None);
                let _ = ws.flush();
                return;
            }

            if let Some(commands) = commands {
                loop {
                    match commands.try_recv() {
                        Ok(raw) => {
                            if let Err(err) = ws.send(Message::Text(raw)) {
                                log::warn!("upstream command send failed: {}", err);
                                return;
                            }
                        }
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => return,
                    }
                }
            }

            match ws.read() {
                Ok(Message::Text(text)) => match self.role {
                    UpstreamRole::Video => video::handle_stream_message(&self.ctx, &text),
                    UpstreamRole::Control => control::handle_upstream_message(&self.ctx, &text),
                },
                Ok(Message::Close(_)) => return,
                Ok(_) => {}
                Err(tungstenite::Error::Io(err))
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut => {}
                Err(tungstenite::Error::ConnectionClosed)
                | Err(tungstenite::Error::AlreadyClosed) => return,
                Err(err) => {
                    log::warn!("upstream {} link read failed: {}", self.role.name(), err);
                    return;
                }
            }
        }
    }

    /// Losing the video link ends the open session: frames stopped coming,
    /// so nothing more can be persisted against it.
    fn on_disconnect(&self) {
        log::warn!("upstream {} link disconnected", self.role.name());
        if self.role != UpstreamRole::Video {
            return;
        }
        let Some(session_id) = self.ctx.session.clear() else {
            return;
        };
        let Ok(now) = now_s() else {
            log::error!("clock error while closing session {}", session_id);
            return;
        };
        let mut store = self.ctx.store.lock().expect("store poisoned");
        if let Err(err) = store.end_session(session_id, now) {
            log::error!("failed to close session {}: {}", session_id, err);
            return;
        }
        if let Err(err) = store.log_system_event(
            session_id,
            EVENT_SESSION_ENDED,
            "session closed: upstream video link lost",
            Severity::Warning,
        ) {
            log::error!("failed to log session close: {}", err);
        }
    }
}
