//! Relay listener and shared connection state.
//!
//! One TCP listener serves three WebSocket paths:
//!
//! - `/ws/video`: UI clients subscribing to frames and predictions
//! - `/ws/control`: UI clients issuing commands and receiving status
//! - `/ws/device`: distance sensors reporting readings and alerts
//!
//! The accept loop is non-blocking with a short idle sleep and an atomic
//! shutdown flag; each accepted connection runs on its own thread. The only
//! cross-thread state is the mutex-guarded registries below plus the shared
//! store and active-session cell.

pub mod control;
pub mod device;
pub mod message;
pub mod upstream;
pub mod video;

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tungstenite::handshake::server::{Request, Response};
use tungstenite::{Message, WebSocket};

use crate::storage::SessionStore;
use crate::DistanceRange;
use upstream::CommandSink;

pub const VIDEO_PATH: &str = "/ws/video";
pub const CONTROL_PATH: &str = "/ws/control";
pub const DEVICE_PATH: &str = "/ws/device";

const ACCEPT_IDLE: Duration = Duration::from_millis(50);
const READ_TIMEOUT: Duration = Duration::from_millis(50);

pub type SharedStore = Arc<Mutex<dyn SessionStore + Send>>;

/// Acceptance thresholds applied by the relay: the distance range for the
/// device channel and the confidence bar for persisting translations.
#[derive(Clone, Copy, Debug)]
pub struct Thresholds {
    pub distance: DistanceRange,
    pub accept_confidence: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            distance: DistanceRange::default(),
            accept_confidence: 0.7,
        }
    }
}

// -------------------- Connection registry --------------------

/// Connected peers of one channel, keyed by origin, each holding the
/// sending half of that connection's outbound queue.
///
/// Keying by network origin means multiple devices behind one address
/// collide; the last connection wins. Documented limitation.
#[derive(Clone)]
pub struct Registry {
    name: &'static str,
    inner: Arc<Mutex<HashMap<String, mpsc::Sender<String>>>>,
}

impl Registry {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn register(&self, key: &str, sender: mpsc::Sender<String>) {
        let mut map = self.inner.lock().expect("registry poisoned");
        if map.insert(key.to_string(), sender).is_some() {
            log::warn!("{} registry: {} reconnected, replacing entry", self.name, key);
        }
    }

    pub fn unregister(&self, key: &str) {
        self.inner.lock().expect("registry poisoned").remove(key);
    }

    /// Queue a message to every registered peer. Peers whose queue is gone
    /// are dropped from the registry. Returns the number of deliveries.
    pub fn broadcast(&self, text: &str) -> usize {
        let mut map = self.inner.lock().expect("registry poisoned");
        let mut delivered = 0;
        map.retain(|key, sender| match sender.send(text.to_string()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                log::warn!("{} registry: dropping dead connection {}", self.name, key);
                false
            }
        });
        delivered
    }

    /// Queue a message to one peer. Returns false if the peer is unknown or
    /// its connection is gone; the message is dropped, never retried.
    pub fn send_to(&self, key: &str, text: &str) -> bool {
        let mut map = self.inner.lock().expect("registry poisoned");
        match map.get(key) {
            Some(sender) => {
                if sender.send(text.to_string()).is_ok() {
                    true
                } else {
                    log::warn!("{} registry: dropping dead connection {}", self.name, key);
                    map.remove(key);
                    false
                }
            }
            None => {
                log::warn!("{} registry: no connection for {}, message dropped", self.name, key);
                false
            }
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("registry poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// -------------------- Active session --------------------

/// The session currently open for persistence, if any. Shared between the
/// control handler (start/stop commands) and the video handler (saving
/// accepted translations).
#[derive(Clone, Default)]
pub struct ActiveSession {
    inner: Arc<Mutex<Option<i64>>>,
}

impl ActiveSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, session_id: i64) {
        *self.inner.lock().expect("session cell poisoned") = Some(session_id);
    }

    pub fn clear(&self) -> Option<i64> {
        self.inner.lock().expect("session cell poisoned").take()
    }

    pub fn current(&self) -> Option<i64> {
        *self.inner.lock().expect("session cell poisoned")
    }
}

// -------------------- Relay context --------------------

/// Everything a channel handler needs, shared across connection threads.
pub struct RelayContext {
    pub video_clients: Registry,
    pub control_clients: Registry,
    pub device_clients: Registry,
    pub session: ActiveSession,
    pub store: SharedStore,
    pub thresholds: Thresholds,
    pub commands: CommandSink,
}

impl RelayContext {
    pub fn new(store: SharedStore, thresholds: Thresholds, commands: CommandSink) -> Arc<Self> {
        Arc::new(Self {
            video_clients: Registry::new("video"),
            control_clients: Registry::new("control"),
            device_clients: Registry::new("device"),
            session: ActiveSession::new(),
            store,
            thresholds,
            commands,
        })
    }
}

// -------------------- Listener --------------------

pub struct RelayServer {
    addr: String,
    ctx: Arc<RelayContext>,
}

#[derive(Debug)]
pub struct RelayHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl RelayHandle {
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("relay listener thread panicked"))?;
        }
        Ok(())
    }
}

impl RelayServer {
    pub fn new(addr: &str, ctx: Arc<RelayContext>) -> Self {
        Self {
            addr: addr.to_string(),
            ctx,
        }
    }

    pub fn spawn(self) -> Result<RelayHandle> {
        let listener = TcpListener::bind(&self.addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let ctx = self.ctx;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_listener(listener, ctx, shutdown_thread) {
                log::error!("relay listener stopped: {}", err);
            }
        });

        Ok(RelayHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_listener(
    listener: TcpListener,
    ctx: Arc<RelayContext>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let ctx = ctx.clone();
                let shutdown = shutdown.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, peer, ctx, shutdown) {
                        log::warn!("connection from {} ended with error: {}", peer, err);
                    }
                });
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_IDLE);
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<RelayContext>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    // The accepted socket must block during the handshake; reads afterwards
    // use a short timeout so the outbound queue keeps draining.
    stream.set_nonblocking(false)?;

    let mut path = String::new();
    let ws = tungstenite::accept_hdr(stream, |req: &Request, resp: Response| {
        path = req.uri().path().to_string();
        Ok(resp)
    })
    .map_err(|err| anyhow!("websocket handshake with {} failed: {}", peer, err))?;
    ws.get_ref().set_read_timeout(Some(READ_TIMEOUT))?;

    match path.as_str() {
        VIDEO_PATH => run_subscriber(ws, peer, &ctx.video_clients, &shutdown),
        CONTROL_PATH => control::run_control_connection(ws, peer, &ctx, &shutdown),
        DEVICE_PATH => device::run_device_connection(ws, peer, &ctx, &shutdown),
        other => {
            log::warn!("rejecting connection from {} to unknown path {}", peer, other);
            let mut ws = ws;
            let _ = ws.close(None);
            let _ = ws.flush();
            Ok(())
        }
    }
}

/// Video clients only subscribe; anything they send is noise.
fn run_subscriber(
    ws: WebSocket<TcpStream>,
    peer: SocketAddr,
    registry: &Registry,
    shutdown: &AtomicBool,
) -> Result<()> {
    let key = peer.to_string();
    let (tx, rx) = mpsc::channel();
    registry.register(&key, tx);
    log::info!("video client connected: {}", key);
    connection_loop(ws, rx, shutdown, |text| {
        log::debug!("ignoring message from video client {}: {}", key, text);
    });
    registry.unregister(&key);
    log::info!("video client disconnected: {}", key);
    Ok(())
}

/// Shared per-connection loop: drain the outbound queue, then poll for one
/// inbound frame. Malformed payloads are the handler's problem; socket-level
/// errors end the connection.
pub(crate) fn connection_loop<F: FnMut(&str)>(
    mut ws: WebSocket<TcpStream>,
    outbound: mpsc::Receiver<String>,
    shutdown: &AtomicBool,
    mut on_text: F,
) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            let _ = ws.close(None);
            let _ = ws.flush();
            return;
        }

        loop {
            match outbound.try_recv() {
                Ok(text) => {
                    if let Err(err) = ws.send(Message::Text(text)) {
                        log::warn!("outbound send failed: {}", err);
                        return;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }

        match ws.read() {
            Ok(Message::Text(text)) => on_text(&text),
            Ok(Message::Close(_)) => return,
            Ok(_) => {}
            Err(tungstenite::Error::Io(err))
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut => {}
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                return;
            }
            Err(err) => {
                log::warn!("connection read failed: {}", err);
                return;
            }
        }
    }
}
