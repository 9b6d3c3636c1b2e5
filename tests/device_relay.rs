//! End-to-end relay tests over real loopback sockets.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use sign_relay::relay::upstream::{CommandSink, UpstreamLink, UpstreamRole};
use sign_relay::relay::{RelayContext, RelayServer, Thresholds};
use sign_relay::storage::InMemorySessionStore;

type ClientSocket = WebSocket<MaybeTlsStream<TcpStream>>;

fn spawn_relay() -> (Arc<RelayContext>, sign_relay::relay::RelayHandle) {
    let ctx = RelayContext::new(
        Arc::new(Mutex::new(InMemorySessionStore::new())),
        Thresholds::default(),
        CommandSink::detached(),
    );
    let handle = RelayServer::new("127.0.0.1:0", ctx.clone())
        .spawn()
        .expect("spawn relay");
    (ctx, handle)
}

fn connect(addr: SocketAddr, path: &str) -> ClientSocket {
    let url = format!("ws://{}{}", addr, path);
    let (ws, _response) = tungstenite::connect(url.as_str()).expect("connect");
    if let MaybeTlsStream::Plain(stream) = ws.get_ref() {
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("set read timeout");
    }
    // Give the relay thread a beat to register the connection.
    std::thread::sleep(Duration::from_millis(100));
    ws
}

fn read_text(ws: &mut ClientSocket) -> String {
    loop {
        match ws.read() {
            Ok(Message::Text(text)) => return text,
            Ok(Message::Close(_)) => panic!("connection closed while waiting for text"),
            Ok(_) => continue,
            Err(err) => panic!("read failed: {}", err),
        }
    }
}

fn read_json(ws: &mut ClientSocket) -> serde_json::Value {
    serde_json::from_str(&read_text(ws)).expect("valid json")
}

#[test]
fn device_distance_round_trip() {
    let (_ctx, handle) = spawn_relay();
    let mut control = connect(handle.addr, "/ws/control");
    let mut device = connect(handle.addr, "/ws/device");

    let greeting = read_json(&mut device);
    assert_eq!(greeting["type"], "status");
    assert_eq!(greeting["message"], "CONECTADO");

    for (value, expected) in [
        ("200", "ACERCARSE"),
        ("20", "ALEJARSE"),
        ("50", "DISTANCIA OK"),
        ("150", "DISTANCIA OK"),
        ("87.5", "DISTANCIA OK"),
    ] {
        device
            .send(Message::Text(format!(
                r#"{{"type":"distance","value":{}}}"#,
                value
            )))
            .expect("send distance");
        assert_eq!(read_text(&mut device), expected, "value {}", value);

        let update = read_json(&mut control);
        assert_eq!(update["type"], "distance_update");
        assert_eq!(update["status"], expected);
    }

    handle.stop().expect("stop relay");
}

#[test]
fn device_alert_reaches_ui_only() {
    let (_ctx, handle) = spawn_relay();
    let mut control = connect(handle.addr, "/ws/control");
    let mut device = connect(handle.addr, "/ws/device");
    let _greeting = read_json(&mut device);

    device
        .send(Message::Text(
            r#"{"type":"alert","message":"sensor blocked"}"#.to_string(),
        ))
        .expect("send alert");

    let alert = read_json(&mut control);
    assert_eq!(alert["type"], "device_alert");
    assert_eq!(alert["message"], "sensor blocked");

    // The device gets no reply for an alert; the next reply it sees is for
    // the following distance reading.
    device
        .send(Message::Text(
            r#"{"type":"distance","value":100}"#.to_string(),
        ))
        .expect("send distance");
    assert_eq!(read_text(&mut device), "DISTANCIA OK");

    handle.stop().expect("stop relay");
}

#[test]
fn session_commands_over_control_channel() {
    let (ctx, handle) = spawn_relay();
    let mut control = connect(handle.addr, "/ws/control");

    control
        .send(Message::Text(r#"{"command":"start_session"}"#.to_string()))
        .expect("send start");
    let started = read_json(&mut control);
    assert_eq!(started["type"], "session_started");
    let session_id = started["session_id"].as_i64().expect("session id");
    assert_eq!(ctx.session.current(), Some(session_id));

    control
        .send(Message::Text(r#"{"command":"stop_session"}"#.to_string()))
        .expect("send stop");
    let stopped = read_json(&mut control);
    assert_eq!(stopped["type"], "session_stopped");
    assert_eq!(ctx.session.current(), None);

    let mut store = ctx.store.lock().unwrap();
    let sessions = store.list_sessions(10).unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].end_time_s.is_some());
    drop(store);

    handle.stop().expect("stop relay");
}

#[test]
fn unknown_path_is_closed_after_handshake() {
    let (_ctx, handle) = spawn_relay();
    let url = format!("ws://{}/ws/nope", handle.addr);
    let (mut ws, _response) = tungstenite::connect(url.as_str()).expect("connect");
    if let MaybeTlsStream::Plain(stream) = ws.get_ref() {
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("set read timeout");
    }

    let closed = loop {
        match ws.read() {
            Ok(Message::Close(_)) => break true,
            Ok(_) => continue,
            // Any read error here means the relay tore the connection down.
            Err(_) => break true,
        }
    };
    assert!(closed);

    handle.stop().expect("stop relay");
}

#[test]
fn upstream_frames_fan_out_and_persist() {
    let (ctx, handle) = spawn_relay();

    // Stand in for the inference service: accept the relay's dial-out.
    let upstream_listener = TcpListener::bind("127.0.0.1:0").expect("bind upstream");
    let upstream_addr = upstream_listener.local_addr().expect("upstream addr");
    let shutdown = handle.shutdown_flag();
    let link = UpstreamLink::new(
        UpstreamRole::Video,
        &format!("ws://{}/ws/video", upstream_addr),
        ctx.clone(),
        Duration::from_millis(3000),
    )
    .spawn(shutdown.clone(), None);

    let (stream, _) = upstream_listener.accept().expect("accept relay dial");
    let mut upstream = tungstenite::accept(stream).expect("upstream handshake");

    let mut video_client = connect(handle.addr, "/ws/video");

    let session_id = {
        let mut store = ctx.store.lock().unwrap();
        store.create_session(1000).unwrap()
    };
    ctx.session.set(session_id);

    upstream
        .send(Message::Text(
            r#"{"type":"video_frame","prediction":"HOLA","confidence":0.85}"#.to_string(),
        ))
        .expect("push frame");

    let frame = read_json(&mut video_client);
    assert_eq!(frame["type"], "video_frame");
    assert_eq!(frame["prediction"], "HOLA");
    assert_eq!(frame["translation_saved"], true);

    {
        let mut store = ctx.store.lock().unwrap();
        let translations = store.session_translations(session_id).unwrap();
        assert_eq!(translations.len(), 1);
        assert_eq!(translations[0].text_output, "HOLA");
    }

    shutdown.store(true, Ordering::SeqCst);
    let _ = link.join();
    handle.stop().expect("stop relay");
}
