//! device_sim - synthetic distance sensor for end-to-end runs
//!
//! Connects to relayd's device channel and walks a distance reading up and
//! down like a signer shifting in front of the camera, printing whatever the
//! relay pushes back to the display.

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::net::TcpStream;
use std::time::{Duration, Instant};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Device channel URL of a running relayd.
    #[arg(long, default_value = "ws://127.0.0.1:8766/ws/device")]
    url: String,

    /// How long to run, in seconds.
    #[arg(long, default_value_t = 10)]
    seconds: u64,

    /// Milliseconds between readings.
    #[arg(long, default_value_t = 500)]
    interval_ms: u64,

    /// Starting distance in centimeters.
    #[arg(long, default_value_t = 100.0)]
    start_cm: f64,

    /// Optional deterministic seed for the walk.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let (mut ws, _response) =
        tungstenite::connect(args.url.as_str()).context("connect to device channel")?;
    if let MaybeTlsStream::Plain(stream) = ws.get_ref() {
        stream.set_read_timeout(Some(Duration::from_millis(100)))?;
    }
    log::info!("connected to {}", args.url);

    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    let mut distance = args.start_cm;
    while Instant::now() < deadline {
        distance = (distance + rng.gen_range(-20.0..20.0)).clamp(5.0, 400.0);
        let reading = json!({ "type": "distance", "value": (distance * 10.0).round() / 10.0 });
        ws.send(Message::Text(reading.to_string()))
            .context("send distance reading")?;
        log::info!("sent distance {:.1} cm", distance);

        drain_display(&mut ws);
        std::thread::sleep(Duration::from_millis(args.interval_ms));
    }

    let alert = json!({ "type": "alert", "message": "simulation finished" });
    ws.send(Message::Text(alert.to_string()))
        .context("send alert")?;
    let _ = ws.close(None);
    log::info!("done");
    Ok(())
}

/// Print everything the relay pushed since the last reading.
fn drain_display(ws: &mut WebSocket<MaybeTlsStream<TcpStream>>) {
    loop {
        match ws.read() {
            Ok(Message::Text(text)) => log::info!("display <- {}", text),
            Ok(Message::Close(_)) => return,
            Ok(_) => {}
            Err(tungstenite::Error::Io(err))
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                return;
            }
            Err(err) => {
                log::warn!("read failed: {}", err);
                return;
            }
        }
    }
}
