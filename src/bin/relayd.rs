//! relayd - sign-language translation relay daemon
//!
//! This daemon:
//! 1. Listens for UI WebSocket clients on /ws/video, /ws/control, /ws/device
//! 2. Dials the inference service's video and control channels and keeps
//!    them alive with a fixed-delay reconnect
//! 3. Fans frames, predictions, and status out to subscribed clients
//! 4. Bridges distance sensors to the UI and drives their displays
//! 5. Persists sessions, accepted translations, and system logs to SQLite

use anyhow::Result;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use sign_relay::config::RelaydConfig;
use sign_relay::relay::upstream::{CommandSink, UpstreamLink, UpstreamRole};
use sign_relay::relay::{RelayContext, RelayServer, SharedStore, Thresholds};
use sign_relay::storage::{SessionStore, SqliteSessionStore};
use sign_relay::DistanceRange;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = RelaydConfig::load()?;
    let mut store = SqliteSessionStore::open(&cfg.db_path)?;

    // The latest operator calibration overrides the config defaults.
    let thresholds = match store.latest_calibration()? {
        Some(cal) => {
            log::info!(
                "using calibration #{}: distance {}..{} cm, confidence {}",
                cal.id,
                cal.distance_min_cm,
                cal.distance_max_cm,
                cal.confidence_threshold
            );
            Thresholds {
                distance: DistanceRange::new(cal.distance_min_cm, cal.distance_max_cm),
                accept_confidence: cal.confidence_threshold,
            }
        }
        None => Thresholds {
            distance: cfg.distance,
            accept_confidence: cfg.accept_confidence,
        },
    };

    let store: SharedStore = Arc::new(Mutex::new(store));
    let (commands, command_rx) = CommandSink::new();
    let ctx = RelayContext::new(store, thresholds, commands);

    let handle = RelayServer::new(&cfg.listen_addr, ctx.clone()).spawn()?;
    log::info!("relay listening on {}", handle.addr);
    log::info!("writing to {}", cfg.db_path);

    let shutdown = handle.shutdown_flag();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            log::info!("shutdown requested");
            shutdown.store(true, Ordering::SeqCst);
        })?;
    }

    let video_link = UpstreamLink::new(
        UpstreamRole::Video,
        &cfg.upstream.video_url,
        ctx.clone(),
        cfg.upstream.reconnect_delay,
    )
    .spawn(shutdown.clone(), None);
    let control_link = UpstreamLink::new(
        UpstreamRole::Control,
        &cfg.upstream.control_url,
        ctx.clone(),
        cfg.upstream.reconnect_delay,
    )
    .spawn(shutdown.clone(), Some(command_rx));

    if video_link.join().is_err() {
        log::error!("upstream video link thread panicked");
    }
    if control_link.join().is_err() {
        log::error!("upstream control link thread panicked");
    }
    handle.stop()?;
    log::info!("relayd stopped");
    Ok(())
}
