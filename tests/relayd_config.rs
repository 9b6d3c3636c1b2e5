use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use sign_relay::config::RelaydConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SIGN_RELAY_CONFIG",
        "SIGN_RELAY_DB_PATH",
        "SIGN_RELAY_LISTEN_ADDR",
        "SIGN_RELAY_UPSTREAM_VIDEO",
        "SIGN_RELAY_UPSTREAM_CONTROL",
        "SIGN_RELAY_RECONNECT_MS",
        "SIGN_RELAY_DISTANCE_MIN",
        "SIGN_RELAY_DISTANCE_MAX",
        "SIGN_RELAY_CONFIDENCE",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_apply_without_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = RelaydConfig::load().expect("load config");
    assert_eq!(cfg.db_path, "sign_relay.db");
    assert_eq!(cfg.listen_addr, "127.0.0.1:8766");
    assert_eq!(cfg.upstream.video_url, "ws://127.0.0.1:8000/ws/video");
    assert_eq!(cfg.upstream.control_url, "ws://127.0.0.1:8000/ws/control");
    assert_eq!(cfg.upstream.reconnect_delay, Duration::from_millis(3000));
    assert_eq!(cfg.distance.min_cm, 50.0);
    assert_eq!(cfg.distance.max_cm, 150.0);
    assert_eq!(cfg.accept_confidence, 0.7);

    clear_env();
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "db_path": "relay_prod.db",
        "listen_addr": "0.0.0.0:9100",
        "upstream": {
            "video_url": "ws://inference.local:8000/ws/video",
            "control_url": "ws://inference.local:8000/ws/control",
            "reconnect_ms": 5000
        },
        "thresholds": {
            "distance_min_cm": 40.0,
            "distance_max_cm": 160.0,
            "confidence": 0.8
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("SIGN_RELAY_CONFIG", file.path());
    std::env::set_var("SIGN_RELAY_DB_PATH", "relay_override.db");
    std::env::set_var("SIGN_RELAY_DISTANCE_MAX", "170");

    let cfg = RelaydConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "relay_override.db");
    assert_eq!(cfg.listen_addr, "0.0.0.0:9100");
    assert_eq!(cfg.upstream.video_url, "ws://inference.local:8000/ws/video");
    assert_eq!(cfg.upstream.reconnect_delay, Duration::from_millis(5000));
    assert_eq!(cfg.distance.min_cm, 40.0);
    assert_eq!(cfg.distance.max_cm, 170.0);
    assert_eq!(cfg.accept_confidence, 0.8);

    clear_env();
}

#[test]
fn invalid_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SIGN_RELAY_DISTANCE_MIN", "200");
    std::env::set_var("SIGN_RELAY_DISTANCE_MAX", "100");
    assert!(RelaydConfig::load().is_err());
    clear_env();

    std::env::set_var("SIGN_RELAY_CONFIDENCE", "1.5");
    assert!(RelaydConfig::load().is_err());
    clear_env();

    std::env::set_var("SIGN_RELAY_RECONNECT_MS", "0");
    assert!(RelaydConfig::load().is_err());
    clear_env();

    std::env::set_var("SIGN_RELAY_UPSTREAM_VIDEO", "http://not-a-websocket");
    assert!(RelaydConfig::load().is_err());
    clear_env();
}
