//! calibrate - show or update the relay's operator calibration
//!
//! With no update flags this prints the active calibration. Any combination
//! of --distance-min, --distance-max, and --confidence writes a new
//! calibration row; unspecified values carry over from the previous one.
//! relayd picks the new row up on its next start.

use anyhow::Result;
use clap::Parser;

use sign_relay::storage::{SessionStore, SqliteSessionStore};
use sign_relay::{now_s, DistanceRange};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the relay database.
    #[arg(long, env = "SIGN_RELAY_DB_PATH", default_value = "sign_relay.db")]
    db_path: String,

    /// New near bound of the accepted distance range, in centimeters.
    #[arg(long)]
    distance_min: Option<f64>,

    /// New far bound of the accepted distance range, in centimeters.
    #[arg(long)]
    distance_max: Option<f64>,

    /// New confidence threshold for persisting translations (0.0..=1.0).
    #[arg(long)]
    confidence: Option<f64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut store = SqliteSessionStore::open(&args.db_path)?;
    let current = store.latest_calibration()?;

    let updating =
        args.distance_min.is_some() || args.distance_max.is_some() || args.confidence.is_some();
    if !updating {
        match current {
            Some(cal) => println!(
                "calibration #{}: distance {}..{} cm, confidence {}, updated at {}",
                cal.id,
                cal.distance_min_cm,
                cal.distance_max_cm,
                cal.confidence_threshold,
                cal.updated_at_s
            ),
            None => {
                let defaults = DistanceRange::default();
                println!(
                    "no calibration saved; relayd uses defaults: distance {}..{} cm, confidence 0.7",
                    defaults.min_cm, defaults.max_cm
                );
            }
        }
        return Ok(());
    }

    let defaults = DistanceRange::default();
    let (base_min, base_max, base_confidence) = match &current {
        Some(cal) => (
            cal.distance_min_cm,
            cal.distance_max_cm,
            cal.confidence_threshold,
        ),
        None => (defaults.min_cm, defaults.max_cm, 0.7),
    };

    let cal = store.save_calibration(
        args.distance_min.unwrap_or(base_min),
        args.distance_max.unwrap_or(base_max),
        args.confidence.unwrap_or(base_confidence),
        now_s()?,
    )?;
    println!(
        "saved calibration #{}: distance {}..{} cm, confidence {}",
        cal.id, cal.distance_min_cm, cal.distance_max_cm, cal.confidence_threshold
    );
    println!("restart relayd to apply");
    Ok(())
}
