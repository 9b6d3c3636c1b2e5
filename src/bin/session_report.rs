//! session_report - dump recorded sessions with their translations and logs

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use sign_relay::storage::{
    SessionRecord, SessionStore, SqliteSessionStore, SystemLogRecord, TranslationRecord,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the relay database.
    #[arg(long, env = "SIGN_RELAY_DB_PATH", default_value = "sign_relay.db")]
    db_path: String,

    /// Report only this session id.
    #[arg(long)]
    session_id: Option<i64>,

    /// Maximum number of sessions to report, newest first.
    #[arg(long, default_value_t = 20)]
    limit: usize,

    /// Output file path. Defaults to stdout.
    #[arg(long)]
    output: Option<String>,
}

#[derive(Serialize)]
struct SessionReport {
    session: SessionRecord,
    translations: Vec<TranslationRecord>,
    logs: Vec<SystemLogRecord>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut store = SqliteSessionStore::open(&args.db_path)?;
    let sessions = store.list_sessions(args.limit)?;

    let mut reports = Vec::new();
    for session in sessions {
        if let Some(wanted) = args.session_id {
            if session.id != wanted {
                continue;
            }
        }
        let translations = store.session_translations(session.id)?;
        let logs = store.session_logs(session.id)?;
        reports.push(SessionReport {
            session,
            translations,
            logs,
        });
    }

    let json = serde_json::to_string_pretty(&reports)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, &json).with_context(|| format!("write report to {}", path))?;
            log::info!("wrote {} session(s) to {}", reports.len(), path);
        }
        None => println!("{}", json),
    }
    Ok(())
}
