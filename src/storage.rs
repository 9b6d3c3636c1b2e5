//! Session persistence.
//!
//! Four tables: sessions, translations, system_logs, calibrations.
//! Translations and system logs carry an enforced foreign key to their
//! session. All timestamps are whole seconds since the Unix epoch.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::Severity;

pub trait SessionStore {
    /// Open a new session. Returns its id.
    fn create_session(&mut self, start_time_s: u64) -> Result<i64>;

    /// Close a session. The end time must not precede the start time.
    fn end_session(&mut self, session_id: i64, end_time_s: u64) -> Result<()>;

    /// Record one accepted translation. Confidence must be in [0, 1].
    fn save_translation(
        &mut self,
        session_id: i64,
        text_output: &str,
        confidence: f64,
    ) -> Result<i64>;

    /// Record one system event against a session.
    fn log_system_event(
        &mut self,
        session_id: i64,
        event_type: &str,
        message: &str,
        severity: Severity,
    ) -> Result<i64>;

    /// Most recently saved calibration, if any.
    fn latest_calibration(&mut self) -> Result<Option<Calibration>>;

    /// Save a new calibration. The previous rows are kept; the latest wins.
    fn save_calibration(
        &mut self,
        distance_min_cm: f64,
        distance_max_cm: f64,
        confidence_threshold: f64,
        updated_at_s: u64,
    ) -> Result<Calibration>;

    fn list_sessions(&mut self, limit: usize) -> Result<Vec<SessionRecord>>;

    fn session_translations(&mut self, session_id: i64) -> Result<Vec<TranslationRecord>>;

    fn session_logs(&mut self, session_id: i64) -> Result<Vec<SystemLogRecord>>;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: i64,
    pub start_time_s: u64,
    pub end_time_s: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TranslationRecord {
    pub id: i64,
    pub session_id: i64,
    pub text_output: String,
    pub confidence: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemLogRecord {
    pub id: i64,
    pub session_id: i64,
    pub event_type: String,
    pub message: String,
    pub severity: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Calibration {
    pub id: i64,
    pub distance_min_cm: f64,
    pub distance_max_cm: f64,
    pub confidence_threshold: f64,
    pub updated_at_s: u64,
}

fn validate_confidence(confidence: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(anyhow!(
            "confidence {} out of range, expected 0.0..=1.0",
            confidence
        ));
    }
    Ok(())
}

fn validate_calibration(
    distance_min_cm: f64,
    distance_max_cm: f64,
    confidence_threshold: f64,
) -> Result<()> {
    if distance_min_cm < 0.0 || distance_max_cm < distance_min_cm {
        return Err(anyhow!(
            "calibration range {}..{} cm invalid, expected 0 <= min <= max",
            distance_min_cm,
            distance_max_cm
        ));
    }
    validate_confidence(confidence_threshold)
}

// -------------------- SQLite store --------------------

pub struct SqliteSessionStore {
    conn: Connection,
}

impl SqliteSessionStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS sessions (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              start_time INTEGER NOT NULL,
              end_time INTEGER
            );

            CREATE TABLE IF NOT EXISTS translations (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              session_id INTEGER NOT NULL REFERENCES sessions(id),
              text_output TEXT NOT NULL,
              confidence REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS system_logs (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              session_id INTEGER NOT NULL REFERENCES sessions(id),
              event_type TEXT NOT NULL,
              message TEXT NOT NULL,
              severity TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS calibrations (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              distance_min_cm REAL NOT NULL,
              distance_max_cm REAL NOT NULL,
              confidence_threshold REAL NOT NULL,
              updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_translations_session ON translations(session_id);
            CREATE INDEX IF NOT EXISTS idx_system_logs_session ON system_logs(session_id);
            "#,
        )?;
        Ok(())
    }

    fn session_start(&self, session_id: i64) -> Result<u64> {
        let start: Option<i64> = self
            .conn
            .query_row(
                "SELECT start_time FROM sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        match start {
            Some(s) => Ok(s as u64),
            None => Err(anyhow!("session {} does not exist", session_id)),
        }
    }
}

impl SessionStore for SqliteSessionStore {
    fn create_session(&mut self, start_time_s: u64) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO sessions (start_time, end_time) VALUES (?1, NULL)",
            params![start_time_s as i64],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn end_session(&mut self, session_id: i64, end_time_s: u64) -> Result<()> {
        let start = self.session_start(session_id)?;
        if end_time_s < start {
            return Err(anyhow!(
                "session {} end time {} precedes start time {}",
                session_id,
                end_time_s,
                start
            ));
        }
        self.conn.execute(
            "UPDATE sessions SET end_time = ?1 WHERE id = ?2",
            params![end_time_s as i64, session_id],
        )?;
        Ok(())
    }

    fn save_translation(
        &mut self,
        session_id: i64,
        text_output: &str,
        confidence: f64,
    ) -> Result<i64> {
        validate_confidence(confidence)?;
        self.conn.execute(
            "INSERT INTO translations (session_id, text_output, confidence) VALUES (?1, ?2, ?3)",
            params![session_id, text_output, confidence],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn log_system_event(
        &mut self,
        session_id: i64,
        event_type: &str,
        message: &str,
        severity: Severity,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO system_logs (session_id, event_type, message, severity) \
             VALUES (?1, ?2, ?3, ?4)",
            params![session_id, event_type, message, severity.as_str()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn latest_calibration(&mut self) -> Result<Option<Calibration>> {
        let cal = self
            .conn
            .query_row(
                "SELECT id, distance_min_cm, distance_max_cm, confidence_threshold, updated_at \
                 FROM calibrations ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok(Calibration {
                        id: row.get(0)?,
                        distance_min_cm: row.get(1)?,
                        distance_max_cm: row.get(2)?,
                        confidence_threshold: row.get(3)?,
                        updated_at_s: row.get::<_, i64>(4)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(cal)
    }

    fn save_calibration(
        &mut self,
        distance_min_cm: f64,
        distance_max_cm: f64,
        confidence_threshold: f64,
        updated_at_s: u64,
    ) -> Result<Calibration> {
        validate_calibration(distance_min_cm, distance_max_cm, confidence_threshold)?;
        self.conn.execute(
            "INSERT INTO calibrations (distance_min_cm, distance_max_cm, confidence_threshold, updated_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                distance_min_cm,
                distance_max_cm,
                confidence_threshold,
                updated_at_s as i64
            ],
        )?;
        Ok(Calibration {
            id: self.conn.last_insert_rowid(),
            distance_min_cm,
            distance_max_cm,
            confidence_threshold,
            updated_at_s,
        })
    }

    fn list_sessions(&mut self, limit: usize) -> Result<Vec<SessionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, start_time, end_time FROM sessions ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(SessionRecord {
                id: row.get(0)?,
                start_time_s: row.get::<_, i64>(1)? as u64,
                end_time_s: row.get::<_, Option<i64>>(2)?.map(|t| t as u64),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn session_translations(&mut self, session_id: i64) -> Result<Vec<TranslationRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, text_output, confidence FROM translations \
             WHERE session_id = ?1 ORDER BY id DESC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok(TranslationRecord {
                id: row.get(0)?,
                session_id: row.get(1)?,
                text_output: row.get(2)?,
                confidence: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn session_logs(&mut self, session_id: i64) -> Result<Vec<SystemLogRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, event_type, message, severity FROM system_logs \
             WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok(SystemLogRecord {
                id: row.get(0)?,
                session_id: row.get(1)?,
                event_type: row.get(2)?,
                message: row.get(3)?,
                severity: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

// -------------------- In-memory store (tests, device_sim) --------------------

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Vec<SessionRecord>,
    translations: Vec<TranslationRecord>,
    logs: Vec<SystemLogRecord>,
    calibrations: Vec<Calibration>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn session_mut(&mut self, session_id: i64) -> Result<&mut SessionRecord> {
        self.sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| anyhow!("session {} does not exist", session_id))
    }

    fn require_session(&self, session_id: i64) -> Result<()> {
        if self.sessions.iter().any(|s| s.id == session_id) {
            Ok(())
        } else {
            Err(anyhow!("session {} does not exist", session_id))
        }
    }
}

impl SessionStore for InMemorySessionStore {
    fn create_session(&mut self, start_time_s: u64) -> Result<i64> {
        let id = self.sessions.len() as i64 + 1;
        self.sessions.push(SessionRecord {
            id,
            start_time_s,
            end_time_s: None,
        });
        Ok(id)
    }

    fn end_session(&mut self, session_id: i64, end_time_s: u64) -> Result<()> {
        let session = self.session_mut(session_id)?;
        if end_time_s < session.start_time_s {
            return Err(anyhow!(
                "session {} end time {} precedes start time {}",
                session_id,
                end_time_s,
                session.start_time_s
            ));
        }
        session.end_time_s = Some(end_time_s);
        Ok(())
    }

    fn save_translation(
        &mut self,
        session_id: i64,
        text_output: &str,
        confidence: f64,
    ) -> Result<i64> {
        validate_confidence(confidence)?;
        self.require_session(session_id)?;
        let id = self.translations.len() as i64 + 1;
        self.translations.push(TranslationRecord {
            id,
            session_id,
            text_output: text_output.to_string(),
            confidence,
        });
        Ok(id)
    }

    fn log_system_event(
        &mut self,
        session_id: i64,
        event_type: &str,
        message: &str,
        severity: Severity,
    ) -> Result<i64> {
        self.require_session(session_id)?;
        let id = self.logs.len() as i64 + 1;
        self.logs.push(SystemLogRecord {
            id,
            session_id,
            event_type: event_type.to_string(),
            message: message.to_string(),
            severity: severity.as_str().to_string(),
        });
        Ok(id)
    }

    fn latest_calibration(&mut self) -> Result<Option<Calibration>> {
        Ok(self.calibrations.last().cloned())
    }

    fn save_calibration(
        &mut self,
        distance_min_cm: f64,
        distance_max_cm: f64,
        confidence_threshold: f64,
        updated_at_s: u64,
    ) -> Result<Calibration> {
        validate_calibration(distance_min_cm, distance_max_cm, confidence_threshold)?;
        let cal = Calibration {
            id: self.calibrations.len() as i64 + 1,
            distance_min_cm,
            distance_max_cm,
            confidence_threshold,
            updated_at_s,
        };
        self.calibrations.push(cal.clone());
        Ok(cal)
    }

    fn list_sessions(&mut self, limit: usize) -> Result<Vec<SessionRecord>> {
        Ok(self.sessions.iter().rev().take(limit).cloned().collect())
    }

    fn session_translations(&mut self, session_id: i64) -> Result<Vec<TranslationRecord>> {
        Ok(self
            .translations
            .iter()
            .rev()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect())
    }

    fn session_logs(&mut self, session_id: i64) -> Result<Vec<SystemLogRecord>> {
        Ok(self
            .logs
            .iter()
            .filter(|l| l.session_id == session_id)
            .cloned()
            .collect())
    }
}
