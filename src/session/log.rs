//! Append-only session log
//!
//! Every completed session is recorded with a monotonic sequence number
//! assigned at write time. Sequence numbers are strictly increasing and
//! gap-free for the life of the store; reopening continues from the
//! persisted maximum.

use crate::config::{ActivationMode, BackendKind};
use crate::error::StoreError;
use crate::sink::{OutputSink, SessionOutcome, SinkEvent};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// Longest derived title, in characters
const TITLE_MAX_CHARS: usize = 48;

/// One archived session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionLogEntry {
    /// Monotonic sequence number, assigned at write time
    pub seq: u64,
    /// Derived from the final text; "Session {seq}" when the text is empty
    pub title: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub mode: ActivationMode,
    pub backend: BackendKind,
}

/// Derive a log title from final text. None when there is nothing usable.
pub fn derive_title(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut title: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        // Cut at the last word boundary so titles read cleanly
        if let Some(idx) = title.rfind(' ') {
            title.truncate(idx);
        }
        title.push('…');
    }
    Some(title)
}

/// Persistence behind the session log
pub trait LogStore: Send + Sync {
    /// Persist one entry; `entry.seq` is already assigned
    fn append(&self, entry: &SessionLogEntry) -> Result<(), StoreError>;

    /// Highest persisted sequence number, if any
    fn max_seq(&self) -> Result<Option<u64>, StoreError>;

    /// Newest `limit` entries, most recent first
    fn recent(&self, limit: usize) -> Result<Vec<SessionLogEntry>, StoreError>;
}

/// The session log: assigns sequence numbers under a lock and persists
/// through the configured store.
pub struct SessionLog {
    store: Box<dyn LogStore>,
    next_seq: Mutex<u64>,
}

impl SessionLog {
    pub fn new(store: Box<dyn LogStore>) -> Result<Self, StoreError> {
        let next_seq = store.max_seq()?.map(|s| s + 1).unwrap_or(1);
        Ok(Self {
            store,
            next_seq: Mutex::new(next_seq),
        })
    }

    /// Append one completed session; returns the assigned sequence number.
    ///
    /// The lock serializes assignment and write, which is what keeps the
    /// sequence gap-free even if two completions ever raced.
    pub fn append(&self, outcome: &SessionOutcome) -> Result<u64, StoreError> {
        let mut next = self.next_seq.lock().unwrap();
        let seq = *next;

        let entry = SessionLogEntry {
            seq,
            title: derive_title(&outcome.text).unwrap_or_else(|| format!("Session {}", seq)),
            started_at: outcome.started_at,
            duration_ms: outcome.duration.as_millis() as u64,
            mode: outcome.mode,
            backend: outcome.backend,
        };

        self.store.append(&entry)?;
        *next += 1;

        tracing::debug!("Session logged: #{} {:?}", seq, entry.title);
        Ok(seq)
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<SessionLogEntry>, StoreError> {
        self.store.recent(limit)
    }
}

/// Sink adapter: archives each `Finalized` outcome. Failed and cancelled
/// sessions leave no entry.
pub struct SessionLogger {
    log: std::sync::Arc<SessionLog>,
}

impl SessionLogger {
    pub fn new(log: std::sync::Arc<SessionLog>) -> Self {
        Self { log }
    }
}

#[async_trait::async_trait]
impl OutputSink for SessionLogger {
    fn name(&self) -> &'static str {
        "session-logger"
    }

    async fn deliver(&self, event: SinkEvent) {
        if let SinkEvent::Finalized(outcome) = event {
            if let Err(e) = self.log.append(&outcome) {
                tracing::error!("Failed to append session log entry: {}", e);
            }
        }
    }
}

/// SQLite-backed store
pub struct SqliteLogStore {
    conn: Mutex<Connection>,
}

impl SqliteLogStore {
    /// Open or create the store under the given directory
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        let conn = Connection::open(dir.join("sessions.db"))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                seq INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL,
                mode TEXT NOT NULL,
                backend TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_started_at ON sessions(started_at DESC);
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn mode_from_str(s: &str) -> ActivationMode {
    match s {
        "tap" => ActivationMode::Tap,
        _ => ActivationMode::Hold,
    }
}

fn backend_from_str(s: &str) -> BackendKind {
    match s {
        "batch" => BackendKind::Batch,
        _ => BackendKind::Streaming,
    }
}

impl LogStore for SqliteLogStore {
    fn append(&self, entry: &SessionLogEntry) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO sessions (seq, title, started_at, duration_ms, mode, backend)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                entry.seq,
                entry.title,
                entry.started_at.timestamp_millis(),
                entry.duration_ms,
                entry.mode.to_string(),
                entry.backend.to_string(),
            ],
        )?;
        Ok(())
    }

    fn max_seq(&self) -> Result<Option<u64>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let max: Option<u64> = conn.query_row("SELECT MAX(seq) FROM sessions", [], |row| {
            row.get(0)
        })?;
        Ok(max)
    }

    fn recent(&self, limit: usize) -> Result<Vec<SessionLogEntry>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT seq, title, started_at, duration_ms, mode, backend
            FROM sessions ORDER BY seq DESC LIMIT ?1
            "#,
        )?;

        let rows = stmt.query_map(params![limit as u64], |row| {
            let started_ms: i64 = row.get(2)?;
            let mode: String = row.get(4)?;
            let backend: String = row.get(5)?;
            Ok(SessionLogEntry {
                seq: row.get(0)?,
                title: row.get(1)?,
                started_at: Utc
                    .timestamp_millis_opt(started_ms)
                    .single()
                    .unwrap_or_else(Utc::now),
                duration_ms: row.get(3)?,
                mode: mode_from_str(&mode),
                backend: backend_from_str(&backend),
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

/// In-memory store, used in tests and when logging is disabled
#[derive(Default)]
pub struct MemoryLogStore {
    entries: Mutex<Vec<SessionLogEntry>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogStore for MemoryLogStore {
    fn append(&self, entry: &SessionLogEntry) -> Result<(), StoreError> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    fn max_seq(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.entries.lock().unwrap().iter().map(|e| e.seq).max())
    }

    fn recent(&self, limit: usize) -> Result<Vec<SessionLogEntry>, StoreError> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }
}
