use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::RegistrationStore;
use crate::registration::{RecordPatch, RegistrationRecord, SessionId};

/// SQLite-backed record store.
///
/// The connection sits behind `Arc<Mutex>` and every call runs on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .context("Failed to enable WAL mode")?;
        Self::init(conn)
    }

    /// In-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS registrations (
                session_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                phase TEXT NOT NULL,
                record TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_registrations_phase ON registrations(phase);
            ",
        )
        .context("Failed to create registrations table")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| anyhow::anyhow!("Store lock poisoned: {}", e))?;
            f(&mut guard)
        })
        .await
        .context("Store task panicked")?
    }
}

fn read_record(conn: &Connection, session: &str) -> Result<Option<RegistrationRecord>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT record FROM registrations WHERE session_id = ?1",
            params![session],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to read registration")?;

    raw.map(|json| {
        serde_json::from_str(&json)
            .with_context(|| format!("Corrupt registration record for session '{}'", session))
    })
    .transpose()
}

fn write_record(conn: &Connection, session: &str, record: &RegistrationRecord) -> Result<()> {
    let json = serde_json::to_string(record).context("Failed to serialize registration")?;
    conn.execute(
        "INSERT INTO registrations (session_id, name, phase, record, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(session_id) DO UPDATE SET
            name = excluded.name,
            phase = excluded.phase,
            record = excluded.record,
            updated_at = excluded.updated_at",
        params![
            session,
            record.name_label,
            record.phase.as_str(),
            json,
            record.updated_at.to_rfc3339()
        ],
    )
    .context("Failed to write registration")?;
    Ok(())
}

#[async_trait]
impl RegistrationStore for SqliteStore {
    async fn put(&self, session: &SessionId, record: &RegistrationRecord) -> Result<()> {
        let session = session.as_str().to_string();
        let record = record.clone();
        self.call(move |conn| write_record(conn, &session, &record))
            .await
    }

    async fn get(&self, session: &SessionId) -> Result<Option<RegistrationRecord>> {
        let session = session.as_str().to_string();
        self.call(move |conn| read_record(conn, &session)).await
    }

    async fn update(
        &self,
        session: &SessionId,
        patch: RecordPatch,
        now: DateTime<Utc>,
    ) -> Result<RegistrationRecord> {
        let session = session.as_str().to_string();
        self.call(move |conn| {
            let tx = conn.transaction().context("Failed to begin transaction")?;
            let mut record = read_record(&tx, &session)?.with_context(|| {
                format!("No registration stored for session '{}'", session)
            })?;
            record.apply(patch, now)?;
            write_record(&tx, &session, &record)?;
            tx.commit().context("Failed to commit registration update")?;
            Ok(record)
        })
        .await
    }

    async fn clear(&self, session: &SessionId) -> Result<()> {
        let session = session.as_str().to_string();
        self.call(move |conn| {
            conn.execute(
                "DELETE FROM registrations WHERE session_id = ?1",
                params![session],
            )
            .context("Failed to clear registration")?;
            Ok(())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<(SessionId, RegistrationRecord)>> {
        self.call(|conn| {
            let mut stmt = conn
                .prepare("SELECT session_id, record FROM registrations ORDER BY session_id")
                .context("Failed to prepare registration listing")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .context("Failed to list registrations")?;

            let mut out = Vec::new();
            for row in rows {
                let (session, json) = row.context("Failed to read registration row")?;
                let record: RegistrationRecord = serde_json::from_str(&json).with_context(|| {
                    format!("Corrupt registration record for session '{}'", session)
                })?;
                out.push((SessionId::new(session), record));
            }
            Ok(out)
        })
        .await
    }
}
