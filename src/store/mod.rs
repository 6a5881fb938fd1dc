//! Durable, single-slot-per-session persistence for registration records.
//!
//! Every write is atomic per session and readers only ever see a whole
//! record. Implementations: [`SqliteStore`] (durable) and [`MemoryStore`]
//! (tests, embedding).

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::registration::{RecordPatch, RegistrationRecord, SessionId};

#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Replace the session's record.
    async fn put(&self, session: &SessionId, record: &RegistrationRecord) -> Result<()>;

    async fn get(&self, session: &SessionId) -> Result<Option<RegistrationRecord>>;

    /// Merge `patch` into the stored record and set `updated_at` to `now`.
    /// Fails if the session has no record or the patch breaks a record
    /// invariant.
    async fn update(
        &self,
        session: &SessionId,
        patch: RecordPatch,
        now: DateTime<Utc>,
    ) -> Result<RegistrationRecord>;

    async fn clear(&self, session: &SessionId) -> Result<()>;

    /// All stored records, ordered by session id.
    async fn list(&self) -> Result<Vec<(SessionId, RegistrationRecord)>>;
}
