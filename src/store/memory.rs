use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::RegistrationStore;
use crate::registration::{RecordPatch, RegistrationRecord, SessionId};

/// Process-local store. Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<BTreeMap<SessionId, RegistrationRecord>>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating calls (`put`, `update`, `clear`) served so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistrationStore for MemoryStore {
    async fn put(&self, session: &SessionId, record: &RegistrationRecord) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|e| anyhow::anyhow!("Store lock poisoned: {}", e))?;
        records.insert(session.clone(), record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, session: &SessionId) -> Result<Option<RegistrationRecord>> {
        let records = self
            .records
            .read()
            .map_err(|e| anyhow::anyhow!("Store lock poisoned: {}", e))?;
        Ok(records.get(session).cloned())
    }

    async fn update(
        &self,
        session: &SessionId,
        patch: RecordPatch,
        now: DateTime<Utc>,
    ) -> Result<RegistrationRecord> {
        let mut records = self
            .records
            .write()
            .map_err(|e| anyhow::anyhow!("Store lock poisoned: {}", e))?;
        let current = records
            .get(session)
            .with_context(|| format!("No registration stored for session '{}'", session))?;

        // Apply to a copy so a rejected patch leaves the stored record intact.
        let mut next = current.clone();
        next.apply(patch, now)?;
        records.insert(session.clone(), next.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(next)
    }

    async fn clear(&self, session: &SessionId) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|e| anyhow::anyhow!("Store lock poisoned: {}", e))?;
        records.remove(session);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(SessionId, RegistrationRecord)>> {
        let records = self
            .records
            .read()
            .map_err(|e| anyhow::anyhow!("Store lock poisoned: {}", e))?;
        Ok(records
            .iter()
            .map(|(session, record)| (session.clone(), record.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::{Founder, Phase};
    use alloy_primitives::{Address, B256};

    fn record() -> RegistrationRecord {
        let now = Utc::now();
        RegistrationRecord {
            name_label: "acme".into(),
            predicted_owner_address: Address::repeat_byte(9),
            founders: vec![Founder {
                address: Address::repeat_byte(1),
                equity_bps: 10_000,
                role: String::new(),
            }],
            threshold: 1,
            secret: B256::repeat_byte(7),
            salt_nonce: "1".into(),
            duration_secs: 31_536_000,
            phase: Phase::Creating,
            failed_at: None,
            ready_at: now,
            commit_tx_hash: None,
            safe_deployment_tx_hash: None,
            registration_tx_hash: None,
            company_tx_hash: None,
            error_message: None,
            error_class: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_write_count_tracks_mutations_only() {
        let store = MemoryStore::new();
        let session = SessionId::new("s");
        store.put(&session, &record()).await.unwrap();
        store.get(&session).await.unwrap();
        store.list().await.unwrap();
        store
            .update(&session, RecordPatch::advance(Phase::Completed), Utc::now())
            .await
            .unwrap();
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_rejected_update_is_not_stored() {
        let store = MemoryStore::new();
        let session = SessionId::new("s");
        store.put(&session, &record()).await.unwrap();
        assert!(
            store
                .update(&session, RecordPatch::advance(Phase::Waiting), Utc::now())
                .await
                .is_err()
        );
        assert_eq!(store.get(&session).await.unwrap().unwrap().phase, Phase::Creating);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.put(&SessionId::new("s"), &record()).await.unwrap();
        assert!(other.get(&SessionId::new("s")).await.unwrap().is_some());
    }
}
