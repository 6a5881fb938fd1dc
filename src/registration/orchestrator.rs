//! Saga controller.
//!
//! `start` validates input, predicts the Safe address, persists the record and
//! runs the commit step. `finalize` walks the remaining steps from wherever the
//! record stands, persisting after every step. Both are safe to call again at
//! any point: every step reconciles against the chain before acting.

use std::sync::Arc;

use alloy_primitives::{Address, B256};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use super::executors::{StepContext, StepExecutor, StepSettings, pipeline};
use super::record::{Founder, Phase, RecordPatch, RegistrationRecord, SessionId};
use crate::chain::Collaborators;
use crate::clock::Clock;
use crate::errors::RegistrationError;
use crate::policy;
use crate::safe::{generate_salt_nonce, parse_salt_nonce};
use crate::store::RegistrationStore;

/// Input to [`Orchestrator::start`].
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub name: String,
    pub founders: Vec<Founder>,
    /// Explicit signature threshold. Derived from the owner count when absent.
    pub threshold: Option<u32>,
    pub duration_years: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub name: String,
    pub predicted_owner_address: Address,
    pub commit_tx_hash: Option<B256>,
    pub ready_at: DateTime<Utc>,
    pub phase: Phase,
}

impl From<&RegistrationRecord> for StartOutcome {
    fn from(record: &RegistrationRecord) -> Self {
        Self {
            name: record.name_label.clone(),
            predicted_owner_address: record.predicted_owner_address,
            commit_tx_hash: record.commit_tx_hash,
            ready_at: record.ready_at,
            phase: record.phase,
        }
    }
}

/// Result of finalizing one record during a sweep.
#[derive(Debug)]
pub struct SweepOutcome {
    pub session: SessionId,
    pub name: String,
    pub result: Result<RegistrationRecord, RegistrationError>,
}

pub struct Orchestrator {
    ctx: StepContext,
    store: Arc<dyn RegistrationStore>,
    steps: Vec<Box<dyn StepExecutor>>,
}

impl Orchestrator {
    pub fn new(
        chain: Collaborators,
        store: Arc<dyn RegistrationStore>,
        clock: Arc<dyn Clock>,
        settings: StepSettings,
    ) -> Self {
        let ctx = StepContext {
            chain,
            clock,
            settings,
        };
        Self {
            steps: pipeline(ctx.clone()),
            ctx,
            store,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.ctx.clock.now()
    }

    fn step(&self, phase: Phase) -> Option<&dyn StepExecutor> {
        self.steps
            .iter()
            .find(|s| s.phase() == phase)
            .map(|s| s.as_ref())
    }

    async fn load(&self, session: &SessionId) -> Result<Option<RegistrationRecord>, RegistrationError> {
        self.store.get(session).await.map_err(RegistrationError::Store)
    }

    async fn persist(
        &self,
        session: &SessionId,
        patch: RecordPatch,
    ) -> Result<RegistrationRecord, RegistrationError> {
        self.store
            .update(session, patch, self.now())
            .await
            .map_err(RegistrationError::Store)
    }

    /// Run one step and persist its outcome. Step failures are recorded on the
    /// record before they are returned; if that write fails too, the caller
    /// gets [`RegistrationError::FailureNotRecorded`].
    async fn run_step(
        &self,
        session: &SessionId,
        record: &RegistrationRecord,
        step: &dyn StepExecutor,
    ) -> Result<RegistrationRecord, RegistrationError> {
        match step.execute(record).await {
            Ok(patch) => self.persist(session, patch).await,
            Err(err) => {
                let class = err.class();
                warn!(phase = %step.phase(), %class, error = %err, "Registration step failed");
                let patch = RecordPatch::failed(err.to_string(), class);
                match self.store.update(session, patch, self.now()).await {
                    Ok(_) => Err(err),
                    Err(store_err) => {
                        warn!(error = %store_err, "Failed to record step failure");
                        Err(RegistrationError::FailureNotRecorded {
                            error: Box::new(err),
                            store: store_err,
                        })
                    }
                }
            }
        }
    }

    /// Validate, persist and commit a new registration.
    ///
    /// A second call for the name already in flight in this session resumes
    /// that registration with its original secret and salt.
    #[instrument(skip(self, request), fields(session = %session, name = %request.name))]
    pub async fn start(
        &self,
        session: &SessionId,
        request: StartRequest,
    ) -> Result<StartOutcome, RegistrationError> {
        let label = policy::normalize_label(&request.name)?;
        policy::validate_founders(&request.founders)?;
        let threshold = match request.threshold {
            Some(t) => {
                policy::validate_threshold(t, request.founders.len())?;
                t
            }
            None => policy::threshold_for(request.founders.len())?,
        };
        let duration_secs = policy::duration_from_years(request.duration_years)?;

        let record = match self.load(session).await? {
            Some(existing) if existing.name_label == label && existing.phase != Phase::Completed => {
                if existing.founders != request.founders || existing.threshold != threshold {
                    warn!("Resuming with the founders and threshold of the in-flight registration");
                }
                info!(phase = %existing.phase, "Resuming in-flight registration");
                existing
            }
            // Failed records hold a secret and possibly a deployed Safe; only
            // an explicit clear may drop them.
            Some(existing) if existing.phase != Phase::Completed => {
                return Err(RegistrationError::RegistrationInProgress {
                    name: existing.name_label,
                });
            }
            _ => {
                let record = self
                    .new_record(label, request.founders, threshold, duration_secs)
                    .await?;
                self.store
                    .put(session, &record)
                    .await
                    .map_err(RegistrationError::Store)?;
                info!(safe = %record.predicted_owner_address, "Registration created");
                record
            }
        };

        let Some(commit) = self.step(Phase::Committing) else {
            return Ok(StartOutcome::from(&record));
        };
        // The commit step persists its tx hash before confirming it, so this
        // takes two passes on a fresh record.
        let mut record = record;
        while record.resume_phase() == Phase::Committing {
            record = self.run_step(session, &record, commit).await?;
        }
        Ok(StartOutcome::from(&record))
    }

    async fn new_record(
        &self,
        name_label: String,
        founders: Vec<Founder>,
        threshold: u32,
        duration_secs: u64,
    ) -> Result<RegistrationRecord, RegistrationError> {
        let salt_nonce = generate_salt_nonce();
        let owners: Vec<Address> = founders.iter().map(|f| f.address).collect();
        let predicted = self
            .ctx
            .chain
            .factory
            .predict_address(&owners, threshold, parse_salt_nonce(&salt_nonce)?)
            .await?;
        let now = self.now();
        Ok(RegistrationRecord {
            name_label,
            predicted_owner_address: predicted,
            founders,
            threshold,
            secret: B256::from(rand::random::<[u8; 32]>()),
            salt_nonce,
            duration_secs,
            phase: Phase::Committing,
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
        })
    }

    /// Drive the registration to completion from its current phase.
    #[instrument(skip(self), fields(session = %session))]
    pub async fn finalize(
        &self,
        session: &SessionId,
        name: &str,
    ) -> Result<RegistrationRecord, RegistrationError> {
        let mut record = self.pending(session, name).await?;

        loop {
            let phase = record.resume_phase();
            match phase {
                Phase::Completed => {
                    debug!("Registration already completed");
                    return Ok(record);
                }
                Phase::Waiting => {
                    if self.now() < record.ready_at {
                        return Err(RegistrationError::NotReady {
                            ready_at: record.ready_at,
                        });
                    }
                    record = self
                        .persist(session, RecordPatch::advance(Phase::DeployingSafe))
                        .await?;
                }
                _ => {
                    let Some(step) = self.step(phase) else {
                        return Ok(record);
                    };
                    record = self.run_step(session, &record, step).await?;
                }
            }
        }
    }

    async fn pending(
        &self,
        session: &SessionId,
        name: &str,
    ) -> Result<RegistrationRecord, RegistrationError> {
        let label = policy::normalize_label(name)?;
        match self.load(session).await? {
            Some(record) if record.name_label == label => Ok(record),
            _ => Err(RegistrationError::NoPendingRegistration { name: label }),
        }
    }

    /// Current record for `name` in this session, if any. Never writes.
    pub async fn status(
        &self,
        session: &SessionId,
        name: &str,
    ) -> Result<Option<RegistrationRecord>, RegistrationError> {
        let label = policy::normalize_label(name)?;
        Ok(self
            .load(session)
            .await?
            .filter(|record| record.name_label == label))
    }

    /// Sleep until the commitment matures, then finalize.
    pub async fn finalize_when_ready(
        &self,
        session: &SessionId,
        name: &str,
    ) -> Result<RegistrationRecord, RegistrationError> {
        loop {
            match self.finalize(session, name).await {
                Err(RegistrationError::NotReady { ready_at }) => {
                    let wait = (ready_at - self.now())
                        .to_std()
                        .unwrap_or_default()
                        .max(std::time::Duration::from_secs(1));
                    info!(?wait, "Waiting for commitment to mature");
                    tokio::time::sleep(wait).await;
                }
                other => return other,
            }
        }
    }

    /// Finalize every record that is ready or failed transiently.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<Vec<SweepOutcome>, RegistrationError> {
        let now = self.now();
        let due: Vec<(SessionId, String)> = self
            .store
            .list()
            .await
            .map_err(RegistrationError::Store)?
            .into_iter()
            .filter(|(_, record)| {
                (record.phase == Phase::Waiting && record.ready_at <= now)
                    || record.is_retryable_failure()
            })
            .map(|(session, record)| (session, record.name_label))
            .collect();
        info!(count = due.len(), "Sweeping registrations");

        let outcomes = join_all(due.into_iter().map(|(session, name)| async move {
            let result = self.finalize(&session, &name).await;
            SweepOutcome {
                session,
                name,
                result,
            }
        }))
        .await;
        Ok(outcomes)
    }

    /// Remove the session's record. In-flight records and retryable failures
    /// are kept unless `force`.
    #[instrument(skip(self), fields(session = %session))]
    pub async fn clear(
        &self,
        session: &SessionId,
        force: bool,
    ) -> Result<Option<RegistrationRecord>, RegistrationError> {
        let Some(record) = self.load(session).await? else {
            return Ok(None);
        };
        let resumable = !record.phase.is_terminal() || record.is_retryable_failure();
        if resumable && !force {
            return Err(RegistrationError::RegistrationInProgress {
                name: record.name_label,
            });
        }
        self.store
            .clear(session)
            .await
            .map_err(RegistrationError::Store)?;
        info!(name = %record.name_label, phase = %record.phase, "Registration cleared");
        Ok(Some(record))
    }

    /// Address the Safe for these owners would be deployed to.
    pub async fn predict(
        &self,
        owners: &[Address],
        threshold: Option<u32>,
        salt_nonce: &str,
    ) -> Result<Address, RegistrationError> {
        let threshold = match threshold {
            Some(t) => {
                policy::validate_threshold(t, owners.len())?;
                t
            }
            None => policy::threshold_for(owners.len())?,
        };
        let salt = parse_salt_nonce(salt_nonce)?;
        Ok(self
            .ctx
            .chain
            .factory
            .predict_address(owners, threshold, salt)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::memory::{InMemoryChain, Op};
    use crate::clock::ManualClock;
    use crate::errors::{ChainError, ErrorClass, ValidationError};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::Duration;

    struct Harness {
        chain: InMemoryChain,
        store: MemoryStore,
        clock: ManualClock,
        orchestrator: Orchestrator,
    }

    fn harness() -> Harness {
        harness_with(StepSettings::default())
    }

    fn harness_with(settings: StepSettings) -> Harness {
        let clock = ManualClock::default();
        let chain = InMemoryChain::new(Arc::new(clock.clone()));
        let store = MemoryStore::new();
        let shared = Arc::new(chain.clone());
        let orchestrator = Orchestrator::new(
            Collaborators {
                registrar: shared.clone(),
                factory: shared.clone(),
                registry: shared.clone(),
                client: shared,
            },
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            settings,
        );
        Harness {
            chain,
            store,
            clock,
            orchestrator,
        }
    }

    /// Store that accepts every write except recording a failure.
    struct FailureRejectingStore(MemoryStore);

    #[async_trait]
    impl RegistrationStore for FailureRejectingStore {
        async fn put(&self, session: &SessionId, record: &RegistrationRecord) -> anyhow::Result<()> {
            self.0.put(session, record).await
        }

        async fn get(&self, session: &SessionId) -> anyhow::Result<Option<RegistrationRecord>> {
            self.0.get(session).await
        }

        async fn update(
            &self,
            session: &SessionId,
            patch: RecordPatch,
            now: DateTime<Utc>,
        ) -> anyhow::Result<RegistrationRecord> {
            if patch.phase == Some(Phase::Failed) {
                anyhow::bail!("disk full");
            }
            self.0.update(session, patch, now).await
        }

        async fn clear(&self, session: &SessionId) -> anyhow::Result<()> {
            self.0.clear(session).await
        }

        async fn list(&self) -> anyhow::Result<Vec<(SessionId, RegistrationRecord)>> {
            self.0.list().await
        }
    }

    fn request(name: &str) -> StartRequest {
        StartRequest {
            name: name.into(),
            founders: vec![Founder {
                address: Address::repeat_byte(1),
                equity_bps: 10_000,
                role: "CEO".into(),
            }],
            threshold: None,
            duration_years: 1,
        }
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_input_without_side_effects() {
        let h = harness();
        let mut req = request("acme");
        req.founders[0].equity_bps = 10_001;
        let err = h
            .orchestrator
            .start(&SessionId::new("s"), req)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::Validation(ValidationError::FounderEquityOutOfRange { .. })
        ));
        assert_eq!(h.store.write_count(), 0);
        assert_eq!(h.chain.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_start_in_other_name_is_rejected_while_in_flight() {
        let h = harness();
        let session = SessionId::new("s");
        h.orchestrator.start(&session, request("acme")).await.unwrap();
        let err = h
            .orchestrator
            .start(&session, request("globex"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::RegistrationInProgress { .. }));
    }

    #[tokio::test]
    async fn test_finalize_unknown_name_is_not_pending() {
        let h = harness();
        let session = SessionId::new("s");
        h.orchestrator.start(&session, request("acme")).await.unwrap();
        let err = h
            .orchestrator
            .finalize(&session, "globex")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::NoPendingRegistration { .. }));
    }

    #[tokio::test]
    async fn test_commit_failure_is_persisted_and_retried_by_start() {
        let h = harness();
        let session = SessionId::new("s");
        h.chain
            .fail_next(Op::Commit, ChainError::Rpc("connection refused".into()));

        assert!(h.orchestrator.start(&session, request("acme")).await.is_err());
        let failed = h.store.get(&session).await.unwrap().unwrap();
        assert_eq!(failed.phase, Phase::Failed);
        assert_eq!(failed.failed_at, Some(Phase::Committing));
        assert_eq!(failed.error_class, Some(ErrorClass::Transient));

        let outcome = h.orchestrator.start(&session, request("acme")).await.unwrap();
        assert_eq!(outcome.phase, Phase::Waiting);
        assert_eq!(outcome.predicted_owner_address, failed.predicted_owner_address);
    }

    #[tokio::test]
    async fn test_receipt_timeout_keeps_commit_hash_and_retry_does_not_recommit() {
        let h = harness();
        let session = SessionId::new("s");
        h.chain.fail_next(
            Op::WaitForReceipt,
            ChainError::Timeout { tx: B256::ZERO },
        );

        assert!(h.orchestrator.start(&session, request("acme")).await.is_err());
        let failed = h.store.get(&session).await.unwrap().unwrap();
        assert_eq!(failed.phase, Phase::Failed);
        assert_eq!(failed.failed_at, Some(Phase::Committing));
        assert!(failed.commit_tx_hash.is_some());

        let outcome = h.orchestrator.start(&session, request("acme")).await.unwrap();
        assert_eq!(outcome.phase, Phase::Waiting);
        assert_eq!(outcome.commit_tx_hash, failed.commit_tx_hash);
        assert_eq!(h.chain.count_of(Op::Commit), 1);
    }

    #[tokio::test]
    async fn test_failed_registration_blocks_other_name_until_finished() {
        let h = harness();
        let session = SessionId::new("s");
        h.orchestrator.start(&session, request("acme")).await.unwrap();
        h.clock.advance(Duration::seconds(61));
        h.chain
            .fail_next(Op::Register, ChainError::Rpc("connection reset".into()));
        assert!(h.orchestrator.finalize(&session, "acme").await.is_err());
        let failed = h.store.get(&session).await.unwrap().unwrap();
        assert!(failed.is_retryable_failure());

        let err = h
            .orchestrator
            .start(&session, request("globex"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::RegistrationInProgress { ref name } if name == "acme"
        ));
        let kept = h.store.get(&session).await.unwrap().unwrap();
        assert_eq!(kept.secret, failed.secret);
        assert_eq!(kept.salt_nonce, failed.salt_nonce);

        let done = h.orchestrator.finalize(&session, "acme").await.unwrap();
        assert_eq!(done.phase, Phase::Completed);
        assert_eq!(h.chain.name_owner("acme"), Some(done.predicted_owner_address));
    }

    #[tokio::test]
    async fn test_clear_keeps_retryable_failure_unless_forced() {
        let h = harness();
        let session = SessionId::new("s");
        h.chain
            .fail_next(Op::Commit, ChainError::Rpc("connection refused".into()));
        assert!(h.orchestrator.start(&session, request("acme")).await.is_err());

        let err = h.orchestrator.clear(&session, false).await.unwrap_err();
        assert!(matches!(err, RegistrationError::RegistrationInProgress { .. }));
        assert!(h.store.get(&session).await.unwrap().is_some());

        assert!(h.orchestrator.clear(&session, true).await.unwrap().is_some());
        assert!(h.store.get(&session).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_drops_fatal_failure_without_force() {
        let h = harness();
        let session = SessionId::new("s");
        h.orchestrator.start(&session, request("acme")).await.unwrap();
        h.chain.set_name_owner("acme", Address::repeat_byte(0xee));
        h.clock.advance(Duration::seconds(61));
        let err = h.orchestrator.finalize(&session, "acme").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Consistency);

        let removed = h.orchestrator.clear(&session, false).await.unwrap();
        assert_eq!(removed.map(|r| r.phase), Some(Phase::Failed));
        let outcome = h.orchestrator.start(&session, request("globex")).await.unwrap();
        assert_eq!(outcome.phase, Phase::Waiting);
    }

    #[tokio::test]
    async fn test_updates_are_stamped_with_injected_clock() {
        let h = harness();
        let session = SessionId::new("s");
        h.orchestrator.start(&session, request("acme")).await.unwrap();
        let started = h.store.get(&session).await.unwrap().unwrap();
        assert_eq!(started.updated_at, h.clock.now());

        h.clock.advance(Duration::seconds(61));
        let done = h.orchestrator.finalize(&session, "acme").await.unwrap();
        assert_eq!(done.updated_at, h.clock.now());
        assert_eq!(done.updated_at - started.created_at, Duration::seconds(61));
    }

    #[tokio::test]
    async fn test_unrecorded_failure_surfaces_both_errors() {
        let clock = ManualClock::default();
        let chain = InMemoryChain::new(Arc::new(clock.clone()));
        let store = MemoryStore::new();
        let shared = Arc::new(chain.clone());
        let orchestrator = Orchestrator::new(
            Collaborators {
                registrar: shared.clone(),
                factory: shared.clone(),
                registry: shared.clone(),
                client: shared,
            },
            Arc::new(FailureRejectingStore(store.clone())),
            Arc::new(clock),
            StepSettings::default(),
        );
        let session = SessionId::new("s");
        chain.fail_next(Op::Commit, ChainError::Rpc("connection refused".into()));

        let err = orchestrator
            .start(&session, request("acme"))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Transient);
        match err {
            RegistrationError::FailureNotRecorded { error, store: cause } => {
                assert!(matches!(*error, RegistrationError::Chain(ChainError::Rpc(_))));
                assert!(cause.to_string().contains("disk full"));
            }
            other => panic!("expected FailureNotRecorded, got {other:?}"),
        }

        let stored = store.get(&session).await.unwrap().unwrap();
        assert_eq!(stored.phase, Phase::Committing);
        assert!(stored.error_class.is_none());
    }

    #[tokio::test]
    async fn test_clear_refuses_in_flight_record_unless_forced() {
        let h = harness();
        let session = SessionId::new("s");
        h.orchestrator.start(&session, request("acme")).await.unwrap();

        assert!(h.orchestrator.clear(&session, false).await.is_err());
        let removed = h.orchestrator.clear(&session, true).await.unwrap();
        assert_eq!(removed.map(|r| r.name_label), Some("acme".into()));
        assert!(h.store.get(&session).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sweep_finalizes_only_due_records() {
        let h = harness();
        let early = SessionId::new("early");
        let late = SessionId::new("late");
        h.orchestrator.start(&early, request("acme")).await.unwrap();
        h.clock.advance(Duration::seconds(61));
        h.orchestrator.start(&late, request("globex")).await.unwrap();

        let outcomes = h.orchestrator.sweep().await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].session, early);
        let record = outcomes[0].result.as_ref().unwrap();
        assert_eq!(record.phase, Phase::Completed);
    }

    #[tokio::test]
    async fn test_predict_matches_start() {
        let h = harness();
        let session = SessionId::new("s");
        h.orchestrator.start(&session, request("acme")).await.unwrap();
        let record = h.store.get(&session).await.unwrap().unwrap();

        let predicted = h
            .orchestrator
            .predict(&record.owner_addresses(), None, &record.salt_nonce)
            .await
            .unwrap();
        assert_eq!(predicted, record.predicted_owner_address);
    }

    #[tokio::test]
    async fn test_finalize_when_ready_waits_for_maturity() {
        let h = harness_with(StepSettings {
            commit_maturity: Duration::seconds(1),
            ..StepSettings::default()
        });
        let session = SessionId::new("s");
        h.orchestrator.start(&session, request("acme")).await.unwrap();

        let clock = h.clock.clone();
        let (record, _) = tokio::join!(
            h.orchestrator.finalize_when_ready(&session, "acme"),
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                // The in-memory registrar still enforces its own 60s minimum.
                clock.advance(Duration::seconds(61));
            }
        );
        assert_eq!(record.unwrap().phase, Phase::Completed);
    }
}
