//! The four saga steps.
//!
//! Each executor reads chain state first and skips when its effect is already
//! there, so re-running a step after a crash, a timeout or a concurrent
//! finalize never sends a second transaction for the same effect. Executors
//! never touch the store: they return a [`RecordPatch`] and the orchestrator
//! persists it.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use chrono::Duration;
use tracing::{info, instrument, warn};

use super::record::{Phase, RecordPatch, RegistrationRecord};
use crate::chain::{Collaborators, CompanyEntry, NameRequest};
use crate::clock::Clock;
use crate::errors::{ChainError, ConsistencyError, RegistrationError};
use crate::safe::parse_salt_nonce;

/// Knobs shared by the executors.
#[derive(Debug, Clone)]
pub struct StepSettings {
    /// Minimum age of a commitment before it may be revealed.
    pub commit_maturity: Duration,
    /// Extra value sent with the reveal on top of the quoted rent, in basis points.
    pub fee_buffer_bps: u32,
    pub resolver: Address,
}

impl Default for StepSettings {
    fn default() -> Self {
        Self {
            commit_maturity: Duration::seconds(60),
            fee_buffer_bps: 200,
            resolver: Address::ZERO,
        }
    }
}

#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Phase during which this step runs.
    fn phase(&self) -> Phase;

    async fn execute(&self, record: &RegistrationRecord) -> Result<RecordPatch, RegistrationError>;
}

/// Everything an executor needs besides the record.
#[derive(Clone)]
pub struct StepContext {
    pub chain: Collaborators,
    pub clock: Arc<dyn Clock>,
    pub settings: StepSettings,
}

impl StepContext {
    fn name_request(&self, record: &RegistrationRecord) -> NameRequest {
        NameRequest {
            label: record.name_label.clone(),
            owner: record.predicted_owner_address,
            duration_secs: record.duration_secs,
            secret: record.secret,
            resolver: self.settings.resolver,
        }
    }
}

/// `(base + premium) × (10000 + buffer) / 10000`.
pub fn value_with_buffer(price: U256, buffer_bps: u32) -> U256 {
    price.saturating_mul(U256::from(10_000u32 + buffer_bps)) / U256::from(10_000u32)
}

/// Owner of the name, failing if it belongs to anyone but `expected`.
async fn name_owner_check(
    ctx: &StepContext,
    label: &str,
    expected: Address,
) -> Result<Option<Address>, RegistrationError> {
    match ctx.chain.registrar.owner_of(label).await? {
        Some(owner) if owner != expected => Err(ConsistencyError::NameTaken {
            name: label.to_string(),
            owner,
        }
        .into()),
        owner => Ok(owner),
    }
}

pub struct CommitExecutor {
    ctx: StepContext,
}

impl CommitExecutor {
    pub fn new(ctx: StepContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl StepExecutor for CommitExecutor {
    fn phase(&self) -> Phase {
        Phase::Committing
    }

    #[instrument(skip_all, fields(name = %record.name_label))]
    async fn execute(&self, record: &RegistrationRecord) -> Result<RecordPatch, RegistrationError> {
        let now = self.ctx.clock.now();
        let expected = record.predicted_owner_address;

        if name_owner_check(&self.ctx, &record.name_label, expected)
            .await?
            .is_some()
        {
            info!("Name already owned by the predicted Safe, skipping commit");
            return Ok(RecordPatch {
                ready_at: Some(now),
                ..RecordPatch::advance(Phase::Waiting)
            });
        }

        // Submission and confirmation are separate passes so the hash is
        // durable before we wait on it. A second commit for the same
        // commitment reverts until the first one expires.
        let Some(tx) = record.commit_tx_hash else {
            let tx = self
                .ctx
                .chain
                .registrar
                .commit(&self.ctx.name_request(record))
                .await?;
            info!(%tx, "Commitment submitted");
            return Ok(RecordPatch {
                commit_tx_hash: Some(tx),
                ..Default::default()
            });
        };

        self.ctx.chain.confirm(tx).await?;

        // Measured from confirmation, never earlier than the mined block.
        let ready_at = self.ctx.clock.now() + self.ctx.settings.commit_maturity;
        info!(%tx, %ready_at, "Commitment confirmed");
        Ok(RecordPatch {
            ready_at: Some(ready_at),
            ..RecordPatch::advance(Phase::Waiting)
        })
    }
}

pub struct SafeDeploymentExecutor {
    ctx: StepContext,
}

impl SafeDeploymentExecutor {
    pub fn new(ctx: StepContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl StepExecutor for SafeDeploymentExecutor {
    fn phase(&self) -> Phase {
        Phase::DeployingSafe
    }

    #[instrument(skip_all, fields(name = %record.name_label, safe = %record.predicted_owner_address))]
    async fn execute(&self, record: &RegistrationRecord) -> Result<RecordPatch, RegistrationError> {
        let predicted = record.predicted_owner_address;
        let factory = &self.ctx.chain.factory;

        if factory.code_exists_at(predicted).await? {
            info!("Safe already deployed, skipping");
            return Ok(RecordPatch::advance(Phase::Registering));
        }

        let owners = record.owner_addresses();
        let salt_nonce = parse_salt_nonce(&record.salt_nonce)?;

        let recomputed = factory
            .predict_address(&owners, record.threshold, salt_nonce)
            .await?;
        if recomputed != predicted {
            return Err(ConsistencyError::PredictedAddressMismatch {
                predicted,
                deployed: recomputed,
            }
            .into());
        }

        let submitted = async {
            let tx = factory.deploy(&owners, record.threshold, salt_nonce).await?;
            let receipt = self.ctx.chain.confirm(tx).await?;
            Ok::<_, ChainError>((tx, receipt))
        }
        .await;
        let (tx, receipt) = match submitted {
            Ok(done) => done,
            Err(err) => {
                // A concurrent finalize may have deployed it first.
                if factory.code_exists_at(predicted).await? {
                    info!(error = %err, "Deployment failed but the Safe now exists");
                    return Ok(RecordPatch::advance(Phase::Registering));
                }
                return Err(err.into());
            }
        };
        let deployed = factory
            .deployed_address(&receipt)
            .ok_or(ChainError::MissingDeploymentEvent { tx })?;
        if deployed != predicted {
            return Err(ConsistencyError::PredictedAddressMismatch {
                predicted,
                deployed,
            }
            .into());
        }

        info!(%tx, "Safe deployed");
        Ok(RecordPatch {
            safe_deployment_tx_hash: Some(tx),
            ..RecordPatch::advance(Phase::Registering)
        })
    }
}

pub struct EnsFinalizationExecutor {
    ctx: StepContext,
}

impl EnsFinalizationExecutor {
    pub fn new(ctx: StepContext) -> Self {
        Self { ctx }
    }

    async fn ensure_funds(&self, value: U256) -> Result<(), ChainError> {
        let client = &self.ctx.chain.client;
        let sender = client.sender();
        let balance = client.balance_of(sender).await?;
        if balance < value {
            return Err(ChainError::InsufficientFunds {
                sender,
                required: value.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StepExecutor for EnsFinalizationExecutor {
    fn phase(&self) -> Phase {
        Phase::Registering
    }

    #[instrument(skip_all, fields(name = %record.name_label))]
    async fn execute(&self, record: &RegistrationRecord) -> Result<RecordPatch, RegistrationError> {
        let expected = record.predicted_owner_address;
        let label = &record.name_label;

        if name_owner_check(&self.ctx, label, expected)
            .await?
            .is_some()
        {
            info!("Name already owned by the Safe, skipping reveal");
            return Ok(RecordPatch::advance(Phase::Creating));
        }

        let price = self
            .ctx
            .chain
            .registrar
            .rent_price(label, record.duration_secs)
            .await?;
        let value = value_with_buffer(price.total(), self.ctx.settings.fee_buffer_bps);
        self.ensure_funds(value).await?;

        let revealed = async {
            let tx = self
                .ctx
                .chain
                .registrar
                .register(&self.ctx.name_request(record), value)
                .await?;
            self.ctx.chain.confirm(tx).await?;
            Ok::<_, ChainError>(tx)
        }
        .await;
        let tx = match revealed {
            Ok(tx) => tx,
            Err(err) => {
                if self.ctx.chain.registrar.owner_of(label).await? == Some(expected) {
                    info!(error = %err, "Reveal failed but the Safe now owns the name");
                    return Ok(RecordPatch::advance(Phase::Creating));
                }
                return Err(err.into());
            }
        };

        let actual = self.ctx.chain.registrar.owner_of(label).await?;
        if actual != Some(expected) {
            return Err(ConsistencyError::OwnershipVerificationFailed {
                name: label.clone(),
                expected,
                actual,
            }
            .into());
        }

        info!(%tx, %value, "Name registered to the Safe");
        Ok(RecordPatch {
            registration_tx_hash: Some(tx),
            ..RecordPatch::advance(Phase::Creating)
        })
    }
}

pub struct RegistryRecordExecutor {
    ctx: StepContext,
}

impl RegistryRecordExecutor {
    pub fn new(ctx: StepContext) -> Self {
        Self { ctx }
    }

    /// Accept an existing entry if it belongs to our Safe.
    fn adopt(
        &self,
        record: &RegistrationRecord,
        entry: CompanyEntry,
    ) -> Result<RecordPatch, RegistrationError> {
        let expected = record.predicted_owner_address;
        if entry.owner != expected {
            return Err(ConsistencyError::RegistryConflict {
                name: record.name_label.clone(),
                expected,
                actual: entry.owner,
            }
            .into());
        }

        let mut patch = RecordPatch::advance(Phase::Completed);
        if entry.founders != record.founders || entry.threshold != record.threshold {
            warn!(
                chain_threshold = entry.threshold,
                chain_founders = entry.founders.len(),
                "Registry entry differs from the local record, adopting the on-chain data"
            );
            patch.founders = Some(entry.founders);
            patch.threshold = Some(entry.threshold);
        }
        Ok(patch)
    }
}

#[async_trait]
impl StepExecutor for RegistryRecordExecutor {
    fn phase(&self) -> Phase {
        Phase::Creating
    }

    #[instrument(skip_all, fields(name = %record.name_label))]
    async fn execute(&self, record: &RegistrationRecord) -> Result<RecordPatch, RegistrationError> {
        let registry = &self.ctx.chain.registry;

        if let Some(entry) = registry.company_by_name(&record.name_label).await? {
            info!("Registry entry already present");
            return self.adopt(record, entry);
        }

        let entry = CompanyEntry {
            name: record.name_label.clone(),
            owner: record.predicted_owner_address,
            founders: record.founders.clone(),
            threshold: record.threshold,
        };

        let written = async {
            let fee = registry.registration_fee().await?;
            let tx = registry.register_company(&entry, fee).await?;
            self.ctx.chain.confirm(tx).await?;
            Ok::<_, ChainError>(tx)
        }
        .await;

        match written {
            Ok(tx) => {
                info!(%tx, "Company recorded");
                Ok(RecordPatch {
                    company_tx_hash: Some(tx),
                    ..RecordPatch::advance(Phase::Completed)
                })
            }
            Err(err) => {
                // A concurrent finalize may have won the race.
                match registry.company_by_name(&record.name_label).await {
                    Ok(Some(existing)) => {
                        info!(error = %err, "Registry write failed but the entry now exists");
                        self.adopt(record, existing)
                    }
                    _ => Err(err.into()),
                }
            }
        }
    }
}

/// The executors in saga order.
pub fn pipeline(ctx: StepContext) -> Vec<Box<dyn StepExecutor>> {
    vec![
        Box::new(CommitExecutor::new(ctx.clone())),
        Box::new(SafeDeploymentExecutor::new(ctx.clone())),
        Box::new(EnsFinalizationExecutor::new(ctx.clone())),
        Box::new(RegistryRecordExecutor::new(ctx)),
    ]
}
