//! The durable registration record and its phase machine.

use alloy_primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::ErrorClass;

/// A founder's share of the company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Founder {
    pub address: Address,
    /// Equity in basis points (10000 = 100.00%).
    pub equity_bps: u16,
    #[serde(default)]
    pub role: String,
}

/// Where a registration stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Committing,
    Waiting,
    DeployingSafe,
    Registering,
    Creating,
    Completed,
    Failed,
}

impl Phase {
    /// Position in the forward order. `Failed` sits outside it.
    fn rank(self) -> Option<u8> {
        match self {
            Phase::Committing => Some(0),
            Phase::Waiting => Some(1),
            Phase::DeployingSafe => Some(2),
            Phase::Registering => Some(3),
            Phase::Creating => Some(4),
            Phase::Completed => Some(5),
            Phase::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Committing => "committing",
            Phase::Waiting => "waiting",
            Phase::DeployingSafe => "deploying-safe",
            Phase::Registering => "registering",
            Phase::Creating => "creating",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "committing" => Ok(Phase::Committing),
            "waiting" => Ok(Phase::Waiting),
            "deploying-safe" => Ok(Phase::DeployingSafe),
            "registering" => Ok(Phase::Registering),
            "creating" => Ok(Phase::Creating),
            "completed" => Ok(Phase::Completed),
            "failed" => Ok(Phase::Failed),
            _ => anyhow::bail!("Unknown registration phase '{}'", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Cannot move registration from {from} back to {to}")]
    Backwards { from: Phase, to: Phase },

    #[error("Transaction hash for {field} is already set to {existing}")]
    HashAlreadySet { field: &'static str, existing: B256 },
}

/// Identity of the caller that owns a registration slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One in-flight (or finished) registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    pub name_label: String,
    pub predicted_owner_address: Address,
    pub founders: Vec<Founder>,
    pub threshold: u32,
    pub secret: B256,
    pub salt_nonce: String,
    pub duration_secs: u64,
    pub phase: Phase,
    /// Phase the saga was in when it last failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<Phase>,
    pub ready_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_tx_hash: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe_deployment_tx_hash: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_tx_hash: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_tx_hash: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RegistrationRecord {
    /// The phase the saga should execute next.
    pub fn resume_phase(&self) -> Phase {
        match self.phase {
            Phase::Failed => self.failed_at.unwrap_or(Phase::Committing),
            phase => phase,
        }
    }

    pub fn owner_addresses(&self) -> Vec<Address> {
        self.founders.iter().map(|f| f.address).collect()
    }

    /// Whether the last failure may be retried without operator intervention.
    pub fn is_retryable_failure(&self) -> bool {
        self.phase == Phase::Failed && self.error_class.is_some_and(ErrorClass::is_retryable)
    }

    /// Merge `patch` into the record, enforcing forward-only phases and
    /// set-at-most-once transaction hashes.
    pub fn apply(&mut self, patch: RecordPatch, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if let Some(next) = patch.phase {
            self.check_transition(next)?;
        }

        check_once(self.commit_tx_hash, patch.commit_tx_hash, "commit_tx_hash")?;
        check_once(
            self.safe_deployment_tx_hash,
            patch.safe_deployment_tx_hash,
            "safe_deployment_tx_hash",
        )?;
        check_once(
            self.registration_tx_hash,
            patch.registration_tx_hash,
            "registration_tx_hash",
        )?;
        check_once(self.company_tx_hash, patch.company_tx_hash, "company_tx_hash")?;

        self.commit_tx_hash = self.commit_tx_hash.or(patch.commit_tx_hash);
        self.safe_deployment_tx_hash = self
            .safe_deployment_tx_hash
            .or(patch.safe_deployment_tx_hash);
        self.registration_tx_hash = self.registration_tx_hash.or(patch.registration_tx_hash);
        self.company_tx_hash = self.company_tx_hash.or(patch.company_tx_hash);

        if let Some(next) = patch.phase {
            if next == Phase::Failed {
                if self.phase != Phase::Failed {
                    self.failed_at = Some(self.phase);
                }
            } else {
                self.failed_at = None;
            }
            self.phase = next;
        }
        if let Some(ready_at) = patch.ready_at {
            self.ready_at = ready_at;
        }
        if let Some(founders) = patch.founders {
            self.founders = founders;
        }
        if let Some(threshold) = patch.threshold {
            self.threshold = threshold;
        }
        match patch.error {
            ErrorUpdate::Keep => {}
            ErrorUpdate::Clear => {
                self.error_message = None;
                self.error_class = None;
            }
            ErrorUpdate::Set { message, class } => {
                self.error_message = Some(message);
                self.error_class = Some(class);
            }
        }
        self.updated_at = now;
        Ok(())
    }

    fn check_transition(&self, next: Phase) -> Result<(), TransitionError> {
        let backwards = TransitionError::Backwards {
            from: self.phase,
            to: next,
        };
        if next == Phase::Failed {
            return if self.phase == Phase::Completed {
                Err(backwards)
            } else {
                Ok(())
            };
        }
        let current = self.resume_phase();
        match (current.rank(), next.rank()) {
            (Some(from), Some(to)) if to >= from => Ok(()),
            _ => Err(backwards),
        }
    }
}

fn check_once(
    current: Option<B256>,
    value: Option<B256>,
    field: &'static str,
) -> Result<(), TransitionError> {
    match (current, value) {
        (Some(existing), Some(v)) if existing != v => {
            Err(TransitionError::HashAlreadySet { field, existing })
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ErrorUpdate {
    #[default]
    Keep,
    Clear,
    Set {
        message: String,
        class: ErrorClass,
    },
}

/// A partial update to a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPatch {
    pub phase: Option<Phase>,
    pub ready_at: Option<DateTime<Utc>>,
    pub commit_tx_hash: Option<B256>,
    pub safe_deployment_tx_hash: Option<B256>,
    pub registration_tx_hash: Option<B256>,
    pub company_tx_hash: Option<B256>,
    /// Founders adopted from an authoritative registry entry.
    pub founders: Option<Vec<Founder>>,
    pub threshold: Option<u32>,
    pub error: ErrorUpdate,
}

impl RecordPatch {
    /// Move to `phase` and clear any previous failure.
    pub fn advance(phase: Phase) -> Self {
        Self {
            phase: Some(phase),
            error: ErrorUpdate::Clear,
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>, class: ErrorClass) -> Self {
        Self {
            phase: Some(Phase::Failed),
            error: ErrorUpdate::Set {
                message: message.into(),
                class,
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(phase: Phase) -> RegistrationRecord {
        let now = Utc::now();
        RegistrationRecord {
            name_label: "acme".into(),
            predicted_owner_address: Address::repeat_byte(9),
            founders: vec![Founder {
                address: Address::repeat_byte(1),
                equity_bps: 10_000,
                role: "CEO".into(),
            }],
            threshold: 1,
            secret: B256::repeat_byte(7),
            salt_nonce: "1".into(),
            duration_secs: 31_536_000,
            phase,
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

    #[test]
    fn test_phase_serializes_kebab_case() {
        let json = serde_json::to_string(&Phase::DeployingSafe).unwrap();
        assert_eq!(json, "\"deploying-safe\"");
        assert_eq!("deploying-safe".parse::<Phase>().unwrap(), Phase::DeployingSafe);
        assert!("deploying_safe".parse::<Phase>().is_err());
    }

    #[test]
    fn test_forward_transition_allowed() {
        let mut rec = record(Phase::Waiting);
        rec.apply(RecordPatch::advance(Phase::DeployingSafe), Utc::now())
            .unwrap();
        assert_eq!(rec.phase, Phase::DeployingSafe);
    }

    #[test]
    fn test_backward_transition_rejected() {
        let mut rec = record(Phase::Creating);
        let err = rec
            .apply(RecordPatch::advance(Phase::Waiting), Utc::now())
            .unwrap_err();
        assert!(matches!(err, TransitionError::Backwards { .. }));
        assert_eq!(rec.phase, Phase::Creating);
    }

    #[test]
    fn test_failure_records_phase_and_resumes_there() {
        let mut rec = record(Phase::Registering);
        rec.apply(
            RecordPatch::failed("rpc timeout", ErrorClass::Transient),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(rec.phase, Phase::Failed);
        assert_eq!(rec.failed_at, Some(Phase::Registering));
        assert_eq!(rec.resume_phase(), Phase::Registering);
        assert!(rec.is_retryable_failure());

        // failing again keeps the original phase
        rec.apply(
            RecordPatch::failed("still down", ErrorClass::Transient),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(rec.failed_at, Some(Phase::Registering));

        // resuming may not jump back before the failed phase
        assert!(
            rec.apply(RecordPatch::advance(Phase::Waiting), Utc::now())
                .is_err()
        );
        rec.apply(RecordPatch::advance(Phase::Creating), Utc::now())
            .unwrap();
        assert_eq!(rec.phase, Phase::Creating);
        assert!(rec.failed_at.is_none());
        assert!(rec.error_message.is_none());
        assert!(rec.error_class.is_none());
    }

    #[test]
    fn test_completed_cannot_fail() {
        let mut rec = record(Phase::Completed);
        assert!(
            rec.apply(RecordPatch::failed("late", ErrorClass::Transient), Utc::now())
                .is_err()
        );
    }

    #[test]
    fn test_hash_set_at_most_once() {
        let mut rec = record(Phase::Committing);
        let first = B256::repeat_byte(1);
        let patch = RecordPatch {
            commit_tx_hash: Some(first),
            ..Default::default()
        };
        rec.apply(patch.clone(), Utc::now()).unwrap();
        rec.apply(patch, Utc::now()).unwrap();
        let err = rec
            .apply(
                RecordPatch {
                    commit_tx_hash: Some(B256::repeat_byte(2)),
                    ..Default::default()
                },
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, TransitionError::HashAlreadySet { .. }));
        assert_eq!(rec.commit_tx_hash, Some(first));
    }

    #[test]
    fn test_apply_bumps_updated_at() {
        let mut rec = record(Phase::Waiting);
        let later = rec.updated_at + chrono::Duration::seconds(5);
        rec.apply(RecordPatch::default(), later).unwrap();
        assert_eq!(rec.updated_at, later);
    }

    #[test]
    fn test_record_json_roundtrip_skips_empty_hashes() {
        let rec = record(Phase::Waiting);
        let json = serde_json::to_string(&rec).unwrap();
        assert!(!json.contains("company_tx_hash"));
        let back: RegistrationRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }
}
