//! Typed error hierarchy for the registration saga.
//!
//! Three families separate "never send it" from "do not retry" from "retry safely":
//! - `ValidationError`: bad input, rejected before any transaction is sent
//! - `ConsistencyError`: on-chain reality disagrees with the record, fatal
//! - `ChainError`: transport and confirmation failures, safe to retry
//!
//! `RegistrationError` is what the orchestrator returns to callers.

use alloy_primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Input rejected before anything touches the chain or the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Owner count must be at least 1, got {count}")]
    InvalidOwnerCount { count: usize },

    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("At least one founder is required")]
    NoFounders,

    #[error("Founder {address} has {equity_bps} basis points (max 10000)")]
    FounderEquityOutOfRange { address: Address, equity_bps: u32 },

    #[error("Founder equity totals {total_bps} basis points, exceeding 10000")]
    EquityExceeded { total_bps: u32 },

    #[error("Founder {address} is listed more than once")]
    DuplicateFounder { address: Address },

    #[error("Founder address must not be the zero address")]
    ZeroAddressFounder,

    #[error("Threshold {threshold} is out of range for {owners} owner(s)")]
    ThresholdOutOfRange { threshold: u32, owners: usize },

    #[error("Registration duration must be at least one year, got {years}")]
    InvalidDuration { years: u32 },

    #[error("Salt nonce '{salt}' is not a decimal uint256")]
    InvalidSaltNonce { salt: String },
}

/// On-chain state contradicts the registration record. Retrying will not help.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyError {
    #[error("Name '{name}' is already owned by {owner}")]
    NameTaken { name: String, owner: Address },

    #[error("Safe deployed at {deployed} but {predicted} was predicted")]
    PredictedAddressMismatch { predicted: Address, deployed: Address },

    #[error("Name '{name}' resolves to {actual:?} after registration, expected {expected}")]
    OwnershipVerificationFailed {
        name: String,
        expected: Address,
        actual: Option<Address>,
    },

    #[error("Registry entry for '{name}' belongs to {actual}, expected {expected}")]
    RegistryConflict {
        name: String,
        expected: Address,
        actual: Address,
    },
}

/// Failures talking to the chain. Every step re-checks chain state before
/// acting, so these are safe to retry verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Timed out waiting for receipt of {tx}")]
    Timeout { tx: B256 },

    #[error("Transaction {tx} reverted")]
    Reverted { tx: B256 },

    #[error("No ProxyCreation event in deployment receipt {tx}")]
    MissingDeploymentEvent { tx: B256 },

    #[error("Sender {sender} cannot cover {required} wei")]
    InsufficientFunds { sender: Address, required: String },

    #[error("Failed to decode {what}: {message}")]
    Decode { what: String, message: String },
}

/// Coarse classification persisted alongside a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    Validation,
    Consistency,
    Transient,
}

impl ErrorClass {
    /// Whether calling finalize again is expected to make progress.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Validation => write!(f, "validation"),
            ErrorClass::Consistency => write!(f, "consistency"),
            ErrorClass::Transient => write!(f, "transient"),
        }
    }
}

/// Errors surfaced by the orchestrator's caller-facing operations.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("Registration is not ready to finalize until {ready_at}")]
    NotReady { ready_at: DateTime<Utc> },

    #[error("No pending registration for '{name}'")]
    NoPendingRegistration { name: String },

    #[error("Registration for '{name}' is already in progress in this session")]
    RegistrationInProgress { name: String },

    #[error("State store error: {0}")]
    Store(#[source] anyhow::Error),

    /// A step failed and the failure could not be written, so the stored
    /// phase still reflects the state before the step.
    #[error("{error} (failure not recorded: {store})")]
    FailureNotRecorded {
        #[source]
        error: Box<RegistrationError>,
        store: anyhow::Error,
    },
}

impl RegistrationError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RegistrationError::Validation(_) => ErrorClass::Validation,
            RegistrationError::Consistency(_) => ErrorClass::Consistency,
            RegistrationError::Chain(_)
            | RegistrationError::NotReady { .. }
            | RegistrationError::Store(_) => ErrorClass::Transient,
            RegistrationError::NoPendingRegistration { .. }
            | RegistrationError::RegistrationInProgress { .. } => ErrorClass::Validation,
            RegistrationError::FailureNotRecorded { error, .. } => error.class(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_equity_carries_total() {
        let err = ValidationError::EquityExceeded { total_bps: 11000 };
        assert!(err.to_string().contains("11000"));
        let wrapped: RegistrationError = err.into();
        assert_eq!(wrapped.class(), ErrorClass::Validation);
        assert!(!wrapped.is_retryable());
    }

    #[test]
    fn consistency_errors_are_fatal() {
        let err: RegistrationError = ConsistencyError::PredictedAddressMismatch {
            predicted: Address::repeat_byte(1),
            deployed: Address::repeat_byte(2),
        }
        .into();
        assert_eq!(err.class(), ErrorClass::Consistency);
        assert!(!err.is_retryable());
    }

    #[test]
    fn chain_errors_are_retryable() {
        let err: RegistrationError = ChainError::Timeout { tx: B256::ZERO }.into();
        assert_eq!(err.class(), ErrorClass::Transient);
        assert!(err.is_retryable());
    }

    #[test]
    fn not_ready_is_retryable() {
        let err = RegistrationError::NotReady {
            ready_at: Utc::now(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn store_error_keeps_source() {
        let err = RegistrationError::Store(anyhow::anyhow!("disk full"));
        assert!(err.to_string().contains("disk full"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn unrecorded_failure_keeps_step_class_and_store_cause() {
        let err = RegistrationError::FailureNotRecorded {
            error: Box::new(
                ConsistencyError::NameTaken {
                    name: "acme".into(),
                    owner: Address::ZERO,
                }
                .into(),
            ),
            store: anyhow::anyhow!("database is locked"),
        };
        assert_eq!(err.class(), ErrorClass::Consistency);
        assert!(err.to_string().contains("already owned"));
        assert!(err.to_string().contains("database is locked"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn error_class_serializes_lowercase() {
        let json = serde_json::to_string(&ErrorClass::Transient).unwrap();
        assert_eq!(json, "\"transient\"");
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ValidationError::NoFounders);
        assert_std_error(&ConsistencyError::NameTaken {
            name: "acme".into(),
            owner: Address::ZERO,
        });
        assert_std_error(&ChainError::Rpc("boom".into()));
        assert_std_error(&RegistrationError::NoPendingRegistration {
            name: "acme".into(),
        });
    }
}
