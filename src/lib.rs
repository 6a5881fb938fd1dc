//! Company registration orchestrator.
//!
//! One `start` + `finalize` pair claims `<name>.eth`, deploys a Safe to its
//! counterfactual address, hands the name to that Safe and records the
//! company in an on-chain registry. The saga is resumable from any phase and
//! converges on a single outcome per name under retries and races.

pub mod chain;
pub mod charter_config;
pub mod clock;
pub mod config;
pub mod errors;
pub mod policy;
pub mod registration;
pub mod safe;
pub mod store;
