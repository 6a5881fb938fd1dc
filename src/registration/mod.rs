//! The registration saga: record, step executors and the orchestrator that
//! drives them.

pub mod executors;
pub mod orchestrator;
pub mod record;

pub use executors::{StepContext, StepExecutor, StepSettings};
pub use orchestrator::{Orchestrator, StartOutcome, StartRequest, SweepOutcome};
pub use record::{
    ErrorUpdate, Founder, Phase, RecordPatch, RegistrationRecord, SessionId, TransitionError,
};
