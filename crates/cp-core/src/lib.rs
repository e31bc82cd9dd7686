//! cp-core — shared task types, state machines, and configuration.
//! All other computing-provider crates depend on this one.

pub mod config;
pub mod task;

pub use task::{
    now_secs, FailureReason, Job, JobOutcome, ProofArtifact, ProviderAccount, ResourceType,
    RewardStatus, SpecError, Task, TaskId, TaskSpec, TaskStatus,
};
