//! Error taxonomy for the task lifecycle.
//!
//! Each component has its own error enum; `ProviderError` is what the
//! orchestrator façade returns and what the transport layer maps to
//! status codes.

use cp_core::{RewardStatus, SpecError, TaskId, TaskStatus};
use thiserror::Error;

/// Top-level error returned by the orchestrator.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Malformed task request. Never persisted.
    #[error("invalid task: {0}")]
    Validation(#[from] SpecError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

impl ProviderError {
    /// Lost an optimistic-write race: someone else already handled it.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Ledger(
                LedgerError::Conflict { .. }
                    | LedgerError::ActiveJob(_)
                    | LedgerError::ProofRetained(_)
            ) | Self::Engine(EngineError::AlreadyRunning(_))
        )
    }

    /// Admission control saturated; retry later.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Engine(EngineError::Busy))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Ledger(LedgerError::NotFound(_)))
    }
}

/// Task Ledger errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Same id, or same content under another id. Carries the recorded id.
    #[error("task already recorded as {0}")]
    DuplicateTask(TaskId),

    #[error("task {0} not found")]
    NotFound(TaskId),

    /// The one-active-job-per-task index rejected a second job.
    #[error("task {0} already has an active job")]
    ActiveJob(TaskId),

    /// Conditional write lost: the task is no longer in the expected state.
    #[error("task {id} is {actual}, expected {expected}")]
    Conflict {
        id: TaskId,
        expected: TaskStatus,
        actual: TaskStatus,
    },

    /// The task holds a verified proof that has not been settled, so it
    /// cannot be failed from outside the settlement path.
    #[error("task {0} holds an unsettled proof")]
    ProofRetained(TaskId),

    #[error("task {id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        id: TaskId,
        from: String,
        to: String,
    },

    #[error("task {id}: settlement for {given} does not match proof tx {recorded:?}")]
    ProofMismatch {
        id: TaskId,
        given: String,
        recorded: Option<String>,
    },

    #[error("no task with proof tx {0}")]
    UnknownTx(String),

    #[error("corrupt ledger row: {0}")]
    Decode(String),

    #[error("ledger storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("ledger lock poisoned")]
    Poisoned,
}

impl LedgerError {
    pub(crate) fn invalid_reward(id: TaskId, from: Option<RewardStatus>, to: RewardStatus) -> Self {
        Self::InvalidTransition {
            id,
            from: from.map_or_else(|| "NONE".to_string(), |s| s.to_string()),
            to: to.to_string(),
        }
    }

    pub(crate) fn invalid_status(id: TaskId, from: TaskStatus, to: TaskStatus) -> Self {
        Self::InvalidTransition {
            id,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// Execution Engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Concurrent-job quota exhausted.
    #[error("job quota exhausted")]
    Busy,

    #[error("task {0} already has an active worker")]
    AlreadyRunning(TaskId),

    #[error("job timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("worker failed: {0}")]
    Execution(String),

    #[error("job cancelled")]
    Cancelled,

    #[error("job workspace error: {0}")]
    Workspace(#[from] std::io::Error),
}

/// Settlement-layer transport errors.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("settlement transport failed: {0}")]
    Transport(String),

    #[error("settlement layer rejected request: {0}")]
    Rejected(String),

    #[error("invalid settlement response: {0}")]
    Decode(String),
}

impl ChainError {
    /// Network-level failures are worth retrying; rejections are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl SubmissionError {
    /// The settlement layer answered and refused the proof.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Chain(ChainError::Rejected(_)))
    }
}

/// Submission Gateway errors.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// Retry budget spent. The task keeps its proof for the next round.
    #[error("proof submission for task {task_id} failed after {attempts} attempts: {last}")]
    Exhausted {
        task_id: TaskId,
        attempts: u32,
        last: ChainError,
    },
}

pub type LedgerResult<T> = Result<T, LedgerError>;
pub type ProviderResult<T> = Result<T, ProviderError>;
