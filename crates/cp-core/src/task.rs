//! UBI task domain types: tasks, job attempts, proof artifacts, and the
//! provider account snapshot.
//!
//! The two state machines live here so every caller consults the same
//! transition tables: `TaskStatus` for execution, `RewardStatus` for
//! settlement.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Network-assigned numeric task id.
pub type TaskId = i64;

/// Unix seconds, saturating to 0 if the clock is before the epoch.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// ── Status enums ──────────────────────────────────────────────────────────────

/// Execution lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Received,
    Running,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    /// SUCCESS and FAILED end execution; nothing moves out of them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Edges of the execution state machine. Self-loops are not edges.
    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Received, Running) | (Running, Success) | (Running, Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

impl FromStr for TaskStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "received" => Ok(Self::Received),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(UnknownVariant::new("task status", s)),
        }
    }
}

/// Settlement outcome of a submitted proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardStatus {
    Pending,
    Paid,
    Challenged,
    Slashed,
}

impl RewardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Challenged => "challenged",
            Self::Slashed => "slashed",
        }
    }

    /// Whether `to` may follow `current`. `None` is a task that has not
    /// been assigned a reward status yet. Re-applying the current status
    /// is allowed so replays stay idempotent; SLASHED only accepts itself.
    pub fn reachable(current: Option<RewardStatus>, to: RewardStatus) -> bool {
        use RewardStatus::*;
        match (current, to) {
            (Some(a), b) if a == b => true,
            (None | Some(Pending), Pending | Paid | Challenged) => true,
            (Some(Paid), Challenged) => true,
            (Some(Challenged), Slashed | Paid) => true,
            _ => false,
        }
    }

    /// Statuses the reconciliation scheduler no longer needs to poll.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Paid | Self::Slashed)
    }
}

impl fmt::Display for RewardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

impl FromStr for RewardStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "challenged" => Ok(Self::Challenged),
            "slashed" => Ok(Self::Slashed),
            _ => Err(UnknownVariant::new("reward status", s)),
        }
    }
}

/// Category of proof work a task needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Cpu,
    Gpu,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

impl FromStr for ResourceType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "gpu" => Ok(Self::Gpu),
            _ => Err(UnknownVariant::new("resource type", s)),
        }
    }
}

/// Why a task ended FAILED. Persisted on both the task and the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Timeout,
    ExecutionError,
    Cancelled,
    /// Stuck in RUNNING past the staleness threshold.
    Stale,
    /// The settlement layer refused the proof too many times.
    Rejected,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ExecutionError => "execution_error",
            Self::Cancelled => "cancelled",
            Self::Stale => "stale",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureReason {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeout" => Ok(Self::Timeout),
            "execution_error" => Ok(Self::ExecutionError),
            "cancelled" => Ok(Self::Cancelled),
            "stale" => Ok(Self::Stale),
            "rejected" => Ok(Self::Rejected),
            _ => Err(UnknownVariant::new("failure reason", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// ── Task ──────────────────────────────────────────────────────────────────────

/// Inbound task request, as received from the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    pub name: String,
    pub resource_type: ResourceType,
    pub zk_type: String,
    /// Contract the proof is settled against.
    pub contract: String,
    /// Opaque input handed to the worker (usually a URL to the witness).
    pub input_param: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    #[error("task id must be positive, got {0}")]
    InvalidId(TaskId),
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid contract address: {0:?}")]
    InvalidContract(String),
}

impl TaskSpec {
    /// Reject malformed requests before anything is written.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.id <= 0 {
            return Err(SpecError::InvalidId(self.id));
        }
        if self.name.trim().is_empty() {
            return Err(SpecError::Missing("name"));
        }
        if self.zk_type.trim().is_empty() {
            return Err(SpecError::Missing("zk_type"));
        }
        if self.input_param.trim().is_empty() {
            return Err(SpecError::Missing("input_param"));
        }
        let hex_part = self
            .contract
            .strip_prefix("0x")
            .ok_or_else(|| SpecError::InvalidContract(self.contract.clone()))?;
        if hex_part.len() != 40 || hex::decode(hex_part).is_err() {
            return Err(SpecError::InvalidContract(self.contract.clone()));
        }
        Ok(())
    }

    /// Content key for "equivalent task" detection. The id is excluded so
    /// the same work re-announced under a new id is still caught.
    pub fn fingerprint(&self) -> String {
        let mut h = blake3::Hasher::new();
        for field in [
            self.name.as_str(),
            self.resource_type.as_str(),
            self.zk_type.as_str(),
            self.contract.as_str(),
            self.input_param.as_str(),
        ] {
            h.update(field.as_bytes());
            h.update(&[0]);
        }
        hex::encode(h.finalize().as_bytes())
    }
}

/// A persisted task and its settlement record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub resource_type: ResourceType,
    pub zk_type: String,
    pub contract: String,
    pub input_param: String,
    pub status: TaskStatus,
    pub failure_reason: Option<FailureReason>,
    /// Unix seconds. Written once at creation.
    pub created_at: i64,
    pub updated_at: i64,
    /// Proof transaction hash. Present whenever `status == Success`.
    pub tx_hash: Option<String>,
    pub reward_status: Option<RewardStatus>,
    /// Decimal string, set when PAID.
    pub reward: Option<String>,
    pub reward_tx: Option<String>,
    pub challenge_tx: Option<String>,
    pub slash_tx: Option<String>,
}

// ── Jobs ──────────────────────────────────────────────────────────────────────

/// Where a single execution attempt ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum JobOutcome {
    Running,
    /// Artifact verified and retained, proof not yet on chain.
    Proved,
    /// Proof handed to the settlement layer, awaiting its answer.
    Submitting,
    /// Proof accepted by the settlement layer.
    Submitted,
    Failed(FailureReason),
}

impl JobOutcome {
    /// Running, proved and submitting jobs all hold the task's single
    /// worker slot.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Proved | Self::Submitting)
    }

    /// A verified artifact exists that has not reached the chain yet.
    pub fn holds_proof(&self) -> bool {
        matches!(self, Self::Proved | Self::Submitting)
    }
}

/// One execution attempt of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub task_id: TaskId,
    /// 1-based attempt sequence number.
    pub attempt: u32,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub outcome: JobOutcome,
    /// Engine-reported diagnostics for failed attempts.
    pub diagnostic: Option<String>,
    /// Engine / algorithm that produced the artifact.
    pub engine: Option<String>,
}

/// Verified output of a successful job, ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofArtifact {
    pub proof: String,
    /// Provenance: prover engine or algorithm identifier.
    pub engine: String,
}

// ── Provider account ──────────────────────────────────────────────────────────

/// Settlement-layer view of this provider. Replaced whole on every sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAccount {
    pub node_id: String,
    pub owner_address: String,
    pub beneficiary_address: String,
    /// Decimal strings as reported by the chain.
    pub balance: String,
    pub collateral: String,
    /// Unix seconds of the sync that produced this snapshot.
    #[serde(default)]
    pub synced_at: i64,
}
