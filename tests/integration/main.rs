//! Computing provider integration test harness.
//!
//! Every test builds a full provider (ledger, engine, gateway,
//! orchestrator) around scripted doubles for the container runtime and
//! the settlement layer. No containers or chain are needed:
//!
//!   cargo test --test integration
//!
//! The runtime picks its behaviour from the task's `zk_type`:
//! `slow` never finishes on its own, `broken` exits with an error, and
//! anything else proves at once.

mod api;
mod concurrency;
mod lifecycle;
mod settlement;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cp_core::config::{ExecutionSettings, ReconcileSettings, SettlementSettings};
use cp_core::{ProofArtifact, ProviderAccount, ResourceType, Task, TaskId, TaskSpec};
use cp_services::{
    ChainError, ContainerRuntime, EngineError, ExecutionEngine, Ledger, Orchestrator,
    SettlementEvent, SettlementLayer, SubmissionGateway, TaskView,
};

// ── Doubles ───────────────────────────────────────────────────────────────────

pub struct ScriptedRuntime;

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn run(&self, task: &Task, _: &Path) -> Result<ProofArtifact, EngineError> {
        match task.zk_type.as_str() {
            "slow" => {
                tokio::time::sleep(Duration::from_secs(86_400)).await;
            }
            "broken" => {
                return Err(EngineError::Execution("exit code 137: out of memory".into()));
            }
            _ => {}
        }
        Ok(ProofArtifact {
            proof: format!("0xproof{}", task.id),
            engine: "scripted-prover".into(),
        })
    }
}

/// Settlement layer double. Submissions return `0xtx{id}` (or a fixed
/// hash per task) unless `down` or `refusing`, after `submit_delay_ms`;
/// statuses come from a per-tx table.
#[derive(Default)]
pub struct ScriptedChain {
    pub down: AtomicBool,
    pub refusing: AtomicBool,
    pub submit_delay_ms: AtomicU64,
    pub submits: AtomicUsize,
    pub tx_hashes: Mutex<HashMap<TaskId, String>>,
    pub statuses: Mutex<HashMap<String, Result<SettlementEvent, String>>>,
}

impl ScriptedChain {
    pub fn set_tx_hash(&self, id: TaskId, tx: &str) {
        self.tx_hashes.lock().unwrap().insert(id, tx.to_string());
    }

    pub fn set_status(&self, tx: &str, event: SettlementEvent) {
        self.statuses.lock().unwrap().insert(tx.to_string(), Ok(event));
    }

    pub fn fail_status(&self, tx: &str, msg: &str) {
        self.statuses
            .lock()
            .unwrap()
            .insert(tx.to_string(), Err(msg.to_string()));
    }
}

#[async_trait]
impl SettlementLayer for ScriptedChain {
    async fn submit(&self, task: &Task, _: &ProofArtifact) -> Result<String, ChainError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        let delay = self.submit_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(ChainError::Transport("connection refused".into()));
        }
        if self.refusing.load(Ordering::SeqCst) {
            return Err(ChainError::Rejected("proof failed verification".into()));
        }
        let fixed = self.tx_hashes.lock().unwrap().get(&task.id).cloned();
        Ok(fixed.unwrap_or_else(|| format!("0xtx{}", task.id)))
    }

    async fn status(&self, tx_hash: &str) -> Result<SettlementEvent, ChainError> {
        match self.statuses.lock().unwrap().get(tx_hash) {
            Some(Ok(ev)) => Ok(ev.clone()),
            Some(Err(msg)) => Err(ChainError::Transport(msg.clone())),
            None => Ok(SettlementEvent::Pending),
        }
    }

    async fn account(&self) -> Result<ProviderAccount, ChainError> {
        Ok(ProviderAccount {
            node_id: "cp-integration".into(),
            owner_address: "0xowner".into(),
            beneficiary_address: "0xbeneficiary".into(),
            balance: "12.5".into(),
            collateral: "100".into(),
            synced_at: 1,
        })
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

pub struct Provider {
    pub orch: Orchestrator,
    pub chain: Arc<ScriptedChain>,
}

pub struct ProviderOptions {
    pub quota: u32,
    pub timeout_secs: u64,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            quota: 4,
            timeout_secs: 600,
        }
    }
}

static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

pub fn provider(opts: ProviderOptions) -> Provider {
    let n = NEXT_DIR.fetch_add(1, Ordering::SeqCst);
    let exec = ExecutionSettings {
        work_dir: std::env::temp_dir().join(format!("cp-it-{}-{n}", std::process::id())),
        max_concurrent_jobs: opts.quota,
        timeout_secs: opts.timeout_secs,
        ..ExecutionSettings::default()
    };
    let settle = SettlementSettings {
        submit_max_attempts: 2,
        backoff_base_ms: 1,
        backoff_max_ms: 2,
        ..SettlementSettings::default()
    };

    let chain = Arc::new(ScriptedChain::default());
    let ledger = Ledger::open_in_memory().expect("in-memory ledger");
    let engine = ExecutionEngine::new(Arc::new(ScriptedRuntime), &exec);
    let gateway = SubmissionGateway::new(chain.clone(), &settle);
    Provider {
        orch: Orchestrator::new(ledger, engine, gateway),
        chain,
    }
}

pub fn reconcile_settings(stale_after_secs: u64) -> ReconcileSettings {
    ReconcileSettings {
        interval_secs: 1,
        stale_after_secs,
        redispatch_received: true,
    }
}

pub fn spec(id: TaskId, zk_type: &str) -> TaskSpec {
    TaskSpec {
        id,
        name: format!("ubi-task-{id}"),
        resource_type: ResourceType::Gpu,
        zk_type: zk_type.into(),
        contract: format!("0x{}", "5a".repeat(20)),
        input_param: format!("https://inputs.example/ubi/{id}.json"),
    }
}

/// Poll the orchestrator until `pred` holds for the task.
pub async fn wait_for(orch: &Orchestrator, id: TaskId, pred: impl Fn(&TaskView) -> bool) -> TaskView {
    for _ in 0..1_000 {
        let view = orch.get_task(id).expect("task exists");
        if pred(&view) {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {id} never reached the expected state");
}

/// Wait until the task's proof is retained and no submission holds it.
pub async fn wait_retained(orch: &Orchestrator, id: TaskId) -> TaskView {
    wait_for(orch, id, |_| {
        orch.ledger()
            .unsubmitted_proofs()
            .expect("retained proofs")
            .iter()
            .any(|(job, _)| job.task_id == id)
    })
    .await
}

/// Wait until the chain has seen `n` submissions.
pub async fn wait_submits(chain: &ScriptedChain, n: usize) {
    for _ in 0..1_000 {
        if chain.submits.load(Ordering::SeqCst) >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("chain never saw {n} submissions");
}

pub async fn wait_idle(orch: &Orchestrator) {
    for _ in 0..1_000 {
        if orch.resources().expect("resources").active_jobs == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("workers never drained");
}
