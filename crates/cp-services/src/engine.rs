//! Execution engine: admission control and isolated job workers.
//!
//! A bounded number of jobs run at once. Admission is non-blocking: when
//! the quota is exhausted the caller gets `Busy` and decides what to do
//! with the task. Each admitted job runs in its own tokio task with a
//! private workspace directory, a wall-clock timeout and a cancel signal.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use cp_core::config::ExecutionSettings;
use cp_core::{ProofArtifact, Task, TaskId};

use crate::error::EngineError;
use crate::runtime::ContainerRuntime;

/// A reserved job slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

/// A launched worker.
#[derive(Debug)]
pub struct JobHandle {
    pub task_id: TaskId,
    pub attempt: u32,
    handle: JoinHandle<Result<ProofArtifact, EngineError>>,
}

impl JobHandle {
    /// Wait for the worker to finish.
    pub async fn outcome(self) -> Result<ProofArtifact, EngineError> {
        match self.handle.await {
            Ok(res) => res,
            Err(e) => Err(EngineError::Execution(format!("worker aborted: {e}"))),
        }
    }
}

#[derive(Clone)]
pub struct ExecutionEngine {
    runtime: Arc<dyn ContainerRuntime>,
    slots: Arc<Semaphore>,
    quota: usize,
    timeout: Duration,
    work_dir: PathBuf,
    workers: Arc<DashMap<TaskId, oneshot::Sender<()>>>,
}

impl ExecutionEngine {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: &ExecutionSettings) -> Self {
        let quota = settings.job_quota();
        tracing::info!(max_concurrent = quota, timeout_secs = settings.timeout_secs, "execution engine ready");
        Self {
            runtime,
            slots: Arc::new(Semaphore::new(quota)),
            quota,
            timeout: settings.timeout(),
            work_dir: settings.work_dir.clone(),
            workers: Arc::new(DashMap::new()),
        }
    }

    /// Reserve a job slot without waiting.
    pub fn admit(&self) -> Result<Slot, EngineError> {
        self.slots
            .clone()
            .try_acquire_owned()
            .map(|permit| Slot { _permit: permit })
            .map_err(|_| EngineError::Busy)
    }

    /// Launch the worker for `task` in a reserved slot.
    pub fn launch(&self, slot: Slot, task: Task, attempt: u32) -> Result<JobHandle, EngineError> {
        let task_id = task.id;
        let (cancel_tx, cancel_rx) = oneshot::channel();
        match self.workers.entry(task_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(EngineError::AlreadyRunning(task_id))
            }
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(cancel_tx);
            }
        }

        let runtime = self.runtime.clone();
        let workers = self.workers.clone();
        let timeout = self.timeout;
        let workspace = self.work_dir.join(format!("task-{task_id}-{attempt}"));

        let handle = tokio::spawn(async move {
            let res = run_job(runtime, &task, workspace, timeout, cancel_rx).await;
            workers.remove(&task_id);
            drop(slot);
            res
        });

        Ok(JobHandle {
            task_id,
            attempt,
            handle,
        })
    }

    /// Signal a running worker to stop. Returns false if no worker for
    /// the task is running here.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        match self.workers.remove(&task_id) {
            Some((_, tx)) => tx.send(()).is_ok(),
            None => false,
        }
    }

    pub fn is_running(&self, task_id: TaskId) -> bool {
        self.workers.contains_key(&task_id)
    }

    pub fn active(&self) -> usize {
        self.quota - self.slots.available_permits()
    }

    pub fn quota(&self) -> usize {
        self.quota
    }
}

async fn run_job(
    runtime: Arc<dyn ContainerRuntime>,
    task: &Task,
    workspace: PathBuf,
    timeout: Duration,
    cancel: oneshot::Receiver<()>,
) -> Result<ProofArtifact, EngineError> {
    tokio::fs::create_dir_all(&workspace).await?;
    tracing::debug!(task_id = task.id, workspace = %workspace.display(), "job started");

    let res = tokio::select! {
        res = tokio::time::timeout(timeout, runtime.run(task, &workspace)) => match res {
            Ok(inner) => inner,
            Err(_) => Err(EngineError::Timeout { timeout_secs: timeout.as_secs() }),
        },
        _ = cancel => Err(EngineError::Cancelled),
    };

    if let Err(e) = tokio::fs::remove_dir_all(&workspace).await {
        tracing::debug!(task_id = task.id, error = %e, "workspace cleanup failed");
    }
    res
}
