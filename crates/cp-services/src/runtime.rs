//! Container runtime seam: the thing that actually produces a proof.
//!
//! The engine only knows the [`ContainerRuntime`] trait. Production uses
//! [`CommandRuntime`], which runs the configured worker argv as a child
//! process; tests substitute doubles.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use cp_core::config::ExecutionSettings;
use cp_core::{ProofArtifact, Task};

use crate::error::EngineError;

/// Runs one task inside an isolated worker and returns its artifact.
///
/// Implementations must stop the worker when the returned future is
/// dropped; the engine drops it on timeout and cancellation.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    async fn run(&self, task: &Task, workspace: &Path) -> Result<ProofArtifact, EngineError>;
}

/// Runs the worker as a child process built from an argv template.
#[derive(Debug, Clone)]
pub struct CommandRuntime {
    command: Vec<String>,
    image: String,
}

/// Last JSON line the worker prints on stdout.
#[derive(Deserialize)]
struct WorkerOutput {
    proof: String,
    #[serde(default)]
    engine: Option<String>,
}

impl CommandRuntime {
    pub fn new(settings: &ExecutionSettings) -> Self {
        Self {
            command: settings.command.clone(),
            image: settings.image.clone(),
        }
    }

    pub fn argv(&self, task: &Task, workspace: &Path) -> Vec<String> {
        let workspace = workspace.to_string_lossy();
        self.command
            .iter()
            .map(|arg| {
                arg.replace("{image}", &self.image)
                    .replace("{task_id}", &task.id.to_string())
                    .replace("{zk_type}", &task.zk_type)
                    .replace("{input}", &task.input_param)
                    .replace("{workspace}", &workspace)
            })
            .collect()
    }
}

#[async_trait]
impl ContainerRuntime for CommandRuntime {
    async fn run(&self, task: &Task, workspace: &Path) -> Result<ProofArtifact, EngineError> {
        let argv = self.argv(task, workspace);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| EngineError::Execution("worker command is empty".into()))?;

        let output = tokio::process::Command::new(program)
            .args(args)
            .current_dir(workspace)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| EngineError::Execution(format!("failed to spawn '{program}': {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output.status.code().unwrap_or(-1);
            let detail = if stderr.trim().is_empty() { &stdout } else { &stderr };
            return Err(EngineError::Execution(format!(
                "exit code {code}: {}",
                detail.trim()
            )));
        }

        parse_artifact(&stdout, &self.image)
    }
}

/// Verify worker stdout: the last non-empty line must be a JSON object
/// carrying a non-empty proof.
pub fn parse_artifact(stdout: &str, default_engine: &str) -> Result<ProofArtifact, EngineError> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| EngineError::Execution("worker produced no output".into()))?;

    let out: WorkerOutput = serde_json::from_str(line)
        .map_err(|e| EngineError::Execution(format!("unreadable worker output: {e}")))?;
    if out.proof.trim().is_empty() {
        return Err(EngineError::Execution("worker returned an empty proof".into()));
    }

    Ok(ProofArtifact {
        proof: out.proof,
        engine: out
            .engine
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| default_engine.to_string()),
    })
}
