//! Configuration for the computing provider.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Repo directory (ledger, default config, job workspaces):
//!   1. $CP_PATH
//!   2. $XDG_DATA_HOME/computing-provider
//!   3. ~/.swan/computing
//!
//! Config file location:
//!   1. $CP_CONFIG (explicit override)
//!   2. <repo>/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api: ApiConfig,
    pub ledger: LedgerConfig,
    pub execution: ExecutionSettings,
    pub settlement: SettlementSettings,
    pub reconcile: ReconcileSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Port for the HTTP API, bound on all interfaces.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Parent of the per-job workspaces.
    pub work_dir: PathBuf,
    /// Concurrent job quota. 0 = available parallelism.
    pub max_concurrent_jobs: u32,
    /// Wall-clock limit per job.
    pub timeout_secs: u64,
    /// Worker argv. `{image}`, `{task_id}`, `{zk_type}`, `{input}` and
    /// `{workspace}` are substituted per job.
    pub command: Vec<String>,
    /// Prover image passed to the worker command.
    pub image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementSettings {
    /// Base URL of the settlement gateway RPC.
    pub rpc_url: String,
    /// This provider's node id on the settlement layer.
    pub node_id: String,
    /// Total submission attempts before giving up for this round.
    pub submit_max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Refusals a retained proof may collect before its task is failed.
    pub max_rejections: u32,
    /// Per-request timeout for settlement RPC calls.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileSettings {
    pub interval_secs: u64,
    /// RUNNING tasks older than this are expired as stale.
    pub stale_after_secs: u64,
    /// Dispatch RECEIVED tasks left behind by admission control.
    pub redispatch_received: bool,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            ledger: LedgerConfig::default(),
            execution: ExecutionSettings::default(),
            settlement: SettlementSettings::default(),
            reconcile: ReconcileSettings::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 9085 }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: repo_dir().join("provider.db"),
        }
    }
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            work_dir: repo_dir().join("jobs"),
            max_concurrent_jobs: 0,
            timeout_secs: 600,
            command: [
                "docker",
                "run",
                "--rm",
                "-v",
                "{workspace}:/workspace",
                "-e",
                "TASK_ID={task_id}",
                "-e",
                "ZK_TYPE={zk_type}",
                "-e",
                "INPUT_PARAM={input}",
                "{image}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            image: "swanhub/ubi-worker:latest".to_string(),
        }
    }
}

impl Default for SettlementSettings {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            node_id: String::new(),
            submit_max_attempts: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            max_rejections: 3,
            request_timeout_secs: 30,
        }
    }
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            stale_after_secs: 1_800,
            redispatch_received: true,
        }
    }
}

impl ExecutionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Effective job quota, resolving 0 to the machine's parallelism.
    pub fn job_quota(&self) -> usize {
        if self.max_concurrent_jobs == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.max_concurrent_jobs as usize
        }
    }
}

impl ReconcileSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// Provider repo directory.
pub fn repo_dir() -> PathBuf {
    if let Ok(p) = std::env::var("CP_PATH") {
        if !p.trim().is_empty() {
            return PathBuf::from(p);
        }
    }
    std::env::var("XDG_DATA_HOME")
        .map(|d| PathBuf::from(d).join("computing-provider"))
        .unwrap_or_else(|_| home().join(".swan").join("computing"))
}

fn home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ProviderConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            ProviderConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| repo_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&ProviderConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply CP_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Some(p) = env_parse("CP_API__PORT") {
            self.api.port = p;
        }
        if let Some(n) = env_parse("CP_EXECUTION__MAX_CONCURRENT_JOBS") {
            self.execution.max_concurrent_jobs = n;
        }
        if let Some(s) = env_parse("CP_EXECUTION__TIMEOUT_SECS") {
            self.execution.timeout_secs = s;
        }
        if let Some(s) = env_parse("CP_RECONCILE__INTERVAL_SECS") {
            self.reconcile.interval_secs = s;
        }
        if let Ok(v) = std::env::var("CP_SETTLEMENT__RPC_URL") {
            self.settlement.rpc_url = v;
        }
        if let Ok(v) = std::env::var("CP_SETTLEMENT__NODE_ID") {
            self.settlement.node_id = v;
        }
        if let Some(n) = env_parse("CP_SETTLEMENT__SUBMIT_MAX_ATTEMPTS") {
            self.settlement.submit_max_attempts = n;
        }
        if let Some(n) = env_parse("CP_SETTLEMENT__MAX_REJECTIONS") {
            self.settlement.max_rejections = n;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
