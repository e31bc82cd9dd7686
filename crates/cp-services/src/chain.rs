//! Settlement layer client.
//!
//! [`SettlementLayer`] is the boundary to the chain: proof submission,
//! settlement status, and the provider account. [`HttpSettlementClient`]
//! talks JSON to the settlement gateway at `settlement.rpc_url`:
//!
//! - `POST /proofs` → `{ "tx_hash": "0x…" }`
//! - `GET  /proofs/{tx_hash}` → a [`SettlementEvent`]
//! - `GET  /providers/{node_id}` → a [`ProviderAccount`]

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use cp_core::config::SettlementSettings;
use cp_core::{now_secs, ProofArtifact, ProviderAccount, Task, TaskId};

use crate::error::ChainError;

/// What the settlement layer reports for a submitted proof.
///
/// Pushed callbacks carry the same shape as poll results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SettlementEvent {
    Pending,
    Confirmed {
        #[serde(default)]
        reward: Option<String>,
        #[serde(default)]
        reward_tx: Option<String>,
    },
    Challenged {
        #[serde(default)]
        challenge_tx: Option<String>,
    },
    Slashed {
        #[serde(default)]
        slash_tx: Option<String>,
    },
    /// The challenge failed; the reward stands.
    Defended {
        #[serde(default)]
        reward_tx: Option<String>,
    },
}

impl SettlementEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed { .. } => "confirmed",
            Self::Challenged { .. } => "challenged",
            Self::Slashed { .. } => "slashed",
            Self::Defended { .. } => "defended",
        }
    }
}

#[async_trait]
pub trait SettlementLayer: Send + Sync + 'static {
    /// Put a proof on chain. Returns the proof transaction hash.
    async fn submit(&self, task: &Task, artifact: &ProofArtifact) -> Result<String, ChainError>;

    async fn status(&self, tx_hash: &str) -> Result<SettlementEvent, ChainError>;

    async fn account(&self) -> Result<ProviderAccount, ChainError>;
}

#[derive(Serialize)]
struct SubmitProofRequest<'a> {
    node_id: &'a str,
    task_id: TaskId,
    contract: &'a str,
    zk_type: &'a str,
    proof: &'a str,
    engine: &'a str,
}

#[derive(Deserialize)]
struct SubmitProofResponse {
    tx_hash: String,
}

pub struct HttpSettlementClient {
    client: reqwest::Client,
    base_url: String,
    node_id: String,
}

impl HttpSettlementClient {
    pub fn new(settings: &SettlementSettings) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.rpc_url.trim_end_matches('/').to_string(),
            node_id: settings.node_id.clone(),
        })
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(
        resp: reqwest::Response,
    ) -> Result<T, ChainError> {
        let status = resp.status();
        if status.is_server_error() {
            return Err(ChainError::Transport(format!("settlement gateway returned {status}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ChainError::Rejected(format!("{status}: {}", body.trim())));
        }
        resp.json::<T>()
            .await
            .map_err(|e| ChainError::Decode(e.to_string()))
    }
}

fn transport(e: reqwest::Error) -> ChainError {
    ChainError::Transport(e.to_string())
}

#[async_trait]
impl SettlementLayer for HttpSettlementClient {
    async fn submit(&self, task: &Task, artifact: &ProofArtifact) -> Result<String, ChainError> {
        let body = SubmitProofRequest {
            node_id: &self.node_id,
            task_id: task.id,
            contract: &task.contract,
            zk_type: &task.zk_type,
            proof: &artifact.proof,
            engine: &artifact.engine,
        };
        let resp = self
            .client
            .post(format!("{}/proofs", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let out: SubmitProofResponse = Self::read_json(resp).await?;
        if out.tx_hash.trim().is_empty() {
            return Err(ChainError::Decode("empty tx_hash".into()));
        }
        Ok(out.tx_hash)
    }

    async fn status(&self, tx_hash: &str) -> Result<SettlementEvent, ChainError> {
        let resp = self
            .client
            .get(format!("{}/proofs/{tx_hash}", self.base_url))
            .send()
            .await
            .map_err(transport)?;
        Self::read_json(resp).await
    }

    async fn account(&self) -> Result<ProviderAccount, ChainError> {
        let resp = self
            .client
            .get(format!("{}/providers/{}", self.base_url, self.node_id))
            .send()
            .await
            .map_err(transport)?;
        let mut account: ProviderAccount = Self::read_json(resp).await?;
        account.synced_at = now_secs();
        Ok(account)
    }
}
