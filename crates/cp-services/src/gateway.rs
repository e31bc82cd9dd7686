//! Submission gateway: proof submission with bounded retry, settlement
//! polling and account sync on top of a [`SettlementLayer`].

use std::sync::Arc;
use std::time::Duration;

use cp_core::config::SettlementSettings;
use cp_core::{ProofArtifact, ProviderAccount, Task};

use crate::chain::{SettlementEvent, SettlementLayer};
use crate::error::{ChainError, SubmissionError};

#[derive(Clone)]
pub struct SubmissionGateway {
    chain: Arc<dyn SettlementLayer>,
    max_attempts: u32,
    max_rejections: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl SubmissionGateway {
    pub fn new(chain: Arc<dyn SettlementLayer>, settings: &SettlementSettings) -> Self {
        Self {
            chain,
            max_attempts: settings.submit_max_attempts.max(1),
            max_rejections: settings.max_rejections.max(1),
            backoff_base: Duration::from_millis(settings.backoff_base_ms),
            backoff_max: Duration::from_millis(settings.backoff_max_ms),
        }
    }

    /// Submit a proof, retrying transport failures with exponential
    /// backoff. Rejections are returned at once.
    pub async fn submit_proof(
        &self,
        task: &Task,
        artifact: &ProofArtifact,
    ) -> Result<String, SubmissionError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.chain.submit(task, artifact).await {
                Ok(tx_hash) => {
                    tracing::info!(task_id = task.id, attempt, tx_hash = %tx_hash, "proof submitted");
                    return Ok(tx_hash);
                }
                Err(e) => e,
            };

            if !err.is_transient() {
                tracing::warn!(task_id = task.id, attempt, error = %err, "proof rejected");
                return Err(err.into());
            }
            if attempt >= self.max_attempts {
                tracing::warn!(task_id = task.id, attempts = attempt, error = %err, "proof submission exhausted");
                return Err(SubmissionError::Exhausted {
                    task_id: task.id,
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.backoff(attempt);
            tracing::debug!(
                task_id = task.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying proof submission"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Refusals tolerated before a proof is given up on.
    pub fn max_rejections(&self) -> u32 {
        self.max_rejections
    }

    /// Delay after the given failed attempt: base·2^(attempt-1), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1 << exp)
            .min(self.backoff_max)
    }

    pub async fn poll_settlement(&self, tx_hash: &str) -> Result<SettlementEvent, ChainError> {
        self.chain.status(tx_hash).await
    }

    pub async fn fetch_account(&self) -> Result<ProviderAccount, ChainError> {
        self.chain.account().await
    }
}
