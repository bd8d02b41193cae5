//! Result submitter.
//!
//! Sends `submitResult` transactions through the chain client and waits for
//! their inclusion.

use crate::chain::{to_hex, ChainClient, Confirmation, ResultHash};
use crate::error::{SubmissionError, SubmissionResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for the result submitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitterConfig {
    /// Upper bound on waiting for a transaction to be included.
    #[serde(with = "humantime_serde")]
    pub tx_timeout: Duration,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            tx_timeout: Duration::from_secs(60),
        }
    }
}

/// Submits task results to the chain.
#[derive(Clone)]
pub struct ResultSubmitter {
    config: SubmitterConfig,
    chain: Arc<dyn ChainClient>,
}

impl ResultSubmitter {
    /// Create a new result submitter.
    pub fn new(config: SubmitterConfig, chain: Arc<dyn ChainClient>) -> Self {
        Self { config, chain }
    }

    /// Get the submitter configuration.
    pub fn config(&self) -> &SubmitterConfig {
        &self.config
    }

    /// Submit a result and wait for its confirmation.
    pub async fn submit(&self, task_id: u64, result: ResultHash) -> SubmissionResult<Confirmation> {
        debug!(
            task_id,
            result = %to_hex(&result),
            "Submitting submitResult transaction"
        );

        let tx_hash = self.chain.submit_result(task_id, result).await?;
        info!(task_id, tx_hash = %to_hex(&tx_hash), "Result transaction sent");

        let timeout_ms = self.config.tx_timeout.as_millis() as u64;
        let confirmation =
            tokio::time::timeout(self.config.tx_timeout, self.chain.await_confirmation(tx_hash))
                .await
                .map_err(|_| SubmissionError::ConfirmationTimeout {
                    task_id,
                    timeout_ms,
                })??;

        info!(
            task_id,
            tx_hash = %to_hex(&confirmation.tx_hash),
            block_number = confirmation.block_number,
            "Tx confirmed"
        );

        Ok(confirmation)
    }
}
