//! EVM chain client for the compute task worker.
//!
//! Implements [`vb_worker::ChainClient`] over Ethereum JSON-RPC: reads the
//! task contract's logs, signs `submitResult` transactions with a local key
//! and waits for their receipts. [`EthChainClient::request_compute`] is the
//! requester side, used to open new tasks.

use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, PendingTransaction, Provider, ProviderError};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Filter, TransactionRequest, ValueOrArray, H256, U64};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use vb_worker::{
    to_hex, ChainClient, ChainError, ChainResult, Confirmation, InputData, ResultHash, TaskEvent,
    TxHash, WorkerMetrics,
};

pub mod contract;

pub use contract::{derive_input_data, DecodedLogs, TaskContract, TASK_CONTRACT_ABI};

/// Errors raised while setting up the chain client.
#[derive(Debug, Error)]
pub enum ChainClientError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("Invalid RPC URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid contract address: {0}")]
    InvalidAddress(String),
    #[error("Invalid signing key")]
    InvalidKey,
    #[error("Contract ABI error: {0}")]
    Abi(String),
}

/// Connection settings for the EVM node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainClientConfig {
    /// HTTP JSON-RPC endpoint.
    pub rpc_url: String,
    /// Task contract address.
    pub contract_address: String,
    /// Provider polling interval for pending transactions.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Blocks required on top of a receipt before it counts as included.
    pub required_confirmations: usize,
}

impl Default for ChainClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            contract_address: String::new(),
            poll_interval: Duration::from_secs(2),
            required_confirmations: 1,
        }
    }
}

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// A confirmed `requestCompute` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeRequest {
    /// Task id the contract assigns to the request.
    pub task_id: u64,
    /// Input data committed on chain.
    pub input_data: InputData,
    /// Receipt of the request transaction.
    pub confirmation: Confirmation,
}

/// Chain client backed by an EVM node and a local signing key.
pub struct EthChainClient {
    config: ChainClientConfig,
    client: Arc<SignerClient>,
    contract_address: Address,
    contract: TaskContract,
    metrics: Option<WorkerMetrics>,
}

impl EthChainClient {
    /// Connect to the node and bind the signing key to its chain id.
    ///
    /// `private_key` is a hex secp256k1 key, with or without `0x`.
    pub async fn connect(
        config: ChainClientConfig,
        private_key: &str,
    ) -> Result<Self, ChainClientError> {
        let contract_address: Address = config
            .contract_address
            .parse()
            .map_err(|_| ChainClientError::InvalidAddress(config.contract_address.clone()))?;

        let wallet: LocalWallet = private_key
            .trim()
            .trim_start_matches("0x")
            .parse()
            .map_err(|_| ChainClientError::InvalidKey)?;

        let contract = TaskContract::new()?;

        let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
            .map_err(|e| ChainClientError::InvalidUrl(format!("{}: {}", config.rpc_url, e)))?
            .interval(config.poll_interval);

        let chain_id = provider.get_chainid().await?.as_u64();
        let wallet = wallet.with_chain_id(chain_id);

        info!(
            rpc_url = %config.rpc_url,
            chain_id,
            contract = ?contract_address,
            signer = ?wallet.address(),
            "Connected to EVM node"
        );

        Ok(Self {
            client: Arc::new(SignerMiddleware::new(provider, wallet)),
            config,
            contract_address,
            contract,
            metrics: None,
        })
    }

    /// Count skipped logs on the worker metrics.
    pub fn with_metrics(mut self, metrics: WorkerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ChainClientConfig {
        &self.config
    }

    /// Address results are submitted from.
    pub fn signer_address(&self) -> Address {
        self.client.signer().address()
    }

    /// Task id the contract will assign to this signer's next request.
    pub async fn next_task_id(&self) -> ChainResult<u64> {
        let calldata = self.contract.encode_next_task_id(self.signer_address())?;
        let tx: TypedTransaction = TransactionRequest::new()
            .to(self.contract_address)
            .data(calldata)
            .into();

        let output = self
            .client
            .call(&tx, None)
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        self.contract.decode_next_task_id(&output)
    }

    /// Open a compute task for `raw_data` and wait for its receipt.
    ///
    /// The committed input data binds the raw data to the task id the
    /// contract is about to assign, see [`derive_input_data`].
    pub async fn request_compute(
        &self,
        raw_data: &[u8],
        lifecycle_secs: u64,
    ) -> ChainResult<ComputeRequest> {
        let task_id = self.next_task_id().await?;
        let input_data = derive_input_data(task_id, raw_data);
        debug!(task_id, input_data = %to_hex(&input_data), "Requesting compute");

        let calldata = self
            .contract
            .encode_request_compute(input_data, lifecycle_secs)?;
        let tx_hash = self.send(calldata).await?;
        let confirmation = self.await_confirmation(tx_hash).await?;

        info!(
            task_id,
            tx_hash = %to_hex(&confirmation.tx_hash),
            block = confirmation.block_number,
            "Compute requested"
        );

        Ok(ComputeRequest {
            task_id,
            input_data,
            confirmation,
        })
    }

    async fn send(&self, calldata: Bytes) -> ChainResult<TxHash> {
        let tx = TransactionRequest::new()
            .to(self.contract_address)
            .data(calldata);

        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(|e| ChainError::Rejected(e.to_string()))?;
        let tx_hash: H256 = *pending;

        Ok(tx_hash.0)
    }
}

#[async_trait]
impl ChainClient for EthChainClient {
    async fn block_number(&self) -> ChainResult<u64> {
        let head = self
            .client
            .get_block_number()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        Ok(head.as_u64())
    }

    async fn query_events(&self, from_block: u64, to_block: u64) -> ChainResult<Vec<TaskEvent>> {
        let filter = Filter::new()
            .address(self.contract_address)
            .from_block(from_block)
            .to_block(to_block)
            .topic0(ValueOrArray::Array(vec![
                Some(self.contract.created_topic()),
                Some(self.contract.accepted_topic()),
            ]));

        let logs = self
            .client
            .get_logs(&filter)
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        let decoded = self.contract.decode_batch(logs);
        if decoded.undecodable > 0 {
            if let Some(metrics) = &self.metrics {
                metrics
                    .undecodable_logs_total
                    .inc_by(decoded.undecodable as u64);
            }
        }

        Ok(decoded.events)
    }

    async fn submit_result(&self, task_id: u64, result: ResultHash) -> ChainResult<TxHash> {
        let calldata = self.contract.encode_submit_result(task_id, result)?;
        self.send(calldata).await
    }

    async fn await_confirmation(&self, tx_hash: TxHash) -> ChainResult<Confirmation> {
        let receipt = PendingTransaction::new(H256::from(tx_hash), self.client.provider())
            .interval(self.config.poll_interval)
            .confirmations(self.config.required_confirmations.max(1))
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        let Some(receipt) = receipt else {
            warn!(tx_hash = %to_hex(&tx_hash), "Transaction dropped from mempool");
            return Err(ChainError::Dropped {
                tx_hash: to_hex(&tx_hash),
            });
        };

        if receipt.status == Some(U64::zero()) {
            return Err(ChainError::Reverted {
                tx_hash: to_hex(&tx_hash),
            });
        }

        let block_number = receipt
            .block_number
            .ok_or_else(|| ChainError::Decode("receipt without block number".to_string()))?
            .as_u64();

        Ok(Confirmation {
            tx_hash,
            block_number,
        })
    }
}
