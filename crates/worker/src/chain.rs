//! Chain client boundary.
//!
//! The worker never talks to a node directly. Everything it needs from the
//! ledger (reading contract events, the current head, submitting results and
//! waiting for their inclusion) goes through [`ChainClient`], so the
//! coordination logic can run against an EVM node or an in-memory mock.

use crate::error::ChainResult;
use async_trait::async_trait;

/// Transaction hash as returned by the ledger.
pub type TxHash = [u8; 32];

/// Opaque task payload supplied at creation time.
pub type InputData = [u8; 32];

/// Result value submitted back on-chain.
pub type ResultHash = [u8; 32];

/// Contract events relevant to the task lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    /// A new compute task was created on-chain.
    Created {
        /// Task ID assigned by the contract.
        task_id: u64,
        /// Input payload.
        input_data: InputData,
        /// Block the event was emitted in.
        block_number: u64,
    },
    /// A submitted result was accepted on-chain.
    Accepted {
        /// Task ID.
        task_id: u64,
        /// Block the event was emitted in.
        block_number: u64,
    },
}

impl TaskEvent {
    /// Task the event refers to.
    pub fn task_id(&self) -> u64 {
        match self {
            TaskEvent::Created { task_id, .. } | TaskEvent::Accepted { task_id, .. } => *task_id,
        }
    }

    /// Block the event was emitted in.
    pub fn block_number(&self) -> u64 {
        match self {
            TaskEvent::Created { block_number, .. }
            | TaskEvent::Accepted { block_number, .. } => *block_number,
        }
    }

    /// Short event name for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskEvent::Created { .. } => "TaskCreated",
            TaskEvent::Accepted { .. } => "TaskAccepted",
        }
    }
}

/// Inclusion receipt for a submitted result transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    /// Transaction hash.
    pub tx_hash: TxHash,
    /// Block the transaction was included in.
    pub block_number: u64,
}

/// Access to the ledger hosting the task contract.
///
/// Implementations must be cheap to share behind an `Arc` and safe to call
/// from several tasks at once.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current head block number.
    async fn block_number(&self) -> ChainResult<u64>;

    /// Task events emitted in `[from_block, to_block]`, ordered by block and
    /// log index.
    async fn query_events(&self, from_block: u64, to_block: u64) -> ChainResult<Vec<TaskEvent>>;

    /// Sign and send a `submitResult(task_id, result)` transaction.
    ///
    /// Returns once the node has accepted the transaction into its pool.
    async fn submit_result(&self, task_id: u64, result: ResultHash) -> ChainResult<TxHash>;

    /// Wait until the transaction is included on-chain.
    async fn await_confirmation(&self, tx_hash: TxHash) -> ChainResult<Confirmation>;
}

/// Hex rendering of a 32-byte value with `0x` prefix.
pub fn to_hex(bytes: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_event_accessors() {
        let created = TaskEvent::Created {
            task_id: 7,
            input_data: [0xab; 32],
            block_number: 100,
        };
        assert_eq!(created.task_id(), 7);
        assert_eq!(created.block_number(), 100);
        assert_eq!(created.kind(), "TaskCreated");

        let accepted = TaskEvent::Accepted {
            task_id: 7,
            block_number: 101,
        };
        assert_eq!(accepted.task_id(), 7);
        assert_eq!(accepted.kind(), "TaskAccepted");
    }

    #[test]
    fn test_to_hex() {
        let hex = to_hex(&[0u8; 32]);
        assert!(hex.starts_with("0x"));
        assert_eq!(hex.len(), 66);
    }
}
