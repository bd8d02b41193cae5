//! In-memory chain client for tests.
//!
//! Keeps a block counter and an append-only event log. Every injected event
//! is mined into its own block. Submissions are recorded for verification
//! and can be made to fail on demand.

use crate::chain::{ChainClient, Confirmation, InputData, ResultHash, TaskEvent, TxHash};
use crate::error::{ChainError, ChainResult};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};

/// A result transaction recorded by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedResult {
    /// Task the result was submitted for.
    pub task_id: u64,
    /// Submitted result value.
    pub result: ResultHash,
    /// Transaction hash handed back to the caller.
    pub tx_hash: TxHash,
    /// Block the transaction was mined in.
    pub block_number: u64,
}

#[derive(Debug, Default)]
struct MockState {
    head: u64,
    events: Vec<TaskEvent>,
    submissions: Vec<SubmittedResult>,
    fail_submissions: bool,
    fail_queries: bool,
    auto_accept: bool,
    withhold_confirmations: bool,
}

/// Mock chain client for simulating the task contract.
///
/// # Example
///
/// ```rust
/// use vb_worker::mock::MockChainClient;
///
/// let chain = MockChainClient::new();
/// chain.create_task(7, [0xab; 32]);
/// assert_eq!(chain.head(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MockChainClient {
    state: Mutex<MockState>,
}

impl MockChainClient {
    /// Create a new mock chain at block 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `TaskAccepted` automatically for every successful submission.
    pub fn with_auto_accept(self, auto_accept: bool) -> Self {
        self.lock().auto_accept = auto_accept;
        self
    }

    /// Configure failure mode for submissions.
    pub fn with_fail_submissions(self, fail: bool) -> Self {
        self.set_fail_submissions(fail);
        self
    }

    /// Toggle failure mode for submissions.
    pub fn set_fail_submissions(&self, fail: bool) {
        self.lock().fail_submissions = fail;
    }

    /// Toggle failure mode for head and event queries.
    pub fn set_fail_queries(&self, fail: bool) {
        self.lock().fail_queries = fail;
    }

    /// Never confirm submitted transactions.
    pub fn set_withhold_confirmations(&self, withhold: bool) {
        self.lock().withhold_confirmations = withhold;
    }

    /// Mine a `TaskCreated` event.
    pub fn create_task(&self, task_id: u64, input_data: InputData) {
        let mut state = self.lock();
        state.head += 1;
        let block_number = state.head;
        state.events.push(TaskEvent::Created {
            task_id,
            input_data,
            block_number,
        });
    }

    /// Mine a `TaskAccepted` event.
    pub fn accept_task(&self, task_id: u64) {
        let mut state = self.lock();
        Self::push_accepted(&mut state, task_id);
    }

    /// Mine empty blocks.
    pub fn advance_blocks(&self, count: u64) {
        self.lock().head += count;
    }

    /// Current head block.
    pub fn head(&self) -> u64 {
        self.lock().head
    }

    /// Results submitted so far.
    pub fn submissions(&self) -> Vec<SubmittedResult> {
        self.lock().submissions.clone()
    }

    /// Number of results submitted so far.
    pub fn submission_count(&self) -> usize {
        self.lock().submissions.len()
    }

    /// Number of submissions for one task.
    pub fn submissions_for(&self, task_id: u64) -> usize {
        self.lock()
            .submissions
            .iter()
            .filter(|s| s.task_id == task_id)
            .count()
    }

    fn push_accepted(state: &mut MockState, task_id: u64) {
        state.head += 1;
        let block_number = state.head;
        state.events.push(TaskEvent::Accepted {
            task_id,
            block_number,
        });
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn block_number(&self) -> ChainResult<u64> {
        let state = self.lock();
        if state.fail_queries {
            return Err(ChainError::Transport("mock query failure".to_string()));
        }
        Ok(state.head)
    }

    async fn query_events(&self, from_block: u64, to_block: u64) -> ChainResult<Vec<TaskEvent>> {
        let state = self.lock();
        if state.fail_queries {
            return Err(ChainError::Transport("mock query failure".to_string()));
        }
        Ok(state
            .events
            .iter()
            .filter(|event| (from_block..=to_block).contains(&event.block_number()))
            .cloned()
            .collect())
    }

    async fn submit_result(&self, task_id: u64, result: ResultHash) -> ChainResult<TxHash> {
        let mut state = self.lock();
        if state.fail_submissions {
            return Err(ChainError::Transport("mock submission failure".to_string()));
        }

        let mut tx_hash = [0u8; 32];
        tx_hash[..8].copy_from_slice(&(state.submissions.len() as u64 + 1).to_be_bytes());
        tx_hash[8..16].copy_from_slice(&task_id.to_be_bytes());

        state.head += 1;
        let block_number = state.head;
        state.submissions.push(SubmittedResult {
            task_id,
            result,
            tx_hash,
            block_number,
        });

        if state.auto_accept {
            Self::push_accepted(&mut state, task_id);
        }

        Ok(tx_hash)
    }

    async fn await_confirmation(&self, tx_hash: TxHash) -> ChainResult<Confirmation> {
        let block_number = {
            let state = self.lock();
            if state.withhold_confirmations {
                None
            } else {
                Some(
                    state
                        .submissions
                        .iter()
                        .find(|s| s.tx_hash == tx_hash)
                        .map(|s| s.block_number)
                        .ok_or_else(|| ChainError::Dropped {
                            tx_hash: crate::chain::to_hex(&tx_hash),
                        })?,
                )
            }
        };

        match block_number {
            Some(block_number) => Ok(Confirmation {
                tx_hash,
                block_number,
            }),
            None => std::future::pending::<ChainResult<Confirmation>>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_injection() {
        let chain = MockChainClient::new();
        chain.create_task(1, [1; 32]);
        chain.accept_task(1);

        let events = chain.query_events(0, chain.head()).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].block_number(), 1);
        assert_eq!(events[1].block_number(), 2);

        let only_first = chain.query_events(1, 1).await.unwrap();
        assert_eq!(only_first.len(), 1);
    }

    #[tokio::test]
    async fn test_submission_and_confirmation() {
        let chain = MockChainClient::new();

        let tx_hash = chain.submit_result(1, [9; 32]).await.unwrap();
        let confirmation = chain.await_confirmation(tx_hash).await.unwrap();

        assert_eq!(confirmation.tx_hash, tx_hash);
        assert_eq!(chain.submission_count(), 1);
        assert_eq!(chain.submissions()[0].result, [9; 32]);
    }

    #[tokio::test]
    async fn test_unknown_tx_is_dropped() {
        let chain = MockChainClient::new();
        let result = chain.await_confirmation([7; 32]).await;
        assert!(matches!(result, Err(ChainError::Dropped { .. })));
    }

    #[tokio::test]
    async fn test_fail_mode() {
        let chain = MockChainClient::new().with_fail_submissions(true);
        assert!(chain.submit_result(1, [0; 32]).await.is_err());
        assert_eq!(chain.submission_count(), 0);
    }

    #[tokio::test]
    async fn test_auto_accept() {
        let chain = MockChainClient::new().with_auto_accept(true);
        chain.submit_result(5, [0; 32]).await.unwrap();

        let events = chain.query_events(0, chain.head()).await.unwrap();
        assert!(matches!(events[0], TaskEvent::Accepted { task_id: 5, .. }));
    }
}
