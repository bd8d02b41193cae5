//! Error types for the compute task worker.
//!
//! Steady-state errors (chain transport failures, submission failures) are
//! contained by the component that raised them. Only startup failures are
//! surfaced through [`WorkerError`] to the process boundary.

use thiserror::Error;

/// Top-level error type for worker operations.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Chain event listener errors.
    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),

    /// Result submission errors.
    #[error("submission error: {0}")]
    Submission(#[from] SubmissionError),

    /// Errors from the chain client boundary.
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    /// Configuration errors.
    #[error("configuration error: {0}")]
    Config(String),

    /// Background activity terminated abnormally.
    #[error("worker activity failed: {0}")]
    Join(String),
}

/// Errors reported by a [`ChainClient`](crate::chain::ChainClient).
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// RPC endpoint unreachable or returned a transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed response or undecodable event log.
    #[error("decode error: {0}")]
    Decode(String),

    /// Node refused the transaction before inclusion.
    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// Transaction was included but execution reverted.
    #[error("transaction {tx_hash} reverted")]
    Reverted {
        /// Hex-encoded transaction hash.
        tx_hash: String,
    },

    /// Transaction disappeared before it was mined.
    #[error("transaction {tx_hash} dropped from mempool")]
    Dropped {
        /// Hex-encoded transaction hash.
        tx_hash: String,
    },

    /// Chain operation exceeded its deadline.
    #[error("chain operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Signing identity could not be used.
    #[error("signer error: {0}")]
    Signer(String),
}

/// Errors during chain event listening.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Could not read from the chain.
    #[error("chain query failed: {0}")]
    Chain(#[from] ChainError),

    /// Event channel consumer went away.
    #[error("event channel closed")]
    ChannelClosed,
}

/// Errors during result submission to chain.
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// Submitting or confirming the transaction failed.
    #[error("chain submission failed: {0}")]
    Chain(#[from] ChainError),

    /// Confirmation did not arrive within the configured bound.
    #[error("confirmation for task {task_id} not received within {timeout_ms}ms")]
    ConfirmationTimeout {
        /// Task whose result was submitted.
        task_id: u64,
        /// Timeout duration in milliseconds.
        timeout_ms: u64,
    },
}

/// Result type alias for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Result type alias for chain client operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Result type alias for listener operations.
pub type ListenerResult<T> = Result<T, ListenerError>;

/// Result type alias for submission operations.
pub type SubmissionResult<T> = Result<T, SubmissionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChainError::Timeout { timeout_ms: 5000 };
        assert!(err.to_string().contains("5000"));

        let err = SubmissionError::ConfirmationTimeout {
            task_id: 42,
            timeout_ms: 1000,
        };
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn test_error_conversion() {
        let chain_err = ChainError::Transport("connection refused".to_string());
        let listener_err: ListenerError = chain_err.clone().into();
        assert!(matches!(listener_err, ListenerError::Chain(_)));

        let worker_err: WorkerError = listener_err.into();
        assert!(matches!(worker_err, WorkerError::Listener(_)));

        let submission_err: SubmissionError = chain_err.into();
        let worker_err: WorkerError = submission_err.into();
        assert!(matches!(worker_err, WorkerError::Submission(_)));
    }
}
