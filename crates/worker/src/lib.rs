//! # Compute Task Worker
//!
//! Off-chain worker for an on-chain compute task contract. It watches the
//! contract for new tasks, computes a result for each one, submits the
//! result back on-chain and tracks each task until the contract records
//! the result as accepted.
//!
//! ## Architecture
//!
//! ```text
//! Chain Events → ChainListener → mpsc → EventApplier → TaskStore
//!                                                         ↓
//!                        ResultSubmitter ← TaskProcessor ←┘
//! ```
//!
//! ## Components
//!
//! - [`WorkerService`]: Wires the components and owns shutdown
//! - [`ChainListener`]: Polls contract logs and forwards [`TaskEvent`]s
//! - [`EventApplier`]: Single writer of event-driven store changes
//! - [`TaskProcessor`]: Claims, computes, submits and awaits acceptance
//! - [`ResultSubmitter`]: Sends result transactions and awaits inclusion
//! - [`TaskStore`]: Task map plus FIFO pending queue
//!
//! ## Task Lifecycle
//!
//! 1. **TaskCreated** event received → task stored as Pending, queued
//! 2. Processor claims the head of the queue → Submitted
//! 3. Result computed and submitted on-chain
//! 4. **TaskAccepted** event received → Accepted (terminal)
//! 5. No acceptance within the timeout, or a failed submission → back to
//!    Pending at the end of the queue
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vb_worker::{FixedDigestComputer, MockChainClient, WorkerConfig, WorkerService};
//!
//! #[tokio::main]
//! async fn main() {
//!     let chain = Arc::new(MockChainClient::new().with_auto_accept(true));
//!     let service = WorkerService::new(
//!         WorkerConfig::default(),
//!         chain,
//!         Arc::new(FixedDigestComputer::default()),
//!         None,
//!     );
//!
//!     let shutdown = service.shutdown_handle();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         shutdown.cancel();
//!     });
//!
//!     service.run().await.unwrap();
//! }
//! ```
//!
//! ## Configuration
//!
//! Default configuration values:
//! - Listener poll interval: 5s
//! - Idle delay with an empty queue: 5s
//! - Acceptance timeout: 30s, checked every 2s
//! - Transaction inclusion timeout: 60s

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod applier;
pub mod chain;
pub mod compute;
pub mod error;
pub mod listener;
pub mod metrics;
pub mod mock;
pub mod processor;
pub mod service;
pub mod store;
pub mod submitter;

// Re-export main types
pub use applier::{Applied, EventApplier};
pub use chain::{to_hex, ChainClient, Confirmation, InputData, ResultHash, TaskEvent, TxHash};
pub use compute::{DigestAlgorithm, FixedDigestComputer, InputDigestComputer, ResultComputer};
pub use error::{
    ChainError, ChainResult, ListenerError, SubmissionError, WorkerError, WorkerResult,
};
pub use listener::{ChainListener, ListenerConfig};
pub use metrics::{MetricsError, WorkerMetrics};
pub use mock::MockChainClient;
pub use processor::{ProcessOutcome, ProcessorConfig, ProcessorState, TaskProcessor};
pub use service::{WorkerConfig, WorkerService};
pub use store::{ClaimedTask, StateCounts, Task, TaskState, TaskStore};
pub use submitter::{ResultSubmitter, SubmitterConfig};
