//! Task processing loop.
//!
//! Claims one Pending task at a time, computes its result, submits it, and
//! then watches the store until the applier records the on-chain acceptance.
//! Tasks that fail to submit, or that are not accepted within the bound, go
//! back to the end of the pending queue.

use crate::chain::to_hex;
use crate::compute::ResultComputer;
use crate::metrics::WorkerMetrics;
use crate::store::{ClaimedTask, TaskState, TaskStore};
use crate::submitter::ResultSubmitter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for the processing loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Sleep when the queue is empty (new work cuts it short), and back-off
    /// after a failed submission.
    #[serde(with = "humantime_serde")]
    pub idle_delay: Duration,
    /// How long to wait for `TaskAccepted` after a confirmed submission.
    #[serde(with = "humantime_serde")]
    pub acceptance_timeout: Duration,
    /// How often the store is checked while waiting for acceptance.
    #[serde(with = "humantime_serde")]
    pub acceptance_poll_interval: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            idle_delay: Duration::from_secs(5),
            acceptance_timeout: Duration::from_secs(30),
            acceptance_poll_interval: Duration::from_secs(2),
        }
    }
}

/// Processing loop state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorState {
    /// Idle, waiting for tasks.
    Idle,
    /// Submitting a result to chain.
    Submitting {
        /// Task ID being submitted.
        task_id: u64,
    },
    /// Result confirmed, waiting for on-chain acceptance.
    AwaitingAcceptance {
        /// Task ID awaiting acceptance.
        task_id: u64,
    },
    /// Shutting down.
    Stopping,
}

impl std::fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessorState::Idle => write!(f, "Idle"),
            ProcessorState::Submitting { task_id } => write!(f, "Submitting({})", task_id),
            ProcessorState::AwaitingAcceptance { task_id } => {
                write!(f, "AwaitingAcceptance({})", task_id)
            }
            ProcessorState::Stopping => write!(f, "Stopping"),
        }
    }
}

/// Result of one processing iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Queue was empty.
    Idle,
    /// Task was accepted within the bound.
    Accepted {
        /// Task ID.
        task_id: u64,
    },
    /// Acceptance did not arrive in time; task requeued.
    TimedOut {
        /// Task ID.
        task_id: u64,
    },
    /// Submission failed; task requeued unless accepted meanwhile.
    SubmissionFailed {
        /// Task ID.
        task_id: u64,
    },
    /// Task left the Submitted state through another path while waiting.
    Superseded {
        /// Task ID.
        task_id: u64,
    },
    /// Shutdown interrupted the iteration.
    Cancelled,
}

enum AcceptanceWait {
    Accepted,
    TimedOut,
    Superseded,
    Cancelled,
}

/// Drains the pending queue, one task in flight at a time.
pub struct TaskProcessor {
    config: ProcessorConfig,
    state: ProcessorState,
    store: Arc<RwLock<TaskStore>>,
    submitter: ResultSubmitter,
    computer: Arc<dyn ResultComputer>,
    work_ready: Arc<Notify>,
    metrics: Option<WorkerMetrics>,
}

impl TaskProcessor {
    /// Create a new processing loop.
    ///
    /// # Arguments
    /// * `config` - Loop timing configuration
    /// * `store` - Shared task store
    /// * `submitter` - Result submitter
    /// * `computer` - Content function producing results
    /// * `work_ready` - Notified by the applier when tasks become Pending
    pub fn new(
        config: ProcessorConfig,
        store: Arc<RwLock<TaskStore>>,
        submitter: ResultSubmitter,
        computer: Arc<dyn ResultComputer>,
        work_ready: Arc<Notify>,
    ) -> Self {
        Self {
            config,
            state: ProcessorState::Idle,
            store,
            submitter,
            computer,
            work_ready,
            metrics: None,
        }
    }

    /// Attach metrics.
    pub fn with_metrics(mut self, metrics: WorkerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Get the current processor state.
    pub fn state(&self) -> &ProcessorState {
        &self.state
    }

    /// Get the configuration.
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Run until cancelled.
    ///
    /// Errors inside an iteration are logged and never end the loop.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(
            computer = self.computer.name(),
            acceptance_timeout_ms = self.config.acceptance_timeout.as_millis() as u64,
            "Starting task processing loop"
        );

        while !cancel.is_cancelled() {
            match self.process_next(&cancel).await {
                ProcessOutcome::Idle => self.wait_for_work(&cancel).await,
                ProcessOutcome::Cancelled => break,
                ProcessOutcome::SubmissionFailed { .. } => {
                    // Back off before the next claim.
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(self.config.idle_delay) => {}
                    }
                }
                outcome => debug!(?outcome, "Iteration finished"),
            }
        }

        self.state = ProcessorState::Stopping;
        info!("Task processing loop stopped");
    }

    /// Process one task from the queue, if any.
    pub async fn process_next(&mut self, cancel: &CancellationToken) -> ProcessOutcome {
        let Some(task) = self.claim().await else {
            return ProcessOutcome::Idle;
        };
        let task_id = task.id;

        info!(
            task_id,
            attempt = task.attempt,
            input_data = %to_hex(&task.input_data),
            "Processing task"
        );

        let result = self.computer.compute(&task);
        info!(task_id, result = %to_hex(&result), "Task computed");

        self.state = ProcessorState::Submitting { task_id };
        let submitted = tokio::select! {
            _ = cancel.cancelled() => None,
            submitted = self.submitter.submit(task_id, result) => Some(submitted),
        };

        match submitted {
            None => {
                self.requeue(task_id).await;
                self.state = ProcessorState::Idle;
                return ProcessOutcome::Cancelled;
            }
            Some(Err(e)) => {
                warn!(task_id, error = %e, "Failed to submit result, requeueing task");
                if let Some(metrics) = &self.metrics {
                    metrics.submission_failures_total.inc();
                }
                self.requeue(task_id).await;
                self.state = ProcessorState::Idle;
                return ProcessOutcome::SubmissionFailed { task_id };
            }
            Some(Ok(_)) => {
                if let Some(metrics) = &self.metrics {
                    metrics.tasks_submitted_total.inc();
                }
                info!(task_id, "Result sent to the chain");
            }
        }

        self.state = ProcessorState::AwaitingAcceptance { task_id };
        let outcome = match self.await_acceptance(task_id, cancel).await {
            AcceptanceWait::Accepted => {
                info!(task_id, "Task accepted");
                ProcessOutcome::Accepted { task_id }
            }
            AcceptanceWait::TimedOut => {
                warn!(
                    task_id,
                    timeout_ms = self.config.acceptance_timeout.as_millis() as u64,
                    "Acceptance timed out, requeueing task"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.acceptance_timeouts_total.inc();
                }
                self.requeue(task_id).await;
                ProcessOutcome::TimedOut { task_id }
            }
            AcceptanceWait::Superseded => {
                debug!(task_id, "Task left Submitted state while awaiting acceptance");
                ProcessOutcome::Superseded { task_id }
            }
            AcceptanceWait::Cancelled => {
                self.requeue(task_id).await;
                ProcessOutcome::Cancelled
            }
        };

        self.state = ProcessorState::Idle;
        outcome
    }

    async fn claim(&self) -> Option<ClaimedTask> {
        let mut store = self.store.write().await;
        let claimed = store.claim_next();
        if let Some(metrics) = &self.metrics {
            metrics.pending_queue_len.set(store.pending_len() as i64);
        }
        claimed
    }

    async fn requeue(&self, task_id: u64) {
        let mut store = self.store.write().await;
        if store.requeue(task_id) {
            debug!(task_id, queue_len = store.pending_len(), "Task requeued");
        } else {
            debug!(
                task_id,
                state = ?store.state(task_id),
                "Task not requeued, no longer Submitted"
            );
        }
        if let Some(metrics) = &self.metrics {
            metrics.pending_queue_len.set(store.pending_len() as i64);
        }
    }

    async fn await_acceptance(&self, task_id: u64, cancel: &CancellationToken) -> AcceptanceWait {
        let deadline = Instant::now() + self.config.acceptance_timeout;
        let mut ticker = tokio::time::interval(self.config.acceptance_poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return AcceptanceWait::Cancelled,
                _ = ticker.tick() => {}
            }

            match self.store.read().await.state(task_id) {
                Some(TaskState::Accepted) => return AcceptanceWait::Accepted,
                Some(TaskState::Submitted) => {}
                _ => return AcceptanceWait::Superseded,
            }

            if Instant::now() >= deadline {
                return AcceptanceWait::TimedOut;
            }
        }
    }

    async fn wait_for_work(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = self.work_ready.notified() => {}
            _ = tokio::time::sleep(self.config.idle_delay) => {}
        }
    }
}
