//! Applies chain events to the task store.
//!
//! The applier is the single consumer of the listener's event channel, so
//! store mutations caused by chain events happen in one place and in chain
//! order. It does no network I/O and holds the store lock only for the
//! duration of one event.

use crate::chain::{to_hex, TaskEvent};
use crate::metrics::WorkerMetrics;
use crate::store::TaskStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How long Accepted tasks are remembered by default.
pub const DEFAULT_ACCEPTED_RETENTION: Duration = Duration::from_secs(3600);

/// Effect of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// New task recorded as Pending.
    Enqueued,
    /// Task moved to Accepted.
    Accepted,
    /// Duplicate or unknown id; store unchanged.
    Ignored,
}

/// Drains task events into the shared store.
pub struct EventApplier {
    store: Arc<RwLock<TaskStore>>,
    event_rx: mpsc::Receiver<TaskEvent>,
    work_ready: Arc<Notify>,
    accepted_retention: Duration,
    metrics: Option<WorkerMetrics>,
}

impl EventApplier {
    /// Create a new applier.
    ///
    /// `work_ready` is notified whenever a task becomes Pending.
    pub fn new(
        store: Arc<RwLock<TaskStore>>,
        event_rx: mpsc::Receiver<TaskEvent>,
        work_ready: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            event_rx,
            work_ready,
            accepted_retention: DEFAULT_ACCEPTED_RETENTION,
            metrics: None,
        }
    }

    /// Forget Accepted tasks once they are older than `retention`.
    ///
    /// A zero retention is treated as one millisecond.
    pub fn with_accepted_retention(mut self, retention: Duration) -> Self {
        self.accepted_retention = retention.max(Duration::from_millis(1));
        self
    }

    /// Attach metrics.
    pub fn with_metrics(mut self, metrics: WorkerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Apply events until cancelled or until every sender is dropped.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(
            accepted_retention_secs = self.accepted_retention.as_secs(),
            "Starting task event applier"
        );

        let mut prune_ticker = tokio::time::interval(self.accepted_retention);
        prune_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        prune_ticker.reset();

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = prune_ticker.tick() => {
                    self.prune_accepted().await;
                    continue;
                }
                event = self.event_rx.recv() => event,
            };

            match event {
                Some(event) => {
                    self.apply(event).await;
                }
                None => {
                    debug!("Event channel closed");
                    break;
                }
            }
        }

        info!("Task event applier stopped");
    }

    /// Drop Accepted tasks older than the retention window.
    pub async fn prune_accepted(&self) -> usize {
        let Some(cutoff) = Instant::now().checked_sub(self.accepted_retention) else {
            return 0;
        };
        self.store.write().await.prune_accepted(cutoff)
    }

    /// Apply a single event to the store.
    pub async fn apply(&self, event: TaskEvent) -> Applied {
        let kind = event.kind();

        let (applied, pending_len) = {
            let mut store = self.store.write().await;
            let applied = match event {
                TaskEvent::Created {
                    task_id,
                    input_data,
                    block_number,
                } => {
                    if store.insert_created(task_id, input_data) {
                        info!(
                            task_id,
                            input_data = %to_hex(&input_data),
                            block_number,
                            "Task added to queue"
                        );
                        Applied::Enqueued
                    } else {
                        debug!(task_id, "Duplicate TaskCreated, ignoring");
                        Applied::Ignored
                    }
                }
                TaskEvent::Accepted {
                    task_id,
                    block_number,
                } => {
                    if store.mark_accepted(task_id) {
                        info!(task_id, block_number, "Task accepted on-chain");
                        Applied::Accepted
                    } else {
                        debug!(
                            task_id,
                            state = ?store.state(task_id),
                            "TaskAccepted for unknown or finished task, ignoring"
                        );
                        Applied::Ignored
                    }
                }
            };
            (applied, store.pending_len())
        };

        if applied == Applied::Enqueued {
            self.work_ready.notify_one();
        }

        if let Some(metrics) = &self.metrics {
            match applied {
                Applied::Enqueued => metrics.tasks_detected_total.inc(),
                Applied::Accepted => metrics.tasks_accepted_total.inc(),
                Applied::Ignored => metrics.events_ignored_total.with_label_values(&[kind]).inc(),
            }
            metrics.pending_queue_len.set(pending_len as i64);
        }

        applied
    }
}
