//! Prometheus metrics for the task worker

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use thiserror::Error;

/// Metrics registration errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Registry rejected a collector.
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Worker metrics, registered on a caller-supplied registry.
#[derive(Debug, Clone)]
pub struct WorkerMetrics {
    /// Chain events received, by kind.
    pub events_total: IntCounterVec,
    /// Events that had no effect on the store (duplicates, unknown ids).
    pub events_ignored_total: IntCounterVec,
    /// New tasks detected.
    pub tasks_detected_total: IntCounter,
    /// Result transactions confirmed on-chain.
    pub tasks_submitted_total: IntCounter,
    /// Tasks observed as accepted.
    pub tasks_accepted_total: IntCounter,
    /// Acceptance waits that ran out and requeued the task.
    pub acceptance_timeouts_total: IntCounter,
    /// Submissions that failed and requeued the task.
    pub submission_failures_total: IntCounter,
    /// Chain polls that failed.
    pub poll_failures_total: IntCounter,
    /// Task contract logs that could not be decoded and were skipped.
    pub undecodable_logs_total: IntCounter,
    /// Current pending queue length.
    pub pending_queue_len: IntGauge,
    /// Last block scanned by the listener.
    pub last_scanned_block: IntGauge,
}

impl WorkerMetrics {
    /// Create metrics and register them on `registry`.
    pub fn new(registry: &Registry) -> Result<Self, MetricsError> {
        let metrics = Self::unregistered()?;

        registry.register(Box::new(metrics.events_total.clone()))?;
        registry.register(Box::new(metrics.events_ignored_total.clone()))?;
        registry.register(Box::new(metrics.tasks_detected_total.clone()))?;
        registry.register(Box::new(metrics.tasks_submitted_total.clone()))?;
        registry.register(Box::new(metrics.tasks_accepted_total.clone()))?;
        registry.register(Box::new(metrics.acceptance_timeouts_total.clone()))?;
        registry.register(Box::new(metrics.submission_failures_total.clone()))?;
        registry.register(Box::new(metrics.poll_failures_total.clone()))?;
        registry.register(Box::new(metrics.undecodable_logs_total.clone()))?;
        registry.register(Box::new(metrics.pending_queue_len.clone()))?;
        registry.register(Box::new(metrics.last_scanned_block.clone()))?;

        Ok(metrics)
    }

    /// Metrics not attached to any registry.
    pub fn unregistered() -> Result<Self, MetricsError> {
        Ok(Self {
            events_total: IntCounterVec::new(
                Opts::new("vb_worker_events_total", "Chain events received"),
                &["kind"],
            )?,
            events_ignored_total: IntCounterVec::new(
                Opts::new(
                    "vb_worker_events_ignored_total",
                    "Chain events with no effect on the task store",
                ),
                &["kind"],
            )?,
            tasks_detected_total: IntCounter::new(
                "vb_worker_tasks_detected_total",
                "New compute tasks detected",
            )?,
            tasks_submitted_total: IntCounter::new(
                "vb_worker_tasks_submitted_total",
                "Result transactions confirmed on-chain",
            )?,
            tasks_accepted_total: IntCounter::new(
                "vb_worker_tasks_accepted_total",
                "Tasks accepted on-chain",
            )?,
            acceptance_timeouts_total: IntCounter::new(
                "vb_worker_acceptance_timeouts_total",
                "Acceptance waits that timed out",
            )?,
            submission_failures_total: IntCounter::new(
                "vb_worker_submission_failures_total",
                "Result submissions that failed",
            )?,
            poll_failures_total: IntCounter::new(
                "vb_worker_poll_failures_total",
                "Chain event polls that failed",
            )?,
            undecodable_logs_total: IntCounter::new(
                "vb_worker_undecodable_logs_total",
                "Task contract logs skipped because they could not be decoded",
            )?,
            pending_queue_len: IntGauge::new(
                "vb_worker_pending_queue_len",
                "Tasks waiting to be processed",
            )?,
            last_scanned_block: IntGauge::new(
                "vb_worker_last_scanned_block",
                "Last block scanned for task events",
            )?,
        })
    }
}
