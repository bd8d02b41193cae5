//! Worker service.
//!
//! Wires the listener, applier and processing loop around one shared task
//! store and runs them as concurrent tokio tasks under a single
//! cancellation token.

use crate::applier::{EventApplier, DEFAULT_ACCEPTED_RETENTION};
use crate::chain::ChainClient;
use crate::compute::ResultComputer;
use crate::error::{WorkerError, WorkerResult};
use crate::listener::{ChainListener, ListenerConfig};
use crate::metrics::WorkerMetrics;
use crate::processor::{ProcessorConfig, TaskProcessor};
use crate::store::TaskStore;
use crate::submitter::{ResultSubmitter, SubmitterConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Configuration for the whole worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Chain listener configuration.
    pub listener: ListenerConfig,
    /// Processing loop configuration.
    pub processor: ProcessorConfig,
    /// Result submitter configuration.
    pub submitter: SubmitterConfig,
    /// How long Accepted tasks stay in the store before being forgotten.
    #[serde(with = "humantime_serde")]
    pub accepted_retention: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            processor: ProcessorConfig::default(),
            submitter: SubmitterConfig::default(),
            accepted_retention: DEFAULT_ACCEPTED_RETENTION,
        }
    }
}

impl WorkerConfig {
    /// Reject configurations the loops cannot run with.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.listener.poll_interval.is_zero() {
            return Err(WorkerError::Config(
                "listener.poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.listener.event_buffer_size == 0 {
            return Err(WorkerError::Config(
                "listener.event_buffer_size must be greater than zero".to_string(),
            ));
        }
        if self.processor.idle_delay.is_zero() {
            return Err(WorkerError::Config(
                "processor.idle_delay must be greater than zero".to_string(),
            ));
        }
        if self.processor.acceptance_poll_interval.is_zero() {
            return Err(WorkerError::Config(
                "processor.acceptance_poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.submitter.tx_timeout.is_zero() {
            return Err(WorkerError::Config(
                "submitter.tx_timeout must be greater than zero".to_string(),
            ));
        }
        if self.accepted_retention < self.processor.acceptance_timeout {
            return Err(WorkerError::Config(
                "accepted_retention must be at least processor.acceptance_timeout".to_string(),
            ));
        }
        Ok(())
    }
}

/// Compute task worker.
///
/// Owns the task store and the three long-running activities that share it.
pub struct WorkerService {
    config: WorkerConfig,
    chain: Arc<dyn ChainClient>,
    store: Arc<RwLock<TaskStore>>,
    listener: ChainListener,
    applier: EventApplier,
    processor: TaskProcessor,
    cancel: CancellationToken,
}

impl WorkerService {
    /// Build a worker around a chain client and a result function.
    pub fn new(
        config: WorkerConfig,
        chain: Arc<dyn ChainClient>,
        computer: Arc<dyn ResultComputer>,
        metrics: Option<WorkerMetrics>,
    ) -> Self {
        let store = Arc::new(RwLock::new(TaskStore::new()));
        let (event_tx, event_rx) = mpsc::channel(config.listener.event_buffer_size.max(1));
        let work_ready = Arc::new(Notify::new());

        let mut listener = ChainListener::new(config.listener.clone(), chain.clone(), event_tx);
        let mut applier = EventApplier::new(store.clone(), event_rx, work_ready.clone())
            .with_accepted_retention(config.accepted_retention);
        let submitter = ResultSubmitter::new(config.submitter.clone(), chain.clone());
        let mut processor = TaskProcessor::new(
            config.processor.clone(),
            store.clone(),
            submitter,
            computer,
            work_ready,
        );

        if let Some(metrics) = metrics {
            listener = listener.with_metrics(metrics.clone());
            applier = applier.with_metrics(metrics.clone());
            processor = processor.with_metrics(metrics);
        }

        Self {
            config,
            chain,
            store,
            listener,
            applier,
            processor,
            cancel: CancellationToken::new(),
        }
    }

    /// Get the worker configuration.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Shared task store, for inspection.
    pub fn store(&self) -> Arc<RwLock<TaskStore>> {
        self.store.clone()
    }

    /// Token that stops the worker when cancelled.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request a graceful stop.
    pub fn shutdown(&self) {
        info!("Shutting down compute worker");
        self.cancel.cancel();
    }

    /// Run until shutdown is requested.
    ///
    /// Fails fast if the chain is unreachable at startup. After that, only
    /// an abnormal exit of one of the activities ends the run with an error;
    /// any such exit also stops the other two.
    pub async fn run(self) -> WorkerResult<()> {
        let Self {
            chain,
            store,
            mut listener,
            mut applier,
            mut processor,
            cancel,
            ..
        } = self;

        let head = chain.block_number().await?;
        info!(head, "Connected to chain, starting compute worker");

        let listener_cancel = cancel.clone();
        let listener_task = tokio::spawn(async move {
            let _guard = listener_cancel.clone().drop_guard();
            listener.run(listener_cancel).await
        });

        let applier_cancel = cancel.clone();
        let applier_task = tokio::spawn(async move {
            let _guard = applier_cancel.clone().drop_guard();
            applier.run(applier_cancel).await
        });

        let processor_cancel = cancel.clone();
        let processor_task = tokio::spawn(async move {
            let _guard = processor_cancel.clone().drop_guard();
            processor.run(processor_cancel).await
        });

        let (listener_res, applier_res, processor_res) =
            tokio::join!(listener_task, applier_task, processor_task);

        let mut outcome = Ok(());
        match listener_res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(error = %e, "Chain listener failed");
                outcome = Err(WorkerError::Listener(e));
            }
            Err(e) => outcome = Err(WorkerError::Join(format!("listener: {}", e))),
        }
        if let Err(e) = applier_res {
            if outcome.is_ok() {
                outcome = Err(WorkerError::Join(format!("applier: {}", e)));
            }
        }
        if let Err(e) = processor_res {
            if outcome.is_ok() {
                outcome = Err(WorkerError::Join(format!("processor: {}", e)));
            }
        }

        let counts = store.read().await.count_by_state();
        info!(
            pending = counts.pending,
            submitted = counts.submitted,
            accepted = counts.accepted,
            "Compute worker stopped"
        );

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::FixedDigestComputer;
    use crate::error::ChainError;
    use crate::mock::MockChainClient;
    use std::time::Duration;

    #[test]
    fn test_worker_config_default_is_valid() {
        assert!(WorkerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_worker_config_rejects_zero_buffer() {
        let mut config = WorkerConfig::default();
        config.listener.event_buffer_size = 0;
        assert!(matches!(config.validate(), Err(WorkerError::Config(_))));
    }

    #[test]
    fn test_worker_config_rejects_zero_idle_delay() {
        let mut config = WorkerConfig::default();
        config.processor.idle_delay = Duration::ZERO;
        assert!(matches!(config.validate(), Err(WorkerError::Config(_))));
    }

    #[test]
    fn test_worker_config_rejects_short_retention() {
        let mut config = WorkerConfig::default();
        config.accepted_retention = Duration::from_secs(1);
        assert!(matches!(config.validate(), Err(WorkerError::Config(_))));
    }

    #[test]
    fn test_worker_config_from_json() {
        let config: WorkerConfig = serde_json::from_str(
            r#"{"listener": {"poll_interval": "1s"}, "processor": {"acceptance_timeout": "10s"}}"#,
        )
        .unwrap();
        assert_eq!(config.listener.poll_interval, Duration::from_secs(1));
        assert_eq!(config.processor.acceptance_timeout, Duration::from_secs(10));
        assert_eq!(config.submitter.tx_timeout, Duration::from_secs(60));
        assert_eq!(config.accepted_retention, Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_unreachable_chain_fails_startup() {
        let chain = Arc::new(MockChainClient::new());
        chain.set_fail_queries(true);

        let service = WorkerService::new(
            WorkerConfig::default(),
            chain,
            Arc::new(FixedDigestComputer::default()),
            None,
        );

        let result = service.run().await;
        assert!(matches!(
            result,
            Err(WorkerError::Chain(ChainError::Transport(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_all_activities() {
        let chain = Arc::new(MockChainClient::new());
        let service = WorkerService::new(
            WorkerConfig::default(),
            chain,
            Arc::new(FixedDigestComputer::default()),
            None,
        );

        let shutdown = service.shutdown_handle();
        let handle = tokio::spawn(service.run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.cancel();

        let result = handle.await.unwrap();
        assert!(result.is_ok());
    }
}
