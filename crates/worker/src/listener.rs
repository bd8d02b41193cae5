//! Chain event listener.
//!
//! Polls the task contract's `TaskCreated` and `TaskAccepted` logs block
//! range by block range and forwards them, in chain order, over a bounded
//! mpsc channel. The listener never touches the task store; the
//! [`EventApplier`](crate::applier::EventApplier) on the other end of the
//! channel does.

use crate::chain::{ChainClient, InputData, TaskEvent};
use crate::error::{ListenerError, ListenerResult};
use crate::metrics::WorkerMetrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for the chain listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interval between chain polls.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// First block to scan. Defaults to `head - lookback_blocks`.
    pub start_block: Option<u64>,
    /// How far behind the head to start when no start block is given.
    pub lookback_blocks: u64,
    /// Blocks to stay behind the head before reading logs.
    pub confirmation_depth: u64,
    /// Largest block range requested in a single query.
    pub max_block_range: u64,
    /// Event channel capacity.
    pub event_buffer_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            start_block: None,
            lookback_blocks: 10,
            confirmation_depth: 0,
            max_block_range: 1000,
            event_buffer_size: 256,
        }
    }
}

/// Polls the chain for task events and routes them to the applier.
pub struct ChainListener {
    config: ListenerConfig,
    chain: Arc<dyn ChainClient>,
    event_tx: mpsc::Sender<TaskEvent>,
    metrics: Option<WorkerMetrics>,
    cursor: Option<u64>,
}

impl ChainListener {
    /// Create a new chain listener.
    ///
    /// # Arguments
    /// * `config` - Listener configuration
    /// * `chain` - Chain client to read events from
    /// * `event_tx` - Channel to send events to
    pub fn new(
        config: ListenerConfig,
        chain: Arc<dyn ChainClient>,
        event_tx: mpsc::Sender<TaskEvent>,
    ) -> Self {
        Self {
            cursor: config.start_block,
            config,
            chain,
            event_tx,
            metrics: None,
        }
    }

    /// Attach metrics.
    pub fn with_metrics(mut self, metrics: WorkerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Get the listener configuration.
    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Next block to be scanned, once known.
    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    /// Run the polling loop until cancelled.
    ///
    /// Chain errors are logged and retried on the next tick without moving
    /// the cursor. Returns an error only if the event channel is closed.
    pub async fn run(&mut self, cancel: CancellationToken) -> ListenerResult<()> {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            start_block = ?self.cursor,
            confirmation_depth = self.config.confirmation_depth,
            "Starting chain event listener"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                polled = self.poll_once() => polled,
            };

            match polled {
                Ok(count) if count > 0 => debug!(count, "Forwarded task events"),
                Ok(_) => {}
                Err(ListenerError::ChannelClosed) => {
                    warn!("Event channel closed, stopping listener");
                    return Err(ListenerError::ChannelClosed);
                }
                Err(e) => {
                    warn!(error = %e, cursor = ?self.cursor, "Chain poll failed, retrying next tick");
                    if let Some(metrics) = &self.metrics {
                        metrics.poll_failures_total.inc();
                    }
                }
            }
        }

        info!("Chain listener stopped gracefully");
        Ok(())
    }

    /// Scan the next block range and forward its events.
    ///
    /// Returns the number of events forwarded.
    pub async fn poll_once(&mut self) -> ListenerResult<usize> {
        let head = self.chain.block_number().await?;
        let safe_head = head.saturating_sub(self.config.confirmation_depth);

        let from = match self.cursor {
            Some(cursor) => cursor,
            None => {
                let start = safe_head.saturating_sub(self.config.lookback_blocks);
                self.cursor = Some(start);
                start
            }
        };

        if from > safe_head {
            debug!(head, from, "No new blocks to scan");
            return Ok(0);
        }

        let span = self.config.max_block_range.max(1);
        let to = safe_head.min(from.saturating_add(span - 1));

        debug!(from, to, head, "Polling for task events");
        let events = self.chain.query_events(from, to).await?;

        let count = events.len();
        for event in events {
            self.forward(event).await?;
        }

        self.cursor = Some(to + 1);
        if let Some(metrics) = &self.metrics {
            metrics.last_scanned_block.set(to as i64);
        }

        Ok(count)
    }

    /// Process a TaskCreated event.
    pub async fn on_task_created(
        &self,
        task_id: u64,
        input_data: InputData,
        block_number: u64,
    ) -> ListenerResult<()> {
        self.forward(TaskEvent::Created {
            task_id,
            input_data,
            block_number,
        })
        .await
    }

    /// Process a TaskAccepted event.
    pub async fn on_task_accepted(&self, task_id: u64, block_number: u64) -> ListenerResult<()> {
        self.forward(TaskEvent::Accepted {
            task_id,
            block_number,
        })
        .await
    }

    async fn forward(&self, event: TaskEvent) -> ListenerResult<()> {
        debug!(
            task_id = event.task_id(),
            kind = event.kind(),
            block_number = event.block_number(),
            "Task event received"
        );

        if let Some(metrics) = &self.metrics {
            metrics.events_total.with_label_values(&[event.kind()]).inc();
        }

        self.event_tx
            .send(event)
            .await
            .map_err(|_| ListenerError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChainClient;

    fn make_listener(
        config: ListenerConfig,
        chain: Arc<MockChainClient>,
    ) -> (ChainListener, mpsc::Receiver<TaskEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (ChainListener::new(config, chain, tx), rx)
    }

    #[test]
    fn test_listener_config_default() {
        let config = ListenerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.lookback_blocks, 10);
        assert_eq!(config.event_buffer_size, 256);
        assert!(config.start_block.is_none());
    }

    #[tokio::test]
    async fn test_on_task_created() {
        let chain = Arc::new(MockChainClient::new());
        let (listener, mut rx) = make_listener(ListenerConfig::default(), chain);

        listener.on_task_created(1, [0xab; 32], 5).await.unwrap();

        match rx.recv().await.unwrap() {
            TaskEvent::Created {
                task_id,
                input_data,
                block_number,
            } => {
                assert_eq!(task_id, 1);
                assert_eq!(input_data, [0xab; 32]);
                assert_eq!(block_number, 5);
            }
            other => panic!("Expected TaskEvent::Created, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_on_task_accepted() {
        let chain = Arc::new(MockChainClient::new());
        let (listener, mut rx) = make_listener(ListenerConfig::default(), chain);

        listener.on_task_accepted(42, 9).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, TaskEvent::Accepted { task_id: 42, .. }));
    }

    #[tokio::test]
    async fn test_poll_forwards_events_in_order() {
        let chain = Arc::new(MockChainClient::new());
        chain.create_task(1, [1; 32]);
        chain.create_task(2, [2; 32]);
        chain.accept_task(1);

        let config = ListenerConfig {
            start_block: Some(0),
            ..ListenerConfig::default()
        };
        let (mut listener, mut rx) = make_listener(config, chain.clone());

        assert_eq!(listener.poll_once().await.unwrap(), 3);
        assert_eq!(rx.recv().await.unwrap().task_id(), 1);
        assert_eq!(rx.recv().await.unwrap().task_id(), 2);
        assert!(matches!(
            rx.recv().await.unwrap(),
            TaskEvent::Accepted { task_id: 1, .. }
        ));
        assert_eq!(listener.cursor(), Some(chain.head() + 1));

        // Nothing new on the second poll.
        assert_eq!(listener.poll_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_default_start_uses_lookback() {
        let chain = Arc::new(MockChainClient::new());
        chain.advance_blocks(50);

        let config = ListenerConfig {
            lookback_blocks: 10,
            ..ListenerConfig::default()
        };
        let (mut listener, _rx) = make_listener(config, chain);

        listener.poll_once().await.unwrap();
        assert_eq!(listener.cursor(), Some(51));
    }

    #[tokio::test]
    async fn test_block_range_is_capped() {
        let chain = Arc::new(MockChainClient::new());
        chain.advance_blocks(20);

        let config = ListenerConfig {
            start_block: Some(0),
            max_block_range: 5,
            ..ListenerConfig::default()
        };
        let (mut listener, _rx) = make_listener(config, chain);

        listener.poll_once().await.unwrap();
        assert_eq!(listener.cursor(), Some(5));
        listener.poll_once().await.unwrap();
        assert_eq!(listener.cursor(), Some(10));
    }

    #[tokio::test]
    async fn test_confirmation_depth_holds_back_recent_blocks() {
        let chain = Arc::new(MockChainClient::new());
        chain.create_task(1, [1; 32]);

        let config = ListenerConfig {
            start_block: Some(0),
            confirmation_depth: 3,
            ..ListenerConfig::default()
        };
        let (mut listener, mut rx) = make_listener(config, chain.clone());

        assert_eq!(listener.poll_once().await.unwrap(), 0);
        assert!(rx.try_recv().is_err());

        chain.advance_blocks(3);
        assert_eq!(listener.poll_once().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_query_failure_keeps_cursor() {
        let chain = Arc::new(MockChainClient::new());
        chain.create_task(1, [1; 32]);
        chain.set_fail_queries(true);

        let config = ListenerConfig {
            start_block: Some(0),
            ..ListenerConfig::default()
        };
        let (mut listener, mut rx) = make_listener(config, chain.clone());

        assert!(matches!(
            listener.poll_once().await,
            Err(ListenerError::Chain(_))
        ));
        assert_eq!(listener.cursor(), Some(0));

        chain.set_fail_queries(false);
        assert_eq!(listener.poll_once().await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap().task_id(), 1);
    }

    #[tokio::test]
    async fn test_closed_channel_stops_run() {
        let chain = Arc::new(MockChainClient::new());
        chain.create_task(1, [1; 32]);

        let config = ListenerConfig {
            start_block: Some(0),
            poll_interval: Duration::from_millis(10),
            ..ListenerConfig::default()
        };
        let (mut listener, rx) = make_listener(config, chain);
        drop(rx);

        let result = listener.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(ListenerError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let chain = Arc::new(MockChainClient::new());
        let (mut listener, _rx) = make_listener(ListenerConfig::default(), chain);

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(listener.run(cancel).await.is_ok());
    }
}
