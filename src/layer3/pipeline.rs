// Feed pipeline - wires the websocket transport through the parser into the
// engine. The engine mutex is scoped to one whole ingest-and-recompute cycle
// so external snapshot readers never observe a half-updated tick.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::config::PulseConfig;
use crate::core::types::{ConnectionStatus, EngineState};
use crate::layer1::websocket::{FeedClient, FeedError, FeedStats};
use crate::layer2::parser::{MessageParser, ParseError};
use crate::layer3::engine::PulseEngine;

/// Backoff while waiting for a reconnect to install a fresh feed channel
const RECV_RETRY_MS: u64 = 100;

#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub symbol: String,
    pub is_running: bool,
    pub messages_processed: u64,
    pub messages_skipped: u64,
    pub parse_errors: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub feed: FeedStats,
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pipeline({}: running={}, processed={}, skipped={}, parse_errors={})",
            self.symbol,
            self.is_running,
            self.messages_processed,
            self.messages_skipped,
            self.parse_errors
        )
    }
}

pub struct FeedPipeline {
    symbol: String,

    client: Arc<FeedClient>,
    engine: Arc<Mutex<PulseEngine>>,

    is_running: Arc<AtomicBool>,
    messages_processed: Arc<AtomicU64>,
    messages_skipped: Arc<AtomicU64>,
    parse_errors: Arc<AtomicU64>,
    started_at: Mutex<Option<DateTime<Utc>>>,

    consume_task: Mutex<Option<JoinHandle<()>>>,
}

impl FeedPipeline {
    pub fn new(config: &PulseConfig) -> Self {
        let symbol = config.symbol.to_uppercase();
        Self {
            client: Arc::new(FeedClient::new(&symbol, &config.feed)),
            engine: Arc::new(Mutex::new(PulseEngine::new(&symbol, &config.engine))),
            symbol,
            is_running: Arc::new(AtomicBool::new(false)),
            messages_processed: Arc::new(AtomicU64::new(0)),
            messages_skipped: Arc::new(AtomicU64::new(0)),
            parse_errors: Arc::new(AtomicU64::new(0)),
            started_at: Mutex::new(None),
            consume_task: Mutex::new(None),
        }
    }

    /// Connect the transport and spawn the consume loop
    pub async fn start(&self) -> Result<(), FeedError> {
        if self.is_running.load(Ordering::SeqCst) {
            warn!(symbol = %self.symbol, "Pipeline already running");
            return Ok(());
        }

        self.client.connect().await?;
        self.is_running.store(true, Ordering::SeqCst);
        *self.started_at.lock() = Some(Utc::now());
        self.spawn_consumer();

        info!(symbol = %self.symbol, "Pipeline started");
        Ok(())
    }

    fn spawn_consumer(&self) {
        let handle = tokio::spawn(consume_loop(
            Arc::clone(&self.client),
            Arc::clone(&self.engine),
            MessageParser::new(&self.symbol),
            Arc::clone(&self.is_running),
            Arc::clone(&self.messages_processed),
            Arc::clone(&self.messages_skipped),
            Arc::clone(&self.parse_errors),
        ));
        *self.consume_task.lock() = Some(handle);
    }

    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        self.client.disconnect();
        if let Some(handle) = self.consume_task.lock().take() {
            handle.abort();
        }
        info!(symbol = %self.symbol, "Pipeline stopped");
    }

    /// Tear down the old transport handle before dialing a new one; the
    /// client's connection epoch fences out stale handlers in between.
    /// If the consume loop exited after a permanent transport failure, it
    /// is revived for the fresh connection.
    pub async fn reconnect(&self) -> Result<(), FeedError> {
        info!(symbol = %self.symbol, "Pipeline reconnecting");
        self.client.reconnect().await?;

        let consumer_dead = self
            .consume_task
            .lock()
            .as_ref()
            .map_or(true, |handle| handle.is_finished());
        if consumer_dead || !self.is_running.load(Ordering::SeqCst) {
            self.is_running.store(true, Ordering::SeqCst);
            self.spawn_consumer();
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Shared engine handle. Lock it for one whole call, never across awaits.
    pub fn engine(&self) -> Arc<Mutex<PulseEngine>> {
        Arc::clone(&self.engine)
    }

    /// Independent copy of the latest snapshot
    pub fn snapshot(&self) -> EngineState {
        self.engine.lock().snapshot()
    }

    pub fn subscribe<F>(&self, callback: F) -> Uuid
    where
        F: Fn(EngineState) + Send + Sync + 'static,
    {
        self.engine.lock().subscribe(callback)
    }

    pub fn unsubscribe(&self, id: Uuid) -> bool {
        self.engine.lock().unsubscribe(id)
    }

    pub fn get_stats(&self) -> PipelineStats {
        PipelineStats {
            symbol: self.symbol.clone(),
            is_running: self.is_running(),
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            messages_skipped: self.messages_skipped.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            started_at: *self.started_at.lock(),
            feed: self.client.get_stats(),
        }
    }
}

impl Drop for FeedPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Single consumer task: the only caller of `PulseEngine::ingest`, which
/// keeps engine mutation serialized as required.
async fn consume_loop(
    client: Arc<FeedClient>,
    engine: Arc<Mutex<PulseEngine>>,
    mut parser: MessageParser,
    is_running: Arc<AtomicBool>,
    messages_processed: Arc<AtomicU64>,
    messages_skipped: Arc<AtomicU64>,
    parse_errors: Arc<AtomicU64>,
) {
    while is_running.load(Ordering::SeqCst) {
        let raw = match client.recv().await {
            Some(raw) => raw,
            // The current connection's channel ended. A reconnect installs
            // a fresh receiver, so only a permanent transport failure ends
            // the loop; otherwise back off briefly and call recv again.
            None => {
                if client.status() == ConnectionStatus::Failed {
                    error!("Feed failed permanently, consume loop exiting");
                    is_running.store(false, Ordering::SeqCst);
                    break;
                }
                tokio::time::sleep(Duration::from_millis(RECV_RETRY_MS)).await;
                continue;
            }
        };

        match parser.parse(&raw) {
            Ok(message) => {
                engine.lock().ingest(&message);
                messages_processed.fetch_add(1, Ordering::Relaxed);
            }
            // Subscription acks and other non-data frames
            Err(ParseError::NotData) => {
                messages_skipped.fetch_add(1, Ordering::Relaxed);
            }
            // Bad input never touches engine state
            Err(e) => {
                parse_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Dropped unparseable feed message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PulseConfig;

    #[test]
    fn test_pipeline_initial_state() {
        let pipeline = FeedPipeline::new(&PulseConfig::default());
        assert!(!pipeline.is_running());

        let stats = pipeline.get_stats();
        assert_eq!(stats.symbol, "BTCUSDT");
        assert_eq!(stats.messages_processed, 0);
        assert!(stats.started_at.is_none());
    }

    #[test]
    fn test_snapshot_available_before_start() {
        let pipeline = FeedPipeline::new(&PulseConfig::default());
        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.symbol, "BTCUSDT");
        assert_eq!(snapshot.price, 0.0);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_safe() {
        let pipeline = FeedPipeline::new(&PulseConfig::default());
        pipeline.stop();
        assert!(!pipeline.is_running());
    }

    async fn wait_for_processed(pipeline: &FeedPipeline, n: u64) {
        for _ in 0..200 {
            if pipeline.messages_processed.load(Ordering::Relaxed) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pipeline never processed {} messages", n);
    }

    fn raw_trade(id: i64) -> String {
        format!(
            r#"{{"e":"aggTrade","E":1700000000100,"s":"BTCUSDT","a":{id},"p":"50000.0","q":"1.0","f":{id},"l":{id},"T":1700000000000,"m":false}}"#,
            id = id,
        )
    }

    #[tokio::test]
    async fn test_ingestion_resumes_after_feed_channel_swap() {
        let pipeline = FeedPipeline::new(&PulseConfig::default());

        let (tx1, rx1) = tokio::sync::mpsc::unbounded_channel();
        pipeline.client.install_receiver(rx1).await;
        pipeline.is_running.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(consume_loop(
            Arc::clone(&pipeline.client),
            Arc::clone(&pipeline.engine),
            MessageParser::new("BTCUSDT"),
            Arc::clone(&pipeline.is_running),
            Arc::clone(&pipeline.messages_processed),
            Arc::clone(&pipeline.messages_skipped),
            Arc::clone(&pipeline.parse_errors),
        ));

        tx1.send(raw_trade(1)).unwrap();
        wait_for_processed(&pipeline, 1).await;

        // Old connection tears down; a reconnect installs a fresh channel.
        // The consume loop must survive the swap and keep ingesting.
        drop(tx1);
        let (tx2, rx2) = tokio::sync::mpsc::unbounded_channel();
        pipeline.client.install_receiver(rx2).await;

        tx2.send(raw_trade(2)).unwrap();
        wait_for_processed(&pipeline, 2).await;
        assert!(pipeline.is_running());
        assert_eq!(pipeline.snapshot().price, 50000.0);

        pipeline.is_running.store(false, Ordering::SeqCst);
        handle.abort();
    }

    #[test]
    fn test_subscribe_through_pipeline() {
        let pipeline = FeedPipeline::new(&PulseConfig::default());
        let id = pipeline.subscribe(|_| {});
        assert!(pipeline.unsubscribe(id));
        assert!(!pipeline.unsubscribe(id));
    }
}
