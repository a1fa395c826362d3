// Feed Transport - single multiplexed WebSocket subscription
// Delivers raw trade prints and book-depth deltas for one configured symbol

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock as AsyncRwLock};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

use crate::core::config::FeedConfig;
use crate::core::types::ConnectionStatus;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("WebSocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Feed not connected")]
    NotConnected,
}

/// Feed statistics
#[derive(Debug, Clone)]
pub struct FeedStats {
    pub state: ConnectionStatus,
    pub message_count: u64,
    pub error_count: u64,
    pub reconnects: u64,
}

impl fmt::Display for FeedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FeedStats(state={}, messages={}, errors={}, reconnects={})",
            self.state, self.message_count, self.error_count, self.reconnects
        )
    }
}

/// WebSocket feed client with a fixed multiplexed subscription.
///
/// The subscription (trade prints + book-depth deltas) is decided at
/// construction and re-issued on every reconnect. Each (re)connect bumps a
/// connection epoch; a superseded connection task observes the bump and
/// stops delivering, so in-flight messages from an old handle can never
/// reach the consumer after a new handle is installed.
pub struct FeedClient {
    pub symbol: String,
    url: String,
    streams: Vec<String>,

    state: Arc<RwLock<ConnectionStatus>>,
    message_count: Arc<AtomicU64>,
    error_count: Arc<AtomicU64>,
    reconnects: Arc<AtomicU64>,
    epoch: Arc<AtomicU64>,

    message_rx: AsyncRwLock<Option<mpsc::UnboundedReceiver<String>>>,

    max_reconnect_attempts: u32,
    ping_interval_secs: u64,
    health_check_interval_secs: u64,
    stale_timeout_secs: u64,
    connection_wait_ms: u64,
}

impl FeedClient {
    pub fn new(symbol: &str, config: &FeedConfig) -> Self {
        let lower = symbol.to_lowercase();
        let streams = vec![
            format!("{}@aggTrade", lower),
            format!(
                "{}@depth{}@{}ms",
                lower, config.depth_levels, config.depth_interval_ms
            ),
        ];

        info!(symbol = symbol, url = %config.ws_base_url, streams = ?streams, "Feed client created");

        Self {
            symbol: symbol.to_uppercase(),
            url: config.ws_base_url.clone(),
            streams,
            state: Arc::new(RwLock::new(ConnectionStatus::Disconnected)),
            message_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            reconnects: Arc::new(AtomicU64::new(0)),
            epoch: Arc::new(AtomicU64::new(0)),
            message_rx: AsyncRwLock::new(None),
            max_reconnect_attempts: config.max_reconnect_attempts,
            ping_interval_secs: config.ping_interval_secs,
            health_check_interval_secs: config.health_check_interval_secs,
            stale_timeout_secs: config.stale_timeout_secs,
            connection_wait_ms: config.connection_wait_ms,
        }
    }

    /// Connect and start delivering raw messages.
    /// Any previous connection is invalidated first (stale-handler guard).
    pub async fn connect(&self) -> Result<(), FeedError> {
        let my_epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        *self.state.write() = ConnectionStatus::Connecting;

        let (msg_tx, msg_rx) = mpsc::unbounded_channel::<String>();
        *self.message_rx.write().await = Some(msg_rx);

        let url = self.url.clone();
        let streams = self.streams.clone();
        let state = self.state.clone();
        let message_count = self.message_count.clone();
        let error_count = self.error_count.clone();
        let reconnects = self.reconnects.clone();
        let epoch = self.epoch.clone();
        let max_attempts = self.max_reconnect_attempts;
        let ping_interval = self.ping_interval_secs;
        let health_check_interval = self.health_check_interval_secs;
        let stale_timeout = self.stale_timeout_secs;

        tokio::spawn(async move {
            run_feed(
                url,
                streams,
                msg_tx,
                state.clone(),
                message_count,
                error_count,
                reconnects,
                epoch,
                my_epoch,
                max_attempts,
                ping_interval,
                health_check_interval,
                stale_timeout,
            )
            .await;
        });

        tokio::time::sleep(Duration::from_millis(self.connection_wait_ms)).await;

        Ok(())
    }

    /// Receive next raw message. Returns None when no receiver is installed
    /// or the current connection's channel has ended; a reconnect installs a
    /// fresh channel, so the consumer should call again while it intends to
    /// keep running.
    ///
    /// The receiver is taken out of its slot before awaiting so `connect()`
    /// can install a replacement while the consumer is parked on an empty
    /// channel.
    pub async fn recv(&self) -> Option<String> {
        let mut rx = self.message_rx.write().await.take()?;
        let message = rx.recv().await;

        // Put the receiver back unless a reconnect installed a new one in
        // the meantime; the superseded receiver is simply dropped
        let mut slot = self.message_rx.write().await;
        if slot.is_none() {
            *slot = Some(rx);
        }
        message
    }

    #[cfg(test)]
    pub(crate) async fn install_receiver(&self, rx: mpsc::UnboundedReceiver<String>) {
        *self.message_rx.write().await = Some(rx);
    }

    /// Release the current transport handle and establish a fresh one.
    /// Ordering contract: the prior handle is invalidated before the new
    /// connection is started.
    pub async fn reconnect(&self) -> Result<(), FeedError> {
        info!(symbol = %self.symbol, "Reconnecting feed");
        self.disconnect();
        self.connect().await
    }

    /// Invalidate the current connection. The connection task observes the
    /// epoch bump and exits; no further messages are delivered.
    pub fn disconnect(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *self.state.write() = ConnectionStatus::Disconnected;
        debug!(symbol = %self.symbol, "Feed disconnected");
    }

    pub fn is_connected(&self) -> bool {
        *self.state.read() == ConnectionStatus::Connected
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.state.read()
    }

    pub fn get_stats(&self) -> FeedStats {
        FeedStats {
            state: *self.state.read(),
            message_count: self.message_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }

    pub fn subscribed_streams(&self) -> &[String] {
        &self.streams
    }
}

impl Drop for FeedClient {
    fn drop(&mut self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *self.state.write() = ConnectionStatus::Disconnected;
    }
}

/// Connection loop with automatic reconnection and exponential backoff.
/// Exits when the client epoch moves past `my_epoch` or attempts run out.
#[allow(clippy::too_many_arguments)]
async fn run_feed(
    url: String,
    streams: Vec<String>,
    msg_tx: mpsc::UnboundedSender<String>,
    state: Arc<RwLock<ConnectionStatus>>,
    message_count: Arc<AtomicU64>,
    error_count: Arc<AtomicU64>,
    reconnects: Arc<AtomicU64>,
    epoch: Arc<AtomicU64>,
    my_epoch: u64,
    max_reconnect_attempts: u32,
    ping_interval_secs: u64,
    health_check_interval_secs: u64,
    stale_timeout_secs: u64,
) {
    let mut attempt = 0u32;

    loop {
        if epoch.load(Ordering::SeqCst) != my_epoch {
            debug!("Connection superseded, stopping feed task");
            return;
        }

        let result = run_connection(
            &url,
            &streams,
            &msg_tx,
            &state,
            &message_count,
            &epoch,
            my_epoch,
            ping_interval_secs,
            health_check_interval_secs,
            stale_timeout_secs,
        )
        .await;

        match result {
            Ok(()) => info!("Feed connection ended"),
            Err(e) => {
                error!(error = %e, "Feed connection error");
                error_count.fetch_add(1, Ordering::Relaxed);
            }
        }

        if epoch.load(Ordering::SeqCst) != my_epoch {
            return;
        }

        if attempt >= max_reconnect_attempts {
            error!(max_attempts = max_reconnect_attempts, "Max reconnection attempts reached");
            *state.write() = ConnectionStatus::Failed;
            return;
        }

        let delay_secs = std::cmp::min(2_u64.pow(attempt), 60);
        attempt += 1;
        reconnects.fetch_add(1, Ordering::Relaxed);

        warn!(delay_secs = delay_secs, attempt = attempt, "Feed reconnecting");
        *state.write() = ConnectionStatus::Reconnecting;
        tokio::time::sleep(Duration::from_secs(delay_secs)).await;
    }
}

/// Delivery gate checked before and after every read await: a frame is only
/// forwarded while this connection's epoch is current and the state is
/// Connected. A reconnect bumps the epoch, so a frame that raced the bump
/// fails the gate and is dropped.
fn connection_live(
    epoch: &Arc<AtomicU64>,
    my_epoch: u64,
    state: &Arc<RwLock<ConnectionStatus>>,
) -> bool {
    epoch.load(Ordering::SeqCst) == my_epoch && *state.read() == ConnectionStatus::Connected
}

/// One connection lifetime: subscribe, pump messages, keepalive, staleness
#[allow(clippy::too_many_arguments)]
async fn run_connection(
    url: &str,
    streams: &[String],
    msg_tx: &mpsc::UnboundedSender<String>,
    state: &Arc<RwLock<ConnectionStatus>>,
    message_count: &Arc<AtomicU64>,
    epoch: &Arc<AtomicU64>,
    my_epoch: u64,
    ping_interval_secs: u64,
    health_check_interval_secs: u64,
    stale_timeout_secs: u64,
) -> Result<(), FeedError> {
    debug!(url = url, "Connecting feed WebSocket");

    let (ws_stream, _) = connect_async(url).await?;

    info!("Feed WebSocket connected");
    *state.write() = ConnectionStatus::Connected;

    let (write, mut read) = ws_stream.split();
    let write = Arc::new(AsyncRwLock::new(write));

    // One multiplexed subscription for the whole engine
    let subscribe_msg = serde_json::json!({
        "method": "SUBSCRIBE",
        "params": streams,
        "id": 1
    });
    {
        let mut w = write.write().await;
        w.send(Message::Text(subscribe_msg.to_string())).await?;
    }
    info!(streams = ?streams, "Subscribed to feed streams");

    let last_message_time = Arc::new(AsyncRwLock::new(Instant::now()));

    // Keepalive pings
    let write_ping = write.clone();
    let ping_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(ping_interval_secs));
        loop {
            interval.tick().await;
            let mut w = write_ping.write().await;
            if w.send(Message::Ping(vec![])).await.is_err() {
                break;
            }
        }
    });

    // Staleness monitor
    let state_clone = state.clone();
    let last_msg_time = last_message_time.clone();
    let monitor_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(health_check_interval_secs));
        loop {
            interval.tick().await;
            let elapsed = last_msg_time.read().await.elapsed();
            if elapsed > Duration::from_secs(stale_timeout_secs) {
                warn!(elapsed_secs = elapsed.as_secs(), "Stale feed connection detected");
                *state_clone.write() = ConnectionStatus::Disconnected;
                break;
            }
        }
    });

    let result = loop {
        // Stale-handler guard: stop delivering once superseded
        if !connection_live(epoch, my_epoch, state) {
            break Ok(());
        }

        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                // Re-check after the await: this frame may have raced a
                // reconnect and must not be delivered if it did
                if !connection_live(epoch, my_epoch, state) {
                    break Ok(());
                }
                *last_message_time.write().await = Instant::now();
                message_count.fetch_add(1, Ordering::Relaxed);
                if msg_tx.send(text).is_err() {
                    // Consumer gone
                    break Ok(());
                }
            }
            Some(Ok(Message::Ping(data))) => {
                *last_message_time.write().await = Instant::now();
                let mut w = write.write().await;
                let _ = w.send(Message::Pong(data)).await;
            }
            Some(Ok(Message::Pong(_))) => {
                *last_message_time.write().await = Instant::now();
            }
            Some(Ok(Message::Close(_))) => {
                info!("Feed WebSocket closed by server");
                break Ok(());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                break Err(FeedError::Transport(e));
            }
            None => {
                info!("Feed WebSocket stream ended");
                break Ok(());
            }
        }
    };

    ping_handle.abort();
    monitor_handle.abort();

    if epoch.load(Ordering::SeqCst) == my_epoch {
        *state.write() = ConnectionStatus::Disconnected;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_client_creation() {
        let client = FeedClient::new("btcusdt", &FeedConfig::default());
        assert_eq!(client.symbol, "BTCUSDT");
        assert!(!client.is_connected());
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_fixed_multiplexed_subscription() {
        let client = FeedClient::new("BTCUSDT", &FeedConfig::default());
        let streams = client.subscribed_streams();
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0], "btcusdt@aggTrade");
        assert_eq!(streams[1], "btcusdt@depth20@100ms");
    }

    #[test]
    fn test_initial_stats() {
        let client = FeedClient::new("BTCUSDT", &FeedConfig::default());
        let stats = client.get_stats();
        assert_eq!(stats.message_count, 0);
        assert_eq!(stats.error_count, 0);
        assert_eq!(stats.reconnects, 0);
    }

    #[test]
    fn test_disconnect_bumps_epoch() {
        let client = FeedClient::new("BTCUSDT", &FeedConfig::default());
        let before = client.epoch.load(Ordering::SeqCst);
        client.disconnect();
        assert_eq!(client.epoch.load(Ordering::SeqCst), before + 1);
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_superseded_connection_fails_delivery_gate() {
        let epoch = Arc::new(AtomicU64::new(1));
        let state = Arc::new(RwLock::new(ConnectionStatus::Connected));
        assert!(connection_live(&epoch, 1, &state));

        // Reconnect bumps the epoch mid-frame: the old connection's frame
        // must not pass the gate, the new connection's must
        epoch.fetch_add(1, Ordering::SeqCst);
        assert!(!connection_live(&epoch, 1, &state));
        assert!(connection_live(&epoch, 2, &state));

        *state.write() = ConnectionStatus::Disconnected;
        assert!(!connection_live(&epoch, 2, &state));
    }

    #[tokio::test]
    async fn test_recv_picks_up_replacement_receiver() {
        let client = FeedClient::new("BTCUSDT", &FeedConfig::default());

        // Old connection's channel dies
        let (tx1, rx1) = mpsc::unbounded_channel::<String>();
        client.install_receiver(rx1).await;
        drop(tx1);
        assert_eq!(client.recv().await, None);

        // A reconnect installs a fresh channel; recv must read from it
        let (tx2, rx2) = mpsc::unbounded_channel::<String>();
        client.install_receiver(rx2).await;
        tx2.send("fresh".to_string()).unwrap();
        assert_eq!(client.recv().await, Some("fresh".to_string()));
    }

    #[tokio::test]
    async fn test_receiver_swap_not_blocked_by_parked_consumer() {
        let client = Arc::new(FeedClient::new("BTCUSDT", &FeedConfig::default()));

        let (tx1, rx1) = mpsc::unbounded_channel::<String>();
        client.install_receiver(rx1).await;

        // Park a consumer on the empty old channel; it has taken the
        // receiver out once the slot reads empty
        let consumer_client = Arc::clone(&client);
        let consumer = tokio::spawn(async move { consumer_client.recv().await });
        while client.message_rx.read().await.is_some() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // The receiver slot must stay writable while the consumer is parked
        let (tx2, rx2) = mpsc::unbounded_channel::<String>();
        client.install_receiver(rx2).await;

        // Old connection tears down: the parked recv resolves to None
        drop(tx1);
        assert_eq!(consumer.await.unwrap(), None);

        // The next recv reads from the replacement channel
        tx2.send("after-reconnect".to_string()).unwrap();
        assert_eq!(client.recv().await, Some("after-reconnect".to_string()));
    }
}
