// Pulse engine - owns the rolling trade window, the book mirror, the regime
// classifier, and the verdict policy. Single-writer: `ingest` is the only
// mutation entry point and must be called from one task at a time.

use tracing::{debug, info};
use uuid::Uuid;

use crate::core::config::EngineConfig;
use crate::core::events::{SnapshotBus, SnapshotBusStats};
use crate::core::types::EngineState;
use crate::layer2::parser::{ParsedDepthUpdate, ParsedMessage, ParsedTrade};
use crate::layer2::BookMirror;
use crate::layer3::flow_window::FlowWindow;
use crate::layer3::regime::RegimeClassifier;
use crate::layer3::verdict::{make_policy, MetricInputs, ScorePolicy};

pub struct PulseEngine {
    symbol: String,

    flow: FlowWindow,
    book: BookMirror,
    classifier: RegimeClassifier,
    policy: Box<dyn ScorePolicy>,

    bus: SnapshotBus,
    state: EngineState,

    ticks: u64,
}

impl PulseEngine {
    pub fn new(symbol: &str, config: &EngineConfig) -> Self {
        let policy = make_policy(config);

        // Seed the display rows from the zeroed metrics so the very first
        // snapshot already carries the policy's full row set
        let seed = policy.evaluate(&MetricInputs::default());
        let state = EngineState::initial(symbol, seed.signal, seed.titans);

        info!(symbol = %state.symbol, policy = ?config.score_policy, "Engine created");

        Self {
            symbol: state.symbol.clone(),
            flow: FlowWindow::new(config),
            book: BookMirror::new(config.imbalance_history_capacity),
            classifier: RegimeClassifier::new(config.regime_thresholds, config.min_regime_samples),
            policy,
            bus: SnapshotBus::new(),
            state,
            ticks: 0,
        }
    }

    /// Sole mutation entry point: apply one parsed feed message, recompute
    /// the derived metrics, publish one immutable snapshot.
    pub fn ingest(&mut self, message: &ParsedMessage) -> EngineState {
        match message {
            ParsedMessage::Trade(trade) => self.apply_trade(trade),
            ParsedMessage::DepthUpdate(update) => self.apply_depth(update),
        }
        self.recompute_and_publish()
    }

    fn apply_trade(&mut self, trade: &ParsedTrade) {
        self.flow.record_trade(
            trade.price,
            trade.quantity,
            trade.buyer_initiated(),
            trade.timestamp_secs(),
        );
    }

    fn apply_depth(&mut self, update: &ParsedDepthUpdate) {
        if self.book.apply_delta(&update.bids, &update.asks).is_none() {
            debug!(symbol = %self.symbol, "Depth update left book one-sided");
        }
    }

    /// Recompute order: trade/book metrics -> regime -> verdict
    fn recompute_and_publish(&mut self) -> EngineState {
        let regime = self.classifier.classify(self.book.history());

        let inputs = MetricInputs {
            kinetic: self.flow.kinetic(),
            pressure: self.book.pressure(),
            elasticity: self.flow.elasticity(),
            regime,
        };
        let verdict = self.policy.evaluate(&inputs);

        self.ticks += 1;
        self.state = EngineState {
            symbol: self.symbol.clone(),
            price: self.flow.price(),
            kinetic: inputs.kinetic,
            pressure: inputs.pressure,
            elasticity: inputs.elasticity,
            regime,
            score: verdict.score,
            signal: verdict.signal,
            titans: verdict.titans,
        };

        self.bus.publish(&self.state);
        self.state.clone()
    }

    /// Independent copy of the latest published state
    pub fn snapshot(&self) -> EngineState {
        self.state.clone()
    }

    pub fn snapshot_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.state)
    }

    /// Register a synchronous subscriber. The callback receives its own
    /// copy of each snapshot and must not block.
    pub fn subscribe<F>(&self, callback: F) -> Uuid
    where
        F: Fn(EngineState) + Send + Sync + 'static,
    {
        self.bus.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: Uuid) -> bool {
        self.bus.unsubscribe(id)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Trades currently retained in the rolling buffer
    pub fn trade_buffer_len(&self) -> usize {
        self.flow.len()
    }

    pub fn bus_stats(&self) -> SnapshotBusStats {
        self.bus.get_stats()
    }
}
