// Rolling Trade Window - bounded trade buffer with derived flow metrics
// Net flow ("kinetic") over a trailing time window and short-horizon price
// elasticity ("micro-burst") over the last few trades

use std::collections::VecDeque;
use tracing::trace;

use crate::core::config::{EngineConfig, ThinVolumePolicy};
use crate::core::types::Trade;

/// Elasticity scale factor: price displacement per unit volume is tiny for
/// liquid symbols, so it is scaled to a readable magnitude
const ELASTICITY_SCALE: f64 = 10000.0;

pub struct FlowWindow {
    buffer: VecDeque<Trade>,
    capacity: usize,

    flow_window_secs: f64,
    micro_window_trades: usize,
    min_micro_volume: f64,
    thin_volume: ThinVolumePolicy,

    price: f64,
    kinetic: f64,
    elasticity: f64,

    trades_recorded: u64,
}

impl FlowWindow {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            buffer: VecDeque::with_capacity(config.trade_buffer_capacity),
            capacity: config.trade_buffer_capacity,
            flow_window_secs: config.flow_window_secs,
            micro_window_trades: config.micro_window_trades,
            min_micro_volume: config.min_micro_volume,
            thin_volume: config.thin_volume,
            price: 0.0,
            kinetic: 0.0,
            elasticity: 0.0,
            trades_recorded: 0,
        }
    }

    /// Record one trade and recompute the derived metrics.
    /// The last price updates unconditionally; eviction is oldest-first.
    pub fn record_trade(&mut self, price: f64, quantity: f64, buyer_initiated: bool, timestamp: f64) {
        debug_assert!(quantity >= 0.0, "negative trade quantity");
        let trade = Trade::new(price, quantity.max(0.0), buyer_initiated, timestamp);

        self.buffer.push_back(trade);
        while self.buffer.len() > self.capacity {
            self.buffer.pop_front();
        }
        debug_assert!(self.buffer.len() <= self.capacity);

        self.trades_recorded += 1;
        self.price = price;

        self.recompute_kinetic(timestamp);
        self.recompute_elasticity();

        trace!(
            price = price,
            kinetic = self.kinetic,
            elasticity = self.elasticity,
            "Trade recorded"
        );
    }

    /// Net flow: buy volume minus sell volume, restricted to trades with
    /// timestamp strictly inside the trailing window ending at `now`.
    /// O(buffer) scan per call, fine at feed rates of a few events/second.
    fn recompute_kinetic(&mut self, now: f64) {
        let cutoff = now - self.flow_window_secs;
        self.kinetic = self
            .buffer
            .iter()
            .filter(|t| t.timestamp > cutoff)
            .map(Trade::signed_quantity)
            .sum();
    }

    /// Micro-burst elasticity: price displacement per unit traded volume
    /// over the last N trades. Below the volume floor the behavior is the
    /// configured thin-volume policy (hold last value or reset to zero).
    fn recompute_elasticity(&mut self) {
        let n = self.buffer.len().min(self.micro_window_trades);
        if n == 0 {
            return;
        }
        let start = self.buffer.len() - n;

        let first_price = self.buffer[start].price;
        let last_price = self.buffer[self.buffer.len() - 1].price;
        let volume: f64 = self.buffer.iter().skip(start).map(|t| t.quantity).sum();

        if volume < self.min_micro_volume {
            match self.thin_volume {
                ThinVolumePolicy::Hold => {}
                ThinVolumePolicy::ResetToZero => self.elasticity = 0.0,
            }
            return;
        }

        self.elasticity = (last_price - first_price) / volume * ELASTICITY_SCALE;
    }

    /// Last trade price
    pub fn price(&self) -> f64 {
        self.price
    }

    pub fn kinetic(&self) -> f64 {
        self.kinetic
    }

    pub fn elasticity(&self) -> f64 {
        self.elasticity
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn trades_recorded(&self) -> u64 {
        self.trades_recorded
    }

    /// Oldest retained trade, if any
    pub fn oldest(&self) -> Option<&Trade> {
        self.buffer.front()
    }
}
