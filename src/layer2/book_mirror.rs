// Order Book Mirror - top-of-book state from incremental deltas
// Single-writer: only the engine mutates it, so no internal locking

use ordered_float::OrderedFloat;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use tracing::debug;

use crate::layer2::parser::PriceLevel;

type Price = OrderedFloat<f64>;
type Quantity = f64;

/// Best-level view after a successful two-sided update
#[derive(Debug, Clone, Copy)]
pub struct BookTop {
    pub best_bid: f64,
    pub best_bid_qty: f64,
    pub best_ask: f64,
    pub best_ask_qty: f64,
    pub mid_price: f64,
    pub spread: f64,
}

impl fmt::Display for BookTop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BookTop(bid={:.2}x{:.4}, ask={:.2}x{:.4}, mid={:.2})",
            self.best_bid, self.best_bid_qty, self.best_ask, self.best_ask_qty, self.mid_price
        )
    }
}

/// Maintains bid/ask level maps from incremental deltas and derives the
/// top-of-book pressure ratio.
///
/// While either side is empty the pressure metric freezes at its last
/// computed value and no imbalance sample is recorded; this is a defined
/// state, not an error.
pub struct BookMirror {
    bids: BTreeMap<Price, Quantity>,
    asks: BTreeMap<Price, Quantity>,

    pressure: f64,
    history: VecDeque<f64>,
    history_capacity: usize,

    updates_applied: u64,
    frozen_ticks: u64,
}

impl BookMirror {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            pressure: 0.0,
            history: VecDeque::with_capacity(history_capacity),
            history_capacity,
            updates_applied: 0,
            frozen_ticks: 0,
        }
    }

    /// Apply one depth delta: quantity 0.0 removes the level, anything else
    /// upserts it. Returns the new top if both sides are populated, None if
    /// the metric is frozen for this tick.
    pub fn apply_delta(&mut self, bids: &[PriceLevel], asks: &[PriceLevel]) -> Option<BookTop> {
        self.updates_applied += 1;

        for level in bids {
            let key = OrderedFloat(level.price);
            if level.quantity == 0.0 {
                self.bids.remove(&key);
            } else {
                self.bids.insert(key, level.quantity);
            }
        }

        for level in asks {
            let key = OrderedFloat(level.price);
            if level.quantity == 0.0 {
                self.asks.remove(&key);
            } else {
                self.asks.insert(key, level.quantity);
            }
        }

        if self.bids.is_empty() || self.asks.is_empty() {
            self.frozen_ticks += 1;
            debug!(
                bid_levels = self.bids.len(),
                ask_levels = self.asks.len(),
                "Book one-sided, pressure frozen"
            );
            return None;
        }

        let top = self.top()?;

        // Imbalance at the best levels, bounded to [-1, 1] by construction
        let total = top.best_bid_qty + top.best_ask_qty;
        self.pressure = if total > 0.0 {
            (top.best_bid_qty - top.best_ask_qty) / total
        } else {
            0.0
        };

        self.history.push_back(self.pressure);
        while self.history.len() > self.history_capacity {
            self.history.pop_front();
        }
        debug_assert!(self.history.len() <= self.history_capacity);

        Some(top)
    }

    /// Current best levels, if both sides are populated
    pub fn top(&self) -> Option<BookTop> {
        let (bid_price, &bid_qty) = self.bids.iter().next_back()?;
        let (ask_price, &ask_qty) = self.asks.iter().next()?;

        let best_bid = bid_price.0;
        let best_ask = ask_price.0;

        Some(BookTop {
            best_bid,
            best_bid_qty: bid_qty,
            best_ask,
            best_ask_qty: ask_qty,
            mid_price: (best_bid + best_ask) / 2.0,
            spread: best_ask - best_bid,
        })
    }

    /// Last computed pressure ratio (held while the book is one-sided)
    pub fn pressure(&self) -> f64 {
        self.pressure
    }

    /// Retained imbalance samples, oldest first
    pub fn history(&self) -> &VecDeque<f64> {
        &self.history
    }

    pub fn bid_levels(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_levels(&self) -> usize {
        self.asks.len()
    }

    pub fn updates_applied(&self) -> u64 {
        self.updates_applied
    }

    pub fn frozen_ticks(&self) -> u64 {
        self.frozen_ticks
    }

    pub fn reset(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.history.clear();
        self.pressure = 0.0;
    }
}
