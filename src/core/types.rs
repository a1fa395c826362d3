// Core Type Definitions for Market Pulse
// Immutable value types shared across all layers

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Volatility regime derived from dispersion of recent imbalance samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    /// Not enough imbalance history yet
    #[default]
    Calculating,
    Stagnant,
    Stable,
    Volatile,
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regime::Calculating => write!(f, "CALCULATING"),
            Regime::Stagnant => write!(f, "STAGNANT"),
            Regime::Stable => write!(f, "STABLE"),
            Regime::Volatile => write!(f, "VOLATILE"),
        }
    }
}

/// Discrete trading verdict. Covers both scoring policies' vocabularies;
/// each policy only ever emits its own subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    // Star-count policy
    Standby,
    Prepare,
    ExecuteLong,
    ExecuteShort,
    // Trap/break policy
    Observe,
    LongTrap,
    ShortTrap,
    LongBreak,
    ShortBreak,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Standby => write!(f, "STANDBY"),
            Signal::Prepare => write!(f, "PREPARE"),
            Signal::ExecuteLong => write!(f, "EXECUTE_LONG"),
            Signal::ExecuteShort => write!(f, "EXECUTE_SHORT"),
            Signal::Observe => write!(f, "OBSERVE"),
            Signal::LongTrap => write!(f, "LONG(TRAP)"),
            Signal::ShortTrap => write!(f, "SHORT(TRAP)"),
            Signal::LongBreak => write!(f, "LONG(BREAK)"),
            Signal::ShortBreak => write!(f, "SHORT(BREAK)"),
        }
    }
}

// ============================================================================
// Trade
// ============================================================================

/// A single recorded trade print. Immutable once recorded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Trade {
    pub price: f64,
    pub quantity: f64,
    pub buyer_initiated: bool,
    /// Seconds (fractional)
    pub timestamp: f64,
}

impl Trade {
    pub fn new(price: f64, quantity: f64, buyer_initiated: bool, timestamp: f64) -> Self {
        Self {
            price,
            quantity,
            buyer_initiated,
            timestamp,
        }
    }

    /// Signed quantity: positive for buyer-initiated, negative otherwise
    pub fn signed_quantity(&self) -> f64 {
        if self.buyer_initiated {
            self.quantity
        } else {
            -self.quantity
        }
    }
}

impl fmt::Display for Trade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Trade(price={:.2}, qty={:.4}, side={})",
            self.price,
            self.quantity,
            if self.buyer_initiated { "BUY" } else { "SELL" }
        )
    }
}

// ============================================================================
// TitanRow
// ============================================================================

/// One display row of the verdict breakdown. Placeholder rows render with
/// `active == false` and never contribute to the score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitanRow {
    pub name: String,
    pub display_value: String,
    pub active: bool,
}

impl TitanRow {
    pub fn new(name: &str, display_value: String, active: bool) -> Self {
        Self {
            name: name.to_string(),
            display_value,
            active,
        }
    }
}

impl fmt::Display for TitanRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}]",
            self.name,
            self.display_value,
            if self.active { "x" } else { " " }
        )
    }
}

// ============================================================================
// EngineState (snapshot)
// ============================================================================

/// Immutable engine snapshot. A new instance is produced on every publish so
/// a previously handed-out snapshot never changes under its holder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub symbol: String,
    pub price: f64,
    /// Net order flow over the trailing flow window (buy volume - sell volume)
    pub kinetic: f64,
    /// Top-of-book imbalance in [-1, 1]
    pub pressure: f64,
    /// Price displacement per unit traded volume over the micro window
    pub elasticity: f64,
    pub regime: Regime,
    /// Count of active verdict factors, 0..=5
    pub score: u8,
    pub signal: Signal,
    pub titans: Vec<TitanRow>,
}

impl EngineState {
    pub fn initial(symbol: &str, signal: Signal, titans: Vec<TitanRow>) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            price: 0.0,
            kinetic: 0.0,
            pressure: 0.0,
            elasticity: 0.0,
            regime: Regime::Calculating,
            score: 0,
            signal,
            titans,
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EngineState(symbol={}, price={:.2}, kinetic={:+.2}, pressure={:+.3}, elasticity={:+.2}, regime={}, score={}, signal={})",
            self.symbol,
            self.price,
            self.kinetic,
            self.pressure,
            self.elasticity,
            self.regime,
            self.score,
            self.signal
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_signed_quantity() {
        let buy = Trade::new(50000.0, 1.5, true, 100.0);
        let sell = Trade::new(50000.0, 1.5, false, 100.0);
        assert_eq!(buy.signed_quantity(), 1.5);
        assert_eq!(sell.signed_quantity(), -1.5);
    }

    #[test]
    fn test_display_traits() {
        assert_eq!(format!("{}", Signal::ExecuteLong), "EXECUTE_LONG");
        assert_eq!(format!("{}", Signal::ShortTrap), "SHORT(TRAP)");
        assert_eq!(format!("{}", Regime::Calculating), "CALCULATING");
        assert_eq!(format!("{}", Regime::Volatile), "VOLATILE");
    }

    #[test]
    fn test_initial_state() {
        let state = EngineState::initial("btcusdt", Signal::Standby, Vec::new());
        assert_eq!(state.symbol, "BTCUSDT");
        assert_eq!(state.price, 0.0);
        assert_eq!(state.regime, Regime::Calculating);
        assert_eq!(state.score, 0);
    }

    #[test]
    fn test_snapshot_json_round_trip() {
        let state = EngineState::initial("BTCUSDT", Signal::Observe, Vec::new());
        let json = serde_json::to_string(&state).unwrap();
        let back: EngineState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.symbol, "BTCUSDT");
        assert_eq!(back.signal, Signal::Observe);
    }
}
