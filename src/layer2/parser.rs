// Message Parser - raw feed JSON to typed trade prints and depth deltas
// Malformed or unparseable messages yield ParseError; the tick is skipped
// and engine state is left unchanged

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

// ============================================================================
// Price/Quantity Level
// ============================================================================

/// A price level [price, quantity]. Quantity 0.0 is a removal sentinel.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct PriceLevel {
    pub price: f64,
    pub quantity: f64,
}

impl PriceLevel {
    pub fn new(price: f64, quantity: f64) -> Self {
        Self { price, quantity }
    }
}

/// Parse a string field as f64, returning ParseError on failure
fn parse_f64_field(value: &str, field_name: &str) -> Result<f64, ParseError> {
    value
        .parse::<f64>()
        .map_err(|_| ParseError::InvalidJson(format!("Invalid {}: '{}'", field_name, value)))
}

/// Parse a [price_string, qty_string] pair into PriceLevel.
/// Negative quantities violate the feed contract; clamped in release.
fn parse_level(raw: &[String; 2]) -> Result<PriceLevel, ParseError> {
    let price = parse_f64_field(&raw[0], "price")?;
    let quantity = parse_f64_field(&raw[1], "quantity")?;
    debug_assert!(quantity >= 0.0, "negative level quantity from feed");
    Ok(PriceLevel {
        price,
        quantity: quantity.max(0.0),
    })
}

// ============================================================================
// Parsed Message Types
// ============================================================================

/// Parsed trade print
#[derive(Debug, Clone, serde::Serialize)]
pub struct ParsedTrade {
    pub symbol: String,
    pub trade_id: i64,
    pub price: f64,
    pub quantity: f64,
    /// Trade time in milliseconds
    pub timestamp: u64,
    pub is_buyer_maker: bool,
    pub event_time: u64,
}

impl ParsedTrade {
    /// Buyer-initiated means the buyer was the taker
    pub fn buyer_initiated(&self) -> bool {
        !self.is_buyer_maker
    }

    /// Trade time in fractional seconds
    pub fn timestamp_secs(&self) -> f64 {
        self.timestamp as f64 / 1000.0
    }
}

/// Parsed book-depth delta
#[derive(Debug, Clone, serde::Serialize)]
pub struct ParsedDepthUpdate {
    pub symbol: String,
    pub event_time: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// All message kinds consumed from the multiplexed feed
#[derive(Debug, Clone)]
pub enum ParsedMessage {
    Trade(ParsedTrade),
    DepthUpdate(ParsedDepthUpdate),
}

// ============================================================================
// Serde Structures (raw feed JSON, short field names)
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawAggTrade {
    #[serde(rename = "e")]
    _event_type: String,
    #[serde(rename = "E")]
    event_time: u64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "a")]
    agg_trade_id: i64,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "T")]
    timestamp: u64,
    #[serde(rename = "m")]
    is_buyer_maker: bool,
}

#[derive(Debug, Deserialize)]
struct RawDepthUpdate {
    #[serde(rename = "e")]
    _event_type: String,
    #[serde(rename = "E")]
    event_time: u64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b")]
    bids: Vec<[String; 2]>,
    #[serde(rename = "a")]
    asks: Vec<[String; 2]>,
}

// ============================================================================
// MessageParser
// ============================================================================

/// Parser statistics
#[derive(Debug, Clone, Default)]
pub struct ParserStats {
    pub messages_parsed: u64,
    pub parse_errors: u64,
    pub validation_failures: u64,
    pub duplicate_messages: u64,
    pub trade_count: u64,
    pub depth_count: u64,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
    #[error("Duplicate: {0}")]
    DuplicateMessage(String),
    #[error("Not a data message")]
    NotData,
}

/// Stateful message parser with symbol validation, duplicate detection,
/// and statistics
pub struct MessageParser {
    pub symbol: String,
    pub stats: ParserStats,
    last_trade_id: Option<i64>,
}

impl MessageParser {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            stats: ParserStats::default(),
            last_trade_id: None,
        }
    }

    /// Parse any feed message (auto-detects type).
    /// Subscription acknowledgements yield `ParseError::NotData`.
    pub fn parse(&mut self, raw_json: &str) -> Result<ParsedMessage, ParseError> {
        let value: serde_json::Value = serde_json::from_str(raw_json).map_err(|e| {
            self.stats.parse_errors += 1;
            ParseError::InvalidJson(e.to_string())
        })?;

        // Unwrap combined-stream envelope: {"stream": "...", "data": {...}}
        let data = value.get("data").unwrap_or(&value);

        // Subscription confirmations look like {"result":null,"id":1}
        if data.get("e").is_none() {
            return Err(ParseError::NotData);
        }

        let event_type = data
            .get("e")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ParseError::InvalidJson("Missing event type 'e'".into()))?;

        if let Some(sym) = data.get("s").and_then(|v| v.as_str()) {
            if sym.to_uppercase() != self.symbol {
                self.stats.validation_failures += 1;
                return Err(ParseError::ValidationFailed(format!(
                    "Symbol mismatch: expected {}, got {}",
                    self.symbol, sym
                )));
            }
        }

        match event_type {
            "aggTrade" => self.parse_trade(data),
            "depthUpdate" => self.parse_depth_update(data),
            _ => {
                self.stats.parse_errors += 1;
                Err(ParseError::UnknownEventType(event_type.to_string()))
            }
        }
    }

    fn parse_trade(&mut self, data: &serde_json::Value) -> Result<ParsedMessage, ParseError> {
        let raw: RawAggTrade = serde_json::from_value(data.clone()).map_err(|e| {
            self.stats.parse_errors += 1;
            ParseError::InvalidJson(e.to_string())
        })?;

        let price = parse_f64_field(&raw.price, "price")?;
        let quantity = parse_f64_field(&raw.quantity, "quantity")?;

        debug_assert!(quantity >= 0.0, "negative trade quantity from feed");
        if quantity < 0.0 {
            self.stats.validation_failures += 1;
            warn!(quantity = quantity, "Negative trade quantity dropped");
            return Err(ParseError::ValidationFailed("negative quantity".into()));
        }

        if self.last_trade_id == Some(raw.agg_trade_id) {
            self.stats.duplicate_messages += 1;
            return Err(ParseError::DuplicateMessage(format!(
                "Duplicate trade ID: {}",
                raw.agg_trade_id
            )));
        }
        self.last_trade_id = Some(raw.agg_trade_id);

        self.stats.messages_parsed += 1;
        self.stats.trade_count += 1;

        Ok(ParsedMessage::Trade(ParsedTrade {
            symbol: raw.symbol,
            trade_id: raw.agg_trade_id,
            price,
            quantity: quantity.max(0.0),
            timestamp: raw.timestamp,
            is_buyer_maker: raw.is_buyer_maker,
            event_time: raw.event_time,
        }))
    }

    fn parse_depth_update(&mut self, data: &serde_json::Value) -> Result<ParsedMessage, ParseError> {
        let raw: RawDepthUpdate = serde_json::from_value(data.clone()).map_err(|e| {
            self.stats.parse_errors += 1;
            ParseError::InvalidJson(e.to_string())
        })?;

        let bids: Result<Vec<PriceLevel>, ParseError> =
            raw.bids.iter().map(parse_level).collect();
        let asks: Result<Vec<PriceLevel>, ParseError> =
            raw.asks.iter().map(parse_level).collect();

        // A malformed level fails the whole update; count it only once
        // every level has materialized
        let (bids, asks) = match (bids, asks) {
            (Ok(bids), Ok(asks)) => (bids, asks),
            (Err(e), _) | (_, Err(e)) => {
                self.stats.parse_errors += 1;
                return Err(e);
            }
        };

        self.stats.messages_parsed += 1;
        self.stats.depth_count += 1;

        Ok(ParsedMessage::DepthUpdate(ParsedDepthUpdate {
            symbol: raw.symbol,
            event_time: raw.event_time,
            bids,
            asks,
        }))
    }

    pub fn reset_stats(&mut self) {
        self.stats = ParserStats::default();
    }
}
