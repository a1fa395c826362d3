// Configuration Management for Market Pulse
// All construction-time policy choices (score policy, regime thresholds,
// thin-volume handling, window sizes) live here

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::info;

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

// ============================================================================
// Policy Enums
// ============================================================================

/// How elasticity behaves when the micro-window volume is below the floor.
/// The two source variants disagreed; both are supported, selected here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThinVolumePolicy {
    /// Leave the metric at its previous value
    #[default]
    Hold,
    /// Reset the metric to zero
    ResetToZero,
}

/// Which verdict scoring policy the engine is constructed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScorePolicyKind {
    #[default]
    StarCount,
    TrapBreak,
}

// ============================================================================
// Configuration Structures
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeThresholds {
    /// Volatility below this is Stagnant
    pub low: f64,
    /// Volatility above this is Volatile; between the two is Stable
    pub high: f64,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self { low: 0.10, high: 0.35 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub ws_base_url: String,
    /// Book depth levels requested from the stream
    pub depth_levels: u32,
    /// Book delta refresh cadence in milliseconds
    pub depth_interval_ms: u32,

    // Connection settings
    pub max_reconnect_attempts: u32,
    pub ping_interval_secs: u64,
    pub health_check_interval_secs: u64,
    pub stale_timeout_secs: u64,
    pub connection_wait_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_base_url: "wss://fstream.binance.com/ws".to_string(),
            depth_levels: 20,
            depth_interval_ms: 100,
            max_reconnect_attempts: 10,
            ping_interval_secs: 20,
            health_check_interval_secs: 30,
            stale_timeout_secs: 60,
            connection_wait_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Rolling trade buffer capacity (FIFO eviction past this)
    pub trade_buffer_capacity: usize,
    /// Trailing net-flow window in seconds
    pub flow_window_secs: f64,
    /// Number of most-recent trades in the elasticity micro window
    pub micro_window_trades: usize,
    /// Minimum summed micro-window volume for elasticity to recompute
    pub min_micro_volume: f64,
    pub thin_volume: ThinVolumePolicy,

    /// Bounded imbalance history capacity
    pub imbalance_history_capacity: usize,
    /// Regime stays Calculating until history exceeds this many samples
    pub min_regime_samples: usize,
    pub regime_thresholds: RegimeThresholds,

    pub score_policy: ScorePolicyKind,
    /// |kinetic| above this activates the net-flow factor
    pub kinetic_threshold: f64,
    /// |pressure| above this activates the book-pressure factor
    pub pressure_threshold: f64,
    /// |elasticity| above this activates the micro-burst factor
    pub elasticity_threshold: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trade_buffer_capacity: 1000,
            flow_window_secs: 3.0,
            micro_window_trades: 20,
            min_micro_volume: 0.01,
            thin_volume: ThinVolumePolicy::default(),
            imbalance_history_capacity: 120,
            min_regime_samples: 10,
            regime_thresholds: RegimeThresholds::default(),
            score_policy: ScorePolicyKind::default(),
            kinetic_threshold: 50.0,
            pressure_threshold: 0.3,
            elasticity_threshold: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseConfig {
    pub symbol: String,
    pub feed: FeedConfig,
    pub engine: EngineConfig,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            feed: FeedConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl PulseConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.is_empty() {
            return Err(ConfigError::Validation("symbol must not be empty".into()));
        }
        let e = &self.engine;
        if e.trade_buffer_capacity == 0 {
            return Err(ConfigError::Validation(
                "trade_buffer_capacity must be positive".into(),
            ));
        }
        if e.micro_window_trades == 0 || e.micro_window_trades > e.trade_buffer_capacity {
            return Err(ConfigError::Validation(
                "micro_window_trades must be in 1..=trade_buffer_capacity".into(),
            ));
        }
        if e.flow_window_secs <= 0.0 {
            return Err(ConfigError::Validation(
                "flow_window_secs must be positive".into(),
            ));
        }
        if e.imbalance_history_capacity <= e.min_regime_samples {
            return Err(ConfigError::Validation(
                "imbalance_history_capacity must exceed min_regime_samples".into(),
            ));
        }
        let t = &e.regime_thresholds;
        if !(0.0 <= t.low && t.low < t.high) {
            return Err(ConfigError::Validation(
                "regime thresholds must satisfy 0 <= low < high".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Config Manager
// ============================================================================

pub struct ConfigManager {
    config: PulseConfig,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            config: PulseConfig::default(),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path.as_ref())?;
        let config: PulseConfig = serde_json::from_str(&raw)?;
        config.validate()?;

        info!(path = %path.as_ref().display(), symbol = %config.symbol, "Configuration loaded");

        Ok(Self { config })
    }

    pub fn config(&self) -> &PulseConfig {
        &self.config
    }

    pub fn set(&mut self, config: PulseConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_CONFIG: OnceLock<Arc<RwLock<ConfigManager>>> = OnceLock::new();

/// Get global config manager (singleton, defaults on first access)
pub fn get_config() -> Arc<RwLock<ConfigManager>> {
    Arc::clone(GLOBAL_CONFIG.get_or_init(|| Arc::new(RwLock::new(ConfigManager::new()))))
}
