// Core Module - Foundational types, config, logging, snapshot publishing

pub mod config;
pub mod events;
pub mod logger;
pub mod types;

// Re-export commonly used items for convenience
pub use config::{
    ConfigError, ConfigManager, EngineConfig, FeedConfig, PulseConfig, RegimeThresholds,
    ScorePolicyKind, ThinVolumePolicy, get_config,
};
pub use events::{SnapshotBus, SnapshotBusStats};
pub use logger::setup_logging;
pub use types::*;
