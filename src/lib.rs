// Market Pulse - Streaming Microstructure Verdict Engine
// Layer 1: transport, Layer 2: parsing + book state, Layer 3: analytics + pipeline

pub mod core;
pub mod layer1;
pub mod layer2;
pub mod layer3;

pub use crate::core::types::{EngineState, Regime, Signal, TitanRow, Trade};
pub use crate::layer3::engine::PulseEngine;
pub use crate::layer3::pipeline::FeedPipeline;
