// Layer 3 - Analytics and verdict

pub mod engine;
pub mod flow_window;
pub mod pipeline;
pub mod regime;
pub mod verdict;

pub use engine::PulseEngine;
pub use flow_window::FlowWindow;
pub use pipeline::{FeedPipeline, PipelineStats};
pub use regime::RegimeClassifier;
pub use verdict::{make_policy, MetricInputs, ScorePolicy, StarCountPolicy, TrapBreakPolicy, Verdict};
