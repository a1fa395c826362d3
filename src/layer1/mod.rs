// Layer 1 - Feed transport

pub mod websocket;

pub use websocket::{FeedClient, FeedError, FeedStats};
