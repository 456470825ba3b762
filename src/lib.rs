//! Tickflow - Reconnecting market-data stream aggregation
//!
//! Owns one logical feed per (symbol, channel-set) identifier and keeps it
//! alive: connect, stream, reconnect with capped exponential backoff, give
//! up observably once the retry budget is spent. Raw ticks are folded
//! through a pluggable reducer into a bounded rolling series with an exact
//! cumulative scalar, published to subscribers as snapshots.
//!
//! The library includes:
//! - Feed identity and lifecycle configuration
//! - A transport seam with a tokio-tungstenite WebSocket implementation
//! - The tick aggregator and rolling series
//! - The per-feed lifecycle controller and the feed registry
//! - Reducers for CVD, order-book imbalance, and liquidation severity

pub mod aggregator;
pub mod backoff;
pub mod connection;
pub mod controller;
pub mod error;
pub mod feed;
pub mod reducer;
pub mod registry;

// Re-export commonly used types for convenience
pub use aggregator::{RollingSeries, SeriesSnapshot, TickAggregator};
pub use backoff::ExponentialBackoff;
pub use connection::{Connection, RawTick, TickStream, TimeoutStream, Transport, WsTransport};
pub use controller::{DisconnectReason, FeedController, FeedSnapshot, FeedStatus};
pub use error::FeedError;
pub use feed::{FeedConfig, FeedId};
pub use reducer::{
    CascadeConfig, CvdPoint, CvdReducer, ImbalancePoint, ImbalanceReducer, LiquidationPoint,
    LiquidationReducer, Side, TickReducer,
};
pub use registry::FeedRegistry;
