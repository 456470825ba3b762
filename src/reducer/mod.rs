//! Pluggable per-tick reducers.
//!
//! Each use site of the feed machinery (CVD, order-book imbalance,
//! liquidation severity) supplies a reducer instead of re-deriving the
//! connect/reconnect state machine per feature.

use crate::connection::RawTick;
use serde::de::DeserializeOwned;
use serde::Deserialize;

pub mod cvd;
pub mod imbalance;
pub mod liquidation;

pub use cvd::{CvdPoint, CvdReducer};
pub use imbalance::{ImbalancePoint, ImbalanceReducer};
pub use liquidation::{CascadeConfig, LiquidationPoint, LiquidationReducer, Side};

/// Pure fold of one raw tick and the prior series point into the next point.
///
/// Returning `None` means the payload cannot be interpreted by this reducer
/// (malformed, or a different channel multiplexed into the same feed); the
/// aggregator leaves all state unchanged in that case. The `f64` in the
/// `Some` arm is the tick's exact contribution to the cumulative scalar.
pub trait TickReducer: Send + 'static {
    type Point: Clone + Send + Sync + 'static;

    fn reduce(&mut self, last: Option<&Self::Point>, tick: &RawTick) -> Option<(Self::Point, f64)>;

    /// Clear any internal accumulator state. Called on feed change.
    fn reset(&mut self) {}
}

/// Combined-stream envelope (`{"stream":"btcusdt@aggTrade","data":{...}}`).
#[derive(Debug, Deserialize)]
struct StreamEnvelope<T> {
    #[allow(dead_code)]
    stream: String,
    data: T,
}

/// Parse a payload that may arrive either wrapped in the combined-stream
/// envelope or bare (single-stream endpoints).
pub(crate) fn parse_payload<T: DeserializeOwned>(payload: &str) -> Option<T> {
    if let Ok(envelope) = serde_json::from_str::<StreamEnvelope<T>>(payload) {
        return Some(envelope.data);
    }
    serde_json::from_str::<T>(payload).ok()
}
