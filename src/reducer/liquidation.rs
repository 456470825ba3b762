//! Liquidation severity and cascade flagging from `forceOrder` events.

use super::{TickReducer, parse_payload};
use crate::connection::RawTick;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, time::Duration};

/// Side of the forced order as reported by the exchange: `Sell` flushes
/// longs, `Buy` flushes shorts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Binance `forceOrder` payload: the order details sit under `o`.
#[derive(Debug, Deserialize)]
struct BinanceForceOrder {
    #[serde(rename = "o")]
    order: ForceOrderDetail,
}

#[derive(Debug, Deserialize)]
struct ForceOrderDetail {
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "ap", default)]
    avg_price: Option<String>,
    #[serde(rename = "T", default)]
    time_ms: Option<i64>,
}

/// Cascade heuristic thresholds.
///
/// These are tunable parameters, not a validated model: a "cascade" is
/// simply `min_events` liquidations inside the rolling `window` whose
/// prices sit within `band_pct` percent of the current event's price.
#[derive(Debug, Clone, Copy)]
pub struct CascadeConfig {
    pub window: Duration,
    pub band_pct: f64,
    pub min_events: usize,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            band_pct: 1.0,
            min_events: 5,
        }
    }
}

impl CascadeConfig {
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_band_pct(mut self, band_pct: f64) -> Self {
        self.band_pct = band_pct;
        self
    }

    pub fn with_min_events(mut self, min_events: usize) -> Self {
        self.min_events = min_events;
        self
    }
}

/// One liquidation series point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LiquidationPoint {
    pub time: DateTime<Utc>,
    pub side: Side,
    pub price: f64,
    /// USD notional of this liquidation.
    pub notional: f64,
    /// True when this event completed a cascade per [`CascadeConfig`].
    pub cascade: bool,
}

/// Derives liquidation severity from a `forceOrder` feed.
///
/// The aggregator's cumulative scalar tracks total liquidated notional.
/// Events are timestamped with exchange time so cascade detection is
/// independent of arrival jitter.
#[derive(Debug, Clone, Default)]
pub struct LiquidationReducer {
    config: CascadeConfig,
    recent: VecDeque<(DateTime<Utc>, f64)>,
}

impl LiquidationReducer {
    pub fn new(config: CascadeConfig) -> Self {
        Self {
            config,
            recent: VecDeque::new(),
        }
    }

    fn detect_cascade(&mut self, time: DateTime<Utc>, price: f64) -> bool {
        self.recent.push_back((time, price));

        let window =
            ChronoDuration::milliseconds(self.config.window.as_millis().min(i64::MAX as u128) as i64);
        let cutoff = time - window;
        while self
            .recent
            .front()
            .is_some_and(|(event_time, _)| *event_time < cutoff)
        {
            self.recent.pop_front();
        }

        let band = price.abs() * self.config.band_pct / 100.0;
        let in_band = self
            .recent
            .iter()
            .filter(|(_, event_price)| (event_price - price).abs() <= band)
            .count();

        in_band >= self.config.min_events
    }
}

impl TickReducer for LiquidationReducer {
    type Point = LiquidationPoint;

    fn reduce(&mut self, _last: Option<&LiquidationPoint>, tick: &RawTick) -> Option<(LiquidationPoint, f64)> {
        let event: BinanceForceOrder = parse_payload(&tick.payload)?;
        let order = event.order;

        let side = match order.side.as_str() {
            "BUY" => Side::Buy,
            "SELL" => Side::Sell,
            _ => return None,
        };

        // Prefer the average fill price when present and parseable.
        let price: f64 = order
            .avg_price
            .as_deref()
            .and_then(|field| field.parse().ok())
            .filter(|value: &f64| value.is_finite() && *value > 0.0)
            .or_else(|| order.price.parse().ok())?;
        let quantity: f64 = order.quantity.parse().ok()?;
        if !(price.is_finite() && quantity.is_finite()) {
            return None;
        }

        let time = order
            .time_ms
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or(tick.time_received);

        let notional = price * quantity;
        let cascade = self.detect_cascade(time, price);

        let point = LiquidationPoint {
            time,
            side,
            price,
            notional,
            cascade,
        };

        Some((point, notional))
    }

    fn reset(&mut self) {
        self.recent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn force_order(side: &str, price: &str, quantity: &str, time_ms: i64) -> RawTick {
        RawTick::new(format!(
            r#"{{"e":"forceOrder","o":{{"s":"BTCUSDT","S":"{side}","p":"{price}","ap":"{price}","q":"{quantity}","X":"FILLED","T":{time_ms}}}}}"#
        ))
    }

    #[test]
    fn test_notional_and_side() {
        let mut reducer = LiquidationReducer::default();
        let (point, delta) = reducer
            .reduce(None, &force_order("SELL", "10000", "0.5", 1_700_000_000_000))
            .unwrap();

        assert_eq!(point.side, Side::Sell);
        assert_eq!(point.notional, 5000.0);
        assert_eq!(delta, 5000.0);
        assert!(!point.cascade);
    }

    #[test]
    fn test_cascade_triggers_within_window_and_band() {
        let config = CascadeConfig::default().with_min_events(3);
        let mut reducer = LiquidationReducer::new(config);
        let base_ms = 1_700_000_000_000;

        // Three liquidations within 60s, prices within 1% of each other.
        let first = reducer
            .reduce(None, &force_order("SELL", "10000", "1", base_ms))
            .unwrap();
        assert!(!first.0.cascade);

        let second = reducer
            .reduce(None, &force_order("SELL", "10050", "1", base_ms + 10_000))
            .unwrap();
        assert!(!second.0.cascade);

        let third = reducer
            .reduce(None, &force_order("SELL", "10020", "1", base_ms + 20_000))
            .unwrap();
        assert!(third.0.cascade);
    }

    #[test]
    fn test_events_outside_price_band_do_not_count() {
        let config = CascadeConfig::default().with_min_events(3);
        let mut reducer = LiquidationReducer::new(config);
        let base_ms = 1_700_000_000_000;

        reducer
            .reduce(None, &force_order("SELL", "10000", "1", base_ms))
            .unwrap();
        // More than 1% away from the final event's price.
        reducer
            .reduce(None, &force_order("SELL", "11000", "1", base_ms + 5_000))
            .unwrap();
        let (point, _) = reducer
            .reduce(None, &force_order("SELL", "10010", "1", base_ms + 10_000))
            .unwrap();

        assert!(!point.cascade);
    }

    #[test]
    fn test_old_events_fall_out_of_the_window() {
        let config = CascadeConfig::default().with_min_events(3);
        let mut reducer = LiquidationReducer::new(config);
        let base_ms = 1_700_000_000_000;

        reducer
            .reduce(None, &force_order("SELL", "10000", "1", base_ms))
            .unwrap();
        reducer
            .reduce(None, &force_order("SELL", "10010", "1", base_ms + 5_000))
            .unwrap();
        // Third event arrives 90s later: the first two are stale.
        let (point, _) = reducer
            .reduce(None, &force_order("SELL", "10020", "1", base_ms + 95_000))
            .unwrap();

        assert!(!point.cascade);
    }

    #[test]
    fn test_reset_clears_cascade_history() {
        let config = CascadeConfig::default().with_min_events(2);
        let mut reducer = LiquidationReducer::new(config);
        let base_ms = 1_700_000_000_000;

        reducer
            .reduce(None, &force_order("SELL", "10000", "1", base_ms))
            .unwrap();
        reducer.reset();

        let (point, _) = reducer
            .reduce(None, &force_order("SELL", "10001", "1", base_ms + 1_000))
            .unwrap();
        assert!(!point.cascade);
    }

    #[test]
    fn test_malformed_payloads_are_rejected() {
        let mut reducer = LiquidationReducer::default();

        assert!(reducer.reduce(None, &RawTick::new("not json")).is_none());
        // Unknown side.
        assert!(
            reducer
                .reduce(
                    None,
                    &RawTick::new(r#"{"o":{"S":"HOLD","p":"1","q":"1"}}"#)
                )
                .is_none()
        );
        // A trade payload from another channel.
        assert!(
            reducer
                .reduce(
                    None,
                    &RawTick::new(r#"{"e":"aggTrade","p":"1","q":"1","m":true}"#)
                )
                .is_none()
        );
    }
}
