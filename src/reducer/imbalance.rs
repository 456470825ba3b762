//! Top-of-book order-flow imbalance from `bookTicker` updates.

use super::{TickReducer, parse_payload};
use crate::connection::RawTick;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Binance `bookTicker` payload. Prices and quantities arrive as strings.
#[derive(Debug, Deserialize)]
struct BinanceBookTicker {
    #[serde(rename = "b")]
    bid_price: String,
    #[serde(rename = "B")]
    bid_quantity: String,
    #[serde(rename = "a")]
    ask_price: String,
    #[serde(rename = "A")]
    ask_quantity: String,
    /// Event time; present on futures streams, absent on spot.
    #[serde(rename = "E", default)]
    event_time_ms: Option<i64>,
}

/// One order-book imbalance series point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImbalancePoint {
    pub time: DateTime<Utc>,
    pub mid_price: f64,
    pub bid_quantity: f64,
    pub ask_quantity: f64,
    /// 0-100, 50 = balanced; above 50 the book is bid-heavy.
    pub imbalance_pct: f64,
}

/// Derives top-of-book imbalance from a `bookTicker` feed.
///
/// The aggregator's cumulative scalar tracks the running sum of net depth
/// (bid quantity minus ask quantity) across updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImbalanceReducer;

fn parse_decimal(field: &str) -> Option<f64> {
    let value = Decimal::from_str(field).ok()?.to_f64()?;
    value.is_finite().then_some(value)
}

impl TickReducer for ImbalanceReducer {
    type Point = ImbalancePoint;

    fn reduce(&mut self, _last: Option<&ImbalancePoint>, tick: &RawTick) -> Option<(ImbalancePoint, f64)> {
        let book: BinanceBookTicker = parse_payload(&tick.payload)?;

        let bid_price = parse_decimal(&book.bid_price)?;
        let bid_quantity = parse_decimal(&book.bid_quantity)?;
        let ask_price = parse_decimal(&book.ask_price)?;
        let ask_quantity = parse_decimal(&book.ask_quantity)?;

        let depth = bid_quantity + ask_quantity;
        let imbalance_pct = if depth > 0.0 {
            bid_quantity / depth * 100.0
        } else {
            50.0
        };

        let time = book
            .event_time_ms
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or(tick.time_received);

        let point = ImbalancePoint {
            time,
            mid_price: (bid_price + ask_price) / 2.0,
            bid_quantity,
            ask_quantity,
            imbalance_pct,
        };

        Some((point, bid_quantity - ask_quantity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book_tick(bid_qty: &str, ask_qty: &str) -> RawTick {
        RawTick::new(format!(
            r#"{{"u":400900217,"s":"BTCUSDT","b":"100.10","B":"{bid_qty}","a":"100.30","A":"{ask_qty}","E":1700000000000}}"#
        ))
    }

    #[test]
    fn test_balanced_book_is_fifty_percent() {
        let mut reducer = ImbalanceReducer;
        let (point, delta) = reducer.reduce(None, &book_tick("4.0", "4.0")).unwrap();

        assert_eq!(point.imbalance_pct, 50.0);
        assert_eq!(point.mid_price, 100.2);
        assert_eq!(delta, 0.0);
    }

    #[test]
    fn test_bid_heavy_book() {
        let mut reducer = ImbalanceReducer;
        let (point, delta) = reducer.reduce(None, &book_tick("3.0", "1.0")).unwrap();

        assert_eq!(point.imbalance_pct, 75.0);
        assert_eq!(delta, 2.0);
        assert_eq!(point.time.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_empty_book_is_neutral() {
        let mut reducer = ImbalanceReducer;
        let (point, delta) = reducer.reduce(None, &book_tick("0", "0")).unwrap();

        assert_eq!(point.imbalance_pct, 50.0);
        assert_eq!(delta, 0.0);
    }

    #[test]
    fn test_trade_payload_is_rejected() {
        let mut reducer = ImbalanceReducer;
        let trade = RawTick::new(r#"{"e":"aggTrade","p":"100.0","q":"1.0","m":false}"#);
        assert!(reducer.reduce(None, &trade).is_none());
    }
}
