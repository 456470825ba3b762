//! Cumulative volume delta from aggregated trade ticks.

use super::{TickReducer, parse_payload};
use crate::connection::RawTick;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Binance `aggTrade` / `trade` payload. Numeric fields arrive as strings.
#[derive(Debug, Deserialize)]
struct BinanceAggTrade {
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    /// True when the buyer is the maker, i.e. a sell-side market order hit
    /// the bid.
    #[serde(rename = "m")]
    buyer_is_maker: bool,
    #[serde(rename = "T", default)]
    time_ms: Option<i64>,
}

/// One CVD series point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CvdPoint {
    pub time: DateTime<Utc>,
    pub price: f64,
    /// Signed quote volume of this trade (positive = aggressive buy).
    pub delta_quote: f64,
    /// Running cumulative volume delta in quote units at this point.
    pub cvd_quote: f64,
}

/// Derives cumulative volume delta from a trade feed.
///
/// The aggregator's cumulative scalar tracks CVD in quote units; each point
/// additionally carries the running total for chart consumers.
#[derive(Debug, Clone, Copy, Default)]
pub struct CvdReducer;

impl TickReducer for CvdReducer {
    type Point = CvdPoint;

    fn reduce(&mut self, last: Option<&CvdPoint>, tick: &RawTick) -> Option<(CvdPoint, f64)> {
        let trade: BinanceAggTrade = parse_payload(&tick.payload)?;
        let price: f64 = trade.price.parse().ok()?;
        let quantity: f64 = trade.quantity.parse().ok()?;
        if !(price.is_finite() && quantity.is_finite()) {
            return None;
        }

        let quote = price * quantity;
        let delta_quote = if trade.buyer_is_maker { -quote } else { quote };

        let time = trade
            .time_ms
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or(tick.time_received);

        let point = CvdPoint {
            time,
            price,
            delta_quote,
            cvd_quote: last.map(|point| point.cvd_quote).unwrap_or(0.0) + delta_quote,
        };

        Some((point, delta_quote))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(payload: &str) -> RawTick {
        RawTick::new(payload)
    }

    fn aggressive_buy(price: &str, quantity: &str) -> String {
        format!(
            r#"{{"e":"aggTrade","s":"BTCUSDT","p":"{price}","q":"{quantity}","m":false,"T":1700000000000}}"#
        )
    }

    fn aggressive_sell(price: &str, quantity: &str) -> String {
        format!(
            r#"{{"e":"aggTrade","s":"BTCUSDT","p":"{price}","q":"{quantity}","m":true,"T":1700000000000}}"#
        )
    }

    #[test]
    fn test_maker_flag_signs_the_delta() {
        let mut reducer = CvdReducer;

        let (buy, buy_delta) = reducer
            .reduce(None, &tick(&aggressive_buy("100.0", "2.0")))
            .unwrap();
        assert_eq!(buy_delta, 200.0);
        assert_eq!(buy.cvd_quote, 200.0);

        let (sell, sell_delta) = reducer
            .reduce(Some(&buy), &tick(&aggressive_sell("100.0", "0.5")))
            .unwrap();
        assert_eq!(sell_delta, -50.0);
        assert_eq!(sell.cvd_quote, 150.0);
        assert_eq!(sell.price, 100.0);
    }

    #[test]
    fn test_enveloped_payload() {
        let mut reducer = CvdReducer;
        let payload = format!(
            r#"{{"stream":"btcusdt@aggTrade","data":{}}}"#,
            aggressive_buy("50.0", "1.0")
        );

        let (point, delta) = reducer.reduce(None, &tick(&payload)).unwrap();
        assert_eq!(delta, 50.0);
        assert_eq!(point.time.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_malformed_payloads_are_rejected() {
        let mut reducer = CvdReducer;

        // Missing price field.
        assert!(
            reducer
                .reduce(None, &tick(r#"{"q":"1.0","m":false}"#))
                .is_none()
        );
        // Unparseable price.
        assert!(
            reducer
                .reduce(None, &tick(r#"{"p":"?","q":"1.0","m":false}"#))
                .is_none()
        );
        // A different channel multiplexed into the same feed.
        assert!(
            reducer
                .reduce(
                    None,
                    &tick(r#"{"u":1,"s":"BTCUSDT","b":"1","B":"2","a":"3","A":"4"}"#)
                )
                .is_none()
        );
        assert!(reducer.reduce(None, &tick("not json")).is_none());
    }
}
