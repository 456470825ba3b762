//! Rolling in-memory aggregation of raw ticks.
//!
//! A [`TickAggregator`] folds an unbounded tick stream into a bounded
//! [`RollingSeries`] through a caller-supplied [`TickReducer`], maintaining
//! an exact cumulative scalar alongside the window.

use crate::{connection::RawTick, reducer::TickReducer};
use serde::Serialize;
use std::collections::VecDeque;

/// Fixed-capacity, insertion-ordered sequence with FIFO eviction.
///
/// `len() <= capacity` holds after any number of insertions; once capacity
/// is reached the oldest element is evicted on every push.
#[derive(Debug, Clone)]
pub struct RollingSeries<T> {
    points: VecDeque<T>,
    capacity: usize,
}

impl<T> RollingSeries<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, point: T) {
        if self.points.len() >= self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&T> {
        self.points.back()
    }

    pub fn oldest(&self) -> Option<&T> {
        self.points.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.points.iter()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

impl<T: Clone> RollingSeries<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.points.iter().cloned().collect()
    }
}

/// Immutable copy of the aggregator's state handed to consumers.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesSnapshot<P> {
    /// Oldest-to-newest window contents.
    pub points: Vec<P>,
    /// Exact running sum of reducer deltas since the last reset.
    pub cumulative: f64,
}

/// Folds raw ticks into a bounded rolling series.
///
/// The cumulative scalar is a maintained running sum, never recomputed from
/// the window, so it is unaffected by FIFO eviction and resets only on an
/// explicit [`reset`](TickAggregator::reset) (i.e. a feed change).
#[derive(Debug, Clone)]
pub struct TickAggregator<R: TickReducer> {
    reducer: R,
    series: RollingSeries<R::Point>,
    cumulative: f64,
    ticks_seen: u64,
    ticks_dropped: u64,
}

impl<R: TickReducer> TickAggregator<R> {
    pub fn new(reducer: R, capacity: usize) -> Self {
        Self {
            reducer,
            series: RollingSeries::new(capacity),
            cumulative: 0.0,
            ticks_seen: 0,
            ticks_dropped: 0,
        }
    }

    /// Apply the reducer to one tick. Synchronous, no I/O.
    ///
    /// Returns false when the reducer could not interpret the payload, in
    /// which case all state is left unchanged (one bad message never kills
    /// the stream).
    pub fn ingest(&mut self, tick: &RawTick) -> bool {
        self.ticks_seen += 1;
        match self.reducer.reduce(self.series.latest(), tick) {
            Some((point, delta)) => {
                self.cumulative += delta;
                self.series.push(point);
                true
            }
            None => {
                self.ticks_dropped += 1;
                false
            }
        }
    }

    /// Clear all accumulated state. Used on feed change.
    pub fn reset(&mut self) {
        self.series.clear();
        self.cumulative = 0.0;
        self.ticks_seen = 0;
        self.ticks_dropped = 0;
        self.reducer.reset();
    }

    /// Owned copy of the current window plus the cumulative scalar. Never
    /// exposes the internal storage.
    pub fn snapshot(&self) -> SeriesSnapshot<R::Point> {
        SeriesSnapshot {
            points: self.series.to_vec(),
            cumulative: self.cumulative,
        }
    }

    pub fn cumulative(&self) -> f64 {
        self.cumulative
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn ticks_seen(&self) -> u64 {
        self.ticks_seen
    }

    pub fn ticks_dropped(&self) -> u64 {
        self.ticks_dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test reducer: payload is a float string, the point is the parsed
    /// value, and the delta equals the value.
    #[derive(Debug, Default, Clone)]
    struct ParseF64;

    impl TickReducer for ParseF64 {
        type Point = f64;

        fn reduce(&mut self, _last: Option<&f64>, tick: &RawTick) -> Option<(f64, f64)> {
            let value: f64 = tick.payload.trim().parse().ok()?;
            Some((value, value))
        }
    }

    fn tick(payload: &str) -> RawTick {
        RawTick::new(payload)
    }

    #[test]
    fn test_rolling_series_fifo_eviction() {
        let mut series = RollingSeries::new(3);

        for value in 1..=5 {
            series.push(value);
            assert!(series.len() <= 3);
        }

        assert_eq!(series.to_vec(), vec![3, 4, 5]);
        assert_eq!(series.oldest(), Some(&3));
        assert_eq!(series.latest(), Some(&5));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let series: RollingSeries<u8> = RollingSeries::new(0);
        assert_eq!(series.capacity(), 1);
    }

    #[test]
    fn test_cumulative_is_exact_running_sum() {
        let mut aggregator = TickAggregator::new(ParseF64, 3);

        // More ticks than capacity: eviction must not disturb the total.
        for payload in ["1.5", "2.5", "3.0", "4.0", "5.0"] {
            assert!(aggregator.ingest(&tick(payload)));
        }

        assert_eq!(aggregator.len(), 3);
        assert_eq!(aggregator.cumulative(), 16.0);
        assert_eq!(aggregator.snapshot().points, vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_malformed_tick_leaves_state_unchanged() {
        let mut aggregator = TickAggregator::new(ParseF64, 10);

        assert!(aggregator.ingest(&tick("10.0")));
        let baseline = aggregator.cumulative();

        assert!(!aggregator.ingest(&tick("not-a-number")));
        assert_eq!(aggregator.cumulative(), baseline);
        assert_eq!(aggregator.len(), 1);
        assert_eq!(aggregator.ticks_dropped(), 1);

        // Next valid tick continues from the unchanged baseline.
        assert!(aggregator.ingest(&tick("2.0")));
        assert_eq!(aggregator.cumulative(), 12.0);
    }

    #[test]
    fn test_reset_reproduces_fresh_aggregator() {
        let payloads = ["1.0", "junk", "2.0", "3.0"];

        let mut fresh = TickAggregator::new(ParseF64, 2);
        for payload in payloads {
            fresh.ingest(&tick(payload));
        }

        let mut reused = TickAggregator::new(ParseF64, 2);
        reused.ingest(&tick("99.0"));
        reused.reset();
        assert_eq!(reused.cumulative(), 0.0);
        assert!(reused.is_empty());
        for payload in payloads {
            reused.ingest(&tick(payload));
        }

        assert_eq!(reused.snapshot().points, fresh.snapshot().points);
        assert_eq!(reused.cumulative(), fresh.cumulative());
        assert_eq!(reused.ticks_seen(), fresh.ticks_seen());
        assert_eq!(reused.ticks_dropped(), fresh.ticks_dropped());
    }
}
