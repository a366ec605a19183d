//! Bar: the canonical market data unit every source is normalized into.

use serde::{Deserialize, Serialize};

/// OHLCV bar keyed by its open time in UTC epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Bar {
    pub fn new(time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// Ordered, duplicate-free bar times. Input must already be ascending.
pub fn distinct_times(bars: &[Bar]) -> Vec<i64> {
    let mut times: Vec<i64> = bars.iter().map(|b| b.time).collect();
    times.dedup();
    times
}
