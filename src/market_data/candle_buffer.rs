// =============================================================================
// Candle Buffer — bounded OHLCV history per (symbol, interval)
// =============================================================================
//
// Written by the kline stream tasks and the startup backfill, read by the
// trend loop and the volatility catch-up. Closed candles are append-only in
// open-time order; the live candle sits at the back until it closes.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub is_closed: bool,
}

impl Candle {
    /// A finished candle, as returned by the REST klines endpoint.
    pub fn new(
        open_time: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        close_time: i64,
    ) -> Self {
        Self {
            open_time,
            close_time,
            open,
            high,
            low,
            close,
            volume,
            is_closed: true,
        }
    }

    /// Absolute body size |close - open|.
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn upper_wick(&self) -> f64 {
        (self.high - self.open.max(self.close)).max(0.0)
    }

    pub fn lower_wick(&self) -> f64 {
        (self.open.min(self.close) - self.low).max(0.0)
    }
}

/// Composite key that identifies a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandleKey {
    pub symbol: String,
    pub interval: String,
}

impl CandleKey {
    pub fn new(symbol: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            interval: interval.into(),
        }
    }
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

// ---------------------------------------------------------------------------
// CandleBuffer
// ---------------------------------------------------------------------------

/// Thread-safe ring buffer holding the most recent candles per
/// `(symbol, interval)`. The live candle is replaced in place until it
/// closes; closed candles are permanent and trimmed to `max_candles`.
pub struct CandleBuffer {
    buffers: RwLock<HashMap<CandleKey, VecDeque<Candle>>>,
    max_candles: usize,
}

impl CandleBuffer {
    pub fn new(max_candles: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            max_candles,
        }
    }

    /// Insert or replace the latest candle for the given key.
    pub fn update(&self, key: CandleKey, candle: Candle) {
        let mut map = self.buffers.write();
        let ring = map
            .entry(key)
            .or_insert_with(|| VecDeque::with_capacity(self.max_candles + 1));

        // Same open time replaces (in-progress update or backfill overlap);
        // anything older than the newest candle is stale. A live candle that
        // never saw its closing event is dropped once a newer one arrives.
        if let Some(last) = ring.back() {
            if candle.open_time < last.open_time {
                return;
            }
            if last.open_time == candle.open_time || !last.is_closed {
                ring.pop_back();
            }
        }

        let closed = candle.is_closed;
        ring.push_back(candle);

        if closed {
            while ring.len() > self.max_candles {
                ring.pop_front();
            }
        }
    }

    /// The most recent `count` closed candles, oldest first.
    pub fn get_closed(&self, key: &CandleKey, count: usize) -> Vec<Candle> {
        let map = self.buffers.read();
        let Some(ring) = map.get(key) else {
            return Vec::new();
        };
        let mut out: Vec<Candle> = ring
            .iter()
            .rev()
            .filter(|c| c.is_closed)
            .take(count)
            .cloned()
            .collect();
        out.reverse();
        out
    }

    /// Close prices of the most recent `count` closed candles, oldest first.
    pub fn get_closes(&self, key: &CandleKey, count: usize) -> Vec<f64> {
        self.get_closed(key, count).iter().map(|c| c.close).collect()
    }

    /// Closed candles whose open time is strictly after `open_time`.
    pub fn get_closed_after(&self, key: &CandleKey, open_time: i64) -> Vec<Candle> {
        let map = self.buffers.read();
        map.get(key)
            .map(|ring| {
                ring.iter()
                    .filter(|c| c.is_closed && c.open_time > open_time)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total number of candles (including any in-progress one) for a key.
    pub fn count(&self, key: &CandleKey) -> usize {
        let map = self.buffers.read();
        map.get(key).map_or(0, VecDeque::len)
    }

    /// Forget every series of `symbol`, whatever the interval.
    pub fn remove_symbol(&self, symbol: &str) {
        self.buffers.write().retain(|key, _| key.symbol != symbol);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
