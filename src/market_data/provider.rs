// =============================================================================
// Market Data Provider — the seam to the exchange
// =============================================================================
//
// Every method may legitimately come back empty. Callers treat `Ok(None)`,
// an empty vector and `Err(_)` alike as "no data right now" and retry at
// their own cadence.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::market_data::Candle;

/// One price level of the order book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub quantity: f64,
}

impl BookLevel {
    pub fn new(price: f64, quantity: f64) -> Self {
        Self { price, quantity }
    }
}

/// Top-of-book snapshot, best levels first on both sides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBookDepth {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBookDepth {
    /// Summed quantity of the first `levels` bids and asks.
    pub fn volumes(&self, levels: usize) -> (f64, f64) {
        let sum = |side: &[BookLevel]| -> f64 {
            side.iter()
                .take(levels)
                .map(|l| l.quantity)
                .filter(|q| q.is_finite() && *q > 0.0)
                .sum()
        };
        (sum(&self.bids), sum(&self.asks))
    }
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Latest traded price.
    async fn get_price(&self, symbol: &str) -> Result<Option<f64>>;

    /// Order book limited to `limit` levels per side.
    async fn get_order_book_depth(&self, symbol: &str, limit: u32) -> Result<Option<OrderBookDepth>>;

    /// Most recent `limit` candles of `interval`, oldest first.
    async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volumes_respect_level_limit() {
        let depth = OrderBookDepth {
            bids: vec![BookLevel::new(99.0, 1.0), BookLevel::new(98.0, 2.0), BookLevel::new(97.0, 4.0)],
            asks: vec![BookLevel::new(101.0, 0.5), BookLevel::new(102.0, f64::NAN)],
        };
        assert_eq!(depth.volumes(2), (3.0, 0.5));
        assert_eq!(depth.volumes(10), (7.0, 0.5));
        assert_eq!(OrderBookDepth::default().volumes(5), (0.0, 0.0));
    }
}
