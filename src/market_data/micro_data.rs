// =============================================================================
// Market Micro Data — order-flow and wick features for the AI prompt
// =============================================================================
//
//   imbalance        = (bidVol - askVol) / (bidVol + askVol) over the top N
//                      book levels, 0 when both sides are empty
//   volatility_score = mean over recent candles of
//                      ((upper wick + lower wick) / open) * 10_000
//
// No price means no snapshot: `fetch_micro_data` returns `None` and the
// caller retries. Missing depth or klines only degrade the features.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::indicators::candle_body::wick_intensity_bps;
use crate::market_data::provider::{MarketDataProvider, OrderBookDepth};
use crate::market_data::Candle;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketMicroData {
    pub symbol: String,
    pub last_price: f64,
    /// Order-book imbalance in [-1, 1]; positive means bid-heavy.
    pub imbalance: f64,
    pub bid_volume: f64,
    pub ask_volume: f64,
    /// Mean wick intensity in basis points of the open (non-negative).
    pub volatility_score: f64,
    /// Most recent candles, oldest first.
    pub klines: Vec<Candle>,
    pub timestamp: i64,
}

/// Settings for one micro-data snapshot.
#[derive(Debug, Clone)]
pub struct MicroDataSettings {
    pub depth_levels: u32,
    pub kline_interval: String,
    pub kline_limit: u32,
}

impl Default for MicroDataSettings {
    fn default() -> Self {
        Self {
            depth_levels: 20,
            kline_interval: "1m".to_string(),
            kline_limit: 30,
        }
    }
}

pub struct MarketMicroDataCalculator {
    provider: Arc<dyn MarketDataProvider>,
    settings: MicroDataSettings,
}

impl MarketMicroDataCalculator {
    pub fn new(provider: Arc<dyn MarketDataProvider>, settings: MicroDataSettings) -> Self {
        Self { provider, settings }
    }

    /// Build a fresh snapshot for `symbol`, or `None` when the provider has
    /// no price for it.
    pub async fn fetch_micro_data(&self, symbol: &str) -> Option<MarketMicroData> {
        let last_price = match self.provider.get_price(symbol).await {
            Ok(Some(p)) if p > 0.0 && p.is_finite() => p,
            Ok(_) => {
                debug!(symbol, "no price available");
                return None;
            }
            Err(e) => {
                warn!(symbol, error = %e, "price fetch failed");
                return None;
            }
        };

        let (depth, klines) = tokio::join!(
            self.provider.get_order_book_depth(symbol, self.settings.depth_levels),
            self.provider.get_klines(symbol, &self.settings.kline_interval, self.settings.kline_limit),
        );

        let depth = depth.unwrap_or_else(|e| {
            warn!(symbol, error = %e, "order book fetch failed");
            None
        });
        let klines = klines.unwrap_or_else(|e| {
            warn!(symbol, error = %e, "klines fetch failed");
            Vec::new()
        });

        let (bid_volume, ask_volume) = depth
            .as_ref()
            .map(|d| d.volumes(self.settings.depth_levels as usize))
            .unwrap_or((0.0, 0.0));

        let data = MarketMicroData {
            symbol: symbol.to_string(),
            last_price,
            imbalance: order_book_imbalance(bid_volume, ask_volume),
            bid_volume,
            ask_volume,
            volatility_score: wick_intensity_bps(&klines),
            klines,
            timestamp: Utc::now().timestamp_millis(),
        };

        debug!(
            symbol,
            price = data.last_price,
            imbalance = format!("{:.3}", data.imbalance),
            volatility_score = format!("{:.1}", data.volatility_score),
            klines = data.klines.len(),
            "micro data fetched"
        );

        Some(data)
    }
}

/// Normalised bid/ask volume difference in [-1, 1].
pub fn order_book_imbalance(bid_volume: f64, ask_volume: f64) -> f64 {
    let total = bid_volume + ask_volume;
    if total > 0.0 && total.is_finite() {
        ((bid_volume - ask_volume) / total).clamp(-1.0, 1.0)
    } else {
        0.0
    }
}
