// =============================================================================
// Binance REST API Client — public market data
// =============================================================================
//
// Only unsigned endpoints are used: ticker price, order book depth and klines.
// Binance encodes prices and quantities as JSON strings, so every numeric
// field goes through `parse_str_f64`.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::market_data::{BookLevel, Candle, MarketDataProvider, OrderBookDepth};

const DEFAULT_BASE_URL: &str = "https://api.binance.com";

/// Binance public REST client.
#[derive(Clone)]
pub struct BinanceClient {
    base_url: String,
    client: reqwest::Client,
}

impl BinanceClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Point the client at another host (testnet, mirror).
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build reqwest client")?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(%base_url, "BinanceClient initialised");

        Ok(Self { base_url, client })
    }

    // -------------------------------------------------------------------------
    // Requests
    // -------------------------------------------------------------------------

    /// GET `path` and return the JSON body, or `None` on HTTP 400
    /// (Binance answers unknown symbols with 400 / code -1121).
    async fn get_json(&self, path: &str) -> Result<Option<Value>> {
        let url = format!("{}{}", self.base_url, path);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;

        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {path} response"))?;

        if status == reqwest::StatusCode::BAD_REQUEST {
            warn!(path, %body, "Binance rejected request");
            return Ok(None);
        }
        if !status.is_success() {
            anyhow::bail!("Binance GET {} returned {}: {}", path, status, body);
        }

        Ok(Some(body))
    }

    /// GET /api/v3/ticker/price
    #[instrument(skip(self), name = "binance::get_price")]
    pub async fn fetch_price(&self, symbol: &str) -> Result<Option<f64>> {
        let path = format!("/api/v3/ticker/price?symbol={symbol}");
        let Some(body) = self.get_json(&path).await? else {
            return Ok(None);
        };
        let price = parse_ticker_price(&body)?;
        debug!(symbol, price, "price fetched");
        Ok(Some(price))
    }

    /// GET /api/v3/depth
    #[instrument(skip(self), name = "binance::get_depth")]
    pub async fn fetch_depth(&self, symbol: &str, limit: u32) -> Result<Option<OrderBookDepth>> {
        let path = format!("/api/v3/depth?symbol={symbol}&limit={}", depth_limit(limit));
        let Some(body) = self.get_json(&path).await? else {
            return Ok(None);
        };
        let depth = parse_depth(&body)?;
        debug!(symbol, bids = depth.bids.len(), asks = depth.asks.len(), "depth fetched");
        Ok(Some(depth))
    }

    /// GET /api/v3/klines
    ///
    /// Array indices:
    ///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume,
    ///   [6] closeTime, ...
    #[instrument(skip(self), name = "binance::get_klines")]
    pub async fn fetch_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        let path = format!("/api/v3/klines?symbol={symbol}&interval={interval}&limit={limit}");
        let Some(body) = self.get_json(&path).await? else {
            return Ok(Vec::new());
        };
        let candles = parse_klines(&body)?;
        debug!(symbol, interval, count = candles.len(), "klines fetched");
        Ok(candles)
    }
}

#[async_trait]
impl MarketDataProvider for BinanceClient {
    async fn get_price(&self, symbol: &str) -> Result<Option<f64>> {
        self.fetch_price(symbol).await
    }

    async fn get_order_book_depth(&self, symbol: &str, limit: u32) -> Result<Option<OrderBookDepth>> {
        self.fetch_depth(symbol, limit).await
    }

    async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        self.fetch_klines(symbol, interval, limit).await
    }
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Response parsing
// -----------------------------------------------------------------------------

/// The depth endpoint only accepts a fixed set of limits; round up.
fn depth_limit(requested: u32) -> u32 {
    const VALID: [u32; 8] = [5, 10, 20, 50, 100, 500, 1000, 5000];
    VALID
        .iter()
        .copied()
        .find(|v| *v >= requested)
        .unwrap_or(5000)
}

fn parse_ticker_price(body: &Value) -> Result<f64> {
    parse_str_f64(&body["price"]).context("ticker response missing 'price'")
}

fn parse_depth(body: &Value) -> Result<OrderBookDepth> {
    let side = |key: &str| -> Result<Vec<BookLevel>> {
        let levels = body[key]
            .as_array()
            .with_context(|| format!("depth response missing '{key}' array"))?;
        levels
            .iter()
            .map(|lvl| {
                let price = parse_str_f64(&lvl[0])?;
                let qty = parse_str_f64(&lvl[1])?;
                Ok(BookLevel::new(price, qty))
            })
            .collect()
    };
    Ok(OrderBookDepth {
        bids: side("bids")?,
        asks: side("asks")?,
    })
}

fn parse_klines(body: &Value) -> Result<Vec<Candle>> {
    let raw = body.as_array().context("klines response is not an array")?;

    let mut candles = Vec::with_capacity(raw.len());
    for entry in raw {
        let arr = entry.as_array().context("kline entry is not an array")?;
        if arr.len() < 7 {
            warn!("skipping malformed kline entry with {} elements", arr.len());
            continue;
        }

        let open_time = arr[0].as_i64().unwrap_or(0);
        let open = parse_str_f64(&arr[1])?;
        let high = parse_str_f64(&arr[2])?;
        let low = parse_str_f64(&arr[3])?;
        let close = parse_str_f64(&arr[4])?;
        let volume = parse_str_f64(&arr[5])?;
        let close_time = arr[6].as_i64().unwrap_or(0);

        candles.push(Candle::new(open_time, open, high, low, close, volume, close_time));
    }
    Ok(candles)
}

/// Parse a JSON value that may be either a string or a number into `f64`.
fn parse_str_f64(val: &Value) -> Result<f64> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>()
            .with_context(|| format!("failed to parse '{s}' as f64"))
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        anyhow::bail!("expected string or number, got: {val}")
    }
}
