// =============================================================================
// Binance Kline WebSocket — live candles into the CandleBuffer
// =============================================================================
//
// One connection per (symbol, interval). Each kline event replaces the live
// candle in the buffer until Binance flags it closed (`"x": true`). The
// function returns when the socket closes or fails; reconnecting is the
// caller's job.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use serde::{Deserialize, Deserializer};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::market_data::{Candle, CandleBuffer, CandleKey};

const WS_BASE: &str = "wss://stream.binance.com:9443/ws";

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// Raw `/ws/<stream>` events are bare; `/stream?streams=` wraps them.
#[derive(Deserialize)]
#[serde(untagged)]
enum KlineMessage {
    Combined { data: KlineEvent },
    Bare(KlineEvent),
}

#[derive(Deserialize)]
struct KlineEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: KlinePayload,
}

#[derive(Deserialize)]
struct KlinePayload {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o", deserialize_with = "number_or_string")]
    open: f64,
    #[serde(rename = "h", deserialize_with = "number_or_string")]
    high: f64,
    #[serde(rename = "l", deserialize_with = "number_or_string")]
    low: f64,
    #[serde(rename = "c", deserialize_with = "number_or_string")]
    close: f64,
    #[serde(rename = "v", deserialize_with = "number_or_string")]
    volume: f64,
    #[serde(rename = "x")]
    is_closed: bool,
}

/// Binance quotes prices as JSON strings to keep their precision.
fn number_or_string<'de, D: Deserializer<'de>>(de: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Str(String),
    }
    match Raw::deserialize(de)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn parse_kline_message(text: &str) -> Result<(CandleKey, Candle)> {
    let event = match serde_json::from_str::<KlineMessage>(text).context("unrecognised kline message")? {
        KlineMessage::Combined { data } => data,
        KlineMessage::Bare(event) => event,
    };
    let k = event.kline;
    let key = CandleKey::new(event.symbol.to_uppercase(), k.interval);
    let candle = Candle {
        open_time: k.open_time,
        close_time: k.close_time,
        open: k.open,
        high: k.high,
        low: k.low,
        close: k.close,
        volume: k.volume,
        is_closed: k.is_closed,
    };
    Ok((key, candle))
}

// ---------------------------------------------------------------------------
// Stream task
// ---------------------------------------------------------------------------

/// Feed `buffer` from the `<symbol>@kline_<interval>` stream until the
/// connection ends.
pub async fn run_kline_stream(symbol: &str, interval: &str, buffer: &CandleBuffer) -> Result<()> {
    let url = format!("{WS_BASE}/{}@kline_{interval}", symbol.to_lowercase());
    let (mut ws, _response) = connect_async(url.as_str())
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    info!(symbol, interval, "kline stream connected");

    while let Some(frame) = ws.next().await {
        match frame.context("kline stream read failed")? {
            Message::Text(text) => match parse_kline_message(&text) {
                Ok((key, candle)) => {
                    debug!(key = %key, close = candle.close, closed = candle.is_closed, "kline");
                    buffer.update(key, candle);
                }
                Err(e) => warn!(symbol, error = %e, "skipping kline message"),
            },
            Message::Close(reason) => {
                info!(symbol, ?reason, "kline stream closed by server");
                return Ok(());
            }
            // tungstenite answers pings itself
            _ => {}
        }
    }

    warn!(symbol, interval, "kline stream ended");
    Ok(())
}
