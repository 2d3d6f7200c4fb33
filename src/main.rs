// =============================================================================
// Trend Sentinel — Main Entry Point
// =============================================================================
//
// Streams klines for every tracked symbol, recomputes the statistical trend
// on a fixed cadence and serves trends and AI confirmations over HTTP.
// =============================================================================

use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use trend_sentinel::ai::GeminiClient;
use trend_sentinel::api;
use trend_sentinel::app_state::AppState;
use trend_sentinel::binance::BinanceClient;
use trend_sentinel::market_data::CandleKey;
use trend_sentinel::runtime_config::RuntimeConfig;

const CONFIG_PATH: &str = "runtime_config.json";

/// Binance caps one klines request at 1000 candles.
const MAX_BACKFILL: usize = 1000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║            Trend Sentinel — Starting Up                  ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();

    info!(symbols = ?config.symbols, interval = %config.kline_interval, "Configured symbols");

    // ── 2. External providers ────────────────────────────────────────────
    let binance = Arc::new(BinanceClient::new()?);

    let gemini_key = std::env::var("GEMINI_API_KEY").unwrap_or_default();
    let gemini = GeminiClient::new(gemini_key, config.ai_model.clone())?;
    if !gemini.is_configured() {
        warn!("GEMINI_API_KEY is not set; AI analyses will exhaust to neutral WAIT");
    }

    // ── 3. Build shared state ────────────────────────────────────────────
    let trend_every = config.trend_interval_secs.max(1);
    let admin_token = api::auth::admin_token_from_env();
    if admin_token.is_none() {
        warn!("SENTINEL_ADMIN_TOKEN is not set; admin endpoints will refuse every request");
    }
    let state = Arc::new(
        AppState::new(config, binance.clone(), Arc::new(gemini)).with_admin_token(admin_token),
    );

    // ── 4. Backfill candles, then spawn kline streams ────────────────────
    let (interval, backfill) = {
        let cfg = state.runtime_config.read();
        (cfg.kline_interval.clone(), cfg.candle_capacity.min(MAX_BACKFILL))
    };
    for symbol in state.tracked_symbols() {
        match binance.fetch_klines(&symbol, &interval, backfill as u32).await {
            Ok(candles) => {
                let key = CandleKey::new(symbol.as_str(), interval.as_str());
                let now = chrono::Utc::now().timestamp_millis();
                let fetched = candles.len();
                // The newest REST kline is usually still forming.
                for candle in candles.into_iter().filter(|c| c.close_time < now) {
                    state.candle_buffer.update(key.clone(), candle);
                }
                let buffered = state.candle_buffer.count(&key);
                info!(symbol = %symbol, fetched, buffered, "candles backfilled");
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "candle backfill failed, waiting for stream");
                state.push_error(format!("backfill {symbol}: {e:#}"), "backfill");
            }
        }
    }

    state.start_streams();
    info!(count = state.tracked_symbols().len(), "Kline streams launched");

    // ── 5. Start the API server ──────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr =
        std::env::var("SENTINEL_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());

    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("Failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app)
            .await
            .expect("API server failed");
    });

    // ── 6. Trend loop ────────────────────────────────────────────────────
    let trend_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(trend_every));
        loop {
            interval.tick().await;
            for symbol in trend_state.tracked_symbols() {
                let result = trend_state.refresh_trend(&symbol);
                info!(
                    symbol = %symbol,
                    direction = %result.direction,
                    score = format!("{:.3}", result.composite_score),
                    confidence = format!("{:.3}", result.confidence),
                    regime = ?result.regime,
                    volatility = ?result.volatility,
                    samples = result.diagnostics.sample_count,
                    "trend updated"
                );
            }
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received, stopping");

    for symbol in state.tracked_symbols() {
        state.ai.cancel(&symbol);
    }

    if let Err(e) = state.runtime_config.read().save(CONFIG_PATH) {
        error!(error = %e, "Failed to save runtime config on shutdown");
    }

    info!("Trend Sentinel shut down complete.");
    Ok(())
}
