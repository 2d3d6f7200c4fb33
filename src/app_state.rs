// =============================================================================
// Central Application State — Trend Sentinel
// =============================================================================
//
// Every service is constructed once here and shared through `Arc<AppState>`.
// The trend calculator and the AI analyzer own their caches; the state owns
// the per-symbol GARCH volatility and the kline stream tasks.
//
// Thread safety:
//   - parking_lot::RwLock / Mutex for all mutable shared collections.
//   - A symbol's VolatilityState is only written by `update_volatility`,
//     which holds the write lock for the whole catch-up.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::AbortHandle;
use tracing::{debug, error, info};

use crate::ai::{AiAnalyzer, AiProvider, ConfirmationLoop};
use crate::binance::stream::run_kline_stream;
use crate::market_data::{CandleBuffer, CandleKey, MarketDataProvider};
use crate::runtime_config::RuntimeConfig;
use crate::statistics::{GarchHelper, VolatilityState};
use crate::trend::TrendCalculatorService;
use crate::types::TrendResult;

// =============================================================================
// Error Record
// =============================================================================

/// A recorded error event for the dashboard error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// Machine-readable origin ("backfill", "kline_stream", "ai_exhausted").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// Bounded log of recent errors, shared with background tasks.
#[derive(Debug, Clone, Default)]
pub struct ErrorLog(Arc<RwLock<Vec<ErrorRecord>>>);

impl ErrorLog {
    /// Record an error. Oldest entries are evicted beyond
    /// [`MAX_RECENT_ERRORS`].
    pub fn push(&self, message: impl Into<String>, code: Option<&str>) {
        let record = ErrorRecord {
            message: message.into(),
            code: code.map(str::to_string),
            at: Utc::now().to_rfc3339(),
        };
        let mut errors = self.0.write();
        errors.push(record);
        if errors.len() > MAX_RECENT_ERRORS {
            let excess = errors.len() - MAX_RECENT_ERRORS;
            errors.drain(..excess);
        }
    }

    /// Recorded errors, oldest first.
    pub fn snapshot(&self) -> Vec<ErrorRecord> {
        self.0.read().clone()
    }
}

/// GARCH state of one symbol plus the last candle it absorbed.
#[derive(Debug, Clone)]
pub struct TrackedVolatility {
    pub state: VolatilityState,
    pub last_open_time: i64,
}

// =============================================================================
// AppState
// =============================================================================

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

/// Delay before a failed kline stream reconnects.
const STREAM_RECONNECT_SECS: u64 = 5;

pub struct AppState {
    /// Incremented on every tracked-symbol or result change.
    pub state_version: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    // ── Market Data ─────────────────────────────────────────────────────
    pub candle_buffer: Arc<CandleBuffer>,
    streams: Mutex<HashMap<String, AbortHandle>>,
    streams_enabled: bool,

    // ── Statistics ──────────────────────────────────────────────────────
    pub garch: GarchHelper,
    pub volatility: RwLock<HashMap<String, TrackedVolatility>>,
    pub trend: Arc<TrendCalculatorService>,

    // ── AI ──────────────────────────────────────────────────────────────
    pub ai: Arc<AiAnalyzer>,

    // ── Error Log ───────────────────────────────────────────────────────
    pub recent_errors: ErrorLog,

    /// Bearer token guarding admin endpoints; `None` refuses them all.
    admin_token: Option<String>,

    /// Instant when the process started. Used for uptime.
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Build every service from `config`. Kline streams are not started
    /// until [`start_streams`](Self::start_streams) or
    /// [`track_symbol`](Self::track_symbol) is called.
    pub fn new(
        config: RuntimeConfig,
        market: Arc<dyn MarketDataProvider>,
        ai_provider: Arc<dyn AiProvider>,
    ) -> Self {
        let garch = GarchHelper::new(config.garch);
        let trend = TrendCalculatorService::new(config.trend.clone(), garch);
        let confirmation = ConfirmationLoop::new(market, ai_provider, config.ai.clone());

        let volatility = config
            .symbols
            .iter()
            .map(|s| (s.clone(), fresh_volatility(&garch)))
            .collect();

        Self {
            state_version: AtomicU64::new(1),
            candle_buffer: Arc::new(CandleBuffer::new(config.candle_capacity)),
            streams: Mutex::new(HashMap::new()),
            streams_enabled: true,
            garch,
            volatility: RwLock::new(volatility),
            trend: Arc::new(trend),
            ai: Arc::new(AiAnalyzer::new(confirmation)),
            recent_errors: ErrorLog::default(),
            admin_token: None,
            runtime_config: Arc::new(RwLock::new(config)),
            start_time: std::time::Instant::now(),
        }
    }

    /// Never open WebSocket connections (tests, offline runs).
    pub fn without_streams(mut self) -> Self {
        self.streams_enabled = false;
        self
    }

    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token;
        self
    }

    pub fn admin_token(&self) -> Option<&str> {
        self.admin_token.as_deref()
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Error Logging ───────────────────────────────────────────────────

    pub fn push_error(&self, msg: impl Into<String>, code: &str) {
        self.recent_errors.push(msg, Some(code));
    }

    // ── Symbol tracking ─────────────────────────────────────────────────

    pub fn tracked_symbols(&self) -> Vec<String> {
        self.runtime_config.read().symbols.clone()
    }

    pub fn is_tracked(&self, symbol: &str) -> bool {
        self.runtime_config.read().symbols.iter().any(|s| s == symbol)
    }

    /// Start tracking `symbol`: reset its volatility state and start its
    /// kline stream. Returns `false` if it was already tracked.
    pub fn track_symbol(&self, symbol: &str) -> bool {
        {
            let mut cfg = self.runtime_config.write();
            if cfg.symbols.iter().any(|s| s == symbol) {
                return false;
            }
            cfg.symbols.push(symbol.to_string());
        }

        self.volatility
            .write()
            .insert(symbol.to_string(), fresh_volatility(&self.garch));
        self.spawn_kline_stream(symbol);
        self.increment_version();
        info!(symbol, "symbol tracked");
        true
    }

    /// Stop tracking `symbol` and drop everything derived from it: stream,
    /// in-flight AI run, cached AI and trend results, volatility state and
    /// candles. Returns `false` if it was not tracked.
    pub fn untrack_symbol(&self, symbol: &str) -> bool {
        {
            let mut cfg = self.runtime_config.write();
            let before = cfg.symbols.len();
            cfg.symbols.retain(|s| s != symbol);
            if cfg.symbols.len() == before {
                return false;
            }
        }

        if let Some(handle) = self.streams.lock().remove(symbol) {
            handle.abort();
        }
        self.ai.remove_symbol(symbol);
        self.trend.clear(symbol);
        self.volatility.write().remove(symbol);
        self.candle_buffer.remove_symbol(symbol);
        self.increment_version();
        info!(symbol, "symbol untracked");
        true
    }

    /// Start kline streams for every configured symbol.
    pub fn start_streams(&self) {
        for symbol in self.tracked_symbols() {
            self.spawn_kline_stream(&symbol);
        }
    }

    fn spawn_kline_stream(&self, symbol: &str) {
        if !self.streams_enabled {
            return;
        }
        let interval = self.runtime_config.read().kline_interval.clone();
        let buffer = self.candle_buffer.clone();
        let errors = self.recent_errors.clone();
        let sym = symbol.to_string();

        let handle = tokio::spawn(async move {
            loop {
                if let Err(e) = run_kline_stream(&sym, &interval, &buffer).await {
                    error!(symbol = %sym, error = %e, "Kline stream error, reconnecting in {STREAM_RECONNECT_SECS}s");
                    errors.push(format!("kline stream {sym}: {e:#}"), Some("kline_stream"));
                }
                tokio::time::sleep(std::time::Duration::from_secs(STREAM_RECONNECT_SECS)).await;
            }
        });

        if let Some(old) = self.streams.lock().insert(symbol.to_string(), handle.abort_handle()) {
            old.abort();
        }
    }

    // ── Statistics ──────────────────────────────────────────────────────

    /// Feed every closed candle not yet seen into the symbol's GARCH state.
    /// Returns the number of candles absorbed.
    pub fn update_volatility(&self, symbol: &str) -> usize {
        let key = self.candle_key(symbol);
        let mut vols = self.volatility.write();
        let Some(tracked) = vols.get_mut(symbol) else {
            return 0;
        };

        let fresh = self.candle_buffer.get_closed_after(&key, tracked.last_open_time);
        for candle in &fresh {
            self.garch.observe_price(&mut tracked.state, candle.close);
            tracked.last_open_time = candle.open_time;
        }
        fresh.len()
    }

    pub fn volatility_state(&self, symbol: &str) -> Option<VolatilityState> {
        self.volatility.read().get(symbol).map(|t| t.state.clone())
    }

    /// Catch up the volatility state and recompute the trend of `symbol`
    /// from its buffered closes.
    pub fn refresh_trend(&self, symbol: &str) -> TrendResult {
        let absorbed = self.update_volatility(symbol);
        let (key, lookback) = {
            let cfg = self.runtime_config.read();
            (CandleKey::new(symbol, cfg.kline_interval.clone()), cfg.trend_lookback)
        };
        let closes = self.candle_buffer.get_closes(&key, lookback);
        let vol = self.volatility_state(symbol);

        debug!(symbol, closes = closes.len(), absorbed, "refreshing trend");
        let result = self.trend.calculate_for_symbol(symbol, &closes, vol.as_ref());
        self.increment_version();
        result
    }

    fn candle_key(&self, symbol: &str) -> CandleKey {
        CandleKey::new(symbol, self.runtime_config.read().kline_interval.clone())
    }
}

fn fresh_volatility(garch: &GarchHelper) -> TrackedVolatility {
    TrackedVolatility {
        state: garch.new_state(),
        last_open_time: i64::MIN,
    }
}
