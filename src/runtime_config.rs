// =============================================================================
// Runtime Configuration — JSON settings with atomic save
// =============================================================================
//
// Every tunable of the sentinel lives here: tracked symbols, candle buffer
// shape, trend gates and weights, GARCH coefficients and the AI loop budget.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ai::AiLoopParams;
use crate::statistics::GarchParams;
use crate::trend::TrendParams;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "BNBUSDT".to_string(),
        "XRPUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

fn default_kline_interval() -> String {
    "1m".to_string()
}

fn default_candle_capacity() -> usize {
    500
}

fn default_trend_lookback() -> usize {
    200
}

fn default_trend_interval_secs() -> u64 {
    30
}

fn default_ai_model() -> String {
    "gemini-1.5-flash".to_string()
}

/// Upper-case and trim a user-supplied symbol; `None` if nothing usable is
/// left (empty, or characters Binance never uses in a symbol).
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let s = raw.trim().to_uppercase();
    if s.is_empty() || s.len() > 20 || !s.chars().all(|c| c.is_ascii_alphanumeric()) {
        None
    } else {
        Some(s)
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Symbols & candles ---------------------------------------------------

    /// Symbols the sentinel is tracking.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Interval of the kline stream feeding the trend engine.
    #[serde(default = "default_kline_interval")]
    pub kline_interval: String,

    /// Closed candles retained per symbol.
    #[serde(default = "default_candle_capacity")]
    pub candle_capacity: usize,

    /// Closes handed to the trend calculator on each pass.
    #[serde(default = "default_trend_lookback")]
    pub trend_lookback: usize,

    #[serde(default = "default_trend_interval_secs")]
    pub trend_interval_secs: u64,

    // --- Statistics ----------------------------------------------------------

    #[serde(default)]
    pub trend: TrendParams,

    #[serde(default)]
    pub garch: GarchParams,

    // --- AI confirmation -----------------------------------------------------

    #[serde(default)]
    pub ai: AiLoopParams,

    /// Gemini model name used for `generateContent`.
    #[serde(default = "default_ai_model")]
    pub ai_model: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            kline_interval: default_kline_interval(),
            candle_capacity: default_candle_capacity(),
            trend_lookback: default_trend_lookback(),
            trend_interval_secs: default_trend_interval_secs(),
            trend: TrendParams::default(),
            garch: GarchParams::default(),
            ai: AiLoopParams::default(),
            ai_model: default_ai_model(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            kline_interval = %config.kline_interval,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Apply `SENTINEL_SYMBOLS` (comma list) on top of the file settings and
    /// make sure the symbol list is usable.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var("SENTINEL_SYMBOLS") {
            self.symbols = parse_symbol_list(&raw);
        }
        self.symbols.dedup();
        if self.symbols.is_empty() {
            warn!("no symbols configured, falling back to defaults");
            self.symbols = default_symbols();
        }
        if self.trend_lookback > self.candle_capacity {
            warn!(
                lookback = self.trend_lookback,
                capacity = self.candle_capacity,
                "trend lookback exceeds candle capacity, clamping"
            );
            self.trend_lookback = self.candle_capacity;
        }
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

fn parse_symbol_list(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for s in raw.split(',').filter_map(normalize_symbol) {
        if !out.contains(&s) {
            out.push(s);
        }
    }
    out
}
