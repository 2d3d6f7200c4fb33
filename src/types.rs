// =============================================================================
// Shared types used across the trend sentinel
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::regime::RegimeType;
use crate::statistics::garch::VolatilityRegime;

/// Directional verdict shared by the statistical engine and the AI loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
    Wait,
}

impl Default for Direction {
    fn default() -> Self {
        Self::Wait
    }
}

impl Direction {
    /// Strict parser for the three wire labels. Surrounding whitespace and
    /// letter case are tolerated; anything else is rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LONG" => Some(Self::Long),
            "SHORT" => Some(Self::Short),
            "WAIT" => Some(Self::Wait),
            _ => None,
        }
    }

    pub fn is_directional(self) -> bool {
        !matches!(self, Self::Wait)
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
            Self::Wait => write!(f, "WAIT"),
        }
    }
}

/// Statistics that fed a trend decision, kept for the dashboard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendDiagnostics {
    pub sample_count: usize,
    /// Slope as a fraction of the mean price per sample.
    pub slope_normalized: f64,
    /// Fitted move over the window divided by the residual noise.
    pub move_to_noise: f64,
    pub r_squared: f64,
    pub adjusted_r_squared: f64,
    pub durbin_watson: f64,
    pub hurst: f64,
    pub is_stationary: bool,
    pub regime_probability: Option<f64>,
    /// Current GARCH σ of the symbol's log returns, when it is tracked live.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional_volatility: Option<f64>,
    /// One-step-ahead GARCH σ forecast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forecast_volatility: Option<f64>,
}

/// Primary output of the statistical engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendResult {
    pub symbol: String,
    pub direction: Direction,
    /// Weighted blend in [-1, 1]; sign gives the raw bias.
    pub composite_score: f64,
    /// Conviction in [0, 1].
    pub confidence: f64,
    /// Raw OLS slope in price units per sample.
    pub slope: f64,
    /// Milliseconds since the UNIX epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regime: Option<RegimeType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volatility: Option<VolatilityRegime>,
    #[serde(default)]
    pub diagnostics: TrendDiagnostics,
}

/// Fallback sigma returned when the AI loop is exhausted.
pub const FALLBACK_SIGMA: f64 = 0.005;
/// Fallback take-profit step returned when the AI loop is exhausted.
pub const FALLBACK_TAKE_PROFIT: f64 = 0.002;

/// A vetted AI opinion for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiAnalysisResult {
    pub symbol: String,
    pub tendance: Direction,
    /// Inversion threshold, fraction of price.
    pub sigma: f64,
    /// Profit step, fraction of price.
    pub take_profit_pnl_click: f64,
    pub confidence: f64,
    pub reasoning: String,
    pub timestamp: i64,
}

impl AiAnalysisResult {
    /// Neutral result handed out when no definitive signal was obtained.
    pub fn fallback(symbol: &str, reasoning: impl Into<String>) -> Self {
        Self {
            symbol: symbol.to_string(),
            tendance: Direction::Wait,
            sigma: FALLBACK_SIGMA,
            take_profit_pnl_click: FALLBACK_TAKE_PROFIT,
            confidence: 0.0,
            reasoning: reasoning.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}
