// =============================================================================
// Market Regime Detector
// =============================================================================
//
// Fuses persistence (Hurst) with a GARCH-filtered volatility estimate into a
// single regime verdict.
//
// Decision table (evaluated top-to-bottom; first match wins):
//
//   1. HIGH_VOLATILITY: volatility bucket HIGH or EXTREME, whatever Hurst says
//   2. MEAN_REVERTING : Hurst < 0.45
//   3. TRENDING       : Hurst > 0.55 with LOW or NORMAL volatility
//   4. LOW_VOLATILITY : volatility bucket LOW, Hurst in the random-walk band
//
// When no rule fires the recent history decides:
//
//   - TRANSITIONING: the series without its most recent fifth classified
//                    into a definite regime that the full series no longer
//                    supports
//   - CHOPPY       : recent price path has a low efficiency ratio
//                    (lots of movement, little net progress)
//   - UNKNOWN      : otherwise
//
// `probability` is a confidence heuristic built from piecewise-linear remaps
// of Hurst distance from 0.5 and the volatility z-score. It is bounded to
// [0, 1] and grows with the extremity of its inputs, but it is NOT a
// calibrated statistical probability.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::AnalysisError;
use crate::regime::hurst::{HurstExponentCalculator, MIN_POINTS as HURST_MIN_POINTS};
use crate::statistics::garch::{
    classify_volatility_regime, volatility_z_score, GarchHelper, VolatilityRegime,
};
use crate::statistics::stationarity::to_log_returns;

/// Minimum number of prices accepted by [`RegimeDetector::detect`].
pub const MIN_SAMPLES: usize = 100;

/// Trailing window for the efficiency ratio.
const EFFICIENCY_WINDOW: usize = 20;

/// Efficiency ratio below which the tape counts as choppy.
const CHOPPY_EFFICIENCY: f64 = 0.3;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegimeType {
    Trending,
    MeanReverting,
    HighVolatility,
    LowVolatility,
    Transitioning,
    Choppy,
    Unknown,
}

impl std::fmt::Display for RegimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trending => write!(f, "TRENDING"),
            Self::MeanReverting => write!(f, "MEAN_REVERTING"),
            Self::HighVolatility => write!(f, "HIGH_VOLATILITY"),
            Self::LowVolatility => write!(f, "LOW_VOLATILITY"),
            Self::Transitioning => write!(f, "TRANSITIONING"),
            Self::Choppy => write!(f, "CHOPPY"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Regime verdict plus the metrics that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegimeResult {
    #[serde(rename = "type")]
    pub regime_type: RegimeType,
    /// Confidence heuristic in [0, 1].
    pub probability: f64,
    pub hurst: f64,
    /// Current conditional volatility of log returns (per sample).
    pub volatility: f64,
    pub volatility_regime: VolatilityRegime,
}

/// Inputs to the decision table for one slice of prices.
#[derive(Debug, Clone, Copy)]
struct Snapshot {
    hurst: f64,
    volatility: f64,
    vol_regime: VolatilityRegime,
    vol_z: f64,
}

// =============================================================================
// RegimeDetector
// =============================================================================

/// Stateless regime detector; every call recomputes from the supplied prices.
#[derive(Debug, Clone)]
pub struct RegimeDetector {
    hurst: HurstExponentCalculator,
    garch: GarchHelper,
    min_samples: usize,
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self::new(GarchHelper::default())
    }
}

impl RegimeDetector {
    pub fn new(garch: GarchHelper) -> Self {
        Self {
            hurst: HurstExponentCalculator,
            garch,
            min_samples: MIN_SAMPLES,
        }
    }

    pub fn min_samples(&self) -> usize {
        self.min_samples
    }

    /// Classify the regime of `prices` (oldest first).
    ///
    /// # Errors
    /// - [`AnalysisError::EmptyInput`] for an empty slice.
    /// - [`AnalysisError::InsufficientData`] below [`MIN_SAMPLES`] points.
    ///   Callers are expected to wait until their buffer is ready.
    pub fn detect(&self, prices: &[f64]) -> Result<RegimeResult, AnalysisError> {
        if prices.is_empty() {
            return Err(AnalysisError::EmptyInput);
        }
        if prices.len() < self.min_samples {
            return Err(AnalysisError::InsufficientData {
                required: self.min_samples,
                actual: prices.len(),
            });
        }

        let current = self.snapshot(prices);

        let (regime_type, probability) = match classify(&current) {
            Some(verdict) => verdict,
            None => {
                let lag_len = prices.len() * 4 / 5;
                let lagged = (lag_len >= HURST_MIN_POINTS)
                    .then(|| classify(&self.snapshot(&prices[..lag_len])))
                    .flatten();
                let tail = &prices[prices.len().saturating_sub(EFFICIENCY_WINDOW)..];
                from_history(lagged, efficiency_ratio(tail))
            }
        };

        debug!(
            regime = %regime_type,
            probability = format!("{:.2}", probability),
            hurst = format!("{:.4}", current.hurst),
            volatility = format!("{:.6}", current.volatility),
            vol_regime = %current.vol_regime,
            "Regime detected"
        );

        Ok(RegimeResult {
            regime_type,
            probability,
            hurst: current.hurst,
            volatility: current.volatility,
            volatility_regime: current.vol_regime,
        })
    }

    fn snapshot(&self, prices: &[f64]) -> Snapshot {
        let hurst = self.hurst.calculate(prices).exponent;

        let returns = to_log_returns(prices);
        let vols: Vec<f64> = self.garch.filter(&returns).into_iter().map(f64::sqrt).collect();

        let (volatility, vol_regime, vol_z) = match vols.split_last() {
            Some((&current, history)) => (
                current,
                classify_volatility_regime(current, history),
                volatility_z_score(current, history),
            ),
            None => (0.0, VolatilityRegime::Normal, 0.0),
        };

        Snapshot {
            hurst,
            volatility,
            vol_regime,
            vol_z,
        }
    }
}

// =============================================================================
// Classification logic
// =============================================================================

/// Decision table rules 1-4. `None` when no rule fires.
fn classify(s: &Snapshot) -> Option<(RegimeType, f64)> {
    if matches!(s.vol_regime, VolatilityRegime::High | VolatilityRegime::Extreme) {
        let confidence = remap(s.vol_z, 1.0, 3.0, 0.55, 1.0);
        return Some((RegimeType::HighVolatility, confidence));
    }

    if s.hurst < 0.45 {
        let confidence = remap(s.hurst, 0.45, 0.20, 0.55, 1.0);
        return Some((RegimeType::MeanReverting, confidence));
    }

    if s.hurst > 0.55 {
        let hurst_conf = remap(s.hurst, 0.55, 0.80, 0.55, 1.0);
        let calm_conf = remap(s.vol_z, 1.0, -1.0, 0.50, 1.0);
        return Some((RegimeType::Trending, (hurst_conf + calm_conf) / 2.0));
    }

    if s.vol_regime == VolatilityRegime::Low {
        let confidence = remap(s.vol_z, -1.0, -2.5, 0.55, 0.90);
        return Some((RegimeType::LowVolatility, confidence));
    }

    trace!(
        hurst = format!("{:.4}", s.hurst),
        vol_z = format!("{:.2}", s.vol_z),
        "Regime: no rule matched"
    );
    None
}

/// Fallback when the decision table is silent.
fn from_history(lagged: Option<(RegimeType, f64)>, efficiency: f64) -> (RegimeType, f64) {
    if let Some((_, lagged_probability)) = lagged {
        return (RegimeType::Transitioning, (0.5 * lagged_probability).clamp(0.0, 1.0));
    }
    if efficiency < CHOPPY_EFFICIENCY {
        return (
            RegimeType::Choppy,
            remap(efficiency, CHOPPY_EFFICIENCY, 0.0, 0.40, 0.70),
        );
    }
    (RegimeType::Unknown, 0.25)
}

/// Kaufman efficiency ratio: |net change| / sum of |step changes|, in [0, 1].
/// A path with no movement counts as fully efficient (1.0).
fn efficiency_ratio(prices: &[f64]) -> f64 {
    if prices.len() < 2 {
        return 1.0;
    }
    let path: f64 = prices.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    if path < f64::EPSILON {
        return 1.0;
    }
    let net = (prices[prices.len() - 1] - prices[0]).abs();
    (net / path).clamp(0.0, 1.0)
}

/// Linearly remap `value` from `[in_lo, in_hi]` to `[out_lo, out_hi]`, clamped
/// to the output range. Works whichever way round the input range is given.
fn remap(value: f64, in_lo: f64, in_hi: f64, out_lo: f64, out_hi: f64) -> f64 {
    let t = if (in_hi - in_lo).abs() < f64::EPSILON || !value.is_finite() {
        0.5
    } else {
        (value - in_lo) / (in_hi - in_lo)
    };
    out_lo + t.clamp(0.0, 1.0) * (out_hi - out_lo)
}
