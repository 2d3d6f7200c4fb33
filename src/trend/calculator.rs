// =============================================================================
// Trend Calculator — composite statistical trend decision
// =============================================================================
//
// Three views of the same close series are blended into one score:
//
//   slope        = tanh(move / noise / move_to_noise_scale)        ∈ [-1, 1]
//   persistence  = clamp((H - 0.5) * 2, -1, 1) * sign(slope)       ∈ [-1, 1]
//   regime       = regime alignment * probability * sign(slope)    ∈ [-1, 1]
//
//   composite    = w_s * slope + w_p * persistence + w_r * regime, clamped
//   confidence   = |composite| * (0.5 + 0.5 * adjusted R²)
//
// `move` is the fitted price change over the window, slope * (n - 1), and
// `noise` the residual standard error floored at `noise_floor` of the mean
// price. The ratio is dimensionless, so a ramp of a given shape scores the
// same on a 60 000 USDT symbol as on a 0.5 USDT one.
//
// A direction is only issued when the fit is reliable (adjusted R² gate),
// the conviction is high enough (confidence gate) and the score is not
// marginal (score gate). Everything else is WAIT. A steep slope on a fit
// with autocorrelated residuals therefore never becomes a call.
//
// The calculator never fails. Short series give WAIT with zero confidence,
// and the regime tag is only attached once the detector has enough data.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::regime::{HurstExponentCalculator, RegimeDetector, RegimeResult, RegimeType};
use crate::statistics::garch::{GarchHelper, VolatilityState};
use crate::statistics::regression;
use crate::statistics::stationarity::test_stationarity;
use crate::types::{Direction, TrendDiagnostics, TrendResult};

/// Below this many usable closes no statistic is trusted.
pub const MIN_TREND_POINTS: usize = 20;

// =============================================================================
// Parameters
// =============================================================================

fn default_min_adjusted_r_squared() -> f64 {
    0.5
}

fn default_min_confidence() -> f64 {
    0.4
}

fn default_min_score() -> f64 {
    0.2
}

fn default_slope_weight() -> f64 {
    0.5
}

fn default_persistence_weight() -> f64 {
    0.25
}

fn default_regime_weight() -> f64 {
    0.25
}

fn default_move_to_noise_scale() -> f64 {
    2.0
}

fn default_noise_floor() -> f64 {
    1e-4
}

/// Gates and weights of the composite decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendParams {
    /// Reliability gate on the autocorrelation-adjusted R².
    #[serde(default = "default_min_adjusted_r_squared")]
    pub min_adjusted_r_squared: f64,

    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Minimum |composite score| for a directional call.
    #[serde(default = "default_min_score")]
    pub min_score: f64,

    #[serde(default = "default_slope_weight")]
    pub slope_weight: f64,

    #[serde(default = "default_persistence_weight")]
    pub persistence_weight: f64,

    #[serde(default = "default_regime_weight")]
    pub regime_weight: f64,

    /// Move-to-noise ratio that maps to tanh(1) ≈ 0.76.
    #[serde(default = "default_move_to_noise_scale")]
    pub move_to_noise_scale: f64,

    /// Lower bound on the noise term, as a fraction of the mean price.
    #[serde(default = "default_noise_floor")]
    pub noise_floor: f64,
}

impl Default for TrendParams {
    fn default() -> Self {
        Self {
            min_adjusted_r_squared: default_min_adjusted_r_squared(),
            min_confidence: default_min_confidence(),
            min_score: default_min_score(),
            slope_weight: default_slope_weight(),
            persistence_weight: default_persistence_weight(),
            regime_weight: default_regime_weight(),
            move_to_noise_scale: default_move_to_noise_scale(),
            noise_floor: default_noise_floor(),
        }
    }
}

// =============================================================================
// Service
// =============================================================================

pub struct TrendCalculatorService {
    params: TrendParams,
    garch: GarchHelper,
    hurst: HurstExponentCalculator,
    regime: RegimeDetector,
    latest: RwLock<HashMap<String, TrendResult>>,
}

impl TrendCalculatorService {
    pub fn new(params: TrendParams, garch: GarchHelper) -> Self {
        Self {
            params,
            garch,
            hurst: HurstExponentCalculator,
            regime: RegimeDetector::new(garch),
            latest: RwLock::new(HashMap::new()),
        }
    }

    /// Trend decision for `prices` (closes, oldest first).
    pub fn calculate_from_prices(&self, symbol: &str, prices: &[f64]) -> TrendResult {
        self.calculate_for_symbol(symbol, prices, None)
    }

    /// Like [`calculate_from_prices`](Self::calculate_from_prices), but the
    /// volatility tag comes from the symbol's live GARCH state when given.
    pub fn calculate_for_symbol(
        &self,
        symbol: &str,
        prices: &[f64],
        volatility: Option<&VolatilityState>,
    ) -> TrendResult {
        let result = self.evaluate(symbol, prices, volatility);
        self.latest.write().insert(symbol.to_string(), result.clone());
        result
    }

    pub fn latest(&self, symbol: &str) -> Option<TrendResult> {
        self.latest.read().get(symbol).cloned()
    }

    pub fn all_latest(&self) -> Vec<TrendResult> {
        let mut all: Vec<_> = self.latest.read().values().cloned().collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        all
    }

    pub fn clear(&self, symbol: &str) -> bool {
        self.latest.write().remove(symbol).is_some()
    }

    fn evaluate(&self, symbol: &str, prices: &[f64], volatility: Option<&VolatilityState>) -> TrendResult {
        let closes: Vec<f64> = prices.iter().copied().filter(|p| p.is_finite() && *p > 0.0).collect();
        if closes.len() != prices.len() {
            trace!(symbol, dropped = prices.len() - closes.len(), "ignoring non-finite or non-positive closes");
        }

        if closes.len() < MIN_TREND_POINTS {
            debug!(symbol, points = closes.len(), "not enough data for a trend, WAIT");
            return TrendResult {
                symbol: symbol.to_string(),
                direction: Direction::Wait,
                composite_score: 0.0,
                confidence: 0.0,
                slope: 0.0,
                timestamp: Utc::now().timestamp_millis(),
                regime: None,
                volatility: volatility.map(|v| v.regime),
                diagnostics: TrendDiagnostics {
                    sample_count: closes.len(),
                    durbin_watson: 2.0,
                    conditional_volatility: volatility.map(VolatilityState::volatility),
                    forecast_volatility: volatility.and_then(|v| self.next_volatility(v)),
                    hurst: 0.5,
                    is_stationary: true,
                    ..Default::default()
                },
            };
        }

        let p = &self.params;
        let fit = regression::calculate(&closes);
        let mean = closes.iter().sum::<f64>() / closes.len() as f64;
        let fitted_move = fit.slope * (closes.len() - 1) as f64;
        let noise = fit.residual_std_error().max(mean * p.noise_floor.max(f64::EPSILON));
        let move_to_noise = fitted_move / noise;
        let hurst = self.hurst.calculate(&closes).exponent;
        let stationarity = test_stationarity(&closes);

        // The detector's preconditions are enforced here, so its error path
        // is unreachable; `ok()` keeps that contract explicit.
        let regime: Option<RegimeResult> = (closes.len() >= self.regime.min_samples())
            .then(|| self.regime.detect(&closes).ok())
            .flatten();

        let slope_signal = (move_to_noise / p.move_to_noise_scale.max(f64::EPSILON)).tanh();
        let dir = sign(slope_signal);
        let persistence = ((hurst - 0.5) * 2.0).clamp(-1.0, 1.0) * dir;
        let regime_term = regime.as_ref().map(regime_alignment).unwrap_or(0.0) * dir;

        let composite = (p.slope_weight * slope_signal
            + p.persistence_weight * persistence
            + p.regime_weight * regime_term)
            .clamp(-1.0, 1.0);
        let reliability = 0.5 + 0.5 * fit.adjusted_r_squared.clamp(0.0, 1.0);
        let confidence = (composite.abs() * reliability).clamp(0.0, 1.0);

        let direction = if fit.adjusted_r_squared >= p.min_adjusted_r_squared
            && confidence >= p.min_confidence
            && composite.abs() >= p.min_score
        {
            if composite > 0.0 {
                Direction::Long
            } else {
                Direction::Short
            }
        } else {
            Direction::Wait
        };

        debug!(
            symbol,
            direction = %direction,
            composite = format!("{:.3}", composite),
            confidence = format!("{:.3}", confidence),
            adj_r2 = format!("{:.3}", fit.adjusted_r_squared),
            move_to_noise = format!("{:.2}", move_to_noise),
            hurst = format!("{:.3}", hurst),
            regime = ?regime.as_ref().map(|r| r.regime_type),
            "trend evaluated"
        );

        TrendResult {
            symbol: symbol.to_string(),
            direction,
            composite_score: composite,
            confidence,
            slope: fit.slope,
            timestamp: Utc::now().timestamp_millis(),
            regime: regime.as_ref().map(|r| r.regime_type),
            volatility: volatility
                .map(|v| v.regime)
                .or_else(|| regime.as_ref().map(|r| r.volatility_regime)),
            diagnostics: TrendDiagnostics {
                sample_count: closes.len(),
                slope_normalized: fit.slope_normalized(),
                move_to_noise,
                r_squared: fit.r_squared,
                adjusted_r_squared: fit.adjusted_r_squared,
                durbin_watson: fit.durbin_watson,
                hurst,
                is_stationary: stationarity.is_stationary,
                regime_probability: regime.as_ref().map(|r| r.probability),
                conditional_volatility: volatility.map(VolatilityState::volatility),
                forecast_volatility: volatility.and_then(|v| self.next_volatility(v)),
            },
        }
    }

    fn next_volatility(&self, state: &VolatilityState) -> Option<f64> {
        self.garch.forecast(state, 1).first().map(|v| v.sqrt())
    }
}

/// How much the regime supports continuing the slope, in [-1, 1].
fn regime_alignment(r: &RegimeResult) -> f64 {
    let p = r.probability.clamp(0.0, 1.0);
    match r.regime_type {
        RegimeType::Trending => p,
        RegimeType::MeanReverting => -p,
        RegimeType::HighVolatility => -0.5 * p,
        _ => 0.0,
    }
}

fn sign(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistics::garch::VolatilityRegime;

    fn service() -> TrendCalculatorService {
        TrendCalculatorService::new(TrendParams::default(), GarchHelper::default())
    }

    fn ramp(len: usize, start: f64, step: f64) -> Vec<f64> {
        (0..len).map(|i| start + step * i as f64).collect()
    }

    #[test]
    fn monotonic_increase_is_long() {
        let prices = ramp(60, 100.0, 1.0);
        let r = service().calculate_from_prices("BTCUSDT", &prices);
        assert!(r.slope > 0.0);
        assert!(r.diagnostics.adjusted_r_squared > 0.9);
        assert_eq!(r.direction, Direction::Long);
        assert!(r.composite_score > 0.0);
        assert!(r.confidence >= 0.4);
        assert!(r.regime.is_none(), "fewer than 100 points carry no regime tag");
    }

    #[test]
    fn monotonic_decrease_is_short() {
        let prices = ramp(60, 200.0, -1.0);
        let r = service().calculate_from_prices("ETHUSDT", &prices);
        assert!(r.slope < 0.0);
        assert_eq!(r.direction, Direction::Short);
        assert!(r.composite_score < 0.0);
    }

    #[test]
    fn short_series_waits_with_zero_confidence() {
        let r = service().calculate_from_prices("BTCUSDT", &ramp(19, 100.0, 1.0));
        assert_eq!(r.direction, Direction::Wait);
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.diagnostics.sample_count, 19);
        let r = service().calculate_from_prices("BTCUSDT", &[]);
        assert_eq!(r.direction, Direction::Wait);
    }

    #[test]
    fn flat_series_waits() {
        let r = service().calculate_from_prices("BTCUSDT", &vec![100.0; 150]);
        assert_eq!(r.direction, Direction::Wait);
        assert_eq!(r.composite_score, 0.0);
        assert!(r.confidence.is_finite());
    }

    #[test]
    fn oscillation_without_trend_waits() {
        let prices: Vec<f64> = (0..200)
            .map(|i| 100.0 + 10.0 * (i as f64 * std::f64::consts::TAU / 40.0).sin())
            .collect();
        let r = service().calculate_from_prices("BTCUSDT", &prices);
        assert!(r.diagnostics.adjusted_r_squared < 0.5);
        assert_eq!(r.direction, Direction::Wait);
    }

    #[test]
    fn long_series_carries_regime_tags() {
        let prices = ramp(150, 100.0, 0.5);
        let r = service().calculate_from_prices("BTCUSDT", &prices);
        assert!(r.regime.is_some());
        assert!(r.volatility.is_some());
        assert!(r.diagnostics.regime_probability.is_some());
        assert!((-1.0..=1.0).contains(&r.composite_score));
        assert!((0.0..=1.0).contains(&r.confidence));
    }

    #[test]
    fn live_volatility_state_sets_tag() {
        let garch = GarchHelper::default();
        let mut state = garch.new_state();
        state.regime = VolatilityRegime::Extreme;
        let r = service().calculate_for_symbol("BTCUSDT", &ramp(60, 100.0, 1.0), Some(&state));
        assert_eq!(r.volatility, Some(VolatilityRegime::Extreme));
        let sigma = r.diagnostics.conditional_volatility.unwrap();
        assert!((sigma - state.variance.sqrt()).abs() < 1e-15);
        assert!(r.diagnostics.forecast_volatility.unwrap() > 0.0);

        let r = service().calculate_from_prices("BTCUSDT", &ramp(60, 100.0, 1.0));
        assert!(r.diagnostics.conditional_volatility.is_none());
        assert!(r.diagnostics.forecast_volatility.is_none());
    }

    #[test]
    fn btc_scale_ramp_is_long() {
        let r = service().calculate_from_prices("BTCUSDT", &ramp(60, 60_000.0, 10.0));
        assert_eq!(r.direction, Direction::Long);
        assert!(r.composite_score > 0.5, "score={}", r.composite_score);
        assert!(r.diagnostics.slope_normalized > 0.0);

        let r = service().calculate_from_prices("BTCUSDT", &ramp(60, 60_000.0, -10.0));
        assert_eq!(r.direction, Direction::Short);
    }

    #[test]
    fn score_is_independent_of_price_level() {
        let wobble = |i: usize| if i % 2 == 0 { 0.004 } else { -0.004 };
        let shape = |level: f64| -> Vec<f64> {
            (0..80).map(|i| level * (1.0 + 0.001 * i as f64 + wobble(i))).collect()
        };
        let svc = service();
        let cheap = svc.calculate_from_prices("DOGEUSDT", &shape(0.15));
        let dear = svc.calculate_from_prices("BTCUSDT", &shape(60_000.0));
        assert!((cheap.composite_score - dear.composite_score).abs() < 1e-9);
        assert!((cheap.diagnostics.move_to_noise - dear.diagnostics.move_to_noise).abs() < 1e-6);
        assert_eq!(cheap.direction, dear.direction);
    }

    #[test]
    fn small_move_inside_noise_scores_low() {
        // Total drift of half a residual sigma.
        let prices: Vec<f64> = (0..60)
            .map(|i| 60_000.0 + 0.1 * i as f64 + if i % 2 == 0 { 20.0 } else { -20.0 })
            .collect();
        let r = service().calculate_from_prices("BTCUSDT", &prices);
        assert!(r.diagnostics.move_to_noise.abs() < 1.0);
        assert_eq!(r.direction, Direction::Wait);
    }

    #[test]
    fn reliability_gate_blocks_direction() {
        let params = TrendParams {
            min_adjusted_r_squared: 1.1,
            ..TrendParams::default()
        };
        let svc = TrendCalculatorService::new(params, GarchHelper::default());
        let r = svc.calculate_from_prices("BTCUSDT", &ramp(60, 100.0, 1.0));
        assert_eq!(r.direction, Direction::Wait);
        assert!(r.composite_score > 0.0);
    }

    #[test]
    fn non_finite_closes_are_ignored() {
        let mut prices = ramp(60, 100.0, 1.0);
        prices[10] = f64::NAN;
        prices[20] = 0.0;
        let r = service().calculate_from_prices("BTCUSDT", &prices);
        assert_eq!(r.diagnostics.sample_count, 58);
        assert!(r.composite_score.is_finite());
    }

    #[test]
    fn results_are_cached_per_symbol() {
        let svc = service();
        svc.calculate_from_prices("ETHUSDT", &ramp(30, 100.0, 1.0));
        svc.calculate_from_prices("BTCUSDT", &ramp(30, 100.0, -1.0));
        assert_eq!(svc.latest("ETHUSDT").map(|r| r.symbol), Some("ETHUSDT".to_string()));
        let all = svc.all_latest();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].symbol, "BTCUSDT");
        assert!(svc.clear("ETHUSDT"));
        assert!(svc.latest("ETHUSDT").is_none());
    }

    #[test]
    fn params_deserialise_with_defaults() {
        let p: TrendParams = serde_json::from_str(r#"{ "min_score": 0.3 }"#).unwrap();
        assert_eq!(p.min_score, 0.3);
        assert_eq!(p.move_to_noise_scale, 2.0);
        assert_eq!(p.noise_floor, 1e-4);
    }
}
