// =============================================================================
// Hurst Exponent — Rescaled Range (R/S) Analysis
// =============================================================================
//
//   H > 0.55  =>  trending / persistent
//   0.45..=0.55  =>  random walk
//   H < 0.45  =>  mean-reverting / anti-persistent
//
// Algorithm:
//   1. Window sizes n = 8, 16, 32, ... up to half the series length.
//   2. For each n, split the series into non-overlapping chunks and compute
//      R/S per chunk: R = range of the cumulative deviation from the chunk
//      mean, S = population standard deviation. Flat chunks are skipped.
//   3. Average R/S per window size, regress log(R/S) on log(n).
//   4. The slope is H, clamped to [0, 1].
//
// Short or flat input never propagates NaN: the exponent degrades to the
// neutral 0.5 (random walk).

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Smallest chunk length used in the R/S ladder.
const MIN_WINDOW: usize = 8;

/// Fewer points than this cannot produce two window sizes.
pub const MIN_POINTS: usize = 2 * MIN_WINDOW * 2;

const NEUTRAL_EXPONENT: f64 = 0.5;
const MEAN_REVERTING_BELOW: f64 = 0.45;
const TRENDING_ABOVE: f64 = 0.55;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PersistenceBehavior {
    MeanReverting,
    RandomWalk,
    Trending,
}

impl std::fmt::Display for PersistenceBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MeanReverting => write!(f, "MEAN_REVERTING"),
            Self::RandomWalk => write!(f, "RANDOM_WALK"),
            Self::Trending => write!(f, "TRENDING"),
        }
    }
}

/// Strategy family suited to each persistence band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyType {
    MeanReversion,
    TrendFollowing,
    StandAside,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HurstInterpretation {
    pub behavior: PersistenceBehavior,
    pub strategy_type: StrategyType,
    /// Distance from 0.5 mapped onto [0, 1].
    pub confidence: f64,
    pub should_trade: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HurstResult {
    pub exponent: f64,
    pub interpretation: HurstInterpretation,
    /// Number of window sizes that contributed to the regression (0 when the
    /// exponent fell back to 0.5).
    pub window_sizes_used: usize,
}

/// Stateless R/S calculator.
#[derive(Debug, Clone, Copy, Default)]
pub struct HurstExponentCalculator;

impl HurstExponentCalculator {
    pub fn calculate(&self, prices: &[f64]) -> HurstResult {
        let (exponent, used) = match rescaled_range_exponent(prices) {
            Some((h, used)) => (h, used),
            None => (NEUTRAL_EXPONENT, 0),
        };
        HurstResult {
            exponent,
            interpretation: self.interpret(exponent),
            window_sizes_used: used,
        }
    }

    /// Map an exponent onto the three persistence bands.
    pub fn interpret(&self, hurst: f64) -> HurstInterpretation {
        let h = if hurst.is_finite() { hurst.clamp(0.0, 1.0) } else { NEUTRAL_EXPONENT };

        let behavior = if h < MEAN_REVERTING_BELOW {
            PersistenceBehavior::MeanReverting
        } else if h > TRENDING_ABOVE {
            PersistenceBehavior::Trending
        } else {
            PersistenceBehavior::RandomWalk
        };

        let strategy_type = match behavior {
            PersistenceBehavior::MeanReverting => StrategyType::MeanReversion,
            PersistenceBehavior::Trending => StrategyType::TrendFollowing,
            PersistenceBehavior::RandomWalk => StrategyType::StandAside,
        };

        HurstInterpretation {
            behavior,
            strategy_type,
            confidence: ((h - NEUTRAL_EXPONENT).abs() * 4.0).clamp(0.0, 1.0),
            should_trade: behavior != PersistenceBehavior::RandomWalk,
        }
    }
}

/// R/S regression. `None` when fewer than two window sizes yield a valid
/// average (short series, flat chunks) or the regression is degenerate.
fn rescaled_range_exponent(prices: &[f64]) -> Option<(f64, usize)> {
    if prices.len() < MIN_POINTS || prices.iter().any(|p| !p.is_finite()) {
        trace!(len = prices.len(), min = MIN_POINTS, "Hurst: insufficient data");
        return None;
    }

    let mut log_n: Vec<f64> = Vec::new();
    let mut log_rs: Vec<f64> = Vec::new();

    let mut window = MIN_WINDOW;
    while window <= prices.len() / 2 {
        if let Some(avg_rs) = average_rs(prices, window) {
            log_n.push((window as f64).ln());
            log_rs.push(avg_rs.ln());
        }
        window *= 2;
    }

    if log_n.len() < 2 {
        trace!("Hurst: fewer than two usable window sizes");
        return None;
    }

    let n = log_n.len() as f64;
    let x_mean = log_n.iter().sum::<f64>() / n;
    let y_mean = log_rs.iter().sum::<f64>() / n;

    let (numerator, denominator) = log_n
        .iter()
        .zip(&log_rs)
        .fold((0.0_f64, 0.0_f64), |(num, den), (x, y)| {
            let dx = x - x_mean;
            (num + dx * (y - y_mean), den + dx * dx)
        });

    if denominator.abs() < f64::EPSILON {
        return None;
    }

    let hurst = numerator / denominator;
    if !hurst.is_finite() {
        return None;
    }
    let hurst = hurst.clamp(0.0, 1.0);

    trace!(
        hurst = format!("{:.4}", hurst),
        points = log_n.len(),
        "Hurst exponent computed"
    );

    Some((hurst, log_n.len()))
}

/// Mean R/S over all non-flat chunks of length `window`.
fn average_rs(prices: &[f64], window: usize) -> Option<f64> {
    let mut rs_sum = 0.0_f64;
    let mut valid = 0_usize;

    for chunk in prices.chunks_exact(window) {
        let mean = chunk.iter().sum::<f64>() / window as f64;
        let std_dev =
            (chunk.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / window as f64).sqrt();
        if std_dev < f64::EPSILON * mean.abs().max(1.0) {
            continue;
        }

        let mut running = 0.0_f64;
        let mut hi = f64::NEG_INFINITY;
        let mut lo = f64::INFINITY;
        for &val in chunk {
            running += val - mean;
            hi = hi.max(running);
            lo = lo.min(running);
        }

        let rs = (hi - lo) / std_dev;
        if rs > 0.0 && rs.is_finite() {
            rs_sum += rs;
            valid += 1;
        }
    }

    (valid > 0).then(|| rs_sum / valid as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trending_series(len: usize) -> Vec<f64> {
        let mut v = Vec::with_capacity(len);
        let mut price = 100.0;
        for i in 0..len {
            price += 0.5 + 0.1 * (i as f64).sin().abs();
            v.push(price);
        }
        v
    }

    fn mean_reverting_series(len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| 100.0 + if i % 2 == 0 { 5.0 } else { -5.0 })
            .collect()
    }

    fn pseudorandom_walk(len: usize, seed: u64) -> Vec<f64> {
        let mut v = Vec::with_capacity(len);
        let mut price = 100.0;
        let mut state = seed;
        for _ in 0..len {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            price += (state as f64 / u64::MAX as f64) - 0.5;
            v.push(price);
        }
        v
    }

    #[test]
    fn constant_series_is_neutral() {
        let h = HurstExponentCalculator.calculate(&vec![100.0; 100]);
        assert_eq!(h.exponent, 0.5);
        assert_eq!(h.window_sizes_used, 0);
        assert_eq!(h.interpretation.behavior, PersistenceBehavior::RandomWalk);
        assert!(!h.interpretation.should_trade);
    }

    #[test]
    fn short_series_is_neutral() {
        for len in [0, 1, 2, 10, MIN_POINTS - 1] {
            let prices: Vec<f64> = (0..len).map(|i| i as f64).collect();
            assert_eq!(HurstExponentCalculator.calculate(&prices).exponent, 0.5);
        }
    }

    #[test]
    fn trending_series_high_hurst() {
        let h = HurstExponentCalculator.calculate(&trending_series(256));
        assert!(h.exponent > 0.55, "got {:.4}", h.exponent);
        assert_eq!(h.interpretation.behavior, PersistenceBehavior::Trending);
        assert_eq!(h.interpretation.strategy_type, StrategyType::TrendFollowing);
    }

    #[test]
    fn mean_reverting_series_low_hurst() {
        let h = HurstExponentCalculator.calculate(&mean_reverting_series(256));
        assert!(h.exponent < 0.45, "got {:.4}", h.exponent);
        assert_eq!(h.interpretation.behavior, PersistenceBehavior::MeanReverting);
    }

    #[test]
    fn random_walk_broadly_near_half() {
        let h = HurstExponentCalculator.calculate(&pseudorandom_walk(512, 123_456_789));
        assert!((0.25..=1.0).contains(&h.exponent), "got {:.4}", h.exponent);
    }

    #[test]
    fn exponent_always_in_unit_interval() {
        for len in [32, 50, 64, 100, 333] {
            let h = HurstExponentCalculator.calculate(&pseudorandom_walk(len, 42 + len as u64));
            assert!((0.0..=1.0).contains(&h.exponent));
        }
    }

    #[test]
    fn nan_input_is_neutral() {
        let mut prices = trending_series(128);
        prices[10] = f64::NAN;
        assert_eq!(HurstExponentCalculator.calculate(&prices).exponent, 0.5);
    }

    #[test]
    fn interpretation_bands() {
        let calc = HurstExponentCalculator;
        assert_eq!(calc.interpret(0.44).behavior, PersistenceBehavior::MeanReverting);
        assert_eq!(calc.interpret(0.45).behavior, PersistenceBehavior::RandomWalk);
        assert_eq!(calc.interpret(0.55).behavior, PersistenceBehavior::RandomWalk);
        assert_eq!(calc.interpret(0.56).behavior, PersistenceBehavior::Trending);
        assert!((calc.interpret(0.75).confidence - 1.0).abs() < 1e-12);
        assert!((calc.interpret(0.6).confidence - 0.4).abs() < 1e-9);
        assert_eq!(calc.interpret(f64::NAN).behavior, PersistenceBehavior::RandomWalk);
    }

    #[test]
    fn determinism() {
        let prices = trending_series(256);
        let a = HurstExponentCalculator.calculate(&prices).exponent;
        let b = HurstExponentCalculator.calculate(&prices).exponent;
        assert_eq!(a, b);
    }
}
