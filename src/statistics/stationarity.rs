// =============================================================================
// Stationarity — split-half variance / mean comparison
// =============================================================================
//
// Raw prices are rarely stationary: their level drifts and their variance
// scales with price. Before feeding a series into a model that assumes
// stationarity, compare the two halves of the sample:
//
//   variance_ratio  = var(second half) / var(first half)
//   mean_difference = |mean2 - mean1| / pooled standard deviation
//
// A ratio outside [0.5, 2.0] means the variance is unstable (use log
// returns); a standardised mean shift above 1.0 means the level drifts (use
// differencing). Series shorter than MIN_WINDOW are not judged at all.

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Minimum sample size for a verdict.
const MIN_WINDOW: usize = 20;

const MAX_VARIANCE_RATIO: f64 = 2.0;
const MIN_VARIANCE_RATIO: f64 = 0.5;
const MAX_MEAN_DIFFERENCE: f64 = 1.0;

/// Transform suggested for a non-stationary series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StationarityRecommendation {
    /// Series already looks stationary.
    None,
    /// Variance is unstable: work on log returns.
    LogReturns,
    /// Level drifts but variance is stable: first-difference the series.
    Differencing,
    /// Too few points to judge.
    InsufficientData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationarityReport {
    pub is_stationary: bool,
    pub variance_ratio: f64,
    pub mean_difference: f64,
    pub recommendation: StationarityRecommendation,
}

/// `ln(p[i] / p[i-1])` for every consecutive pair.
///
/// Output length is always `prices.len() - 1` (or 0). Pairs containing a
/// non-positive or non-finite price contribute a 0.0 return instead of NaN.
pub fn to_log_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .map(|w| {
            let (prev, curr) = (w[0], w[1]);
            if prev > 0.0 && curr > 0.0 && prev.is_finite() && curr.is_finite() {
                (curr / prev).ln()
            } else {
                0.0
            }
        })
        .collect()
}

/// Apply first-order differencing `order` times. Each pass shortens the
/// series by one; asking for more passes than the series supports yields an
/// empty vector.
pub fn difference(series: &[f64], order: usize) -> Vec<f64> {
    let mut out = series.to_vec();
    for _ in 0..order {
        if out.len() < 2 {
            return Vec::new();
        }
        out = out.windows(2).map(|w| w[1] - w[0]).collect();
    }
    out
}

/// Compare the two halves of `prices` and recommend a transform when the
/// series looks non-stationary.
pub fn test_stationarity(prices: &[f64]) -> StationarityReport {
    if prices.len() < MIN_WINDOW {
        trace!(len = prices.len(), min = MIN_WINDOW, "stationarity: insufficient data");
        return StationarityReport {
            is_stationary: true,
            variance_ratio: 1.0,
            mean_difference: 0.0,
            recommendation: StationarityRecommendation::InsufficientData,
        };
    }

    let mid = prices.len() / 2;
    let (first, second) = prices.split_at(mid);

    let (mean1, var1) = mean_variance(first);
    let (mean2, var2) = mean_variance(second);

    let variance_ratio = if var1 < f64::EPSILON && var2 < f64::EPSILON {
        1.0
    } else if var1 < f64::EPSILON {
        f64::MAX
    } else {
        var2 / var1
    };

    let pooled_sd = ((var1 + var2) / 2.0).sqrt();
    let mean_difference = if pooled_sd < f64::EPSILON {
        if (mean2 - mean1).abs() < f64::EPSILON {
            0.0
        } else {
            f64::MAX
        }
    } else {
        (mean2 - mean1).abs() / pooled_sd
    };

    let unstable_variance =
        !(MIN_VARIANCE_RATIO..=MAX_VARIANCE_RATIO).contains(&variance_ratio);
    let drifting_mean = mean_difference > MAX_MEAN_DIFFERENCE;

    let recommendation = if unstable_variance {
        StationarityRecommendation::LogReturns
    } else if drifting_mean {
        StationarityRecommendation::Differencing
    } else {
        StationarityRecommendation::None
    };

    trace!(
        variance_ratio = format!("{:.4}", variance_ratio),
        mean_difference = format!("{:.4}", mean_difference),
        ?recommendation,
        "stationarity tested"
    );

    StationarityReport {
        is_stationary: !unstable_variance && !drifting_mean,
        variance_ratio,
        mean_difference,
        recommendation,
    }
}

/// Population mean and variance.
fn mean_variance(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var)
}
