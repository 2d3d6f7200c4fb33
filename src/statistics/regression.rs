// =============================================================================
// Linear Regression — OLS trend line with autocorrelation-aware R²
// =============================================================================
//
// Fits price[i] = intercept + slope * i by ordinary least squares.
//
// Trending price series almost always leave serially correlated residuals,
// which inflate the naive R². After the fit the residuals go through the
// Durbin-Watson check; when autocorrelation is significant the unexplained
// share of variance is inflated by the estimated lag-1 correlation:
//
//   adjusted R² = max(0, 1 - (1 - R²) * (1 + k * |ρ|))
//
// with k = 1.0 / 1.5 / 2.0 for mild / moderate / severe autocorrelation.
// A near-perfect fit therefore stays near 1, while a noisy fit riding on a
// smooth residual wave is pushed towards 0.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::statistics::autocorrelation::{
    has_significant_autocorrelation, AutocorrelationSeverity,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegressionResult {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub adjusted_r_squared: f64,
    /// Aligned index-for-index with the input.
    pub residuals: Vec<f64>,
    /// Aligned index-for-index with the input.
    pub predictions: Vec<f64>,
    pub durbin_watson: f64,
}

/// Fit an OLS trend line over `prices` (x = sample index).
///
/// Never fails: an empty input gives empty vectors and zero coefficients; a
/// single point gives a flat line through it; a constant series gives
/// R² = 0.
pub fn calculate(prices: &[f64]) -> RegressionResult {
    let n = prices.len();
    if n == 0 {
        return RegressionResult {
            durbin_watson: 2.0,
            ..Default::default()
        };
    }

    let nf = n as f64;
    let x_mean = (nf - 1.0) / 2.0;
    let y_mean = prices.iter().sum::<f64>() / nf;

    let mut sxy = 0.0_f64;
    let mut sxx = 0.0_f64;
    for (i, &y) in prices.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxy += dx * (y - y_mean);
        sxx += dx * dx;
    }

    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    let intercept = y_mean - slope * x_mean;

    let predictions: Vec<f64> = (0..n).map(|i| intercept + slope * i as f64).collect();
    let residuals: Vec<f64> = prices
        .iter()
        .zip(&predictions)
        .map(|(y, y_hat)| y - y_hat)
        .collect();

    let ss_res: f64 = residuals.iter().map(|e| e * e).sum();
    let ss_tot: f64 = prices.iter().map(|y| (y - y_mean).powi(2)).sum();

    let r_squared = if ss_tot > f64::EPSILON {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let check = has_significant_autocorrelation(&residuals);

    // A fit whose residuals are pure rounding noise has nothing to deflate.
    let perfect_fit = ss_res <= ss_tot * 1e-12;

    let adjusted_r_squared = if check.has_autocorrelation && !perfect_fit {
        let k = match check.severity {
            AutocorrelationSeverity::None => 0.0,
            AutocorrelationSeverity::Mild => 1.0,
            AutocorrelationSeverity::Moderate => 1.5,
            AutocorrelationSeverity::Severe => 2.0,
        };
        (1.0 - (1.0 - r_squared) * (1.0 + k * check.rho.abs())).clamp(0.0, 1.0)
    } else {
        r_squared
    };

    trace!(
        n,
        slope = format!("{:.6}", slope),
        r_squared = format!("{:.4}", r_squared),
        adjusted = format!("{:.4}", adjusted_r_squared),
        dw = format!("{:.3}", check.statistic),
        "regression fitted"
    );

    RegressionResult {
        slope,
        intercept,
        r_squared,
        adjusted_r_squared,
        residuals,
        predictions,
        durbin_watson: check.statistic,
    }
}

impl RegressionResult {
    /// Standard error of the residuals, sqrt(SS_res / (n - 2)). Zero for
    /// fewer than three points.
    pub fn residual_std_error(&self) -> f64 {
        let n = self.residuals.len();
        if n < 3 {
            return 0.0;
        }
        let ss_res: f64 = self.residuals.iter().map(|e| e * e).sum();
        (ss_res / (n - 2) as f64).sqrt()
    }

    /// Slope divided by the mean fitted price (equal to the sample mean for
    /// OLS). Zero when that mean is not strictly positive.
    pub fn slope_normalized(&self) -> f64 {
        if self.predictions.is_empty() {
            return 0.0;
        }
        let mean = self.predictions.iter().sum::<f64>() / self.predictions.len() as f64;
        if mean > 0.0 && mean.is_finite() {
            self.slope / mean
        } else {
            0.0
        }
    }
}

/// Slope divided by the mean price: fractional drift per sample, comparable
/// across symbols with different price scales. Returns 0.0 when the mean is
/// not strictly positive.
pub fn get_slope_normalized(prices: &[f64]) -> f64 {
    calculate(prices).slope_normalized()
}
