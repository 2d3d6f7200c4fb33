// =============================================================================
// Durbin-Watson — first-order serial correlation in residuals
// =============================================================================
//
//   DW = Σ_{i=1}^{n-1} (e[i] - e[i-1])² / Σ_{i=0}^{n-1} e[i]²
//
//   DW ~ 2  =>  no autocorrelation
//   DW → 0  =>  strong positive autocorrelation
//   DW → 4  =>  strong negative autocorrelation
//
// The lag-1 autocorrelation is approximated by ρ ≈ 1 - DW / 2.

use serde::{Deserialize, Serialize};
use tracing::trace;

const LOWER_BOUND: f64 = 1.5;
const UPPER_BOUND: f64 = 2.5;

/// How far the statistic sits from the no-autocorrelation value of 2.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutocorrelationSeverity {
    None,
    Mild,
    Moderate,
    Severe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutocorrelationCheck {
    pub has_autocorrelation: bool,
    pub severity: AutocorrelationSeverity,
    pub statistic: f64,
    /// Approximate lag-1 autocorrelation in [-1, 1].
    pub rho: f64,
}

/// Durbin-Watson statistic in [0, 4]. Returns the neutral 2.0 for fewer than
/// two residuals or an all-zero residual vector.
pub fn calculate_durbin_watson(residuals: &[f64]) -> f64 {
    if residuals.len() < 2 {
        return 2.0;
    }

    let denominator: f64 = residuals.iter().map(|e| e * e).sum();
    if denominator < f64::EPSILON || !denominator.is_finite() {
        trace!("Durbin-Watson: degenerate residuals, returning 2.0");
        return 2.0;
    }

    let numerator: f64 = residuals
        .windows(2)
        .map(|w| (w[1] - w[0]).powi(2))
        .sum();

    (numerator / denominator).clamp(0.0, 4.0)
}

/// Flag residuals whose statistic falls outside [1.5, 2.5] and grade the
/// severity by the distance from 2.0.
pub fn has_significant_autocorrelation(residuals: &[f64]) -> AutocorrelationCheck {
    let statistic = calculate_durbin_watson(residuals);
    let distance = (statistic - 2.0).abs();

    let has_autocorrelation = !(LOWER_BOUND..=UPPER_BOUND).contains(&statistic);
    let severity = if !has_autocorrelation {
        AutocorrelationSeverity::None
    } else if distance <= 1.0 {
        AutocorrelationSeverity::Mild
    } else if distance <= 1.5 {
        AutocorrelationSeverity::Moderate
    } else {
        AutocorrelationSeverity::Severe
    };

    AutocorrelationCheck {
        has_autocorrelation,
        severity,
        statistic,
        rho: (1.0 - statistic / 2.0).clamp(-1.0, 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternating_residuals_near_four() {
        let residuals: Vec<f64> = (0..100).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let dw = calculate_durbin_watson(&residuals);
        assert!(dw > 3.9, "expected DW near 4, got {dw}");
        assert!(dw <= 4.0);
    }

    #[test]
    fn correlated_residuals_near_zero() {
        let residuals = vec![1.0; 100];
        let dw = calculate_durbin_watson(&residuals);
        assert!(dw < 0.01, "expected DW near 0, got {dw}");
    }

    #[test]
    fn degenerate_inputs_are_neutral() {
        assert_eq!(calculate_durbin_watson(&[]), 2.0);
        assert_eq!(calculate_durbin_watson(&[3.0]), 2.0);
        assert_eq!(calculate_durbin_watson(&[0.0; 10]), 2.0);
    }

    #[test]
    fn statistic_always_in_range() {
        let mut state: u64 = 88_172_645_463_325_252;
        let residuals: Vec<f64> = (0..500)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state as f64 / u64::MAX as f64) - 0.5
            })
            .collect();
        let dw = calculate_durbin_watson(&residuals);
        assert!((0.0..=4.0).contains(&dw));
        // White noise should sit near 2.
        assert!((1.6..=2.4).contains(&dw), "white noise DW={dw}");
    }

    #[test]
    fn severity_grading() {
        let smooth: Vec<f64> = (0..100).map(|i| (i as f64 / 10.0).sin()).collect();
        let check = has_significant_autocorrelation(&smooth);
        assert!(check.has_autocorrelation);
        assert_eq!(check.severity, AutocorrelationSeverity::Severe);
        assert!(check.rho > 0.9);

        let alternating: Vec<f64> = (0..100).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let check = has_significant_autocorrelation(&alternating);
        assert!(check.has_autocorrelation);
        assert_eq!(check.severity, AutocorrelationSeverity::Severe);
        assert!(check.rho < -0.9);
    }

    #[test]
    fn no_flag_inside_band() {
        let check = has_significant_autocorrelation(&[0.0; 5]);
        assert!(!check.has_autocorrelation);
        assert_eq!(check.severity, AutocorrelationSeverity::None);
    }
}
