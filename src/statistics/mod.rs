// =============================================================================
// Statistics Module
// =============================================================================
//
// Pure, synchronous time-series helpers. None of them fail on numerically
// degenerate input; they degrade to neutral values instead:
// - stationarity (split-half variance / mean test, log returns, differencing)
// - autocorrelation (Durbin-Watson on regression residuals)
// - regression (OLS trend line with autocorrelation-adjusted R²)
// - garch (GARCH(1,1) conditional variance and volatility regimes)

pub mod autocorrelation;
pub mod garch;
pub mod regression;
pub mod stationarity;

pub use garch::{GarchHelper, GarchParams, VolatilityRegime, VolatilityState};
pub use regression::RegressionResult;
