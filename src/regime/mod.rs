// =============================================================================
// Regime Detection Module
// =============================================================================
//
// Market regime classification from two independent views of a price series:
// - Hurst exponent (persistence vs mean-reversion)
// - GARCH-filtered volatility (calm vs turbulent)

pub mod detector;
pub mod hurst;

pub use detector::{RegimeDetector, RegimeResult, RegimeType};
pub use hurst::{HurstExponentCalculator, HurstResult, PersistenceBehavior};
