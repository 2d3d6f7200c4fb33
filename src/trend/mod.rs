// =============================================================================
// Trend Module
// =============================================================================
//
// Fuses regression, persistence and regime into the primary TrendResult.

pub mod calculator;

pub use calculator::{TrendCalculatorService, TrendParams};
