// =============================================================================
// Trend Sentinel — library root
// =============================================================================
//
// The statistical trend engine and the AI confirmation loop are usable on
// their own; the `trend-sentinel` binary wires them to Binance, Gemini and
// the REST API.
//
//   statistics / regime / trend   pure series analysis, TrendResult
//   market_data / indicators      candles, micro data, prompt metrics
//   ai                            prompt, validation, retry loop, cache
//   binance / api / app_state     exchange I/O, HTTP surface, shared state
// =============================================================================

pub mod ai;
pub mod api;
pub mod app_state;
pub mod binance;
pub mod error;
pub mod indicators;
pub mod market_data;
pub mod regime;
pub mod runtime_config;
pub mod statistics;
pub mod trend;
pub mod types;

pub use error::{AiProviderError, AnalysisError, ValidationError};
pub use trend::{TrendCalculatorService, TrendParams};
pub use types::{AiAnalysisResult, Direction, TrendResult};
