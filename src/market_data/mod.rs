pub mod candle_buffer;
pub mod micro_data;
pub mod provider;

// Re-export the Candle struct for convenient access (e.g. `use crate::market_data::Candle`).
pub use candle_buffer::{Candle, CandleBuffer, CandleKey};
pub use micro_data::{MarketMicroData, MarketMicroDataCalculator, MicroDataSettings};
pub use provider::{BookLevel, MarketDataProvider, OrderBookDepth};
