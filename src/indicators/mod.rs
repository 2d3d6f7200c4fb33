// =============================================================================
// Candle Indicators Module
// =============================================================================
//
// Pure helpers over OHLCV candles used to give the AI prompt concrete
// numbers. Short or non-finite input collapses to 0.0 rather than NaN.

pub mod atr;
pub mod candle_body;
