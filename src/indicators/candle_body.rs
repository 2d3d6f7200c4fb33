// =============================================================================
// Candle body statistics
// =============================================================================

use crate::market_data::Candle;

/// Mean |close - open| over `candles`. Returns 0.0 for fewer than two
/// candles, matching the ATR helper's short-input behaviour.
pub fn average_body(candles: &[Candle]) -> f64 {
    if candles.len() < 2 {
        return 0.0;
    }
    let avg = candles.iter().map(Candle::body).sum::<f64>() / candles.len() as f64;
    if avg.is_finite() {
        avg
    } else {
        0.0
    }
}

/// Mean wick-to-open intensity in basis points:
/// `((upper_wick + lower_wick) / open) * 10_000`, averaged over candles with
/// a positive open. Empty input gives 0.0.
pub fn wick_intensity_bps(candles: &[Candle]) -> f64 {
    let scores: Vec<f64> = candles
        .iter()
        .filter(|c| c.open > 0.0 && c.open.is_finite())
        .map(|c| (c.upper_wick() + c.lower_wick()) / c.open * 10_000.0)
        .filter(|s| s.is_finite())
        .collect();
    if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle::new(0, open, high, low, close, 1.0, 0)
    }

    #[test]
    fn average_body_of_series() {
        let candles = vec![
            candle(100.0, 105.0, 95.0, 102.0),
            candle(102.0, 108.0, 100.0, 106.0),
            candle(106.0, 112.0, 104.0, 110.0),
        ];
        assert!((average_body(&candles) - (2.0 + 4.0 + 4.0) / 3.0).abs() < 1e-12);
    }

    #[test]
    fn short_input_is_zero() {
        assert_eq!(average_body(&[]), 0.0);
        assert_eq!(average_body(&[candle(100.0, 105.0, 95.0, 102.0)]), 0.0);
    }

    #[test]
    fn wick_intensity() {
        // Upper wick 3, lower wick 5, open 100 => 800 bps.
        let c = candle(100.0, 105.0, 95.0, 102.0);
        assert!((wick_intensity_bps(&[c.clone()]) - 800.0).abs() < 1e-9);
        // A full-body candle has no wicks.
        let marubozu = candle(100.0, 110.0, 100.0, 110.0);
        assert!((wick_intensity_bps(&[c, marubozu]) - 400.0).abs() < 1e-9);
        assert_eq!(wick_intensity_bps(&[]), 0.0);
        assert_eq!(wick_intensity_bps(&[candle(0.0, 1.0, 0.0, 1.0)]), 0.0);
    }
}
