// =============================================================================
// Average True Range (ATR) — simple mean over the look-back window
// =============================================================================
//
// True Range for each candle after the first:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR is the arithmetic mean of those TR values. The first candle only
// supplies the previous close, so n candles yield n - 1 TR values.
// =============================================================================

use crate::market_data::Candle;

/// Mean True Range over `candles` (oldest first).
///
/// Returns 0.0 when fewer than two candles are supplied or when any TR is
/// non-finite, so prompt builders never see NaN.
pub fn calculate_atr(candles: &[Candle]) -> f64 {
    if candles.len() < 2 {
        return 0.0;
    }

    let tr_values: Vec<f64> = candles
        .windows(2)
        .map(|w| true_range(&w[1], w[0].close))
        .collect();

    let atr = tr_values.iter().sum::<f64>() / tr_values.len() as f64;
    if atr.is_finite() {
        atr
    } else {
        0.0
    }
}

/// ATR as a percentage of the last close; 0.0 when undefined.
pub fn calculate_atr_pct(candles: &[Candle]) -> f64 {
    let atr = calculate_atr(candles);
    match candles.last() {
        Some(last) if last.close > 0.0 => (atr / last.close) * 100.0,
        _ => 0.0,
    }
}

fn true_range(candle: &Candle, prev_close: f64) -> f64 {
    let hl = candle.high - candle.low;
    let hc = (candle.high - prev_close).abs();
    let lc = (candle.low - prev_close).abs();
    hl.max(hc).max(lc)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle::new(0, open, high, low, close, 100.0, 0)
    }

    #[test]
    fn worked_example_is_exactly_eight() {
        let candles = vec![
            candle(100.0, 105.0, 95.0, 102.0),
            candle(102.0, 108.0, 100.0, 106.0),
            candle(106.0, 112.0, 104.0, 110.0),
        ];
        assert_eq!(calculate_atr(&candles), 8.0);
    }

    #[test]
    fn fewer_than_two_candles_is_zero() {
        assert_eq!(calculate_atr(&[]), 0.0);
        assert_eq!(calculate_atr(&[candle(100.0, 105.0, 95.0, 102.0)]), 0.0);
        assert_eq!(calculate_atr_pct(&[]), 0.0);
    }

    #[test]
    fn gap_uses_previous_close() {
        let candles = vec![
            candle(100.0, 105.0, 95.0, 95.0),
            candle(110.0, 115.0, 108.0, 112.0), // |115 - 95| = 20 > 7
        ];
        assert_eq!(calculate_atr(&candles), 20.0);
    }

    #[test]
    fn nan_collapses_to_zero() {
        let candles = vec![
            candle(100.0, 105.0, 95.0, 100.0),
            candle(100.0, f64::NAN, 95.0, 100.0),
            candle(100.0, 105.0, 95.0, 100.0),
        ];
        let atr = calculate_atr(&candles);
        assert!(atr.is_finite());
    }

    #[test]
    fn pct_scales_by_last_close() {
        let candles = vec![
            candle(100.0, 105.0, 95.0, 102.0),
            candle(102.0, 108.0, 100.0, 106.0),
            candle(106.0, 112.0, 104.0, 110.0),
        ];
        assert!((calculate_atr_pct(&candles) - 8.0 / 110.0 * 100.0).abs() < 1e-12);
    }
}
