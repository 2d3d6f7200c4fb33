// =============================================================================
// Prompt builder
// =============================================================================
//
// The prompt gives the model concrete numbers only: recent price action,
// order-book imbalance, wick intensity, ATR and average candle body, plus
// the symbol's current strategy parameters when there are any. The answer
// format section mirrors the checks in `ai::validator`.

use std::fmt::Write as _;

use crate::indicators::atr::{calculate_atr, calculate_atr_pct};
use crate::indicators::candle_body::average_body;
use crate::market_data::MarketMicroData;
use crate::types::{AiAnalysisResult, Direction};

/// Number of candles rendered individually in the price-action table.
const PRICE_ACTION_ROWS: usize = 10;

/// Parameters the symbol is currently trading with.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyContext {
    pub tendance: Direction,
    pub sigma: f64,
    pub take_profit_pnl_click: f64,
    pub confidence: f64,
}

impl From<&AiAnalysisResult> for StrategyContext {
    fn from(r: &AiAnalysisResult) -> Self {
        Self {
            tendance: r.tendance,
            sigma: r.sigma,
            take_profit_pnl_click: r.take_profit_pnl_click,
            confidence: r.confidence,
        }
    }
}

pub fn build_prompt(data: &MarketMicroData, strategy: Option<&StrategyContext>) -> String {
    let mut p = String::with_capacity(2048);

    let _ = writeln!(
        p,
        "You are a quantitative crypto analyst. Decide whether {} should be traded LONG, SHORT, or WAIT right now.",
        data.symbol
    );
    p.push('\n');

    // ── Market snapshot ──────────────────────────────────────────────────
    let _ = writeln!(p, "## Market snapshot");
    let _ = writeln!(p, "- Last price: {}", fmt_price(data.last_price));
    let _ = writeln!(
        p,
        "- Order-book imbalance (top levels): {:+.4} (bid volume {:.4}, ask volume {:.4})",
        data.imbalance, data.bid_volume, data.ask_volume
    );
    let _ = writeln!(p, "- Wick volatility score: {:.2} bps", data.volatility_score);

    let atr = calculate_atr(&data.klines);
    let _ = writeln!(
        p,
        "- ATR({}): {} ({:.3}% of price)",
        data.klines.len().saturating_sub(1),
        fmt_price(atr),
        calculate_atr_pct(&data.klines)
    );
    let _ = writeln!(p, "- Average candle body: {}", fmt_price(average_body(&data.klines)));

    if let (Some(first), Some(last)) = (data.klines.first(), data.klines.last()) {
        if first.open > 0.0 {
            let change = (last.close - first.open) / first.open * 100.0;
            let _ = writeln!(p, "- Change over {} candles: {:+.3}%", data.klines.len(), change);
        }
    }
    p.push('\n');

    // ── Price action ─────────────────────────────────────────────────────
    let _ = writeln!(p, "## Recent candles (oldest first)");
    if data.klines.is_empty() {
        let _ = writeln!(p, "No candle data available.");
    } else {
        let _ = writeln!(p, "open | high | low | close | volume");
        let start = data.klines.len().saturating_sub(PRICE_ACTION_ROWS);
        for c in &data.klines[start..] {
            let _ = writeln!(
                p,
                "{} | {} | {} | {} | {:.2}",
                fmt_price(c.open),
                fmt_price(c.high),
                fmt_price(c.low),
                fmt_price(c.close),
                c.volume
            );
        }
    }
    p.push('\n');

    // ── Current strategy ─────────────────────────────────────────────────
    if let Some(s) = strategy {
        let _ = writeln!(p, "## Current strategy parameters");
        let _ = writeln!(p, "- Previous tendance: {} (confidence {:.2})", s.tendance, s.confidence);
        let _ = writeln!(p, "- Sigma (inversion threshold): {:.4}", s.sigma);
        let _ = writeln!(p, "- Take-profit step: {:.4}", s.take_profit_pnl_click);
        p.push('\n');
    }

    // ── Answer format ────────────────────────────────────────────────────
    let _ = writeln!(p, "## Answer format");
    let _ = writeln!(p, "Reply with a single JSON object and nothing else:");
    let _ = writeln!(
        p,
        r#"{{"tendance": "LONG" | "SHORT" | "WAIT", "confidence": 0.0-1.0, "sigma": 0.001-0.05, "takeProfitPnlClick": 0.0005-0.02, "reasoning": "..."}}"#
    );
    let _ = writeln!(p, "Rules:");
    let _ = writeln!(p, "- If confidence is below 0.5, tendance MUST be \"WAIT\".");
    let _ = writeln!(p, "- Answer \"WAIT\" when the data is ambiguous; you will be asked again shortly.");
    let _ = writeln!(
        p,
        "- reasoning must be at least 30 characters and cite the metrics above (imbalance, ATR, wick volatility, candle bodies, price levels)."
    );

    p
}

/// Prices span several orders of magnitude across symbols; keep roughly
/// six significant digits.
fn fmt_price(v: f64) -> String {
    let abs = v.abs();
    if abs >= 1000.0 {
        format!("{v:.2}")
    } else if abs >= 1.0 {
        format!("{v:.4}")
    } else {
        format!("{v:.8}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::Candle;

    fn snapshot() -> MarketMicroData {
        MarketMicroData {
            symbol: "BTCUSDT".into(),
            last_price: 110.0,
            imbalance: 0.25,
            bid_volume: 5.0,
            ask_volume: 3.0,
            volatility_score: 640.0,
            klines: vec![
                Candle::new(0, 100.0, 105.0, 95.0, 102.0, 10.0, 59_999),
                Candle::new(60_000, 102.0, 108.0, 100.0, 106.0, 11.0, 119_999),
                Candle::new(120_000, 106.0, 112.0, 104.0, 110.0, 12.0, 179_999),
            ],
            timestamp: 0,
        }
    }

    #[test]
    fn embeds_market_metrics() {
        let prompt = build_prompt(&snapshot(), None);
        assert!(prompt.contains("BTCUSDT"));
        assert!(prompt.contains("+0.2500"));
        assert!(prompt.contains("640.00 bps"));
        assert!(prompt.contains("ATR(2): 8.0000"));
        assert!(prompt.contains("Average candle body: 3.3333"));
        assert!(prompt.contains("takeProfitPnlClick"));
        assert!(!prompt.contains("Current strategy parameters"));
    }

    #[test]
    fn includes_strategy_context_when_present() {
        let ctx = StrategyContext {
            tendance: Direction::Long,
            sigma: 0.012,
            take_profit_pnl_click: 0.004,
            confidence: 0.8,
        };
        let prompt = build_prompt(&snapshot(), Some(&ctx));
        assert!(prompt.contains("Previous tendance: LONG (confidence 0.80)"));
        assert!(prompt.contains("Sigma (inversion threshold): 0.0120"));
    }

    #[test]
    fn empty_klines_are_stated() {
        let mut data = snapshot();
        data.klines.clear();
        let prompt = build_prompt(&data, None);
        assert!(prompt.contains("No candle data available."));
        assert!(prompt.contains("ATR(0): 0.00000000"));
    }

    #[test]
    fn price_formatting_scales_with_magnitude() {
        assert_eq!(fmt_price(64123.456), "64123.46");
        assert_eq!(fmt_price(2.5), "2.5000");
        assert_eq!(fmt_price(0.00001234), "0.00001234");
    }
}
