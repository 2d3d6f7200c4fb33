// =============================================================================
// AI response validation
// =============================================================================
//
// Untrusted text in, typed result out:
//   1. strip markdown code fences
//   2. locate the first balanced `{...}` block (string-aware)
//   3. deserialize into a raw schema
//   4. enforce ranges, the low-confidence fail-safe and reasoning quality
//
// Any failure is a `ValidationError`; the caller spends one retry on it.

use chrono::Utc;
use serde::Deserialize;

use crate::error::ValidationError;
use crate::types::{AiAnalysisResult, Direction};

pub const MIN_REASONING_CHARS: usize = 30;
pub const MIN_DIRECTIONAL_CONFIDENCE: f64 = 0.5;
pub const SIGMA_RANGE: (f64, f64) = (0.001, 0.05);
pub const TAKE_PROFIT_RANGE: (f64, f64) = (0.0005, 0.02);

/// Words that show the reasoning refers to the data it was given.
const METRIC_KEYWORDS: &[&str] = &[
    "imbalance",
    "volatility",
    "atr",
    "body",
    "bodies",
    "price",
    "volume",
    "wick",
    "spread",
    "momentum",
    "support",
    "resistance",
    "trend",
    "bid",
    "ask",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAiResponse {
    tendance: String,
    confidence: f64,
    sigma: f64,
    take_profit_pnl_click: f64,
    #[serde(default)]
    reasoning: String,
}

/// Parse and validate a raw model response for `symbol`.
pub fn validate_response(symbol: &str, text: &str) -> Result<AiAnalysisResult, ValidationError> {
    let json = extract_json(text).ok_or(ValidationError::NoJsonObject)?;
    let raw: RawAiResponse =
        serde_json::from_str(json).map_err(|e| ValidationError::MalformedJson(e.to_string()))?;

    let tendance =
        Direction::parse(&raw.tendance).ok_or_else(|| ValidationError::InvalidTendance(raw.tendance.clone()))?;

    if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
        return Err(ValidationError::ConfidenceOutOfRange(raw.confidence));
    }
    if tendance.is_directional() && raw.confidence < MIN_DIRECTIONAL_CONFIDENCE {
        return Err(ValidationError::LowConfidenceDirectional {
            tendance: tendance.to_string(),
            confidence: raw.confidence,
        });
    }
    if !in_range(raw.sigma, SIGMA_RANGE) {
        return Err(ValidationError::SigmaOutOfRange(raw.sigma));
    }
    if !in_range(raw.take_profit_pnl_click, TAKE_PROFIT_RANGE) {
        return Err(ValidationError::TakeProfitOutOfRange(raw.take_profit_pnl_click));
    }

    let reasoning = raw.reasoning.trim();
    let chars = reasoning.chars().count();
    if chars < MIN_REASONING_CHARS {
        return Err(ValidationError::ReasoningTooShort(chars));
    }
    if !references_metrics(reasoning) {
        return Err(ValidationError::GenericReasoning);
    }

    Ok(AiAnalysisResult {
        symbol: symbol.to_string(),
        tendance,
        sigma: raw.sigma,
        take_profit_pnl_click: raw.take_profit_pnl_click,
        confidence: raw.confidence,
        reasoning: reasoning.to_string(),
        timestamp: Utc::now().timestamp_millis(),
    })
}

fn in_range(v: f64, (lo, hi): (f64, f64)) -> bool {
    v.is_finite() && v >= lo && v <= hi
}

fn references_metrics(reasoning: &str) -> bool {
    if reasoning.chars().any(|c| c.is_ascii_digit()) {
        return true;
    }
    let lower = reasoning.to_lowercase();
    METRIC_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// First balanced `{...}` block in `text`, after removing code fences.
///
/// Braces inside JSON strings (and escaped quotes) are skipped, so a
/// reasoning field containing `}` does not end the object early.
pub fn extract_json(text: &str) -> Option<&str> {
    let body = strip_code_fences(text);
    let bytes = body.as_bytes();
    let start = body.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&body[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Content of the first fenced block when it holds an object, otherwise
/// `text`. The fence may open and close on the same line; the language tag
/// ("json", ...) is left in place since it never contains a brace.
fn strip_code_fences(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    let after = &text[open + 3..];
    let block = match after.find("```") {
        Some(close) => &after[..close],
        None => after,
    };
    if block.contains('{') {
        block
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REASONING: &str = "Imbalance at +0.31 and ATR expanding above the average body";

    fn payload(tendance: &str, confidence: f64) -> String {
        format!(
            r#"{{"tendance":"{tendance}","confidence":{confidence},"sigma":0.005,"takeProfitPnlClick":0.002,"reasoning":"{REASONING}"}}"#
        )
    }

    #[test]
    fn accepts_confident_long() {
        let r = validate_response("BTCUSDT", &payload("LONG", 0.9)).unwrap();
        assert_eq!(r.tendance, Direction::Long);
        assert_eq!(r.symbol, "BTCUSDT");
        assert_eq!(r.confidence, 0.9);
    }

    #[test]
    fn rejects_low_confidence_directional_call() {
        let err = validate_response("BTCUSDT", &payload("LONG", 0.3)).unwrap_err();
        assert!(matches!(err, ValidationError::LowConfidenceDirectional { .. }));
        let err = validate_response("BTCUSDT", &payload("SHORT", 0.49)).unwrap_err();
        assert!(matches!(err, ValidationError::LowConfidenceDirectional { .. }));
    }

    #[test]
    fn accepts_low_confidence_wait() {
        let text = r#"{"tendance":"WAIT","confidence":0.2,"sigma":0.005,"takeProfitPnlClick":0.002,"reasoning":"Order book is balanced and price is flat."}"#;
        let r = validate_response("ETHUSDT", text).unwrap();
        assert_eq!(r.tendance, Direction::Wait);
        assert_eq!(r.confidence, 0.2);
    }

    #[test]
    fn range_checks() {
        let bad_sigma = r#"{"tendance":"WAIT","confidence":0.2,"sigma":0.2,"takeProfitPnlClick":0.002,"reasoning":"Price is flat with tiny wicks on every candle."}"#;
        assert!(matches!(
            validate_response("X", bad_sigma),
            Err(ValidationError::SigmaOutOfRange(_))
        ));
        let bad_tp = r#"{"tendance":"WAIT","confidence":0.2,"sigma":0.005,"takeProfitPnlClick":0.0001,"reasoning":"Price is flat with tiny wicks on every candle."}"#;
        assert!(matches!(
            validate_response("X", bad_tp),
            Err(ValidationError::TakeProfitOutOfRange(_))
        ));
        let bad_conf = r#"{"tendance":"WAIT","confidence":1.5,"sigma":0.005,"takeProfitPnlClick":0.002,"reasoning":"Price is flat with tiny wicks on every candle."}"#;
        assert!(matches!(
            validate_response("X", bad_conf),
            Err(ValidationError::ConfidenceOutOfRange(_))
        ));
        let bad_dir = r#"{"tendance":"BUY","confidence":0.9,"sigma":0.005,"takeProfitPnlClick":0.002,"reasoning":"Price is flat with tiny wicks on every candle."}"#;
        assert!(matches!(
            validate_response("X", bad_dir),
            Err(ValidationError::InvalidTendance(_))
        ));
    }

    #[test]
    fn reasoning_quality() {
        let short = r#"{"tendance":"WAIT","confidence":0.2,"sigma":0.005,"takeProfitPnlClick":0.002,"reasoning":"flat"}"#;
        assert_eq!(validate_response("X", short), Err(ValidationError::ReasoningTooShort(4)));
        let generic = r#"{"tendance":"WAIT","confidence":0.2,"sigma":0.005,"takeProfitPnlClick":0.002,"reasoning":"I am not sure what will happen next here."}"#;
        assert_eq!(validate_response("X", generic), Err(ValidationError::GenericReasoning));
    }

    #[test]
    fn extracts_from_fenced_and_chatty_text() {
        let fenced = format!("Sure!\n```json\n{}\n```\nGood luck.", payload("SHORT", 0.7));
        assert_eq!(validate_response("X", &fenced).unwrap().tendance, Direction::Short);

        let chatty = format!("My answer is {} as requested.", payload("LONG", 0.8));
        assert_eq!(validate_response("X", &chatty).unwrap().tendance, Direction::Long);
    }

    #[test]
    fn single_line_fence_followed_by_text() {
        let text = format!("```json {}```\nHope this helps.", payload("LONG", 0.9));
        assert_eq!(validate_response("X", &text).unwrap().tendance, Direction::Long);

        let text = format!("```{}```", payload("SHORT", 0.8));
        assert_eq!(validate_response("X", &text).unwrap().tendance, Direction::Short);
    }

    #[test]
    fn empty_fence_falls_back_to_whole_text() {
        let text = format!("```\n```\nAnswer: {}", payload("WAIT", 0.3));
        assert_eq!(validate_response("X", &text).unwrap().tendance, Direction::Wait);
    }

    #[test]
    fn braces_inside_strings_do_not_close_object() {
        let text = r#"{"a":"}{ \" }","b":{"c":1}} trailing"#;
        assert_eq!(extract_json(text), Some(r#"{"a":"}{ \" }","b":{"c":1}}"#));
    }

    #[test]
    fn missing_or_broken_json() {
        assert_eq!(validate_response("X", "no json here"), Err(ValidationError::NoJsonObject));
        assert_eq!(validate_response("X", r#"{"tendance": "LONG""#), Err(ValidationError::NoJsonObject));
        assert!(matches!(
            validate_response("X", r#"{"tendance": 5}"#),
            Err(ValidationError::MalformedJson(_))
        ));
    }
}
