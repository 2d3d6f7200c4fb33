// =============================================================================
// Error taxonomy
// =============================================================================
//
// Only the regime detector raises on violated preconditions; every other
// statistical helper degrades to neutral values. Untrusted-oracle failures
// are typed so the confirmation loop can log the offending payload and spend
// one retry on it.

use thiserror::Error;

/// Precondition violations raised by the regime detector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("price series is empty")]
    EmptyInput,

    #[error("insufficient data: {actual} points supplied, {required} required")]
    InsufficientData { required: usize, actual: usize },
}

/// Reasons an AI response is rejected. Each one consumes a retry round.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("no JSON object found in response")]
    NoJsonObject,

    #[error("malformed JSON: {0}")]
    MalformedJson(String),

    #[error("invalid tendance '{0}' (expected LONG, SHORT or WAIT)")]
    InvalidTendance(String),

    #[error("confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f64),

    #[error("directional call {tendance} with low confidence {confidence}")]
    LowConfidenceDirectional { tendance: String, confidence: f64 },

    #[error("sigma {0} outside [0.001, 0.05]")]
    SigmaOutOfRange(f64),

    #[error("takeProfitPnlClick {0} outside [0.0005, 0.02]")]
    TakeProfitOutOfRange(f64),

    #[error("reasoning too short: {0} characters")]
    ReasoningTooShort(usize),

    #[error("reasoning does not reference any concrete metric")]
    GenericReasoning,
}

/// Failures talking to the external AI provider.
#[derive(Debug, Error)]
pub enum AiProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("AI API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("AI response contained no text")]
    EmptyResponse,

    #[error("AI call timed out after {0}s")]
    Timeout(u64),

    #[error("AI provider not configured: {0}")]
    NotConfigured(&'static str),
}
