// =============================================================================
// AI Confirmation Module
// =============================================================================
//
// Turns market micro data into a vetted directional opinion from an external
// model:
// - provider (untrusted text oracle; Gemini client)
// - prompt (concrete metrics for the model)
// - validator (JSON extraction and strict schema checks)
// - confirmation (retry state machine with cancellation)
// - analyzer (single-flight runs and result cache)

pub mod analyzer;
pub mod confirmation;
pub mod prompt;
pub mod provider;
pub mod validator;

pub use analyzer::AiAnalyzer;
pub use confirmation::{AiLoopParams, CancelToken, ConfirmationLoop, ConfirmationOutcome};
pub use provider::{AiProvider, GeminiClient};
