// =============================================================================
// AI Confirmation Loop
// =============================================================================
//
// One run asks the model until it commits to a direction:
//
//   FETCHING  ── no micro data ──────────────► sleep fetch delay, retry
//      │
//   ANALYZING ── WAIT / rejected / timeout ──► sleep wait delay, retry
//      │
//      ├── LONG | SHORT ──► SIGNALED (returned, caller caches it)
//      └── budget spent ──► EXHAUSTED (neutral WAIT, confidence 0)
//
// Every attempt, whatever its outcome, consumes one unit of `max_retries`.
// No delay follows the final attempt. The cancel token is raced against
// every fetch, AI call and sleep, so an abandoned run stops at the next
// await point and leaves no timer behind.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::ai::prompt::{build_prompt, StrategyContext};
use crate::ai::provider::AiProvider;
use crate::ai::validator::validate_response;
use crate::error::{AiProviderError, ValidationError};
use crate::market_data::{MarketDataProvider, MarketMicroDataCalculator, MicroDataSettings};
use crate::types::AiAnalysisResult;

// =============================================================================
// Parameters
// =============================================================================

fn default_max_retries() -> u32 {
    5
}

fn default_fetch_retry_delay_ms() -> u64 {
    1000
}

fn default_wait_retry_delay_ms() -> u64 {
    2000
}

fn default_ai_timeout_secs() -> u64 {
    30
}

fn default_depth_levels() -> u32 {
    20
}

fn default_kline_interval() -> String {
    "1m".to_string()
}

fn default_kline_limit() -> u32 {
    30
}

/// Retry budget, delays and micro-data shape for one confirmation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiLoopParams {
    /// Total attempts per run, fetch failures included.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Back-off after the provider had no price.
    #[serde(default = "default_fetch_retry_delay_ms")]
    pub fetch_retry_delay_ms: u64,

    /// Back-off after a WAIT answer or a failed round.
    #[serde(default = "default_wait_retry_delay_ms")]
    pub wait_retry_delay_ms: u64,

    #[serde(default = "default_ai_timeout_secs")]
    pub ai_timeout_secs: u64,

    #[serde(default = "default_depth_levels")]
    pub depth_levels: u32,

    #[serde(default = "default_kline_interval")]
    pub kline_interval: String,

    #[serde(default = "default_kline_limit")]
    pub kline_limit: u32,
}

impl Default for AiLoopParams {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            fetch_retry_delay_ms: default_fetch_retry_delay_ms(),
            wait_retry_delay_ms: default_wait_retry_delay_ms(),
            ai_timeout_secs: default_ai_timeout_secs(),
            depth_levels: default_depth_levels(),
            kline_interval: default_kline_interval(),
            kline_limit: default_kline_limit(),
        }
    }
}

impl AiLoopParams {
    fn micro_data_settings(&self) -> MicroDataSettings {
        MicroDataSettings {
            depth_levels: self.depth_levels,
            kline_interval: self.kline_interval.clone(),
            kline_limit: self.kline_limit,
        }
    }
}

// =============================================================================
// Cancellation
// =============================================================================

/// Cloneable cancellation flag. Once cancelled it stays cancelled.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `cancel` has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            let cancelled = *rx.borrow_and_update();
            if cancelled {
                return;
            }
            // The sender lives in `self`, so `changed` cannot fail while we wait.
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Terminal state of one run.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationOutcome {
    Signaled(AiAnalysisResult),
    Exhausted(AiAnalysisResult),
    Cancelled,
}

impl ConfirmationOutcome {
    pub fn result(&self) -> Option<&AiAnalysisResult> {
        match self {
            Self::Signaled(r) | Self::Exhausted(r) => Some(r),
            Self::Cancelled => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Signaled(_) => "SIGNALED",
            Self::Exhausted(_) => "EXHAUSTED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// What a single FETCHING → ANALYZING pass produced.
#[derive(Debug)]
enum Round {
    NoData,
    ProviderFailed(AiProviderError),
    Rejected { error: ValidationError, payload: String },
    Wait(AiAnalysisResult),
    Signaled(AiAnalysisResult),
}

// =============================================================================
// Loop
// =============================================================================

pub struct ConfirmationLoop {
    micro: MarketMicroDataCalculator,
    ai: Arc<dyn AiProvider>,
    params: AiLoopParams,
}

impl ConfirmationLoop {
    pub fn new(market: Arc<dyn MarketDataProvider>, ai: Arc<dyn AiProvider>, params: AiLoopParams) -> Self {
        let micro = MarketMicroDataCalculator::new(market, params.micro_data_settings());
        Self { micro, ai, params }
    }

    /// Ask the model until it signals, the budget runs out, or `cancel`
    /// fires. Never fails: exhaustion yields a neutral fallback result.
    pub async fn run_until_signal(
        &self,
        symbol: &str,
        strategy: Option<StrategyContext>,
        cancel: &CancelToken,
    ) -> ConfirmationOutcome {
        let run_id = Uuid::new_v4();
        let span = info_span!("ai_confirmation", symbol, %run_id, provider = self.ai.name());
        self.run_inner(symbol, strategy.as_ref(), cancel).instrument(span).await
    }

    async fn run_inner(
        &self,
        symbol: &str,
        strategy: Option<&StrategyContext>,
        cancel: &CancelToken,
    ) -> ConfirmationOutcome {
        let max = self.params.max_retries.max(1);
        let fetch_delay = Duration::from_millis(self.params.fetch_retry_delay_ms);
        let wait_delay = Duration::from_millis(self.params.wait_retry_delay_ms);
        let mut last_reason = String::from("no attempt completed");

        for attempt in 1..=max {
            if cancel.is_cancelled() {
                info!(attempt, "confirmation cancelled");
                return ConfirmationOutcome::Cancelled;
            }

            let round = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(attempt, "confirmation cancelled mid-round");
                    return ConfirmationOutcome::Cancelled;
                }
                round = self.round(symbol, strategy) => round,
            };

            let delay = match round {
                Round::Signaled(result) => {
                    info!(
                        attempt,
                        tendance = %result.tendance,
                        confidence = result.confidence,
                        sigma = result.sigma,
                        take_profit = result.take_profit_pnl_click,
                        "AI signal confirmed"
                    );
                    return ConfirmationOutcome::Signaled(result);
                }
                Round::Wait(result) => {
                    info!(attempt, max, confidence = result.confidence, "AI answered WAIT, will re-ask");
                    last_reason = format!("last answer WAIT: {}", result.reasoning);
                    wait_delay
                }
                Round::NoData => {
                    info!(attempt, max, "no market data, will refetch");
                    last_reason = "market data unavailable".to_string();
                    fetch_delay
                }
                Round::Rejected { error, payload } => {
                    warn!(attempt, max, error = %error, payload = %payload, "AI response rejected");
                    last_reason = format!("last response rejected: {error}");
                    wait_delay
                }
                Round::ProviderFailed(error) => {
                    warn!(attempt, max, error = %error, "AI call failed");
                    last_reason = format!("last AI call failed: {error}");
                    wait_delay
                }
            };

            if attempt < max {
                debug!(delay_ms = delay.as_millis() as u64, "sleeping before next attempt");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!(attempt, "confirmation cancelled during back-off");
                        return ConfirmationOutcome::Cancelled;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        warn!(attempts = max, reason = %last_reason, "AI confirmation exhausted, returning neutral WAIT");
        ConfirmationOutcome::Exhausted(AiAnalysisResult::fallback(
            symbol,
            format!("No definitive AI signal after {max} attempts ({last_reason})"),
        ))
    }

    async fn round(&self, symbol: &str, strategy: Option<&StrategyContext>) -> Round {
        // FETCHING
        let Some(data) = self.micro.fetch_micro_data(symbol).await else {
            return Round::NoData;
        };

        // ANALYZING
        let prompt = build_prompt(&data, strategy);
        let timeout = Duration::from_secs(self.params.ai_timeout_secs);
        let text = match tokio::time::timeout(timeout, self.ai.generate_content(&prompt)).await {
            Err(_) => return Round::ProviderFailed(AiProviderError::Timeout(self.params.ai_timeout_secs)),
            Ok(Err(e)) => return Round::ProviderFailed(e),
            Ok(Ok(text)) => text,
        };

        match validate_response(symbol, &text) {
            Ok(result) if result.tendance.is_directional() => Round::Signaled(result),
            Ok(result) => Round::Wait(result),
            Err(error) => Round::Rejected { error, payload: text },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::market_data::{Candle, OrderBookDepth};
    use crate::types::Direction;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ── Fakes shared with the analyzer tests ─────────────────────────────

    pub(crate) struct FakeMarket {
        pub price: Option<f64>,
        pub calls: AtomicUsize,
    }

    impl FakeMarket {
        pub(crate) fn with_price(price: Option<f64>) -> Arc<Self> {
            Arc::new(Self {
                price,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MarketDataProvider for FakeMarket {
        async fn get_price(&self, _symbol: &str) -> anyhow::Result<Option<f64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.price)
        }

        async fn get_order_book_depth(&self, _symbol: &str, _limit: u32) -> anyhow::Result<Option<OrderBookDepth>> {
            Ok(None)
        }

        async fn get_klines(&self, _symbol: &str, _interval: &str, _limit: u32) -> anyhow::Result<Vec<Candle>> {
            Ok(vec![
                Candle::new(0, 100.0, 105.0, 95.0, 102.0, 1.0, 59_999),
                Candle::new(60_000, 102.0, 108.0, 100.0, 106.0, 1.0, 119_999),
            ])
        }
    }

    /// Replays `responses` in order, repeating the last one.
    pub(crate) struct ScriptedAi {
        responses: Vec<String>,
        delay: Duration,
        pub calls: AtomicUsize,
    }

    impl ScriptedAi {
        pub(crate) fn new(responses: Vec<String>) -> Arc<Self> {
            Self::with_delay(responses, Duration::ZERO)
        }

        pub(crate) fn with_delay(responses: Vec<String>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                responses,
                delay,
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AiProvider for ScriptedAi {
        async fn generate_content(&self, _prompt: &str) -> Result<String, AiProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let idx = n.min(self.responses.len().saturating_sub(1));
            self.responses.get(idx).cloned().ok_or(AiProviderError::EmptyResponse)
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    pub(crate) fn answer(tendance: &str, confidence: f64) -> String {
        format!(
            r#"{{"tendance":"{tendance}","confidence":{confidence},"sigma":0.008,"takeProfitPnlClick":0.003,"reasoning":"Imbalance is +0.40 while ATR of 8.0 exceeds the average body"}}"#
        )
    }

    pub(crate) fn fast_params() -> AiLoopParams {
        AiLoopParams {
            fetch_retry_delay_ms: 1,
            wait_retry_delay_ms: 1,
            ..AiLoopParams::default()
        }
    }

    fn build(market: Arc<FakeMarket>, ai: Arc<ScriptedAi>, params: AiLoopParams) -> ConfirmationLoop {
        ConfirmationLoop::new(market, ai, params)
    }

    // ── Tests ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn no_market_data_exhausts_to_neutral_wait() {
        let market = FakeMarket::with_price(None);
        let ai = ScriptedAi::new(vec![answer("LONG", 0.9)]);
        let lp = build(market.clone(), ai.clone(), fast_params());

        let outcome = lp.run_until_signal("BTCUSDT", None, &CancelToken::new()).await;

        let ConfirmationOutcome::Exhausted(result) = outcome else {
            panic!("expected exhaustion, got {outcome:?}");
        };
        assert_eq!(result.tendance, Direction::Wait);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.sigma, crate::types::FALLBACK_SIGMA);
        assert_eq!(market.calls.load(Ordering::SeqCst), 5);
        assert_eq!(ai.calls(), 0);
    }

    #[tokio::test]
    async fn confident_signal_returns_after_one_round() {
        let market = FakeMarket::with_price(Some(106.0));
        let ai = ScriptedAi::new(vec![answer("LONG", 0.9)]);
        let lp = build(market, ai.clone(), fast_params());

        let outcome = lp.run_until_signal("BTCUSDT", None, &CancelToken::new()).await;

        let ConfirmationOutcome::Signaled(result) = outcome else {
            panic!("expected a signal, got {outcome:?}");
        };
        assert_eq!(result.tendance, Direction::Long);
        assert_eq!(result.confidence, 0.9);
        assert_eq!(ai.calls(), 1);
    }

    #[tokio::test]
    async fn wait_answers_are_retried_until_signal() {
        let market = FakeMarket::with_price(Some(106.0));
        let ai = ScriptedAi::new(vec![answer("WAIT", 0.3), answer("WAIT", 0.2), answer("SHORT", 0.75)]);
        let lp = build(market, ai.clone(), fast_params());

        let outcome = lp.run_until_signal("ETHUSDT", None, &CancelToken::new()).await;

        assert_eq!(outcome.result().map(|r| r.tendance), Some(Direction::Short));
        assert_eq!(outcome.label(), "SIGNALED");
        assert_eq!(ai.calls(), 3);
    }

    #[tokio::test]
    async fn low_confidence_directional_answers_count_as_failed_rounds() {
        let market = FakeMarket::with_price(Some(106.0));
        let ai = ScriptedAi::new(vec![answer("LONG", 0.3)]);
        let params = AiLoopParams {
            max_retries: 3,
            ..fast_params()
        };
        let lp = build(market, ai.clone(), params);

        let outcome = lp.run_until_signal("BTCUSDT", None, &CancelToken::new()).await;

        assert_eq!(outcome.label(), "EXHAUSTED");
        assert_eq!(ai.calls(), 3);
    }

    #[tokio::test]
    async fn timeout_counts_as_failed_round() {
        let market = FakeMarket::with_price(Some(106.0));
        let ai = ScriptedAi::with_delay(vec![answer("LONG", 0.9)], Duration::from_secs(5));
        let params = AiLoopParams {
            max_retries: 1,
            ai_timeout_secs: 1,
            ..fast_params()
        };
        let lp = build(market, ai.clone(), params);

        let outcome = lp.run_until_signal("BTCUSDT", None, &CancelToken::new()).await;

        let result = outcome.result().expect("fallback result");
        assert_eq!(result.tendance, Direction::Wait);
        assert!(result.reasoning.contains("timed out"));
        assert_eq!(ai.calls(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_makes_no_calls() {
        let market = FakeMarket::with_price(Some(106.0));
        let ai = ScriptedAi::new(vec![answer("LONG", 0.9)]);
        let lp = build(market, ai.clone(), fast_params());
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = lp.run_until_signal("BTCUSDT", None, &cancel).await;

        assert_eq!(outcome, ConfirmationOutcome::Cancelled);
        assert_eq!(ai.calls(), 0);
    }

    #[tokio::test]
    async fn cancel_interrupts_back_off() {
        let market = FakeMarket::with_price(Some(106.0));
        let ai = ScriptedAi::new(vec![answer("WAIT", 0.2)]);
        let params = AiLoopParams {
            wait_retry_delay_ms: 60_000,
            ..fast_params()
        };
        let lp = Arc::new(build(market, ai.clone(), params));
        let cancel = CancelToken::new();

        let handle = {
            let lp = lp.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { lp.run_until_signal("BTCUSDT", None, &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop must stop promptly")
            .expect("task must not panic");
        assert_eq!(outcome, ConfirmationOutcome::Cancelled);
        assert_eq!(ai.calls(), 1);
    }

    #[tokio::test]
    async fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        tokio::time::timeout(Duration::from_millis(100), clone.cancelled())
            .await
            .expect("already cancelled token resolves immediately");
    }

    #[test]
    fn params_deserialise_with_defaults() {
        let p: AiLoopParams = serde_json::from_str(r#"{ "max_retries": 2 }"#).unwrap();
        assert_eq!(p.max_retries, 2);
        assert_eq!(p.fetch_retry_delay_ms, 1000);
        assert_eq!(p.wait_retry_delay_ms, 2000);
        assert_eq!(p.kline_interval, "1m");
    }
}
