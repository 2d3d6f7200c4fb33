// =============================================================================
// AI Analyzer — single-flight confirmation runs with a per-symbol cache
// =============================================================================
//
// At most one confirmation run exists per symbol. A second `analyze` call
// for a symbol that is already running joins the in-flight run and gets the
// same outcome, so there is never a duplicate AI call for one symbol.
//
// Only SIGNALED results enter the cache. The exhausted fallback is handed to
// the caller but never overwrites the last real signal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::ai::confirmation::{CancelToken, ConfirmationLoop, ConfirmationOutcome};
use crate::ai::prompt::StrategyContext;
use crate::types::AiAnalysisResult;

type SharedRun = Shared<BoxFuture<'static, ConfirmationOutcome>>;

struct InFlight {
    id: u64,
    run: SharedRun,
    cancel: CancelToken,
}

pub struct AiAnalyzer {
    confirmation: ConfirmationLoop,
    cache: RwLock<HashMap<String, AiAnalysisResult>>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    next_run_id: AtomicU64,
}

impl AiAnalyzer {
    pub fn new(confirmation: ConfirmationLoop) -> Self {
        Self {
            confirmation,
            cache: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            next_run_id: AtomicU64::new(1),
        }
    }

    /// Run (or join) the confirmation loop for `symbol`.
    pub async fn analyze(self: &Arc<Self>, symbol: &str) -> ConfirmationOutcome {
        let run = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(symbol) {
                Some(existing) => {
                    debug!(symbol, "joining in-flight AI analysis");
                    existing.run.clone()
                }
                None => {
                    let entry = self.start_run(symbol);
                    let run = entry.run.clone();
                    in_flight.insert(symbol.to_string(), entry);
                    run
                }
            }
        };
        run.await
    }

    fn start_run(self: &Arc<Self>, symbol: &str) -> InFlight {
        let id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancelToken::new();
        let strategy = self.cache.read().get(symbol).map(StrategyContext::from);

        let this = Arc::clone(self);
        let sym = symbol.to_string();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let outcome = this.confirmation.run_until_signal(&sym, strategy, &token).await;
            this.complete(&sym, id, &outcome);
            outcome
        });

        let fallback_symbol = symbol.to_string();
        let run = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(symbol = %fallback_symbol, error = %e, "AI analysis task failed");
                    ConfirmationOutcome::Exhausted(AiAnalysisResult::fallback(
                        &fallback_symbol,
                        "AI analysis task failed",
                    ))
                }
            }
        }
        .boxed()
        .shared();

        info!(symbol, run = id, "AI analysis started");
        InFlight { id, run, cancel }
    }

    /// Retire run `id` and cache its signal. Both happen under the
    /// `in_flight` lock, so a run that `cancel` already removed (or that a
    /// newer run replaced) never writes the cache.
    fn complete(&self, symbol: &str, id: u64, outcome: &ConfirmationOutcome) -> bool {
        let mut in_flight = self.in_flight.lock();
        let current = matches!(in_flight.get(symbol), Some(f) if f.id == id && !f.cancel.is_cancelled());
        if !current {
            debug!(symbol, run = id, "stale AI run finished, result dropped");
            return false;
        }
        if let ConfirmationOutcome::Signaled(result) = outcome {
            self.cache.write().insert(symbol.to_string(), result.clone());
        }
        in_flight.remove(symbol);
        true
    }

    /// Abort the in-flight run for `symbol`, if any.
    pub fn cancel(&self, symbol: &str) -> bool {
        match self.in_flight.lock().remove(symbol) {
            Some(entry) => {
                entry.cancel.cancel();
                info!(symbol, "AI analysis cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, symbol: &str) -> bool {
        self.in_flight.lock().contains_key(symbol)
    }

    pub fn get_cached(&self, symbol: &str) -> Option<AiAnalysisResult> {
        self.cache.read().get(symbol).cloned()
    }

    pub fn all_cached(&self) -> Vec<AiAnalysisResult> {
        let mut all: Vec<_> = self.cache.read().values().cloned().collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        all
    }

    /// Drop the cached result for `symbol`.
    pub fn clear(&self, symbol: &str) -> bool {
        self.cache.write().remove(symbol).is_some()
    }

    /// Cancel any run and forget everything about `symbol`.
    pub fn remove_symbol(&self, symbol: &str) {
        self.cancel(symbol);
        self.clear(symbol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::confirmation::tests::{answer, fast_params, FakeMarket, ScriptedAi};
    use crate::ai::confirmation::AiLoopParams;
    use crate::types::Direction;
    use std::time::Duration;

    fn analyzer(price: Option<f64>, ai: Arc<ScriptedAi>, params: AiLoopParams) -> Arc<AiAnalyzer> {
        let market = FakeMarket::with_price(price);
        Arc::new(AiAnalyzer::new(ConfirmationLoop::new(market, ai, params)))
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_run() {
        let ai = ScriptedAi::with_delay(vec![answer("LONG", 0.9)], Duration::from_millis(100));
        let svc = analyzer(Some(100.0), ai.clone(), fast_params());

        let (a, b) = tokio::join!(svc.analyze("BTCUSDT"), svc.analyze("BTCUSDT"));

        assert_eq!(ai.calls(), 1);
        assert_eq!(a, b);
        assert_eq!(a.result().map(|r| r.tendance), Some(Direction::Long));
        assert!(!svc.is_running("BTCUSDT"));
    }

    #[tokio::test]
    async fn signal_is_cached_and_clearable() {
        let ai = ScriptedAi::new(vec![answer("SHORT", 0.8)]);
        let svc = analyzer(Some(100.0), ai, fast_params());

        svc.analyze("ETHUSDT").await;

        let cached = svc.get_cached("ETHUSDT").expect("cached signal");
        assert_eq!(cached.tendance, Direction::Short);
        assert_eq!(svc.all_cached().len(), 1);
        assert!(svc.clear("ETHUSDT"));
        assert!(svc.get_cached("ETHUSDT").is_none());
        assert!(!svc.clear("ETHUSDT"));
    }

    #[tokio::test]
    async fn exhausted_fallback_is_not_cached() {
        let ai = ScriptedAi::new(vec![answer("LONG", 0.9)]);
        let svc = analyzer(None, ai, fast_params());

        let outcome = svc.analyze("BTCUSDT").await;

        assert_eq!(outcome.label(), "EXHAUSTED");
        assert!(svc.get_cached("BTCUSDT").is_none());
    }

    #[tokio::test]
    async fn sequential_requests_start_new_runs() {
        let ai = ScriptedAi::new(vec![answer("LONG", 0.9)]);
        let svc = analyzer(Some(100.0), ai.clone(), fast_params());

        svc.analyze("BTCUSDT").await;
        svc.analyze("BTCUSDT").await;

        assert_eq!(ai.calls(), 2);
    }

    #[tokio::test]
    async fn remove_symbol_cancels_in_flight_run() {
        let ai = ScriptedAi::new(vec![answer("WAIT", 0.2)]);
        let params = AiLoopParams {
            wait_retry_delay_ms: 60_000,
            ..fast_params()
        };
        let svc = analyzer(Some(100.0), ai.clone(), params);

        let pending = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.analyze("SOLUSDT").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(svc.is_running("SOLUSDT"));

        svc.remove_symbol("SOLUSDT");

        let outcome = tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .expect("run must stop promptly")
            .expect("task must not panic");
        assert_eq!(outcome, ConfirmationOutcome::Cancelled);
        assert!(!svc.is_running("SOLUSDT"));
        assert!(svc.get_cached("SOLUSDT").is_none());
        assert!(!svc.cancel("SOLUSDT"));
    }

    fn idle_entry(svc: &AiAnalyzer, symbol: &str, id: u64) -> CancelToken {
        let cancel = CancelToken::new();
        let run = futures_util::future::ready(ConfirmationOutcome::Cancelled).boxed().shared();
        svc.in_flight.lock().insert(
            symbol.to_string(),
            InFlight { id, run, cancel: cancel.clone() },
        );
        cancel
    }

    #[tokio::test]
    async fn completion_caches_only_the_current_run() {
        let svc = analyzer(Some(100.0), ScriptedAi::new(Vec::new()), fast_params());
        let signal = || ConfirmationOutcome::Signaled(AiAnalysisResult::fallback("BTCUSDT", "test"));

        // Cancelled before completion: entry already gone.
        assert!(!svc.complete("BTCUSDT", 7, &signal()));
        assert!(svc.get_cached("BTCUSDT").is_none());

        // Replaced by a newer run.
        idle_entry(&svc, "BTCUSDT", 8);
        assert!(!svc.complete("BTCUSDT", 7, &signal()));
        assert!(svc.get_cached("BTCUSDT").is_none());
        assert!(svc.is_running("BTCUSDT"));

        // Token tripped while the entry is still registered.
        idle_entry(&svc, "BTCUSDT", 9).cancel();
        assert!(!svc.complete("BTCUSDT", 9, &signal()));
        assert!(svc.get_cached("BTCUSDT").is_none());

        idle_entry(&svc, "BTCUSDT", 10);
        assert!(svc.complete("BTCUSDT", 10, &signal()));
        assert!(svc.get_cached("BTCUSDT").is_some());
        assert!(!svc.is_running("BTCUSDT"));
    }

    #[tokio::test]
    async fn cancel_after_completion_keeps_signal() {
        let ai = ScriptedAi::new(vec![answer("LONG", 0.9)]);
        let svc = analyzer(Some(100.0), ai, fast_params());
        svc.analyze("BTCUSDT").await;
        assert!(!svc.cancel("BTCUSDT"));
        assert!(svc.get_cached("BTCUSDT").is_some());
    }
}
