// =============================================================================
// GARCH(1,1) — conditional variance, forecast and volatility regimes
// =============================================================================
//
//   σ²[t] = ω + α·ε²[t-1] + β·σ²[t-1]
//
// α + β is the persistence: close to 1 means volatility shocks decay slowly
// (long memory). The model is only covariance-stationary when α + β < 1, so
// parameters at or beyond that boundary are rescaled to 0.99 persistence.
//
// Per-symbol state lives in an explicit `VolatilityState` owned by the
// caller; `GarchHelper` itself is immutable and freely shareable.
//
// Regime labels are sticky: a new label has to be observed
// `1 + floor(3 * persistence)` consecutive steps before it replaces the
// current one (EXTREME applies immediately). High persistence therefore
// slows label changes, which keeps single noisy samples from flipping the
// regime.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Rolling window of conditional volatilities kept per symbol.
const HISTORY_CAPACITY: usize = 500;

/// Minimum history before the z-score classification is trusted.
const MIN_HISTORY: usize = 10;

/// Variance floor, keeps the recursion away from zero.
const MIN_VARIANCE: f64 = 1e-12;

const MAX_PERSISTENCE: f64 = 0.99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VolatilityRegime {
    Low,
    Normal,
    High,
    Extreme,
}

impl std::fmt::Display for VolatilityRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Normal => write!(f, "NORMAL"),
            Self::High => write!(f, "HIGH"),
            Self::Extreme => write!(f, "EXTREME"),
        }
    }
}

/// GARCH(1,1) coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GarchParams {
    #[serde(default = "default_omega")]
    pub omega: f64,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_beta")]
    pub beta: f64,
}

fn default_omega() -> f64 {
    1e-6
}

fn default_alpha() -> f64 {
    0.1
}

fn default_beta() -> f64 {
    0.85
}

impl Default for GarchParams {
    fn default() -> Self {
        Self {
            omega: default_omega(),
            alpha: default_alpha(),
            beta: default_beta(),
        }
    }
}

impl GarchParams {
    /// Clamp to non-negative coefficients and enforce α + β < 1.
    fn stationary(self) -> Self {
        let omega = self.omega.max(MIN_VARIANCE);
        let alpha = self.alpha.max(0.0);
        let beta = self.beta.max(0.0);
        let total = alpha + beta;
        if total >= 1.0 {
            Self {
                omega,
                alpha: alpha / total * MAX_PERSISTENCE,
                beta: beta / total * MAX_PERSISTENCE,
            }
        } else {
            Self { omega, alpha, beta }
        }
    }

    pub fn persistence(&self) -> f64 {
        self.alpha + self.beta
    }

    /// Unconditional variance ω / (1 - α - β).
    pub fn long_run_variance(&self) -> f64 {
        self.omega / (1.0 - self.persistence()).max(1.0 - MAX_PERSISTENCE)
    }
}

/// Per-symbol conditional-variance state. Created fresh when tracking starts
/// and mutated only by [`GarchHelper::step`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityState {
    /// Current conditional variance σ²[t].
    pub variance: f64,
    /// α + β of the model that produced this state.
    pub persistence: f64,
    /// Published regime label (sticky, see module docs).
    pub regime: VolatilityRegime,
    /// Last price seen by [`GarchHelper::observe_price`].
    pub last_price: Option<f64>,
    /// Number of shocks absorbed.
    pub observations: u64,
    #[serde(skip)]
    history: VecDeque<f64>,
    #[serde(skip)]
    pending: Option<(VolatilityRegime, u32)>,
}

impl VolatilityState {
    /// Conditional volatility σ[t].
    pub fn volatility(&self) -> f64 {
        self.variance.sqrt()
    }
}

/// Stateless GARCH(1,1) engine.
#[derive(Debug, Clone, Copy)]
pub struct GarchHelper {
    params: GarchParams,
}

impl Default for GarchHelper {
    fn default() -> Self {
        Self::new(GarchParams::default())
    }
}

impl GarchHelper {
    pub fn new(params: GarchParams) -> Self {
        Self {
            params: params.stationary(),
        }
    }

    pub fn params(&self) -> GarchParams {
        self.params
    }

    /// Fresh state seeded at the long-run variance.
    pub fn new_state(&self) -> VolatilityState {
        VolatilityState {
            variance: self.params.long_run_variance(),
            persistence: self.params.persistence(),
            regime: VolatilityRegime::Normal,
            last_price: None,
            observations: 0,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            pending: None,
        }
    }

    /// Absorb one return shock ε and advance the recursion by one step.
    pub fn step(&self, state: &mut VolatilityState, shock: f64) {
        let shock = if shock.is_finite() { shock } else { 0.0 };
        let p = self.params;

        let next = p.omega + p.alpha * shock * shock + p.beta * state.variance;
        state.variance = if next.is_finite() { next.max(MIN_VARIANCE) } else { state.variance };
        state.persistence = p.persistence();
        state.observations += 1;

        let vol = state.variance.sqrt();
        let candidate = classify_volatility_regime(vol, state.history.make_contiguous());

        if state.history.len() == HISTORY_CAPACITY {
            state.history.pop_front();
        }
        state.history.push_back(vol);

        self.apply_hysteresis(state, candidate);

        trace!(
            variance = format!("{:.3e}", state.variance),
            regime = %state.regime,
            "GARCH step"
        );
    }

    /// Convert a price into a log-return shock against the state's last price
    /// and step the model. The first price only primes the state.
    pub fn observe_price(&self, state: &mut VolatilityState, price: f64) {
        if !(price > 0.0 && price.is_finite()) {
            return;
        }
        if let Some(prev) = state.last_price {
            self.step(state, (price / prev).ln());
        }
        state.last_price = Some(price);
    }

    /// Conditional-variance path for a return series, seeded with the sample
    /// variance. Output has the same length as `returns`; element `t` is the
    /// variance after absorbing `returns[t]`.
    pub fn filter(&self, returns: &[f64]) -> Vec<f64> {
        if returns.is_empty() {
            return Vec::new();
        }
        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let sample_var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;

        let p = self.params;
        let mut sigma_sq = sample_var.max(MIN_VARIANCE);
        returns
            .iter()
            .map(|&r| {
                let r = if r.is_finite() { r } else { 0.0 };
                sigma_sq = (p.omega + p.alpha * r * r + p.beta * sigma_sq).max(MIN_VARIANCE);
                sigma_sq
            })
            .collect()
    }

    /// h-step variance forecasts σ²[t+1..=t+h]:
    ///
    ///   σ²[t+h] = σ̄² + (α+β)^(h-1) · (σ²[t+1] - σ̄²)
    ///
    /// where σ²[t+1] is the one-step forecast from the current state (no new
    /// shock, so ε² is replaced by its expectation σ²[t]).
    pub fn forecast(&self, state: &VolatilityState, horizon: usize) -> Vec<f64> {
        let p = self.params;
        let long_run = p.long_run_variance();
        let one_step = p.omega + p.persistence() * state.variance;
        let mut decay = 1.0;
        (0..horizon)
            .map(|_| {
                let v = long_run + decay * (one_step - long_run);
                decay *= p.persistence();
                v
            })
            .collect()
    }

    fn apply_hysteresis(&self, state: &mut VolatilityState, candidate: VolatilityRegime) {
        if candidate == state.regime {
            state.pending = None;
            return;
        }

        let required = 1 + (3.0 * state.persistence).floor() as u32;
        let seen = match state.pending {
            Some((regime, count)) if regime == candidate => count + 1,
            _ => 1,
        };

        if candidate == VolatilityRegime::Extreme || seen >= required {
            debug!(from = %state.regime, to = %candidate, "volatility regime change");
            state.regime = candidate;
            state.pending = None;
        } else {
            state.pending = Some((candidate, seen));
        }
    }
}

/// Bucket `current_vol` against the distribution of `historical_vols` by
/// z-score: z < -1 LOW, z < 1 NORMAL, z < 2.5 HIGH, else EXTREME.
///
/// With too little history the call is NORMAL. With a flat history the
/// ratio to the historical mean is used instead (< 0.5 LOW, > 2 HIGH,
/// > 4 EXTREME).
pub fn classify_volatility_regime(current_vol: f64, historical_vols: &[f64]) -> VolatilityRegime {
    let valid: Vec<f64> = historical_vols
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .collect();

    if valid.len() < MIN_HISTORY || !current_vol.is_finite() {
        return VolatilityRegime::Normal;
    }

    let n = valid.len() as f64;
    let mean = valid.iter().sum::<f64>() / n;
    let std = (valid.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();

    if std <= mean.abs() * 1e-9 || std < f64::EPSILON {
        if mean <= 0.0 {
            return VolatilityRegime::Normal;
        }
        let ratio = current_vol / mean;
        return if ratio > 4.0 {
            VolatilityRegime::Extreme
        } else if ratio > 2.0 {
            VolatilityRegime::High
        } else if ratio < 0.5 {
            VolatilityRegime::Low
        } else {
            VolatilityRegime::Normal
        };
    }

    let z = (current_vol - mean) / std;
    if z < -1.0 {
        VolatilityRegime::Low
    } else if z < 1.0 {
        VolatilityRegime::Normal
    } else if z < 2.5 {
        VolatilityRegime::High
    } else {
        VolatilityRegime::Extreme
    }
}

/// Z-score of `current_vol` within `historical_vols`; 0.0 when undefined.
pub fn volatility_z_score(current_vol: f64, historical_vols: &[f64]) -> f64 {
    if historical_vols.len() < 2 {
        return 0.0;
    }
    let n = historical_vols.len() as f64;
    let mean = historical_vols.iter().sum::<f64>() / n;
    let std = (historical_vols.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    if std < f64::EPSILON || !std.is_finite() {
        0.0
    } else {
        (current_vol - mean) / std
    }
}
