// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Reads are public; anything that
// changes tracking or spends AI calls requires the admin bearer token,
// checked by the `AdminAuth` extractor.
//
// CORS is configured permissively for the dashboard; tighten
// `allowed_origins` in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api::auth::AdminAuth;
use crate::app_state::{AppState, ErrorRecord};
use crate::runtime_config::normalize_symbol;
use crate::ai::ConfirmationOutcome;
use crate::types::AiAnalysisResult;

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

/// Normalise `raw` and require that the symbol is tracked.
fn tracked_symbol(state: &AppState, raw: &str) -> Result<String, ApiError> {
    let symbol = normalize_symbol(raw)
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, format!("invalid symbol '{raw}'")))?;
    if !state.is_tracked(&symbol) {
        return Err(api_error(StatusCode::NOT_FOUND, format!("{symbol} is not tracked")));
    }
    Ok(symbol)
}

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        .route("/api/v1/symbols", get(list_symbols))
        .route("/api/v1/trends", get(all_trends))
        .route("/api/v1/trend/:symbol", get(trend_for_symbol))
        .route("/api/v1/ai", get(ai_overview))
        .route("/api/v1/ai/:symbol", get(ai_for_symbol))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/symbols", post(track_symbol))
        .route("/api/v1/symbols/:symbol", delete(untrack_symbol))
        .route("/api/v1/ai/:symbol/analyze", post(analyze_symbol))
        .route("/api/v1/ai/:symbol", delete(clear_ai))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    uptime_secs: u64,
    server_time: i64,
    recent_errors: Vec<ErrorRecord>,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        server_time: chrono::Utc::now().timestamp_millis(),
        recent_errors: state.recent_errors.snapshot(),
    })
}

// =============================================================================
// Symbols
// =============================================================================

#[derive(Serialize)]
struct SymbolsResponse {
    symbols: Vec<String>,
}

async fn list_symbols(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(SymbolsResponse {
        symbols: state.tracked_symbols(),
    })
}

#[derive(Deserialize)]
struct TrackRequest {
    symbol: String,
}

async fn track_symbol(
    _admin: AdminAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<TrackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let symbol = normalize_symbol(&req.symbol)
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, format!("invalid symbol '{}'", req.symbol)))?;

    let status = if state.track_symbol(&symbol) {
        info!(symbol = %symbol, "symbol tracked via API");
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(SymbolsResponse {
            symbols: state.tracked_symbols(),
        }),
    ))
}

async fn untrack_symbol(
    _admin: AdminAuth,
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<StatusCode, ApiError> {
    let symbol = tracked_symbol(&state, &raw)?;
    state.untrack_symbol(&symbol);
    info!(symbol = %symbol, "symbol untracked via API");
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Trends
// =============================================================================

async fn all_trends(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.trend.all_latest())
}

/// Latest trend for a symbol, computed on demand when none is cached yet.
async fn trend_for_symbol(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let symbol = tracked_symbol(&state, &raw)?;
    let result = match state.trend.latest(&symbol) {
        Some(r) => r,
        None => state.refresh_trend(&symbol),
    };
    Ok(Json(result))
}

// =============================================================================
// AI confirmation
// =============================================================================

#[derive(Serialize)]
struct AiOverview {
    cached: Vec<AiAnalysisResult>,
    running: Vec<String>,
}

/// Every cached AI result plus the symbols with a run in flight.
async fn ai_overview(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let running = state
        .tracked_symbols()
        .into_iter()
        .filter(|s| state.ai.is_running(s))
        .collect();
    Json(AiOverview {
        cached: state.ai.all_cached(),
        running,
    })
}

async fn ai_for_symbol(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let symbol = tracked_symbol(&state, &raw)?;
    state
        .ai
        .get_cached(&symbol)
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("no AI analysis cached for {symbol}")))
}

#[derive(Serialize)]
struct AnalyzeResponse {
    outcome: &'static str,
    result: Option<AiAnalysisResult>,
}

/// Run (or join) the confirmation loop. Concurrent calls for one symbol
/// share a single run.
async fn analyze_symbol(
    _admin: AdminAuth,
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let symbol = tracked_symbol(&state, &raw)?;
    let outcome = state.ai.analyze(&symbol).await;
    if let ConfirmationOutcome::Exhausted(fallback) = &outcome {
        state.push_error(format!("AI analysis {symbol}: {}", fallback.reasoning), "ai_exhausted");
    }
    state.increment_version();
    Ok(Json(AnalyzeResponse {
        outcome: outcome.label(),
        result: outcome.result().cloned(),
    }))
}

async fn clear_ai(
    _admin: AdminAuth,
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<StatusCode, ApiError> {
    let symbol = tracked_symbol(&state, &raw)?;
    state.ai.cancel(&symbol);
    state.ai.clear(&symbol);
    state.increment_version();
    Ok(StatusCode::NO_CONTENT)
}
