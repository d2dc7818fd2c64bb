//! Read-only query surface (spec.md §6) plus the auth endpoints that gate
//! any live-trading-capable action.

use crate::auth::middleware::auth_middleware;
use crate::auth::{api as auth_api, AuthState};
use crate::batch::BatchConfig;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub state: String,
    pub halted: bool,
}

pub async fn get_state(State(state): State<AppState>) -> Json<StateResponse> {
    let orchestrator = &state.orchestrator;
    let current = orchestrator.state().await;
    let halted = orchestrator.is_halted().await;
    Json(StateResponse {
        state: format!("{current:?}"),
        halted,
    })
}

#[derive(Debug, Serialize)]
pub struct MarketViewResponse {
    pub market_id: String,
    pub belief_low: f64,
    pub belief_high: f64,
    pub confidence: f64,
    pub signal_history_length: usize,
    pub last_checked: String,
}

pub async fn get_market_view(
    State(state): State<AppState>,
    Path(market_id): Path<String>,
) -> Result<Json<MarketViewResponse>, StatusCode> {
    match state.orchestrator.market_view(&market_id).await {
        Some((_, belief, signal_history_length, last_checked)) => Ok(Json(MarketViewResponse {
            market_id,
            belief_low: belief.belief_low,
            belief_high: belief.belief_high,
            confidence: belief.confidence,
            signal_history_length,
            last_checked: last_checked.to_rfc3339(),
        })),
        None => Err(StatusCode::NOT_FOUND),
    }
}

#[derive(Debug, Serialize)]
pub struct PaperMetricsResponse {
    pub win_rate: f64,
    pub average_win: f64,
    pub average_loss: f64,
    pub profit_factor: f64,
    pub edge_accuracy: f64,
    pub belief_coverage: f64,
}

pub async fn get_paper_metrics(State(state): State<AppState>) -> Json<PaperMetricsResponse> {
    let metrics = state.orchestrator.paper_tracker_snapshot().await;
    Json(PaperMetricsResponse {
        win_rate: metrics.win_rate,
        average_win: metrics.average_win,
        average_loss: metrics.average_loss,
        profit_factor: metrics.profit_factor,
        edge_accuracy: metrics.edge_accuracy,
        belief_coverage: metrics.belief_coverage,
    })
}

#[derive(Debug, Serialize)]
pub struct CalibrationResponse {
    pub sample_size: usize,
    pub range_coverage: f64,
    pub edge_effectiveness: f64,
    pub unknown_density: f64,
}

pub async fn get_calibration(State(state): State<AppState>) -> Json<CalibrationResponse> {
    let metrics = state.orchestrator.calibration_snapshot().await;
    Json(CalibrationResponse {
        sample_size: metrics.sample_size,
        range_coverage: metrics.range_coverage,
        edge_effectiveness: metrics.edge_effectiveness,
        unknown_density: metrics.unknown_density,
    })
}

pub async fn get_batch_config(State(state): State<AppState>) -> Json<BatchConfig> {
    Json(BatchConfig::from_config(state.orchestrator.config()))
}

pub async fn get_portfolio_status(
    State(state): State<AppState>,
) -> Json<crate::orchestrator::PortfolioStatus> {
    Json(state.orchestrator.portfolio_status().await)
}

pub async fn get_calibration_buckets(
    State(state): State<AppState>,
) -> Json<Vec<crate::paper::CalibrationBucket>> {
    Json(state.orchestrator.calibration_buckets_snapshot().await)
}

/// Most recently computed auto-adjustment recommendation (spec.md §4.4):
/// applied live to belief updates and trade evaluation, and surfaced here so
/// an operator can see why thresholds or confidence have shifted.
pub async fn get_calibration_adjustment(
    State(state): State<AppState>,
) -> Json<crate::calibration::AdjustmentRecommendation> {
    Json(state.orchestrator.adjustment_snapshot().await)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// Assembles the full router: health check, read-only query surface (no
/// auth required), and the auth-gated admin endpoints. `AuthState` and the
/// JWT handler are resolved from `AppState` via `FromRef`; callers apply
/// rate limiting and request logging as outer layers, then
/// `.with_state(app_state)`.
pub fn api_router(auth_state: &AuthState) -> Router<AppState> {
    let authenticated_routes = Router::new()
        .route("/api/admin/users", get(auth_api::list_users).post(auth_api::create_user))
        .route("/api/admin/users/:id", delete(auth_api::delete_user))
        .route("/api/auth/me", get(auth_api::get_current_user))
        .route_layer(middleware::from_fn_with_state(
            auth_state.jwt_handler.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/api/state", get(get_state))
        .route("/api/markets/:id", get(get_market_view))
        .route("/api/paper/metrics", get(get_paper_metrics))
        .route("/api/calibration", get(get_calibration))
        .route("/api/calibration/buckets", get(get_calibration_buckets))
        .route("/api/calibration/adjustment", get(get_calibration_adjustment))
        .route("/api/portfolio/status", get(get_portfolio_status))
        .route("/api/batch/config", get(get_batch_config))
        .route("/api/auth/login", post(auth_api::login))
        .merge(authenticated_routes)
}
