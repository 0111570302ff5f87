use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;

use crate::error::{AppError, AppResult};
use crate::query::{DashboardMetrics, MetricsWindow, QueryEngine, RevenueResponse};
use crate::rest::{AppQuery, AppState};

/// Job counts and revenue, computed on every call.
#[utoipa::path(
    get,
    path = "/api/dashboard/metrics",
    params(MetricsWindow),
    responses(
        (status = 200, body = DashboardMetrics),
        (status = 400, body = crate::error::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "dashboard"
)]
pub async fn get_metrics(
    State(state): State<Arc<AppState>>,
    AppQuery(window): AppQuery<MetricsWindow>,
) -> AppResult<Json<DashboardMetrics>> {
    if let (Some(from), Some(to)) = (window.from, window.to) {
        if from >= to {
            return Err(AppError::BadRequest("'from' must be before 'to'".to_string()));
        }
    }
    let engine = QueryEngine::new(&state.storage).await?;
    Ok(Json(engine.dashboard_metrics(window, Utc::now()).await?))
}

/// Revenue of completed jobs for the last six months.
#[utoipa::path(
    get,
    path = "/api/dashboard/revenue",
    responses((status = 200, body = RevenueResponse)),
    security(("bearer" = [])),
    tag = "dashboard"
)]
pub async fn get_revenue(State(state): State<Arc<AppState>>) -> AppResult<Json<RevenueResponse>> {
    let engine = QueryEngine::new(&state.storage).await?;
    let monthly_data = engine.monthly_revenue(Utc::now()).await?;
    Ok(Json(RevenueResponse { monthly_data }))
}
