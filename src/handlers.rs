//! C12: the admin/observability HTTP surface (spec §4's handler table).
//! Five read-only endpoints; no auth or rate limiting, since this is an
//! internal operator surface rather than the public API the teacher's
//! `handlers.rs` exposed (see DESIGN.md for what that drops).

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

fn into_api_error(err: anyhow::Error) -> ApiError {
    ApiError {
        message: err.to_string(),
    }
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let body = state.metrics.render().map_err(into_api_error)?;
    Ok((StatusCode::OK, body))
}

#[derive(Debug, Serialize)]
pub struct AssetSummary {
    pub symbol: String,
    pub name: String,
    pub asset_type: &'static str,
    pub enabled: bool,
}

pub async fn list_assets(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let assets = state.registry.list_enabled().await.map_err(into_api_error)?;
    let view: Vec<AssetSummary> = assets
        .into_iter()
        .map(|a| AssetSummary {
            symbol: a.symbol,
            name: a.name,
            asset_type: a.asset_type.as_str(),
            enabled: a.enabled,
        })
        .collect();
    Ok((StatusCode::OK, Json(view)))
}

pub async fn asset_score(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Response {
    let start = std::time::Instant::now();
    let result = crate::scoring::score_asset(&state.registry, &state.store, &symbol, Utc::now()).await;
    state.metrics.observe_scoring(&symbol, start.elapsed());

    match result {
        Ok(artifact) => (StatusCode::OK, Json(artifact)).into_response(),
        Err(err) if err.downcast_ref::<crate::scoring::AssetNotFound>().is_some() => {
            (StatusCode::NOT_FOUND, Json(ApiError { message: err.to_string() })).into_response()
        }
        Err(err) => into_api_error(err).into_response(),
    }
}

pub async fn active_alerts(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let alerts = state.db.alerts_pending().await.map_err(into_api_error)?;
    Ok((StatusCode::OK, Json(alerts)))
}
