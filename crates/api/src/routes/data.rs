//! Sensor Data Routes

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;

use crate::error::ApiError;
use crate::AppState;
use storage::SensorRecord;

/// Query parameters for the history endpoint
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Maximum number of records to return
    pub limit: Option<u32>,
}

/// Most recent reading
pub async fn get_latest(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SensorRecord>, ApiError> {
    match state.repository.latest().await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(ApiError::NotFound("no sensor data recorded yet")),
        Err(e) => {
            error!("Failed to fetch latest data: {}", e);
            Err(ApiError::Internal("failed to fetch latest data"))
        }
    }
}

/// Recent readings, newest first
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<SensorRecord>>, ApiError> {
    let Query(params) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let limit = params
        .limit
        .unwrap_or(state.history_default_limit)
        .min(state.history_max_limit)
        .max(1);

    state.repository.history(limit).await.map(Json).map_err(|e| {
        error!("Failed to fetch history: {}", e);
        ApiError::Internal("failed to fetch history")
    })
}
