use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::portfolio::WatchlistItem;
use crate::utils::response::ApiResponse;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AddWatchlistRequest {
    pub symbol: String,
}

pub async fn get_watchlist(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<WatchlistItem>>>, AppError> {
    let items = state.portfolio.get_watchlist(user_id).await?;
    Ok(Json(ApiResponse::success(items)))
}

pub async fn add_to_watchlist(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<AddWatchlistRequest>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    if req.symbol.is_empty() {
        return Err(AppError::invalid_argument("symbol must not be empty"));
    }

    state.portfolio.add_to_watchlist(user_id, &req.symbol).await?;
    Ok(Json(ApiResponse::success(())))
}

pub async fn remove_from_watchlist(
    State(state): State<Arc<AppState>>,
    Path((user_id, symbol)): Path<(Uuid, String)>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    state
        .portfolio
        .remove_from_watchlist(user_id, &symbol)
        .await?;
    Ok(Json(ApiResponse::success(())))
}
