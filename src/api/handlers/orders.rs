use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;
use crate::models::order::{CreateOrderRequest, OrderResponse};
use crate::utils::response::ApiResponse;
use crate::AppState;

/// Submit a new order for matching.
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, AppError> {
    req.validate()
        .map_err(|e| AppError::invalid_argument(e.to_string()))?;

    let order = state.orders.insert_order(req).await?;
    Ok(Json(ApiResponse::success(order.into())))
}

/// Cancel a pending order.
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, AppError> {
    let order = state.orders.cancel_order(order_id).await?;
    Ok(Json(ApiResponse::success(order.into())))
}

pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, AppError> {
    let order = state.orders.get_order_by_id(order_id).await?;
    Ok(Json(ApiResponse::success(order.into())))
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub user_id: Uuid,
}

pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<ApiResponse<Vec<OrderResponse>>>, AppError> {
    let orders = state.orders.get_orders_by_user_id(query.user_id).await?;
    Ok(Json(ApiResponse::success(
        orders.into_iter().map(OrderResponse::from).collect(),
    )))
}
