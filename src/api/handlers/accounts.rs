use axum::extract::{Path, State};
use axum::Json;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::portfolio::{
    Account, CreateAccountRequest, DepositRequest, Holding, PortfolioSummary, Transaction,
    TransferRequest,
};
use crate::utils::response::ApiResponse;
use crate::AppState;

pub async fn create_account(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<Json<ApiResponse<Account>>, AppError> {
    let account = state.portfolio.create_account(req).await?;
    Ok(Json(ApiResponse::success(account)))
}

pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    state.portfolio.delete_account(account_id).await?;
    Ok(Json(ApiResponse::success(())))
}

pub async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Account>>, AppError> {
    let account = state.portfolio.get_account(account_id).await?;
    Ok(Json(ApiResponse::success(account)))
}

/// All of a user's accounts with their combined balance.
pub async fn get_portfolio_summary(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiResponse<PortfolioSummary>>, AppError> {
    let summary = state.portfolio.get_portfolio_summary(user_id).await?;
    Ok(Json(ApiResponse::success(summary)))
}

pub async fn get_holdings(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<Holding>>>, AppError> {
    let holdings = state.portfolio.get_holdings(account_id).await?;
    Ok(Json(ApiResponse::success(holdings)))
}

pub async fn get_holding(
    State(state): State<Arc<AppState>>,
    Path((account_id, symbol)): Path<(Uuid, String)>,
) -> Result<Json<ApiResponse<Holding>>, AppError> {
    let holding = state.portfolio.get_holding(account_id, &symbol).await?;
    Ok(Json(ApiResponse::success(holding)))
}

pub async fn get_transactions(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<Transaction>>>, AppError> {
    let transactions = state.portfolio.get_transactions(account_id).await?;
    Ok(Json(ApiResponse::success(transactions)))
}

pub async fn deposit(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<Uuid>,
    Json(req): Json<DepositRequest>,
) -> Result<Json<ApiResponse<Account>>, AppError> {
    let account = state
        .portfolio
        .deposit(account_id, req.amount, req.currency)
        .await?;
    Ok(Json(ApiResponse::success(account)))
}

pub async fn transfer(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TransferRequest>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    state
        .portfolio
        .transfer(
            req.from_account_id,
            req.to_account_id,
            req.amount,
            req.currency,
        )
        .await?;
    Ok(Json(ApiResponse::success(())))
}
