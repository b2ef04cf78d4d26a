use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::rest::caller::CallerIdentity;
use crate::engine::ledger::TransactionPage;
use crate::error::AppError;
use crate::models::ride::PaymentMethod;
use crate::models::wallet::Transaction;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/wallet", get(get_balance))
        .route("/wallet/top-up", post(top_up))
        .route("/wallet/credit", post(admin_credit))
        .route("/wallet/debit", post(admin_debit))
        .route("/wallet/transactions", get(list_transactions))
        .route("/wallet/transactions/:id", get(get_transaction))
}

#[derive(Serialize)]
pub struct BalanceResponse {
    pub user_id: Uuid,
    pub balance: Decimal,
}

#[derive(Deserialize)]
pub struct TopUpRequest {
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct AdjustmentRequest {
    pub user_id: Uuid,
    pub amount: Decimal,
    #[serde(default)]
    pub ride_id: Option<Uuid>,
    pub description: String,
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub size: Option<usize>,
}

async fn get_balance(
    State(state): State<Arc<AppState>>,
    CallerIdentity(caller): CallerIdentity,
) -> Result<Json<BalanceResponse>, AppError> {
    let balance = state.ledger.balance(caller.user_id).await?;
    Ok(Json(BalanceResponse {
        user_id: caller.user_id,
        balance,
    }))
}

async fn top_up(
    State(state): State<Arc<AppState>>,
    CallerIdentity(caller): CallerIdentity,
    Json(payload): Json<TopUpRequest>,
) -> Result<Json<Transaction>, AppError> {
    if !payload.payment_method.is_external() {
        return Err(AppError::InvalidArgument(format!(
            "wallet top-up needs card or upi, got {}",
            payload.payment_method.as_str()
        )));
    }

    let description = payload
        .description
        .unwrap_or_else(|| "Wallet top-up".to_string());
    let tx = state
        .ledger
        .top_up(
            caller.user_id,
            payload.amount,
            payload.payment_method.as_str(),
            &description,
        )
        .await?;
    Ok(Json(tx))
}

async fn admin_credit(
    State(state): State<Arc<AppState>>,
    CallerIdentity(caller): CallerIdentity,
    Json(payload): Json<AdjustmentRequest>,
) -> Result<Json<Transaction>, AppError> {
    caller.require_admin()?;
    let tx = state
        .ledger
        .credit(payload.user_id, payload.amount, &payload.description)
        .await?;
    Ok(Json(tx))
}

async fn admin_debit(
    State(state): State<Arc<AppState>>,
    CallerIdentity(caller): CallerIdentity,
    Json(payload): Json<AdjustmentRequest>,
) -> Result<Json<Transaction>, AppError> {
    caller.require_admin()?;
    let tx = state
        .ledger
        .debit(
            payload.user_id,
            payload.amount,
            payload.ride_id,
            &payload.description,
        )
        .await?;
    Ok(Json(tx))
}

async fn list_transactions(
    State(state): State<Arc<AppState>>,
    CallerIdentity(caller): CallerIdentity,
    Query(query): Query<PageQuery>,
) -> Result<Json<TransactionPage>, AppError> {
    let page = state
        .ledger
        .list_transactions(
            caller.user_id,
            query.page.unwrap_or(1),
            query.size.unwrap_or(20),
        )
        .await?;
    Ok(Json(page))
}

async fn get_transaction(
    State(state): State<Arc<AppState>>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Transaction>, AppError> {
    Ok(Json(state.ledger.transaction(caller.user_id, id).await?))
}
