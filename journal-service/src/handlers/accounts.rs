//! Chart of accounts and cash/bank registration.

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::models::{Account, CashBank, CashBankTransaction, CreateAccount, CreateCashBank};
use crate::startup::AppState;
use service_core::error::AppError;

/// Create an account. Its balance starts at zero.
///
/// POST /accounts
pub async fn create_account(
    State(state): State<AppState>,
    Json(req): Json<CreateAccount>,
) -> Result<(StatusCode, Json<Account>), AppError> {
    let account = state.db.create_account(&req).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// GET /accounts/:id
pub async fn get_account(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<Account>, AppError> {
    let account = state
        .db
        .get_account(account_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Account {} not found", account_id)))?;
    Ok(Json(account))
}

/// Register a cash/bank sub-ledger against an asset account.
///
/// POST /cash-banks
pub async fn create_cash_bank(
    State(state): State<AppState>,
    Json(req): Json<CreateCashBank>,
) -> Result<(StatusCode, Json<CashBank>), AppError> {
    let cash_bank = state.db.create_cash_bank(&req).await?;
    Ok((StatusCode::CREATED, Json(cash_bank)))
}

/// GET /cash-banks
pub async fn list_cash_banks(
    State(state): State<AppState>,
) -> Result<Json<Vec<CashBank>>, AppError> {
    let cash_banks = state.db.list_cash_banks().await?;
    Ok(Json(cash_banks))
}

/// Movement log of one cash/bank sub-ledger.
///
/// GET /cash-banks/:id/transactions
pub async fn cash_bank_transactions(
    State(state): State<AppState>,
    Path(cash_bank_id): Path<Uuid>,
) -> Result<Json<Vec<CashBankTransaction>>, AppError> {
    if state.db.get_cash_bank(cash_bank_id).await?.is_none() {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "Cash/bank {} not found",
            cash_bank_id
        )));
    }
    let transactions = state.db.cash_bank_transactions(cash_bank_id).await?;
    Ok(Json(transactions))
}
