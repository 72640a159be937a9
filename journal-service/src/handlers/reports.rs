//! Read-only report handlers: validation, statements and the chart of accounts.

use axum::extract::{Json, Query, State};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use crate::models::{
    AccountNode, CashFlowStatement, CogsSummary, TrialBalance, ValidationReport, ValidationScope,
};
use crate::startup::AppState;
use service_core::error::AppError;

#[derive(Debug, Deserialize)]
pub struct ValidationQuery {
    #[serde(default)]
    pub scope: ValidationScope,
}

#[derive(Debug, Deserialize)]
pub struct DateRangeQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct AsOfQuery {
    pub as_of: Option<NaiveDate>,
}

/// Run the integrity validator.
///
/// GET /validation?scope=all
pub async fn validate_ledger(
    State(state): State<AppState>,
    Query(query): Query<ValidationQuery>,
) -> Result<Json<ValidationReport>, AppError> {
    let report = state.validator.validate(query.scope).await?;
    Ok(Json(report))
}

/// Cash flow statement for an inclusive date range.
///
/// GET /reports/cash-flow?start_date=2024-01-01&end_date=2024-01-31
pub async fn cash_flow(
    State(state): State<AppState>,
    Query(query): Query<DateRangeQuery>,
) -> Result<Json<CashFlowStatement>, AppError> {
    let statement = state
        .cash_flow
        .aggregate(query.start_date, query.end_date)
        .await?;
    Ok(Json(statement))
}

/// Posted COGS for an inclusive date range.
///
/// GET /reports/cogs?start_date=2024-01-01&end_date=2024-01-31
pub async fn cogs_summary(
    State(state): State<AppState>,
    Query(query): Query<DateRangeQuery>,
) -> Result<Json<CogsSummary>, AppError> {
    let summary = state.cogs.summary(query.start_date, query.end_date).await?;
    Ok(Json(summary))
}

/// Trial balance, today by default.
///
/// GET /reports/trial-balance?as_of=2024-01-31
pub async fn trial_balance(
    State(state): State<AppState>,
    Query(query): Query<AsOfQuery>,
) -> Result<Json<TrialBalance>, AppError> {
    let as_of = query.as_of.unwrap_or_else(|| Utc::now().date_naive());
    let tb = state.db.trial_balance(as_of).await?;
    Ok(Json(tb))
}

/// Chart of accounts with derived header balances.
///
/// GET /accounts/tree
pub async fn account_tree(
    State(state): State<AppState>,
) -> Result<Json<Vec<AccountNode>>, AppError> {
    let tree = state.db.account_tree().await?;
    Ok(Json(tree))
}
