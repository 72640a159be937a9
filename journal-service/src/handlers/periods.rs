//! Accounting period closing handlers.

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::models::{ClosePeriodRequest, ClosedPeriod, PeriodClosing, PeriodStatus};
use crate::startup::AppState;
use service_core::error::AppError;

#[derive(Debug, Deserialize)]
pub struct PeriodStatusQuery {
    pub date: NaiveDate,
}

/// Close a period into retained earnings.
///
/// POST /periods/close
pub async fn close_period(
    State(state): State<AppState>,
    Json(req): Json<ClosePeriodRequest>,
) -> Result<(StatusCode, Json<PeriodClosing>), AppError> {
    let closing = state
        .periods
        .close(req.start_date, req.end_date, req.description.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(closing)))
}

/// GET /periods
pub async fn list_periods(
    State(state): State<AppState>,
) -> Result<Json<Vec<ClosedPeriod>>, AppError> {
    Ok(Json(state.periods.list().await?))
}

/// Whether a date still accepts entries.
///
/// GET /periods/status?date=2024-01-15
pub async fn period_status(
    State(state): State<AppState>,
    Query(query): Query<PeriodStatusQuery>,
) -> Result<Json<PeriodStatus>, AppError> {
    Ok(Json(state.periods.status(query.date).await?))
}
