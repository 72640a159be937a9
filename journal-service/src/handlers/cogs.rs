//! COGS handlers.

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::models::{BackfillReport, CogsOutcome};
use crate::startup::AppState;
use service_core::error::AppError;

#[derive(Debug, Deserialize)]
pub struct BackfillRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Recognize COGS for one sale.
///
/// POST /sales/:id/cogs
pub async fn compute_cogs(
    State(state): State<AppState>,
    Path(sale_id): Path<i64>,
) -> Result<(StatusCode, Json<CogsOutcome>), AppError> {
    let outcome = state.cogs.compute_and_post(sale_id).await?;
    let status = match outcome {
        CogsOutcome::Posted { .. } => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

/// Backfill COGS for eligible sales in a date range.
///
/// POST /cogs/backfill
pub async fn backfill_cogs(
    State(state): State<AppState>,
    Json(req): Json<BackfillRequest>,
) -> Result<Json<BackfillReport>, AppError> {
    let report = state.cogs.backfill(req.start_date, req.end_date).await?;
    Ok(Json(report))
}
