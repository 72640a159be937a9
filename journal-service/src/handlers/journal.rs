//! Journal posting, reversal, draft and drilldown handlers.

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    JournalEntry, JournalEntryWithLines, PostOutcome, PostingKey, PostingRequest,
    ReversalRequest, SourceType,
};
use crate::startup::AppState;
use service_core::error::AppError;

// ============================================================================
// Request/Response DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SourceQuery {
    pub source_type: SourceType,
    pub source_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct IntentQuery {
    pub source_type: SourceType,
    pub source_id: i64,
    pub purpose: String,
}

#[derive(Debug, Serialize)]
pub struct IntentCheckResponse {
    pub key: PostingKey,
    pub should_post: bool,
    /// Entry already holding the key.
    pub journal: Option<JournalEntry>,
}

fn outcome_status(outcome: &PostOutcome) -> StatusCode {
    if outcome.is_new() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Post a journal entry.
///
/// POST /journals
pub async fn post_journal(
    State(state): State<AppState>,
    Json(req): Json<PostingRequest>,
) -> Result<(StatusCode, Json<PostOutcome>), AppError> {
    let outcome = state.engine.post(&req).await?;
    Ok((outcome_status(&outcome), Json(outcome)))
}

/// Save a draft entry.
///
/// POST /journals/drafts
pub async fn save_draft(
    State(state): State<AppState>,
    Json(req): Json<PostingRequest>,
) -> Result<(StatusCode, Json<JournalEntryWithLines>), AppError> {
    let draft = state.engine.save_draft(&req).await?;
    Ok((StatusCode::CREATED, Json(draft)))
}

/// Post a previously saved draft.
///
/// POST /journals/:id/post
pub async fn post_draft(
    State(state): State<AppState>,
    Path(journal_id): Path<Uuid>,
) -> Result<(StatusCode, Json<PostOutcome>), AppError> {
    let outcome = state.engine.post_draft(journal_id).await?;
    Ok((outcome_status(&outcome), Json(outcome)))
}

/// Reverse a posted entry.
///
/// POST /journals/:id/reverse
pub async fn reverse_journal(
    State(state): State<AppState>,
    Path(journal_id): Path<Uuid>,
    body: Option<Json<ReversalRequest>>,
) -> Result<(StatusCode, Json<JournalEntryWithLines>), AppError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let reversal = state.engine.reverse(journal_id, &req).await?;
    Ok((StatusCode::CREATED, Json(reversal)))
}

/// Get one entry with its lines.
///
/// GET /journals/:id
pub async fn get_journal(
    State(state): State<AppState>,
    Path(journal_id): Path<Uuid>,
) -> Result<Json<JournalEntryWithLines>, AppError> {
    let journal = state
        .engine
        .get_entry(journal_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Journal {} not found", journal_id)))?;
    Ok(Json(journal))
}

/// Every entry emitted for one source document.
///
/// GET /journals?source_type=SALE&source_id=42
pub async fn find_journals(
    State(state): State<AppState>,
    Query(query): Query<SourceQuery>,
) -> Result<Json<Vec<JournalEntryWithLines>>, AppError> {
    let journals = state
        .engine
        .find_by_source(query.source_type, query.source_id)
        .await?;
    Ok(Json(journals))
}

/// Advisory idempotency check.
///
/// GET /posting-intents/check?source_type=SALE&source_id=42&purpose=COGS
pub async fn check_intent(
    State(state): State<AppState>,
    Query(query): Query<IntentQuery>,
) -> Result<Json<IntentCheckResponse>, AppError> {
    let key = PostingKey::new(query.source_type, query.source_id, query.purpose);
    let should_post = state.engine.should_post(&key).await?;
    let journal = state.engine.get_by_key(&key).await?.map(|j| j.entry);
    Ok(Json(IntentCheckResponse {
        key,
        should_post,
        journal,
    }))
}
