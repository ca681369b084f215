use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use signoff_core::approvals::{DashboardStats, Page, PendingQuery, StatusSummary};
use signoff_core::{
    ActionOutcome, ApprovalQueueEntry, ApprovalRequest, CompanyId, DocumentId, DocumentSubmission,
    DocumentType, EntryId, SubmitOutcome,
};
use tracing::Instrument;

use super::extract::{ApiError, RequestActor};
use super::ApiState;

#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    pub document_type: String,
    pub document_id: String,
    pub document_number: String,
    pub amount: Decimal,
}

impl SubmitBody {
    fn into_submission(self, actor: &RequestActor) -> Result<DocumentSubmission, ApiError> {
        Ok(DocumentSubmission {
            company_id: actor.actor.company_id.clone(),
            document_type: actor.document_type(&self.document_type)?,
            document_id: DocumentId(self.document_id),
            document_number: self.document_number,
            amount: self.amount,
            requested_by: actor.actor.user_id.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct WithdrawBody {
    pub document_type: String,
    pub document_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DecisionBody {
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PendingParams {
    pub document_type: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DashboardParams {
    pub company_id: Option<String>,
    pub day: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub document_type: DocumentType,
    pub document_id: DocumentId,
    pub entries: Vec<ApprovalQueueEntry>,
}

/// Comments are optional, so a decision may arrive without any body.
fn decision_body(
    actor: &RequestActor,
    payload: Result<Option<Json<DecisionBody>>, JsonRejection>,
) -> Result<DecisionBody, ApiError> {
    let body = payload.map_err(|rejection| actor.invalid_input(rejection.body_text()))?;
    Ok(body.map(|Json(body)| body).unwrap_or_default())
}

pub async fn submit(
    actor: RequestActor,
    State(state): State<ApiState>,
    payload: Result<Json<SubmitBody>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitOutcome>), ApiError> {
    let Json(body) = payload.map_err(|rejection| actor.invalid_input(rejection.body_text()))?;
    let submission = body.into_submission(&actor)?;

    let outcome = state
        .engine
        .submit(&actor.actor, submission)
        .instrument(actor.span("approvals.submit"))
        .await
        .map_err(|error| actor.fail(error))?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn resubmit(
    actor: RequestActor,
    State(state): State<ApiState>,
    payload: Result<Json<SubmitBody>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitOutcome>), ApiError> {
    let Json(body) = payload.map_err(|rejection| actor.invalid_input(rejection.body_text()))?;
    let submission = body.into_submission(&actor)?;

    let outcome = state
        .engine
        .resubmit(&actor.actor, submission)
        .instrument(actor.span("approvals.resubmit"))
        .await
        .map_err(|error| actor.fail(error))?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn withdraw(
    actor: RequestActor,
    State(state): State<ApiState>,
    payload: Result<Json<WithdrawBody>, JsonRejection>,
) -> Result<Json<ApprovalRequest>, ApiError> {
    let Json(body) = payload.map_err(|rejection| actor.invalid_input(rejection.body_text()))?;
    let document_type = actor.document_type(&body.document_type)?;

    let request = state
        .engine
        .withdraw(&actor.actor, document_type, &DocumentId(body.document_id))
        .instrument(actor.span("approvals.withdraw"))
        .await
        .map_err(|error| actor.fail(error))?;
    Ok(Json(request))
}

pub async fn approve(
    actor: RequestActor,
    State(state): State<ApiState>,
    Path(entry_id): Path<String>,
    payload: Result<Option<Json<DecisionBody>>, JsonRejection>,
) -> Result<Json<ActionOutcome>, ApiError> {
    let body = decision_body(&actor, payload)?;

    let outcome = state
        .engine
        .approve(&actor.actor, &EntryId(entry_id), body.comments)
        .instrument(actor.span("approvals.approve"))
        .await
        .map_err(|error| actor.fail(error))?;
    Ok(Json(outcome))
}

pub async fn reject(
    actor: RequestActor,
    State(state): State<ApiState>,
    Path(entry_id): Path<String>,
    payload: Result<Option<Json<DecisionBody>>, JsonRejection>,
) -> Result<Json<ActionOutcome>, ApiError> {
    let body = decision_body(&actor, payload)?;

    let outcome = state
        .engine
        .reject(&actor.actor, &EntryId(entry_id), body.comments)
        .instrument(actor.span("approvals.reject"))
        .await
        .map_err(|error| actor.fail(error))?;
    Ok(Json(outcome))
}

pub async fn pending(
    actor: RequestActor,
    State(state): State<ApiState>,
    params: Result<Query<PendingParams>, QueryRejection>,
) -> Result<Json<Page<ApprovalQueueEntry>>, ApiError> {
    let Query(params) = params.map_err(|rejection| actor.invalid_input(rejection.body_text()))?;
    let document_type = params.document_type.as_deref().map(|raw| actor.document_type(raw)).transpose()?;

    let page = state
        .engine
        .list_pending(
            &actor.actor,
            &PendingQuery { document_type, page: params.page, limit: params.limit },
        )
        .instrument(actor.span("approvals.pending"))
        .await
        .map_err(|error| actor.fail(error))?;
    Ok(Json(page))
}

pub async fn status(
    actor: RequestActor,
    State(state): State<ApiState>,
    Path((document_type, document_id)): Path<(String, String)>,
) -> Result<Json<StatusSummary>, ApiError> {
    let document_type = actor.document_type(&document_type)?;

    let summary = state
        .engine
        .status(&actor.actor, document_type, &DocumentId(document_id))
        .instrument(actor.span("approvals.status"))
        .await
        .map_err(|error| actor.fail(error))?;
    Ok(Json(summary))
}

pub async fn history(
    actor: RequestActor,
    State(state): State<ApiState>,
    Path((document_type, document_id)): Path<(String, String)>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let document_type = actor.document_type(&document_type)?;
    let document_id = DocumentId(document_id);

    let entries = state
        .engine
        .history(&actor.actor, document_type, &document_id)
        .instrument(actor.span("approvals.history"))
        .await
        .map_err(|error| actor.fail(error))?;
    Ok(Json(HistoryResponse { document_type, document_id, entries }))
}

pub async fn dashboard(
    actor: RequestActor,
    State(state): State<ApiState>,
    params: Result<Query<DashboardParams>, QueryRejection>,
) -> Result<Json<DashboardStats>, ApiError> {
    let Query(params) = params.map_err(|rejection| actor.invalid_input(rejection.body_text()))?;
    let company_id =
        params.company_id.map(CompanyId).unwrap_or_else(|| actor.actor.company_id.clone());
    let day = params.day.unwrap_or_else(|| Utc::now().date_naive());

    let stats = state
        .engine
        .dashboard_stats(&actor.actor, &company_id, day)
        .instrument(actor.span("approvals.dashboard"))
        .await
        .map_err(|error| actor.fail(error))?;
    Ok(Json(stats))
}
