use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use signoff_core::domain::matrix::{MatrixRulePatch, NewMatrixRule, RuleFilter};
use signoff_core::{ApprovalMatrixRule, RuleId};
use tracing::Instrument;

use super::extract::{ApiError, RequestActor};
use super::ApiState;

#[derive(Debug, Default, Deserialize)]
pub struct RuleListParams {
    pub document_type: Option<String>,
    pub is_active: Option<bool>,
}

pub async fn list(
    actor: RequestActor,
    State(state): State<ApiState>,
    params: Result<Query<RuleListParams>, QueryRejection>,
) -> Result<Json<Vec<ApprovalMatrixRule>>, ApiError> {
    let Query(params) = params.map_err(|rejection| actor.invalid_input(rejection.body_text()))?;
    let filter = RuleFilter {
        document_type: params.document_type.as_deref().map(|raw| actor.document_type(raw)).transpose()?,
        is_active: params.is_active,
    };

    let rules = state
        .matrix
        .list_rules(&actor.actor, &filter)
        .instrument(actor.span("matrix.list"))
        .await
        .map_err(|error| actor.fail(error))?;
    Ok(Json(rules))
}

pub async fn create(
    actor: RequestActor,
    State(state): State<ApiState>,
    payload: Result<Json<NewMatrixRule>, JsonRejection>,
) -> Result<(StatusCode, Json<ApprovalMatrixRule>), ApiError> {
    let Json(input) = payload.map_err(|rejection| actor.invalid_input(rejection.body_text()))?;

    let rule = state
        .matrix
        .create_rule(&actor.actor, input)
        .instrument(actor.span("matrix.create"))
        .await
        .map_err(|error| actor.fail(error))?;
    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn find(
    actor: RequestActor,
    State(state): State<ApiState>,
    Path(rule_id): Path<String>,
) -> Result<Json<ApprovalMatrixRule>, ApiError> {
    let rule = state
        .matrix
        .find_rule(&actor.actor, &RuleId(rule_id))
        .instrument(actor.span("matrix.find"))
        .await
        .map_err(|error| actor.fail(error))?;
    Ok(Json(rule))
}

pub async fn update(
    actor: RequestActor,
    State(state): State<ApiState>,
    Path(rule_id): Path<String>,
    payload: Result<Json<MatrixRulePatch>, JsonRejection>,
) -> Result<Json<ApprovalMatrixRule>, ApiError> {
    let Json(patch) = payload.map_err(|rejection| actor.invalid_input(rejection.body_text()))?;

    let rule = state
        .matrix
        .update_rule(&actor.actor, &RuleId(rule_id), patch)
        .instrument(actor.span("matrix.update"))
        .await
        .map_err(|error| actor.fail(error))?;
    Ok(Json(rule))
}

pub async fn delete(
    actor: RequestActor,
    State(state): State<ApiState>,
    Path(rule_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .matrix
        .delete_rule(&actor.actor, &RuleId(rule_id))
        .instrument(actor.span("matrix.delete"))
        .await
        .map_err(|error| actor.fail(error))?;
    Ok(StatusCode::NO_CONTENT)
}
