use std::fmt::Display;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use signoff_core::{Actor, ApprovalError, DocumentType, InterfaceError};
use tracing::{error, info_span, Span};
use uuid::Uuid;

pub const ACTOR_HEADER: &str = "x-actor-id";
pub const COMPANY_HEADER: &str = "x-company-id";
pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn from_approval(error: ApprovalError, correlation_id: &str) -> Self {
        let interface = error.into_interface(correlation_id);
        let status =
            StatusCode::from_u16(interface.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = match &interface {
            // Storage details stay in the logs.
            InterfaceError::ServiceUnavailable { message, .. } => {
                error!(
                    event_name = "api.request.persistence_failed",
                    correlation_id = %correlation_id,
                    error = %message,
                    "approval store unavailable"
                );
                interface.user_message().to_string()
            }
            _ => interface.message().to_string(),
        };

        Self {
            status,
            body: ErrorBody {
                error: interface.class(),
                message,
                correlation_id: interface.correlation_id().to_string(),
            },
        }
    }

    pub fn unauthenticated(message: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            body: ErrorBody {
                error: "unauthenticated_error",
                message: message.into(),
                correlation_id: correlation_id.into(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Caller identity taken from the gateway-set headers, plus the correlation
/// id every log line and error body of the request carries.
#[derive(Clone, Debug)]
pub struct RequestActor {
    pub actor: Actor,
    pub correlation_id: String,
}

impl RequestActor {
    pub fn span(&self, operation: &'static str) -> Span {
        info_span!(
            "api_request",
            operation,
            correlation_id = %self.correlation_id,
            company_id = %self.actor.company_id.0,
            actor_id = %self.actor.user_id.0,
        )
    }

    pub fn fail(&self, error: ApprovalError) -> ApiError {
        ApiError::from_approval(error, &self.correlation_id)
    }

    pub fn invalid_input(&self, detail: impl Display) -> ApiError {
        self.fail(ApprovalError::validation(detail.to_string()))
    }

    pub fn document_type(&self, raw: &str) -> Result<DocumentType, ApiError> {
        DocumentType::parse(raw)
            .ok_or_else(|| self.invalid_input(format!("unknown document_type `{raw}`")))
    }
}

impl<S> FromRequestParts<S> for RequestActor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation_id = header(&parts.headers, CORRELATION_HEADER)
            .map(str::to_owned)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let Some(user_id) = header(&parts.headers, ACTOR_HEADER) else {
            return Err(ApiError::unauthenticated(
                format!("missing `{ACTOR_HEADER}` header"),
                correlation_id,
            ));
        };
        let Some(company_id) = header(&parts.headers, COMPANY_HEADER) else {
            return Err(ApiError::unauthenticated(
                format!("missing `{COMPANY_HEADER}` header"),
                correlation_id,
            ));
        };

        let actor = Actor::new(user_id, company_id).with_correlation(correlation_id.clone());
        Ok(Self { actor, correlation_id })
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use axum::extract::FromRequestParts;
    use axum::http::{Request, StatusCode};
    use signoff_core::approvals::ports::RepositoryError;
    use signoff_core::ApprovalError;

    use super::{ApiError, RequestActor, ACTOR_HEADER, COMPANY_HEADER, CORRELATION_HEADER};

    #[tokio::test]
    async fn extracted_actor_carries_the_correlation_id() {
        let (mut parts, ()) = Request::builder()
            .header(ACTOR_HEADER, "U-FIN")
            .header(COMPANY_HEADER, "C1")
            .header(CORRELATION_HEADER, "corr-42")
            .body(())
            .expect("request")
            .into_parts();

        let extracted = RequestActor::from_request_parts(&mut parts, &()).await.expect("actor");

        assert_eq!(extracted.actor.user_id.0, "U-FIN");
        assert_eq!(extracted.actor.correlation_id.as_deref(), Some("corr-42"));
        assert_eq!(extracted.correlation_id, "corr-42");
    }

    #[test]
    fn persistence_failures_hide_storage_details() {
        let error = ApiError::from_approval(
            ApprovalError::from(RepositoryError::Database("disk I/O error at page 7".to_string())),
            "corr-1",
        );

        assert_eq!(error.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error.body.error, "persistence_error");
        assert!(!error.body.message.contains("page 7"));
        assert_eq!(error.body.correlation_id, "corr-1");
    }

    #[test]
    fn stale_state_keeps_entry_context() {
        let error = ApiError::from_approval(ApprovalError::stale("E-9", "rejected"), "corr-2");

        assert_eq!(error.status, StatusCode::CONFLICT);
        assert!(error.body.message.contains("E-9"));
        assert!(error.body.message.contains("rejected"));
    }
}
