//! JSON API over the approval engine and matrix store.
//!
//! - `POST   /api/v1/approvals/submit`
//! - `POST   /api/v1/approvals/resubmit`
//! - `POST   /api/v1/approvals/withdraw`
//! - `POST   /api/v1/approvals/entries/{entry_id}/approve`
//! - `POST   /api/v1/approvals/entries/{entry_id}/reject`
//! - `GET    /api/v1/approvals/pending`
//! - `GET    /api/v1/approvals/documents/{document_type}/{document_id}/status`
//! - `GET    /api/v1/approvals/documents/{document_type}/{document_id}/history`
//! - `GET    /api/v1/approvals/dashboard`
//! - `GET    /api/v1/approval-matrix`, `POST /api/v1/approval-matrix`
//! - `GET | PATCH | DELETE /api/v1/approval-matrix/{rule_id}`
//!
//! Every route requires `x-actor-id` and `x-company-id`; `x-correlation-id`
//! is echoed in error bodies when supplied.

mod approvals;
mod extract;
mod matrix;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use signoff_core::{ApprovalEngine, MatrixStore};

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<ApprovalEngine>,
    pub matrix: Arc<MatrixStore>,
}

pub fn router(state: ApiState) -> Router {
    let routes = Router::new()
        .route("/approvals/submit", post(approvals::submit))
        .route("/approvals/resubmit", post(approvals::resubmit))
        .route("/approvals/withdraw", post(approvals::withdraw))
        .route("/approvals/entries/{entry_id}/approve", post(approvals::approve))
        .route("/approvals/entries/{entry_id}/reject", post(approvals::reject))
        .route("/approvals/pending", get(approvals::pending))
        .route(
            "/approvals/documents/{document_type}/{document_id}/status",
            get(approvals::status),
        )
        .route(
            "/approvals/documents/{document_type}/{document_id}/history",
            get(approvals::history),
        )
        .route("/approvals/dashboard", get(approvals::dashboard))
        .route("/approval-matrix", get(matrix::list).post(matrix::create))
        .route(
            "/approval-matrix/{rule_id}",
            get(matrix::find).patch(matrix::update).delete(matrix::delete),
        );

    Router::new().nest("/api/v1", routes).with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use signoff_core::approvals::memory::{
        InMemoryApprovalStore, InMemoryNotificationSink, InMemoryRoleDirectory,
    };
    use signoff_core::{ApprovalEngine, MatrixStore};
    use tower::ServiceExt;

    use super::{router, ApiState};

    fn app() -> Router {
        let store = Arc::new(InMemoryApprovalStore::default());
        let roles = InMemoryRoleDirectory::default();
        roles.define_role("C1", "admin");
        roles.assign("C1", "finance", "U-FIN");
        roles.assign("C1", "director", "U-DIR");
        roles.assign("C2", "finance", "U-OUT");
        let roles = Arc::new(roles);

        let engine = ApprovalEngine::new(
            store.clone(),
            store.clone(),
            roles.clone(),
            Arc::new(InMemoryNotificationSink::default()),
        );
        let matrix = MatrixStore::new(store, roles);
        router(ApiState { engine: Arc::new(engine), matrix: Arc::new(matrix) })
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        actor: Option<(&str, &str)>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri).header("x-correlation-id", "corr-test");
        if let Some((user, company)) = actor {
            builder = builder.header("x-actor-id", user).header("x-company-id", company);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };

        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).expect("json") };
        (status, value)
    }

    async fn seed_two_levels(app: &Router) {
        for (level, role, min) in [(1, "finance", "0"), (2, "director", "10000")] {
            let (status, _) = call(
                app,
                "POST",
                "/api/v1/approval-matrix",
                Some(("U-ADMIN", "C1")),
                Some(json!({
                    "document_type": "purchase_order",
                    "min_amount": min,
                    "max_amount": null,
                    "approver_role_id": role,
                    "approval_level": level
                })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }
    }

    async fn submit_po(app: &Router, document_id: &str, amount: &str) -> Value {
        let (status, body) = call(
            app,
            "POST",
            "/api/v1/approvals/submit",
            Some(("U-REQ", "C1")),
            Some(json!({
                "document_type": "purchase_order",
                "document_id": document_id,
                "document_number": format!("PO-{document_id}"),
                "amount": amount
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "submit failed: {body}");
        body
    }

    #[tokio::test]
    async fn missing_actor_headers_are_unauthorized() {
        let app = app();

        let (status, body) = call(&app, "GET", "/api/v1/approvals/pending", None, None).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthenticated_error");
        assert_eq!(body["correlation_id"], "corr-test");
    }

    #[tokio::test]
    async fn two_level_approval_over_http() {
        let app = app();
        seed_two_levels(&app).await;
        let submitted = submit_po(&app, "PO-1", "25000.00").await;
        assert_eq!(submitted["status"], "pending");
        let level_one = submitted["entries"][0]["id"].as_str().expect("entry id").to_string();
        let level_two = submitted["entries"][1]["id"].as_str().expect("entry id").to_string();

        let (status, pending) =
            call(&app, "GET", "/api/v1/approvals/pending", Some(("U-FIN", "C1")), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pending["total"], 1);

        let (status, early) = call(
            &app,
            "POST",
            &format!("/api/v1/approvals/entries/{level_two}/approve"),
            Some(("U-DIR", "C1")),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(early["error"], "out_of_order_error");

        for (entry, user) in [(&level_one, "U-FIN"), (&level_two, "U-DIR")] {
            let (status, _) = call(
                &app,
                "POST",
                &format!("/api/v1/approvals/entries/{entry}/approve"),
                Some((user, "C1")),
                Some(json!({ "comments": "ok" })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, summary) = call(
            &app,
            "GET",
            "/api/v1/approvals/documents/purchase_order/PO-1/status",
            Some(("U-REQ", "C1")),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["overall_status"], "approved");

        let (status, again) = call(
            &app,
            "POST",
            &format!("/api/v1/approvals/entries/{level_one}/reject"),
            Some(("U-FIN", "C1")),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(again["error"], "stale_state_error");
    }

    #[tokio::test]
    async fn decisions_accept_requests_without_a_body() {
        let app = app();
        seed_two_levels(&app).await;
        let submitted = submit_po(&app, "PO-5", "25000").await;
        let level_one = submitted["entries"][0]["id"].as_str().expect("entry id").to_string();
        let level_two = submitted["entries"][1]["id"].as_str().expect("entry id").to_string();

        let (status, approved) = call(
            &app,
            "POST",
            &format!("/api/v1/approvals/entries/{level_one}/approve"),
            Some(("U-FIN", "C1")),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "approve without body failed: {approved}");
        assert_eq!(approved["entry"]["action"], "approved");
        assert_eq!(approved["entry"]["comments"], Value::Null);

        let (status, rejected) = call(
            &app,
            "POST",
            &format!("/api/v1/approvals/entries/{level_two}/reject"),
            Some(("U-DIR", "C1")),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "reject without body failed: {rejected}");
        assert_eq!(rejected["document_status"], "rejected");
    }

    #[tokio::test]
    async fn malformed_decision_body_is_a_validation_error() {
        let app = app();
        seed_two_levels(&app).await;
        let submitted = submit_po(&app, "PO-6", "500").await;
        let level_one = submitted["entries"][0]["id"].as_str().expect("entry id").to_string();

        let (status, body) = call(
            &app,
            "POST",
            &format!("/api/v1/approvals/entries/{level_one}/approve"),
            Some(("U-FIN", "C1")),
            Some(json!({ "comments": 42 })),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "validation_error");
    }

    #[tokio::test]
    async fn submit_outside_configured_ranges_is_refused() {
        let app = app();
        let (status, _) = call(
            &app,
            "POST",
            "/api/v1/approval-matrix",
            Some(("U-ADMIN", "C1")),
            Some(json!({
                "document_type": "purchase_order",
                "min_amount": "0",
                "max_amount": "1000",
                "approver_role_id": "finance",
                "approval_level": 1
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/approvals/submit",
            Some(("U-REQ", "C1")),
            Some(json!({
                "document_type": "purchase_order",
                "document_id": "PO-7",
                "document_number": "PO-PO-7",
                "amount": "5000000"
            })),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "validation_error");
    }

    #[tokio::test]
    async fn rejection_is_reported_with_cascade_in_history() {
        let app = app();
        seed_two_levels(&app).await;
        let submitted = submit_po(&app, "PO-2", "15000").await;
        let level_one = submitted["entries"][0]["id"].as_str().expect("entry id").to_string();

        let (status, outcome) = call(
            &app,
            "POST",
            &format!("/api/v1/approvals/entries/{level_one}/reject"),
            Some(("U-FIN", "C1")),
            Some(json!({ "comments": "missing quote" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["document_status"], "rejected");
        assert_eq!(outcome["cascaded"].as_array().map(Vec::len), Some(1));

        let (status, history) = call(
            &app,
            "GET",
            "/api/v1/approvals/documents/purchase_order/PO-2/history",
            Some(("U-REQ", "C1")),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history["entries"][1]["is_cascade"], true);
    }

    #[tokio::test]
    async fn unknown_document_type_is_a_validation_error() {
        let app = app();

        let (status, body) = call(
            &app,
            "GET",
            "/api/v1/approvals/documents/timesheet/T-1/status",
            Some(("U-REQ", "C1")),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "validation_error");
        assert!(body["message"].as_str().unwrap_or_default().contains("timesheet"));
    }

    #[tokio::test]
    async fn other_company_dashboard_is_forbidden() {
        let app = app();

        let (status, body) = call(
            &app,
            "GET",
            "/api/v1/approvals/dashboard?company_id=C1&day=2026-03-02",
            Some(("U-OUT", "C2")),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden_error");
    }

    #[tokio::test]
    async fn referenced_rule_cannot_be_deleted_but_can_be_deactivated() {
        let app = app();
        seed_two_levels(&app).await;
        submit_po(&app, "PO-3", "500").await;

        let (_, rules) =
            call(&app, "GET", "/api/v1/approval-matrix?document_type=purchase_order", Some(("U-ADMIN", "C1")), None)
                .await;
        let finance_rule = rules
            .as_array()
            .and_then(|rules| rules.iter().find(|rule| rule["approval_level"] == 1))
            .and_then(|rule| rule["id"].as_str())
            .expect("finance rule")
            .to_string();

        let (status, body) = call(
            &app,
            "DELETE",
            &format!("/api/v1/approval-matrix/{finance_rule}"),
            Some(("U-ADMIN", "C1")),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "conflict_error");

        let (status, updated) = call(
            &app,
            "PATCH",
            &format!("/api/v1/approval-matrix/{finance_rule}"),
            Some(("U-ADMIN", "C1")),
            Some(json!({ "is_active": false })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["is_active"], false);
    }

    #[tokio::test]
    async fn submit_without_level_one_rule_is_auto_approved() {
        let app = app();

        let submitted = submit_po(&app, "PO-4", "42").await;

        assert_eq!(submitted["status"], "approved");
        assert_eq!(submitted["entries"].as_array().map(Vec::len), Some(0));
    }
}
