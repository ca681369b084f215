use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::approvals::dashboard::{ActionableQuery, DashboardStats, Page, PendingQuery, StatusSummary};
use crate::approvals::matrix::MAX_APPROVAL_LEVEL;
use crate::approvals::ports::{
    AdapterRegistry, ApprovalNotification, ApprovalResolution, Decision, DecisionCommand,
    DecisionWrite, MatrixRepository, NotificationSink, QueueRepository, RepositoryError,
    RoleDirectory,
};
use crate::approvals::resolver::{self, ResolutionWarning};
use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use crate::domain::document::{DocumentId, DocumentSubmission, DocumentType};
use crate::domain::matrix::RuleFilter;
use crate::domain::queue::{
    actionable_level, sort_for_history, ApprovalAction, ApprovalQueueEntry, ApprovalRequest,
    DocumentStatus, EntryId, RequestId,
};
use crate::domain::tenant::{Actor, CompanyId};
use crate::errors::ApprovalError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    pub allow_resubmission: bool,
    pub max_approval_level: u8,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            allow_resubmission: true,
            max_approval_level: MAX_APPROVAL_LEVEL,
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

impl ApprovalPolicy {
    fn page_window(&self, page: Option<u32>, limit: Option<u32>) -> (u32, u32) {
        let page = page.unwrap_or(1).max(1);
        let limit = limit.unwrap_or(self.default_page_size).clamp(1, self.max_page_size.max(1));
        (page, limit)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub status: DocumentStatus,
    pub request: ApprovalRequest,
    pub entries: Vec<ApprovalQueueEntry>,
    pub warnings: Vec<ResolutionWarning>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub entry: ApprovalQueueEntry,
    pub cascaded: Vec<ApprovalQueueEntry>,
    pub document_status: DocumentStatus,
    pub next_level: Option<u8>,
}

/// Orchestrates submission, sequential sign-off and resolution of documents.
///
/// State transitions are authoritative once the queue repository accepts
/// them. Adapter callbacks and notifications run afterwards; their failures
/// are logged and never undo a transition.
pub struct ApprovalEngine {
    matrix: Arc<dyn MatrixRepository>,
    queue: Arc<dyn QueueRepository>,
    roles: Arc<dyn RoleDirectory>,
    adapters: AdapterRegistry,
    notifier: Arc<dyn NotificationSink>,
    audit: Arc<dyn AuditSink>,
    policy: ApprovalPolicy,
}

impl ApprovalEngine {
    pub fn new(
        matrix: Arc<dyn MatrixRepository>,
        queue: Arc<dyn QueueRepository>,
        roles: Arc<dyn RoleDirectory>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            matrix,
            queue,
            roles,
            adapters: AdapterRegistry::new(),
            notifier,
            audit: Arc::new(TracingAuditSink),
            policy: ApprovalPolicy::default(),
        }
    }

    pub fn with_adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_policy(mut self, policy: ApprovalPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &ApprovalPolicy {
        &self.policy
    }

    pub async fn submit(
        &self,
        actor: &Actor,
        submission: DocumentSubmission,
    ) -> Result<SubmitOutcome, ApprovalError> {
        self.check_submission(actor, &submission)?;

        if let Some(existing) = self
            .queue
            .find_latest_request(&submission.company_id, submission.document_type, &submission.document_id)
            .await?
        {
            return Err(ApprovalError::Conflict(format!(
                "document `{}` already has approval attempt {} ({}); use resubmit",
                existing.document_id.0,
                existing.attempt,
                existing.status.as_str()
            )));
        }

        self.open_attempt(actor, submission, 1).await
    }

    /// Start a fresh attempt for a document whose latest attempt was rejected
    /// or withdrawn. Earlier attempts are left as they are.
    pub async fn resubmit(
        &self,
        actor: &Actor,
        submission: DocumentSubmission,
    ) -> Result<SubmitOutcome, ApprovalError> {
        if !self.policy.allow_resubmission {
            return Err(ApprovalError::Conflict("resubmission is disabled".to_owned()));
        }
        self.check_submission(actor, &submission)?;

        let latest = self
            .queue
            .find_latest_request(&submission.company_id, submission.document_type, &submission.document_id)
            .await?
            .ok_or_else(|| ApprovalError::not_found("approval request", &submission.document_id.0))?;
        if !matches!(latest.status, DocumentStatus::Rejected | DocumentStatus::Withdrawn) {
            return Err(ApprovalError::Conflict(format!(
                "document `{}` attempt {} is {}; only rejected or withdrawn documents can be resubmitted",
                latest.document_id.0,
                latest.attempt,
                latest.status.as_str()
            )));
        }

        self.open_attempt(actor, submission, latest.attempt + 1).await
    }

    pub async fn withdraw(
        &self,
        actor: &Actor,
        document_type: DocumentType,
        document_id: &DocumentId,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let mut request = self.latest_request(actor, document_type, document_id).await?;
        if request.requested_by != actor.user_id {
            return Err(ApprovalError::Forbidden(format!(
                "only the requester may withdraw document `{}`",
                document_id.0
            )));
        }
        if request.status != DocumentStatus::Pending {
            return Err(ApprovalError::Conflict(format!(
                "document `{}` is already {}",
                document_id.0,
                request.status.as_str()
            )));
        }

        let withdrawn_at = Utc::now();
        if !self.queue.withdraw_request(&request.id, withdrawn_at).await? {
            return Err(ApprovalError::Conflict(format!(
                "document `{}` was resolved before it could be withdrawn",
                document_id.0
            )));
        }
        request.status = DocumentStatus::Withdrawn;
        request.resolved_at = Some(withdrawn_at);

        info!(
            event_name = "approvals.request.withdrawn",
            company_id = %request.company_id.0,
            document_type = request.document_type.as_str(),
            document_id = %request.document_id.0,
            attempt = request.attempt,
            "approval request withdrawn"
        );
        self.audit.emit(
            self.request_event(actor, &request, "approvals.request.withdrawn", AuditCategory::Withdrawal),
        );
        Ok(request)
    }

    pub async fn approve(
        &self,
        actor: &Actor,
        entry_id: &EntryId,
        comments: Option<String>,
    ) -> Result<ActionOutcome, ApprovalError> {
        self.decide(actor, entry_id, Decision::Approve, comments).await
    }

    pub async fn reject(
        &self,
        actor: &Actor,
        entry_id: &EntryId,
        comments: Option<String>,
    ) -> Result<ActionOutcome, ApprovalError> {
        self.decide(actor, entry_id, Decision::Reject, comments).await
    }

    /// Actionable entries the actor may sign, oldest request first.
    pub async fn list_pending(
        &self,
        actor: &Actor,
        query: &PendingQuery,
    ) -> Result<Page<ApprovalQueueEntry>, ApprovalError> {
        let (page, limit) = self.policy.page_window(query.page, query.limit);
        let role_ids = self.roles.roles_of(&actor.user_id, &actor.company_id).await?;
        if role_ids.is_empty() {
            return Ok(Page::empty(page, limit));
        }

        Ok(self
            .queue
            .list_actionable(&ActionableQuery {
                company_id: actor.company_id.clone(),
                role_ids,
                document_type: query.document_type,
                page,
                limit,
            })
            .await?)
    }

    pub async fn pending_for_approver(
        &self,
        actor: &Actor,
    ) -> Result<Vec<ApprovalQueueEntry>, ApprovalError> {
        let mut items = Vec::new();
        let mut page = 1;
        loop {
            let batch = self
                .list_pending(
                    actor,
                    &PendingQuery {
                        document_type: None,
                        page: Some(page),
                        limit: Some(self.policy.max_page_size),
                    },
                )
                .await?;
            let exhausted =
                batch.items.is_empty() || (items.len() + batch.items.len()) as u64 >= batch.total;
            items.extend(batch.items);
            if exhausted {
                return Ok(items);
            }
            page += 1;
        }
    }

    pub async fn status(
        &self,
        actor: &Actor,
        document_type: DocumentType,
        document_id: &DocumentId,
    ) -> Result<StatusSummary, ApprovalError> {
        let request = self.latest_request(actor, document_type, document_id).await?;
        let entries = self.queue.list_entries(&request.id).await?;
        Ok(StatusSummary::build(&request, &entries))
    }

    /// Every entry of every attempt, in audit order.
    pub async fn history(
        &self,
        actor: &Actor,
        document_type: DocumentType,
        document_id: &DocumentId,
    ) -> Result<Vec<ApprovalQueueEntry>, ApprovalError> {
        self.latest_request(actor, document_type, document_id).await?;
        let mut entries = self
            .queue
            .list_document_entries(&actor.company_id, document_type, document_id)
            .await?;
        sort_for_history(&mut entries);
        Ok(entries)
    }

    pub async fn dashboard_stats(
        &self,
        actor: &Actor,
        company_id: &CompanyId,
        day: NaiveDate,
    ) -> Result<DashboardStats, ApprovalError> {
        if company_id != &actor.company_id {
            return Err(ApprovalError::Forbidden(format!(
                "dashboard for company `{}` is not accessible",
                company_id.0
            )));
        }
        Ok(self.queue.dashboard_counts(company_id, day).await?)
    }

    fn check_submission(
        &self,
        actor: &Actor,
        submission: &DocumentSubmission,
    ) -> Result<(), ApprovalError> {
        if submission.company_id != actor.company_id {
            return Err(ApprovalError::Forbidden(format!(
                "cannot submit documents for company `{}`",
                submission.company_id.0
            )));
        }
        if submission.document_id.0.trim().is_empty() {
            return Err(ApprovalError::validation("document_id is required"));
        }
        if submission.document_number.trim().is_empty() {
            return Err(ApprovalError::validation("document_number is required"));
        }
        if submission.requested_by.0.trim().is_empty() {
            return Err(ApprovalError::validation("requested_by is required"));
        }
        Ok(())
    }

    async fn open_attempt(
        &self,
        actor: &Actor,
        submission: DocumentSubmission,
        attempt: u32,
    ) -> Result<SubmitOutcome, ApprovalError> {
        let rules = self
            .matrix
            .list_rules(
                &submission.company_id,
                &RuleFilter { document_type: Some(submission.document_type), is_active: Some(true) },
            )
            .await?;
        let resolution = resolver::resolve(
            &rules,
            &submission.company_id,
            submission.document_type,
            submission.amount,
        )
        .inspect_err(|error| {
            warn!(
                event_name = "approvals.submit.unresolved",
                company_id = %submission.company_id.0,
                document_type = submission.document_type.as_str(),
                document_id = %submission.document_id.0,
                error = %error,
                "submission refused by approval matrix"
            );
        })?;
        for warning in &resolution.warnings {
            warn!(
                event_name = "approvals.matrix.misconfigured",
                company_id = %submission.company_id.0,
                document_type = submission.document_type.as_str(),
                warning = ?warning,
                "approval matrix resolution warning"
            );
        }

        let now = Utc::now();
        let request_id = RequestId(Uuid::new_v4().to_string());
        let mut entries = Vec::with_capacity(resolution.levels.len());
        for level in &resolution.levels {
            if level.approval_level > self.policy.max_approval_level {
                warn!(
                    event_name = "approvals.submit.level_out_of_bounds",
                    company_id = %submission.company_id.0,
                    rule_id = %level.rule_id.0,
                    approval_level = level.approval_level,
                    "ignoring rule above the configured maximum approval level"
                );
                continue;
            }
            if !level.is_mandatory
                && self
                    .roles
                    .members_of(&submission.company_id, &level.approver_role_id)
                    .await?
                    .is_empty()
            {
                warn!(
                    event_name = "approvals.submit.optional_level_skipped",
                    company_id = %submission.company_id.0,
                    document_id = %submission.document_id.0,
                    approval_level = level.approval_level,
                    approver_role_id = %level.approver_role_id.0,
                    "optional level has no eligible approvers"
                );
                continue;
            }
            entries.push(ApprovalQueueEntry {
                id: EntryId(Uuid::new_v4().to_string()),
                request_id: request_id.clone(),
                company_id: submission.company_id.clone(),
                document_type: submission.document_type,
                document_id: submission.document_id.clone(),
                document_number: submission.document_number.clone(),
                attempt,
                approval_level: level.approval_level,
                amount: submission.amount,
                action: ApprovalAction::Pending,
                approver_role_id: level.approver_role_id.clone(),
                is_mandatory: level.is_mandatory,
                acted_by: None,
                action_at: None,
                comments: None,
                is_cascade: false,
                requested_by: submission.requested_by.clone(),
                requested_at: now,
            });
        }

        let auto_approved = entries.is_empty();
        let request = ApprovalRequest {
            id: request_id,
            company_id: submission.company_id,
            document_type: submission.document_type,
            document_id: submission.document_id,
            document_number: submission.document_number,
            attempt,
            amount: submission.amount,
            status: if auto_approved { DocumentStatus::Approved } else { DocumentStatus::Pending },
            requested_by: submission.requested_by,
            requested_at: now,
            resolved_at: if auto_approved { Some(now) } else { None },
        };

        self.queue
            .create_request(request.clone(), entries.clone())
            .await
            .map_err(|error| match error {
                RepositoryError::Constraint(message) => ApprovalError::Conflict(message),
                other => ApprovalError::Repository(other),
            })?;

        let event_type = if auto_approved {
            "approvals.submit.auto_approved"
        } else {
            "approvals.submit.queued"
        };
        info!(
            event_name = event_type,
            company_id = %request.company_id.0,
            document_type = request.document_type.as_str(),
            document_id = %request.document_id.0,
            attempt = request.attempt,
            levels = entries.len(),
            "document submitted for approval"
        );
        self.audit.emit(
            self.request_event(actor, &request, event_type, AuditCategory::Submission)
                .with_metadata("levels", entries.len().to_string()),
        );

        if auto_approved {
            self.resolve_document(actor, &request).await;
        } else if let Some(first) = entries.first() {
            self.announce_level(first).await;
        }

        Ok(SubmitOutcome {
            status: request.status,
            request,
            entries,
            warnings: resolution.warnings,
        })
    }

    async fn decide(
        &self,
        actor: &Actor,
        entry_id: &EntryId,
        decision: Decision,
        comments: Option<String>,
    ) -> Result<ActionOutcome, ApprovalError> {
        let entry = self
            .queue
            .find_entry(entry_id)
            .await?
            .ok_or_else(|| ApprovalError::not_found("approval entry", &entry_id.0))?;
        if entry.company_id != actor.company_id {
            return Err(ApprovalError::Forbidden(format!(
                "approval entry `{}` belongs to another company",
                entry_id.0
            )));
        }
        if entry.action != ApprovalAction::Pending {
            return Err(ApprovalError::stale(&entry_id.0, entry.action.as_str()));
        }

        let request = self
            .queue
            .find_request(&entry.request_id)
            .await?
            .ok_or_else(|| ApprovalError::not_found("approval request", &entry.request_id.0))?;
        if request.status != DocumentStatus::Pending {
            return Err(ApprovalError::stale(&entry_id.0, request.status.as_str()));
        }

        let siblings = self.queue.list_entries(&request.id).await?;
        if let Some(expected_level) = actionable_level(&siblings) {
            if expected_level != entry.approval_level {
                return Err(ApprovalError::OutOfOrder {
                    entry_id: entry_id.0.clone(),
                    expected_level,
                    actual_level: entry.approval_level,
                });
            }
        }

        if !self
            .roles
            .actor_has_role(&actor.user_id, &entry.approver_role_id, &actor.company_id)
            .await?
        {
            return Err(ApprovalError::Forbidden(format!(
                "user `{}` does not hold role `{}` required for level {}",
                actor.user_id.0, entry.approver_role_id.0, entry.approval_level
            )));
        }

        let write = self
            .queue
            .record_decision(DecisionCommand {
                entry_id: entry_id.clone(),
                decision,
                actor: actor.user_id.clone(),
                comments,
                acted_at: Utc::now(),
            })
            .await?;

        let (entry, cascaded, request) = match write {
            DecisionWrite::Applied { entry, cascaded, request } => (entry, cascaded, request),
            DecisionWrite::Stale { actual } => {
                warn!(
                    event_name = "approvals.entry.stale",
                    entry_id = %entry_id.0,
                    actual = actual.as_str(),
                    "decision lost a concurrent update"
                );
                return Err(ApprovalError::stale(&entry_id.0, actual.as_str()));
            }
            DecisionWrite::Closed { status } => {
                return Err(ApprovalError::stale(&entry_id.0, status.as_str()));
            }
            DecisionWrite::OutOfOrder { expected_level, actual_level } => {
                return Err(ApprovalError::OutOfOrder {
                    entry_id: entry_id.0.clone(),
                    expected_level,
                    actual_level,
                });
            }
            DecisionWrite::Missing => {
                return Err(ApprovalError::not_found("approval entry", &entry_id.0));
            }
        };

        let event_type = match decision {
            Decision::Approve => "approvals.entry.approved",
            Decision::Reject => "approvals.entry.rejected",
        };
        info!(
            event_name = event_type,
            company_id = %entry.company_id.0,
            document_id = %entry.document_id.0,
            entry_id = %entry.id.0,
            approval_level = entry.approval_level,
            cascaded = cascaded.len(),
            document_status = request.status.as_str(),
            "approval decision recorded"
        );
        self.audit.emit(
            self.request_event(actor, &request, event_type, AuditCategory::Decision)
                .with_metadata("entry_id", entry.id.0.clone())
                .with_metadata("approval_level", entry.approval_level.to_string())
                .with_metadata("cascaded", cascaded.len().to_string()),
        );

        let mut next_level = None;
        if request.status.is_terminal() {
            self.resolve_document(actor, &request).await;
        } else {
            let remaining = self.queue.list_entries(&request.id).await?;
            next_level = actionable_level(&remaining);
            if let Some(next) = remaining
                .iter()
                .find(|candidate| Some(candidate.approval_level) == next_level)
            {
                self.announce_level(next).await;
            }
        }

        Ok(ActionOutcome { entry, cascaded, document_status: request.status, next_level })
    }

    async fn latest_request(
        &self,
        actor: &Actor,
        document_type: DocumentType,
        document_id: &DocumentId,
    ) -> Result<ApprovalRequest, ApprovalError> {
        self.queue
            .find_latest_request(&actor.company_id, document_type, document_id)
            .await?
            .ok_or_else(|| ApprovalError::not_found("approval request", &document_id.0))
    }

    async fn resolve_document(&self, actor: &Actor, request: &ApprovalRequest) {
        let resolution = ApprovalResolution {
            company_id: request.company_id.clone(),
            document_type: request.document_type,
            document_id: request.document_id.clone(),
            document_number: request.document_number.clone(),
            attempt: request.attempt,
            final_status: request.status,
        };

        match self.adapters.get(request.document_type) {
            Some(adapter) => {
                if let Err(adapter_error) = adapter.on_approval_resolved(&resolution).await {
                    error!(
                        event_name = "approvals.adapter.failed",
                        company_id = %request.company_id.0,
                        document_type = request.document_type.as_str(),
                        document_id = %request.document_id.0,
                        error = %adapter_error,
                        "document adapter rejected the final status"
                    );
                    self.audit.emit(
                        AuditEvent::new(
                            request.company_id.clone(),
                            "approvals.adapter.failed",
                            AuditCategory::Dispatch,
                            "system",
                            AuditOutcome::Failed,
                        )
                        .for_document(request.document_type, request.document_id.clone())
                        .with_correlation(actor.correlation_id.clone())
                        .with_metadata("error", adapter_error.to_string()),
                    );
                }
            }
            None => warn!(
                event_name = "approvals.adapter.missing",
                document_type = request.document_type.as_str(),
                document_id = %request.document_id.0,
                "no document adapter registered"
            ),
        }

        self.dispatch(ApprovalNotification::Resolved {
            company_id: request.company_id.clone(),
            document_type: request.document_type,
            document_id: request.document_id.clone(),
            document_number: request.document_number.clone(),
            final_status: request.status,
            requested_by: request.requested_by.clone(),
        })
        .await;
    }

    async fn announce_level(&self, entry: &ApprovalQueueEntry) {
        let recipients = match self.roles.members_of(&entry.company_id, &entry.approver_role_id).await {
            Ok(recipients) => recipients,
            Err(lookup_error) => {
                error!(
                    event_name = "approvals.notification.recipients_failed",
                    entry_id = %entry.id.0,
                    approver_role_id = %entry.approver_role_id.0,
                    error = %lookup_error,
                    "could not resolve approvers to notify"
                );
                Vec::new()
            }
        };

        self.dispatch(ApprovalNotification::ActionRequired {
            company_id: entry.company_id.clone(),
            document_type: entry.document_type,
            document_id: entry.document_id.clone(),
            document_number: entry.document_number.clone(),
            entry_id: entry.id.clone(),
            approval_level: entry.approval_level,
            approver_role_id: entry.approver_role_id.clone(),
            recipients,
        })
        .await;
    }

    async fn dispatch(&self, notification: ApprovalNotification) {
        if let Err(dispatch_error) = self.notifier.notify(notification).await {
            error!(
                event_name = "approvals.notification.failed",
                error = %dispatch_error,
                "approval notification was not delivered"
            );
        }
    }

    fn request_event(
        &self,
        actor: &Actor,
        request: &ApprovalRequest,
        event_type: &str,
        category: AuditCategory,
    ) -> AuditEvent {
        AuditEvent::new(
            request.company_id.clone(),
            event_type,
            category,
            actor.user_id.0.clone(),
            AuditOutcome::Success,
        )
        .for_document(request.document_type, request.document_id.clone())
        .with_correlation(actor.correlation_id.clone())
        .with_metadata("request_id", request.id.0.clone())
        .with_metadata("attempt", request.attempt.to_string())
        .with_metadata("status", request.status.as_str())
    }
}
