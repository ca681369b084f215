use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::approvals::dashboard::{ActionableQuery, DashboardStats, Page};
use crate::approvals::ports::{
    AdapterError, ApprovalNotification, ApprovalResolution, DecisionCommand, DecisionWrite,
    Decision, DocumentAdapter, MatrixRepository, NotificationError, NotificationSink,
    QueueRepository, RepositoryError, RoleDirectory, RuleDeletion,
};
use crate::domain::document::{DocumentId, DocumentType};
use crate::domain::matrix::{ApprovalMatrixRule, RuleFilter, RuleId};
use crate::domain::queue::{
    aggregate_status, ApprovalAction, ApprovalQueueEntry, ApprovalRequest, DocumentStatus,
    EntryId, RequestId, CASCADE_REJECTION_COMMENT,
};
use crate::domain::tenant::{CompanyId, RoleId, UserId};

#[derive(Default)]
struct StoreState {
    rules: Vec<ApprovalMatrixRule>,
    requests: Vec<ApprovalRequest>,
    entries: Vec<ApprovalQueueEntry>,
}

impl StoreState {
    fn request(&self, id: &RequestId) -> Option<&ApprovalRequest> {
        self.requests.iter().find(|request| &request.id == id)
    }

    fn lowest_pending_level(&self, request_id: &RequestId) -> Option<u8> {
        self.entries
            .iter()
            .filter(|entry| &entry.request_id == request_id && entry.action == ApprovalAction::Pending)
            .map(|entry| entry.approval_level)
            .min()
    }

    fn is_actionable(&self, entry: &ApprovalQueueEntry) -> bool {
        entry.action == ApprovalAction::Pending
            && self
                .request(&entry.request_id)
                .map(|request| request.status == DocumentStatus::Pending)
                .unwrap_or(false)
            && self.lowest_pending_level(&entry.request_id) == Some(entry.approval_level)
    }
}

/// Matrix and queue storage in one process-local map. Every operation runs
/// under a single lock, which gives the same all-or-nothing behaviour as the
/// SQL transactions.
#[derive(Clone, Default)]
pub struct InMemoryApprovalStore {
    state: Arc<Mutex<StoreState>>,
}

#[async_trait]
impl MatrixRepository for InMemoryApprovalStore {
    async fn insert_rule(&self, rule: ApprovalMatrixRule) -> Result<(), RepositoryError> {
        let mut state = lock(&self.state);
        if state.rules.iter().any(|existing| existing.id == rule.id) {
            return Err(RepositoryError::Constraint(format!("duplicate rule id `{}`", rule.id.0)));
        }
        state.rules.push(rule);
        Ok(())
    }

    async fn find_rule(&self, id: &RuleId) -> Result<Option<ApprovalMatrixRule>, RepositoryError> {
        let state = lock(&self.state);
        Ok(state.rules.iter().find(|rule| &rule.id == id).cloned())
    }

    async fn update_rule(&self, rule: ApprovalMatrixRule) -> Result<(), RepositoryError> {
        let mut state = lock(&self.state);
        if let Some(existing) = state.rules.iter_mut().find(|existing| existing.id == rule.id) {
            *existing = rule;
        }
        Ok(())
    }

    async fn delete_rule_if_unreferenced(
        &self,
        id: &RuleId,
    ) -> Result<RuleDeletion, RepositoryError> {
        let mut state = lock(&self.state);
        let Some(rule) = state.rules.iter().find(|rule| &rule.id == id).cloned() else {
            return Ok(RuleDeletion::NotFound);
        };

        let pending_entries = state
            .entries
            .iter()
            .filter(|entry| {
                entry.company_id == rule.company_id
                    && entry.document_type == rule.document_type
                    && entry.approver_role_id == rule.approver_role_id
                    && entry.approval_level == rule.approval_level
                    && entry.action == ApprovalAction::Pending
                    && state
                        .request(&entry.request_id)
                        .map(|request| request.status == DocumentStatus::Pending)
                        .unwrap_or(false)
            })
            .count() as u64;
        if pending_entries > 0 {
            return Ok(RuleDeletion::Referenced { pending_entries });
        }

        state.rules.retain(|existing| &existing.id != id);
        Ok(RuleDeletion::Deleted)
    }

    async fn list_rules(
        &self,
        company_id: &CompanyId,
        filter: &RuleFilter,
    ) -> Result<Vec<ApprovalMatrixRule>, RepositoryError> {
        let state = lock(&self.state);
        let mut rules: Vec<ApprovalMatrixRule> = state
            .rules
            .iter()
            .filter(|rule| &rule.company_id == company_id)
            .filter(|rule| filter.document_type.map_or(true, |kind| rule.document_type == kind))
            .filter(|rule| filter.is_active.map_or(true, |active| rule.is_active == active))
            .cloned()
            .collect();
        rules.sort_by(|left, right| {
            left.document_type
                .as_str()
                .cmp(right.document_type.as_str())
                .then_with(|| left.approval_level.cmp(&right.approval_level))
                .then_with(|| left.min_amount.cmp(&right.min_amount))
                .then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(rules)
    }
}

#[async_trait]
impl QueueRepository for InMemoryApprovalStore {
    async fn create_request(
        &self,
        request: ApprovalRequest,
        entries: Vec<ApprovalQueueEntry>,
    ) -> Result<(), RepositoryError> {
        let mut state = lock(&self.state);
        let duplicate_attempt = state.requests.iter().any(|existing| {
            existing.id == request.id
                || (existing.company_id == request.company_id
                    && existing.document_type == request.document_type
                    && existing.document_id == request.document_id
                    && existing.attempt == request.attempt)
        });
        if duplicate_attempt {
            return Err(RepositoryError::Constraint(format!(
                "attempt {} already exists for document `{}`",
                request.attempt, request.document_id.0
            )));
        }

        let mut levels = BTreeSet::new();
        if !entries.iter().all(|entry| levels.insert(entry.approval_level)) {
            return Err(RepositoryError::Constraint(
                "duplicate approval level within one request".to_owned(),
            ));
        }

        state.requests.push(request);
        state.entries.extend(entries);
        Ok(())
    }

    async fn find_request(
        &self,
        id: &RequestId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let state = lock(&self.state);
        Ok(state.request(id).cloned())
    }

    async fn find_latest_request(
        &self,
        company_id: &CompanyId,
        document_type: DocumentType,
        document_id: &DocumentId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let state = lock(&self.state);
        Ok(state
            .requests
            .iter()
            .filter(|request| {
                &request.company_id == company_id
                    && request.document_type == document_type
                    && &request.document_id == document_id
            })
            .max_by_key(|request| request.attempt)
            .cloned())
    }

    async fn find_entry(&self, id: &EntryId) -> Result<Option<ApprovalQueueEntry>, RepositoryError> {
        let state = lock(&self.state);
        Ok(state.entries.iter().find(|entry| &entry.id == id).cloned())
    }

    async fn list_entries(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<ApprovalQueueEntry>, RepositoryError> {
        let state = lock(&self.state);
        let mut entries: Vec<ApprovalQueueEntry> =
            state.entries.iter().filter(|entry| &entry.request_id == request_id).cloned().collect();
        entries.sort_by_key(|entry| entry.approval_level);
        Ok(entries)
    }

    async fn list_document_entries(
        &self,
        company_id: &CompanyId,
        document_type: DocumentType,
        document_id: &DocumentId,
    ) -> Result<Vec<ApprovalQueueEntry>, RepositoryError> {
        let state = lock(&self.state);
        let mut entries: Vec<ApprovalQueueEntry> = state
            .entries
            .iter()
            .filter(|entry| {
                &entry.company_id == company_id
                    && entry.document_type == document_type
                    && &entry.document_id == document_id
            })
            .cloned()
            .collect();
        entries.sort_by_key(|entry| (entry.attempt, entry.approval_level));
        Ok(entries)
    }

    async fn record_decision(
        &self,
        command: DecisionCommand,
    ) -> Result<DecisionWrite, RepositoryError> {
        let mut state = lock(&self.state);
        let Some(entry) = state.entries.iter().find(|entry| entry.id == command.entry_id).cloned()
        else {
            return Ok(DecisionWrite::Missing);
        };
        let Some(request) = state.request(&entry.request_id).cloned() else {
            return Ok(DecisionWrite::Missing);
        };

        if entry.action != ApprovalAction::Pending {
            return Ok(DecisionWrite::Stale { actual: entry.action });
        }
        if request.status != DocumentStatus::Pending {
            return Ok(DecisionWrite::Closed { status: request.status });
        }
        if let Some(expected_level) = state.lowest_pending_level(&entry.request_id) {
            if expected_level != entry.approval_level {
                return Ok(DecisionWrite::OutOfOrder {
                    expected_level,
                    actual_level: entry.approval_level,
                });
            }
        }

        let mut updated = None;
        let mut cascaded = Vec::new();
        for sibling in state.entries.iter_mut().filter(|sibling| sibling.request_id == request.id) {
            if sibling.id == command.entry_id {
                sibling.action = command.decision.action();
                sibling.acted_by = Some(command.actor.clone());
                sibling.action_at = Some(command.acted_at);
                sibling.comments = command.comments.clone();
                updated = Some(sibling.clone());
            } else if command.decision == Decision::Reject
                && sibling.action == ApprovalAction::Pending
            {
                mark_cascaded(sibling, &command.actor, command.acted_at);
                cascaded.push(sibling.clone());
            }
        }
        cascaded.sort_by_key(|entry| entry.approval_level);

        let siblings: Vec<ApprovalQueueEntry> =
            state.entries.iter().filter(|sibling| sibling.request_id == request.id).cloned().collect();
        let status = aggregate_status(&siblings);
        let mut stored_request = request;
        if let Some(header) = state.requests.iter_mut().find(|header| header.id == stored_request.id) {
            header.status = status;
            if status.is_terminal() {
                header.resolved_at = Some(command.acted_at);
            }
            stored_request = header.clone();
        }

        match updated {
            Some(entry) => Ok(DecisionWrite::Applied { entry, cascaded, request: stored_request }),
            None => Ok(DecisionWrite::Missing),
        }
    }

    async fn withdraw_request(
        &self,
        request_id: &RequestId,
        withdrawn_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut state = lock(&self.state);
        match state.requests.iter_mut().find(|request| &request.id == request_id) {
            Some(request) if request.status == DocumentStatus::Pending => {
                request.status = DocumentStatus::Withdrawn;
                request.resolved_at = Some(withdrawn_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_actionable(
        &self,
        query: &ActionableQuery,
    ) -> Result<Page<ApprovalQueueEntry>, RepositoryError> {
        let state = lock(&self.state);
        let mut matching: Vec<ApprovalQueueEntry> = state
            .entries
            .iter()
            .filter(|entry| entry.company_id == query.company_id)
            .filter(|entry| query.role_ids.contains(&entry.approver_role_id))
            .filter(|entry| query.document_type.map_or(true, |kind| entry.document_type == kind))
            .filter(|entry| state.is_actionable(entry))
            .cloned()
            .collect();
        matching.sort_by(|left, right| {
            left.requested_at.cmp(&right.requested_at).then_with(|| left.id.0.cmp(&right.id.0))
        });

        let total = matching.len() as u64;
        let offset = usize::try_from(Page::<()>::offset(query.page, query.limit)).unwrap_or(usize::MAX);
        let items = matching.into_iter().skip(offset).take(query.limit as usize).collect();
        Ok(Page { items, page: query.page, limit: query.limit, total })
    }

    async fn dashboard_counts(
        &self,
        company_id: &CompanyId,
        day: NaiveDate,
    ) -> Result<DashboardStats, RepositoryError> {
        let state = lock(&self.state);
        let mut stats = DashboardStats::default();
        let acted_on_day =
            |entry: &ApprovalQueueEntry| entry.action_at.map(|at| at.date_naive() == day).unwrap_or(false);

        for entry in state.entries.iter().filter(|entry| &entry.company_id == company_id) {
            match entry.action {
                ApprovalAction::Pending if state.is_actionable(entry) => {
                    stats.pending += 1;
                    *stats.pending_by_document_type.entry(entry.document_type).or_default() += 1;
                }
                ApprovalAction::Approved if acted_on_day(entry) => stats.approved_today += 1,
                ApprovalAction::Rejected if !entry.is_cascade && acted_on_day(entry) => {
                    stats.rejected_today += 1
                }
                _ => {}
            }
        }
        Ok(stats)
    }
}

fn mark_cascaded(entry: &mut ApprovalQueueEntry, actor: &UserId, acted_at: DateTime<Utc>) {
    entry.action = ApprovalAction::Rejected;
    entry.acted_by = Some(actor.clone());
    entry.action_at = Some(acted_at);
    entry.comments = Some(CASCADE_REJECTION_COMMENT.to_owned());
    entry.is_cascade = true;
}

/// Role directory backed by a mutable map, for tests and local runs.
#[derive(Clone, Default)]
pub struct InMemoryRoleDirectory {
    // (company, role) -> members
    assignments: Arc<Mutex<HashMap<(String, String), BTreeSet<String>>>>,
}

impl InMemoryRoleDirectory {
    pub fn define_role(&self, company_id: &str, role_id: &str) {
        let mut assignments = lock(&self.assignments);
        assignments.entry((company_id.to_owned(), role_id.to_owned())).or_default();
    }

    pub fn assign(&self, company_id: &str, role_id: &str, user_id: &str) {
        let mut assignments = lock(&self.assignments);
        assignments
            .entry((company_id.to_owned(), role_id.to_owned()))
            .or_default()
            .insert(user_id.to_owned());
    }

    pub fn revoke(&self, company_id: &str, role_id: &str, user_id: &str) {
        let mut assignments = lock(&self.assignments);
        if let Some(members) = assignments.get_mut(&(company_id.to_owned(), role_id.to_owned())) {
            members.remove(user_id);
        }
    }
}

#[async_trait]
impl RoleDirectory for InMemoryRoleDirectory {
    async fn role_exists(
        &self,
        company_id: &CompanyId,
        role_id: &RoleId,
    ) -> Result<bool, RepositoryError> {
        let assignments = lock(&self.assignments);
        Ok(assignments.contains_key(&(company_id.0.clone(), role_id.0.clone())))
    }

    async fn actor_has_role(
        &self,
        actor_id: &UserId,
        role_id: &RoleId,
        company_id: &CompanyId,
    ) -> Result<bool, RepositoryError> {
        let assignments = lock(&self.assignments);
        Ok(assignments
            .get(&(company_id.0.clone(), role_id.0.clone()))
            .map(|members| members.contains(&actor_id.0))
            .unwrap_or(false))
    }

    async fn members_of(
        &self,
        company_id: &CompanyId,
        role_id: &RoleId,
    ) -> Result<Vec<UserId>, RepositoryError> {
        let assignments = lock(&self.assignments);
        Ok(assignments
            .get(&(company_id.0.clone(), role_id.0.clone()))
            .map(|members| members.iter().cloned().map(UserId).collect())
            .unwrap_or_default())
    }

    async fn roles_of(
        &self,
        actor_id: &UserId,
        company_id: &CompanyId,
    ) -> Result<Vec<RoleId>, RepositoryError> {
        let assignments = lock(&self.assignments);
        let mut roles: Vec<RoleId> = assignments
            .iter()
            .filter(|((company, _), members)| company == &company_id.0 && members.contains(&actor_id.0))
            .map(|((_, role), _)| RoleId(role.clone()))
            .collect();
        roles.sort();
        Ok(roles)
    }
}

/// Records notifications; can be switched into a failing mode.
#[derive(Clone, Default)]
pub struct InMemoryNotificationSink {
    sent: Arc<Mutex<Vec<ApprovalNotification>>>,
    failing: Arc<Mutex<bool>>,
}

impl InMemoryNotificationSink {
    pub fn notifications(&self) -> Vec<ApprovalNotification> {
        lock(&self.sent).clone()
    }

    pub fn fail_dispatches(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotificationSink {
    async fn notify(&self, notification: ApprovalNotification) -> Result<(), NotificationError> {
        if *lock(&self.failing) {
            return Err(NotificationError("notification transport offline".to_owned()));
        }
        lock(&self.sent).push(notification);
        Ok(())
    }
}

/// Adapter that remembers every resolution it was handed.
#[derive(Clone, Default)]
pub struct RecordingDocumentAdapter {
    resolutions: Arc<Mutex<Vec<ApprovalResolution>>>,
}

impl RecordingDocumentAdapter {
    pub fn resolutions(&self) -> Vec<ApprovalResolution> {
        lock(&self.resolutions).clone()
    }
}

#[async_trait]
impl DocumentAdapter for RecordingDocumentAdapter {
    async fn on_approval_resolved(
        &self,
        resolution: &ApprovalResolution,
    ) -> Result<(), AdapterError> {
        lock(&self.resolutions).push(resolution.clone());
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
