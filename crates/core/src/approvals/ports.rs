use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::approvals::dashboard::{ActionableQuery, DashboardStats, Page};
use crate::domain::document::{DocumentId, DocumentType};
use crate::domain::matrix::{ApprovalMatrixRule, RuleFilter, RuleId};
use crate::domain::queue::{
    ApprovalAction, ApprovalQueueEntry, ApprovalRequest, DocumentStatus, EntryId, RequestId,
};
use crate::domain::tenant::{CompanyId, RoleId, UserId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleDeletion {
    Deleted,
    NotFound,
    Referenced { pending_entries: u64 },
}

#[async_trait]
pub trait MatrixRepository: Send + Sync {
    async fn insert_rule(&self, rule: ApprovalMatrixRule) -> Result<(), RepositoryError>;
    async fn find_rule(&self, id: &RuleId) -> Result<Option<ApprovalMatrixRule>, RepositoryError>;
    async fn update_rule(&self, rule: ApprovalMatrixRule) -> Result<(), RepositoryError>;

    /// Delete unless a pending entry of a live request still points at the
    /// rule's role and level. Check and delete happen atomically.
    async fn delete_rule_if_unreferenced(&self, id: &RuleId)
        -> Result<RuleDeletion, RepositoryError>;

    /// Rules ordered by document type, then approval level.
    async fn list_rules(
        &self,
        company_id: &CompanyId,
        filter: &RuleFilter,
    ) -> Result<Vec<ApprovalMatrixRule>, RepositoryError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn action(&self) -> ApprovalAction {
        match self {
            Self::Approve => ApprovalAction::Approved,
            Self::Reject => ApprovalAction::Rejected,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionCommand {
    pub entry_id: EntryId,
    pub decision: Decision,
    pub actor: UserId,
    pub comments: Option<String>,
    pub acted_at: DateTime<Utc>,
}

/// Result of a conditional decision write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecisionWrite {
    Applied {
        entry: ApprovalQueueEntry,
        cascaded: Vec<ApprovalQueueEntry>,
        request: ApprovalRequest,
    },
    /// The entry was no longer pending when the write landed.
    Stale { actual: ApprovalAction },
    /// A lower level was still pending when the write landed.
    OutOfOrder { expected_level: u8, actual_level: u8 },
    /// The request left the pending state (withdrawn) before the write.
    Closed { status: DocumentStatus },
    Missing,
}

#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Persist a request header together with all of its entries, or nothing.
    async fn create_request(
        &self,
        request: ApprovalRequest,
        entries: Vec<ApprovalQueueEntry>,
    ) -> Result<(), RepositoryError>;

    async fn find_request(&self, id: &RequestId)
        -> Result<Option<ApprovalRequest>, RepositoryError>;

    async fn find_latest_request(
        &self,
        company_id: &CompanyId,
        document_type: DocumentType,
        document_id: &DocumentId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError>;

    async fn find_entry(&self, id: &EntryId) -> Result<Option<ApprovalQueueEntry>, RepositoryError>;

    /// Entries of one attempt, ascending by level.
    async fn list_entries(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<ApprovalQueueEntry>, RepositoryError>;

    /// Entries of every attempt for a document.
    async fn list_document_entries(
        &self,
        company_id: &CompanyId,
        document_type: DocumentType,
        document_id: &DocumentId,
    ) -> Result<Vec<ApprovalQueueEntry>, RepositoryError>;

    /// Apply an approve/reject only if the entry is still pending and is the
    /// lowest pending level of a pending request. A rejection moves every
    /// other pending sibling to rejected and updates the request header in
    /// the same transaction.
    async fn record_decision(
        &self,
        command: DecisionCommand,
    ) -> Result<DecisionWrite, RepositoryError>;

    /// Mark a pending request withdrawn. Returns false if it was not pending.
    async fn withdraw_request(
        &self,
        request_id: &RequestId,
        withdrawn_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Actionable entries (lowest pending level of a pending request) whose
    /// role is one of `query.role_ids`, oldest request first.
    async fn list_actionable(
        &self,
        query: &ActionableQuery,
    ) -> Result<Page<ApprovalQueueEntry>, RepositoryError>;

    async fn dashboard_counts(
        &self,
        company_id: &CompanyId,
        day: NaiveDate,
    ) -> Result<DashboardStats, RepositoryError>;
}

/// Current user/role assignments. Queried fresh on each call; results must
/// not be cached across engine operations.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn role_exists(
        &self,
        company_id: &CompanyId,
        role_id: &RoleId,
    ) -> Result<bool, RepositoryError>;

    async fn actor_has_role(
        &self,
        actor_id: &UserId,
        role_id: &RoleId,
        company_id: &CompanyId,
    ) -> Result<bool, RepositoryError>;

    async fn members_of(
        &self,
        company_id: &CompanyId,
        role_id: &RoleId,
    ) -> Result<Vec<UserId>, RepositoryError>;

    async fn roles_of(
        &self,
        actor_id: &UserId,
        company_id: &CompanyId,
    ) -> Result<Vec<RoleId>, RepositoryError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResolution {
    pub company_id: CompanyId,
    pub document_type: DocumentType,
    pub document_id: DocumentId,
    pub document_number: String,
    pub attempt: u32,
    pub final_status: DocumentStatus,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("document adapter failed: {0}")]
pub struct AdapterError(pub String);

/// Write-back hook owned by the module that persists a document type.
#[async_trait]
pub trait DocumentAdapter: Send + Sync {
    async fn on_approval_resolved(
        &self,
        resolution: &ApprovalResolution,
    ) -> Result<(), AdapterError>;
}

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<DocumentType, Arc<dyn DocumentAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, document_type: DocumentType, adapter: Arc<dyn DocumentAdapter>) -> Self {
        self.adapters.insert(document_type, adapter);
        self
    }

    /// Register one adapter for every known document type.
    pub fn register_all(mut self, adapter: Arc<dyn DocumentAdapter>) -> Self {
        for document_type in DocumentType::ALL {
            self.adapters.insert(document_type, adapter.clone());
        }
        self
    }

    pub fn get(&self, document_type: DocumentType) -> Option<&Arc<dyn DocumentAdapter>> {
        self.adapters.get(&document_type)
    }

    pub fn contains(&self, document_type: DocumentType) -> bool {
        self.adapters.contains_key(&document_type)
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut registered: Vec<&str> = self.adapters.keys().map(DocumentType::as_str).collect();
        registered.sort_unstable();
        f.debug_struct("AdapterRegistry").field("registered", &registered).finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApprovalNotification {
    ActionRequired {
        company_id: CompanyId,
        document_type: DocumentType,
        document_id: DocumentId,
        document_number: String,
        entry_id: EntryId,
        approval_level: u8,
        approver_role_id: RoleId,
        recipients: Vec<UserId>,
    },
    Resolved {
        company_id: CompanyId,
        document_type: DocumentType,
        document_id: DocumentId,
        document_number: String,
        final_status: DocumentStatus,
        requested_by: UserId,
    },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("notification dispatch failed: {0}")]
pub struct NotificationError(pub String);

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: ApprovalNotification) -> Result<(), NotificationError>;
}
