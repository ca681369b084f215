use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::document::{DocumentId, DocumentType};
use crate::domain::queue::{
    actionable_level, ApprovalAction, ApprovalQueueEntry, ApprovalRequest, DocumentStatus, EntryId,
};
use crate::domain::tenant::{CompanyId, RoleId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn empty(page: u32, limit: u32) -> Self {
        Self { items: Vec::new(), page, limit, total: 0 }
    }

    pub fn offset(page: u32, limit: u32) -> u64 {
        u64::from(page.saturating_sub(1)) * u64::from(limit)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingQuery {
    pub document_type: Option<DocumentType>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Repository-level filter for actionable entries. `page` is 1-based.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionableQuery {
    pub company_id: CompanyId,
    pub role_ids: Vec<RoleId>,
    pub document_type: Option<DocumentType>,
    pub page: u32,
    pub limit: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelStatus {
    pub entry_id: EntryId,
    pub approval_level: u8,
    pub approver_role_id: RoleId,
    pub action: ApprovalAction,
    pub acted_by: Option<UserId>,
    pub action_at: Option<DateTime<Utc>>,
    pub comments: Option<String>,
    pub is_actionable: bool,
}

/// Stepper view of the latest attempt for a document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub document_type: DocumentType,
    pub document_id: DocumentId,
    pub document_number: String,
    pub attempt: u32,
    pub amount: Decimal,
    pub overall_status: DocumentStatus,
    pub levels: Vec<LevelStatus>,
}

impl StatusSummary {
    pub fn build(request: &ApprovalRequest, entries: &[ApprovalQueueEntry]) -> Self {
        let live = request.status == DocumentStatus::Pending;
        let current = if live { actionable_level(entries) } else { None };
        let mut levels: Vec<LevelStatus> = entries
            .iter()
            .map(|entry| LevelStatus {
                entry_id: entry.id.clone(),
                approval_level: entry.approval_level,
                approver_role_id: entry.approver_role_id.clone(),
                action: entry.action,
                acted_by: entry.acted_by.clone(),
                action_at: entry.action_at,
                comments: entry.comments.clone(),
                is_actionable: entry.action == ApprovalAction::Pending
                    && current == Some(entry.approval_level),
            })
            .collect();
        levels.sort_by_key(|level| level.approval_level);

        Self {
            document_type: request.document_type,
            document_id: request.document_id.clone(),
            document_number: request.document_number.clone(),
            attempt: request.attempt,
            amount: request.amount,
            overall_status: request.status,
            levels,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub pending: u64,
    pub approved_today: u64,
    pub rejected_today: u64,
    pub pending_by_document_type: BTreeMap<DocumentType, u64>,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{Page, StatusSummary};
    use crate::domain::document::{DocumentId, DocumentType};
    use crate::domain::queue::fixtures::entry;
    use crate::domain::queue::{ApprovalAction, ApprovalRequest, DocumentStatus, RequestId};
    use crate::domain::tenant::{CompanyId, UserId};

    fn request(status: DocumentStatus) -> ApprovalRequest {
        ApprovalRequest {
            id: RequestId("REQ-1".to_string()),
            company_id: CompanyId("C1".to_string()),
            document_type: DocumentType::PurchaseOrder,
            document_id: DocumentId("PO-1".to_string()),
            document_number: "PO-2026-0001".to_string(),
            attempt: 1,
            amount: Decimal::from(20_000),
            status,
            requested_by: UserId("U-REQ".to_string()),
            requested_at: Utc::now(),
            resolved_at: None,
        }
    }

    #[test]
    fn only_lowest_pending_level_is_marked_actionable() {
        let entries = vec![
            entry(3, ApprovalAction::Pending),
            entry(1, ApprovalAction::Approved),
            entry(2, ApprovalAction::Pending),
        ];
        let summary = StatusSummary::build(&request(DocumentStatus::Pending), &entries);

        let flags: Vec<(u8, bool)> =
            summary.levels.iter().map(|level| (level.approval_level, level.is_actionable)).collect();
        assert_eq!(flags, vec![(1, false), (2, true), (3, false)]);
    }

    #[test]
    fn withdrawn_request_has_no_actionable_level() {
        let entries = vec![entry(1, ApprovalAction::Pending)];
        let summary = StatusSummary::build(&request(DocumentStatus::Withdrawn), &entries);

        assert_eq!(summary.overall_status, DocumentStatus::Withdrawn);
        assert!(summary.levels.iter().all(|level| !level.is_actionable));
    }

    #[test]
    fn page_offset_is_one_based() {
        assert_eq!(Page::<()>::offset(1, 20), 0);
        assert_eq!(Page::<()>::offset(3, 20), 40);
        assert_eq!(Page::<()>::offset(0, 20), 0);
    }
}
