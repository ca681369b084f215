use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::document::{DocumentId, DocumentType};
use crate::domain::tenant::{CompanyId, RoleId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

pub const CASCADE_REJECTION_COMMENT: &str = "auto-rejected: upstream rejection";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Aggregate approval state of one document attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Approved,
    Rejected,
    Withdrawn,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Withdrawn => "withdrawn",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "withdrawn" => Some(Self::Withdrawn),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Header row for one approval attempt of a document.
///
/// `status` is a stored projection of [`aggregate_status`] over the attempt's
/// entries, except for `Withdrawn` which only the header can express.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: RequestId,
    pub company_id: CompanyId,
    pub document_type: DocumentType,
    pub document_id: DocumentId,
    pub document_number: String,
    pub attempt: u32,
    pub amount: Decimal,
    pub status: DocumentStatus,
    pub requested_by: UserId,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalQueueEntry {
    pub id: EntryId,
    pub request_id: RequestId,
    pub company_id: CompanyId,
    pub document_type: DocumentType,
    pub document_id: DocumentId,
    pub document_number: String,
    pub attempt: u32,
    pub approval_level: u8,
    pub amount: Decimal,
    pub action: ApprovalAction,
    pub approver_role_id: RoleId,
    pub is_mandatory: bool,
    pub acted_by: Option<UserId>,
    pub action_at: Option<DateTime<Utc>>,
    pub comments: Option<String>,
    pub is_cascade: bool,
    pub requested_by: UserId,
    pub requested_at: DateTime<Utc>,
}

/// Derive the document status from its entries.
///
/// Any rejection wins; otherwise a single pending entry keeps the document
/// pending. An attempt with no entries was auto-approved.
pub fn aggregate_status(entries: &[ApprovalQueueEntry]) -> DocumentStatus {
    if entries.iter().any(|entry| entry.action == ApprovalAction::Rejected) {
        return DocumentStatus::Rejected;
    }
    if entries.iter().any(|entry| entry.action == ApprovalAction::Pending) {
        return DocumentStatus::Pending;
    }
    DocumentStatus::Approved
}

/// Lowest level still pending, i.e. the only level that may be acted on.
pub fn actionable_level(entries: &[ApprovalQueueEntry]) -> Option<u8> {
    entries
        .iter()
        .filter(|entry| entry.action == ApprovalAction::Pending)
        .map(|entry| entry.approval_level)
        .min()
}

/// Audit ordering: attempt, then level, then action time, with cascaded
/// rejections after the entry that triggered them.
pub fn sort_for_history(entries: &mut [ApprovalQueueEntry]) {
    entries.sort_by(|left, right| {
        left.attempt
            .cmp(&right.attempt)
            .then_with(|| left.approval_level.cmp(&right.approval_level))
            .then_with(|| match (left.action_at, right.action_at) {
                (Some(l), Some(r)) => l.cmp(&r),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
            .then_with(|| left.is_cascade.cmp(&right.is_cascade))
    });
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;

    use super::{ApprovalAction, ApprovalQueueEntry, EntryId, RequestId};
    use crate::domain::document::{DocumentId, DocumentType};
    use crate::domain::tenant::{CompanyId, RoleId, UserId};

    pub fn entry(level: u8, action: ApprovalAction) -> ApprovalQueueEntry {
        ApprovalQueueEntry {
            id: EntryId(format!("E-{level}")),
            request_id: RequestId("REQ-1".to_string()),
            company_id: CompanyId("C1".to_string()),
            document_type: DocumentType::PurchaseOrder,
            document_id: DocumentId("PO-1".to_string()),
            document_number: "PO-2026-0001".to_string(),
            attempt: 1,
            approval_level: level,
            amount: Decimal::from(20_000),
            action,
            approver_role_id: RoleId("finance".to_string()),
            is_mandatory: true,
            acted_by: None,
            action_at: None,
            comments: None,
            is_cascade: false,
            requested_by: UserId("U-REQ".to_string()),
            requested_at: parse_ts("2026-03-01T09:00:00Z"),
        }
    }

    pub fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }
}
