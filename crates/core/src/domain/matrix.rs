use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::document::DocumentType;
use crate::domain::tenant::{CompanyId, RoleId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleId(pub String);

/// One row of a company's approval matrix.
///
/// A rule covers the half-open amount range `[min_amount, max_amount)`; a
/// missing `max_amount` leaves the range unbounded above.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalMatrixRule {
    pub id: RuleId,
    pub company_id: CompanyId,
    pub document_type: DocumentType,
    pub min_amount: Decimal,
    pub max_amount: Option<Decimal>,
    pub approver_role_id: RoleId,
    pub approval_level: u8,
    pub is_mandatory: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalMatrixRule {
    pub fn contains(&self, amount: Decimal) -> bool {
        amount >= self.min_amount && self.max_amount.map_or(true, |max| amount < max)
    }

    /// Width of the amount range, `None` when unbounded.
    pub fn range_width(&self) -> Option<Decimal> {
        self.max_amount.map(|max| max - self.min_amount)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMatrixRule {
    pub document_type: DocumentType,
    pub min_amount: Decimal,
    pub max_amount: Option<Decimal>,
    pub approver_role_id: RoleId,
    pub approval_level: u8,
    #[serde(default = "default_true")]
    pub is_mandatory: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// Partial update for a rule. `document_type` and `company_id` are not
/// patchable; reclassifying a rule means creating a new one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixRulePatch {
    pub min_amount: Option<Decimal>,
    /// `Some(None)` clears the upper bound.
    #[serde(default, with = "double_option")]
    pub max_amount: Option<Option<Decimal>>,
    pub approver_role_id: Option<RoleId>,
    pub approval_level: Option<u8>,
    pub is_mandatory: Option<bool>,
    pub is_active: Option<bool>,
}

impl MatrixRulePatch {
    pub fn apply_to(&self, rule: &mut ApprovalMatrixRule) {
        if let Some(min_amount) = self.min_amount {
            rule.min_amount = min_amount;
        }
        if let Some(max_amount) = self.max_amount {
            rule.max_amount = max_amount;
        }
        if let Some(role) = &self.approver_role_id {
            rule.approver_role_id = role.clone();
        }
        if let Some(level) = self.approval_level {
            rule.approval_level = level;
        }
        if let Some(is_mandatory) = self.is_mandatory {
            rule.is_mandatory = is_mandatory;
        }
        if let Some(is_active) = self.is_active {
            rule.is_active = is_active;
        }
    }
}

mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFilter {
    pub document_type: Option<DocumentType>,
    pub is_active: Option<bool>,
}

/// One approval stage the resolver selected for an amount.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLevel {
    pub approval_level: u8,
    pub approver_role_id: RoleId,
    pub is_mandatory: bool,
    pub rule_id: RuleId,
}
