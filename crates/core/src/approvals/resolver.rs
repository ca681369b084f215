//! Approval-matrix evaluation.
//!
//! For each configured level the resolver picks the single active rule whose
//! `[min_amount, max_amount)` range contains the document amount. A company
//! that has no active level-1 rule for a document type does not require
//! approval for it at all. Levels without a matching rule are skipped, but an
//! amount no configured range covers is a matrix error, never an approval.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::document::DocumentType;
use crate::domain::matrix::{ApprovalMatrixRule, ResolvedLevel, RuleId};
use crate::domain::tenant::CompanyId;
use crate::errors::ApprovalError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionWarning {
    /// More than one rule matched the same level; `chosen` won the tie-break.
    OverlappingRules { approval_level: u8, chosen: RuleId, candidates: Vec<RuleId> },
    /// A level below the highest resolved level had no matching rule.
    LevelGap { approval_level: u8 },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub levels: Vec<ResolvedLevel>,
    pub warnings: Vec<ResolutionWarning>,
}

impl Resolution {
    pub fn requires_approval(&self) -> bool {
        !self.levels.is_empty()
    }
}

pub fn resolve(
    rules: &[ApprovalMatrixRule],
    company_id: &CompanyId,
    document_type: DocumentType,
    amount: Decimal,
) -> Result<Resolution, ApprovalError> {
    if amount < Decimal::ZERO {
        return Err(ApprovalError::validation(format!(
            "amount must be zero or positive, got {amount}"
        )));
    }

    let applicable: Vec<&ApprovalMatrixRule> = rules
        .iter()
        .filter(|rule| {
            rule.is_active && &rule.company_id == company_id && rule.document_type == document_type
        })
        .collect();

    if !applicable.iter().any(|rule| rule.approval_level == 1) {
        return Ok(Resolution::default());
    }

    let configured: BTreeSet<u8> = applicable.iter().map(|rule| rule.approval_level).collect();
    let mut resolution = Resolution::default();

    for level in configured {
        let mut candidates: Vec<&ApprovalMatrixRule> = applicable
            .iter()
            .copied()
            .filter(|rule| rule.approval_level == level && rule.contains(amount))
            .collect();

        if candidates.is_empty() {
            continue;
        }

        candidates.sort_by(|left, right| narrowest_first(left, right));
        let chosen = candidates[0];

        if candidates.len() > 1 {
            resolution.warnings.push(ResolutionWarning::OverlappingRules {
                approval_level: level,
                chosen: chosen.id.clone(),
                candidates: candidates.iter().map(|rule| rule.id.clone()).collect(),
            });
        }

        resolution.levels.push(ResolvedLevel {
            approval_level: level,
            approver_role_id: chosen.approver_role_id.clone(),
            is_mandatory: chosen.is_mandatory,
            rule_id: chosen.id.clone(),
        });
    }

    if resolution.levels.is_empty() {
        return Err(ApprovalError::validation(format!(
            "no active {} approval rule covers amount {amount}",
            document_type.as_str()
        )));
    }

    if let Some(highest) = resolution.levels.last().map(|level| level.approval_level) {
        let resolved: BTreeSet<u8> =
            resolution.levels.iter().map(|level| level.approval_level).collect();
        for missing in (1..highest).filter(|level| !resolved.contains(level)) {
            resolution.warnings.push(ResolutionWarning::LevelGap { approval_level: missing });
        }
    }

    Ok(resolution)
}

fn narrowest_first(left: &ApprovalMatrixRule, right: &ApprovalMatrixRule) -> Ordering {
    let width = match (left.range_width(), right.range_width()) {
        (Some(l), Some(r)) => l.cmp(&r),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    width
        .then_with(|| left.min_amount.cmp(&right.min_amount))
        .then_with(|| left.id.0.cmp(&right.id.0))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{resolve, ResolutionWarning};
    use crate::domain::document::DocumentType;
    use crate::domain::matrix::{ApprovalMatrixRule, RuleId};
    use crate::domain::tenant::{CompanyId, RoleId};
    use crate::errors::ApprovalError;

    fn rule(id: &str, level: u8, role: &str, min: i64, max: Option<i64>) -> ApprovalMatrixRule {
        let now = Utc::now();
        ApprovalMatrixRule {
            id: RuleId(id.to_string()),
            company_id: CompanyId("C1".to_string()),
            document_type: DocumentType::PurchaseOrder,
            min_amount: Decimal::from(min),
            max_amount: max.map(Decimal::from),
            approver_role_id: RoleId(role.to_string()),
            approval_level: level,
            is_mandatory: true,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn company() -> CompanyId {
        CompanyId("C1".to_string())
    }

    fn roles_for(rules: &[ApprovalMatrixRule], amount: i64) -> Vec<(u8, String)> {
        resolve(rules, &company(), DocumentType::PurchaseOrder, Decimal::from(amount))
            .expect("resolve")
            .levels
            .into_iter()
            .map(|level| (level.approval_level, level.approver_role_id.0))
            .collect()
    }

    #[test]
    fn amount_ranges_use_inclusive_lower_and_exclusive_upper_bounds() {
        let rules = vec![rule("R-A", 1, "A", 0, Some(1000)), rule("R-B", 1, "B", 1000, None)];

        assert_eq!(roles_for(&rules, 999), vec![(1, "A".to_string())]);
        assert_eq!(roles_for(&rules, 1000), vec![(1, "B".to_string())]);
        assert_eq!(roles_for(&rules, 0), vec![(1, "A".to_string())]);
    }

    #[test]
    fn no_level_one_rule_means_no_approval_required() {
        let rules = vec![rule("R-2", 2, "director", 0, None)];
        let resolution =
            resolve(&rules, &company(), DocumentType::PurchaseOrder, Decimal::from(50))
                .expect("resolve");

        assert!(!resolution.requires_approval());
        assert!(resolution.warnings.is_empty());
    }

    #[test]
    fn inactive_and_foreign_rules_are_ignored() {
        let mut inactive = rule("R-1", 1, "finance", 0, None);
        inactive.is_active = false;
        let mut foreign = rule("R-X", 1, "finance", 0, None);
        foreign.company_id = CompanyId("C2".to_string());
        let mut other_type = rule("R-Y", 1, "finance", 0, None);
        other_type.document_type = DocumentType::VendorBill;

        let rules = vec![inactive, foreign, other_type];
        assert!(roles_for(&rules, 10).is_empty());
    }

    #[test]
    fn levels_are_returned_in_ascending_order() {
        let rules = vec![
            rule("R-3", 3, "cfo", 0, None),
            rule("R-1", 1, "finance", 0, None),
            rule("R-2", 2, "director", 0, None),
        ];

        assert_eq!(
            roles_for(&rules, 20_000),
            vec![
                (1, "finance".to_string()),
                (2, "director".to_string()),
                (3, "cfo".to_string())
            ]
        );
    }

    #[test]
    fn level_without_matching_range_is_skipped_with_warning() {
        let rules = vec![
            rule("R-1", 1, "finance", 0, None),
            rule("R-2", 2, "director", 100_000, None),
            rule("R-3", 3, "cfo", 0, None),
        ];
        let resolution =
            resolve(&rules, &company(), DocumentType::PurchaseOrder, Decimal::from(5_000))
                .expect("resolve");

        let levels: Vec<u8> = resolution.levels.iter().map(|level| level.approval_level).collect();
        assert_eq!(levels, vec![1, 3]);
        assert_eq!(resolution.warnings, vec![ResolutionWarning::LevelGap { approval_level: 2 }]);
    }

    #[test]
    fn level_one_range_miss_still_routes_to_higher_levels() {
        let rules = vec![rule("R-1", 1, "finance", 0, Some(100)), rule("R-2", 2, "director", 0, None)];

        assert_eq!(roles_for(&rules, 500), vec![(2, "director".to_string())]);
    }

    #[test]
    fn overlapping_rules_pick_narrowest_range_then_lowest_minimum() {
        let rules = vec![
            rule("R-wide", 1, "clerk", 0, None),
            rule("R-narrow-high", 1, "manager", 400, Some(600)),
            rule("R-narrow-low", 1, "supervisor", 300, Some(500)),
        ];
        let resolution =
            resolve(&rules, &company(), DocumentType::PurchaseOrder, Decimal::from(450))
                .expect("resolve");

        assert_eq!(resolution.levels[0].approver_role_id, RoleId("supervisor".to_string()));
        assert_eq!(
            resolution.warnings,
            vec![ResolutionWarning::OverlappingRules {
                approval_level: 1,
                chosen: RuleId("R-narrow-low".to_string()),
                candidates: vec![
                    RuleId("R-narrow-low".to_string()),
                    RuleId("R-narrow-high".to_string()),
                    RuleId("R-wide".to_string()),
                ],
            }]
        );
    }

    #[test]
    fn amount_outside_every_range_is_not_auto_approved() {
        let rules = vec![rule("R-1", 1, "finance", 0, Some(1000))];
        let error = resolve(&rules, &company(), DocumentType::PurchaseOrder, Decimal::from(5_000_000))
            .expect_err("uncovered amount");

        match error {
            ApprovalError::Validation(message) => {
                assert!(message.contains("purchase_order"));
                assert!(message.contains("5000000"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn negative_amount_is_a_validation_error() {
        let rules = vec![rule("R-1", 1, "finance", 0, None)];
        let error = resolve(&rules, &company(), DocumentType::PurchaseOrder, Decimal::from(-1))
            .expect_err("negative amount");

        assert!(matches!(error, ApprovalError::Validation(_)));
    }
}
