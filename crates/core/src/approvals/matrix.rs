use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::approvals::ports::{MatrixRepository, RoleDirectory, RuleDeletion};
use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use crate::domain::matrix::{ApprovalMatrixRule, MatrixRulePatch, NewMatrixRule, RuleFilter, RuleId};
use crate::domain::tenant::Actor;
use crate::errors::ApprovalError;

pub const MAX_APPROVAL_LEVEL: u8 = 10;

/// Company-scoped CRUD over approval-matrix rules.
pub struct MatrixStore {
    repository: Arc<dyn MatrixRepository>,
    roles: Arc<dyn RoleDirectory>,
    audit: Arc<dyn AuditSink>,
    max_approval_level: u8,
}

impl MatrixStore {
    pub fn new(repository: Arc<dyn MatrixRepository>, roles: Arc<dyn RoleDirectory>) -> Self {
        Self {
            repository,
            roles,
            audit: Arc::new(TracingAuditSink),
            max_approval_level: MAX_APPROVAL_LEVEL,
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_max_approval_level(mut self, max_approval_level: u8) -> Self {
        self.max_approval_level = max_approval_level.clamp(1, MAX_APPROVAL_LEVEL);
        self
    }

    pub async fn create_rule(
        &self,
        actor: &Actor,
        input: NewMatrixRule,
    ) -> Result<ApprovalMatrixRule, ApprovalError> {
        let now = Utc::now();
        let rule = ApprovalMatrixRule {
            id: RuleId(Uuid::new_v4().to_string()),
            company_id: actor.company_id.clone(),
            document_type: input.document_type,
            min_amount: input.min_amount,
            max_amount: input.max_amount,
            approver_role_id: input.approver_role_id,
            approval_level: input.approval_level,
            is_mandatory: input.is_mandatory,
            is_active: input.is_active,
            created_at: now,
            updated_at: now,
        };
        self.validate(&rule).await?;
        self.repository.insert_rule(rule.clone()).await?;

        info!(
            event_name = "approvals.matrix.rule_created",
            company_id = %rule.company_id.0,
            rule_id = %rule.id.0,
            document_type = rule.document_type.as_str(),
            approval_level = rule.approval_level,
            "approval matrix rule created"
        );
        self.record(actor, "approvals.matrix.rule_created", &rule);
        Ok(rule)
    }

    pub async fn update_rule(
        &self,
        actor: &Actor,
        id: &RuleId,
        patch: MatrixRulePatch,
    ) -> Result<ApprovalMatrixRule, ApprovalError> {
        let mut rule = self.owned_rule(actor, id).await?;
        patch.apply_to(&mut rule);
        rule.updated_at = Utc::now();
        self.validate(&rule).await?;
        self.repository.update_rule(rule.clone()).await?;

        info!(
            event_name = "approvals.matrix.rule_updated",
            company_id = %rule.company_id.0,
            rule_id = %rule.id.0,
            is_active = rule.is_active,
            "approval matrix rule updated"
        );
        self.record(actor, "approvals.matrix.rule_updated", &rule);
        Ok(rule)
    }

    pub async fn delete_rule(&self, actor: &Actor, id: &RuleId) -> Result<(), ApprovalError> {
        let rule = self.owned_rule(actor, id).await?;

        match self.repository.delete_rule_if_unreferenced(id).await? {
            RuleDeletion::Deleted => {
                info!(
                    event_name = "approvals.matrix.rule_deleted",
                    company_id = %rule.company_id.0,
                    rule_id = %rule.id.0,
                    "approval matrix rule deleted"
                );
                self.record(actor, "approvals.matrix.rule_deleted", &rule);
                Ok(())
            }
            RuleDeletion::NotFound => Err(ApprovalError::not_found("matrix rule", &id.0)),
            RuleDeletion::Referenced { pending_entries } => Err(ApprovalError::Conflict(format!(
                "rule `{}` is referenced by {pending_entries} pending approval entr{}; deactivate it instead",
                id.0,
                if pending_entries == 1 { "y" } else { "ies" }
            ))),
        }
    }

    pub async fn list_rules(
        &self,
        actor: &Actor,
        filter: &RuleFilter,
    ) -> Result<Vec<ApprovalMatrixRule>, ApprovalError> {
        Ok(self.repository.list_rules(&actor.company_id, filter).await?)
    }

    pub async fn find_rule(
        &self,
        actor: &Actor,
        id: &RuleId,
    ) -> Result<ApprovalMatrixRule, ApprovalError> {
        self.owned_rule(actor, id).await
    }

    async fn owned_rule(
        &self,
        actor: &Actor,
        id: &RuleId,
    ) -> Result<ApprovalMatrixRule, ApprovalError> {
        let rule = self
            .repository
            .find_rule(id)
            .await?
            .ok_or_else(|| ApprovalError::not_found("matrix rule", &id.0))?;
        if rule.company_id != actor.company_id {
            return Err(ApprovalError::Forbidden(format!(
                "matrix rule `{}` belongs to another company",
                id.0
            )));
        }
        Ok(rule)
    }

    async fn validate(&self, rule: &ApprovalMatrixRule) -> Result<(), ApprovalError> {
        if rule.min_amount < Decimal::ZERO {
            return Err(ApprovalError::validation("min_amount must be zero or positive"));
        }
        if let Some(max_amount) = rule.max_amount {
            if max_amount <= rule.min_amount {
                return Err(ApprovalError::validation(format!(
                    "max_amount {max_amount} must be greater than min_amount {}",
                    rule.min_amount
                )));
            }
        }
        if rule.approval_level == 0 || rule.approval_level > self.max_approval_level {
            return Err(ApprovalError::validation(format!(
                "approval_level must be in range 1..={}, got {}",
                self.max_approval_level, rule.approval_level
            )));
        }
        if rule.approver_role_id.0.trim().is_empty() {
            return Err(ApprovalError::validation("approver_role_id is required"));
        }
        if !self.roles.role_exists(&rule.company_id, &rule.approver_role_id).await? {
            return Err(ApprovalError::validation(format!(
                "approver role `{}` does not belong to company `{}`",
                rule.approver_role_id.0, rule.company_id.0
            )));
        }
        Ok(())
    }

    fn record(&self, actor: &Actor, event_type: &str, rule: &ApprovalMatrixRule) {
        self.audit.emit(
            AuditEvent::new(
                rule.company_id.clone(),
                event_type,
                AuditCategory::Matrix,
                actor.user_id.0.clone(),
                AuditOutcome::Success,
            )
            .with_correlation(actor.correlation_id.clone())
            .with_metadata("rule_id", rule.id.0.clone())
            .with_metadata("document_type", rule.document_type.as_str())
            .with_metadata("approval_level", rule.approval_level.to_string())
            .with_metadata("approver_role_id", rule.approver_role_id.0.clone()),
        );
    }
}
