use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;

use signoff_core::approvals::ports::{MatrixRepository, RepositoryError, RuleDeletion};
use signoff_core::domain::matrix::{ApprovalMatrixRule, RuleFilter, RuleId};
use signoff_core::domain::tenant::{CompanyId, RoleId};

use super::{column, count, db_error, decimal, document_type, level, parse_timestamp, timestamp};
use crate::DbPool;

const RULE_COLUMNS: &str = "id, company_id, document_type, min_amount, max_amount, approver_role_id,
     approval_level, is_mandatory, is_active, created_at, updated_at";

pub struct SqlMatrixRepository {
    pool: DbPool,
}

impl SqlMatrixRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn rule_from_row(row: &SqliteRow) -> Result<ApprovalMatrixRule, RepositoryError> {
    let max_amount = column::<Option<String>>(row, "max_amount")?
        .map(|raw| {
            Decimal::from_str(&raw).map_err(|e| {
                RepositoryError::Decode(format!("max_amount: invalid decimal `{raw}`: {e}"))
            })
        })
        .transpose()?;
    let created_at: String = column(row, "created_at")?;
    let updated_at: String = column(row, "updated_at")?;

    Ok(ApprovalMatrixRule {
        id: RuleId(column(row, "id")?),
        company_id: CompanyId(column(row, "company_id")?),
        document_type: document_type(row)?,
        min_amount: decimal(row, "min_amount")?,
        max_amount,
        approver_role_id: RoleId(column(row, "approver_role_id")?),
        approval_level: level(row, "approval_level")?,
        is_mandatory: column(row, "is_mandatory")?,
        is_active: column(row, "is_active")?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait]
impl MatrixRepository for SqlMatrixRepository {
    async fn insert_rule(&self, rule: ApprovalMatrixRule) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO approval_matrix_rule
                 (id, company_id, document_type, min_amount, max_amount, approver_role_id,
                  approval_level, is_mandatory, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&rule.id.0)
        .bind(&rule.company_id.0)
        .bind(rule.document_type.as_str())
        .bind(rule.min_amount.to_string())
        .bind(rule.max_amount.map(|amount| amount.to_string()))
        .bind(&rule.approver_role_id.0)
        .bind(i64::from(rule.approval_level))
        .bind(rule.is_mandatory)
        .bind(rule.is_active)
        .bind(timestamp(rule.created_at))
        .bind(timestamp(rule.updated_at))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn find_rule(&self, id: &RuleId) -> Result<Option<ApprovalMatrixRule>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {RULE_COLUMNS} FROM approval_matrix_rule WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(rule_from_row).transpose()
    }

    async fn update_rule(&self, rule: ApprovalMatrixRule) -> Result<(), RepositoryError> {
        // document_type and company_id are fixed at creation.
        sqlx::query(
            "UPDATE approval_matrix_rule
             SET min_amount = ?, max_amount = ?, approver_role_id = ?, approval_level = ?,
                 is_mandatory = ?, is_active = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(rule.min_amount.to_string())
        .bind(rule.max_amount.map(|amount| amount.to_string()))
        .bind(&rule.approver_role_id.0)
        .bind(i64::from(rule.approval_level))
        .bind(rule.is_mandatory)
        .bind(rule.is_active)
        .bind(timestamp(rule.updated_at))
        .bind(&rule.id.0)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn delete_rule_if_unreferenced(
        &self,
        id: &RuleId,
    ) -> Result<RuleDeletion, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        // Single statement so no entry can be queued between check and delete.
        let deleted = sqlx::query(
            "DELETE FROM approval_matrix_rule
             WHERE id = ?
               AND NOT EXISTS (
                   SELECT 1
                   FROM approval_queue_entry e
                   JOIN approval_request r ON r.id = e.request_id
                   WHERE e.company_id = approval_matrix_rule.company_id
                     AND e.document_type = approval_matrix_rule.document_type
                     AND e.approver_role_id = approval_matrix_rule.approver_role_id
                     AND e.approval_level = approval_matrix_rule.approval_level
                     AND e.action = 'pending'
                     AND r.status = 'pending'
               )",
        )
        .bind(&id.0)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        if deleted.rows_affected() == 1 {
            tx.commit().await.map_err(db_error)?;
            return Ok(RuleDeletion::Deleted);
        }

        let row = sqlx::query(
            "SELECT COUNT(e.id) AS count, COUNT(DISTINCT m.id) AS rules
             FROM approval_matrix_rule m
             LEFT JOIN approval_queue_entry e
                    ON e.company_id = m.company_id
                   AND e.document_type = m.document_type
                   AND e.approver_role_id = m.approver_role_id
                   AND e.approval_level = m.approval_level
                   AND e.action = 'pending'
                   AND EXISTS (
                       SELECT 1 FROM approval_request r
                       WHERE r.id = e.request_id AND r.status = 'pending'
                   )
             WHERE m.id = ?",
        )
        .bind(&id.0)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;
        tx.rollback().await.map_err(db_error)?;

        let rules: i64 = column(&row, "rules")?;
        if rules == 0 {
            return Ok(RuleDeletion::NotFound);
        }
        Ok(RuleDeletion::Referenced { pending_entries: count(&row)? })
    }

    async fn list_rules(
        &self,
        company_id: &CompanyId,
        filter: &RuleFilter,
    ) -> Result<Vec<ApprovalMatrixRule>, RepositoryError> {
        let document_type = filter.document_type.map(|kind| kind.as_str());
        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS}
             FROM approval_matrix_rule
             WHERE company_id = ?
               AND (? IS NULL OR document_type = ?)
               AND (? IS NULL OR is_active = ?)
             ORDER BY document_type ASC, approval_level ASC, CAST(min_amount AS REAL) ASC, id ASC"
        ))
        .bind(&company_id.0)
        .bind(document_type)
        .bind(document_type)
        .bind(filter.is_active)
        .bind(filter.is_active)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(rule_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use signoff_core::approvals::ports::{MatrixRepository, RepositoryError, RuleDeletion};
    use signoff_core::domain::document::DocumentType;
    use signoff_core::domain::matrix::{ApprovalMatrixRule, RuleFilter, RuleId};
    use signoff_core::domain::tenant::{CompanyId, RoleId};

    use super::SqlMatrixRepository;
    use crate::repositories::test_support::{insert_role, setup_pool};

    fn rule(id: &str, document_type: DocumentType, level: u8, min: i64, max: Option<i64>) -> ApprovalMatrixRule {
        ApprovalMatrixRule {
            id: RuleId(id.to_string()),
            company_id: CompanyId("C1".to_string()),
            document_type,
            min_amount: Decimal::from(min),
            max_amount: max.map(Decimal::from),
            approver_role_id: RoleId("finance".to_string()),
            approval_level: level,
            is_mandatory: true,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn rules_round_trip_with_decimal_bounds() {
        let pool = setup_pool().await;
        insert_role(&pool, "C1", "finance", &[]).await;
        let repo = SqlMatrixRepository::new(pool.clone());

        let mut stored = rule("R-1", DocumentType::VendorBill, 1, 0, None);
        stored.min_amount = Decimal::new(100_050, 2);
        stored.max_amount = Some(Decimal::new(999_999, 2));
        repo.insert_rule(stored.clone()).await.expect("insert");

        let found = repo.find_rule(&stored.id).await.expect("find").expect("present");
        assert_eq!(found.min_amount, Decimal::new(100_050, 2));
        assert_eq!(found.max_amount, Some(Decimal::new(999_999, 2)));
        assert_eq!(found.document_type, DocumentType::VendorBill);
        assert!(found.is_mandatory);

        pool.close().await;
    }

    #[tokio::test]
    async fn list_orders_numerically_and_filters() {
        let pool = setup_pool().await;
        insert_role(&pool, "C1", "finance", &[]).await;
        let repo = SqlMatrixRepository::new(pool.clone());

        repo.insert_rule(rule("R-a", DocumentType::PurchaseOrder, 1, 10_000, None)).await.expect("a");
        repo.insert_rule(rule("R-b", DocumentType::PurchaseOrder, 1, 900, Some(10_000))).await.expect("b");
        repo.insert_rule(rule("R-c", DocumentType::PurchaseOrder, 2, 0, None)).await.expect("c");
        let mut inactive = rule("R-d", DocumentType::StockAdjustment, 1, 0, None);
        inactive.is_active = false;
        repo.insert_rule(inactive).await.expect("d");

        let company = CompanyId("C1".to_string());
        let all = repo.list_rules(&company, &RuleFilter::default()).await.expect("list");
        let ids: Vec<&str> = all.iter().map(|rule| rule.id.0.as_str()).collect();
        assert_eq!(ids, vec!["R-b", "R-a", "R-c", "R-d"]);

        let active = repo
            .list_rules(&company, &RuleFilter { document_type: None, is_active: Some(true) })
            .await
            .expect("active");
        assert_eq!(active.len(), 3);

        let adjustments = repo
            .list_rules(
                &company,
                &RuleFilter { document_type: Some(DocumentType::StockAdjustment), is_active: None },
            )
            .await
            .expect("by type");
        assert_eq!(adjustments.len(), 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn rule_for_unknown_role_violates_constraint() {
        let pool = setup_pool().await;
        let repo = SqlMatrixRepository::new(pool.clone());

        let error = repo
            .insert_rule(rule("R-1", DocumentType::PurchaseOrder, 1, 0, None))
            .await
            .expect_err("role missing");
        assert!(matches!(error, RepositoryError::Constraint(_)));

        pool.close().await;
    }

    #[tokio::test]
    async fn delete_distinguishes_missing_from_deleted() {
        let pool = setup_pool().await;
        insert_role(&pool, "C1", "finance", &[]).await;
        let repo = SqlMatrixRepository::new(pool.clone());
        repo.insert_rule(rule("R-1", DocumentType::PurchaseOrder, 1, 0, None)).await.expect("insert");

        let first = repo.delete_rule_if_unreferenced(&RuleId("R-1".to_string())).await.expect("delete");
        assert_eq!(first, RuleDeletion::Deleted);
        let second = repo.delete_rule_if_unreferenced(&RuleId("R-1".to_string())).await.expect("again");
        assert_eq!(second, RuleDeletion::NotFound);

        pool.close().await;
    }
}
