use async_trait::async_trait;
use chrono::{DateTime, Utc};

use signoff_core::approvals::ports::{
    AdapterError, ApprovalResolution, DocumentAdapter, RepositoryError,
};
use signoff_core::domain::document::{DocumentId, DocumentType};
use signoff_core::domain::queue::DocumentStatus;
use signoff_core::domain::tenant::CompanyId;

use super::{attempt, column, db_error, parse_timestamp, status, timestamp};
use crate::DbPool;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredDocumentStatus {
    pub document_number: String,
    pub attempt: u32,
    pub status: DocumentStatus,
    pub resolved_at: DateTime<Utc>,
}

/// Fallback write-back target: records the final status of a document in a
/// shared table for modules that do not own an adapter of their own.
pub struct SqlDocumentStatusAdapter {
    pool: DbPool,
}

impl SqlDocumentStatusAdapter {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_status(
        &self,
        company_id: &CompanyId,
        document_type: DocumentType,
        document_id: &DocumentId,
    ) -> Result<Option<StoredDocumentStatus>, RepositoryError> {
        let row = sqlx::query(
            "SELECT document_number, attempt, status, resolved_at
             FROM document_approval_status
             WHERE company_id = ? AND document_type = ? AND document_id = ?",
        )
        .bind(&company_id.0)
        .bind(document_type.as_str())
        .bind(&document_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let resolved_at: String = column(&row, "resolved_at")?;
        Ok(Some(StoredDocumentStatus {
            document_number: column(&row, "document_number")?,
            attempt: attempt(&row)?,
            status: status(&row, "status")?,
            resolved_at: parse_timestamp("resolved_at", &resolved_at)?,
        }))
    }
}

#[async_trait]
impl DocumentAdapter for SqlDocumentStatusAdapter {
    async fn on_approval_resolved(
        &self,
        resolution: &ApprovalResolution,
    ) -> Result<(), AdapterError> {
        if !matches!(resolution.final_status, DocumentStatus::Approved | DocumentStatus::Rejected) {
            return Err(AdapterError(format!(
                "cannot write back non-final status `{}`",
                resolution.final_status.as_str()
            )));
        }

        // A later attempt overwrites the outcome of an earlier one.
        sqlx::query(
            "INSERT INTO document_approval_status
                 (company_id, document_type, document_id, document_number, attempt, status, resolved_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (company_id, document_type, document_id) DO UPDATE SET
                 document_number = excluded.document_number,
                 attempt = excluded.attempt,
                 status = excluded.status,
                 resolved_at = excluded.resolved_at
             WHERE excluded.attempt >= document_approval_status.attempt",
        )
        .bind(&resolution.company_id.0)
        .bind(resolution.document_type.as_str())
        .bind(&resolution.document_id.0)
        .bind(&resolution.document_number)
        .bind(i64::from(resolution.attempt))
        .bind(resolution.final_status.as_str())
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| AdapterError(e.to_string()))?;

        tracing::debug!(
            event_name = "approvals.adapter.status_written",
            company_id = %resolution.company_id.0,
            document_type = resolution.document_type.as_str(),
            document_id = %resolution.document_id.0,
            status = resolution.final_status.as_str(),
            "document approval status written back"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use signoff_core::approvals::ports::{ApprovalResolution, DocumentAdapter};
    use signoff_core::domain::document::{DocumentId, DocumentType};
    use signoff_core::domain::queue::DocumentStatus;
    use signoff_core::domain::tenant::CompanyId;

    use super::SqlDocumentStatusAdapter;
    use crate::repositories::test_support::setup_pool;

    fn resolution(attempt: u32, final_status: DocumentStatus) -> ApprovalResolution {
        ApprovalResolution {
            company_id: CompanyId("C1".to_string()),
            document_type: DocumentType::VendorBill,
            document_id: DocumentId("VB-7".to_string()),
            document_number: "VB-2026-0007".to_string(),
            attempt,
            final_status,
        }
    }

    #[tokio::test]
    async fn later_attempt_replaces_earlier_outcome() {
        let pool = setup_pool().await;
        let adapter = SqlDocumentStatusAdapter::new(pool.clone());

        adapter.on_approval_resolved(&resolution(1, DocumentStatus::Rejected)).await.expect("first");
        adapter.on_approval_resolved(&resolution(2, DocumentStatus::Approved)).await.expect("second");
        adapter.on_approval_resolved(&resolution(1, DocumentStatus::Rejected)).await.expect("late replay");

        let stored = adapter
            .find_status(&CompanyId("C1".to_string()), DocumentType::VendorBill, &DocumentId("VB-7".to_string()))
            .await
            .expect("find")
            .expect("present");
        assert_eq!(stored.attempt, 2);
        assert_eq!(stored.status, DocumentStatus::Approved);

        pool.close().await;
    }

    #[tokio::test]
    async fn withdrawn_is_not_a_write_back_status() {
        let pool = setup_pool().await;
        let adapter = SqlDocumentStatusAdapter::new(pool.clone());

        let error = adapter
            .on_approval_resolved(&resolution(1, DocumentStatus::Withdrawn))
            .await
            .expect_err("withdrawn");
        assert!(error.0.contains("withdrawn"));

        pool.close().await;
    }
}
