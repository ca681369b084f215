use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use signoff_core::approvals::dashboard::{ActionableQuery, DashboardStats, Page};
use signoff_core::approvals::ports::{
    Decision, DecisionCommand, DecisionWrite, QueueRepository, RepositoryError,
};
use signoff_core::domain::document::{DocumentId, DocumentType};
use signoff_core::domain::queue::{
    aggregate_status, ApprovalAction, ApprovalQueueEntry, ApprovalRequest, DocumentStatus,
    EntryId, RequestId, CASCADE_REJECTION_COMMENT,
};
use signoff_core::domain::tenant::{CompanyId, RoleId, UserId};

use super::{
    action, attempt, column, count, db_error, decimal, document_type, level, optional_timestamp,
    parse_timestamp, status, timestamp,
};
use crate::DbPool;

const REQUEST_COLUMNS: &str = "id, company_id, document_type, document_id, document_number, attempt,
     amount, status, requested_by, requested_at, resolved_at";

const ENTRY_COLUMNS: &str = "e.id, e.request_id, e.company_id, e.document_type, e.document_id,
     e.document_number, e.attempt, e.approval_level, e.amount, e.action, e.approver_role_id,
     e.is_mandatory, e.acted_by, e.action_at, e.comments, e.is_cascade, e.requested_by,
     e.requested_at";

/// Pending entry of a pending request at the lowest pending level.
const ACTIONABLE: &str = "e.action = 'pending'
     AND r.status = 'pending'
     AND e.approval_level = (
         SELECT MIN(s.approval_level) FROM approval_queue_entry s
         WHERE s.request_id = e.request_id AND s.action = 'pending'
     )";

pub struct SqlQueueRepository {
    pool: DbPool,
}

impl SqlQueueRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn request_from_row(row: &SqliteRow) -> Result<ApprovalRequest, RepositoryError> {
    let requested_at: String = column(row, "requested_at")?;
    Ok(ApprovalRequest {
        id: RequestId(column(row, "id")?),
        company_id: CompanyId(column(row, "company_id")?),
        document_type: document_type(row)?,
        document_id: DocumentId(column(row, "document_id")?),
        document_number: column(row, "document_number")?,
        attempt: attempt(row)?,
        amount: decimal(row, "amount")?,
        status: status(row, "status")?,
        requested_by: UserId(column(row, "requested_by")?),
        requested_at: parse_timestamp("requested_at", &requested_at)?,
        resolved_at: optional_timestamp(row, "resolved_at")?,
    })
}

fn entry_from_row(row: &SqliteRow) -> Result<ApprovalQueueEntry, RepositoryError> {
    let requested_at: String = column(row, "requested_at")?;
    Ok(ApprovalQueueEntry {
        id: EntryId(column(row, "id")?),
        request_id: RequestId(column(row, "request_id")?),
        company_id: CompanyId(column(row, "company_id")?),
        document_type: document_type(row)?,
        document_id: DocumentId(column(row, "document_id")?),
        document_number: column(row, "document_number")?,
        attempt: attempt(row)?,
        approval_level: level(row, "approval_level")?,
        amount: decimal(row, "amount")?,
        action: action(row, "action")?,
        approver_role_id: RoleId(column(row, "approver_role_id")?),
        is_mandatory: column(row, "is_mandatory")?,
        acted_by: column::<Option<String>>(row, "acted_by")?.map(UserId),
        action_at: optional_timestamp(row, "action_at")?,
        comments: column(row, "comments")?,
        is_cascade: column(row, "is_cascade")?,
        requested_by: UserId(column(row, "requested_by")?),
        requested_at: parse_timestamp("requested_at", &requested_at)?,
    })
}

async fn load_request(
    conn: &mut SqliteConnection,
    id: &RequestId,
) -> Result<Option<ApprovalRequest>, RepositoryError> {
    let row = sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM approval_request WHERE id = ?"))
        .bind(&id.0)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error)?;
    row.as_ref().map(request_from_row).transpose()
}

async fn load_entries(
    conn: &mut SqliteConnection,
    request_id: &RequestId,
) -> Result<Vec<ApprovalQueueEntry>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {ENTRY_COLUMNS} FROM approval_queue_entry e
         WHERE e.request_id = ?
         ORDER BY e.approval_level ASC"
    ))
    .bind(&request_id.0)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_error)?;
    rows.iter().map(entry_from_row).collect()
}

/// Work out why a conditional decision update matched no row.
async fn classify_miss(
    conn: &mut SqliteConnection,
    entry_id: &EntryId,
) -> Result<DecisionWrite, RepositoryError> {
    let row = sqlx::query(
        "SELECT e.action, e.approval_level, r.status,
                (SELECT MIN(s.approval_level) FROM approval_queue_entry s
                 WHERE s.request_id = e.request_id AND s.action = 'pending') AS lowest_pending
         FROM approval_queue_entry e
         JOIN approval_request r ON r.id = e.request_id
         WHERE e.id = ?",
    )
    .bind(&entry_id.0)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_error)?;

    let Some(row) = row else {
        return Ok(DecisionWrite::Missing);
    };

    let current = action(&row, "action")?;
    if current != ApprovalAction::Pending {
        return Ok(DecisionWrite::Stale { actual: current });
    }
    let request_status = status(&row, "status")?;
    if request_status != DocumentStatus::Pending {
        return Ok(DecisionWrite::Closed { status: request_status });
    }
    let actual_level = level(&row, "approval_level")?;
    match column::<Option<i64>>(&row, "lowest_pending")? {
        Some(lowest) if lowest != i64::from(actual_level) => Ok(DecisionWrite::OutOfOrder {
            expected_level: u8::try_from(lowest).unwrap_or(u8::MAX),
            actual_level,
        }),
        _ => Ok(DecisionWrite::Stale { actual: current }),
    }
}

#[async_trait]
impl QueueRepository for SqlQueueRepository {
    async fn create_request(
        &self,
        request: ApprovalRequest,
        entries: Vec<ApprovalQueueEntry>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        sqlx::query(
            "INSERT INTO approval_request
                 (id, company_id, document_type, document_id, document_number, attempt, amount,
                  status, requested_by, requested_at, resolved_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(&request.company_id.0)
        .bind(request.document_type.as_str())
        .bind(&request.document_id.0)
        .bind(&request.document_number)
        .bind(i64::from(request.attempt))
        .bind(request.amount.to_string())
        .bind(request.status.as_str())
        .bind(&request.requested_by.0)
        .bind(timestamp(request.requested_at))
        .bind(request.resolved_at.map(timestamp))
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        for entry in &entries {
            sqlx::query(
                "INSERT INTO approval_queue_entry
                     (id, request_id, company_id, document_type, document_id, document_number,
                      attempt, approval_level, amount, action, approver_role_id, is_mandatory,
                      acted_by, action_at, comments, is_cascade, requested_by, requested_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&entry.id.0)
            .bind(&entry.request_id.0)
            .bind(&entry.company_id.0)
            .bind(entry.document_type.as_str())
            .bind(&entry.document_id.0)
            .bind(&entry.document_number)
            .bind(i64::from(entry.attempt))
            .bind(i64::from(entry.approval_level))
            .bind(entry.amount.to_string())
            .bind(entry.action.as_str())
            .bind(&entry.approver_role_id.0)
            .bind(entry.is_mandatory)
            .bind(entry.acted_by.as_ref().map(|user| user.0.as_str()))
            .bind(entry.action_at.map(timestamp))
            .bind(entry.comments.as_deref())
            .bind(entry.is_cascade)
            .bind(&entry.requested_by.0)
            .bind(timestamp(entry.requested_at))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn find_request(
        &self,
        id: &RequestId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        load_request(&mut conn, id).await
    }

    async fn find_latest_request(
        &self,
        company_id: &CompanyId,
        document_type: DocumentType,
        document_id: &DocumentId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM approval_request
             WHERE company_id = ? AND document_type = ? AND document_id = ?
             ORDER BY attempt DESC
             LIMIT 1"
        ))
        .bind(&company_id.0)
        .bind(document_type.as_str())
        .bind(&document_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.as_ref().map(request_from_row).transpose()
    }

    async fn find_entry(&self, id: &EntryId) -> Result<Option<ApprovalQueueEntry>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM approval_queue_entry e WHERE e.id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.as_ref().map(entry_from_row).transpose()
    }

    async fn list_entries(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<ApprovalQueueEntry>, RepositoryError> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        load_entries(&mut conn, request_id).await
    }

    async fn list_document_entries(
        &self,
        company_id: &CompanyId,
        document_type: DocumentType,
        document_id: &DocumentId,
    ) -> Result<Vec<ApprovalQueueEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM approval_queue_entry e
             WHERE e.company_id = ? AND e.document_type = ? AND e.document_id = ?
             ORDER BY e.attempt ASC, e.approval_level ASC"
        ))
        .bind(&company_id.0)
        .bind(document_type.as_str())
        .bind(&document_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn record_decision(
        &self,
        command: DecisionCommand,
    ) -> Result<DecisionWrite, RepositoryError> {
        let acted_at = timestamp(command.acted_at);
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let updated = sqlx::query(
            "UPDATE approval_queue_entry
             SET action = ?, acted_by = ?, action_at = ?, comments = ?
             WHERE id = ?
               AND action = 'pending'
               AND EXISTS (
                   SELECT 1 FROM approval_request r
                   WHERE r.id = approval_queue_entry.request_id AND r.status = 'pending'
               )
               AND approval_level = (
                   SELECT MIN(s.approval_level) FROM approval_queue_entry s
                   WHERE s.request_id = approval_queue_entry.request_id AND s.action = 'pending'
               )",
        )
        .bind(command.decision.action().as_str())
        .bind(&command.actor.0)
        .bind(&acted_at)
        .bind(command.comments.as_deref())
        .bind(&command.entry_id.0)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        if updated.rows_affected() == 0 {
            let outcome = classify_miss(&mut tx, &command.entry_id).await?;
            tx.rollback().await.map_err(db_error)?;
            return Ok(outcome);
        }

        let request_id: String =
            sqlx::query_scalar("SELECT request_id FROM approval_queue_entry WHERE id = ?")
                .bind(&command.entry_id.0)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_error)?;
        let request_id = RequestId(request_id);

        if command.decision == Decision::Reject {
            sqlx::query(
                "UPDATE approval_queue_entry
                 SET action = 'rejected', acted_by = ?, action_at = ?, comments = ?, is_cascade = 1
                 WHERE request_id = ? AND action = 'pending'",
            )
            .bind(&command.actor.0)
            .bind(&acted_at)
            .bind(CASCADE_REJECTION_COMMENT)
            .bind(&request_id.0)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        let entries = load_entries(&mut tx, &request_id).await?;
        let aggregate = aggregate_status(&entries);
        sqlx::query("UPDATE approval_request SET status = ?, resolved_at = ? WHERE id = ?")
            .bind(aggregate.as_str())
            .bind(aggregate.is_terminal().then_some(acted_at.as_str()))
            .bind(&request_id.0)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        let request = load_request(&mut tx, &request_id)
            .await?
            .ok_or_else(|| RepositoryError::Decode(format!("request `{}` vanished", request_id.0)))?;
        tx.commit().await.map_err(db_error)?;

        let mut entry = None;
        let mut cascaded = Vec::new();
        for candidate in entries {
            if candidate.id == command.entry_id {
                entry = Some(candidate);
            } else if candidate.is_cascade {
                cascaded.push(candidate);
            }
        }

        match entry {
            Some(entry) => Ok(DecisionWrite::Applied { entry, cascaded, request }),
            None => Ok(DecisionWrite::Missing),
        }
    }

    async fn withdraw_request(
        &self,
        request_id: &RequestId,
        withdrawn_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let updated = sqlx::query(
            "UPDATE approval_request SET status = 'withdrawn', resolved_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(timestamp(withdrawn_at))
        .bind(&request_id.0)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(updated.rows_affected() == 1)
    }

    async fn list_actionable(
        &self,
        query: &ActionableQuery,
    ) -> Result<Page<ApprovalQueueEntry>, RepositoryError> {
        let role_ids: Vec<&str> = query.role_ids.iter().map(|role| role.0.as_str()).collect();
        let role_ids = serde_json::to_string(&role_ids)
            .map_err(|e| RepositoryError::Decode(format!("role filter: {e}")))?;
        let document_type = query.document_type.map(|kind| kind.as_str());
        let filter = format!(
            "FROM approval_queue_entry e
             JOIN approval_request r ON r.id = e.request_id
             WHERE e.company_id = ?
               AND {ACTIONABLE}
               AND e.approver_role_id IN (SELECT value FROM json_each(?))
               AND (? IS NULL OR e.document_type = ?)"
        );

        let total_row = sqlx::query(&format!("SELECT COUNT(*) AS count {filter}"))
            .bind(&query.company_id.0)
            .bind(&role_ids)
            .bind(document_type)
            .bind(document_type)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        let total = count(&total_row)?;

        let offset = Page::<ApprovalQueueEntry>::offset(query.page, query.limit);
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} {filter}
             ORDER BY e.requested_at ASC, e.id ASC
             LIMIT ? OFFSET ?"
        ))
        .bind(&query.company_id.0)
        .bind(&role_ids)
        .bind(document_type)
        .bind(document_type)
        .bind(i64::from(query.limit))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let items = rows.iter().map(entry_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(Page { items, page: query.page, limit: query.limit, total })
    }

    async fn dashboard_counts(
        &self,
        company_id: &CompanyId,
        day: NaiveDate,
    ) -> Result<DashboardStats, RepositoryError> {
        let day = day.format("%Y-%m-%d").to_string();
        let mut stats = DashboardStats::default();

        let pending_rows = sqlx::query(&format!(
            "SELECT e.document_type, COUNT(*) AS count
             FROM approval_queue_entry e
             JOIN approval_request r ON r.id = e.request_id
             WHERE e.company_id = ? AND {ACTIONABLE}
             GROUP BY e.document_type"
        ))
        .bind(&company_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        for row in &pending_rows {
            let pending = count(row)?;
            stats.pending += pending;
            stats.pending_by_document_type.insert(document_type(row)?, pending);
        }

        let decided = sqlx::query(
            "SELECT
                 COALESCE(SUM(CASE WHEN action = 'approved' THEN 1 ELSE 0 END), 0) AS approved,
                 COALESCE(SUM(CASE WHEN action = 'rejected' AND is_cascade = 0 THEN 1 ELSE 0 END), 0)
                     AS rejected
             FROM approval_queue_entry
             WHERE company_id = ? AND substr(action_at, 1, 10) = ?",
        )
        .bind(&company_id.0)
        .bind(&day)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        stats.approved_today = column::<i64>(&decided, "approved")?.max(0) as u64;
        stats.rejected_today = column::<i64>(&decided, "rejected")?.max(0) as u64;

        Ok(stats)
    }
}
