use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use signoff_core::approvals::ports::RepositoryError;
use signoff_core::domain::document::DocumentType;
use signoff_core::domain::queue::{ApprovalAction, DocumentStatus};

pub mod document_status;
pub mod matrix;
pub mod queue;
pub mod roles;

pub use document_status::{SqlDocumentStatusAdapter, StoredDocumentStatus};
pub use matrix::SqlMatrixRepository;
pub use queue::SqlQueueRepository;
pub use roles::SqlRoleDirectory;

pub(crate) fn db_error(error: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(database) = &error {
        if database.is_unique_violation()
            || database.is_foreign_key_violation()
            || database.is_check_violation()
        {
            return RepositoryError::Constraint(database.message().to_string());
        }
    }
    RepositoryError::Database(error.to_string())
}

pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(|e| RepositoryError::Decode(format!("{name}: {e}")))
}

/// Fixed-width UTC text so lexical order matches chronological order.
pub(crate) fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(name: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{name}: invalid timestamp `{value}`: {e}")))
}

pub(crate) fn optional_timestamp(
    row: &SqliteRow,
    name: &str,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    column::<Option<String>>(row, name)?
        .map(|value| parse_timestamp(name, &value))
        .transpose()
}

pub(crate) fn decimal(row: &SqliteRow, name: &str) -> Result<Decimal, RepositoryError> {
    let raw: String = column(row, name)?;
    Decimal::from_str(&raw)
        .map_err(|e| RepositoryError::Decode(format!("{name}: invalid decimal `{raw}`: {e}")))
}

pub(crate) fn document_type(row: &SqliteRow) -> Result<DocumentType, RepositoryError> {
    let raw: String = column(row, "document_type")?;
    DocumentType::parse(&raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown document_type `{raw}`")))
}

pub(crate) fn action(row: &SqliteRow, name: &str) -> Result<ApprovalAction, RepositoryError> {
    let raw: String = column(row, name)?;
    ApprovalAction::parse(&raw)
        .ok_or_else(|| RepositoryError::Decode(format!("{name}: unknown action `{raw}`")))
}

pub(crate) fn status(row: &SqliteRow, name: &str) -> Result<DocumentStatus, RepositoryError> {
    let raw: String = column(row, name)?;
    DocumentStatus::parse(&raw)
        .ok_or_else(|| RepositoryError::Decode(format!("{name}: unknown status `{raw}`")))
}

pub(crate) fn level(row: &SqliteRow, name: &str) -> Result<u8, RepositoryError> {
    let raw: i64 = column(row, name)?;
    u8::try_from(raw).map_err(|_| RepositoryError::Decode(format!("{name}: level {raw} out of range")))
}

pub(crate) fn attempt(row: &SqliteRow) -> Result<u32, RepositoryError> {
    let raw: i64 = column(row, "attempt")?;
    u32::try_from(raw).map_err(|_| RepositoryError::Decode(format!("attempt {raw} out of range")))
}

pub(crate) fn count(row: &SqliteRow) -> Result<u64, RepositoryError> {
    let raw: i64 = column(row, "count")?;
    Ok(raw.max(0) as u64)
}
