use async_trait::async_trait;
use chrono::Utc;

use signoff_core::approvals::ports::{RepositoryError, RoleDirectory};
use signoff_core::domain::tenant::{CompanyId, RoleId, UserId};

use super::{db_error, timestamp};
use crate::DbPool;

/// Reads the role tables owned by user management. Every call goes to the
/// database so a revoked assignment takes effect on the next decision.
pub struct SqlRoleDirectory {
    pool: DbPool,
}

impl SqlRoleDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn define_role(
        &self,
        company_id: &CompanyId,
        role_id: &RoleId,
        name: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO company_role (company_id, role_id, name, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (company_id, role_id) DO UPDATE SET name = excluded.name",
        )
        .bind(&company_id.0)
        .bind(&role_id.0)
        .bind(name)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    pub async fn assign(
        &self,
        company_id: &CompanyId,
        role_id: &RoleId,
        user_id: &UserId,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT OR IGNORE INTO user_role_assignment (company_id, role_id, user_id, assigned_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&company_id.0)
        .bind(&role_id.0)
        .bind(&user_id.0)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    pub async fn revoke(
        &self,
        company_id: &CompanyId,
        role_id: &RoleId,
        user_id: &UserId,
    ) -> Result<bool, RepositoryError> {
        let removed = sqlx::query(
            "DELETE FROM user_role_assignment WHERE company_id = ? AND role_id = ? AND user_id = ?",
        )
        .bind(&company_id.0)
        .bind(&role_id.0)
        .bind(&user_id.0)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(removed.rows_affected() > 0)
    }
}

#[async_trait]
impl RoleDirectory for SqlRoleDirectory {
    async fn role_exists(
        &self,
        company_id: &CompanyId,
        role_id: &RoleId,
    ) -> Result<bool, RepositoryError> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM company_role WHERE company_id = ? AND role_id = ?")
                .bind(&company_id.0)
                .bind(&role_id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;

        Ok(found.is_some())
    }

    async fn actor_has_role(
        &self,
        actor_id: &UserId,
        role_id: &RoleId,
        company_id: &CompanyId,
    ) -> Result<bool, RepositoryError> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM user_role_assignment
             WHERE company_id = ? AND role_id = ? AND user_id = ?",
        )
        .bind(&company_id.0)
        .bind(&role_id.0)
        .bind(&actor_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(found.is_some())
    }

    async fn members_of(
        &self,
        company_id: &CompanyId,
        role_id: &RoleId,
    ) -> Result<Vec<UserId>, RepositoryError> {
        let members: Vec<String> = sqlx::query_scalar(
            "SELECT user_id FROM user_role_assignment
             WHERE company_id = ? AND role_id = ?
             ORDER BY user_id ASC",
        )
        .bind(&company_id.0)
        .bind(&role_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(members.into_iter().map(UserId).collect())
    }

    async fn roles_of(
        &self,
        actor_id: &UserId,
        company_id: &CompanyId,
    ) -> Result<Vec<RoleId>, RepositoryError> {
        let roles: Vec<String> = sqlx::query_scalar(
            "SELECT role_id FROM user_role_assignment
             WHERE company_id = ? AND user_id = ?
             ORDER BY role_id ASC",
        )
        .bind(&company_id.0)
        .bind(&actor_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(roles.into_iter().map(RoleId).collect())
    }
}
