use chrono::Utc;
use sqlx::Row;

use outlay_core::approvals::ports::UserDirectory;
use outlay_core::domain::user::{CompanyId, DirectoryUser, UserId, UserRole};
use outlay_core::errors::RepositoryError;

use super::{backend, decode};
use crate::DbPool;

pub struct SqlUserDirectory {
    pool: DbPool,
}

impl SqlUserDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Registers or refreshes a directory entry. The first registration time is kept.
    pub async fn upsert(&self, user: &DirectoryUser) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO directory_user (id, company_id, role, manager_id, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                company_id = excluded.company_id,
                role = excluded.role,
                manager_id = excluded.manager_id",
        )
        .bind(&user.id.0)
        .bind(&user.company_id.0)
        .bind(user.role.as_str())
        .bind(user.manager_id.as_ref().map(|id| id.0.as_str()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<DirectoryUser, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode)?;
    let company_id: String = row.try_get("company_id").map_err(decode)?;
    let role_str: String = row.try_get("role").map_err(decode)?;
    let manager_id: Option<String> = row.try_get("manager_id").map_err(decode)?;

    let role = UserRole::parse(&role_str)
        .ok_or_else(|| decode(format!("unknown role `{role_str}` for user `{id}`")))?;

    Ok(DirectoryUser {
        id: UserId(id),
        company_id: CompanyId(company_id),
        role,
        manager_id: manager_id.map(UserId),
    })
}

#[async_trait::async_trait]
impl UserDirectory for SqlUserDirectory {
    async fn find_user(&self, id: &UserId) -> Result<Option<DirectoryUser>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, company_id, role, manager_id FROM directory_user WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn find_company_admin(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<UserId>, RepositoryError> {
        let admin: Option<String> = sqlx::query_scalar(
            "SELECT id FROM directory_user
             WHERE company_id = ? AND role = 'admin'
             ORDER BY created_at ASC, rowid ASC
             LIMIT 1",
        )
        .bind(&company_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(admin.map(UserId))
    }
}
