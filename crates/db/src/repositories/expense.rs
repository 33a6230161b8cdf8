use std::str::FromStr;

use rust_decimal::Decimal;
use sqlx::Row;

use outlay_core::approvals::ports::ExpenseRepository;
use outlay_core::domain::approval::ApproverState;
use outlay_core::domain::expense::{ExpenseId, ExpenseRequest, ExpenseStatus};
use outlay_core::domain::rule::ApprovalRuleId;
use outlay_core::domain::user::{CompanyId, UserId};
use outlay_core::errors::RepositoryError;

use super::{backend, decode, parse_timestamp};
use crate::DbPool;

const EXPENSE_COLUMNS: &str = "id, company_id, requester_id, description, category, amount,
    currency, status, approval_rule_id, approver_state_json, version, created_at, updated_at";

pub struct SqlExpenseRepository {
    pool: DbPool,
}

impl SqlExpenseRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_expense(row: &sqlx::sqlite::SqliteRow) -> Result<ExpenseRequest, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode)?;
    let company_id: String = row.try_get("company_id").map_err(decode)?;
    let requester_id: String = row.try_get("requester_id").map_err(decode)?;
    let description: String = row.try_get("description").map_err(decode)?;
    let category: String = row.try_get("category").map_err(decode)?;
    let amount_str: String = row.try_get("amount").map_err(decode)?;
    let currency: String = row.try_get("currency").map_err(decode)?;
    let status_str: String = row.try_get("status").map_err(decode)?;
    let approval_rule_id: Option<String> = row.try_get("approval_rule_id").map_err(decode)?;
    let state_json: Option<String> = row.try_get("approver_state_json").map_err(decode)?;
    let version: i64 = row.try_get("version").map_err(decode)?;
    let created_at_str: String = row.try_get("created_at").map_err(decode)?;
    let updated_at_str: String = row.try_get("updated_at").map_err(decode)?;

    let status = ExpenseStatus::parse(&status_str)
        .ok_or_else(|| decode(format!("unknown expense status `{status_str}`")))?;
    let amount = Decimal::from_str(&amount_str)
        .map_err(|error| decode(format!("invalid amount `{amount_str}`: {error}")))?;
    let approver_state = state_json
        .map(|json| serde_json::from_str::<ApproverState>(&json))
        .transpose()
        .map_err(|error| decode(format!("invalid approver state for `{id}`: {error}")))?;
    let version = u32::try_from(version)
        .map_err(|_| decode(format!("expense `{id}` has out of range version {version}")))?;

    Ok(ExpenseRequest {
        id: ExpenseId(id),
        company_id: CompanyId(company_id),
        requester_id: UserId(requester_id),
        description,
        category,
        amount,
        currency,
        status,
        approval_rule_id: approval_rule_id.map(ApprovalRuleId),
        approver_state,
        version,
        created_at: parse_timestamp("created_at", &created_at_str)?,
        updated_at: parse_timestamp("updated_at", &updated_at_str)?,
    })
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait::async_trait]
impl ExpenseRepository for SqlExpenseRepository {
    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<ExpenseRequest>, RepositoryError> {
        let sql = format!("SELECT {EXPENSE_COLUMNS} FROM expense_request WHERE id = ?");
        let row =
            sqlx::query(&sql).bind(&id.0).fetch_optional(&self.pool).await.map_err(backend)?;

        row.as_ref().map(row_to_expense).transpose()
    }

    async fn list_by_status(
        &self,
        status: ExpenseStatus,
    ) -> Result<Vec<ExpenseRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {EXPENSE_COLUMNS} FROM expense_request
             WHERE status = ?
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(row_to_expense).collect()
    }

    async fn save(&self, expense: ExpenseRequest) -> Result<ExpenseRequest, RepositoryError> {
        let state_json = expense
            .approver_state
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(decode)?;
        let next_version = expense.version + 1;
        let conflict = || RepositoryError::Conflict { entity: "expense", id: expense.id.0.clone() };

        if expense.version == 0 {
            let inserted = sqlx::query(
                "INSERT INTO expense_request
                    (id, company_id, requester_id, description, category, amount, currency,
                     status, approval_rule_id, approver_state_json, version, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&expense.id.0)
            .bind(&expense.company_id.0)
            .bind(&expense.requester_id.0)
            .bind(&expense.description)
            .bind(&expense.category)
            .bind(expense.amount.to_string())
            .bind(&expense.currency)
            .bind(expense.status.as_str())
            .bind(expense.approval_rule_id.as_ref().map(|id| id.0.as_str()))
            .bind(state_json.as_deref())
            .bind(i64::from(next_version))
            .bind(expense.created_at.to_rfc3339())
            .bind(expense.updated_at.to_rfc3339())
            .execute(&self.pool)
            .await;

            match inserted {
                Ok(_) => {}
                Err(error) if is_unique_violation(&error) => return Err(conflict()),
                Err(error) => return Err(backend(error)),
            }
        } else {
            let updated = sqlx::query(
                "UPDATE expense_request SET
                     description = ?,
                     category = ?,
                     amount = ?,
                     currency = ?,
                     status = ?,
                     approval_rule_id = ?,
                     approver_state_json = ?,
                     version = ?,
                     updated_at = ?
                 WHERE id = ? AND version = ?",
            )
            .bind(&expense.description)
            .bind(&expense.category)
            .bind(expense.amount.to_string())
            .bind(&expense.currency)
            .bind(expense.status.as_str())
            .bind(expense.approval_rule_id.as_ref().map(|id| id.0.as_str()))
            .bind(state_json.as_deref())
            .bind(i64::from(next_version))
            .bind(expense.updated_at.to_rfc3339())
            .bind(&expense.id.0)
            .bind(i64::from(expense.version))
            .execute(&self.pool)
            .await
            .map_err(backend)?;

            if updated.rows_affected() == 0 {
                return Err(conflict());
            }
        }

        Ok(ExpenseRequest { version: next_version, ..expense })
    }
}
