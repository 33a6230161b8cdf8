use sqlx::Row;

use outlay_core::approvals::ports::ApprovalActionRepository;
use outlay_core::domain::approval::{ApprovalActionId, ApprovalActionRecord, Decision};
use outlay_core::domain::expense::ExpenseId;
use outlay_core::domain::user::UserId;
use outlay_core::errors::RepositoryError;

use super::{backend, decode, parse_timestamp};
use crate::DbPool;

/// Backed by `approval_action`, whose triggers abort any UPDATE or DELETE.
pub struct SqlApprovalActionRepository {
    pool: DbPool,
}

impl SqlApprovalActionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalActionRecord, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode)?;
    let expense_id: String = row.try_get("expense_id").map_err(decode)?;
    let approver_id: String = row.try_get("approver_id").map_err(decode)?;
    let decision_str: String = row.try_get("decision").map_err(decode)?;
    let comment: Option<String> = row.try_get("comment").map_err(decode)?;
    let recorded_at_str: String = row.try_get("recorded_at").map_err(decode)?;

    let decision = decision_str.parse::<Decision>().map_err(decode)?;

    Ok(ApprovalActionRecord {
        id: ApprovalActionId(id),
        expense_id: ExpenseId(expense_id),
        approver_id: UserId(approver_id),
        decision,
        comment,
        recorded_at: parse_timestamp("recorded_at", &recorded_at_str)?,
    })
}

#[async_trait::async_trait]
impl ApprovalActionRepository for SqlApprovalActionRepository {
    async fn append(&self, record: ApprovalActionRecord) -> Result<(), RepositoryError> {
        let inserted = sqlx::query(
            "INSERT INTO approval_action
                (id, expense_id, approver_id, decision, comment, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&record.id.0)
        .bind(&record.expense_id.0)
        .bind(&record.approver_id.0)
        .bind(record.decision.as_str())
        .bind(record.comment.as_deref())
        .bind(record.recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if inserted.rows_affected() == 1 {
            return Ok(());
        }

        let row = sqlx::query(
            "SELECT id, expense_id, approver_id, decision, comment, recorded_at
             FROM approval_action
             WHERE id = ?",
        )
        .bind(&record.id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        if row_to_record(&row)?.same_decision(&record) {
            Ok(())
        } else {
            Err(RepositoryError::Conflict { entity: "approval action", id: record.id.0 })
        }
    }

    async fn list_for_expense(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<Vec<ApprovalActionRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, expense_id, approver_id, decision, comment, recorded_at
             FROM approval_action
             WHERE expense_id = ?
             ORDER BY recorded_at ASC, rowid ASC",
        )
        .bind(&expense_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(row_to_record).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use outlay_core::approvals::ports::{ApprovalActionRepository, ExpenseRepository};
    use outlay_core::domain::approval::{ApprovalActionId, ApprovalActionRecord, Decision};
    use outlay_core::domain::expense::{ExpenseId, ExpenseRequest, ExpenseStatus};
    use outlay_core::domain::user::{CompanyId, UserId};
    use outlay_core::errors::RepositoryError;

    use super::SqlApprovalActionRepository;
    use crate::repositories::rule::tests::setup;
    use crate::repositories::SqlExpenseRepository;
    use crate::DbPool;

    async fn seed_expense(pool: &DbPool, id: &str) {
        let now = Utc::now();
        SqlExpenseRepository::new(pool.clone())
            .save(ExpenseRequest {
                id: ExpenseId(id.to_string()),
                company_id: CompanyId("co-1".to_string()),
                requester_id: UserId("u-emp".to_string()),
                description: "Conference ticket".to_string(),
                category: "training".to_string(),
                amount: Decimal::new(49_900, 2),
                currency: "USD".to_string(),
                status: ExpenseStatus::Pending,
                approval_rule_id: None,
                approver_state: None,
                version: 0,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("seed expense");
    }

    fn record(
        id: &str,
        expense_id: &str,
        decision: Decision,
        offset_secs: i64,
    ) -> ApprovalActionRecord {
        ApprovalActionRecord {
            id: ApprovalActionId(id.to_string()),
            expense_id: ExpenseId(expense_id.to_string()),
            approver_id: UserId("u-mgr".to_string()),
            decision,
            comment: Some(format!("{id} comment")),
            recorded_at: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    #[tokio::test]
    async fn sql_action_repo_appends_and_lists_in_order() {
        let pool = setup().await;
        seed_expense(&pool, "EXP-1").await;
        seed_expense(&pool, "EXP-2").await;
        let repo = SqlApprovalActionRepository::new(pool);

        repo.append(record("ACT-2", "EXP-1", Decision::Reject, 5)).await.expect("append second");
        repo.append(record("ACT-1", "EXP-1", Decision::Approve, 0)).await.expect("append first");
        repo.append(record("ACT-3", "EXP-2", Decision::Approve, 1)).await.expect("append other");

        let listed = repo.list_for_expense(&ExpenseId("EXP-1".to_string())).await.expect("list");
        let ids: Vec<&str> = listed.iter().map(|action| action.id.0.as_str()).collect();
        assert_eq!(ids, vec!["ACT-1", "ACT-2"]);
        assert_eq!(listed[1].decision, Decision::Reject);
        assert_eq!(listed[0].comment.as_deref(), Some("ACT-1 comment"));
    }

    #[tokio::test]
    async fn sql_action_rows_are_write_once() {
        let pool = setup().await;
        seed_expense(&pool, "EXP-1").await;
        let repo = SqlApprovalActionRepository::new(pool.clone());
        let first = record("ACT-1", "EXP-1", Decision::Approve, 0);
        repo.append(first.clone()).await.expect("append");

        repo.append(first.clone()).await.expect("same decision again is a no-op");
        let flipped = ApprovalActionRecord { decision: Decision::Reject, ..first };
        let conflict = repo.append(flipped).await.expect_err("different decision under same id");
        assert!(matches!(conflict, RepositoryError::Conflict { entity: "approval action", .. }));

        let stored = repo.list_for_expense(&ExpenseId("EXP-1".to_string())).await.expect("list");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].decision, Decision::Approve);

        let update =
            sqlx::query("UPDATE approval_action SET decision = 'reject' WHERE id = 'ACT-1'")
                .execute(&pool)
                .await;
        assert!(update.is_err(), "updates must be rejected by the schema");

        let delete =
            sqlx::query("DELETE FROM approval_action WHERE id = 'ACT-1'").execute(&pool).await;
        assert!(delete.is_err(), "deletes must be rejected by the schema");
    }

    #[tokio::test]
    async fn sql_action_repo_requires_existing_expense() {
        let repo = SqlApprovalActionRepository::new(setup().await);
        let error = repo
            .append(record("ACT-1", "EXP-missing", Decision::Approve, 0))
            .await
            .expect_err("foreign key");
        assert!(matches!(error, RepositoryError::Backend(_)));
    }
}
