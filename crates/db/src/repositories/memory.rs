use std::collections::HashMap;

use tokio::sync::RwLock;

use outlay_core::approvals::ports::{
    ApprovalActionRepository, ExpenseRepository, RuleRepository, UserDirectory,
};
use outlay_core::domain::approval::{ApprovalActionLog, ApprovalActionRecord};
use outlay_core::domain::expense::{ExpenseId, ExpenseRequest, ExpenseStatus};
use outlay_core::domain::rule::{ApprovalRule, ApprovalRuleId};
use outlay_core::domain::user::{CompanyId, DirectoryUser, UserId, UserRole};
use outlay_core::errors::RepositoryError;

#[derive(Default)]
pub struct InMemoryExpenseRepository {
    expenses: RwLock<HashMap<String, ExpenseRequest>>,
}

#[async_trait::async_trait]
impl ExpenseRepository for InMemoryExpenseRepository {
    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<ExpenseRequest>, RepositoryError> {
        let expenses = self.expenses.read().await;
        Ok(expenses.get(&id.0).cloned())
    }

    async fn list_by_status(
        &self,
        status: ExpenseStatus,
    ) -> Result<Vec<ExpenseRequest>, RepositoryError> {
        let expenses = self.expenses.read().await;
        let mut matching: Vec<ExpenseRequest> =
            expenses.values().filter(|expense| expense.status == status).cloned().collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.0.cmp(&b.id.0)));
        Ok(matching)
    }

    async fn save(&self, expense: ExpenseRequest) -> Result<ExpenseRequest, RepositoryError> {
        let mut expenses = self.expenses.write().await;
        let stored_version = expenses.get(&expense.id.0).map(|stored| stored.version).unwrap_or(0);
        if stored_version != expense.version {
            return Err(RepositoryError::Conflict { entity: "expense", id: expense.id.0 });
        }

        let saved = ExpenseRequest { version: expense.version + 1, ..expense };
        expenses.insert(saved.id.0.clone(), saved.clone());
        Ok(saved)
    }
}

/// Rules are kept in insertion order so `list_for_company` matches creation order.
#[derive(Default)]
pub struct InMemoryRuleRepository {
    rules: RwLock<Vec<ApprovalRule>>,
}

#[async_trait::async_trait]
impl RuleRepository for InMemoryRuleRepository {
    async fn find_by_id(
        &self,
        id: &ApprovalRuleId,
    ) -> Result<Option<ApprovalRule>, RepositoryError> {
        let rules = self.rules.read().await;
        Ok(rules.iter().find(|rule| &rule.id == id).cloned())
    }

    async fn list_for_company(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<ApprovalRule>, RepositoryError> {
        let rules = self.rules.read().await;
        Ok(rules.iter().filter(|rule| &rule.company_id == company_id).cloned().collect())
    }

    async fn save(&self, rule: ApprovalRule) -> Result<(), RepositoryError> {
        let mut rules = self.rules.write().await;
        match rules.iter_mut().find(|existing| existing.id == rule.id) {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryApprovalActionRepository {
    log: RwLock<ApprovalActionLog>,
}

#[async_trait::async_trait]
impl ApprovalActionRepository for InMemoryApprovalActionRepository {
    async fn append(&self, record: ApprovalActionRecord) -> Result<(), RepositoryError> {
        let mut log = self.log.write().await;
        match log.records().iter().find(|existing| existing.id == record.id) {
            Some(existing) if existing.same_decision(&record) => Ok(()),
            Some(_) => {
                Err(RepositoryError::Conflict { entity: "approval action", id: record.id.0 })
            }
            None => {
                log.append(record);
                Ok(())
            }
        }
    }

    async fn list_for_expense(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<Vec<ApprovalActionRecord>, RepositoryError> {
        let log = self.log.read().await;
        Ok(log.for_expense(expense_id).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<Vec<DirectoryUser>>,
}

impl InMemoryUserDirectory {
    pub async fn insert(&self, user: DirectoryUser) {
        let mut users = self.users.write().await;
        match users.iter_mut().find(|existing| existing.id == user.id) {
            Some(existing) => *existing = user,
            None => users.push(user),
        }
    }
}

#[async_trait::async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_user(&self, id: &UserId) -> Result<Option<DirectoryUser>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.iter().find(|user| &user.id == id).cloned())
    }

    async fn find_company_admin(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<UserId>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users
            .iter()
            .find(|user| &user.company_id == company_id && user.role == UserRole::Admin)
            .map(|user| user.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use outlay_core::approvals::ports::{
        ApprovalActionRepository, ExpenseRepository, UserDirectory,
    };
    use outlay_core::domain::approval::{ApprovalActionId, ApprovalActionRecord, Decision};
    use outlay_core::domain::expense::{ExpenseId, ExpenseRequest, ExpenseStatus};
    use outlay_core::domain::user::{CompanyId, DirectoryUser, UserId, UserRole};
    use outlay_core::errors::RepositoryError;

    use crate::repositories::{
        InMemoryApprovalActionRepository, InMemoryExpenseRepository, InMemoryUserDirectory,
    };

    fn draft(id: &str) -> ExpenseRequest {
        let now = Utc::now();
        ExpenseRequest {
            id: ExpenseId(id.to_string()),
            company_id: CompanyId("co-1".to_string()),
            requester_id: UserId("u-emp".to_string()),
            description: "Taxi to airport".to_string(),
            category: "travel".to_string(),
            amount: Decimal::new(4_250, 2),
            currency: "EUR".to_string(),
            status: ExpenseStatus::Draft,
            approval_rule_id: None,
            approver_state: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn expense_save_bumps_version_and_rejects_stale_writes() {
        let repo = InMemoryExpenseRepository::default();

        let first = repo.save(draft("EXP-1")).await.expect("insert");
        assert_eq!(first.version, 1);

        let second = repo.save(first.clone()).await.expect("update");
        assert_eq!(second.version, 2);

        let stale = repo.save(first).await.expect_err("stale write");
        assert!(matches!(stale, RepositoryError::Conflict { entity: "expense", .. }));

        let duplicate_insert = repo.save(draft("EXP-1")).await.expect_err("duplicate insert");
        assert!(matches!(duplicate_insert, RepositoryError::Conflict { .. }));
    }

    #[tokio::test]
    async fn expense_list_by_status_filters() {
        let repo = InMemoryExpenseRepository::default();
        repo.save(draft("EXP-1")).await.expect("save draft");
        let mut pending = draft("EXP-2");
        pending.status = ExpenseStatus::Pending;
        repo.save(pending).await.expect("save pending");

        let listed = repo.list_by_status(ExpenseStatus::Pending).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id.0, "EXP-2");
    }

    #[tokio::test]
    async fn action_log_is_append_only_per_expense() {
        let repo = InMemoryApprovalActionRepository::default();
        let record = ApprovalActionRecord {
            id: ApprovalActionId("ACT-1".to_string()),
            expense_id: ExpenseId("EXP-1".to_string()),
            approver_id: UserId("u-mgr".to_string()),
            decision: Decision::Approve,
            comment: None,
            recorded_at: Utc::now(),
        };

        repo.append(record.clone()).await.expect("append");
        repo.append(ApprovalActionRecord { comment: Some("retry".to_string()), ..record.clone() })
            .await
            .expect("re-appending the same decision is a no-op");
        let flipped = ApprovalActionRecord { decision: Decision::Reject, ..record.clone() };
        let conflict = repo.append(flipped).await.expect_err("different decision under same id");
        assert!(matches!(conflict, RepositoryError::Conflict { .. }));

        let listed = repo.list_for_expense(&record.expense_id).await.expect("list");
        assert_eq!(listed, vec![record]);
        let other = repo.list_for_expense(&ExpenseId("EXP-2".to_string())).await.expect("list");
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn directory_finds_company_admin() {
        let directory = InMemoryUserDirectory::default();
        directory
            .insert(DirectoryUser {
                id: UserId("u-admin".to_string()),
                company_id: CompanyId("co-1".to_string()),
                role: UserRole::Admin,
                manager_id: None,
            })
            .await;

        let admin = directory
            .find_company_admin(&CompanyId("co-1".to_string()))
            .await
            .expect("lookup admin");
        assert_eq!(admin, Some(UserId("u-admin".to_string())));

        let none = directory
            .find_company_admin(&CompanyId("co-2".to_string()))
            .await
            .expect("lookup admin");
        assert_eq!(none, None);
    }
}
