use async_trait::async_trait;

use crate::domain::approval::ApprovalActionRecord;
use crate::domain::expense::{ExpenseId, ExpenseRequest, ExpenseStatus};
use crate::domain::rule::{ApprovalRule, ApprovalRuleId};
use crate::domain::user::{CompanyId, DirectoryUser, UserId};
use crate::errors::RepositoryError;

#[async_trait]
pub trait ExpenseRepository: Send + Sync {
    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<ExpenseRequest>, RepositoryError>;

    async fn list_by_status(
        &self,
        status: ExpenseStatus,
    ) -> Result<Vec<ExpenseRequest>, RepositoryError>;

    /// Persists `expense` if the stored version still equals `expense.version`, then returns the
    /// saved copy with its version bumped. A stale write fails with `RepositoryError::Conflict`.
    async fn save(&self, expense: ExpenseRequest) -> Result<ExpenseRequest, RepositoryError>;
}

#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn find_by_id(&self, id: &ApprovalRuleId)
        -> Result<Option<ApprovalRule>, RepositoryError>;

    /// Rules in creation order.
    async fn list_for_company(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<ApprovalRule>, RepositoryError>;

    async fn save(&self, rule: ApprovalRule) -> Result<(), RepositoryError>;
}

/// Write-once action log: no update, no delete.
#[async_trait]
pub trait ApprovalActionRepository: Send + Sync {
    /// Appending a record whose id is already stored with the same decision is a no-op, so a
    /// decision cycle that failed after its append can be re-run. The same id with a different
    /// decision fails with `RepositoryError::Conflict`.
    async fn append(&self, record: ApprovalActionRecord) -> Result<(), RepositoryError>;

    async fn list_for_expense(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<Vec<ApprovalActionRecord>, RepositoryError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, id: &UserId) -> Result<Option<DirectoryUser>, RepositoryError>;

    async fn find_company_admin(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<UserId>, RepositoryError>;
}
