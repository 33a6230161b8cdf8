use crate::domain::approval::ApproverState;
use crate::domain::user::UserId;
use crate::errors::DomainError;

/// Builds the per-expense approver state once, at submission.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApprovalStateInitializer;

impl ApprovalStateInitializer {
    pub fn initialize(&self, approvers: Vec<UserId>) -> Result<ApproverState, DomainError> {
        if approvers.is_empty() {
            return Err(DomainError::validation(
                "approval rule resolved to no approvers; nobody could decide this expense",
            ));
        }

        ApproverState::initialize(approvers)
    }
}
