use chrono::{DateTime, Utc};

use crate::domain::expense::{ExpenseRequest, ExpenseStatus};
use crate::domain::rule::ApprovalRule;
use crate::errors::DomainError;

/// Flags pending approvers once an expense has waited longer than the rule allows.
///
/// The flag is advisory: it never changes the expense status and is never cleared.
#[derive(Clone, Copy, Debug, Default)]
pub struct EscalationScanner;

impl EscalationScanner {
    /// Whole days since submission, rounded down.
    pub fn elapsed_days(expense: &ExpenseRequest, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(expense.created_at).num_days()
    }

    pub fn is_due(expense: &ExpenseRequest, rule: &ApprovalRule, now: DateTime<Utc>) -> bool {
        Self::elapsed_days(expense, now) >= i64::from(rule.escalation_days)
    }

    /// Returns how many steps were newly flagged. Draft requests are skipped.
    pub fn scan(
        &self,
        expense: &mut ExpenseRequest,
        rule: &ApprovalRule,
        now: DateTime<Utc>,
    ) -> Result<usize, DomainError> {
        if expense.status == ExpenseStatus::Draft {
            return Ok(0);
        }
        expense.open_workflow()?;

        if !Self::is_due(expense, rule, now) {
            return Ok(0);
        }

        let Some(state) = expense.approver_state.as_mut() else {
            return Ok(0);
        };
        let mut flagged = 0;
        for step in state.approvers.iter_mut().filter(|step| step.is_pending() && !step.escalated)
        {
            step.escalated = true;
            flagged += 1;
        }

        if flagged > 0 {
            expense.updated_at = now;
        }
        Ok(flagged)
    }
}
