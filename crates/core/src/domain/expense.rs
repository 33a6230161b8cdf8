use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::approval::ApproverState;
use crate::domain::rule::ApprovalRuleId;
use crate::domain::user::{CompanyId, UserId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExpenseId(pub String);

impl std::fmt::Display for ExpenseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
}

impl ExpenseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseRequest {
    pub id: ExpenseId,
    pub company_id: CompanyId,
    pub requester_id: UserId,
    pub description: String,
    pub category: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: ExpenseStatus,
    pub approval_rule_id: Option<ApprovalRuleId>,
    pub approver_state: Option<ApproverState>,
    /// Storage revision, bumped by repositories on every successful save.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExpenseRequest {
    pub fn can_transition_to(&self, next: ExpenseStatus) -> bool {
        matches!(
            (self.status, next),
            (ExpenseStatus::Draft, ExpenseStatus::Pending)
                | (ExpenseStatus::Pending, ExpenseStatus::Approved)
                | (ExpenseStatus::Pending, ExpenseStatus::Rejected)
        )
    }

    pub fn transition_to(
        &mut self,
        next: ExpenseStatus,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            self.updated_at = at;
            return Ok(());
        }

        Err(DomainError::InvalidExpenseTransition { from: self.status, to: next })
    }

    /// Draft -> Pending. The rule and approver state are fixed from here on.
    pub fn submit(
        &mut self,
        rule_id: ApprovalRuleId,
        state: ApproverState,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.status != ExpenseStatus::Draft {
            return Err(DomainError::validation(format!(
                "expense `{}` is {} and cannot be submitted",
                self.id,
                self.status.as_str()
            )));
        }

        self.transition_to(ExpenseStatus::Pending, at)?;
        self.approval_rule_id = Some(rule_id);
        self.approver_state = Some(state);
        Ok(())
    }

    /// Rule id and approver state of a request that is open for decisions.
    pub fn open_workflow(&self) -> Result<(&ApprovalRuleId, &ApproverState), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::invariant(format!(
                "expense `{}` is already {} and accepts no further approval changes",
                self.id,
                self.status.as_str()
            )));
        }

        if self.status != ExpenseStatus::Pending {
            return Err(DomainError::validation(format!(
                "expense `{}` has not been submitted for approval",
                self.id
            )));
        }

        match (&self.approval_rule_id, &self.approver_state) {
            (Some(rule_id), Some(state)) => Ok((rule_id, state)),
            _ => Err(DomainError::invariant(format!(
                "pending expense `{}` is missing its approval rule or approver state",
                self.id
            ))),
        }
    }
}
