use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::expense::ExpenseId;
use crate::domain::user::UserId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalActionId(pub String);

impl ApprovalActionId {
    /// Each approver decides an expense at most once, so the pair names the action.
    pub fn for_decision(expense_id: &ExpenseId, approver_id: &UserId) -> Self {
        Self(format!("{}:{}", expense_id.0, approver_id.0))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStepStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }

    pub fn step_status(&self) -> ApprovalStepStatus {
        match self {
            Self::Approve => ApprovalStepStatus::Approved,
            Self::Reject => ApprovalStepStatus::Rejected,
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" | "approved" => Ok(Self::Approve),
            "reject" | "rejected" => Ok(Self::Reject),
            other => Err(DomainError::validation(format!(
                "unsupported decision `{other}` (expected approve|reject)"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverStep {
    pub approver_id: UserId,
    pub status: ApprovalStepStatus,
    pub comment: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub escalated: bool,
}

impl ApproverStep {
    pub fn pending(approver_id: UserId) -> Self {
        Self {
            approver_id,
            status: ApprovalStepStatus::Pending,
            comment: None,
            decided_at: None,
            escalated: false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStepStatus::Pending
    }

    /// Moves a pending step to its decided status. Steps are decided at most once.
    pub fn decide(
        &mut self,
        decision: Decision,
        comment: Option<String>,
        decided_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.is_pending() {
            return Err(DomainError::validation(format!(
                "approver `{}` already {} this expense",
                self.approver_id,
                self.status.as_str()
            )));
        }

        self.status = decision.step_status();
        self.comment = comment;
        self.decided_at = Some(decided_at);
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepCounts {
    pub total: usize,
    pub approved: usize,
    pub rejected: usize,
}

/// Per-expense approval progress. Created once at submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverState {
    pub approvers: Vec<ApproverStep>,
    pub sequence_index: usize,
}

impl ApproverState {
    /// Every step starts pending with the cursor on the first approver.
    pub fn initialize(approver_ids: Vec<UserId>) -> Result<Self, DomainError> {
        let state = Self {
            approvers: approver_ids.into_iter().map(ApproverStep::pending).collect(),
            sequence_index: 0,
        };
        state.check_invariants()?;
        Ok(state)
    }

    pub fn len(&self) -> usize {
        self.approvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.approvers.is_empty()
    }

    pub fn position(&self, approver_id: &UserId) -> Option<usize> {
        self.approvers.iter().position(|step| &step.approver_id == approver_id)
    }

    pub fn step(&self, approver_id: &UserId) -> Option<&ApproverStep> {
        self.approvers.iter().find(|step| &step.approver_id == approver_id)
    }

    pub fn step_mut(&mut self, approver_id: &UserId) -> Option<&mut ApproverStep> {
        self.approvers.iter_mut().find(|step| &step.approver_id == approver_id)
    }

    /// The step at the sequential cursor; `None` once every step has been passed.
    pub fn current(&self) -> Option<&ApproverStep> {
        self.approvers.get(self.sequence_index)
    }

    pub fn is_sequence_complete(&self) -> bool {
        self.sequence_index == self.approvers.len()
    }

    pub fn advance(&mut self) {
        self.sequence_index = (self.sequence_index + 1).min(self.approvers.len());
    }

    pub fn counts(&self) -> StepCounts {
        self.approvers.iter().fold(
            StepCounts { total: self.approvers.len(), ..StepCounts::default() },
            |mut counts, step| {
                match step.status {
                    ApprovalStepStatus::Approved => counts.approved += 1,
                    ApprovalStepStatus::Rejected => counts.rejected += 1,
                    ApprovalStepStatus::Pending => {}
                }
                counts
            },
        )
    }

    pub fn check_invariants(&self) -> Result<(), DomainError> {
        let mut seen = HashSet::with_capacity(self.approvers.len());
        for step in &self.approvers {
            if !seen.insert(&step.approver_id) {
                return Err(DomainError::invariant(format!(
                    "duplicate approver `{}` in approver state",
                    step.approver_id
                )));
            }
        }

        if self.sequence_index > self.approvers.len() {
            return Err(DomainError::invariant(format!(
                "sequence index {} is beyond {} approvers",
                self.sequence_index,
                self.approvers.len()
            )));
        }

        Ok(())
    }
}

/// Audit entry for one approval action. Never updated after it is written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalActionRecord {
    pub id: ApprovalActionId,
    pub expense_id: ExpenseId,
    pub approver_id: UserId,
    pub decision: Decision,
    pub comment: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ApprovalActionRecord {
    /// True when `other` records the same approver deciding the same way on the same expense.
    pub fn same_decision(&self, other: &ApprovalActionRecord) -> bool {
        self.expense_id == other.expense_id
            && self.approver_id == other.approver_id
            && self.decision == other.decision
    }
}

/// Append-only collection of action records: no removal, no in-place edits.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApprovalActionLog {
    records: Vec<ApprovalActionRecord>,
}

impl ApprovalActionLog {
    pub fn append(&mut self, record: ApprovalActionRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[ApprovalActionRecord] {
        &self.records
    }

    pub fn for_expense<'a>(
        &'a self,
        expense_id: &'a ExpenseId,
    ) -> impl Iterator<Item = &'a ApprovalActionRecord> + 'a {
        self.records.iter().filter(move |record| &record.expense_id == expense_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
