use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalStepStatus, ApproverState};
use crate::domain::expense::ExpenseStatus;
use crate::domain::rule::ApprovalRule;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    Rejected,
    Pending,
}

impl Verdict {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn expense_status(&self) -> ExpenseStatus {
        match self {
            Self::Approved => ExpenseStatus::Approved,
            Self::Rejected => ExpenseStatus::Rejected,
            Self::Pending => ExpenseStatus::Pending,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeReason {
    SpecificApproverApproved,
    RequiredApproverRejected,
    SequentialRejection,
    ThresholdMet,
    ThresholdUnreachable,
    AwaitingDecisions,
}

impl OutcomeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpecificApproverApproved => "specific_approver_approved",
            Self::RequiredApproverRejected => "required_approver_rejected",
            Self::SequentialRejection => "sequential_rejection",
            Self::ThresholdMet => "threshold_met",
            Self::ThresholdUnreachable => "threshold_unreachable",
            Self::AwaitingDecisions => "awaiting_decisions",
        }
    }
}

/// Threshold arithmetic over the current approver steps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdTally {
    pub total: usize,
    pub approved: usize,
    pub rejected: usize,
    pub min_approval_percentage: Decimal,
}

impl ThresholdTally {
    pub fn of(state: &ApproverState, rule: &ApprovalRule) -> Self {
        let counts = state.counts();
        Self {
            total: counts.total,
            approved: counts.approved,
            rejected: counts.rejected,
            min_approval_percentage: rule.min_approval_percentage,
        }
    }

    pub fn approval_percentage(&self) -> Decimal {
        percentage(self.approved, self.total)
    }

    /// Best case: every step still pending approves.
    pub fn max_possible_percentage(&self) -> Decimal {
        percentage(self.total.saturating_sub(self.rejected), self.total)
    }

    // Cross-multiplied so that e.g. 2 of 3 never rounds up to 67%.
    pub fn is_met(&self) -> bool {
        let required = self.min_approval_percentage * Decimal::from(self.total);
        Decimal::from(self.approved * 100) >= required
    }

    pub fn is_unreachable(&self) -> bool {
        let reachable = self.total.saturating_sub(self.rejected);
        let required = self.min_approval_percentage * Decimal::from(self.total);
        Decimal::from(reachable * 100) < required
    }
}

fn percentage(count: usize, total: usize) -> Decimal {
    if total == 0 {
        return Decimal::ZERO;
    }
    Decimal::from(count * 100) / Decimal::from(total)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub reason: OutcomeReason,
    pub tally: ThresholdTally,
}

impl Evaluation {
    pub fn message(&self) -> &'static str {
        match self.reason {
            OutcomeReason::SpecificApproverApproved => "Expense approved (specific approver)",
            OutcomeReason::RequiredApproverRejected => {
                "Expense rejected (required approver rejected)"
            }
            OutcomeReason::SequentialRejection => "Expense rejected (sequential rejection)",
            OutcomeReason::ThresholdMet => "Expense approved (threshold met)",
            OutcomeReason::ThresholdUnreachable => "Expense rejected (threshold unreachable)",
            OutcomeReason::AwaitingDecisions => "Action recorded",
        }
    }
}

/// The finalization algorithm shared by both topologies. Pure: no I/O, no mutation.
#[derive(Clone, Copy, Debug, Default)]
pub struct OutcomeEvaluator;

impl OutcomeEvaluator {
    pub fn evaluate(
        &self,
        state: &ApproverState,
        rule: &ApprovalRule,
    ) -> Result<Evaluation, DomainError> {
        state.check_invariants()?;
        if state.is_empty() {
            return Err(DomainError::invariant("approver state has no approvers to evaluate"));
        }

        let tally = ThresholdTally::of(state, rule);
        let conclude = |verdict, reason| Ok(Evaluation { verdict, reason, tally });

        if let Some(specific) = &rule.specific_approver_id {
            let approved = state
                .step(specific)
                .is_some_and(|step| step.status == ApprovalStepStatus::Approved);
            if approved {
                return conclude(Verdict::Approved, OutcomeReason::SpecificApproverApproved);
            }
        }

        let required_rejected = state.approvers.iter().any(|step| {
            step.status == ApprovalStepStatus::Rejected && rule.is_required(&step.approver_id)
        });
        if required_rejected {
            return conclude(Verdict::Rejected, OutcomeReason::RequiredApproverRejected);
        }

        // Sequential fast path: walking off the end with everyone approved is 100%.
        if !rule.is_parallel() && state.is_sequence_complete() && tally.approved == tally.total {
            return conclude(Verdict::Approved, OutcomeReason::ThresholdMet);
        }

        if tally.is_met() {
            return conclude(Verdict::Approved, OutcomeReason::ThresholdMet);
        }

        if tally.is_unreachable() {
            return conclude(Verdict::Rejected, OutcomeReason::ThresholdUnreachable);
        }

        conclude(Verdict::Pending, OutcomeReason::AwaitingDecisions)
    }
}
