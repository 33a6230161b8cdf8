use chrono::{DateTime, Utc};

use crate::approvals::evaluator::Evaluation;
use crate::approvals::processor::processor_for;
use crate::domain::approval::{ApprovalActionId, ApprovalActionRecord, Decision};
use crate::domain::expense::ExpenseRequest;
use crate::domain::rule::ApprovalRule;
use crate::domain::user::UserId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedDecision {
    pub record: ApprovalActionRecord,
    pub evaluation: Evaluation,
}

/// Applies one approval action to an expense held in memory.
///
/// On error the expense is left exactly as it was passed in.
#[derive(Clone, Copy, Debug, Default)]
pub struct DecisionRecorder;

impl DecisionRecorder {
    pub fn record(
        &self,
        expense: &mut ExpenseRequest,
        rule: &ApprovalRule,
        approver_id: &UserId,
        decision: Decision,
        comment: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<RecordedDecision, DomainError> {
        let (rule_id, state) = expense.open_workflow()?;
        if rule_id != &rule.id {
            return Err(DomainError::invariant(format!(
                "expense `{}` is bound to rule `{}` but rule `{}` was supplied",
                expense.id, rule_id.0, rule.id.0
            )));
        }

        let mut state = state.clone();
        let Some(position) = state.position(approver_id) else {
            return Err(DomainError::not_found("approver", approver_id.0.clone()));
        };

        let cursor = state.sequence_index;
        let step = &mut state.approvers[position];
        if !step.is_pending() {
            return Err(DomainError::validation(format!(
                "approver `{approver_id}` already {} expense `{}`",
                step.status.as_str(),
                expense.id
            )));
        }
        if !rule.is_parallel() && position != cursor {
            return Err(DomainError::validation(format!(
                "approver `{approver_id}` is out of turn for expense `{}` (position {position}, cursor {cursor})",
                expense.id
            )));
        }

        step.decide(decision, comment.clone(), at)?;
        let record = ApprovalActionRecord {
            id: ApprovalActionId::for_decision(&expense.id, approver_id),
            expense_id: expense.id.clone(),
            approver_id: approver_id.clone(),
            decision,
            comment,
            recorded_at: at,
        };

        let evaluation = processor_for(rule.topology).process(&mut state, rule, approver_id)?;
        if evaluation.verdict.is_terminal() {
            expense.transition_to(evaluation.verdict.expense_status(), at)?;
        }
        expense.approver_state = Some(state);
        expense.updated_at = at;

        Ok(RecordedDecision { record, evaluation })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::DecisionRecorder;
    use crate::approvals::evaluator::{OutcomeReason, Verdict};
    use crate::domain::approval::{ApprovalActionId, ApprovalStepStatus, ApproverState, Decision};
    use crate::domain::expense::{ExpenseId, ExpenseRequest, ExpenseStatus};
    use crate::domain::rule::{
        ApprovalRule, ApprovalRuleId, ApprovalTopology, ApproverToken, RejectionFinalization,
        RuleScope,
    };
    use crate::domain::user::{CompanyId, UserId};
    use crate::errors::ErrorKind;

    fn user(id: &str) -> UserId {
        UserId(id.to_string())
    }

    fn rule(topology: ApprovalTopology, min_pct: i64) -> ApprovalRule {
        ApprovalRule {
            id: ApprovalRuleId("R-1".to_string()),
            company_id: CompanyId("co-1".to_string()),
            name: "default".to_string(),
            scope: RuleScope::All,
            sequence: vec![ApproverToken::Manager],
            topology,
            required_approvers: BTreeSet::new(),
            min_approval_percentage: Decimal::new(min_pct, 0),
            specific_approver_id: None,
            escalation_days: 3,
            rejection_finalization: RejectionFinalization::Immediate,
            created_at: Utc::now(),
        }
    }

    fn pending_expense(approvers: &[&str]) -> ExpenseRequest {
        let now = Utc::now();
        ExpenseRequest {
            id: ExpenseId("EXP-1".to_string()),
            company_id: CompanyId("co-1".to_string()),
            requester_id: user("u-emp"),
            description: "Conference ticket".to_string(),
            category: "travel".to_string(),
            amount: Decimal::new(49_900, 2),
            currency: "USD".to_string(),
            status: ExpenseStatus::Pending,
            approval_rule_id: Some(ApprovalRuleId("R-1".to_string())),
            approver_state: Some(
                ApproverState::initialize(approvers.iter().map(|id| user(id)).collect())
                    .expect("state"),
            ),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn records_action_and_updates_matching_step() {
        let rule = rule(ApprovalTopology::Sequential, 100);
        let mut expense = pending_expense(&["u-mgr", "u-admin"]);

        let recorded = DecisionRecorder
            .record(
                &mut expense,
                &rule,
                &user("u-mgr"),
                Decision::Approve,
                Some("looks fine".to_string()),
                Utc::now(),
            )
            .expect("recorded");

        assert_eq!(recorded.record.approver_id, user("u-mgr"));
        assert_eq!(recorded.record.id, ApprovalActionId::for_decision(&expense.id, &user("u-mgr")));
        assert_eq!(recorded.record.comment.as_deref(), Some("looks fine"));
        assert_eq!(recorded.evaluation.verdict, Verdict::Pending);
        assert_eq!(expense.status, ExpenseStatus::Pending);

        let state = expense.approver_state.as_ref().expect("state");
        assert_eq!(state.sequence_index, 1);
        let step = state.step(&user("u-mgr")).expect("step");
        assert_eq!(step.status, ApprovalStepStatus::Approved);
        assert!(step.decided_at.is_some());
    }

    #[test]
    fn terminal_verdict_moves_expense_to_final_status() {
        let rule = rule(ApprovalTopology::Sequential, 100);
        let mut expense = pending_expense(&["u-mgr"]);

        let recorded = DecisionRecorder
            .record(&mut expense, &rule, &user("u-mgr"), Decision::Approve, None, Utc::now())
            .expect("recorded");

        assert_eq!(recorded.evaluation.reason, OutcomeReason::ThresholdMet);
        assert_eq!(expense.status, ExpenseStatus::Approved);
    }

    #[test]
    fn unknown_approver_is_not_found() {
        let rule = rule(ApprovalTopology::Parallel, 50);
        let mut expense = pending_expense(&["u-1", "u-2"]);

        let error = DecisionRecorder
            .record(&mut expense, &rule, &user("u-stranger"), Decision::Approve, None, Utc::now())
            .expect_err("stranger");
        assert_eq!(error.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn out_of_turn_sequential_decision_is_validation_error_and_leaves_state_untouched() {
        let rule = rule(ApprovalTopology::Sequential, 100);
        let mut expense = pending_expense(&["u-mgr", "u-admin"]);
        let before = expense.clone();

        let error = DecisionRecorder
            .record(&mut expense, &rule, &user("u-admin"), Decision::Approve, None, Utc::now())
            .expect_err("out of turn");

        assert_eq!(error.kind(), ErrorKind::Validation);
        assert_eq!(expense, before);
    }

    #[test]
    fn deciding_twice_is_validation_error() {
        let rule = rule(ApprovalTopology::Parallel, 100);
        let mut expense = pending_expense(&["u-1", "u-2"]);

        DecisionRecorder
            .record(&mut expense, &rule, &user("u-1"), Decision::Approve, None, Utc::now())
            .expect("first");
        let error = DecisionRecorder
            .record(&mut expense, &rule, &user("u-1"), Decision::Reject, None, Utc::now())
            .expect_err("second");

        assert_eq!(error.kind(), ErrorKind::Validation);
    }

    #[test]
    fn decision_on_terminal_expense_is_invariant_violation() {
        let rule = rule(ApprovalTopology::Parallel, 50);
        let mut expense = pending_expense(&["u-1", "u-2"]);
        expense.status = ExpenseStatus::Approved;

        let error = DecisionRecorder
            .record(&mut expense, &rule, &user("u-2"), Decision::Approve, None, Utc::now())
            .expect_err("terminal");
        assert_eq!(error.kind(), ErrorKind::InvariantViolation);
    }

    #[test]
    fn mismatched_rule_is_invariant_violation() {
        let mut rule = rule(ApprovalTopology::Parallel, 50);
        rule.id = ApprovalRuleId("R-other".to_string());
        let mut expense = pending_expense(&["u-1"]);

        let error = DecisionRecorder
            .record(&mut expense, &rule, &user("u-1"), Decision::Approve, None, Utc::now())
            .expect_err("wrong rule");
        assert_eq!(error.kind(), ErrorKind::InvariantViolation);
    }
}
