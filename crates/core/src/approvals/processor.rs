use crate::approvals::evaluator::{
    Evaluation, OutcomeEvaluator, OutcomeReason, ThresholdTally, Verdict,
};
use crate::domain::approval::{ApprovalStepStatus, ApproverState};
use crate::domain::rule::{ApprovalRule, ApprovalTopology, RejectionFinalization};
use crate::domain::user::UserId;
use crate::errors::DomainError;

/// Topology-specific preparation of the approver state before the shared evaluator runs.
pub trait TopologyProcessor: Send + Sync {
    fn topology(&self) -> ApprovalTopology;

    /// Called after `decided_by`'s step has been updated with the new decision.
    fn process(
        &self,
        state: &mut ApproverState,
        rule: &ApprovalRule,
        decided_by: &UserId,
    ) -> Result<Evaluation, DomainError>;
}

pub fn processor_for(topology: ApprovalTopology) -> &'static dyn TopologyProcessor {
    match topology {
        ApprovalTopology::Sequential => &SequentialProcessor,
        ApprovalTopology::Parallel => &ParallelProcessor,
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SequentialProcessor;

impl TopologyProcessor for SequentialProcessor {
    fn topology(&self) -> ApprovalTopology {
        ApprovalTopology::Sequential
    }

    fn process(
        &self,
        state: &mut ApproverState,
        rule: &ApprovalRule,
        decided_by: &UserId,
    ) -> Result<Evaluation, DomainError> {
        state.check_invariants()?;
        let Some(current) = state.current() else {
            return Err(DomainError::invariant(
                "sequential cursor is past the last approver of a pending expense",
            ));
        };
        if &current.approver_id != decided_by {
            return Err(DomainError::invariant(format!(
                "decision by `{decided_by}` does not match the approver at the cursor `{}`",
                current.approver_id
            )));
        }

        match current.status {
            ApprovalStepStatus::Approved => state.advance(),
            ApprovalStepStatus::Rejected => {
                let terminal = match rule.rejection_finalization {
                    RejectionFinalization::Immediate => true,
                    RejectionFinalization::PrivilegedOnly => rule.is_specific_approver(decided_by),
                };
                if terminal {
                    let reason = if rule.is_required(decided_by) {
                        OutcomeReason::RequiredApproverRejected
                    } else {
                        OutcomeReason::SequentialRejection
                    };
                    return Ok(Evaluation {
                        verdict: Verdict::Rejected,
                        reason,
                        tally: ThresholdTally::of(state, rule),
                    });
                }
                state.advance();
            }
            ApprovalStepStatus::Pending => {
                return Err(DomainError::invariant(format!(
                    "step of `{decided_by}` is still pending after its decision was recorded"
                )));
            }
        }

        OutcomeEvaluator.evaluate(state, rule)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ParallelProcessor;

impl TopologyProcessor for ParallelProcessor {
    fn topology(&self) -> ApprovalTopology {
        ApprovalTopology::Parallel
    }

    fn process(
        &self,
        state: &mut ApproverState,
        rule: &ApprovalRule,
        decided_by: &UserId,
    ) -> Result<Evaluation, DomainError> {
        if state.step(decided_by).is_none() {
            return Err(DomainError::invariant(format!(
                "approver `{decided_by}` is not part of the approver state"
            )));
        }
        OutcomeEvaluator.evaluate(state, rule)
    }
}
