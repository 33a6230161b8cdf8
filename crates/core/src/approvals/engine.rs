use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::approvals::escalation::EscalationScanner;
use crate::approvals::evaluator::{OutcomeReason, Verdict};
use crate::approvals::initializer::ApprovalStateInitializer;
use crate::approvals::ports::{
    ApprovalActionRepository, ExpenseRepository, RuleRepository, UserDirectory,
};
use crate::approvals::recorder::DecisionRecorder;
use crate::approvals::resolver::{ApproverListBuilder, RequesterContext};
use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink};
use crate::config::AugmentationMode;
use crate::domain::approval::{ApprovalActionId, ApprovalActionRecord, ApproverState, Decision};
use crate::domain::expense::{ExpenseId, ExpenseRequest, ExpenseStatus};
use crate::domain::rule::{select_rule, ApprovalRule, ApprovalRuleId, ApprovalTopology};
use crate::domain::user::{CompanyId, UserId};
use crate::errors::{ApplicationError, DomainError, ErrorKind};

#[derive(Clone)]
pub struct ApprovalPorts {
    pub expenses: Arc<dyn ExpenseRepository>,
    pub rules: Arc<dyn RuleRepository>,
    pub actions: Arc<dyn ApprovalActionRepository>,
    pub directory: Arc<dyn UserDirectory>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub expense_id: ExpenseId,
    pub action_id: ApprovalActionId,
    pub status: ExpenseStatus,
    pub verdict: Verdict,
    pub reason: OutcomeReason,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationSweepReport {
    pub scanned: usize,
    pub escalated_expenses: usize,
    pub newly_escalated_steps: usize,
    pub failed: usize,
}

/// One async mutex per expense id, created on demand and dropped once idle.
#[derive(Default)]
struct ExpenseLocks {
    inner: Mutex<HashMap<ExpenseId, Arc<AsyncMutex<()>>>>,
}

impl ExpenseLocks {
    async fn acquire(&self, expense_id: &ExpenseId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = match self.inner.lock() {
                Ok(locks) => locks,
                Err(poisoned) => poisoned.into_inner(),
            };
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(expense_id.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Runs submissions, decisions and escalation sweeps against the injected ports.
///
/// Every read-modify-write of an expense happens while holding that expense's lock, so two
/// decisions (or a decision and a sweep) on the same expense never interleave.
pub struct ApprovalEngine {
    ports: ApprovalPorts,
    audit: Arc<dyn AuditSink>,
    builder: ApproverListBuilder,
    locks: ExpenseLocks,
}

impl ApprovalEngine {
    pub fn new(ports: ApprovalPorts) -> Self {
        Self {
            ports,
            audit: Arc::new(NoopAuditSink),
            builder: ApproverListBuilder::default(),
            locks: ExpenseLocks::default(),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_augmentation(mut self, mode: AugmentationMode) -> Self {
        self.builder = ApproverListBuilder::for_mode(mode);
        self
    }

    pub fn augmentation(&self) -> AugmentationMode {
        self.builder.mode()
    }

    /// Resolves the rule's approvers for this expense's requester and builds the initial state.
    pub async fn initialize_approval(
        &self,
        expense: &ExpenseRequest,
        rule: &ApprovalRule,
    ) -> Result<ApproverState, ApplicationError> {
        let requester = self
            .ports
            .directory
            .find_user(&expense.requester_id)
            .await?
            .ok_or_else(|| DomainError::not_found("requester", expense.requester_id.0.clone()))?;
        let company_admin = self.ports.directory.find_company_admin(&requester.company_id).await?;

        let context = RequesterContext { requester, company_admin };
        let approvers = self.builder.build(&rule.sequence, &context);
        Ok(ApprovalStateInitializer.initialize(approvers)?)
    }

    pub async fn submit_expense(
        &self,
        expense_id: &ExpenseId,
        now: DateTime<Utc>,
    ) -> Result<ExpenseRequest, ApplicationError> {
        let correlation_id = new_correlation_id();
        let _guard = self.locks.acquire(expense_id).await;

        let mut expense = self.load_expense(expense_id).await?;
        if expense.status != ExpenseStatus::Draft {
            return Err(DomainError::validation(format!(
                "expense `{expense_id}` is {} and cannot be submitted",
                expense.status.as_str()
            ))
            .into());
        }

        let rules = self.ports.rules.list_for_company(&expense.company_id).await?;
        let rule = select_rule(&rules, &expense.category).ok_or_else(|| {
            DomainError::not_found("approval rule", format!("category:{}", expense.category))
        })?;
        rule.validate()?;

        let state = self.initialize_approval(&expense, rule).await?;
        let approver_count = state.len();
        expense.submit(rule.id.clone(), state, now)?;
        let saved = self.ports.expenses.save(expense).await?;

        info!(
            event_name = "approval.expense.submitted",
            correlation_id = %correlation_id,
            expense_id = %expense_id,
            rule_id = %rule.id.0,
            topology = rule.topology.as_str(),
            approver_count,
            "expense submitted for approval"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(expense_id.clone()),
                &correlation_id,
                "approval.expense.submitted",
                AuditCategory::Submission,
                saved.requester_id.0.clone(),
                AuditOutcome::Success,
            )
            .at(now)
            .with_metadata("rule_id", rule.id.0.clone())
            .with_metadata("approver_count", approver_count.to_string()),
        );

        Ok(saved)
    }

    /// Records one approver's decision and re-evaluates the expense outcome.
    pub async fn record_decision(
        &self,
        expense_id: &ExpenseId,
        approver_id: &UserId,
        decision: &str,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<DecisionOutcome, ApplicationError> {
        let decision: Decision = decision.parse()?;
        let correlation_id = new_correlation_id();
        let _guard = self.locks.acquire(expense_id).await;

        let mut expense = self.load_expense(expense_id).await?;
        let rule_id = expense
            .open_workflow()
            .map_err(|error| self.log_domain_error(expense_id, &correlation_id, error))?
            .0
            .clone();
        let rule = self.load_rule(&rule_id).await?;

        let recorded = DecisionRecorder
            .record(&mut expense, &rule, approver_id, decision, comment, now)
            .map_err(|error| self.log_domain_error(expense_id, &correlation_id, error))?;

        // The action lands first. Its id is stable per approver, so a cycle whose save fails
        // can be re-run and the second append is a no-op.
        let action_id = recorded.record.id.clone();
        self.ports.actions.append(recorded.record).await?;
        let saved = self.ports.expenses.save(expense).await?;

        let evaluation = recorded.evaluation;
        info!(
            event_name = "approval.decision.recorded",
            correlation_id = %correlation_id,
            expense_id = %expense_id,
            approver_id = %approver_id,
            decision = decision.as_str(),
            verdict = ?evaluation.verdict,
            approved = evaluation.tally.approved,
            rejected = evaluation.tally.rejected,
            total = evaluation.tally.total,
            "approval decision recorded"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(expense_id.clone()),
                &correlation_id,
                "approval.decision.recorded",
                AuditCategory::Decision,
                approver_id.0.clone(),
                AuditOutcome::Success,
            )
            .at(now)
            .with_metadata("decision", decision.as_str())
            .with_metadata("action_id", action_id.0.clone()),
        );

        if evaluation.verdict.is_terminal() {
            info!(
                event_name = "approval.expense.finalized",
                correlation_id = %correlation_id,
                expense_id = %expense_id,
                status = saved.status.as_str(),
                reason = evaluation.reason.as_str(),
                "expense reached a final approval status"
            );
            let outcome = match evaluation.verdict {
                Verdict::Rejected => AuditOutcome::Rejected,
                Verdict::Approved | Verdict::Pending => AuditOutcome::Success,
            };
            self.audit.emit(
                AuditEvent::new(
                    Some(expense_id.clone()),
                    &correlation_id,
                    "approval.expense.finalized",
                    AuditCategory::Finalization,
                    approver_id.0.clone(),
                    outcome,
                )
                .at(now)
                .with_metadata("status", saved.status.as_str())
                .with_metadata("reason", evaluation.reason.as_str()),
            );
        }

        Ok(DecisionOutcome {
            expense_id: expense_id.clone(),
            action_id,
            status: saved.status,
            verdict: evaluation.verdict,
            reason: evaluation.reason,
            message: evaluation.message().to_string(),
        })
    }

    /// Flags overdue pending approvers on every pending expense.
    ///
    /// A failure on one expense is logged and counted; the sweep carries on with the rest.
    pub async fn run_escalation_sweep(
        &self,
        now: DateTime<Utc>,
    ) -> Result<EscalationSweepReport, ApplicationError> {
        let correlation_id = new_correlation_id();
        let candidates = self.ports.expenses.list_by_status(ExpenseStatus::Pending).await?;
        let mut rules: HashMap<ApprovalRuleId, ApprovalRule> = HashMap::new();
        let mut report = EscalationSweepReport::default();

        for candidate in candidates {
            let expense_id = candidate.id;
            match self.escalate_one(&expense_id, &mut rules, now, &correlation_id).await {
                Ok(Some(flagged)) => {
                    report.scanned += 1;
                    if flagged > 0 {
                        report.escalated_expenses += 1;
                        report.newly_escalated_steps += flagged;
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    report.scanned += 1;
                    report.failed += 1;
                    warn!(
                        event_name = "approval.escalation.expense_failed",
                        correlation_id = %correlation_id,
                        expense_id = %expense_id,
                        error = %error,
                        "escalation skipped for expense"
                    );
                }
            }
        }

        info!(
            event_name = "approval.escalation.sweep_completed",
            correlation_id = %correlation_id,
            scanned = report.scanned,
            escalated_expenses = report.escalated_expenses,
            newly_escalated_steps = report.newly_escalated_steps,
            failed = report.failed,
            "escalation sweep completed"
        );

        Ok(report)
    }

    // `None` when the expense vanished or left Pending between listing and locking.
    async fn escalate_one(
        &self,
        expense_id: &ExpenseId,
        rules: &mut HashMap<ApprovalRuleId, ApprovalRule>,
        now: DateTime<Utc>,
        correlation_id: &str,
    ) -> Result<Option<usize>, ApplicationError> {
        let _guard = self.locks.acquire(expense_id).await;

        let Some(mut expense) = self.ports.expenses.find_by_id(expense_id).await? else {
            return Ok(None);
        };
        if expense.status != ExpenseStatus::Pending {
            return Ok(None);
        }

        let rule_id = expense
            .open_workflow()
            .map_err(|error| self.log_domain_error(expense_id, correlation_id, error))?
            .0
            .clone();
        if !rules.contains_key(&rule_id) {
            let rule = self.load_rule(&rule_id).await?;
            rules.insert(rule_id.clone(), rule);
        }
        let Some(rule) = rules.get(&rule_id) else {
            return Err(DomainError::not_found("approval rule", rule_id.0).into());
        };

        let flagged = EscalationScanner
            .scan(&mut expense, rule, now)
            .map_err(|error| self.log_domain_error(expense_id, correlation_id, error))?;
        if flagged == 0 {
            return Ok(Some(0));
        }

        self.ports.expenses.save(expense).await?;
        info!(
            event_name = "approval.escalation.flagged",
            correlation_id = %correlation_id,
            expense_id = %expense_id,
            flagged,
            escalation_days = rule.escalation_days,
            "pending approvers escalated"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(expense_id.clone()),
                correlation_id,
                "approval.escalation.flagged",
                AuditCategory::Escalation,
                "escalation-scanner",
                AuditOutcome::Success,
            )
            .at(now)
            .with_metadata("flagged_steps", flagged.to_string()),
        );

        Ok(Some(flagged))
    }

    /// Pending expenses of `company_id` that are currently waiting on `approver_id`.
    pub async fn pending_for_approver(
        &self,
        approver_id: &UserId,
        company_id: &CompanyId,
    ) -> Result<Vec<ExpenseRequest>, ApplicationError> {
        let pending = self.ports.expenses.list_by_status(ExpenseStatus::Pending).await?;
        let mut topologies: HashMap<ApprovalRuleId, ApprovalTopology> = HashMap::new();
        let mut awaiting = Vec::new();

        for expense in pending.into_iter().filter(|expense| &expense.company_id == company_id) {
            let (Some(rule_id), Some(state)) = (&expense.approval_rule_id, &expense.approver_state)
            else {
                continue;
            };

            let topology = match topologies.get(rule_id).copied() {
                Some(topology) => topology,
                None => {
                    let topology = self.load_rule(rule_id).await?.topology;
                    topologies.insert(rule_id.clone(), topology);
                    topology
                }
            };

            let waiting = match topology {
                ApprovalTopology::Parallel => {
                    state.step(approver_id).is_some_and(|step| step.is_pending())
                }
                ApprovalTopology::Sequential => state
                    .current()
                    .is_some_and(|step| &step.approver_id == approver_id && step.is_pending()),
            };
            if waiting {
                awaiting.push(expense);
            }
        }

        Ok(awaiting)
    }

    pub async fn action_history(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<Vec<ApprovalActionRecord>, ApplicationError> {
        Ok(self.ports.actions.list_for_expense(expense_id).await?)
    }

    async fn load_expense(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<ExpenseRequest, ApplicationError> {
        self.ports
            .expenses
            .find_by_id(expense_id)
            .await?
            .ok_or_else(|| DomainError::not_found("expense", expense_id.0.clone()).into())
    }

    async fn load_rule(&self, rule_id: &ApprovalRuleId) -> Result<ApprovalRule, ApplicationError> {
        self.ports
            .rules
            .find_by_id(rule_id)
            .await?
            .ok_or_else(|| DomainError::not_found("approval rule", rule_id.0.clone()).into())
    }

    fn log_domain_error(
        &self,
        expense_id: &ExpenseId,
        correlation_id: &str,
        error: DomainError,
    ) -> DomainError {
        if error.kind() == ErrorKind::InvariantViolation {
            error!(
                event_name = "approval.invariant_violation",
                correlation_id = %correlation_id,
                expense_id = %expense_id,
                error = %error,
                "persisted approval state is inconsistent"
            );
        }
        error
    }
}

fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}
