pub mod approvals;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;

pub use approvals::{
    ApprovalEngine, ApprovalPorts, ApproverListBuilder, DecisionOutcome, DecisionRecorder,
    EscalationScanner, EscalationSweepReport, OutcomeEvaluator, Verdict,
};
pub use domain::approval::{
    ApprovalActionLog, ApprovalActionRecord, ApprovalStepStatus, ApproverState, ApproverStep,
    Decision,
};
pub use domain::expense::{ExpenseId, ExpenseRequest, ExpenseStatus};
pub use domain::rule::{ApprovalRule, ApprovalRuleId, ApprovalTopology, ApproverToken};
pub use domain::user::{CompanyId, DirectoryUser, UserId, UserRole};
pub use errors::{ApplicationError, DomainError, InterfaceError, RepositoryError};
