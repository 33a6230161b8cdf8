pub mod engine;
pub mod escalation;
pub mod evaluator;
pub mod initializer;
pub mod ports;
pub mod processor;
pub mod recorder;
pub mod resolver;

pub use engine::{ApprovalEngine, ApprovalPorts, DecisionOutcome, EscalationSweepReport};
pub use escalation::EscalationScanner;
pub use evaluator::{Evaluation, OutcomeEvaluator, OutcomeReason, ThresholdTally, Verdict};
pub use initializer::ApprovalStateInitializer;
pub use ports::{ApprovalActionRepository, ExpenseRepository, RuleRepository, UserDirectory};
pub use processor::{processor_for, ParallelProcessor, SequentialProcessor, TopologyProcessor};
pub use recorder::{DecisionRecorder, RecordedDecision};
pub use resolver::{
    AppendCompanyAdmin, ApproverAugmentation, ApproverListBuilder, RequesterContext, SequenceOnly,
};
