use std::collections::HashSet;

use tracing::warn;

use crate::config::AugmentationMode;
use crate::domain::rule::ApproverToken;
use crate::domain::user::{DirectoryUser, UserId};

/// Policy applied after the rule's sequence has been resolved to concrete approvers.
pub trait ApproverAugmentation: Send + Sync {
    fn mode(&self) -> AugmentationMode;
    fn augment(&self, resolved: Vec<UserId>, company_admin: Option<&UserId>) -> Vec<UserId>;
}

/// Approvers are exactly the resolved sequence.
#[derive(Clone, Copy, Debug, Default)]
pub struct SequenceOnly;

impl ApproverAugmentation for SequenceOnly {
    fn mode(&self) -> AugmentationMode {
        AugmentationMode::SequenceOnly
    }

    fn augment(&self, resolved: Vec<UserId>, _company_admin: Option<&UserId>) -> Vec<UserId> {
        resolved
    }
}

/// The company admin closes every workflow as an implicit final approver.
#[derive(Clone, Copy, Debug, Default)]
pub struct AppendCompanyAdmin;

impl ApproverAugmentation for AppendCompanyAdmin {
    fn mode(&self) -> AugmentationMode {
        AugmentationMode::AppendCompanyAdmin
    }

    fn augment(&self, mut resolved: Vec<UserId>, company_admin: Option<&UserId>) -> Vec<UserId> {
        if let Some(admin) = company_admin {
            if !resolved.contains(admin) {
                resolved.push(admin.clone());
            }
        }
        resolved
    }
}

/// Everything the builder needs to know about the person asking for approval.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequesterContext {
    pub requester: DirectoryUser,
    pub company_admin: Option<UserId>,
}

pub struct ApproverListBuilder {
    augmentation: Box<dyn ApproverAugmentation>,
}

impl Default for ApproverListBuilder {
    fn default() -> Self {
        Self::new(Box::new(SequenceOnly))
    }
}

impl std::fmt::Debug for ApproverListBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApproverListBuilder")
            .field("augmentation", &self.augmentation.mode())
            .finish()
    }
}

impl ApproverListBuilder {
    pub fn new(augmentation: Box<dyn ApproverAugmentation>) -> Self {
        Self { augmentation }
    }

    pub fn for_mode(mode: AugmentationMode) -> Self {
        match mode {
            AugmentationMode::SequenceOnly => Self::new(Box::new(SequenceOnly)),
            AugmentationMode::AppendCompanyAdmin => Self::new(Box::new(AppendCompanyAdmin)),
        }
    }

    pub fn mode(&self) -> AugmentationMode {
        self.augmentation.mode()
    }

    /// Resolves the symbolic sequence into distinct approvers in first-occurrence order.
    pub fn build(&self, sequence: &[ApproverToken], context: &RequesterContext) -> Vec<UserId> {
        let resolved = sequence
            .iter()
            .filter_map(|token| match token {
                ApproverToken::User(user_id) => Some(user_id.clone()),
                ApproverToken::Manager => {
                    let manager = context
                        .requester
                        .manager_id
                        .clone()
                        .or_else(|| context.company_admin.clone());
                    if manager.is_none() {
                        warn!(
                            event_name = "approval.resolver.manager_unresolved",
                            requester_id = %context.requester.id,
                            company_id = %context.requester.company_id.0,
                            "requester has no manager and company has no admin; dropping manager token"
                        );
                    }
                    manager
                }
            })
            .collect();

        let augmented = self
            .augmentation
            .augment(dedup_preserving_order(resolved), context.company_admin.as_ref());
        dedup_preserving_order(augmented)
    }
}

fn dedup_preserving_order(approvers: Vec<UserId>) -> Vec<UserId> {
    let mut seen = HashSet::with_capacity(approvers.len());
    approvers.into_iter().filter(|approver| seen.insert(approver.clone())).collect()
}
