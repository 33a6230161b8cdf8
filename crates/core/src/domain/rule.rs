use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::user::{CompanyId, UserId};
use crate::errors::DomainError;

const MANAGER_TOKEN: &str = "manager";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalRuleId(pub String);

/// One entry of a rule's approver sequence.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ApproverToken {
    /// Resolved against the requester's manager at submission time.
    Manager,
    User(UserId),
}

impl From<String> for ApproverToken {
    fn from(value: String) -> Self {
        if value.trim().eq_ignore_ascii_case(MANAGER_TOKEN) {
            Self::Manager
        } else {
            Self::User(UserId(value))
        }
    }
}

impl From<ApproverToken> for String {
    fn from(value: ApproverToken) -> Self {
        match value {
            ApproverToken::Manager => MANAGER_TOKEN.to_string(),
            ApproverToken::User(user_id) => user_id.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "category", rename_all = "snake_case")]
pub enum RuleScope {
    All,
    Category(String),
}

impl RuleScope {
    pub fn matches_category(&self, category: &str) -> bool {
        match self {
            Self::All => false,
            Self::Category(scope) => scope.trim().eq_ignore_ascii_case(category.trim()),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalTopology {
    #[default]
    Sequential,
    Parallel,
}

impl ApprovalTopology {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sequential" => Some(Self::Sequential),
            "parallel" => Some(Self::Parallel),
            _ => None,
        }
    }
}

/// Who may end a sequential workflow with a rejection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionFinalization {
    /// A rejection by the approver at the cursor rejects the request outright.
    #[default]
    Immediate,
    /// Only the rule's specific approver rejects outright; any other rejection advances the
    /// cursor and leaves the verdict to the outcome evaluator.
    PrivilegedOnly,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub id: ApprovalRuleId,
    pub company_id: CompanyId,
    pub name: String,
    pub scope: RuleScope,
    pub sequence: Vec<ApproverToken>,
    pub topology: ApprovalTopology,
    pub required_approvers: BTreeSet<UserId>,
    pub min_approval_percentage: Decimal,
    pub specific_approver_id: Option<UserId>,
    pub escalation_days: u32,
    #[serde(default)]
    pub rejection_finalization: RejectionFinalization,
    pub created_at: DateTime<Utc>,
}

impl ApprovalRule {
    pub fn is_parallel(&self) -> bool {
        self.topology == ApprovalTopology::Parallel
    }

    pub fn is_required(&self, approver_id: &UserId) -> bool {
        self.required_approvers.contains(approver_id)
    }

    pub fn is_specific_approver(&self, approver_id: &UserId) -> bool {
        self.specific_approver_id.as_ref() == Some(approver_id)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.sequence.is_empty() {
            return Err(DomainError::validation(format!(
                "approval rule `{}` has an empty approver sequence",
                self.id.0
            )));
        }

        if self.min_approval_percentage < Decimal::ZERO
            || self.min_approval_percentage > Decimal::ONE_HUNDRED
        {
            return Err(DomainError::validation(format!(
                "approval rule `{}` min_approval_percentage {} must be in range 0..=100",
                self.id.0, self.min_approval_percentage
            )));
        }

        Ok(())
    }
}

/// Picks the rule for an expense category: a rule scoped to the category wins over the
/// first rule scoped to all categories.
pub fn select_rule<'a>(rules: &'a [ApprovalRule], category: &str) -> Option<&'a ApprovalRule> {
    rules
        .iter()
        .find(|rule| rule.scope.matches_category(category))
        .or_else(|| rules.iter().find(|rule| rule.scope == RuleScope::All))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{
        select_rule, ApprovalRule, ApprovalRuleId, ApprovalTopology, ApproverToken,
        RejectionFinalization, RuleScope,
    };
    use crate::domain::user::{CompanyId, UserId};

    fn rule(id: &str, scope: RuleScope) -> ApprovalRule {
        ApprovalRule {
            id: ApprovalRuleId(id.to_string()),
            company_id: CompanyId("co-1".to_string()),
            name: id.to_string(),
            scope,
            sequence: vec![ApproverToken::Manager],
            topology: ApprovalTopology::Sequential,
            required_approvers: BTreeSet::new(),
            min_approval_percentage: Decimal::ONE_HUNDRED,
            specific_approver_id: None,
            escalation_days: 3,
            rejection_finalization: RejectionFinalization::Immediate,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn manager_token_round_trips_through_plain_strings() {
        let tokens: Vec<ApproverToken> =
            serde_json::from_str(r#"["manager", "u-cfo", "Manager"]"#).expect("tokens parse");
        assert_eq!(
            tokens,
            vec![
                ApproverToken::Manager,
                ApproverToken::User(UserId("u-cfo".to_string())),
                ApproverToken::Manager,
            ]
        );

        let encoded = serde_json::to_string(&tokens[..2]).expect("tokens encode");
        assert_eq!(encoded, r#"["manager","u-cfo"]"#);
    }

    #[test]
    fn category_rule_wins_over_catch_all() {
        let rules = vec![
            rule("R-all", RuleScope::All),
            rule("R-travel", RuleScope::Category("Travel".to_string())),
        ];

        let selected = select_rule(&rules, "travel").expect("a rule applies");
        assert_eq!(selected.id.0, "R-travel");

        let fallback = select_rule(&rules, "meals").expect("catch-all applies");
        assert_eq!(fallback.id.0, "R-all");
    }

    #[test]
    fn no_rule_applies_without_catch_all() {
        let rules = vec![rule("R-travel", RuleScope::Category("travel".to_string()))];
        assert!(select_rule(&rules, "meals").is_none());
    }

    #[test]
    fn validate_rejects_empty_sequence_and_out_of_range_threshold() {
        let mut empty = rule("R-1", RuleScope::All);
        empty.sequence.clear();
        assert!(empty.validate().is_err());

        let mut too_high = rule("R-2", RuleScope::All);
        too_high.min_approval_percentage = Decimal::new(101, 0);
        assert!(too_high.validate().is_err());

        assert!(rule("R-3", RuleScope::All).validate().is_ok());
    }
}
