use std::collections::BTreeSet;
use std::str::FromStr;

use rust_decimal::Decimal;
use sqlx::Row;

use outlay_core::approvals::ports::RuleRepository;
use outlay_core::domain::rule::{
    ApprovalRule, ApprovalRuleId, ApprovalTopology, ApproverToken, RejectionFinalization,
    RuleScope,
};
use outlay_core::domain::user::{CompanyId, UserId};
use outlay_core::errors::RepositoryError;

use super::{backend, decode, parse_timestamp};
use crate::DbPool;

const RULE_COLUMNS: &str = "id, company_id, name, scope_category, sequence_json, topology,
    required_approvers_json, min_approval_percentage, specific_approver_id, escalation_days,
    rejection_finalization, created_at";

pub struct SqlRuleRepository {
    pool: DbPool,
}

impl SqlRuleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn rejection_finalization_str(value: RejectionFinalization) -> &'static str {
    match value {
        RejectionFinalization::Immediate => "immediate",
        RejectionFinalization::PrivilegedOnly => "privileged_only",
    }
}

fn parse_rejection_finalization(value: &str) -> Result<RejectionFinalization, RepositoryError> {
    match value {
        "immediate" => Ok(RejectionFinalization::Immediate),
        "privileged_only" => Ok(RejectionFinalization::PrivilegedOnly),
        other => Err(decode(format!("unknown rejection finalization `{other}`"))),
    }
}

fn row_to_rule(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalRule, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode)?;
    let company_id: String = row.try_get("company_id").map_err(decode)?;
    let name: String = row.try_get("name").map_err(decode)?;
    let scope_category: Option<String> = row.try_get("scope_category").map_err(decode)?;
    let sequence_json: String = row.try_get("sequence_json").map_err(decode)?;
    let topology_str: String = row.try_get("topology").map_err(decode)?;
    let required_json: String = row.try_get("required_approvers_json").map_err(decode)?;
    let percentage_str: String = row.try_get("min_approval_percentage").map_err(decode)?;
    let specific_approver_id: Option<String> =
        row.try_get("specific_approver_id").map_err(decode)?;
    let escalation_days: i64 = row.try_get("escalation_days").map_err(decode)?;
    let rejection_str: String = row.try_get("rejection_finalization").map_err(decode)?;
    let created_at_str: String = row.try_get("created_at").map_err(decode)?;

    let sequence: Vec<ApproverToken> = serde_json::from_str(&sequence_json)
        .map_err(|error| decode(format!("invalid sequence for rule `{id}`: {error}")))?;
    let required_approvers: BTreeSet<UserId> = serde_json::from_str(&required_json)
        .map_err(|error| decode(format!("invalid required approvers for rule `{id}`: {error}")))?;
    let topology = ApprovalTopology::parse(&topology_str)
        .ok_or_else(|| decode(format!("unknown topology `{topology_str}`")))?;
    let min_approval_percentage = Decimal::from_str(&percentage_str)
        .map_err(|error| decode(format!("invalid percentage `{percentage_str}`: {error}")))?;
    let escalation_days = u32::try_from(escalation_days)
        .map_err(|_| decode(format!("rule `{id}` has invalid escalation_days")))?;

    Ok(ApprovalRule {
        id: ApprovalRuleId(id),
        company_id: CompanyId(company_id),
        name,
        scope: scope_category.map_or(RuleScope::All, RuleScope::Category),
        sequence,
        topology,
        required_approvers,
        min_approval_percentage,
        specific_approver_id: specific_approver_id.map(UserId),
        escalation_days,
        rejection_finalization: parse_rejection_finalization(&rejection_str)?,
        created_at: parse_timestamp("created_at", &created_at_str)?,
    })
}

#[async_trait::async_trait]
impl RuleRepository for SqlRuleRepository {
    async fn find_by_id(
        &self,
        id: &ApprovalRuleId,
    ) -> Result<Option<ApprovalRule>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {RULE_COLUMNS} FROM approval_rule WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.as_ref().map(row_to_rule).transpose()
    }

    async fn list_for_company(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<ApprovalRule>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM approval_rule
             WHERE company_id = ?
             ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(&company_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(row_to_rule).collect()
    }

    async fn save(&self, rule: ApprovalRule) -> Result<(), RepositoryError> {
        let scope_category = match &rule.scope {
            RuleScope::All => None,
            RuleScope::Category(category) => Some(category.as_str()),
        };
        let sequence_json = serde_json::to_string(&rule.sequence).map_err(decode)?;
        let required_json = serde_json::to_string(&rule.required_approvers).map_err(decode)?;

        sqlx::query(
            "INSERT INTO approval_rule
                (id, company_id, name, scope_category, sequence_json, topology,
                 required_approvers_json, min_approval_percentage, specific_approver_id,
                 escalation_days, rejection_finalization, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                company_id = excluded.company_id,
                name = excluded.name,
                scope_category = excluded.scope_category,
                sequence_json = excluded.sequence_json,
                topology = excluded.topology,
                required_approvers_json = excluded.required_approvers_json,
                min_approval_percentage = excluded.min_approval_percentage,
                specific_approver_id = excluded.specific_approver_id,
                escalation_days = excluded.escalation_days,
                rejection_finalization = excluded.rejection_finalization",
        )
        .bind(&rule.id.0)
        .bind(&rule.company_id.0)
        .bind(&rule.name)
        .bind(scope_category)
        .bind(sequence_json)
        .bind(rule.topology.as_str())
        .bind(required_json)
        .bind(rule.min_approval_percentage.to_string())
        .bind(rule.specific_approver_id.as_ref().map(|id| id.0.as_str()))
        .bind(i64::from(rule.escalation_days))
        .bind(rejection_finalization_str(rule.rejection_finalization))
        .bind(rule.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }
}
