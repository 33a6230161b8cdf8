use std::collections::BTreeSet;
use std::env;
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use outlay_cli::commands::{config, escalate, migrate};
use outlay_core::approvals::ports::{ExpenseRepository, RuleRepository};
use outlay_core::domain::rule::{RejectionFinalization, RuleScope};
use outlay_core::{
    ApprovalEngine, ApprovalPorts, ApprovalRule, ApprovalRuleId, ApprovalTopology, ApproverToken,
    CompanyId, DirectoryUser, ExpenseId, ExpenseRequest, ExpenseStatus, UserId, UserRole,
};
use outlay_db::{
    connect_with_settings, migrations, SqlApprovalActionRepository, SqlExpenseRepository,
    SqlRuleRepository, SqlUserDirectory,
};

#[test]
fn migrate_returns_success_with_in_memory_database() {
    with_env(&[("OUTLAY_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert!(payload.get("details").is_none());
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("OUTLAY_DATABASE_URL", "postgres://localhost/outlay")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn escalate_reports_an_empty_sweep() {
    with_env(
        &[("OUTLAY_DATABASE_URL", "sqlite::memory:"), ("OUTLAY_DATABASE_MAX_CONNECTIONS", "1")],
        || {
            let result = escalate::run(false);
            assert_eq!(result.exit_code, 0, "expected successful sweep: {}", result.output);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "escalate");
            assert_eq!(payload["status"], "ok");
            assert_eq!(payload["details"]["sweeps"], 1);
            assert_eq!(payload["details"]["scanned"], 0);
            assert_eq!(payload["details"]["newly_escalated_steps"], 0);
        },
    );
}

#[test]
fn escalate_flags_overdue_approvers_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let database_url = format!("sqlite://{}", dir.path().join("outlay.db").display());
    seed_overdue_expense(&database_url);

    with_env(&[("OUTLAY_DATABASE_URL", database_url.as_str())], || {
        let first = parse_payload(&escalate::run(false).output);
        assert_eq!(first["status"], "ok", "unexpected payload: {first}");
        assert_eq!(first["details"]["scanned"], 1);
        assert_eq!(first["details"]["escalated_expenses"], 1);
        assert_eq!(first["details"]["newly_escalated_steps"], 2);

        let second = parse_payload(&escalate::run(false).output);
        assert_eq!(second["details"]["scanned"], 1);
        assert_eq!(second["details"]["newly_escalated_steps"], 0);
    });
}

#[test]
fn escalate_returns_config_failure_for_bad_augmentation() {
    with_env(&[("OUTLAY_APPROVALS_APPROVER_AUGMENTATION", "everyone")], || {
        let result = escalate::run(false);
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn config_attributes_env_sources() {
    with_env(
        &[
            ("OUTLAY_DATABASE_URL", "sqlite://from-env.db"),
            ("OUTLAY_LOG_LEVEL", "debug"),
            ("OUTLAY_APPROVALS_APPROVER_AUGMENTATION", "append-company-admin"),
        ],
        || {
            let result = config::run();
            assert_eq!(result.exit_code, 0);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "config");
            let sources = &payload["details"]["sources"];
            assert_eq!(sources["database.url"], "env (OUTLAY_DATABASE_URL)");
            assert_eq!(sources["logging.level"], "env (OUTLAY_LOG_LEVEL)");
            assert_eq!(sources["database.timeout_secs"], "default");

            let effective = &payload["details"]["effective"];
            assert_eq!(effective["database"]["url"], "sqlite://from-env.db");
            assert_eq!(effective["approvals"]["approver_augmentation"], "append_company_admin");

            let message = payload["message"].as_str().unwrap_or_default();
            assert!(message.contains("- logging.level = debug (source: env (OUTLAY_LOG_LEVEL))"));
        },
    );
}

fn seed_overdue_expense(database_url: &str) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");

    runtime.block_on(async {
        let pool = connect_with_settings(database_url, 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        let company = CompanyId("co-1".to_string());
        let directory = SqlUserDirectory::new(pool.clone());
        for (id, role, manager) in [
            ("u-admin", UserRole::Admin, None),
            ("u-mgr", UserRole::Manager, Some("u-admin")),
            ("u-emp", UserRole::Employee, Some("u-mgr")),
        ] {
            directory
                .upsert(&DirectoryUser {
                    id: UserId(id.to_string()),
                    company_id: company.clone(),
                    role,
                    manager_id: manager.map(|manager: &str| UserId(manager.to_string())),
                })
                .await
                .expect("register user");
        }

        let rules = SqlRuleRepository::new(pool.clone());
        rules
            .save(ApprovalRule {
                id: ApprovalRuleId("R-1".to_string()),
                company_id: company.clone(),
                name: "default".to_string(),
                scope: RuleScope::All,
                sequence: vec![
                    ApproverToken::Manager,
                    ApproverToken::User(UserId("u-admin".to_string())),
                ],
                topology: ApprovalTopology::Parallel,
                required_approvers: BTreeSet::new(),
                min_approval_percentage: Decimal::ONE_HUNDRED,
                specific_approver_id: None,
                escalation_days: 3,
                rejection_finalization: RejectionFinalization::Immediate,
                created_at: Utc::now(),
            })
            .await
            .expect("save rule");

        let expenses = Arc::new(SqlExpenseRepository::new(pool.clone()));
        let created_at = Utc::now() - Duration::days(4);
        expenses
            .save(ExpenseRequest {
                id: ExpenseId("EXP-1".to_string()),
                company_id: company,
                requester_id: UserId("u-emp".to_string()),
                description: "Client dinner".to_string(),
                category: "meals".to_string(),
                amount: Decimal::new(21_000, 2),
                currency: "USD".to_string(),
                status: ExpenseStatus::Draft,
                approval_rule_id: None,
                approver_state: None,
                version: 0,
                created_at,
                updated_at: created_at,
            })
            .await
            .expect("save draft");

        let engine = ApprovalEngine::new(ApprovalPorts {
            expenses,
            rules: Arc::new(rules),
            actions: Arc::new(SqlApprovalActionRepository::new(pool.clone())),
            directory: Arc::new(directory),
        });
        engine
            .submit_expense(&ExpenseId("EXP-1".to_string()), Utc::now())
            .await
            .expect("submit");
        pool.close().await;
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "OUTLAY_DATABASE_URL",
        "OUTLAY_DATABASE_MAX_CONNECTIONS",
        "OUTLAY_DATABASE_TIMEOUT_SECS",
        "OUTLAY_APPROVALS_APPROVER_AUGMENTATION",
        "OUTLAY_APPROVALS_ESCALATION_SWEEP_INTERVAL_SECS",
        "OUTLAY_LOGGING_LEVEL",
        "OUTLAY_LOGGING_FORMAT",
        "OUTLAY_LOG_LEVEL",
        "OUTLAY_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
