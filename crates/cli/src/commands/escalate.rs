use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::info;

use outlay_core::audit::TracingAuditSink;
use outlay_core::config::{AppConfig, LoadOptions};
use outlay_core::{ApprovalEngine, ApprovalPorts, EscalationSweepReport};
use outlay_db::{
    connect_with_config, migrations, DbPool, SqlApprovalActionRepository, SqlExpenseRepository,
    SqlRuleRepository, SqlUserDirectory,
};

use crate::commands::{runtime, CommandResult};

type Failure = (&'static str, String, u8);

#[derive(Debug, Default)]
struct SweepTotals {
    sweeps: usize,
    scanned: usize,
    escalated_expenses: usize,
    newly_escalated_steps: usize,
    failed: usize,
}

impl SweepTotals {
    fn absorb(&mut self, report: &EscalationSweepReport) {
        self.sweeps += 1;
        self.scanned += report.scanned;
        self.escalated_expenses += report.escalated_expenses;
        self.newly_escalated_steps += report.newly_escalated_steps;
        self.failed += report.failed;
    }
}

pub fn run(watch: bool) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "escalate",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match runtime("escalate") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let engine = build_engine(&pool, &config);
        let totals = if watch {
            let interval = Duration::from_secs(config.approvals.escalation_sweep_interval_secs);
            watch_sweeps(&engine, interval).await?
        } else {
            let mut totals = SweepTotals::default();
            totals.absorb(&sweep_once(&engine).await?);
            totals
        };

        pool.close().await;
        Ok::<SweepTotals, Failure>(totals)
    });

    match result {
        Ok(totals) => CommandResult::success_with_details(
            "escalate",
            format!(
                "escalated {} approver steps across {} expenses ({} pending scanned, {} failed)",
                totals.newly_escalated_steps,
                totals.escalated_expenses,
                totals.scanned,
                totals.failed
            ),
            Some(json!({
                "sweeps": totals.sweeps,
                "scanned": totals.scanned,
                "escalated_expenses": totals.escalated_expenses,
                "newly_escalated_steps": totals.newly_escalated_steps,
                "failed": totals.failed,
            })),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("escalate", error_class, message, exit_code)
        }
    }
}

fn build_engine(pool: &DbPool, config: &AppConfig) -> ApprovalEngine {
    ApprovalEngine::new(ApprovalPorts {
        expenses: Arc::new(SqlExpenseRepository::new(pool.clone())),
        rules: Arc::new(SqlRuleRepository::new(pool.clone())),
        actions: Arc::new(SqlApprovalActionRepository::new(pool.clone())),
        directory: Arc::new(SqlUserDirectory::new(pool.clone())),
    })
    .with_audit_sink(Arc::new(TracingAuditSink))
    .with_augmentation(config.approvals.approver_augmentation)
}

async fn sweep_once(engine: &ApprovalEngine) -> Result<EscalationSweepReport, Failure> {
    engine
        .run_escalation_sweep(Utc::now())
        .await
        .map_err(|error| ("escalation", error.to_string(), 6u8))
}

async fn watch_sweeps(
    engine: &ApprovalEngine,
    interval: Duration,
) -> Result<SweepTotals, Failure> {
    let mut totals = SweepTotals::default();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        event_name = "cli.escalate.watch_started",
        interval_secs = interval.as_secs(),
        "escalation watch started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = sweep_once(engine).await?;
                totals.absorb(&report);
            }
            signal = &mut shutdown => {
                signal.map_err(|error| ("signal", error.to_string(), 7u8))?;
                break;
            }
        }
    }

    info!(
        event_name = "cli.escalate.watch_stopped",
        sweeps = totals.sweeps,
        newly_escalated_steps = totals.newly_escalated_steps,
        "escalation watch stopped"
    );
    Ok(totals)
}
