pub mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use outlay_core::config::{AppConfig, LoadOptions};

#[derive(Debug, Parser)]
#[command(
    name = "outlay",
    about = "Outlay operator CLI",
    long_about = "Operate the expense approval store: apply migrations, run escalation sweeps, and inspect configuration.",
    after_help = "Examples:\n  outlay migrate\n  outlay escalate\n  outlay escalate --watch\n  outlay config"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Flag pending approvers whose escalation window has lapsed")]
    Escalate {
        #[arg(
            long,
            help = "Repeat the sweep every approvals.escalation_sweep_interval_secs until ctrl-c"
        )]
        watch: bool,
    },
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    // A broken config is reported by the command itself.
    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        if let Err(error) = init_logging(&config) {
            eprintln!("logging disabled: {error}");
        }
    }

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Escalate { watch } => commands::escalate::run(watch),
        Command::Config => commands::config::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so stdout carries only the JSON command payload.
pub fn init_logging(config: &AppConfig) -> anyhow::Result<()> {
    use outlay_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let installed = match config.logging.format {
        Compact => builder.compact().try_init(),
        Pretty => builder.pretty().try_init(),
        Json => builder.json().try_init(),
    };
    installed.map_err(|error| anyhow::anyhow!("failed to install tracing subscriber: {error}"))
}
