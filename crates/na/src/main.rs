use clap::Parser;
use na_core::{Orchestrator, RequestContext};
use na_db::DbStore;
use na_events::{EventBus, EventSource};
use na_git::CliGit;
use na_workflow::{Engine, QueueDispatcher, run_dispatch_worker};
use owo_colors::{OwoColorize, Stream};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod error;

use crate::commands::Command;
use crate::config::AppConfig;
use crate::error::CliError;

/// Night Agent: anomaly-to-fix lifecycle orchestrator
#[derive(Parser)]
#[command(name = "na", version, about)]
struct Cli {
    /// Config file (defaults to $NA_CONFIG, then .night-agent/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Correlation id stamped on every event this command records
    #[arg(long, global = true)]
    correlation_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(Value::String(text)) => print!("{text}"),
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(text) => println!("{text}"),
            Err(err) => fail(&CliError::from(err)),
        },
        Err(err) => fail(&err),
    }
}

async fn run(cli: Cli) -> Result<Value, CliError> {
    let config = AppConfig::load(cli.config.as_deref())?;
    let conn = na_db::schema::open_and_migrate(&config.database.path)?;
    let engine = Engine::from_config(&config.workflow)?;
    let (dispatcher, receiver) = QueueDispatcher::channel();
    let dispatcher = Arc::new(dispatcher);
    let worker = tokio::spawn(run_dispatch_worker(receiver, engine));

    let orchestrator = Orchestrator::new(
        DbStore::new(conn),
        EventBus::default(),
        Arc::new(CliGit::new(config.git.options())),
        dispatcher.clone(),
        config.orchestrator.clone(),
    );
    let ctx = RequestContext::new(cli.command.source(), cli.correlation_id.clone());
    let result = match cli.command {
        Command::WorkflowStatus { execution_id } => {
            let engine = Engine::from_config(&config.workflow)?;
            commands::workflow_status(&orchestrator, &engine, &execution_id).await
        }
        command => {
            tokio::task::block_in_place(|| commands::handle(&orchestrator, &ctx, command))
        }
    };

    dispatcher.close();
    match worker.await {
        Ok(stats) => {
            tracing::debug!(
                succeeded = stats.succeeded,
                failed = stats.failed,
                "dispatch worker finished"
            );
            let ctx = RequestContext::new(EventSource::Workflow, cli.correlation_id);
            for outcome in &stats.outcomes {
                if let Err(err) = orchestrator.workflows().record_outcome(&ctx, outcome) {
                    tracing::warn!(
                        execution_id = %outcome.execution_id,
                        error = %err,
                        "failed to record workflow outcome"
                    );
                }
            }
        }
        Err(err) => tracing::warn!(error = %err, "dispatch worker panicked"),
    }
    result
}

fn fail(err: &CliError) -> ! {
    eprintln!(
        "{} {err}",
        "error:".if_supports_color(Stream::Stderr, |text| text.red())
    );
    println!("{}", err.envelope());
    std::process::exit(1);
}
