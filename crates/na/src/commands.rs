use crate::error::CliError;
use clap::{Args, Subcommand};
use na_core::error::{AnomalyError, FixError};
use na_core::types::{
    AnomalyFilter, AnomalyId, AnomalyStatus, FixId, JudgeDecision, ProposalInput, Protocol,
    RegisterRepositoryInput, RepoId, ReviewInput, WorkflowTrace,
};
use na_core::{Orchestrator, OrchestratorError, RequestContext, Store};
use na_events::EventSource;
use na_workflow::{Engine, WorkflowStatus};
use serde::Serialize;
use serde_json::{Value, json};
use std::io::Read as _;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum Command {
    /// Score an anomaly report and store it unless it is noise
    Ingest(IngestArgs),
    /// Record the judge's verdict on a pending anomaly
    Review(ReviewArgs),
    /// Save the root-cause analysis for a validated anomaly
    Analysis(AnalysisArgs),
    /// Save a proposed patch; creates or replaces the anomaly's fix
    Proposal(ProposalArgs),
    /// Anomalies waiting for the judge
    Pending,
    /// Show an anomaly with its repository
    Show { id: AnomalyId },
    List(ListArgs),
    /// Show a fix, rebuilding it from the anomaly if needed
    Fix { id: FixId },
    Approve { id: FixId },
    /// Sandbox branch diff against the default branch
    Diff { id: FixId },
    /// Branches available as merge targets
    Branches { id: AnomalyId },
    /// Apply the fix's patch on its sandbox branch
    Apply { id: FixId },
    /// Request changes to a proposal
    Refine { id: FixId, instruction: String },
    /// Request changes to an applied sandbox
    RefineSandbox { id: FixId, instruction: String },
    /// Merge the sandbox branch and resolve the anomaly
    Merge {
        id: FixId,
        /// Target branch (defaults to the configured default branch)
        #[arg(long)]
        target: Option<String>,
    },
    /// Reject the fix and send the anomaly back for a new proposal
    Reject { id: FixId },
    #[command(subcommand)]
    Repo(RepoCommand),
    Stats,
    Events {
        /// Only events with a sequence number greater than this
        #[arg(long)]
        after: Option<i64>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Ask the workflow engine for an execution's state; accepts the id
    /// from an ingest receipt or the engine's own id
    WorkflowStatus { execution_id: String },
}

#[derive(Subcommand)]
pub enum RepoCommand {
    /// Register or update a repository
    Add {
        url: String,
        #[arg(long)]
        id: Option<RepoId>,
        /// https or ssh (inferred from the url when omitted)
        #[arg(long, value_parser = ["https", "ssh"])]
        protocol: Option<String>,
        /// Key into the [credentials] config section
        #[arg(long)]
        credential: Option<String>,
    },
    /// Check connection, read and write access
    Verify { id: RepoId },
    List,
}

#[derive(Args)]
pub struct IngestArgs {
    /// JSON report file; reads stdin when omitted or "-"
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(Args)]
pub struct ReviewArgs {
    pub id: AnomalyId,
    #[arg(long, value_parser = ["critical", "ignore"])]
    pub decision: String,
    #[arg(long, default_value = "")]
    pub reasoning: String,
}

#[derive(Args)]
pub struct AnalysisArgs {
    pub id: AnomalyId,
    /// Analysis as JSON or plain text
    pub analysis: String,
}

#[derive(Args)]
pub struct ProposalArgs {
    pub id: AnomalyId,
    /// Unified diff file; "-" reads stdin
    #[arg(long)]
    pub patch: PathBuf,
    /// Analysis as JSON or plain text
    #[arg(long)]
    pub analysis: Option<String>,
    #[arg(long)]
    pub confidence: Option<f64>,
}

#[derive(Args)]
pub struct ListArgs {
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long)]
    pub repo: Option<RepoId>,
    #[arg(long)]
    pub limit: Option<u32>,
}

impl Command {
    /// Which collaborator a command speaks for in the event log.
    pub fn source(&self) -> EventSource {
        match self {
            Self::Ingest(_) => EventSource::Agent,
            Self::Review(_) => EventSource::Judge,
            Self::Analysis(_) | Self::Proposal(_) => EventSource::Workflow,
            _ => EventSource::Cli,
        }
    }
}

pub fn handle<S: Store>(
    orchestrator: &Orchestrator<S>,
    ctx: &RequestContext,
    command: Command,
) -> Result<Value, CliError> {
    match command {
        Command::Ingest(args) => {
            let text = read_input(args.file.as_deref())?;
            let payload: Value = serde_json::from_str(&text)
                .map_err(|err| CliError::input(format!("report is not JSON: {err}")))?;
            render(orchestrator.anomalies().ingest(ctx, payload)?)
        }
        Command::Review(args) => {
            let decision = match args.decision.as_str() {
                "critical" => JudgeDecision::Critical,
                _ => JudgeDecision::Ignore,
            };
            let input = ReviewInput {
                decision,
                reasoning: args.reasoning,
            };
            render(orchestrator.anomalies().review(ctx, &args.id, input)?)
        }
        Command::Analysis(args) => render(orchestrator.anomalies().save_analysis(
            ctx,
            &args.id,
            loose_json(&args.analysis),
        )?),
        Command::Proposal(args) => {
            let input = ProposalInput {
                analysis: args.analysis.as_deref().map_or(Value::Null, loose_json),
                patch: read_input(Some(&args.patch))?,
                confidence: args.confidence,
            };
            render(orchestrator.anomalies().save_proposal(ctx, &args.id, input)?)
        }
        Command::Pending => render(orchestrator.anomalies().pending()?),
        Command::Show { id } => {
            let anomaly = orchestrator
                .anomalies()
                .get(&id)?
                .ok_or(AnomalyError::NotFound)
                .map_err(OrchestratorError::from)?;
            render(anomaly)
        }
        Command::List(args) => {
            let filter = AnomalyFilter {
                status: args.status.as_deref().map(parse_status).transpose()?,
                repo_id: args.repo,
                limit: args.limit,
            };
            render(orchestrator.anomalies().list(&filter)?)
        }
        Command::Fix { id } => {
            let fix = orchestrator
                .fixes()
                .get(ctx, &id)?
                .ok_or(FixError::NotFound)
                .map_err(OrchestratorError::from)?;
            render(fix)
        }
        Command::Approve { id } => render(orchestrator.fixes().approve(ctx, &id)?),
        Command::Diff { id } => Ok(Value::String(orchestrator.fixes().sandbox_diff(ctx, &id)?)),
        Command::Branches { id } => render(orchestrator.anomalies().available_branches(&id)?),
        Command::Apply { id } => render(orchestrator.fixes().apply_to_sandbox(ctx, &id)?),
        Command::Refine { id, instruction } => {
            render(orchestrator.fixes().refine_proposal(ctx, &id, &instruction)?)
        }
        Command::RefineSandbox { id, instruction } => {
            render(orchestrator.fixes().refine_sandbox(ctx, &id, &instruction)?)
        }
        Command::Merge { id, target } => {
            render(orchestrator.fixes().merge(ctx, &id, target.as_deref())?)
        }
        Command::Reject { id } => render(orchestrator.fixes().reject(ctx, &id)?),
        Command::Repo(command) => handle_repo(orchestrator, ctx, command),
        Command::Stats => render(orchestrator.stats()?),
        Command::Events { after, limit } => render(orchestrator.events().list(after, limit)?),
        Command::WorkflowStatus { .. } => Err(CliError::Internal {
            message: "workflow-status is served by the workflow engine".to_string(),
        }),
    }
}

/// Resolves a dispatch-time execution id through the recorded workflow
/// events before asking the engine. Ids with no record go to the engine as
/// given.
pub async fn workflow_status<S: Store>(
    orchestrator: &Orchestrator<S>,
    engine: &Engine,
    execution_id: &str,
) -> Result<Value, CliError> {
    let trace = orchestrator.workflows().trace(execution_id)?;
    if let Some(WorkflowTrace {
        error: Some(error), ..
    }) = &trace
    {
        return Ok(json!({
            "execution_id": execution_id,
            "status": WorkflowStatus::Failed,
            "error": error,
        }));
    }
    let remote = trace
        .as_ref()
        .and_then(|trace| trace.engine_execution_id.as_deref())
        .unwrap_or(execution_id);
    let status = engine.status(remote).await?;
    Ok(json!({
        "execution_id": execution_id,
        "engine_execution_id": remote,
        "status": status,
    }))
}

fn handle_repo<S: Store>(
    orchestrator: &Orchestrator<S>,
    ctx: &RequestContext,
    command: RepoCommand,
) -> Result<Value, CliError> {
    match command {
        RepoCommand::Add {
            url,
            id,
            protocol,
            credential,
        } => {
            let protocol = protocol.as_deref().map(|value| match value {
                "ssh" => Protocol::Ssh,
                _ => Protocol::Https,
            });
            let input = RegisterRepositoryInput {
                id,
                url,
                protocol,
                credential_ref: credential,
            };
            render(orchestrator.repos().register(ctx, input)?)
        }
        RepoCommand::Verify { id } => render(orchestrator.repos().verify(ctx, &id)?),
        RepoCommand::List => render(orchestrator.repos().list()?),
    }
}

fn render<T: Serialize>(value: T) -> Result<Value, CliError> {
    Ok(serde_json::to_value(value)?)
}

fn read_input(path: Option<&Path>) -> Result<String, CliError> {
    let read = match path {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path),
        _ => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text).map(|_| text)
        }
    };
    read.map_err(|err| CliError::input(format!("failed to read input: {err}")))
}

/// JSON when it parses, otherwise the raw text.
fn loose_json(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn parse_status(value: &str) -> Result<AnomalyStatus, CliError> {
    let name = value.trim().to_ascii_uppercase().replace('-', "_");
    serde_json::from_value(Value::String(name))
        .map_err(|_| CliError::input(format!("unknown anomaly status: {value}")))
}
