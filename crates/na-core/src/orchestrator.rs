use crate::anomalies::AnomalyRepository;
use crate::config::OrchestratorConfig;
use crate::error::{AnomalyError, FixError, OrchestratorError, RepoError};
use crate::events::EventRepository;
use crate::fixes::FixRepository;
use crate::locks::RepoLocks;
use crate::recovery::{FixText, parse_analysis, reconstruct_fix};
use crate::repos::RepoRepository;
use crate::scoring::{AnomalyReport, score, should_dispatch};
use crate::store::Store;
use crate::types::event::EventBody;
use crate::types::{
    Anomaly, AnomalyFilter, AnomalyId, AnomalyStatus, AnomalyWithRepo, Fix, FixId, FixStatus,
    IngestReceipt, IngestStatus, JudgeDecision, LifecycleStats, MergeReport, Protocol,
    ProposalInput, RefineStage, RegisterRepositoryInput, RepoId, Repository, ReviewInput,
    VerificationReport, WorkflowTrace, context_keys,
};
use crate::validation::{statuses_consistent, validate_anomaly_transition, validate_fix_transition};
use chrono::Utc;
use na_events::bus::EventBus;
use na_events::types::{EventRecord, EventSource};
use na_git::{BranchCleanup, GitError as BackendGitError, GitManager, repo_name, working_copy_path};
use na_workflow::{DispatchOutcome, WorkflowDispatcher};
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_PROPOSAL_CONFIDENCE: f64 = 0.85;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub source: EventSource,
    pub correlation_id: Option<String>,
}

impl RequestContext {
    pub fn new(source: EventSource, correlation_id: Option<String>) -> Self {
        Self {
            source,
            correlation_id,
        }
    }
}

pub struct Orchestrator<S: Store> {
    store: S,
    event_bus: EventBus,
    git: Arc<dyn GitManager>,
    dispatcher: Arc<dyn WorkflowDispatcher>,
    config: OrchestratorConfig,
    locks: RepoLocks,
}

impl<S: Store> Orchestrator<S> {
    pub fn new(
        store: S,
        event_bus: EventBus,
        git: Arc<dyn GitManager>,
        dispatcher: Arc<dyn WorkflowDispatcher>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            event_bus,
            git,
            dispatcher,
            config,
            locks: RepoLocks::new(),
        }
    }

    /// Share working-copy locks with other orchestrators in this process.
    #[must_use]
    pub fn with_locks(mut self, locks: RepoLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn anomalies(&self) -> AnomaliesApi<'_, S> {
        AnomaliesApi { core: self }
    }

    pub fn fixes(&self) -> FixesApi<'_, S> {
        FixesApi { core: self }
    }

    pub fn repos(&self) -> ReposApi<'_, S> {
        ReposApi { core: self }
    }

    pub fn events(&self) -> EventsApi<'_, S> {
        EventsApi { core: self }
    }

    pub fn workflows(&self) -> WorkflowsApi<'_, S> {
        WorkflowsApi { core: self }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn locks(&self) -> &RepoLocks {
        &self.locks
    }

    pub fn stats(&self) -> Result<LifecycleStats, OrchestratorError> {
        let mut stats = LifecycleStats::default();
        for status in AnomalyStatus::ALL {
            stats.anomalies.insert(status, 0);
        }
        for status in FixStatus::ALL {
            stats.fixes.insert(status, 0);
        }
        for (status, count) in self.store.anomalies().count_by_status()? {
            stats.anomalies.insert(status, count);
            stats.anomalies_total += count;
        }
        for (status, count) in self.store.fixes().count_by_status()? {
            stats.fixes.insert(status, count);
            stats.fixes_total += count;
        }
        Ok(stats)
    }

    fn with_events<T, F>(&self, ctx: &RequestContext, f: F) -> Result<T, OrchestratorError>
    where
        F: FnOnce(&S) -> Result<(T, Vec<EventBody>), OrchestratorError>,
    {
        let (value, records) = self.store.with_tx(|store| {
            let (value, bodies) = f(store)?;
            let mut records = Vec::new();
            for body in bodies {
                let record = build_event_record(ctx, body)?;
                let record = store.events().append(record)?;
                records.push(record);
            }
            Ok((value, records))
        })?;
        for record in records {
            let _ = self.event_bus.publish(record);
        }
        Ok(value)
    }

    fn working_copy(&self, repo: &Repository) -> PathBuf {
        working_copy_path(&repo.url, &self.config.workspace_root)
    }

    fn token_for(&self, repo: &Repository) -> Option<&str> {
        self.config.token_for(repo.credential_ref.as_deref())
    }
}

pub struct AnomaliesApi<'a, S: Store> {
    core: &'a Orchestrator<S>,
}

impl<S: Store> AnomaliesApi<'_, S> {
    /// Scores a raw detector report, persists it when it survives the noise
    /// filter, and kicks off remediation for high-priority anomalies.
    pub fn ingest(
        &self,
        ctx: &RequestContext,
        payload: Value,
    ) -> Result<IngestReceipt, OrchestratorError> {
        let Value::Object(context) = payload else {
            return Err(AnomalyError::InvalidInput {
                message: "anomaly report must be a JSON object".to_string(),
            }
            .into());
        };
        let report = AnomalyReport::from_value(Value::Object(context.clone())).map_err(|err| {
            AnomalyError::InvalidInput {
                message: err.to_string(),
            }
        })?;
        let normalized = report.normalize();
        let decision = score(&normalized);
        if !decision.process {
            tracing::info!(
                kind = %normalized.kind,
                severity = ?normalized.severity,
                "dropping low-severity novelty anomaly"
            );
            return Ok(IngestReceipt {
                status: IngestStatus::Dropped,
                anomaly_id: None,
                score: decision.score,
                execution_id: None,
                error: None,
            });
        }

        let repo_id = report
            .repository_hint()
            .ok_or_else(|| AnomalyError::InvalidInput {
                message: "anomaly report names no repository".to_string(),
            })?;
        let repo_id = RepoId::new(repo_id).map_err(|err| AnomalyError::InvalidInput {
            message: err.to_string(),
        })?;

        let now = Utc::now();
        let mut anomaly = Anomaly {
            id: AnomalyId::generate(),
            repo_id,
            status: AnomalyStatus::Pending,
            context,
            created_at: now,
            updated_at: now,
        };
        anomaly.merge_context(fields([(
            context_keys::PRIORITY_SCORE,
            json!(decision.score),
        )]));

        let anomaly = self.core.with_events(ctx, |store| {
            load_repo(store, &anomaly.repo_id)?;
            store.anomalies().create(&anomaly)?;
            Ok((
                anomaly.clone(),
                vec![EventBody::AnomalyIngested {
                    anomaly: anomaly.clone(),
                    score: decision.score,
                }],
            ))
        })?;
        tracing::info!(anomaly_id = %anomaly.id, score = decision.score, "anomaly ingested");

        let mut receipt = IngestReceipt {
            status: IngestStatus::Received,
            anomaly_id: Some(anomaly.id.clone()),
            score: decision.score,
            execution_id: None,
            error: None,
        };
        if !should_dispatch(decision, self.core.config.dispatch_threshold) {
            tracing::debug!(anomaly_id = %anomaly.id, "score below dispatch threshold");
            return Ok(receipt);
        }

        match self.core.dispatcher.start_fix_workflow(anomaly.id.as_str()) {
            Ok(execution_id) => {
                receipt.execution_id = Some(execution_id.clone());
                if let Err(err) = self.record_dispatch(ctx, &anomaly.id, execution_id) {
                    tracing::error!(anomaly_id = %anomaly.id, error = %err, "failed to record dispatch");
                    receipt.status = IngestStatus::Error;
                    receipt.error = Some(err.to_string());
                }
            }
            Err(err) => {
                tracing::warn!(anomaly_id = %anomaly.id, error = %err, "workflow dispatch failed");
            }
        }
        Ok(receipt)
    }

    fn record_dispatch(
        &self,
        ctx: &RequestContext,
        id: &AnomalyId,
        execution_id: String,
    ) -> Result<(), OrchestratorError> {
        self.core.with_events(ctx, |store| {
            let mut anomaly = load_anomaly(store, id)?;
            anomaly.merge_context(fields([(
                context_keys::WORKFLOW_EXECUTION_ID,
                json!(execution_id),
            )]));
            store
                .anomalies()
                .update(id, anomaly.status, &anomaly.context)?;
            Ok((
                (),
                vec![EventBody::WorkflowDispatched {
                    anomaly_id: id.clone(),
                    execution_id,
                }],
            ))
        })
    }

    /// Judge verdict: CRITICAL validates, IGNORE closes the anomaly.
    pub fn review(
        &self,
        ctx: &RequestContext,
        id: &AnomalyId,
        input: ReviewInput,
    ) -> Result<Anomaly, OrchestratorError> {
        self.core.with_events(ctx, |store| {
            let mut anomaly = load_anomaly(store, id)?;
            let (target, verified) = match input.decision {
                JudgeDecision::Critical => (AnomalyStatus::Validated, true),
                JudgeDecision::Ignore => (AnomalyStatus::Ignored, false),
            };
            let same_reasoning = anomaly
                .context
                .get(context_keys::JUDGE_REASONING)
                .and_then(Value::as_str)
                == Some(input.reasoning.as_str());
            if anomaly.status == target && same_reasoning {
                return Ok((anomaly, Vec::new()));
            }
            validate_anomaly_transition(anomaly.status, target)?;

            anomaly.merge_context(fields([
                (context_keys::VERIFIED_CRITICAL, json!(verified)),
                (context_keys::JUDGE_REASONING, json!(input.reasoning)),
            ]));
            let anomaly = store.anomalies().update(id, target, &anomaly.context)?;
            Ok((
                anomaly,
                vec![EventBody::AnomalyReviewed {
                    anomaly_id: id.clone(),
                    decision: input.decision,
                    status: target,
                }],
            ))
        })
    }

    pub fn save_analysis(
        &self,
        ctx: &RequestContext,
        id: &AnomalyId,
        analysis: Value,
    ) -> Result<Anomaly, OrchestratorError> {
        let analysis = parse_analysis(analysis);
        if analysis.is_null() {
            return Err(AnomalyError::InvalidInput {
                message: "analysis is empty".to_string(),
            }
            .into());
        }
        self.core.with_events(ctx, |store| {
            let mut anomaly = load_anomaly(store, id)?;
            if !matches!(
                anomaly.status,
                AnomalyStatus::Validated | AnomalyStatus::Analyzed
            ) {
                return Err(AnomalyError::InvalidTransition {
                    from: anomaly.status,
                    to: AnomalyStatus::Analyzed,
                }
                .into());
            }
            anomaly.merge_context(fields([(context_keys::ROOT_CAUSE_ANALYSIS, analysis)]));
            let anomaly = store
                .anomalies()
                .update(id, AnomalyStatus::Analyzed, &anomaly.context)?;
            Ok((
                anomaly,
                vec![EventBody::AnalysisSaved {
                    anomaly_id: id.clone(),
                }],
            ))
        })
    }

    /// Upserts the anomaly's single Fix from a proposed patch and moves the
    /// anomaly to `PROPOSAL_READY`.
    pub fn save_proposal(
        &self,
        ctx: &RequestContext,
        id: &AnomalyId,
        input: ProposalInput,
    ) -> Result<Fix, OrchestratorError> {
        if input.patch.trim().is_empty() {
            return Err(FixError::InvalidInput {
                message: "patch is empty".to_string(),
            }
            .into());
        }
        let analysis = parse_analysis(input.analysis);
        let confidence = input
            .confidence
            .or_else(|| analysis.get("confidence").and_then(Value::as_f64))
            .unwrap_or(DEFAULT_PROPOSAL_CONFIDENCE)
            .clamp(0.0, 1.0);

        self.core.with_events(ctx, |store| {
            let mut anomaly = load_anomaly(store, id)?;
            if !matches!(
                anomaly.status,
                AnomalyStatus::Analyzed | AnomalyStatus::ProposalReady
            ) {
                return Err(AnomalyError::InvalidTransition {
                    from: anomaly.status,
                    to: AnomalyStatus::ProposalReady,
                }
                .into());
            }
            let repo = load_repo(store, &anomaly.repo_id)?;
            let existing = store.fixes().get_by_anomaly(id)?;
            if let Some(existing) = &existing {
                validate_fix_transition(existing.status, FixStatus::Pending)?;
            }

            if !analysis.is_null() {
                anomaly.merge_context(fields([(
                    context_keys::ROOT_CAUSE_ANALYSIS,
                    analysis.clone(),
                )]));
            }
            let text = FixText::from_analysis(id, anomaly.root_cause_analysis());
            let now = Utc::now();
            let fix = Fix {
                id: FixId::for_anomaly(id),
                anomaly_id: id.clone(),
                diff: input.patch.clone(),
                explanation: text.explanation,
                summary: text.summary,
                branch: na_git::fix_branch_name(&repo_name(&repo.url), id.as_str()),
                confidence,
                status: FixStatus::Pending,
                created_at: existing.as_ref().map_or(now, |fix| fix.created_at),
                updated_at: now,
            };
            let fix = store.fixes().upsert(&fix)?;

            anomaly.merge_context(fields([
                (context_keys::GENERATED_PATCH, json!(input.patch)),
                (context_keys::PROPOSAL_ID, json!(fix.id)),
            ]));
            store
                .anomalies()
                .update(id, AnomalyStatus::ProposalReady, &anomaly.context)?;
            Ok((fix.clone(), vec![EventBody::ProposalSaved { fix }]))
        })
    }

    pub fn get(&self, id: &AnomalyId) -> Result<Option<AnomalyWithRepo>, OrchestratorError> {
        let Some(anomaly) = self.core.store.anomalies().get(id)? else {
            return Ok(None);
        };
        let repository = self.core.store.repos().get(&anomaly.repo_id)?;
        Ok(Some(AnomalyWithRepo {
            anomaly,
            repository,
        }))
    }

    pub fn list(&self, filter: &AnomalyFilter) -> Result<Vec<Anomaly>, OrchestratorError> {
        self.core
            .store
            .anomalies()
            .list(filter)
            .map_err(OrchestratorError::from)
    }

    /// Anomalies still waiting for the judge.
    pub fn pending(&self) -> Result<Vec<Anomaly>, OrchestratorError> {
        let filter = AnomalyFilter {
            status: Some(AnomalyStatus::Pending),
            ..AnomalyFilter::default()
        };
        Ok(self
            .list(&filter)?
            .into_iter()
            .filter(|anomaly| !anomaly.verified_critical())
            .collect())
    }

    /// Branches of the anomaly's working copy. Falls back to `["main"]`.
    pub fn available_branches(&self, id: &AnomalyId) -> Result<Vec<String>, OrchestratorError> {
        let anomaly = load_anomaly(&self.core.store, id)?;
        let Some(repo) = self.core.store.repos().get(&anomaly.repo_id)? else {
            tracing::warn!(anomaly_id = %id, "repository missing; listing default branch only");
            return Ok(vec!["main".to_string()]);
        };
        let path = self.core.working_copy(&repo);
        match self.core.git.list_branches(&path) {
            Ok(branches) => Ok(branches),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "branch listing failed");
                Ok(vec!["main".to_string()])
            }
        }
    }
}

pub struct FixesApi<'a, S: Store> {
    core: &'a Orchestrator<S>,
}

impl<S: Store> FixesApi<'_, S> {
    /// Returns the anomaly's Fix, rebuilding it from the anomaly's context
    /// when the row is missing. `None` when the anomaly has not reached a
    /// fix-bearing status.
    pub fn ensure(
        &self,
        ctx: &RequestContext,
        anomaly_id: &AnomalyId,
    ) -> Result<Option<Fix>, OrchestratorError> {
        self.core
            .with_events(ctx, |store| ensure_fix_in(store, anomaly_id))
    }

    pub fn get(&self, ctx: &RequestContext, id: &FixId) -> Result<Option<Fix>, OrchestratorError> {
        match self.ensure(ctx, &id.anomaly_id()) {
            Err(OrchestratorError::Anomaly(AnomalyError::NotFound)) => Ok(None),
            other => other,
        }
    }

    fn require(&self, ctx: &RequestContext, id: &FixId) -> Result<Fix, OrchestratorError> {
        self.get(ctx, id)?
            .ok_or_else(|| OrchestratorError::from(FixError::NotFound))
    }

    pub fn approve(&self, ctx: &RequestContext, id: &FixId) -> Result<Fix, OrchestratorError> {
        self.core.with_events(ctx, |store| {
            let (fix, mut events) = require_fix_in(store, id)?;
            if fix.status == FixStatus::Approved {
                return Ok((fix, events));
            }
            validate_fix_transition(fix.status, FixStatus::Approved)?;
            let fix = store.fixes().set_status(&fix.id, FixStatus::Approved)?;
            events.push(EventBody::FixApproved { fix: fix.clone() });
            Ok((fix, events))
        })
    }

    /// Applies the Fix's patch on its sandbox branch in the local working
    /// copy and commits it. Re-applying an applied Fix is a no-op.
    pub fn apply_to_sandbox(
        &self,
        ctx: &RequestContext,
        id: &FixId,
    ) -> Result<Fix, OrchestratorError> {
        let (repo, path) = self.locate(ctx, id)?;
        let token = self.core.token_for(&repo);
        let git = &self.core.git;

        self.core.locks.with_lock(&path, || -> Result<Fix, OrchestratorError> {
            let fix = self.require(ctx, id)?;
            let anomaly = load_anomaly(&self.core.store, &fix.anomaly_id)?;
            if fix.status == FixStatus::AppliedSandbox
                && anomaly.status == AnomalyStatus::SandboxReady
            {
                tracing::info!(fix_id = %fix.id, "fix already applied to sandbox");
                return Ok(fix);
            }
            validate_fix_transition(fix.status, FixStatus::AppliedSandbox)?;
            validate_anomaly_transition(anomaly.status, AnomalyStatus::SandboxReady)?;
            if fix.diff.trim().is_empty() {
                return Err(FixError::InvalidInput {
                    message: "fix has no patch to apply".to_string(),
                }
                .into());
            }

            git.ensure_cloned(&repo.url, token, &path)?;
            git.create_sandbox_branch(&path, &fix.branch)?;
            let outcome = git.apply_patch(&path, &fix.diff)?;

            let commit = if outcome.has_changes() {
                match git.commit(&path, &commit_message(&fix)) {
                    Ok(sha) => Some(sha),
                    Err(err) => {
                        tracing::warn!(fix_id = %fix.id, error = %err, "sandbox commit failed");
                        None
                    }
                }
            } else {
                tracing::info!(fix_id = %fix.id, "patch changed nothing; skipping commit");
                None
            };
            if commit.is_some() && self.core.config.push_sandbox_branches {
                if let Err(err) = git.push_branch(&path, &fix.branch) {
                    tracing::warn!(branch = %fix.branch, error = %err, "sandbox branch push failed");
                }
            }

            self.core.with_events(ctx, |store| {
                let mut anomaly = load_anomaly(store, &fix.anomaly_id)?;
                let current = store.fixes().get(&fix.id)?.ok_or(FixError::NotFound)?;
                validate_fix_transition(current.status, FixStatus::AppliedSandbox)?;
                validate_anomaly_transition(anomaly.status, AnomalyStatus::SandboxReady)?;

                if let Some(sha) = &commit {
                    anomaly.merge_context(fields([(context_keys::SANDBOX_COMMIT, json!(sha))]));
                }
                store.anomalies().update(
                    &anomaly.id,
                    AnomalyStatus::SandboxReady,
                    &anomaly.context,
                )?;
                let fix = store
                    .fixes()
                    .set_status(&current.id, FixStatus::AppliedSandbox)?;
                Ok((
                    fix.clone(),
                    vec![EventBody::SandboxApplied {
                        fix,
                        changed_files: outcome.changed_files.clone(),
                        commit: commit.clone(),
                    }],
                ))
            })
        })?
    }

    /// Records a change request against the proposal and resets the Fix to
    /// `pending` while the anomaly is at `PROPOSAL_READY`.
    pub fn refine_proposal(
        &self,
        ctx: &RequestContext,
        id: &FixId,
        instruction: &str,
    ) -> Result<Fix, OrchestratorError> {
        let instruction = require_instruction(instruction)?;
        let fix = self.core.with_events(ctx, |store| {
            let (fix, mut events) = require_fix_in(store, id)?;
            let mut anomaly = load_anomaly(store, &fix.anomaly_id)?;
            anomaly.push_context(
                context_keys::REFINEMENTS,
                refinement_entry(RefineStage::Proposal, instruction),
            );
            store
                .anomalies()
                .update(&anomaly.id, anomaly.status, &anomaly.context)?;

            let fix = if anomaly.status == AnomalyStatus::ProposalReady {
                validate_fix_transition(fix.status, FixStatus::Pending)?;
                let refined = Fix {
                    explanation: refined_explanation(&fix.explanation, instruction),
                    status: FixStatus::Pending,
                    updated_at: Utc::now(),
                    ..fix
                };
                store.fixes().upsert(&refined)?
            } else {
                tracing::info!(
                    fix_id = %fix.id,
                    status = %anomaly.status,
                    "proposal no longer open; refinement recorded only"
                );
                fix
            };
            events.push(EventBody::RefinementRequested {
                anomaly_id: anomaly.id.clone(),
                stage: RefineStage::Proposal,
                instruction: instruction.to_string(),
            });
            Ok((fix, events))
        })?;
        self.request_refinement(&self.core.config.refine_proposal_flow, &fix, instruction);
        Ok(fix)
    }

    /// Advisory: the instruction is recorded and handed to the refinement
    /// flow, but the sandbox and statuses are left as they are.
    pub fn refine_sandbox(
        &self,
        ctx: &RequestContext,
        id: &FixId,
        instruction: &str,
    ) -> Result<Fix, OrchestratorError> {
        let instruction = require_instruction(instruction)?;
        let fix = self.core.with_events(ctx, |store| {
            let (fix, mut events) = require_fix_in(store, id)?;
            let mut anomaly = load_anomaly(store, &fix.anomaly_id)?;
            anomaly.push_context(
                context_keys::REFINEMENTS,
                refinement_entry(RefineStage::Sandbox, instruction),
            );
            store
                .anomalies()
                .update(&anomaly.id, anomaly.status, &anomaly.context)?;
            events.push(EventBody::RefinementRequested {
                anomaly_id: anomaly.id.clone(),
                stage: RefineStage::Sandbox,
                instruction: instruction.to_string(),
            });
            Ok((fix, events))
        })?;
        tracing::info!(fix_id = %fix.id, "sandbox refinement recorded");
        self.request_refinement(&self.core.config.refine_sandbox_flow, &fix, instruction);
        Ok(fix)
    }

    fn request_refinement(&self, flow_id: &str, fix: &Fix, instruction: &str) {
        let mut inputs = Map::new();
        inputs.insert("anomalyId".to_string(), json!(fix.anomaly_id));
        inputs.insert("fixId".to_string(), json!(fix.id));
        inputs.insert("instruction".to_string(), json!(instruction));
        match self.core.dispatcher.execute_flow(flow_id, inputs) {
            Ok(execution_id) => {
                tracing::info!(fix_id = %fix.id, flow = flow_id, execution_id = %execution_id, "refinement flow queued");
            }
            Err(err) => {
                tracing::warn!(fix_id = %fix.id, flow = flow_id, error = %err, "refinement flow dispatch failed");
            }
        }
    }

    /// Merges the sandbox branch into `target` (default branch from config
    /// when `None`), pushes, and resolves the anomaly.
    pub fn merge(
        &self,
        ctx: &RequestContext,
        id: &FixId,
        target: Option<&str>,
    ) -> Result<MergeReport, OrchestratorError> {
        let target = target
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(self.core.config.default_target_branch.as_str())
            .to_string();
        let (repo, path) = self.locate(ctx, id)?;
        let token = self.core.token_for(&repo);
        let git = &self.core.git;

        self.core.locks.with_lock(&path, || -> Result<MergeReport, OrchestratorError> {
            let fix = self.require(ctx, id)?;
            validate_fix_transition(fix.status, FixStatus::Merged)?;
            let anomaly = load_anomaly(&self.core.store, &fix.anomaly_id)?;
            validate_anomaly_transition(anomaly.status, AnomalyStatus::Resolved)?;

            git.ensure_cloned(&repo.url, token, &path)?;
            let outcome = git.merge_and_push(&path, &fix.branch, &target)?;
            tracing::info!(
                fix_id = %fix.id,
                target = %target,
                commit = %outcome.merge_commit,
                "sandbox branch merged"
            );

            self.core.with_events(ctx, |store| {
                let mut anomaly = load_anomaly(store, &fix.anomaly_id)?;
                let current = store.fixes().get(&fix.id)?.ok_or(FixError::NotFound)?;
                validate_fix_transition(current.status, FixStatus::Merged)?;
                validate_anomaly_transition(anomaly.status, AnomalyStatus::Resolved)?;

                anomaly.merge_context(fields([
                    (context_keys::MERGE_COMMIT, json!(outcome.merge_commit)),
                    (context_keys::MERGED_INTO, json!(target)),
                ]));
                store
                    .anomalies()
                    .update(&anomaly.id, AnomalyStatus::Resolved, &anomaly.context)?;
                let fix = store.fixes().set_status(&current.id, FixStatus::Merged)?;
                let report = MergeReport {
                    fix: fix.clone(),
                    target: target.clone(),
                    merge_commit: outcome.merge_commit.clone(),
                    cleanup: outcome.cleanup,
                };
                Ok((
                    report,
                    vec![EventBody::FixMerged {
                        fix,
                        target: target.clone(),
                        merge_commit: outcome.merge_commit.clone(),
                    }],
                ))
            })
        })?
    }

    /// Rejects the Fix and sends the anomaly back to `ANALYZED` so a new
    /// proposal can be submitted. An applied sandbox branch is deleted on a
    /// best-effort basis.
    pub fn reject(&self, ctx: &RequestContext, id: &FixId) -> Result<Fix, OrchestratorError> {
        let fix = self.require(ctx, id)?;
        if fix.status == FixStatus::Rejected {
            return Ok(fix);
        }
        validate_fix_transition(fix.status, FixStatus::Rejected)?;

        let branch_cleanup = if fix.status == FixStatus::AppliedSandbox {
            Some(self.cleanup_sandbox(&fix)?)
        } else {
            None
        };

        self.core.with_events(ctx, |store| {
            let current = store.fixes().get(&fix.id)?.ok_or(FixError::NotFound)?;
            validate_fix_transition(current.status, FixStatus::Rejected)?;
            let anomaly = load_anomaly(store, &current.anomaly_id)?;
            if matches!(
                anomaly.status,
                AnomalyStatus::ProposalReady | AnomalyStatus::SandboxReady
            ) {
                validate_anomaly_transition(anomaly.status, AnomalyStatus::Analyzed)?;
                store
                    .anomalies()
                    .update(&anomaly.id, AnomalyStatus::Analyzed, &anomaly.context)?;
            }
            let fix = store.fixes().set_status(&current.id, FixStatus::Rejected)?;
            Ok((
                fix.clone(),
                vec![EventBody::FixRejected {
                    fix,
                    branch_cleanup,
                }],
            ))
        })
    }

    fn cleanup_sandbox(&self, fix: &Fix) -> Result<BranchCleanup, OrchestratorError> {
        let anomaly = load_anomaly(&self.core.store, &fix.anomaly_id)?;
        let Some(repo) = self.core.store.repos().get(&anomaly.repo_id)? else {
            return Ok(BranchCleanup::default());
        };
        let path = self.core.working_copy(&repo);
        if !na_git::refs::is_repository(&path) {
            tracing::warn!(path = %path.display(), "no working copy; skipping branch cleanup");
            return Ok(BranchCleanup::default());
        }
        let cleanup = self
            .core
            .locks
            .with_lock(&path, || self.core.git.delete_branch(&path, &fix.branch))?;
        Ok(cleanup)
    }

    /// Repository and working copy behind a Fix.
    fn locate(
        &self,
        ctx: &RequestContext,
        id: &FixId,
    ) -> Result<(Repository, PathBuf), OrchestratorError> {
        let fix = self.require(ctx, id)?;
        let anomaly = load_anomaly(&self.core.store, &fix.anomaly_id)?;
        let repo = load_repo(&self.core.store, &anomaly.repo_id)?;
        let path = self.core.working_copy(&repo);
        Ok((repo, path))
    }

    /// Diff of the sandbox branch against the default branch, or the stored
    /// patch when the working copy cannot produce one.
    pub fn sandbox_diff(&self, ctx: &RequestContext, id: &FixId) -> Result<String, OrchestratorError> {
        let fix = self.require(ctx, id)?;
        let anomaly = load_anomaly(&self.core.store, &fix.anomaly_id)?;
        let Some(repo) = self.core.store.repos().get(&anomaly.repo_id)? else {
            return Ok(fix.diff);
        };
        let path = self.core.working_copy(&repo);
        if !na_git::refs::is_repository(&path) {
            return Ok(fix.diff);
        }
        let base = &self.core.config.default_target_branch;
        match self.core.git.diff(&path, base, &fix.branch) {
            Ok(diff) if !diff.trim().is_empty() => Ok(diff),
            Ok(_) => Ok(fix.diff),
            Err(err) => {
                tracing::warn!(fix_id = %fix.id, error = %err, "sandbox diff failed; using stored patch");
                Ok(fix.diff)
            }
        }
    }
}

pub struct ReposApi<'a, S: Store> {
    core: &'a Orchestrator<S>,
}

impl<S: Store> ReposApi<'_, S> {
    pub fn register(
        &self,
        ctx: &RequestContext,
        input: RegisterRepositoryInput,
    ) -> Result<Repository, OrchestratorError> {
        let url = input.url.trim().to_string();
        if url.is_empty() {
            return Err(RepoError::InvalidInput {
                message: "repository url is empty".to_string(),
            }
            .into());
        }
        self.core.with_events(ctx, |store| {
            let id = input.id.clone().unwrap_or_else(RepoId::generate);
            let existing = store.repos().get(&id)?;
            let now = Utc::now();
            let repository = Repository {
                id,
                protocol: input.protocol.unwrap_or_else(|| Protocol::infer(&url)),
                credential_ref: input.credential_ref.clone(),
                verified: existing
                    .as_ref()
                    .is_some_and(|repo| repo.verified && repo.url == url),
                created_at: existing.as_ref().map_or(now, |repo| repo.created_at),
                updated_at: now,
                url: url.clone(),
            };
            let repository = store.repos().upsert(&repository)?;
            Ok((
                repository.clone(),
                vec![EventBody::RepositoryRegistered { repository }],
            ))
        })
    }

    pub fn get(&self, id: &RepoId) -> Result<Option<Repository>, OrchestratorError> {
        self.core.store.repos().get(id).map_err(OrchestratorError::from)
    }

    pub fn list(&self) -> Result<Vec<Repository>, OrchestratorError> {
        self.core.store.repos().list().map_err(OrchestratorError::from)
    }

    /// Checks connectivity, read and write access with the configured
    /// credential. Failed checks are reported, never raised.
    pub fn verify(
        &self,
        ctx: &RequestContext,
        id: &RepoId,
    ) -> Result<VerificationReport, OrchestratorError> {
        let repo = load_repo(&self.core.store, id)?;
        let token = self.core.token_for(&repo);
        let git = &self.core.git;
        let mut logs = vec![format!("verifying {} over {:?}", repo.url, repo.protocol)];
        if repo.credential_ref.is_some() && token.is_none() {
            logs.push("credential reference has no configured token".to_string());
        }

        let connection = access_check(&mut logs, "connection", || git.check_connection(&repo.url, token));
        let read = access_check(&mut logs, "read access", || git.check_read_access(&repo.url, token));
        let write = access_check(&mut logs, "write access", || git.check_write_access(&repo.url, token));
        let report = VerificationReport {
            repo_id: repo.id.clone(),
            connection,
            read,
            write,
            verified: connection && read && write,
            logs,
        };

        self.core.with_events(ctx, |store| {
            store.repos().set_verified(&repo.id, report.verified)?;
            Ok((
                report.clone(),
                vec![EventBody::RepositoryVerified {
                    report: report.clone(),
                }],
            ))
        })
    }
}

pub struct EventsApi<'a, S: Store> {
    core: &'a Orchestrator<S>,
}

impl<S: Store> EventsApi<'_, S> {
    pub fn list(
        &self,
        after: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<EventRecord>, OrchestratorError> {
        self.core.store.events().list(after, limit)
    }
}

pub struct WorkflowsApi<'a, S: Store> {
    core: &'a Orchestrator<S>,
}

impl<S: Store> WorkflowsApi<'_, S> {
    /// Records what the engine made of a queued request. The anomaly that
    /// asked for it gets the engine's execution id, or the failure, next to
    /// its `workflow_execution_id`.
    pub fn record_outcome(
        &self,
        ctx: &RequestContext,
        outcome: &DispatchOutcome,
    ) -> Result<(), OrchestratorError> {
        let anomaly_id = outcome
            .anomaly_id
            .clone()
            .and_then(|id| AnomalyId::new(id).ok());
        self.core.with_events(ctx, |store| {
            if let Some(id) = &anomaly_id {
                note_outcome(store, id, outcome)?;
            }
            let body = match &outcome.error {
                Some(error) => EventBody::WorkflowFailed {
                    anomaly_id: anomaly_id.clone(),
                    execution_id: outcome.execution_id.clone(),
                    flow: outcome.flow.clone(),
                    error: error.clone(),
                },
                None => EventBody::WorkflowStarted {
                    anomaly_id: anomaly_id.clone(),
                    execution_id: outcome.execution_id.clone(),
                    flow: outcome.flow.clone(),
                    engine_execution_id: outcome.engine_execution_id.clone(),
                },
            };
            Ok(((), vec![body]))
        })
    }

    /// Folds the workflow events recorded under `execution_id`. `None` when
    /// nothing was ever dispatched under that id.
    pub fn trace(&self, execution_id: &str) -> Result<Option<WorkflowTrace>, OrchestratorError> {
        let mut trace: Option<WorkflowTrace> = None;
        for record in self.core.store.events().for_execution(execution_id)? {
            let Ok(body) = serde_json::from_value::<EventBody>(record.body) else {
                continue;
            };
            let entry = trace.get_or_insert_with(|| WorkflowTrace {
                execution_id: execution_id.to_string(),
                ..WorkflowTrace::default()
            });
            match body {
                EventBody::WorkflowDispatched { anomaly_id, .. } => {
                    entry.anomaly_id = Some(anomaly_id);
                }
                EventBody::WorkflowStarted {
                    anomaly_id,
                    engine_execution_id,
                    ..
                } => {
                    entry.anomaly_id = anomaly_id.or(entry.anomaly_id.take());
                    entry.engine_execution_id = engine_execution_id;
                    entry.error = None;
                }
                EventBody::WorkflowFailed {
                    anomaly_id, error, ..
                } => {
                    entry.anomaly_id = anomaly_id.or(entry.anomaly_id.take());
                    entry.error = Some(error);
                }
                _ => {}
            }
        }
        Ok(trace)
    }
}

fn note_outcome<S: Store>(
    store: &S,
    id: &AnomalyId,
    outcome: &DispatchOutcome,
) -> Result<(), OrchestratorError> {
    let Some(mut anomaly) = store.anomalies().get(id)? else {
        return Ok(());
    };
    let dispatched_as = anomaly
        .context
        .get(context_keys::WORKFLOW_EXECUTION_ID)
        .and_then(Value::as_str);
    if dispatched_as != Some(outcome.execution_id.as_str()) {
        return Ok(());
    }
    let (key, value) = match (&outcome.error, &outcome.engine_execution_id) {
        (Some(error), _) => (context_keys::WORKFLOW_ERROR, json!(error)),
        (None, Some(remote)) => (context_keys::WORKFLOW_ENGINE_EXECUTION_ID, json!(remote)),
        (None, None) => return Ok(()),
    };
    anomaly.merge_context(fields([(key, value)]));
    store.anomalies().update(id, anomaly.status, &anomaly.context)?;
    Ok(())
}

fn build_event_record(
    ctx: &RequestContext,
    body: EventBody,
) -> Result<EventRecord, OrchestratorError> {
    let value = serde_json::to_value(body).map_err(|err| OrchestratorError::Internal {
        message: err.to_string(),
    })?;
    Ok(EventRecord {
        id: String::new(),
        seq: 0,
        at: Utc::now(),
        correlation_id: ctx.correlation_id.clone(),
        source: ctx.source,
        body: value,
    })
}

fn load_anomaly<S: Store>(store: &S, id: &AnomalyId) -> Result<Anomaly, OrchestratorError> {
    store
        .anomalies()
        .get(id)?
        .ok_or_else(|| OrchestratorError::from(AnomalyError::NotFound))
}

fn load_repo<S: Store>(store: &S, id: &RepoId) -> Result<Repository, OrchestratorError> {
    store
        .repos()
        .get(id)?
        .ok_or_else(|| OrchestratorError::from(RepoError::RepoNotFound))
}

fn ensure_fix_in<S: Store>(
    store: &S,
    anomaly_id: &AnomalyId,
) -> Result<(Option<Fix>, Vec<EventBody>), OrchestratorError> {
    if let Some(fix) = store.fixes().get_by_anomaly(anomaly_id)? {
        if let Some(anomaly) = store.anomalies().get(anomaly_id)? {
            if anomaly.status.expects_fix() && !statuses_consistent(anomaly.status, fix.status) {
                tracing::warn!(
                    anomaly_id = %anomaly_id,
                    anomaly_status = %anomaly.status,
                    fix_status = %fix.status,
                    "anomaly and fix statuses disagree"
                );
            }
        }
        return Ok((Some(fix), Vec::new()));
    }

    let anomaly = load_anomaly(store, anomaly_id)?;
    if !anomaly.status.expects_fix() {
        return Ok((None, Vec::new()));
    }
    let repo = load_repo(store, &anomaly.repo_id)?;
    let Some(fix) = reconstruct_fix(&anomaly, &repo_name(&repo.url), Utc::now()) else {
        return Ok((None, Vec::new()));
    };
    let fix = store.fixes().upsert(&fix)?;
    tracing::info!(anomaly_id = %anomaly_id, status = %fix.status, "reconstructed missing fix");
    Ok((Some(fix.clone()), vec![EventBody::FixReconstructed { fix }]))
}

fn require_fix_in<S: Store>(
    store: &S,
    id: &FixId,
) -> Result<(Fix, Vec<EventBody>), OrchestratorError> {
    match ensure_fix_in(store, &id.anomaly_id()) {
        Ok((Some(fix), events)) => Ok((fix, events)),
        Ok((None, _)) | Err(OrchestratorError::Anomaly(AnomalyError::NotFound)) => {
            Err(FixError::NotFound.into())
        }
        Err(err) => Err(err),
    }
}

fn require_instruction(instruction: &str) -> Result<&str, OrchestratorError> {
    let instruction = instruction.trim();
    if instruction.is_empty() {
        return Err(FixError::InvalidInput {
            message: "refinement instruction is empty".to_string(),
        }
        .into());
    }
    Ok(instruction)
}

fn refinement_entry(stage: RefineStage, instruction: &str) -> Value {
    json!({
        "stage": stage,
        "instruction": instruction,
        "at": Utc::now().to_rfc3339(),
    })
}

fn refined_explanation(explanation: &str, instruction: &str) -> String {
    if explanation.trim().is_empty() {
        format!("Refinement requested: {instruction}")
    } else {
        format!("{}\n\nRefinement requested: {instruction}", explanation.trim_end())
    }
}

fn commit_message(fix: &Fix) -> String {
    format!("fix: {}\n\nAnomaly: {}", fix.summary, fix.anomaly_id)
}

fn access_check(
    logs: &mut Vec<String>,
    label: &str,
    check: impl FnOnce() -> Result<(), BackendGitError>,
) -> bool {
    match check() {
        Ok(()) => {
            logs.push(format!("{label}: ok"));
            true
        }
        Err(err) => {
            tracing::warn!(check = label, error = %err, "repository access check failed");
            logs.push(format!("{label}: failed: {err}"));
            false
        }
    }
}

fn fields<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}
