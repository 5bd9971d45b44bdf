// src/pipeline.rs
//
// Daily pipeline orchestrator. Runs the six phases in fixed order, contains
// every failure at the phase (or agent) level, and persists exactly one run
// document at the end. The run's own status is always "completed"; callers
// inspect phase_results for per-phase detail.

use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use tokio::sync::Semaphore;

use crate::agents::{build_agent, AgentContext, SourceAgent, SourceId};
use crate::derive;
use crate::frameworks::FrameworkCache;
use crate::store::runs::{
    AgentRunResult, PhaseError, PhaseOutcome, PhaseResults, PipelineRun, ResetSummary, RunLog,
    RunStatus,
};
use crate::store::status::SourceStatusTracker;

/// Concurrency bound for the parallel trade-agent phase.
pub const WORKER_POOL_SIZE: usize = 4;

type AgentFactory = Arc<dyn Fn(SourceId, &AgentContext) -> Arc<dyn SourceAgent> + Send + Sync>;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Completed pipeline runs.");
        describe_counter!("agent_records_total", "Records stored by agents.");
        describe_counter!("agent_failures_total", "Agent runs that ended in error.");
        describe_counter!("fetch_retries_total", "HTTP attempts that were retried.");
        describe_gauge!(
            "pipeline_last_run_ts",
            "Unix ts when the pipeline last completed."
        );
    });
}

pub struct PipelineOrchestrator {
    ctx: AgentContext,
    run_log: Arc<RunLog>,
    frameworks: Arc<FrameworkCache>,
    factory: AgentFactory,
}

impl PipelineOrchestrator {
    pub fn new(ctx: AgentContext, run_log: Arc<RunLog>, frameworks: Arc<FrameworkCache>) -> Self {
        Self {
            ctx,
            run_log,
            frameworks,
            factory: Arc::new(|id, ctx| build_agent(id, ctx)),
        }
    }

    /// Replace the source→agent dispatch table (tests).
    pub fn with_agent_factory(
        mut self,
        factory: impl Fn(SourceId, &AgentContext) -> Arc<dyn SourceAgent> + Send + Sync + 'static,
    ) -> Self {
        self.factory = Arc::new(factory);
        self
    }

    pub fn run_log(&self) -> Arc<RunLog> {
        self.run_log.clone()
    }

    /// Execute one full pipeline run. Never fails: every phase error lands in
    /// the run document instead.
    pub async fn run(&self) -> PipelineRun {
        ensure_metrics_described();

        let started_at = Utc::now();
        let run_id = started_at.format("%Y%m%d_%H%M%S").to_string();
        tracing::info!(%run_id, "starting daily pipeline");

        // ── Phase 1: trade agents, in parallel ──────────────────────
        tracing::info!(%run_id, "phase 1: trade data agents");
        let semaphore = Arc::new(Semaphore::new(WORKER_POOL_SIZE));
        let mut handles = Vec::with_capacity(SourceId::TRADE_PHASE.len());
        for id in SourceId::TRADE_PHASE {
            let agent = (self.factory)(id, &self.ctx);
            let status = self.ctx.status.clone();
            let sem = semaphore.clone();
            handles.push((
                id,
                tokio::spawn(async move {
                    let _permit = sem.acquire_owned().await.expect("semaphore closed");
                    run_agent_job(agent, &status).await
                }),
            ));
        }
        // join-all: collect every agent's result, panics included
        let mut trade_agents = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(source = %id, error = %e, "trade agent task died");
                    AgentRunResult {
                        source: id.to_string(),
                        status: RunStatus::Error,
                        records: None,
                        message: Some(format!("agent task failed: {e}")),
                    }
                }
            };
            trade_agents.push(result);
        }

        // ── Phase 2: news agent ─────────────────────────────────────
        tracing::info!(%run_id, "phase 2: news agent");
        let news_agent = self.run_agent_phase(SourceId::NewsWatcher).await;

        // ── Phase 3: market research agent ──────────────────────────
        tracing::info!(%run_id, "phase 3: market research agent");
        let market_research = self.run_agent_phase(SourceId::MarketResearch).await;

        // ── Phase 4: derive market data ─────────────────────────────
        tracing::info!(%run_id, "phase 4: derive market data");
        let store = self.ctx.store.clone();
        let derive_data = match tokio::task::spawn_blocking(move || derive::run(&store)).await {
            Ok(summary) => PhaseOutcome::Ok(summary),
            Err(e) => PhaseOutcome::Error(PhaseError::new(format!("derive task failed: {e}"))),
        };

        // ── Phase 5: framework regeneration ─────────────────────────
        tracing::info!(%run_id, "phase 5: framework regeneration");
        let store = self.ctx.store.clone();
        let cache = self.frameworks.clone();
        let frameworks =
            match tokio::task::spawn_blocking(move || cache.regenerate_all(&store)).await {
                Ok(summary) => PhaseOutcome::Ok(summary),
                Err(e) => {
                    PhaseOutcome::Error(PhaseError::new(format!("framework task failed: {e}")))
                }
            };

        // ── Phase 6: reset daily counters ───────────────────────────
        tracing::info!(%run_id, "phase 6: reset counters");
        self.ctx.status.reset_daily_counters();
        let reset_counters = PhaseOutcome::Ok(ResetSummary {
            status: "counters_reset".to_string(),
        });

        // ── Persist the run document, exactly once ──────────────────
        let completed_at = Utc::now();
        let duration_seconds =
            (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        let run = PipelineRun {
            id: run_id.clone(),
            started_at,
            completed_at,
            duration_seconds,
            status: "completed".to_string(),
            phase_results: PhaseResults {
                trade_agents,
                news_agent,
                market_research,
                derive_data,
                frameworks,
                reset_counters,
            },
        };
        if let Err(e) = self.run_log.record(run.clone()) {
            tracing::error!(%run_id, error = %e, "failed to persist pipeline run");
        }
        if let Err(e) = self.ctx.store.save() {
            tracing::error!(%run_id, error = %e, "failed to snapshot record store");
        }
        if let Err(e) = self.ctx.status.save() {
            tracing::error!(%run_id, error = %e, "failed to snapshot source status");
        }

        counter!("pipeline_runs_total").increment(1);
        gauge!("pipeline_last_run_ts").set(completed_at.timestamp() as f64);
        tracing::info!(%run_id, duration_seconds, "daily pipeline completed");
        run
    }

    /// Run one source agent immediately, outside the daily cadence.
    pub async fn run_single_agent(&self, id: SourceId) -> AgentRunResult {
        let result = self.run_agent_phase(id).await;
        if let Err(e) = self.ctx.store.save() {
            tracing::error!(source = %id, error = %e, "failed to snapshot record store");
        }
        if let Err(e) = self.ctx.status.save() {
            tracing::error!(source = %id, error = %e, "failed to snapshot source status");
        }
        result
    }

    async fn run_agent_phase(&self, id: SourceId) -> AgentRunResult {
        let agent = (self.factory)(id, &self.ctx);
        let status = self.ctx.status.clone();
        match tokio::spawn(async move { run_agent_job(agent, &status).await }).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(source = %id, error = %e, "agent task died");
                AgentRunResult {
                    source: id.to_string(),
                    status: RunStatus::Error,
                    records: None,
                    message: Some(format!("agent task failed: {e}")),
                }
            }
        }
    }
}

/// Run one agent and fold its outcome into the status tracker: active with the
/// record count, error with the joined failure messages, or untouched when the
/// agent skipped (quota gate, missing credential).
pub async fn run_agent_job(
    agent: Arc<dyn SourceAgent>,
    status: &SourceStatusTracker,
) -> AgentRunResult {
    let source = agent.source();
    let outcome = agent.fetch_data().await;

    if let Some(reason) = outcome.skipped {
        tracing::info!(source = %source, %reason, "agent skipped");
        return AgentRunResult {
            source: source.to_string(),
            status: RunStatus::Skipped,
            records: Some(0),
            message: Some(reason),
        };
    }

    if outcome.is_error() {
        let message = outcome.failures.join("; ");
        status.mark_error(source.as_str(), &message);
        counter!("agent_failures_total").increment(1);
        tracing::error!(source = %source, %message, "agent failed");
        return AgentRunResult {
            source: source.to_string(),
            status: RunStatus::Error,
            records: None,
            message: Some(message),
        };
    }

    status.mark_active(source.as_str(), outcome.records);
    counter!("agent_records_total").increment(outcome.records);
    tracing::info!(source = %source, records = outcome.records, "agent finished");
    let message = if outcome.failures.is_empty() {
        None
    } else {
        Some(format!(
            "partial: {} sub-fetch failure(s): {}",
            outcome.failures.len(),
            outcome.failures.join("; ")
        ))
    };
    AgentRunResult {
        source: source.to_string(),
        status: RunStatus::Success,
        records: Some(outcome.records),
        message,
    }
}
