// src/store/runs.rs
//
// Pipeline run history. One document per orchestrator invocation, written
// exactly once at run end; there is no partial-run visibility.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{load_collection, write_collection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
    Skipped,
}

/// Outcome of one agent within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunResult {
    pub source: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A contained phase failure, recorded in place of the phase's payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseError {
    pub status: String,
    pub message: String,
}

impl PhaseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
        }
    }
}

/// Success payload or captured error; no phase failure escapes the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PhaseOutcome<T> {
    Ok(T),
    Error(PhaseError),
}

impl<T> PhaseOutcome<T> {
    pub fn is_error(&self) -> bool {
        matches!(self, PhaseOutcome::Error(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeriveSummary {
    pub segments_created: u64,
    pub size_entries_created: u64,
    pub status: String,
}

// deny_unknown_fields keeps the untagged PhaseOutcome from reading an error
// payload ({status, message}) as a bare ResetSummary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResetSummary {
    pub status: String,
}

/// Per-framework regeneration status ("success" or "error: …").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkSummary {
    pub porter: String,
    pub pestel: String,
    pub tam_sam_som: String,
}

/// Map from phase name to outcome. The trade-agent phase outcome is itself a
/// list of per-agent outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResults {
    pub trade_agents: Vec<AgentRunResult>,
    pub news_agent: AgentRunResult,
    pub market_research: AgentRunResult,
    pub derive_data: PhaseOutcome<DeriveSummary>,
    pub frameworks: PhaseOutcome<FrameworkSummary>,
    pub reset_counters: PhaseOutcome<ResetSummary>,
}

/// One orchestrator invocation. `status` is always "completed": failure
/// containment is at the phase level, so callers inspect `phase_results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub status: String,
    pub phase_results: PhaseResults,
}

/// Append-only run history, newest last in storage.
pub struct RunLog {
    inner: RwLock<Vec<PipelineRun>>,
    path: Option<PathBuf>,
}

impl RunLog {
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(Vec::new()),
            path: None,
        }
    }

    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join("pipeline_runs.json");
        let runs: Vec<PipelineRun> = load_collection(&path)?;
        Ok(Self {
            inner: RwLock::new(runs),
            path: Some(path),
        })
    }

    /// Append one finished run and persist the log in the same call.
    pub fn record(&self, run: PipelineRun) -> Result<()> {
        let mut g = self.inner.write().expect("run log lock poisoned");
        g.push(run);
        if let Some(path) = &self.path {
            write_collection(path, &*g)?;
        }
        Ok(())
    }

    /// Most recent `n` runs, newest first.
    pub fn recent(&self, n: usize) -> Vec<PipelineRun> {
        let g = self.inner.read().expect("run log lock poisoned");
        g.iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("run log lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
