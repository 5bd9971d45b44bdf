// src/agents/mod.rs
pub mod comtrade;
pub mod eurostat;
pub mod fed_register;
pub mod jsonstat;
pub mod otexa;
pub mod research;
pub mod search;
pub mod watcher;

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::error::UnknownSource;
use crate::store::status::SourceStatusTracker;
use crate::store::RecordStore;

/// Closed set of upstream identities. Dispatch goes through [`build_agent`];
/// unknown names fail with a typed error instead of a silent no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    Eurostat,
    UnComtrade,
    FederalRegister,
    OtexaTradegov,
    NewsWatcher,
    MarketResearch,
}

impl SourceId {
    pub const ALL: [SourceId; 6] = [
        SourceId::Eurostat,
        SourceId::UnComtrade,
        SourceId::FederalRegister,
        SourceId::OtexaTradegov,
        SourceId::NewsWatcher,
        SourceId::MarketResearch,
    ];

    /// Agents run concurrently in the pipeline's first phase.
    pub const TRADE_PHASE: [SourceId; 4] = [
        SourceId::Eurostat,
        SourceId::UnComtrade,
        SourceId::FederalRegister,
        SourceId::OtexaTradegov,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Eurostat => "eurostat",
            SourceId::UnComtrade => "un_comtrade",
            SourceId::FederalRegister => "federal_register",
            SourceId::OtexaTradegov => "otexa_tradegov",
            SourceId::NewsWatcher => "news_watcher",
            SourceId::MarketResearch => "market_research",
        }
    }
}

impl FromStr for SourceId {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eurostat" => Ok(SourceId::Eurostat),
            "un_comtrade" => Ok(SourceId::UnComtrade),
            "federal_register" => Ok(SourceId::FederalRegister),
            "otexa_tradegov" => Ok(SourceId::OtexaTradegov),
            "news_watcher" => Ok(SourceId::NewsWatcher),
            "market_research" => Ok(SourceId::MarketResearch),
            other => Err(UnknownSource(other.to_string())),
        }
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one agent run produced. Sub-fetch and per-record errors are folded in
/// here; `fetch_data` itself never fails.
#[derive(Debug, Clone, Default)]
pub struct AgentOutcome {
    /// Records handed to the store (upserts for trade sources, new articles
    /// for news sources).
    pub records: u64,
    /// Sub-fetch or per-item failure notes, in occurrence order.
    pub failures: Vec<String>,
    /// Set when the agent declined to fetch at all (soft quota, missing
    /// credential). A skipped run leaves the source status untouched.
    pub skipped: Option<String>,
}

impl AgentOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            skipped: Some(reason.into()),
            ..Default::default()
        }
    }

    /// A run with nothing stored and at least one failure counts as an error.
    pub fn is_error(&self) -> bool {
        self.skipped.is_none() && self.records == 0 && !self.failures.is_empty()
    }
}

/// One upstream fetcher: pulls from its provider, normalizes into the shared
/// record model, and delegates every record to the store.
#[async_trait]
pub trait SourceAgent: Send + Sync {
    fn source(&self) -> SourceId;

    /// Never fails; internal errors are captured in the outcome so one agent
    /// cannot abort its siblings.
    async fn fetch_data(&self) -> AgentOutcome;
}

/// Shared dependencies handed to every agent.
#[derive(Clone)]
pub struct AgentContext {
    pub store: Arc<RecordStore>,
    pub status: Arc<SourceStatusTracker>,
    pub settings: Arc<Settings>,
}

/// Compile-time source-to-agent dispatch table.
pub fn build_agent(id: SourceId, ctx: &AgentContext) -> Arc<dyn SourceAgent> {
    match id {
        SourceId::Eurostat => Arc::new(eurostat::EurostatAgent::new(ctx)),
        SourceId::UnComtrade => Arc::new(comtrade::ComtradeAgent::new(ctx)),
        SourceId::FederalRegister => Arc::new(fed_register::FedRegisterAgent::new(ctx)),
        SourceId::OtexaTradegov => Arc::new(otexa::OtexaAgent::new(ctx)),
        SourceId::NewsWatcher => Arc::new(watcher::WatcherAgent::new(ctx)),
        SourceId::MarketResearch => Arc::new(research::ResearchAgent::new(ctx)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_ids_roundtrip_through_strings() {
        for id in SourceId::ALL {
            assert_eq!(id.as_str().parse::<SourceId>().unwrap(), id);
        }
        assert!("not_a_source".parse::<SourceId>().is_err());
    }

    #[test]
    fn outcome_error_classification() {
        let ok = AgentOutcome {
            records: 3,
            failures: vec!["one bad row".into()],
            skipped: None,
        };
        assert!(!ok.is_error());

        let err = AgentOutcome {
            records: 0,
            failures: vec!["world fetch: network error".into()],
            skipped: None,
        };
        assert!(err.is_error());

        let skip = AgentOutcome::skipped("no API key configured");
        assert!(!skip.is_error());
    }
}
