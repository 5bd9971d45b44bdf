// src/agents/fed_register.rs
//
// Federal Register: US regulatory notices on textile trade, stored as news
// records. The API is free and keyless; results carry a real document URL, so
// dedup is always by URL here.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::agents::{AgentContext, AgentOutcome, SourceAgent, SourceId};
use crate::fetch::RetryingFetcher;
use crate::store::status::SourceStatusTracker;
use crate::store::types::{NewsCandidate, NewsCategory, Upsert};
use crate::store::RecordStore;

const DEFAULT_BASE_URL: &str = "https://www.federalregister.gov/api/v1";

/// Summaries are capped the way the upstream abstracts are displayed.
const SUMMARY_CAP: usize = 500;

pub struct FedRegisterAgent {
    store: Arc<RecordStore>,
    status: Arc<SourceStatusTracker>,
    fetcher: RetryingFetcher,
    base_url: String,
}

impl FedRegisterAgent {
    pub fn new(ctx: &AgentContext) -> Self {
        Self {
            store: ctx.store.clone(),
            status: ctx.status.clone(),
            fetcher: RetryingFetcher::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the agent at a different endpoint (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch_docs(
        &self,
        term: &str,
        since_days: i64,
        per_page: u32,
        what: &str,
        outcome: &mut AgentOutcome,
    ) {
        let since = (Utc::now() - Duration::days(since_days))
            .format("%Y-%m-%d")
            .to_string();
        let params = vec![
            ("conditions[term]".to_string(), term.to_string()),
            ("conditions[publication_date][gte]".to_string(), since),
            ("fields[]".to_string(), "title".to_string()),
            ("fields[]".to_string(), "abstract".to_string()),
            ("fields[]".to_string(), "document_number".to_string()),
            ("fields[]".to_string(), "html_url".to_string()),
            ("fields[]".to_string(), "publication_date".to_string()),
            ("fields[]".to_string(), "type".to_string()),
            ("fields[]".to_string(), "agencies".to_string()),
            ("per_page".to_string(), per_page.to_string()),
            ("order".to_string(), "newest".to_string()),
        ];

        let url = format!("{}/documents.json", self.base_url);
        let result = self.fetcher.fetch(&url, &params, &[]).await;
        self.status.increment_calls(self.source().as_str(), 1);

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(sub_fetch = what, error = %e, "Federal Register fetch failed");
                outcome.failures.push(format!("{what} fetch: {e}"));
                return;
            }
        };
        let data: serde_json::Value = match resp.json() {
            Ok(v) => v,
            Err(e) => {
                outcome.failures.push(format!("{what} response: {e}"));
                return;
            }
        };
        self.store_results(&data, outcome);
    }

    fn store_results(&self, data: &serde_json::Value, outcome: &mut AgentOutcome) {
        let Some(results) = data.get("results").and_then(|r| r.as_array()) else {
            return;
        };

        for doc in results {
            let src_url = doc
                .get("html_url")
                .and_then(|u| u.as_str())
                .unwrap_or_default();
            if src_url.is_empty() {
                continue;
            }
            let title = doc
                .get("title")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string();
            let abstract_text = doc
                .get("abstract")
                .and_then(|a| a.as_str())
                .unwrap_or_default();

            let summary = if abstract_text.is_empty() {
                title.clone()
            } else {
                abstract_text.chars().take(SUMMARY_CAP).collect()
            };

            let mut tags: Vec<String> = doc
                .get("agencies")
                .and_then(|a| a.as_array())
                .map(|agencies| {
                    agencies
                        .iter()
                        .filter_map(|a| a.get("name").and_then(|n| n.as_str()))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            tags.extend(
                ["textile", "etats-unis", "reglementation"]
                    .iter()
                    .map(|s| s.to_string()),
            );

            let published_at = doc
                .get("publication_date")
                .and_then(|d| d.as_str())
                .and_then(|s| chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc());

            let candidate = NewsCandidate {
                title,
                summary,
                source_url: Some(src_url.to_string()),
                source_name: "Federal Register".to_string(),
                category: NewsCategory::Regulatory,
                tags,
                published_at,
                relevance_score: 0.7,
            };
            if self.store.upsert_news(candidate, "federal_register") == Upsert::Inserted {
                outcome.records += 1;
            }
        }
    }
}

#[async_trait]
impl SourceAgent for FedRegisterAgent {
    fn source(&self) -> SourceId {
        SourceId::FederalRegister
    }

    async fn fetch_data(&self) -> AgentOutcome {
        let mut outcome = AgentOutcome::default();
        self.fetch_docs(
            "textile trade apparel import quota tariff",
            60,
            50,
            "textile docs",
            &mut outcome,
        )
        .await;
        self.fetch_docs(
            "Morocco textile apparel trade antidumping",
            90,
            25,
            "Morocco docs",
            &mut outcome,
        )
        .await;
        tracing::info!(records = outcome.records, "Federal Register fetch complete");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::store::status::SourceStatusTracker;

    fn agent_with_store() -> (FedRegisterAgent, Arc<RecordStore>) {
        let store = Arc::new(RecordStore::in_memory());
        let ctx = AgentContext {
            store: store.clone(),
            status: Arc::new(SourceStatusTracker::in_memory()),
            settings: Arc::new(Settings::default()),
        };
        (FedRegisterAgent::new(&ctx), store)
    }

    #[test]
    fn results_without_url_are_skipped() {
        let (agent, store) = agent_with_store();
        let data = serde_json::json!({
            "results": [
                {"title": "Quota adjustment", "html_url": "https://fr.example/1",
                 "abstract": "Short abstract", "publication_date": "2025-02-10",
                 "agencies": [{"name": "ITA"}]},
                {"title": "No URL here", "abstract": "dropped"}
            ]
        });
        let mut outcome = AgentOutcome::default();
        agent.store_results(&data, &mut outcome);
        assert_eq!(outcome.records, 1);
        assert_eq!(store.news_count(), 1);

        let rec = &store.snapshot_news()[0];
        assert_eq!(rec.category, NewsCategory::Regulatory);
        assert!(rec.tags.contains(&"ITA".to_string()));
        assert!(rec.tags.contains(&"reglementation".to_string()));
    }

    #[test]
    fn refetch_does_not_duplicate() {
        let (agent, store) = agent_with_store();
        let data = serde_json::json!({
            "results": [{"title": "Rule", "html_url": "https://fr.example/2", "abstract": "a"}]
        });
        let mut o1 = AgentOutcome::default();
        agent.store_results(&data, &mut o1);
        let mut o2 = AgentOutcome::default();
        agent.store_results(&data, &mut o2);
        assert_eq!(o1.records, 1);
        assert_eq!(o2.records, 0);
        assert_eq!(store.news_count(), 1);
    }
}
