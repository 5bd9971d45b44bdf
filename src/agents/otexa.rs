// src/agents/otexa.rs
//
// OTEXA / trade.gov: US textile trade data and news, discovered through
// web-search LLM extraction rather than a structured endpoint (the OTEXA data
// pages have no API). Articles always need a real source URL here.

use std::sync::Arc;

use async_trait::async_trait;

use crate::agents::search::{
    extract_array, field_date, field_f64, field_str, field_tags, EngineStack, ParseOutcome,
};
use crate::agents::{AgentContext, AgentOutcome, SourceAgent, SourceId};
use crate::store::status::SourceStatusTracker;
use crate::store::types::{NewsCandidate, NewsCategory, Upsert};
use crate::store::RecordStore;

const SYSTEM_PROMPT: &str = "\
Tu es un analyste specialise dans le commerce international du textile. \
Effectue une recherche web et retourne les resultats au format JSON strict. \
Retourne UNIQUEMENT un JSON valide sans texte autour.";

const NEWS_PROMPT: &str = "\
Search the website https://www.trade.gov for the latest textile and apparel \
trade news, regulations, and updates related to Morocco or North Africa. \
Also check https://www.trade.gov/otexa-trade-data-page for any recent data releases. \
Return a JSON object with key 'articles' containing an array of up to 8 articles. \
Each article must have: title, summary (2-3 sentences in French), source_url, \
source_name, category (one of: regulatory, market, policy, trade_agreement, industry), \
tags (array of keywords), published_date (YYYY-MM-DD if known), \
relevance_score (0.0-1.0 for Morocco textile sector relevance).";

const DATA_PROMPT: &str = "\
Search OTEXA (https://www.trade.gov/otexa) and US trade regulation sites for \
the latest US textile import/export data, quotas, tariff changes, and anti-dumping \
measures affecting Morocco or the Maghreb region. \
Return a JSON object with key 'articles' containing up to 5 results. \
Each must have: title, summary (in French), source_url, source_name, \
category, tags, published_date, relevance_score.";

pub struct OtexaAgent {
    store: Arc<RecordStore>,
    status: Arc<SourceStatusTracker>,
    engines: EngineStack,
}

impl OtexaAgent {
    pub fn new(ctx: &AgentContext) -> Self {
        Self {
            store: ctx.store.clone(),
            status: ctx.status.clone(),
            engines: EngineStack::from_settings(&ctx.settings),
        }
    }

    /// Inject engines directly (tests).
    pub fn with_engines(ctx: &AgentContext, engines: EngineStack) -> Self {
        Self {
            store: ctx.store.clone(),
            status: ctx.status.clone(),
            engines,
        }
    }

    async fn search_and_store(&self, prompt: &str, what: &str, outcome: &mut AgentOutcome) {
        let (calls, hit) = self.engines.search_with_fallback(SYSTEM_PROMPT, prompt).await;
        self.status.increment_calls(self.source().as_str(), calls);

        let Some((engine, raw)) = hit else {
            tracing::error!(sub_fetch = what, "OTEXA search failed on all engines");
            outcome.failures.push(format!("{what}: all engines failed"));
            return;
        };
        let items = match extract_array(&raw, "articles") {
            ParseOutcome::Success(items) => items,
            ParseOutcome::Empty => return,
            ParseOutcome::Malformed(msg) => {
                tracing::error!(sub_fetch = what, engine, "{msg}");
                outcome.failures.push(format!("{what}: {msg}"));
                return;
            }
        };

        for item in &items {
            let src_url = field_str(item, "source_url");
            if src_url.is_empty() {
                continue;
            }
            let mut tags = field_tags(item, "tags");
            tags.extend(["otexa", "etats-unis"].iter().map(|s| s.to_string()));
            let source_name = {
                let name = field_str(item, "source_name");
                if name.is_empty() {
                    "OTEXA / trade.gov".to_string()
                } else {
                    name
                }
            };
            let candidate = NewsCandidate {
                title: field_str(item, "title"),
                summary: field_str(item, "summary"),
                source_url: Some(src_url),
                source_name,
                category: NewsCategory::parse_lenient(&field_str(item, "category")),
                tags,
                published_at: field_date(item, "published_date"),
                relevance_score: field_f64(item, "relevance_score", 0.6),
            };
            if candidate.title.is_empty() {
                continue;
            }
            if self.store.upsert_news(candidate, engine) == Upsert::Inserted {
                outcome.records += 1;
            }
        }
    }
}

#[async_trait]
impl SourceAgent for OtexaAgent {
    fn source(&self) -> SourceId {
        SourceId::OtexaTradegov
    }

    async fn fetch_data(&self) -> AgentOutcome {
        if self.engines.is_empty() {
            tracing::warn!("no search engine credential configured, skipping");
            return AgentOutcome::skipped("no search engine credential configured");
        }

        let mut outcome = AgentOutcome::default();
        self.search_and_store(NEWS_PROMPT, "trade news", &mut outcome)
            .await;
        self.search_and_store(DATA_PROMPT, "data insights", &mut outcome)
            .await;
        tracing::info!(records = outcome.records, "OTEXA fetch complete");
        outcome
    }
}
