// src/agents/research.rs
//
// Market-intelligence agent: competitive events and strategic insights for the
// Moroccan textile sector, discovered through the same engine stack as the
// news watcher. Results normalize into the news/insight record family; the
// insight kind travels in the tags.

use std::sync::Arc;

use async_trait::async_trait;

use crate::agents::search::{
    extract_array, field_date, field_str, field_tags, EngineStack, ParseOutcome,
};
use crate::agents::{AgentContext, AgentOutcome, SourceAgent, SourceId};
use crate::store::status::SourceStatusTracker;
use crate::store::types::{NewsCandidate, NewsCategory, Upsert};
use crate::store::RecordStore;

const EVENT_SYSTEM: &str = "\
Tu es un analyste specialise dans le secteur textile marocain. \
Recherche les evenements recents: investissements, M&A, partenariats, expansions. \
Pour chaque evenement, retourne un JSON strict avec:
- \"event_type\": un parmi [m_and_a, partnership, expansion, regulation, investment]
- \"company_name\": entreprise concernee
- \"title\": titre de l'evenement
- \"description_fr\": description en 2-3 phrases
- \"event_date\": date si disponible (YYYY-MM-DD)
- \"source_url\": URL source
- \"source_name\": nom du media

Retourne un objet JSON avec une cle \"events\" contenant un tableau. \
Maximum 5 resultats. UNIQUEMENT du JSON valide.";

const INSIGHT_SYSTEM: &str = "\
Tu es un consultant senior en strategie textile. \
A partir des resultats de recherche, identifie les tendances cles, risques, \
opportunites et defis pour le secteur textile marocain. \
Pour chaque insight, retourne un JSON strict avec:
- \"category\": un parmi [trend, risk, opportunity, challenge, driver]
- \"title\": titre court
- \"narrative_fr\": analyse detaillee en 3-5 phrases en francais
- \"droc_type\": un parmi [driver, restraint, opportunity, challenge]
- \"tags\": liste de mots-cles

Retourne un objet JSON avec une cle \"insights\" contenant un tableau. \
Maximum 5 resultats. UNIQUEMENT du JSON valide.";

const EVENT_QUERIES: [&str; 3] = [
    "Investissements usines textile Maroc 2024 2025 2026 nouvelles zones industrielles",
    "Morocco textile M&A partnerships joint ventures nearshoring",
    "Accords commerciaux textile Maroc Europe expansion usine",
];

const INSIGHT_QUERIES: [&str; 5] = [
    "Parts de marche textile habillement Maroc 2024 2025",
    "Morocco textile market share breakdown by company segment",
    "Marche textile Maroc taille valeur croissance previsions",
    "Segmentation marche textile Maroc denim tricot tisse fibres",
    "Morocco textile product categories breakdown export import shares",
];

const VALID_EVENT_TYPES: [&str; 5] =
    ["m_and_a", "partnership", "expansion", "regulation", "investment"];
const VALID_INSIGHT_KINDS: [&str; 5] = ["trend", "risk", "opportunity", "challenge", "driver"];
const VALID_DROC_TYPES: [&str; 4] = ["driver", "restraint", "opportunity", "challenge"];

pub struct ResearchAgent {
    store: Arc<RecordStore>,
    status: Arc<SourceStatusTracker>,
    engines: EngineStack,
}

impl ResearchAgent {
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

    async fn search(
        &self,
        system_prompt: &str,
        query: &str,
        key: &str,
        outcome: &mut AgentOutcome,
    ) -> Vec<serde_json::Value> {
        let (calls, hit) = self.engines.search_with_fallback(system_prompt, query).await;
        self.status.increment_calls(self.source().as_str(), calls);

        let Some((engine, raw)) = hit else {
            outcome
                .failures
                .push(format!("query '{}': all engines failed", truncate(query, 40)));
            return Vec::new();
        };
        match extract_array(&raw, key) {
            ParseOutcome::Success(items) => items
                .into_iter()
                .map(|mut v| {
                    if let Some(obj) = v.as_object_mut() {
                        obj.insert("_engine".to_string(), engine.into());
                    }
                    v
                })
                .collect(),
            ParseOutcome::Empty => Vec::new(),
            ParseOutcome::Malformed(msg) => {
                tracing::warn!(engine, query = %truncate(query, 40), "{msg}");
                outcome
                    .failures
                    .push(format!("query '{}': {msg}", truncate(query, 40)));
                Vec::new()
            }
        }
    }

    fn store_event(&self, item: &serde_json::Value, outcome: &mut AgentOutcome) {
        let title = field_str(item, "title");
        if title.is_empty() {
            return;
        }
        let event_type = {
            let t = field_str(item, "event_type");
            if VALID_EVENT_TYPES.contains(&t.as_str()) {
                t
            } else {
                "investment".to_string()
            }
        };
        let mut tags = vec!["evenement".to_string(), event_type];
        let company = field_str(item, "company_name");
        if !company.is_empty() {
            tags.push(company);
        }
        let engine = field_str(item, "_engine");
        let candidate = NewsCandidate {
            title,
            summary: field_str(item, "description_fr"),
            source_url: Some(field_str(item, "source_url")).filter(|u| !u.is_empty()),
            source_name: {
                let name = field_str(item, "source_name");
                if name.is_empty() {
                    format!("Veille strategique ({engine})")
                } else {
                    name
                }
            },
            category: NewsCategory::Industry,
            tags,
            published_at: field_date(item, "event_date"),
            relevance_score: 0.6,
        };
        if self.store.upsert_news(candidate, &engine) == Upsert::Inserted {
            outcome.records += 1;
        }
    }

    fn store_insight(&self, item: &serde_json::Value, outcome: &mut AgentOutcome) {
        let title = field_str(item, "title");
        if title.is_empty() {
            return;
        }
        let kind = {
            let k = field_str(item, "category");
            if VALID_INSIGHT_KINDS.contains(&k.as_str()) {
                k
            } else {
                "trend".to_string()
            }
        };
        let mut tags = vec!["insight".to_string(), kind];
        let droc = field_str(item, "droc_type");
        if VALID_DROC_TYPES.contains(&droc.as_str()) {
            tags.push(droc);
        }
        tags.extend(field_tags(item, "tags"));

        let engine = field_str(item, "_engine");
        let candidate = NewsCandidate {
            title,
            summary: field_str(item, "narrative_fr"),
            source_url: None,
            source_name: format!("Veille strategique ({engine})"),
            category: NewsCategory::Market,
            tags,
            published_at: None,
            relevance_score: 0.5,
        };
        if self.store.upsert_news(candidate, &engine) == Upsert::Inserted {
            outcome.records += 1;
        }
    }
}

#[async_trait]
impl SourceAgent for ResearchAgent {
    fn source(&self) -> SourceId {
        SourceId::MarketResearch
    }

    async fn fetch_data(&self) -> AgentOutcome {
        if self.engines.is_empty() {
            tracing::warn!("no search engine credential configured, skipping");
            return AgentOutcome::skipped("no search engine credential configured");
        }

        let mut outcome = AgentOutcome::default();

        for query in EVENT_QUERIES {
            let items = self.search(EVENT_SYSTEM, query, "events", &mut outcome).await;
            for item in &items {
                self.store_event(item, &mut outcome);
            }
        }

        for query in INSIGHT_QUERIES {
            let items = self
                .search(INSIGHT_SYSTEM, query, "insights", &mut outcome)
                .await;
            for item in &items {
                self.store_insight(item, &mut outcome);
            }
        }

        tracing::info!(records = outcome.records, "market research complete");
        outcome
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::search::SearchEngine;
    use crate::config::Settings;

    struct KeyedEngine;

    #[async_trait::async_trait]
    impl SearchEngine for KeyedEngine {
        fn name(&self) -> &'static str {
            "openai"
        }
        async fn search(&self, system_prompt: &str, _q: &str) -> anyhow::Result<String> {
            if system_prompt.contains("\"events\"") {
                Ok(r#"{"events": [{"title": "New plant in Tanger", "event_type": "expansion",
                    "company_name": "Acme Textiles", "description_fr": "d",
                    "source_url": "https://news.example/e1"}]}"#
                    .to_string())
            } else {
                Ok(r#"{"insights": [{"title": "Nearshoring accelere", "category": "trend",
                    "droc_type": "driver", "narrative_fr": "n", "tags": ["ue"]}]}"#
                    .to_string())
            }
        }
    }

    #[tokio::test]
    async fn events_and_insights_land_in_news_family() {
        let store = Arc::new(RecordStore::in_memory());
        let ctx = AgentContext {
            store: store.clone(),
            status: Arc::new(SourceStatusTracker::in_memory()),
            settings: Arc::new(Settings::default()),
        };
        let agent = ResearchAgent::with_engines(
            &ctx,
            EngineStack::from_engines(vec![Box::new(KeyedEngine)]),
        );
        let outcome = agent.fetch_data().await;
        // one distinct event (by URL) + one distinct insight (by title)
        assert_eq!(outcome.records, 2);
        assert_eq!(store.news_count(), 2);

        let news = store.snapshot_news();
        let event = news.iter().find(|n| n.title.contains("Tanger")).unwrap();
        assert!(event.tags.contains(&"expansion".to_string()));
        assert!(event.tags.contains(&"Acme Textiles".to_string()));

        let insight = news.iter().find(|n| n.title.contains("Nearshoring")).unwrap();
        assert_eq!(insight.category, NewsCategory::Market);
        assert!(insight.tags.contains(&"driver".to_string()));
        assert!(insight.source_url.starts_with("ai-search://openai/"));
    }
}
