// src/agents/watcher.rs
//
// AI-powered news watcher: runs a curated set of search queries through the
// engine stack (OpenAI search-preview first, Gemini as fallback) and stores
// deduplicated articles. Results without a real URL get synthetic per-engine
// identities in the store.

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
Tu es un analyste specialise dans le commerce international du textile et de \
l'habillement, avec un focus sur le Maroc.
Recherche les actualites les plus recentes et retourne les resultats au format \
JSON strict. Pour chaque resultat pertinent, fournis:
- \"title\": titre de l'article
- \"summary\": resume en 2-3 phrases en francais
- \"source_url\": URL de la source
- \"source_name\": nom du media/source
- \"category\": une parmi [regulatory, market, policy, trade_agreement, industry, sustainability, technology]
- \"tags\": liste de mots-cles pertinents
- \"published_date\": date si disponible (format YYYY-MM-DD)
- \"relevance_score\": score de pertinence 0.0-1.0 pour le secteur textile marocain

Retourne un objet JSON avec une cle \"articles\" contenant un tableau. \
Maximum 5 resultats par recherche. Retourne UNIQUEMENT du JSON valide.";

fn builtin_queries() -> Vec<String> {
    [
        "Actualites secteur textile habillement Maroc exportations 2025 2026",
        "Accords commerciaux textile Maroc Union Europeenne nearshoring",
        "Reglementation importation textile durabilite CBAM Union Europeenne",
        "Marche mondial textile tendances prix coton fibres synthetiques 2026",
        "Concurrence textile Maroc Turquie Bangladesh Vietnam",
        "OTEXA US textile import data Morocco apparel trade 2025 2026",
        "Eurostat EU Morocco textile trade statistics latest",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub struct WatcherAgent {
    store: Arc<RecordStore>,
    status: Arc<SourceStatusTracker>,
    engines: EngineStack,
    queries: Vec<String>,
}

impl WatcherAgent {
    pub fn new(ctx: &AgentContext) -> Self {
        let queries = match crate::config::load_queries_default() {
            Ok(list) if !list.is_empty() => list,
            Ok(_) => builtin_queries(),
            Err(e) => {
                tracing::warn!(error = %e, "search query config unreadable, using built-ins");
                builtin_queries()
            }
        };
        Self {
            store: ctx.store.clone(),
            status: ctx.status.clone(),
            engines: EngineStack::from_settings(&ctx.settings),
            queries,
        }
    }

    /// Inject engines and queries directly (tests).
    pub fn with_engines(ctx: &AgentContext, engines: EngineStack, queries: Vec<String>) -> Self {
        Self {
            store: ctx.store.clone(),
            status: ctx.status.clone(),
            engines,
            queries,
        }
    }

    fn store_articles(&self, items: &[serde_json::Value], engine: &str) -> u64 {
        let mut count = 0;
        for item in items {
            let title = field_str(item, "title");
            if title.is_empty() {
                continue;
            }
            let source_url = Some(field_str(item, "source_url")).filter(|u| !u.is_empty());
            let source_name = {
                let name = field_str(item, "source_name");
                if name.is_empty() {
                    format!("Veille IA ({engine})")
                } else {
                    name
                }
            };
            let candidate = NewsCandidate {
                title,
                summary: field_str(item, "summary"),
                source_url,
                source_name,
                category: NewsCategory::parse_lenient(&field_str(item, "category")),
                tags: field_tags(item, "tags"),
                published_at: field_date(item, "published_date"),
                relevance_score: field_f64(item, "relevance_score", 0.5),
            };
            if self.store.upsert_news(candidate, engine) == Upsert::Inserted {
                count += 1;
            }
        }
        count
    }
}

#[async_trait]
impl SourceAgent for WatcherAgent {
    fn source(&self) -> SourceId {
        SourceId::NewsWatcher
    }

    async fn fetch_data(&self) -> AgentOutcome {
        if self.engines.is_empty() {
            tracing::warn!("no search engine credential configured, skipping");
            return AgentOutcome::skipped("no search engine credential configured");
        }

        let mut outcome = AgentOutcome::default();
        for query in &self.queries {
            let (calls, hit) = self.engines.search_with_fallback(SYSTEM_PROMPT, query).await;
            self.status.increment_calls(self.source().as_str(), calls);

            let Some((engine, raw)) = hit else {
                outcome
                    .failures
                    .push(format!("query '{}': all engines failed", truncate(query, 40)));
                continue;
            };
            match extract_array(&raw, "articles") {
                ParseOutcome::Success(items) => {
                    outcome.records += self.store_articles(&items, engine);
                }
                ParseOutcome::Empty => {}
                ParseOutcome::Malformed(msg) => {
                    tracing::warn!(engine, query = %truncate(query, 40), "{msg}");
                    outcome
                        .failures
                        .push(format!("query '{}': {msg}", truncate(query, 40)));
                }
            }
        }

        tracing::info!(records = outcome.records, "news watcher complete");
        outcome
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
