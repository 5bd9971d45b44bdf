// src/agents/search.rs
//
// Web-search LLM engines and tolerant JSON extraction. Engines return free
// text that is *expected* to contain a JSON object with a named array field;
// the contract is best-effort extraction, not a schema guarantee.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Settings;

/// A web-search-augmented completion engine.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run one search query under the given system prompt; returns the raw
    /// completion text.
    async fn search(&self, system_prompt: &str, query: &str) -> Result<String>;
}

// ── OpenAI search-preview engine ─────────────────────────────────────

pub struct OpenAiSearchEngine {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiSearchEngine {
    pub fn new(api_key: String) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("textile-trade-watch/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_key,
            model: "gpt-4o-search-preview".to_string(),
        }
    }
}

#[async_trait]
impl SearchEngine for OpenAiSearchEngine {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn search(&self, system_prompt: &str, query: &str) -> Result<String> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct WebSearchOptions<'a> {
            search_context_size: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            web_search_options: WebSearchOptions<'a>,
            messages: Vec<Msg<'a>>,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: Option<String>,
        }

        let req = Req {
            model: &self.model,
            web_search_options: WebSearchOptions {
                search_context_size: "medium",
            },
            messages: vec![
                Msg {
                    role: "system",
                    content: system_prompt,
                },
                Msg {
                    role: "user",
                    content: query,
                },
            ],
        };

        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("openai search request")?;
        if !resp.status().is_success() {
            return Err(anyhow!("openai search returned {}", resp.status()));
        }
        let body: Resp = resp.json().await.context("openai search body")?;
        Ok(body
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default())
    }
}

// ── Gemini engine with google_search tool ────────────────────────────

pub struct GeminiSearchEngine {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiSearchEngine {
    pub fn new(api_key: String) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("textile-trade-watch/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_key,
            model: "gemini-2.0-flash".to_string(),
        }
    }
}

#[async_trait]
impl SearchEngine for GeminiSearchEngine {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn search(&self, system_prompt: &str, query: &str) -> Result<String> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let payload = serde_json::json!({
            "contents": [
                {"role": "user", "parts": [{"text": format!("{system_prompt}\n\nRecherche: {query}")}]},
            ],
            "tools": [{"google_search": {}}],
            "generationConfig": {"temperature": 0.2, "maxOutputTokens": 2048},
        });

        let resp = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .context("gemini search request")?;
        if !resp.status().is_success() {
            return Err(anyhow!("gemini search returned {}", resp.status()));
        }

        #[derive(Deserialize)]
        struct Resp {
            #[serde(default)]
            candidates: Vec<Candidate>,
        }
        #[derive(Deserialize)]
        struct Candidate {
            #[serde(default)]
            content: CandidateContent,
        }
        #[derive(Deserialize, Default)]
        struct CandidateContent {
            #[serde(default)]
            parts: Vec<Part>,
        }
        #[derive(Deserialize)]
        struct Part {
            #[serde(default)]
            text: Option<String>,
        }

        let body: Resp = resp.json().await.context("gemini search body")?;
        let Some(first) = body.candidates.first() else {
            return Ok(String::new());
        };
        Ok(first
            .content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join(" "))
    }
}

// ── Two-engine fallback ──────────────────────────────────────────────

/// Ordered engine list: try the first; on failure (or when no credential is
/// configured) fall through to the next; all failed → `None`.
pub struct EngineStack {
    engines: Vec<Box<dyn SearchEngine>>,
}

impl EngineStack {
    pub fn from_settings(settings: &Settings) -> Self {
        let mut engines: Vec<Box<dyn SearchEngine>> = Vec::new();
        if let Some(key) = &settings.openai_api_key {
            engines.push(Box::new(OpenAiSearchEngine::new(key.clone())));
        }
        if let Some(key) = &settings.gemini_api_key {
            engines.push(Box::new(GeminiSearchEngine::new(key.clone())));
        }
        Self { engines }
    }

    /// Explicit engine list, used by tests to inject scripted engines.
    pub fn from_engines(engines: Vec<Box<dyn SearchEngine>>) -> Self {
        Self { engines }
    }

    /// No engine has a credential; callers short-circuit to a skipped outcome.
    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Returns (upstream calls made, winning engine + raw text). The call
    /// count covers failed attempts too so quota accounting stays honest.
    pub async fn search_with_fallback(
        &self,
        system_prompt: &str,
        query: &str,
    ) -> (u64, Option<(&'static str, String)>) {
        let mut calls = 0;
        for engine in &self.engines {
            calls += 1;
            match engine.search(system_prompt, query).await {
                Ok(raw) => return (calls, Some((engine.name(), raw))),
                Err(e) => {
                    tracing::warn!(
                        engine = engine.name(),
                        error = %e,
                        "search engine failed, trying next"
                    );
                }
            }
        }
        (calls, None)
    }
}

// ── Tolerant JSON extraction ─────────────────────────────────────────

/// Result of the two-stage extraction over an LLM response.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// The named array was found and is non-empty.
    Success(Vec<serde_json::Value>),
    /// Valid JSON, but the array is missing or empty.
    Empty,
    /// Neither the strict pass nor the brace-recovery pass produced JSON.
    Malformed(String),
}

/// Extract `key` (an array field) from an LLM response: strip Markdown code
/// fences, try a strict parse, then retry on the substring between the first
/// `{` and the last `}`.
pub fn extract_array(raw: &str, key: &str) -> ParseOutcome {
    let content = strip_fences(raw);

    if let Ok(v) = serde_json::from_str::<serde_json::Value>(&content) {
        return array_of(&v, key);
    }

    let start = content.find('{');
    let end = content.rfind('}');
    if let (Some(start), Some(end)) = (start, end) {
        if end > start {
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(&content[start..=end]) {
                return array_of(&v, key);
            }
        }
    }

    ParseOutcome::Malformed(format!("no JSON object with key '{key}' in response"))
}

fn array_of(v: &serde_json::Value, key: &str) -> ParseOutcome {
    match v.get(key).and_then(|a| a.as_array()) {
        Some(items) if !items.is_empty() => ParseOutcome::Success(items.clone()),
        _ => ParseOutcome::Empty,
    }
}

fn strip_fences(raw: &str) -> String {
    let content = raw.trim();
    if let Some(rest) = content.strip_prefix("```") {
        // drop the fence line (```json etc.), then everything past the close
        let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
        let body = body.rsplit_once("```").map(|(b, _)| b).unwrap_or(body);
        return body.trim().to_string();
    }
    content.to_string()
}

// helpers shared by the AI-search agents for lenient field reads

pub fn field_str(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_default()
        .trim()
        .to_string()
}

pub fn field_f64(v: &serde_json::Value, key: &str, default: f64) -> f64 {
    v.get(key).and_then(|x| x.as_f64()).unwrap_or(default)
}

pub fn field_tags(v: &serde_json::Value, key: &str) -> Vec<String> {
    v.get(key)
        .and_then(|x| x.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|t| t.as_str())
                .map(|t| t.to_string())
                .collect()
        })
        .unwrap_or_default()
}

pub fn field_date(v: &serde_json::Value, key: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    let s = field_str(v, key);
    chrono::NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
