// src/store/types.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Trade flow direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flow {
    Import,
    Export,
}

impl Flow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flow::Import => "import",
            Flow::Export => "export",
        }
    }
}

/// Reporting frequency of the upstream series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    #[serde(rename = "A")]
    Annual,
    #[serde(rename = "M")]
    Monthly,
}

/// Natural key of a trade observation. Uniqueness is enforced by the store;
/// a later fetch with the same key merges instead of duplicating.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TradeKey {
    pub source: String,
    pub reporter_code: String,
    pub partner_code: String,
    pub hs_code: String,
    pub flow: Flow,
    /// Period start, truncated to month/year per source frequency.
    pub period: NaiveDate,
    pub frequency: Frequency,
}

/// Fields a single fetch may supply. `None` leaves any earlier value untouched,
/// so sources that do not report a measure never erase one reported before.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeFields {
    pub reporter_name: Option<String>,
    pub partner_name: Option<String>,
    pub hs_description: Option<String>,
    pub value_usd: Option<f64>,
    pub value_eur: Option<f64>,
    pub weight_kg: Option<f64>,
    pub quantity: Option<f64>,
}

/// One stored trade observation: the natural key plus merged measures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    #[serde(flatten)]
    pub key: TradeKey,
    #[serde(flatten)]
    pub fields: TradeFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Closed set of news categories; anything else coerces to `Industry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewsCategory {
    Regulatory,
    Market,
    Policy,
    TradeAgreement,
    Industry,
    Sustainability,
    Technology,
}

impl NewsCategory {
    /// Parse an upstream-supplied category, defaulting off-enum values.
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "regulatory" => Self::Regulatory,
            "market" => Self::Market,
            "policy" => Self::Policy,
            "trade_agreement" => Self::TradeAgreement,
            "sustainability" => Self::Sustainability,
            "technology" => Self::Technology,
            _ => Self::Industry,
        }
    }
}

/// What an agent hands to the store. `source_url` is `None` for synthetic
/// AI-search results; the store then assigns a per-engine identifier and
/// falls back to title-based dedup.
#[derive(Debug, Clone)]
pub struct NewsCandidate {
    pub title: String,
    pub summary: String,
    pub source_url: Option<String>,
    pub source_name: String,
    pub category: NewsCategory,
    pub tags: Vec<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub relevance_score: f64,
}

/// One discovered article/document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsRecord {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub source_url: String,
    pub source_name: String,
    pub category: NewsCategory,
    pub tags: Vec<String>,
    pub published_at: DateTime<Utc>,
    pub relevance_score: f64,
    pub created_at: DateTime<Utc>,
}

/// Derived market segment, seeded by the derive phase. (axis, code) is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSegment {
    pub axis: String,
    pub code: String,
    pub label_fr: String,
    pub label_en: String,
    pub description_fr: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Derived market-size observation. (segment_code, geography_code, year, flow)
/// is unique; re-derivation skips existing keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSizePoint {
    pub segment_code: String,
    pub geography_code: String,
    pub year: i32,
    pub flow: String,
    pub value_usd: f64,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// Result of an upsert: whether the key existed before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}
