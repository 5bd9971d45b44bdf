// src/frameworks.rs
//
// Phase 5: cached analytical artifacts. Each framework view is a deterministic
// aggregate over the stored records; the pipeline invalidates and rebuilds all
// of them after every ingest so dashboards never serve stale summaries.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::runs::FrameworkSummary;
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameworkKind {
    Porter,
    Pestel,
    TamSamSom,
}

impl FrameworkKind {
    pub const ALL: [FrameworkKind; 3] = [
        FrameworkKind::Porter,
        FrameworkKind::Pestel,
        FrameworkKind::TamSamSom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FrameworkKind::Porter => "porter",
            FrameworkKind::Pestel => "pestel",
            FrameworkKind::TamSamSom => "tam_sam_som",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkArtifact {
    pub kind: FrameworkKind,
    pub generated_at: DateTime<Utc>,
    pub data: serde_json::Value,
}

/// In-memory artifact cache with invalidate-then-rebuild semantics.
#[derive(Default)]
pub struct FrameworkCache {
    inner: RwLock<HashMap<FrameworkKind, FrameworkArtifact>>,
}

impl FrameworkCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: FrameworkKind) -> Option<FrameworkArtifact> {
        self.inner
            .read()
            .expect("framework cache lock poisoned")
            .get(&kind)
            .cloned()
    }

    pub fn invalidate(&self, kind: FrameworkKind) {
        self.inner
            .write()
            .expect("framework cache lock poisoned")
            .remove(&kind);
    }

    /// Drop and rebuild every framework. A failure in one framework is
    /// recorded in its slot of the summary without stopping the others.
    pub fn regenerate_all(&self, store: &RecordStore) -> FrameworkSummary {
        let mut statuses: HashMap<FrameworkKind, String> = HashMap::new();
        for kind in FrameworkKind::ALL {
            self.invalidate(kind);
            match self.generate(kind, store) {
                Ok(artifact) => {
                    self.inner
                        .write()
                        .expect("framework cache lock poisoned")
                        .insert(kind, artifact);
                    statuses.insert(kind, "success".to_string());
                    tracing::info!(framework = kind.as_str(), "framework regenerated");
                }
                Err(e) => {
                    statuses.insert(kind, format!("error: {e}"));
                    tracing::error!(framework = kind.as_str(), error = %e, "framework failed");
                }
            }
        }
        FrameworkSummary {
            porter: statuses.remove(&FrameworkKind::Porter).unwrap_or_default(),
            pestel: statuses.remove(&FrameworkKind::Pestel).unwrap_or_default(),
            tam_sam_som: statuses
                .remove(&FrameworkKind::TamSamSom)
                .unwrap_or_default(),
        }
    }

    fn generate(&self, kind: FrameworkKind, store: &RecordStore) -> Result<FrameworkArtifact> {
        let data = match kind {
            FrameworkKind::Porter => porter_inputs(store),
            FrameworkKind::Pestel => pestel_inputs(store),
            FrameworkKind::TamSamSom => tam_sam_som_inputs(store),
        };
        Ok(FrameworkArtifact {
            kind,
            generated_at: Utc::now(),
            data,
        })
    }
}

/// Competitive-pressure inputs: trade volume per partner, newest first years.
fn porter_inputs(store: &RecordStore) -> serde_json::Value {
    let mut by_partner: BTreeMap<String, f64> = BTreeMap::new();
    for rec in store.snapshot_trades() {
        if rec.key.partner_code == "0" {
            continue;
        }
        let name = rec
            .fields
            .partner_name
            .clone()
            .unwrap_or_else(|| rec.key.partner_code.clone());
        *by_partner.entry(name).or_default() += rec
            .fields
            .value_usd
            .or(rec.fields.value_eur)
            .unwrap_or(0.0);
    }
    let mut partners: Vec<(String, f64)> = by_partner.into_iter().collect();
    partners.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    partners.truncate(10);

    serde_json::json!({
        "top_partners": partners
            .into_iter()
            .map(|(name, value)| serde_json::json!({"partner": name, "trade_value": value}))
            .collect::<Vec<_>>(),
        "trade_record_count": store.trade_count(),
    })
}

/// Environment scan inputs: article counts per news category.
fn pestel_inputs(store: &RecordStore) -> serde_json::Value {
    let mut by_category: BTreeMap<String, u64> = BTreeMap::new();
    for rec in store.snapshot_news() {
        let key = serde_json::to_value(rec.category)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "industry".to_string());
        *by_category.entry(key).or_default() += 1;
    }
    serde_json::json!({
        "articles_by_category": by_category,
        "article_count": store.news_count(),
    })
}

/// Market sizing inputs: the derived "ALL" series plus segment counts.
fn tam_sam_som_inputs(store: &RecordStore) -> serde_json::Value {
    serde_json::json!({
        "segment_count": store.segment_count(),
        "size_series_count": store.size_series_count(),
    })
}
