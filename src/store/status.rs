// src/store/status.rs
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{load_collection, write_collection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceHealth {
    Active,
    Error,
    Unknown,
}

/// Per-source health row, upserted on every agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStatus {
    pub source_name: String,
    pub status: SourceHealth,
    pub last_successful_fetch: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
    pub records_fetched_today: u64,
    pub api_calls_today: u64,
    pub updated_at: DateTime<Utc>,
}

impl SourceStatus {
    fn new(source_name: &str) -> Self {
        Self {
            source_name: source_name.to_string(),
            status: SourceHealth::Unknown,
            last_successful_fetch: None,
            last_error_message: None,
            records_fetched_today: 0,
            api_calls_today: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Tracks per-source health and today's call/record counters. Counters are
/// additive and reset only by the pipeline's daily-reset phase, never by
/// wall-clock expiry.
pub struct SourceStatusTracker {
    inner: RwLock<HashMap<String, SourceStatus>>,
    path: Option<PathBuf>,
}

impl SourceStatusTracker {
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            path: None,
        }
    }

    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join("source_status.json");
        let rows: Vec<SourceStatus> = load_collection(&path)?;
        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            map.insert(row.source_name.clone(), row);
        }
        Ok(Self {
            inner: RwLock::new(map),
            path: Some(path),
        })
    }

    /// Record a successful run: clears any prior error, stamps the success
    /// time, and adds `records_delta` to today's record counter.
    pub fn mark_active(&self, source: &str, records_delta: u64) {
        let now = Utc::now();
        let mut g = self.inner.write().expect("status lock poisoned");
        let row = g
            .entry(source.to_string())
            .or_insert_with(|| SourceStatus::new(source));
        row.status = SourceHealth::Active;
        row.last_successful_fetch = Some(now);
        row.last_error_message = None;
        row.records_fetched_today += records_delta;
        row.updated_at = now;
    }

    pub fn mark_error(&self, source: &str, message: &str) {
        let now = Utc::now();
        let mut g = self.inner.write().expect("status lock poisoned");
        let row = g
            .entry(source.to_string())
            .or_insert_with(|| SourceStatus::new(source));
        row.status = SourceHealth::Error;
        row.last_error_message = Some(message.to_string());
        row.updated_at = now;
    }

    /// `$inc`-style counter bump, once per upstream call regardless of outcome.
    pub fn increment_calls(&self, source: &str, n: u64) {
        let now = Utc::now();
        let mut g = self.inner.write().expect("status lock poisoned");
        let row = g
            .entry(source.to_string())
            .or_insert_with(|| SourceStatus::new(source));
        row.api_calls_today += n;
        row.updated_at = now;
    }

    pub fn calls_today(&self, source: &str) -> u64 {
        let g = self.inner.read().expect("status lock poisoned");
        g.get(source).map(|r| r.api_calls_today).unwrap_or(0)
    }

    /// Phase-6 reset: zero every source's daily counters.
    pub fn reset_daily_counters(&self) {
        let now = Utc::now();
        let mut g = self.inner.write().expect("status lock poisoned");
        for row in g.values_mut() {
            row.records_fetched_today = 0;
            row.api_calls_today = 0;
            row.updated_at = now;
        }
    }

    /// Status rows, sorted by source name for stable API output.
    pub fn snapshot(&self) -> Vec<SourceStatus> {
        let g = self.inner.read().expect("status lock poisoned");
        let mut rows: Vec<SourceStatus> = g.values().cloned().collect();
        rows.sort_by(|a, b| a.source_name.cmp(&b.source_name));
        rows
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        write_collection(path, &self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_active_clears_error_and_counts() {
        let t = SourceStatusTracker::in_memory();
        t.mark_error("eurostat", "boom");
        t.mark_active("eurostat", 12);
        let rows = t.snapshot();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, SourceHealth::Active);
        assert!(rows[0].last_error_message.is_none());
        assert!(rows[0].last_successful_fetch.is_some());
        assert_eq!(rows[0].records_fetched_today, 12);
    }

    #[test]
    fn counters_accumulate_until_reset() {
        let t = SourceStatusTracker::in_memory();
        t.increment_calls("un_comtrade", 1);
        t.increment_calls("un_comtrade", 2);
        assert_eq!(t.calls_today("un_comtrade"), 3);
        t.mark_active("un_comtrade", 5);
        t.reset_daily_counters();
        assert_eq!(t.calls_today("un_comtrade"), 0);
        let row = &t.snapshot()[0];
        assert_eq!(row.records_fetched_today, 0);
        // health survives the counter reset
        assert_eq!(row.status, SourceHealth::Active);
    }

    #[test]
    fn unknown_source_reads_zero() {
        let t = SourceStatusTracker::in_memory();
        assert_eq!(t.calls_today("nope"), 0);
        assert!(t.snapshot().is_empty());
    }
}
