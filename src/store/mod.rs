// src/store/mod.rs
pub mod runs;
pub mod status;
pub mod types;

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use chrono::Utc;

use self::types::{
    MarketSegment, MarketSizePoint, NewsCandidate, NewsRecord, TradeFields, TradeKey, TradeRecord,
    Upsert,
};

/// Idempotent upsert layer over the two record families plus the derived
/// collections written by the pipeline's derive phase.
///
/// All state lives behind one `RwLock`; every mutation is a single keyed upsert,
/// so concurrent agents never need a cross-record transaction. Snapshots are
/// written as JSON files with a tmp-then-rename dance.
pub struct RecordStore {
    inner: RwLock<StoreState>,
    dir: Option<PathBuf>,
}

#[derive(Default)]
struct StoreState {
    trade: HashMap<TradeKey, TradeRecord>,
    news: Vec<NewsRecord>,
    segments: Vec<MarketSegment>,
    size_series: Vec<MarketSizePoint>,
}

impl RecordStore {
    /// Volatile store for tests and dry runs.
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(StoreState::default()),
            dir: None,
        }
    }

    /// Open a store backed by JSON snapshots under `dir`, loading whatever
    /// collections already exist there.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating data dir {}", dir.display()))?;

        let trade_vec: Vec<TradeRecord> = load_collection(&dir.join("trade_records.json"))?;
        let news: Vec<NewsRecord> = load_collection(&dir.join("news_records.json"))?;
        let segments: Vec<MarketSegment> = load_collection(&dir.join("market_segments.json"))?;
        let size_series: Vec<MarketSizePoint> =
            load_collection(&dir.join("market_size_series.json"))?;

        let mut trade = HashMap::with_capacity(trade_vec.len());
        for rec in trade_vec {
            trade.insert(rec.key.clone(), rec);
        }

        Ok(Self {
            inner: RwLock::new(StoreState {
                trade,
                news,
                segments,
                size_series,
            }),
            dir: Some(dir.to_path_buf()),
        })
    }

    // ── trade records ────────────────────────────────────────────────

    /// Insert-or-merge one trade observation. Fields the caller leaves as
    /// `None` keep whatever an earlier write stored; supplied fields win.
    pub fn upsert_trade(&self, key: TradeKey, fields: TradeFields) -> Upsert {
        let now = Utc::now();
        let mut g = self.inner.write().expect("store lock poisoned");
        match g.trade.get_mut(&key) {
            Some(existing) => {
                merge_trade_fields(&mut existing.fields, fields);
                existing.updated_at = now;
                Upsert::Updated
            }
            None => {
                g.trade.insert(
                    key.clone(),
                    TradeRecord {
                        key,
                        fields,
                        created_at: now,
                        updated_at: now,
                    },
                );
                Upsert::Inserted
            }
        }
    }

    pub fn get_trade(&self, key: &TradeKey) -> Option<TradeRecord> {
        let g = self.inner.read().expect("store lock poisoned");
        g.trade.get(key).cloned()
    }

    pub fn trade_count(&self) -> usize {
        self.inner.read().expect("store lock poisoned").trade.len()
    }

    pub fn trade_count_for_source(&self, source: &str) -> usize {
        let g = self.inner.read().expect("store lock poisoned");
        g.trade.values().filter(|r| r.key.source == source).count()
    }

    /// Clone of all trade records, for the derive phase and dashboards.
    pub fn snapshot_trades(&self) -> Vec<TradeRecord> {
        let g = self.inner.read().expect("store lock poisoned");
        g.trade.values().cloned().collect()
    }

    // ── news records ─────────────────────────────────────────────────

    /// Insert-or-merge one article. Identity is `source_url` when the upstream
    /// supplied one; otherwise title equality (the weaker guarantee), and the
    /// stored record gets a synthetic `ai-search://{engine}/…` identifier so it
    /// never collides with a real URL later.
    pub fn upsert_news(&self, candidate: NewsCandidate, engine: &str) -> Upsert {
        let now = Utc::now();
        let mut g = self.inner.write().expect("store lock poisoned");

        let existing = match candidate.source_url.as_deref() {
            Some(url) if !url.is_empty() => g.news.iter_mut().find(|n| n.source_url == url),
            _ => g.news.iter_mut().find(|n| n.title == candidate.title),
        };

        if let Some(rec) = existing {
            if !candidate.summary.is_empty() {
                rec.summary = candidate.summary;
            }
            if !candidate.tags.is_empty() {
                rec.tags = candidate.tags;
            }
            if let Some(ts) = candidate.published_at {
                rec.published_at = ts;
            }
            rec.relevance_score = candidate.relevance_score.clamp(0.0, 1.0);
            return Upsert::Updated;
        }

        let source_url = match candidate.source_url {
            Some(url) if !url.is_empty() => url,
            _ => format!(
                "ai-search://{engine}/{}",
                &uuid::Uuid::new_v4().simple().to_string()[..8]
            ),
        };
        g.news.push(NewsRecord {
            id: uuid::Uuid::new_v4().to_string(),
            title: candidate.title,
            summary: candidate.summary,
            source_url,
            source_name: candidate.source_name,
            category: candidate.category,
            tags: candidate.tags,
            published_at: candidate.published_at.unwrap_or(now),
            relevance_score: candidate.relevance_score.clamp(0.0, 1.0),
            created_at: now,
        });
        Upsert::Inserted
    }

    pub fn news_count(&self) -> usize {
        self.inner.read().expect("store lock poisoned").news.len()
    }

    pub fn snapshot_news(&self) -> Vec<NewsRecord> {
        let g = self.inner.read().expect("store lock poisoned");
        g.news.clone()
    }

    // ── derived collections ──────────────────────────────────────────

    /// Seed a segment unless (axis, code) already exists. Returns true on insert.
    pub fn insert_segment_if_absent(&self, seg: MarketSegment) -> bool {
        let mut g = self.inner.write().expect("store lock poisoned");
        if g.segments
            .iter()
            .any(|s| s.axis == seg.axis && s.code == seg.code)
        {
            return false;
        }
        g.segments.push(seg);
        true
    }

    /// Insert a size point unless its derived key already exists.
    pub fn insert_size_point_if_absent(&self, point: MarketSizePoint) -> bool {
        let mut g = self.inner.write().expect("store lock poisoned");
        if g.size_series.iter().any(|p| {
            p.segment_code == point.segment_code
                && p.geography_code == point.geography_code
                && p.year == point.year
                && p.flow == point.flow
        }) {
            return false;
        }
        g.size_series.push(point);
        true
    }

    pub fn segment_count(&self) -> usize {
        self.inner.read().expect("store lock poisoned").segments.len()
    }

    pub fn size_series_count(&self) -> usize {
        self.inner
            .read()
            .expect("store lock poisoned")
            .size_series
            .len()
    }

    // ── persistence ──────────────────────────────────────────────────

    /// Write every collection to its snapshot file. No-op for in-memory stores.
    pub fn save(&self) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let g = self.inner.read().expect("store lock poisoned");
        let trades: Vec<&TradeRecord> = g.trade.values().collect();
        write_collection(&dir.join("trade_records.json"), &trades)?;
        write_collection(&dir.join("news_records.json"), &g.news)?;
        write_collection(&dir.join("market_segments.json"), &g.segments)?;
        write_collection(&dir.join("market_size_series.json"), &g.size_series)?;
        Ok(())
    }
}

fn merge_trade_fields(existing: &mut TradeFields, incoming: TradeFields) {
    if incoming.reporter_name.is_some() {
        existing.reporter_name = incoming.reporter_name;
    }
    if incoming.partner_name.is_some() {
        existing.partner_name = incoming.partner_name;
    }
    if incoming.hs_description.is_some() {
        existing.hs_description = incoming.hs_description;
    }
    if incoming.value_usd.is_some() {
        existing.value_usd = incoming.value_usd;
    }
    if incoming.value_eur.is_some() {
        existing.value_eur = incoming.value_eur;
    }
    if incoming.weight_kg.is_some() {
        existing.weight_kg = incoming.weight_kg;
    }
    if incoming.quantity.is_some() {
        existing.quantity = incoming.quantity;
    }
}

pub(crate) fn load_collection<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let s = fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parsing {}", path.display()))
}

pub(crate) fn write_collection<T: serde::Serialize>(path: &Path, items: &T) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(items)?;
    let mut f = fs::File::create(&tmp)
        .with_context(|| format!("creating {}", tmp.display()))?;
    f.write_all(json.as_bytes())?;
    fs::rename(&tmp, path)
        .with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::types::*;
    use super::*;
    use chrono::NaiveDate;

    fn key() -> TradeKey {
        TradeKey {
            source: "un_comtrade".into(),
            reporter_code: "504".into(),
            partner_code: "0".into(),
            hs_code: "61".into(),
            flow: Flow::Export,
            period: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            frequency: Frequency::Annual,
        }
    }

    #[test]
    fn upsert_merges_only_supplied_fields() {
        let store = RecordStore::in_memory();
        let first = TradeFields {
            value_usd: Some(1000.0),
            reporter_name: Some("Maroc".into()),
            ..Default::default()
        };
        assert_eq!(store.upsert_trade(key(), first), Upsert::Inserted);

        let second = TradeFields {
            value_usd: Some(1200.0),
            weight_kg: Some(50.0),
            ..Default::default()
        };
        assert_eq!(store.upsert_trade(key(), second), Upsert::Updated);

        let rec = store.get_trade(&key()).unwrap();
        assert_eq!(rec.fields.value_usd, Some(1200.0));
        assert_eq!(rec.fields.weight_kg, Some(50.0));
        // untouched by the second write
        assert_eq!(rec.fields.reporter_name.as_deref(), Some("Maroc"));
        assert_eq!(store.trade_count(), 1);
    }

    #[test]
    fn news_dedups_by_url_then_title() {
        let store = RecordStore::in_memory();
        let with_url = NewsCandidate {
            title: "EU tariff update".into(),
            summary: "s1".into(),
            source_url: Some("https://example.org/a".into()),
            source_name: "Example".into(),
            category: NewsCategory::Regulatory,
            tags: vec![],
            published_at: None,
            relevance_score: 0.7,
        };
        assert_eq!(store.upsert_news(with_url.clone(), "openai"), Upsert::Inserted);
        assert_eq!(store.upsert_news(with_url, "openai"), Upsert::Updated);
        assert_eq!(store.news_count(), 1);

        let no_url = NewsCandidate {
            title: "Synthetic fiber demand".into(),
            summary: "s2".into(),
            source_url: None,
            source_name: "Veille IA".into(),
            category: NewsCategory::Market,
            tags: vec![],
            published_at: None,
            relevance_score: 0.5,
        };
        assert_eq!(store.upsert_news(no_url.clone(), "gemini"), Upsert::Inserted);
        assert_eq!(store.upsert_news(no_url, "gemini"), Upsert::Updated);
        assert_eq!(store.news_count(), 2);

        let synth = store
            .snapshot_news()
            .into_iter()
            .find(|n| n.title == "Synthetic fiber demand")
            .unwrap();
        assert!(synth.source_url.starts_with("ai-search://gemini/"));
    }

    #[test]
    fn relevance_is_clamped() {
        let store = RecordStore::in_memory();
        let cand = NewsCandidate {
            title: "t".into(),
            summary: String::new(),
            source_url: Some("https://example.org/b".into()),
            source_name: "x".into(),
            category: NewsCategory::Industry,
            tags: vec![],
            published_at: None,
            relevance_score: 3.2,
        };
        store.upsert_news(cand, "openai");
        assert_eq!(store.snapshot_news()[0].relevance_score, 1.0);
    }

    #[test]
    fn snapshot_roundtrip_through_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RecordStore::open(tmp.path()).unwrap();
        store.upsert_trade(key(), TradeFields {
            value_usd: Some(7.0),
            ..Default::default()
        });
        store.save().unwrap();

        let reopened = RecordStore::open(tmp.path()).unwrap();
        assert_eq!(reopened.trade_count(), 1);
        assert_eq!(
            reopened.get_trade(&key()).unwrap().fields.value_usd,
            Some(7.0)
        );
    }
}
