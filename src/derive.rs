// src/derive.rs
//
// Phase 4: recompute market segments and market-size series from the trade
// records ingested so far. Re-derivation is idempotent: every derived key that
// already exists is skipped, so re-running after new fetches only fills gaps.

use std::collections::BTreeMap;

use chrono::{Datelike, Utc};

use crate::constants::{hs_chapter_label_fr, AGGREGATE_SEGMENTS, TEXTILE_HS_CHAPTERS};
use crate::store::runs::DeriveSummary;
use crate::store::types::{MarketSegment, MarketSizePoint};
use crate::store::RecordStore;

const GEOGRAPHY: &str = "MA";
const DERIVED_SOURCE: &str = "derived_from_trade_data";

pub fn run(store: &RecordStore) -> DeriveSummary {
    let now = Utc::now();
    let mut segments_created = 0u64;
    let mut size_entries_created = 0u64;

    // Seed one segment per textile HS chapter.
    for chapter in TEXTILE_HS_CHAPTERS {
        let label_fr = hs_chapter_label_fr(chapter).unwrap_or(chapter);
        let seg = MarketSegment {
            axis: "hs_chapter".to_string(),
            code: chapter.to_string(),
            label_fr: label_fr.to_string(),
            label_en: format!("Chapter {chapter}"),
            description_fr: Some(format!("Chapitre SH {chapter} - {label_fr}")),
            created_at: now,
        };
        if store.insert_segment_if_absent(seg) {
            segments_created += 1;
        }
    }

    // Fixed aggregate segments (product categories, fiber types).
    for (axis, code, label_fr, label_en) in AGGREGATE_SEGMENTS {
        let seg = MarketSegment {
            axis: axis.to_string(),
            code: code.to_string(),
            label_fr: label_fr.to_string(),
            label_en: label_en.to_string(),
            description_fr: None,
            created_at: now,
        };
        if store.insert_segment_if_absent(seg) {
            segments_created += 1;
        }
    }

    // Aggregate trade values by (year, chapter, flow) and by (year, flow).
    let mut by_chapter: BTreeMap<(i32, String, String), f64> = BTreeMap::new();
    let mut totals: BTreeMap<(i32, String), f64> = BTreeMap::new();
    for rec in store.snapshot_trades() {
        let value = rec
            .fields
            .value_usd
            .or(rec.fields.value_eur)
            .unwrap_or(0.0);
        let year = rec.key.period.year();
        let flow = rec.key.flow.as_str().to_string();

        let chapter: String = rec.key.hs_code.chars().take(2).collect();
        // SITC-style codes ("TOTAL", "SITC6_8") contribute to totals only
        if !chapter.is_empty() && chapter != "TO" && chapter != "SI" {
            *by_chapter
                .entry((year, chapter, flow.clone()))
                .or_default() += value;
        }
        *totals.entry((year, flow)).or_default() += value;
    }

    for ((year, chapter, flow), total_value) in by_chapter {
        let point = MarketSizePoint {
            segment_code: chapter,
            geography_code: GEOGRAPHY.to_string(),
            year,
            flow,
            value_usd: total_value,
            source: DERIVED_SOURCE.to_string(),
            created_at: now,
        };
        if store.insert_size_point_if_absent(point) {
            size_entries_created += 1;
        }
    }

    for ((year, flow), total_value) in totals {
        let point = MarketSizePoint {
            segment_code: "ALL".to_string(),
            geography_code: GEOGRAPHY.to_string(),
            year,
            flow,
            value_usd: total_value,
            source: DERIVED_SOURCE.to_string(),
            created_at: now,
        };
        if store.insert_size_point_if_absent(point) {
            size_entries_created += 1;
        }
    }

    tracing::info!(
        segments_created,
        size_entries_created,
        "derive phase complete"
    );
    DeriveSummary {
        segments_created,
        size_entries_created,
        status: "success".to_string(),
    }
}
