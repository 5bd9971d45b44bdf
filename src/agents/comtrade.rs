// src/agents/comtrade.rs
//
// UN Comtrade: world textile trade by HS chapter (50-63), annual frequency.
// Subscription key goes in the Ocp-Apim-Subscription-Key header; the upstream
// allows ~500 calls/day, so the agent self-throttles well before that.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};

use crate::agents::{AgentContext, AgentOutcome, SourceAgent, SourceId};
use crate::constants::{
    hs_chapter_label_fr, textile_hs_chapters_param, GLOBAL_TOP_PARTNERS_M49, MOROCCO_M49,
};
use crate::fetch::RetryingFetcher;
use crate::store::status::SourceStatusTracker;
use crate::store::types::{Flow, Frequency, TradeFields, TradeKey};
use crate::store::RecordStore;

const DEFAULT_BASE_URL: &str = "https://comtradeapi.un.org/data/v1/get/C/A/HS";
const INTER_CALL_PAUSE: std::time::Duration = std::time::Duration::from_secs(2);

pub struct ComtradeAgent {
    store: Arc<RecordStore>,
    status: Arc<SourceStatusTracker>,
    fetcher: RetryingFetcher,
    api_key: Option<String>,
    call_threshold: u64,
    call_limit: u64,
    base_url: String,
}

impl ComtradeAgent {
    pub fn new(ctx: &AgentContext) -> Self {
        Self {
            store: ctx.store.clone(),
            status: ctx.status.clone(),
            fetcher: RetryingFetcher::new(),
            api_key: ctx.settings.comtrade_api_key.clone(),
            call_threshold: ctx.settings.comtrade_call_threshold,
            call_limit: ctx.settings.comtrade_daily_call_limit,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the agent at a different endpoint (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch_world(&self, api_key: &str, outcome: &mut AgentOutcome) {
        let current_year = Utc::now().year();
        let periods = year_list(current_year - 4, current_year);
        let params = vec![
            ("reporterCode".to_string(), MOROCCO_M49.to_string()),
            ("cmdCode".to_string(), textile_hs_chapters_param()),
            ("flowCode".to_string(), "M,X".to_string()),
            ("partnerCode".to_string(), "0".to_string()),
            ("period".to_string(), periods),
            ("includeDesc".to_string(), "true".to_string()),
        ];
        self.fetch_and_store(api_key, params, "world", outcome).await;
    }

    async fn fetch_partners(&self, api_key: &str, outcome: &mut AgentOutcome) {
        let current_year = Utc::now().year();
        let periods = year_list(current_year - 3, current_year);
        let partner_codes = GLOBAL_TOP_PARTNERS_M49
            .iter()
            .filter(|(code, _)| *code != "0")
            .map(|(code, _)| *code)
            .collect::<Vec<_>>()
            .join(",");
        let params = vec![
            ("reporterCode".to_string(), MOROCCO_M49.to_string()),
            ("cmdCode".to_string(), textile_hs_chapters_param()),
            ("flowCode".to_string(), "M,X".to_string()),
            ("partnerCode".to_string(), partner_codes),
            ("period".to_string(), periods),
            ("includeDesc".to_string(), "true".to_string()),
        ];
        self.fetch_and_store(api_key, params, "partners", outcome)
            .await;
    }

    async fn fetch_and_store(
        &self,
        api_key: &str,
        params: Vec<(String, String)>,
        what: &str,
        outcome: &mut AgentOutcome,
    ) {
        let headers = vec![(
            "Ocp-Apim-Subscription-Key".to_string(),
            api_key.to_string(),
        )];
        let result = self.fetcher.fetch(&self.base_url, &params, &headers).await;
        // counted toward the quota whether or not the call succeeded
        self.status.increment_calls(self.source().as_str(), 1);

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(sub_fetch = what, error = %e, "Comtrade fetch failed");
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
        self.parse_and_store(&data, outcome);
    }

    fn parse_and_store(&self, data: &serde_json::Value, outcome: &mut AgentOutcome) {
        let Some(rows) = data.get("data").and_then(|d| d.as_array()) else {
            tracing::warn!("no data in Comtrade response");
            return;
        };

        for row in rows {
            match self.store_row(row) {
                Ok(true) => outcome.records += 1,
                Ok(false) => {} // row outside our scope (e.g. re-import flows)
                Err(e) => {
                    tracing::error!(error = %e, "error processing Comtrade record");
                    outcome.failures.push(e);
                }
            }
        }
    }

    /// Ok(false) means the row was intentionally skipped, not malformed.
    fn store_row(&self, row: &serde_json::Value) -> Result<bool, String> {
        let flow = match val_str(row, "flowCode").as_str() {
            "M" => Flow::Import,
            "X" => Flow::Export,
            _ => return Ok(false),
        };
        let cmd_code = val_str(row, "cmdCode");
        let period_raw = val_str(row, "period");
        let Some((period, frequency)) = parse_period(&period_raw) else {
            return Err(format!("unparseable period '{period_raw}'"));
        };

        let chapter = if cmd_code.len() >= 2 {
            &cmd_code[..2]
        } else {
            cmd_code.as_str()
        };
        let hs_description = hs_chapter_label_fr(chapter)
            .map(str::to_string)
            .or_else(|| Some(val_str(row, "cmdDescE")).filter(|s| !s.is_empty()));

        let key = TradeKey {
            source: self.source().as_str().to_string(),
            reporter_code: val_str(row, "reporterCode"),
            partner_code: val_str(row, "partnerCode"),
            hs_code: cmd_code.clone(),
            flow,
            period,
            frequency,
        };
        let fields = TradeFields {
            reporter_name: Some(val_str(row, "reporterDesc")),
            partner_name: Some(val_str(row, "partnerDesc")),
            hs_description,
            value_usd: row.get("primaryValue").and_then(|v| v.as_f64()),
            weight_kg: row.get("netWgt").and_then(|v| v.as_f64()),
            quantity: row.get("qty").and_then(|v| v.as_f64()),
            ..Default::default()
        };
        self.store.upsert_trade(key, fields);
        Ok(true)
    }
}

#[async_trait]
impl SourceAgent for ComtradeAgent {
    fn source(&self) -> SourceId {
        SourceId::UnComtrade
    }

    async fn fetch_data(&self) -> AgentOutcome {
        let Some(api_key) = self.api_key.clone() else {
            tracing::warn!("no Comtrade API key configured, skipping");
            return AgentOutcome::skipped("no API key configured");
        };

        let calls = self.status.calls_today(self.source().as_str());
        if calls >= self.call_threshold {
            tracing::warn!(
                calls,
                limit = self.call_limit,
                "rate limit approaching, skipping"
            );
            return AgentOutcome::skipped(format!(
                "rate limit approaching: {calls}/{} calls today",
                self.call_limit
            ));
        }

        let mut outcome = AgentOutcome::default();
        self.fetch_world(&api_key, &mut outcome).await;
        tokio::time::sleep(INTER_CALL_PAUSE).await;
        self.fetch_partners(&api_key, &mut outcome).await;

        tracing::info!(records = outcome.records, "Comtrade fetch complete");
        outcome
    }
}

/// Comma-joined inclusive year range for the `period` parameter.
fn year_list(from: i32, to: i32) -> String {
    (from..=to)
        .map(|y| y.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// "2024" → annual, "202403" → monthly; anything else is malformed.
fn parse_period(s: &str) -> Option<(NaiveDate, Frequency)> {
    match s.len() {
        4 => {
            let year = s.parse().ok()?;
            NaiveDate::from_ymd_opt(year, 1, 1).map(|d| (d, Frequency::Annual))
        }
        6 => {
            let year = s[..4].parse().ok()?;
            let month = s[4..].parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, 1).map(|d| (d, Frequency::Monthly))
        }
        _ => None,
    }
}

/// Upstream codes arrive as either strings or bare numbers.
fn val_str(v: &serde_json::Value, key: &str) -> String {
    match v.get(key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}
