// src/agents/eurostat.rs
//
// Eurostat dissemination API: EU27 ↔ Morocco trade by SITC broad category,
// annual, JSON-stat format. No credential required. HS-level detail comes from
// the Comtrade agent; this one contributes the EU-wide macro series.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};

use crate::agents::jsonstat::JsonStat;
use crate::agents::{AgentContext, AgentOutcome, SourceAgent, SourceId};
use crate::constants::MOROCCO_ISO2;
use crate::fetch::RetryingFetcher;
use crate::store::status::SourceStatusTracker;
use crate::store::types::{Flow, Frequency, TradeFields, TradeKey};
use crate::store::RecordStore;

const DEFAULT_BASE_URL: &str =
    "https://ec.europa.eu/eurostat/api/dissemination/statistics/1.0/data";
const DATASET: &str = "ext_lt_maineu";

fn flow_for_indicator(indic: &str) -> Option<Flow> {
    match indic {
        "MIO_EXP_VAL" => Some(Flow::Export),
        "MIO_IMP_VAL" => Some(Flow::Import),
        _ => None,
    }
}

fn sitc_label_fr(code: &str) -> Option<&'static str> {
    let label = match code {
        "TOTAL" => "Total tous produits",
        "SITC0_1" => "Produits alimentaires, boissons et tabac",
        "SITC2_4" => "Matieres premieres",
        "SITC3" => "Combustibles mineraux",
        "SITC5" => "Produits chimiques",
        "SITC6_8" => "Autres articles manufactures (incl. textile)",
        "SITC7" => "Machines et materiel de transport",
        "SITC9" => "Autres produits",
        _ => return None,
    };
    Some(label)
}

pub struct EurostatAgent {
    store: Arc<RecordStore>,
    status: Arc<SourceStatusTracker>,
    fetcher: RetryingFetcher,
    base_url: String,
}

impl EurostatAgent {
    pub fn new(ctx: &AgentContext) -> Self {
        Self {
            store: ctx.store.clone(),
            status: ctx.status.clone(),
            fetcher: RetryingFetcher::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the agent at a different endpoint (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch_eu_morocco_trade(&self, outcome: &mut AgentOutcome) {
        let url = format!("{}/{DATASET}", self.base_url);
        let since = (Utc::now().year() - 5).to_string();
        let params = vec![
            ("freq".to_string(), "A".to_string()),
            ("partner".to_string(), MOROCCO_ISO2.to_string()),
            ("geo".to_string(), "EU27_2020".to_string()),
            ("sinceTimePeriod".to_string(), since),
        ];

        let result = self.fetcher.fetch(&url, &params, &[]).await;
        self.status.increment_calls(self.source().as_str(), 1);

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(error = %e, "Eurostat EU-Morocco macro fetch failed");
                outcome.failures.push(format!("macro fetch: {e}"));
                return;
            }
        };
        let stat: JsonStat = match resp.json() {
            Ok(v) => v,
            Err(e) => {
                outcome.failures.push(format!("macro response: {e}"));
                return;
            }
        };
        self.store_observations(&stat, outcome);
    }

    fn store_observations(&self, stat: &JsonStat, outcome: &mut AgentOutcome) {
        let observations = stat.observations();
        if observations.is_empty() {
            tracing::warn!("Eurostat response contained no values");
            return;
        }

        for obs in observations {
            let indic = obs.coords.get("indic_et").map(String::as_str).unwrap_or("");
            let Some(flow) = flow_for_indicator(indic) else {
                continue;
            };
            let sitc = obs
                .coords
                .get("sitc06")
                .cloned()
                .unwrap_or_else(|| "TOTAL".to_string());
            let period_raw = obs.coords.get("time").map(String::as_str).unwrap_or("");
            let Some(period) = parse_period(period_raw) else {
                outcome
                    .failures
                    .push(format!("unparseable period '{period_raw}'"));
                continue;
            };

            // MIO EUR → EUR
            let value_eur = obs.value * 1_000_000.0;

            let key = TradeKey {
                source: self.source().as_str().to_string(),
                reporter_code: "EU27".to_string(),
                partner_code: MOROCCO_ISO2.to_string(),
                hs_code: sitc.clone(),
                flow,
                period,
                frequency: Frequency::Annual,
            };
            let fields = TradeFields {
                reporter_name: Some("Union Europeenne".to_string()),
                partner_name: Some("Maroc".to_string()),
                hs_description: Some(
                    sitc_label_fr(&sitc).map(str::to_string).unwrap_or(sitc),
                ),
                value_eur: Some(value_eur),
                ..Default::default()
            };
            self.store.upsert_trade(key, fields);
            outcome.records += 1;
        }
    }
}

#[async_trait]
impl SourceAgent for EurostatAgent {
    fn source(&self) -> SourceId {
        SourceId::Eurostat
    }

    async fn fetch_data(&self) -> AgentOutcome {
        let mut outcome = AgentOutcome::default();
        self.fetch_eu_morocco_trade(&mut outcome).await;
        tracing::info!(records = outcome.records, "Eurostat fetch complete");
        outcome
    }
}

/// "2024", "2024M03", "2024Q2" → period start date.
fn parse_period(s: &str) -> Option<NaiveDate> {
    if let Some((year, month)) = s.split_once('M') {
        return NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, 1);
    }
    if let Some((year, quarter)) = s.split_once('Q') {
        let q: u32 = quarter.parse().ok()?;
        return NaiveDate::from_ymd_opt(year.parse().ok()?, (q - 1) * 3 + 1, 1);
    }
    NaiveDate::from_ymd_opt(s.parse().ok()?, 1, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_variants_parse() {
        assert_eq!(
            parse_period("2024"),
            NaiveDate::from_ymd_opt(2024, 1, 1)
        );
        assert_eq!(
            parse_period("2024M03"),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert_eq!(
            parse_period("2024Q2"),
            NaiveDate::from_ymd_opt(2024, 4, 1)
        );
        assert_eq!(parse_period("x"), None);
    }

    #[test]
    fn only_known_indicators_map_to_flows() {
        assert_eq!(flow_for_indicator("MIO_EXP_VAL"), Some(Flow::Export));
        assert_eq!(flow_for_indicator("MIO_IMP_VAL"), Some(Flow::Import));
        assert_eq!(flow_for_indicator("MIO_BAL_VAL"), None);
    }
}
