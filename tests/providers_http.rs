// tests/providers_http.rs
//
// Provider agents against a mock upstream: JSON-stat decoding for Eurostat,
// document listing for the Federal Register.

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use textile_trade_watch::agents::eurostat::EurostatAgent;
use textile_trade_watch::agents::fed_register::FedRegisterAgent;
use textile_trade_watch::agents::{AgentContext, SourceAgent};
use textile_trade_watch::config::Settings;
use textile_trade_watch::store::status::{SourceHealth, SourceStatusTracker};
use textile_trade_watch::store::types::Flow;
use textile_trade_watch::store::RecordStore;

fn ctx() -> AgentContext {
    AgentContext {
        store: Arc::new(RecordStore::in_memory()),
        status: Arc::new(SourceStatusTracker::in_memory()),
        settings: Arc::new(Settings::default()),
    }
}

#[tokio::test]
async fn eurostat_decodes_jsonstat_hypercube() {
    let ctx = ctx();
    let server = MockServer::start().await;

    // 2 indicators x 1 SITC category x 2 years; flat = (indic*1 + sitc)*2 + time
    let fixture = json!({
        "id": ["indic_et", "sitc06", "time"],
        "size": [2, 1, 2],
        "dimension": {
            "indic_et": {"category": {"index": {"MIO_EXP_VAL": 0, "MIO_IMP_VAL": 1}}},
            "sitc06": {"category": {"index": {"SITC6_8": 0}}},
            "time": {"category": {"index": {"2023": 0, "2024": 1}}}
        },
        "value": {"0": 10.0, "3": 5.0}
    });
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(fixture))
        .mount(&server)
        .await;

    let agent = EurostatAgent::new(&ctx).with_base_url(server.uri());
    let outcome = agent.fetch_data().await;

    assert_eq!(outcome.records, 2);
    assert!(outcome.failures.is_empty());
    assert_eq!(ctx.store.trade_count_for_source("eurostat"), 2);
    assert_eq!(ctx.status.calls_today("eurostat"), 1);

    let trades = ctx.store.snapshot_trades();
    let export = trades
        .iter()
        .find(|r| r.key.flow == Flow::Export)
        .expect("export row");
    assert_eq!(export.key.reporter_code, "EU27");
    assert_eq!(export.key.partner_code, "MA");
    assert_eq!(export.key.hs_code, "SITC6_8");
    // MIO EUR scaled to EUR
    assert_eq!(export.fields.value_eur, Some(10_000_000.0));
    assert!(export
        .fields
        .hs_description
        .as_deref()
        .unwrap()
        .contains("textile"));
}

#[tokio::test]
async fn federal_register_stores_and_dedups_documents() {
    let ctx = ctx();
    let server = MockServer::start().await;

    let fixture = json!({
        "results": [
            {
                "title": "Certain Textile Products From Morocco",
                "abstract": "Notice of antidumping duty order.",
                "html_url": "https://www.federalregister.gov/d/2025-0001",
                "publication_date": "2025-02-01",
                "type": "NOTICE",
                "agencies": [{"name": "International Trade Administration"}]
            },
            {
                "title": "Document without a URL is dropped",
                "abstract": "x"
            }
        ]
    });
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(fixture))
        .mount(&server)
        .await;

    let agent = FedRegisterAgent::new(&ctx).with_base_url(server.uri());
    let outcome = agent.fetch_data().await;

    // two sub-fetches return the same document; one distinct URL
    assert_eq!(outcome.records, 1);
    assert_eq!(ctx.store.news_count(), 1);
    assert_eq!(ctx.status.calls_today("federal_register"), 2);

    let rec = &ctx.store.snapshot_news()[0];
    assert_eq!(rec.source_name, "Federal Register");
    assert!(rec
        .tags
        .contains(&"International Trade Administration".to_string()));

    // a second full run adds nothing
    let again = agent.fetch_data().await;
    assert_eq!(again.records, 0);
    assert_eq!(ctx.store.news_count(), 1);
}

#[tokio::test]
async fn client_errors_fail_fast_without_retry() {
    let ctx = ctx();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let agent = EurostatAgent::new(&ctx).with_base_url(server.uri());
    let outcome = agent.fetch_data().await;

    assert!(outcome.is_error());
    assert!(outcome.failures[0].contains("403"));
    // exactly one request: 4xx is never retried
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    // the failed call still counted toward the daily quota
    assert_eq!(ctx.status.calls_today("eurostat"), 1);

    // the pipeline job layer would mark the source in error
    ctx.status.mark_error("eurostat", &outcome.failures[0]);
    let row = &ctx.status.snapshot()[0];
    assert_eq!(row.status, SourceHealth::Error);
    assert!(row.last_error_message.is_some());
}
