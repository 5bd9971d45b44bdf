// tests/ingest_e2e.rs
//
// End-to-end ingest scenario: the same natural key fetched twice from the
// trade-statistics upstream must leave exactly one stored record, with the
// second fetch's value winning and its new weight field populated.

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::json;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use textile_trade_watch::agents::comtrade::ComtradeAgent;
use textile_trade_watch::agents::{AgentContext, SourceAgent};
use textile_trade_watch::config::Settings;
use textile_trade_watch::store::status::SourceStatusTracker;
use textile_trade_watch::store::types::{Flow, Frequency, TradeKey};
use textile_trade_watch::store::RecordStore;

fn ctx() -> AgentContext {
    let settings = Settings {
        comtrade_api_key: Some("test-key".into()),
        ..Default::default()
    };
    AgentContext {
        store: Arc::new(RecordStore::in_memory()),
        status: Arc::new(SourceStatusTracker::in_memory()),
        settings: Arc::new(settings),
    }
}

fn fixture(value: f64, weight: Option<f64>) -> serde_json::Value {
    let mut row = json!({
        "flowCode": "X",
        "cmdCode": "61",
        "period": "2025",
        "reporterCode": 504,
        "partnerCode": 0,
        "reporterDesc": "Maroc",
        "partnerDesc": "Monde",
        "primaryValue": value,
    });
    if let Some(w) = weight {
        row["netWgt"] = json!(w);
    }
    json!({ "data": [row] })
}

#[tokio::test]
async fn refetch_merges_into_a_single_record() {
    let ctx = ctx();
    let server = MockServer::start().await;

    // First fetch: value 1000, no weight reported.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(fixture(1000.0, None)))
        .mount(&server)
        .await;
    let agent = ComtradeAgent::new(&ctx).with_base_url(server.uri());
    let first = agent.fetch_data().await;
    // both sub-fetches saw the fixture; the store merged them into one key
    assert_eq!(first.records, 2);
    assert!(first.failures.is_empty());

    // Second fetch: refined value plus a weight measure.
    server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(fixture(1200.0, Some(50.0))))
        .mount(&server)
        .await;
    let second = agent.fetch_data().await;
    assert_eq!(second.records, 2);

    let key = TradeKey {
        source: "un_comtrade".into(),
        reporter_code: "504".into(),
        partner_code: "0".into(),
        hs_code: "61".into(),
        flow: Flow::Export,
        period: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        frequency: Frequency::Annual,
    };
    assert_eq!(ctx.store.trade_count(), 1);
    let rec = ctx.store.get_trade(&key).expect("record stored");
    assert_eq!(rec.fields.value_usd, Some(1200.0));
    assert_eq!(rec.fields.weight_kg, Some(50.0));
    // label survived from the first write
    assert_eq!(rec.fields.reporter_name.as_deref(), Some("Maroc"));

    // one call per sub-fetch per run
    assert_eq!(ctx.status.calls_today("un_comtrade"), 4);
}
