//! textile-trade-watch: binary entrypoint.
//! Boots the ingestion scheduler and the Axum status/trigger API.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use textile_trade_watch::agents::AgentContext;
use textile_trade_watch::api::{create_router, AppState};
use textile_trade_watch::config::Settings;
use textile_trade_watch::frameworks::FrameworkCache;
use textile_trade_watch::metrics::Metrics;
use textile_trade_watch::pipeline::PipelineOrchestrator;
use textile_trade_watch::scheduler::{SchedulerConfig, SchedulerService};
use textile_trade_watch::store::runs::RunLog;
use textile_trade_watch::store::status::SourceStatusTracker;
use textile_trade_watch::store::RecordStore;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("textile_trade_watch=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let settings = Arc::new(Settings::from_env());
    let metrics = Metrics::init();

    let store = Arc::new(
        RecordStore::open(&settings.data_dir).context("opening record store")?,
    );
    let status = Arc::new(
        SourceStatusTracker::open(&settings.data_dir).context("opening status tracker")?,
    );
    let run_log = Arc::new(RunLog::open(&settings.data_dir).context("opening run log")?);
    let frameworks = Arc::new(FrameworkCache::new());

    let ctx = AgentContext {
        store,
        status: status.clone(),
        settings: settings.clone(),
    };
    let orchestrator = Arc::new(PipelineOrchestrator::new(
        ctx,
        run_log.clone(),
        frameworks,
    ));

    let scheduler = SchedulerService::new(
        SchedulerConfig::from_settings(&settings),
        orchestrator.clone(),
    )?;
    let _scheduler_handle = scheduler.start();

    let state = AppState {
        scheduler: scheduler.clone(),
        orchestrator,
        run_log,
        status,
    };
    let router = create_router(state).merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("binding {}", settings.bind_addr))?;
    tracing::info!(addr = %settings.bind_addr, "listening");
    axum::serve(listener, router).await.context("serving")?;

    scheduler.stop();
    Ok(())
}
