// src/scheduler.rs
//
// Cron-cadence wrapper around the pipeline. One explicit service object with
// init/start/stop lifecycle; no ambient global. Job policy mirrors classic
// cron-runner defaults: coalesce=true (missed firings collapse into a single
// catch-up), max_instances=1 (an in-flight run suppresses new firings), and a
// bounded misfire grace window after which a late firing is dropped.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::pipeline::PipelineOrchestrator;

pub const JOB_ID: &str = "daily_pipeline";
pub const JOB_NAME: &str = "Daily Data Pipeline";

/// The unit of work the scheduler drives. Split out as a trait so tests can
/// hold a run open and probe the admission policy.
#[async_trait]
pub trait PipelineRunner: Send + Sync + 'static {
    async fn run_pipeline(&self);
}

#[async_trait]
impl PipelineRunner for PipelineOrchestrator {
    async fn run_pipeline(&self) {
        self.run().await;
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Daily fire hour, UTC.
    pub hour: u8,
    /// Daily fire minute, UTC.
    pub minute: u8,
    /// Missed firings older than this are dropped instead of run late.
    pub misfire_grace: Duration,
}

impl SchedulerConfig {
    pub fn from_settings(settings: &crate::config::Settings) -> Self {
        Self {
            enabled: settings.scheduler_enabled,
            hour: settings.scheduler_daily_hour,
            minute: settings.scheduler_daily_minute,
            misfire_grace: Duration::seconds(settings.misfire_grace_secs as i64),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub next_run_time: Option<DateTime<Utc>>,
    pub trigger: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub running: bool,
    pub jobs: Vec<JobInfo>,
}

/// Manual trigger refused because a run is already in flight.
#[derive(Debug, Error)]
#[error("a pipeline run is already in progress")]
pub struct AlreadyRunning;

/// What to do with a firing that arrives `late` after its scheduled time.
fn misfire_decision(late: Duration, grace: Duration) -> bool {
    late <= grace
}

struct Inner<R: PipelineRunner> {
    cfg: SchedulerConfig,
    schedule: Schedule,
    runner: Arc<R>,
    /// A pipeline run is in flight (admission control, max_instances=1).
    run_in_flight: AtomicBool,
    /// The cron loop is alive.
    loop_running: AtomicBool,
    next_fire: Mutex<Option<DateTime<Utc>>>,
    /// One coalesced missed firing, honored after the in-flight run ends.
    pending_catchup: Mutex<Option<DateTime<Utc>>>,
    shutdown: tokio::sync::Notify,
}

pub struct SchedulerService<R: PipelineRunner = PipelineOrchestrator> {
    inner: Arc<Inner<R>>,
}

impl<R: PipelineRunner> Clone for SchedulerService<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: PipelineRunner> SchedulerService<R> {
    /// Configure the scheduler. Does NOT start it.
    pub fn new(cfg: SchedulerConfig, runner: Arc<R>) -> Result<Self> {
        let expr = format!("0 {} {} * * *", cfg.minute, cfg.hour);
        let schedule = Schedule::from_str(&expr)
            .with_context(|| format!("invalid cron expression '{expr}'"))?;
        Ok(Self {
            inner: Arc::new(Inner {
                cfg,
                schedule,
                runner,
                run_in_flight: AtomicBool::new(false),
                loop_running: AtomicBool::new(false),
                next_fire: Mutex::new(None),
                pending_catchup: Mutex::new(None),
                shutdown: tokio::sync::Notify::new(),
            }),
        })
    }

    /// Start the cron loop. Returns `None` when the scheduler is disabled.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if !self.inner.cfg.enabled {
            tracing::info!("scheduler is DISABLED via configuration");
            return None;
        }
        if self.inner.loop_running.swap(true, Ordering::SeqCst) {
            return None; // already started
        }
        tracing::info!(
            "scheduler configured: daily pipeline at {:02}:{:02} UTC",
            self.inner.cfg.hour,
            self.inner.cfg.minute
        );
        let inner = self.inner.clone();
        Some(tokio::spawn(async move {
            cron_loop(inner).await;
        }))
    }

    /// Stop the cron loop. An in-flight run proceeds to completion; only
    /// admission of new firings stops.
    pub fn stop(&self) {
        if self.inner.loop_running.swap(false, Ordering::SeqCst) {
            self.inner.shutdown.notify_waiters();
            tracing::info!("scheduler stopped");
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let running = self.inner.loop_running.load(Ordering::SeqCst);
        let jobs = if running {
            vec![JobInfo {
                id: JOB_ID.to_string(),
                name: JOB_NAME.to_string(),
                next_run_time: *self.inner.next_fire.lock().expect("next_fire poisoned"),
                trigger: format!(
                    "cron[hour={:02}, minute={:02}]",
                    self.inner.cfg.hour, self.inner.cfg.minute
                ),
            }]
        } else {
            Vec::new()
        };
        SchedulerStatus {
            enabled: self.inner.cfg.enabled,
            running,
            jobs,
        }
    }

    /// Manual out-of-band trigger. Bypasses the cron cadence but still
    /// respects max_instances=1: refused while a run is in flight.
    pub fn trigger_now(&self) -> Result<(), AlreadyRunning> {
        if !try_begin(&self.inner) {
            return Err(AlreadyRunning);
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            run_and_drain(inner).await;
        });
        Ok(())
    }

    /// True while a pipeline run is in flight.
    pub fn run_in_flight(&self) -> bool {
        self.inner.run_in_flight.load(Ordering::SeqCst)
    }
}

fn try_begin<R: PipelineRunner>(inner: &Inner<R>) -> bool {
    inner
        .run_in_flight
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

/// Run the pipeline, then honor at most one coalesced catch-up firing that
/// arrived while we were busy (and is still within the grace window).
async fn run_and_drain<R: PipelineRunner>(inner: Arc<Inner<R>>) {
    loop {
        inner.runner.run_pipeline().await;

        let pending = inner
            .pending_catchup
            .lock()
            .expect("pending_catchup poisoned")
            .take();
        match pending {
            Some(fire_time)
                if misfire_decision(Utc::now() - fire_time, inner.cfg.misfire_grace) =>
            {
                tracing::info!(%fire_time, "running coalesced catch-up firing");
                continue;
            }
            Some(fire_time) => {
                tracing::warn!(%fire_time, "dropping missed firing beyond grace window");
                break;
            }
            None => break,
        }
    }
    inner.run_in_flight.store(false, Ordering::SeqCst);
}

async fn cron_loop<R: PipelineRunner>(inner: Arc<Inner<R>>) {
    while inner.loop_running.load(Ordering::SeqCst) {
        let now = Utc::now();
        let Some(next) = inner.schedule.after(&now).next() else {
            break;
        };
        *inner.next_fire.lock().expect("next_fire poisoned") = Some(next);

        let wait = (next - now).to_std().unwrap_or_default();
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = inner.shutdown.notified() => break,
        }

        let late = Utc::now() - next;
        if !misfire_decision(late, inner.cfg.misfire_grace) {
            // e.g. the host slept through the window
            tracing::warn!(%next, late_secs = late.num_seconds(), "dropping misfired run");
            continue;
        }

        if try_begin(&inner) {
            let inner2 = inner.clone();
            tokio::spawn(async move {
                run_and_drain(inner2).await;
            });
        } else {
            // coalesce: keep only the newest missed firing
            *inner
                .pending_catchup
                .lock()
                .expect("pending_catchup poisoned") = Some(next);
            tracing::info!(%next, "run in flight, coalescing missed firing");
        }
    }
    *inner.next_fire.lock().expect("next_fire poisoned") = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct GatedRunner {
        release: tokio::sync::Notify,
        runs: std::sync::atomic::AtomicU32,
    }

    impl GatedRunner {
        fn new() -> Self {
            Self {
                release: tokio::sync::Notify::new(),
                runs: std::sync::atomic::AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl PipelineRunner for GatedRunner {
        async fn run_pipeline(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
        }
    }

    fn cfg() -> SchedulerConfig {
        SchedulerConfig {
            enabled: true,
            hour: 2,
            minute: 0,
            misfire_grace: Duration::seconds(3600),
        }
    }

    #[test]
    fn misfire_grace_bounds_late_runs() {
        assert!(misfire_decision(Duration::seconds(0), Duration::seconds(3600)));
        assert!(misfire_decision(Duration::seconds(3600), Duration::seconds(3600)));
        assert!(!misfire_decision(Duration::seconds(3601), Duration::seconds(3600)));
    }

    #[tokio::test]
    async fn manual_trigger_respects_max_instances() {
        let runner = Arc::new(GatedRunner::new());
        let svc = SchedulerService::new(cfg(), runner.clone()).unwrap();

        svc.trigger_now().unwrap();
        // let the spawned run reach its gate
        tokio::task::yield_now().await;
        assert!(svc.run_in_flight());

        // second trigger while the first is still running → refused
        assert!(svc.trigger_now().is_err());
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);

        runner.release.notify_waiters();
        // run finishes and releases admission
        for _ in 0..50 {
            if !svc.run_in_flight() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(!svc.run_in_flight());
        assert!(svc.trigger_now().is_ok());
        runner.release.notify_waiters();
    }

    #[tokio::test]
    async fn disabled_scheduler_does_not_start() {
        let runner = Arc::new(GatedRunner::new());
        let mut config = cfg();
        config.enabled = false;
        let svc = SchedulerService::new(config, runner).unwrap();
        assert!(svc.start().is_none());
        let status = svc.status();
        assert!(!status.enabled);
        assert!(!status.running);
        assert!(status.jobs.is_empty());
    }

    #[tokio::test]
    async fn started_scheduler_reports_job_metadata() {
        let runner = Arc::new(GatedRunner::new());
        let svc = SchedulerService::new(cfg(), runner).unwrap();
        let handle = svc.start().unwrap();
        // give the loop a beat to compute the next fire time
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let status = svc.status();
        assert!(status.enabled);
        assert!(status.running);
        assert_eq!(status.jobs.len(), 1);
        assert_eq!(status.jobs[0].id, JOB_ID);
        let next = status.jobs[0].next_run_time.expect("next fire computed");
        assert!(next > Utc::now());

        svc.stop();
        let _ = handle.await;
        assert!(!svc.status().running);
    }

    #[tokio::test]
    async fn coalesced_catchup_runs_once_within_grace() {
        let runner = Arc::new(GatedRunner::new());
        let svc = SchedulerService::new(cfg(), runner.clone()).unwrap();

        // simulate: run in flight, two firings missed meanwhile
        assert!(try_begin(&svc.inner));
        *svc.inner.pending_catchup.lock().unwrap() = Some(Utc::now());
        *svc.inner.pending_catchup.lock().unwrap() = Some(Utc::now()); // coalesced overwrite

        let inner = svc.inner.clone();
        let drain = tokio::spawn(async move { run_and_drain(inner).await });
        tokio::task::yield_now().await;

        // first run is gated; release it, catch-up should start
        runner.release.notify_waiters();
        for _ in 0..50 {
            if runner.runs.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(runner.runs.load(Ordering::SeqCst), 2);

        runner.release.notify_waiters();
        let _ = drain.await;
        assert!(!svc.run_in_flight());
        // only one catch-up for two missed firings
        assert_eq!(runner.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stale_catchup_is_dropped() {
        let runner = Arc::new(GatedRunner::new());
        let svc = SchedulerService::new(cfg(), runner.clone()).unwrap();

        assert!(try_begin(&svc.inner));
        *svc.inner.pending_catchup.lock().unwrap() =
            Some(Utc::now() - Duration::seconds(7200)); // beyond the 1h grace

        let inner = svc.inner.clone();
        let drain = tokio::spawn(async move { run_and_drain(inner).await });
        tokio::task::yield_now().await;
        runner.release.notify_waiters();
        let _ = drain.await;

        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
        assert!(!svc.run_in_flight());
    }
}
