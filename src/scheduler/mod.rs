//! Periodic per-country harvest jobs.
//!
//! Every job gets its own tokio task driving an interval timer. A tick that
//! finds the job still running is coalesced (dropped, not queued). Each
//! execution runs in a separate task, so a panic or error in one run is
//! contained and counted without touching the timer or other jobs.

use crate::config::SchedulerConfig;
use crate::pipeline::Pipeline;
use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Unit of work fired on every accepted tick.
#[async_trait]
pub trait ScheduledTask: Send + Sync + 'static {
    async fn run(&self) -> Result<()>;
}

/// Execution counters for one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub completed: u64,
    pub coalesced: u64,
    pub failed: u64,
}

#[derive(Debug)]
struct JobState {
    step: TimeDelta,
    running: AtomicBool,
    next_run: Mutex<Option<DateTime<Utc>>>,
    completed: AtomicU64,
    coalesced: AtomicU64,
    failed: AtomicU64,
}

impl JobState {
    fn new(step: TimeDelta) -> Self {
        Self {
            step,
            running: AtomicBool::new(false),
            next_run: Mutex::new(None),
            completed: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Move the advertised next run forward by one period. Never goes back in
    /// time, even if the wall clock does.
    fn advance_next_run(&self) {
        let Ok(mut next) = self.next_run.lock() else {
            return;
        };
        let from_now = Utc::now().checked_add_signed(self.step);
        let from_prev = next.and_then(|prev| prev.checked_add_signed(self.step));
        *next = match (from_now, from_prev) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    fn next_run(&self) -> Option<DateTime<Utc>> {
        self.next_run.lock().ok().and_then(|n| *n)
    }

    fn stats(&self) -> JobStats {
        JobStats {
            completed: self.completed.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

struct JobHandle {
    state: Arc<JobState>,
    cancel: CancellationToken,
    driver: JoinHandle<()>,
}

// ── Manager ───────────────────────────────────────────────────────────────────

/// Registry of periodic jobs keyed by id.
pub struct ScheduleManager {
    jobs: BTreeMap<String, JobHandle>,
    shutdown: CancellationToken,
}

impl Default for ScheduleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduleManager {
    pub fn new() -> Self {
        Self {
            jobs: BTreeMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start a job whose first run happens one `interval` from now.
    /// Re-using an id replaces (and stops) the previous job.
    pub fn add_job(
        &mut self,
        id: impl Into<String>,
        interval: Duration,
        task: Arc<dyn ScheduledTask>,
    ) -> Result<()> {
        let id = id.into();
        ensure!(!interval.is_zero(), "job {id}: interval must be positive");
        let step = TimeDelta::from_std(interval)
            .with_context(|| format!("job {id}: interval {interval:?} out of range"))?;

        if let Some(old) = self.jobs.remove(&id) {
            warn!(job_id = %id, "Replacing existing job");
            old.cancel.cancel();
        }

        let state = Arc::new(JobState::new(step));
        state.advance_next_run();

        let cancel = self.shutdown.child_token();
        let driver = tokio::spawn(drive(
            id.clone(),
            interval,
            Arc::clone(&state),
            task,
            cancel.clone(),
        ));

        info!(job_id = %id, "Scheduled every {:?}", interval);
        self.jobs.insert(
            id,
            JobHandle {
                state,
                cancel,
                driver,
            },
        );
        Ok(())
    }

    pub fn job_ids(&self) -> Vec<String> {
        self.jobs.keys().cloned().collect()
    }

    /// `None` for an unknown id.
    pub fn next_run_time(&self, id: &str) -> Option<DateTime<Utc>> {
        self.jobs.get(id).and_then(|job| job.state.next_run())
    }

    pub fn next_run_times(&self) -> BTreeMap<String, Option<DateTime<Utc>>> {
        self.jobs
            .iter()
            .map(|(id, job)| (id.clone(), job.state.next_run()))
            .collect()
    }

    pub fn job_stats(&self, id: &str) -> Option<JobStats> {
        self.jobs.get(id).map(|job| job.state.stats())
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.jobs
            .get(id)
            .is_some_and(|job| job.state.running.load(Ordering::Acquire))
    }

    /// Stop all timers. Runs already in flight are not interrupted.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for (id, job) in self.jobs {
            if let Err(e) = job.driver.await {
                warn!(job_id = %id, "Timer task ended abnormally: {}", e);
            }
        }
        info!("Scheduler stopped");
    }
}

async fn drive(
    id: String,
    period: Duration,
    state: Arc<JobState>,
    task: Arc<dyn ScheduledTask>,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        state.advance_next_run();

        if state
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            state.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!(job_id = %id, "Still running, tick coalesced");
            continue;
        }

        let id = id.clone();
        let state = Arc::clone(&state);
        let task = Arc::clone(&task);
        tokio::spawn(async move {
            let outcome = tokio::spawn(async move { task.run().await }).await;
            match outcome {
                Ok(Ok(())) => {
                    state.completed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(e)) => {
                    error!(job_id = %id, "Job failed: {:#}", e);
                    state.failed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    error!(job_id = %id, "Job aborted: {}", e);
                    state.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
            state.running.store(false, Ordering::Release);
        });
    }
}

// ── Country jobs ──────────────────────────────────────────────────────────────

pub fn job_id_for(country: &str) -> String {
    format!("indeed_scrape_job_{}", country.trim().to_lowercase())
}

pub struct CountryScrapeTask {
    pipeline: Arc<Pipeline>,
    country: String,
    max_pages: u32,
}

impl CountryScrapeTask {
    pub fn new(pipeline: Arc<Pipeline>, country: impl Into<String>, max_pages: u32) -> Self {
        Self {
            pipeline,
            country: country.into(),
            max_pages,
        }
    }
}

#[async_trait]
impl ScheduledTask for CountryScrapeTask {
    async fn run(&self) -> Result<()> {
        self.pipeline
            .run_scrape_job(self.max_pages, &self.country)
            .await;
        Ok(())
    }
}

/// One job per configured country, all on the same interval.
pub fn schedule_countries(
    manager: &mut ScheduleManager,
    pipeline: Arc<Pipeline>,
    cfg: &SchedulerConfig,
) -> Result<()> {
    let interval = Duration::from_secs(cfg.interval_secs);
    for country in &cfg.countries {
        let task = CountryScrapeTask::new(Arc::clone(&pipeline), country.clone(), cfg.max_pages);
        manager.add_job(job_id_for(country), interval, Arc::new(task))?;
    }
    Ok(())
}
