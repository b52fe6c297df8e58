//! Time-of-day job runner for the cleanup pipeline.

use crate::core::auth::AuthContext;
use crate::core::engine::Engine;
use crate::core::tracer::PurgeReport;
use crate::errors::AppError;
use crate::utils::time::resolve_local;
use chrono::{DateTime, Days, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Job {
    /// Force checkout, then retention purge.
    Cleanup,
    CheckoutAll,
    Purge,
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::Cleanup => "cleanup",
            Job::CheckoutAll => "checkout_all",
            Job::Purge => "purge",
        }
    }
}

/// Run `job` every day at `hour:00` in the scheduler's timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub hour: u32,
    pub job: Job,
}

/// Outcome of one pipeline run. A failed step leaves its field `None` and
/// adds an entry to `failures`; the other step still runs.
#[derive(Debug, Default, Serialize)]
pub struct CleanupReport {
    pub checked_out: Option<usize>,
    pub purged: Option<PurgeReport>,
    pub failures: Vec<String>,
}

impl CleanupReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug)]
pub struct Scheduler {
    engine: Arc<Engine>,
    entries: Vec<ScheduleEntry>,
    timezone: Tz,
    finished: Option<mpsc::UnboundedSender<Job>>,
}

impl Scheduler {
    pub fn new(engine: Arc<Engine>, entries: Vec<ScheduleEntry>) -> Self {
        let timezone = engine.settings().timezone;
        Self {
            engine,
            entries,
            timezone,
            finished: None,
        }
    }

    /// One `Cleanup` entry per configured autocheckout hour.
    pub fn from_settings(engine: Arc<Engine>) -> Self {
        let entries = engine
            .settings()
            .autocheckout_hours
            .iter()
            .map(|&hour| ScheduleEntry {
                hour,
                job: Job::Cleanup,
            })
            .collect();
        Self::new(engine, entries)
    }

    /// Report every job the run loop completes on `tx`.
    pub fn notify_finished(mut self, tx: mpsc::UnboundedSender<Job>) -> Self {
        self.finished = Some(tx);
        self
    }

    /// Next trigger strictly after `now`, with the job it fires.
    ///
    /// An hour skipped by a DST change fires at the end of the gap; an hour
    /// that happens twice fires on its first pass only.
    pub fn next_fire(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, Job)> {
        let today = now.with_timezone(&self.timezone).date_naive();

        self.entries
            .iter()
            .filter_map(|entry| {
                let at_hour = |date: NaiveDate| {
                    date.and_hms_opt(entry.hour, 0, 0)
                        .and_then(|t| resolve_local(self.timezone, t))
                        .map(|dt| dt.with_timezone(&Utc))
                };
                // yesterday's slot can still be ahead when a gap pushed it
                // past midnight
                let mut day = today.checked_sub_days(Days::new(1))?;
                for _ in 0..3 {
                    if let Some(fire) = at_hour(day)
                        && fire > now
                    {
                        return Some((fire, entry.job));
                    }
                    day = day.checked_add_days(Days::new(1))?;
                }
                None
            })
            .min_by_key(|(at, _)| *at)
    }

    /// `checkout_all` followed by `purge_older_than(now - retention)`.
    pub async fn run_cleanup(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        self.checkout_step(&mut report).await;
        self.purge_step(&mut report).await;
        report
    }

    pub async fn run_job(&self, job: Job) -> CleanupReport {
        let mut report = CleanupReport::default();
        match job {
            Job::Cleanup => return self.run_cleanup().await,
            Job::CheckoutAll => self.checkout_step(&mut report).await,
            Job::Purge => self.purge_step(&mut report).await,
        }
        report
    }

    async fn checkout_step(&self, report: &mut CleanupReport) {
        match self.engine.ledger().checkout_all(&AuthContext::system()).await {
            Ok(n) => report.checked_out = Some(n),
            Err(e) => {
                let err = AppError::job(Job::CheckoutAll.name(), e);
                error!(error = %err, "scheduled step failed");
                report.failures.push(err.to_string());
            }
        }
    }

    async fn purge_step(&self, report: &mut CleanupReport) {
        let horizon = self.engine.clock().now() - self.engine.settings().retention;
        match self
            .engine
            .tracer()
            .purge_older_than(&AuthContext::system(), horizon)
            .await
        {
            Ok(purged) => report.purged = Some(purged),
            Err(e) => {
                let err = AppError::job(Job::Purge.name(), e);
                error!(error = %err, "scheduled step failed");
                report.failures.push(err.to_string());
            }
        }
    }

    /// Run the pipeline once if the configuration asks for it.
    pub async fn startup(&self) -> Option<CleanupReport> {
        if !self.engine.settings().clean_on_start {
            return None;
        }
        info!("running cleanup at startup");
        Some(self.run_cleanup().await)
    }

    /// Sleep until each trigger and run its job, until `shutdown` turns true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(entries = self.entries.len(), "scheduler started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let now = self.engine.clock().now();
            let Some((fire_at, job)) = self.next_fire(now) else {
                // nothing scheduled: just wait for shutdown
                if shutdown.changed().await.is_err() {
                    break;
                }
                continue;
            };
            let wait = (fire_at - now).to_std().unwrap_or_default();

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    info!(job = job.name(), "scheduled job firing");
                    let report = self.run_job(job).await;
                    if !report.is_success() {
                        warn!(job = job.name(), failures = report.failures.len(), "scheduled job finished with errors");
                    }
                    if let Some(tx) = &self.finished {
                        let _ = tx.send(job);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("scheduler stopped");
    }
}
