use crate::cli::commands::open_engine;
use crate::cli::parser::Commands;
use crate::config::Config;
use crate::core::scheduler::{Job, Scheduler};
use crate::errors::{AppError, AppResult};
use crate::ui::messages::{error, field, success};

/// Handle the `cleanup` command: one run of the scheduler pipeline.
pub async fn handle(cmd: &Commands, cfg: &Config) -> AppResult<()> {
    let Commands::Cleanup {
        checkout_only,
        purge_only,
    } = cmd
    else {
        return Ok(());
    };

    let job = match (checkout_only, purge_only) {
        (true, _) => Job::CheckoutAll,
        (_, true) => Job::Purge,
        _ => Job::Cleanup,
    };

    let engine = open_engine(cfg)?;
    let scheduler = Scheduler::new(engine, Vec::new());
    let report = scheduler.run_job(job).await;

    if let Some(n) = report.checked_out {
        field("checked out", n);
    }
    if let Some(p) = report.purged {
        field("visits", p.visits);
        field("contacts", p.contacts);
        field("guests", p.guests);
    }

    if report.is_success() {
        success(format!("{} completed", job.name()));
        Ok(())
    } else {
        for failure in &report.failures {
            error(failure);
        }
        Err(AppError::SchedulerJob {
            job: job.name().to_string(),
            reason: report.failures.join("; "),
        })
    }
}
