//! Interval-driven auto sync on top of `tokio-cron-scheduler`.

use anyhow::{bail, Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::service::SyncService;

/// Cron expression (seconds field first) firing every `minutes`.
///
/// Sub-hour intervals repeat within the hour, whole-hour intervals repeat
/// within the day, and a day or more runs once daily at midnight.
pub fn cron_expression_for_interval(minutes: u32) -> Result<String> {
    match minutes {
        0 => bail!("sync interval must be at least one minute"),
        1..=59 => Ok(format!("0 */{minutes} * * * *")),
        m if m >= 1440 => Ok("0 0 0 * * *".to_string()),
        m if m % 60 == 0 => Ok(format!("0 0 */{} * * *", m / 60)),
        m => {
            let hours = (m / 60).max(1);
            warn!(minutes = m, hours, "interval is not a whole number of hours; rounding down");
            Ok(format!("0 0 */{hours} * * *"))
        }
    }
}

/// Build and start a scheduler whose single job runs the auto-sync tick.
pub async fn start_scheduler(service: SyncService, interval_minutes: u32) -> Result<JobScheduler> {
    let cron = cron_expression_for_interval(interval_minutes)?;
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let service = service.clone();
        Box::pin(async move {
            service.run_scheduled_tick().await;
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    sched.start().await.context("starting scheduler")?;
    info!(cron, "auto sync scheduler started");
    Ok(sched)
}
