use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::orchestrator::RunOrchestrator;

/// Six-field cron expression firing at the top of every `hours`-th hour.
pub fn cron_for_hours(hours: u32) -> String {
    format!("0 0 */{hours} * * *")
}

/// Register the recurring run and start the scheduler.
///
/// The returned handle must be kept alive; dropping it stops the job. A tick
/// that arrives while the previous run is still going is skipped.
pub async fn build_scheduler(orchestrator: Arc<RunOrchestrator>, hours: u32) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = cron_for_hours(hours);
    let running = Arc::new(Mutex::new(()));

    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let orchestrator = Arc::clone(&orchestrator);
        let running = Arc::clone(&running);
        Box::pin(async move {
            let Ok(_guard) = running.try_lock() else {
                warn!("scheduler: previous run still in progress; skipping tick");
                return;
            };
            info!("scheduler: starting trend run");
            match orchestrator.run().await {
                Ok(report) => info!(summary = %report.summary_line(), "scheduler: trend run complete"),
                Err(err) => error!(error = %err, "scheduler: trend run failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;

    sched.add(job).await.context("adding scheduler job")?;
    sched.start().await.context("starting scheduler")?;
    info!(cron = %cron, hours, "scheduler: registered trend run");
    Ok(sched)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cron_fires_every_n_hours_on_the_hour() {
        assert_eq!(cron_for_hours(3), "0 0 */3 * * *");
        assert_eq!(cron_for_hours(1), "0 0 */1 * * *");
    }
}
