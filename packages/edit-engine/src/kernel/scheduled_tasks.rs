//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! ```text
//! Scheduler (every vote_cron_interval)
//!     │
//!     └─► run_vote_tick(now)
//!             ├─► pending edits → accepted / rejected / still waiting
//!             └─► accepted edits → applied / blocked / retried
//! ```
//!
//! The interval is fixed when the job is registered. A reloaded
//! configuration changes thresholds on the next tick but not the interval.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

use super::EngineDeps;
use crate::domains::edits::activities::run_vote_tick;

/// Start all scheduled tasks
pub async fn start_scheduler(deps: EngineDeps) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;
    let interval = deps.config.current().vote_cron_interval;

    // A tick that outlasts the interval makes the next one skip. Overlap would
    // be safe anyway; this just avoids piling up work.
    let running = Arc::new(Mutex::new(()));

    let vote_job = Job::new_repeated_async(interval, move |_uuid, _lock| {
        let deps = deps.clone();
        let running = running.clone();
        Box::pin(async move {
            let Ok(_guard) = running.try_lock() else {
                tracing::warn!("Previous vote tick still running, skipping");
                return;
            };
            let now = deps.clock.now();
            if let Err(e) = run_vote_tick(&deps, now).await {
                tracing::error!("Vote tick failed: {}", e);
            }
        })
    })?;

    scheduler.add(vote_job).await?;
    scheduler.start().await?;

    tracing::info!(interval_secs = interval.as_secs(), "Vote scheduler started");
    Ok(scheduler)
}
