//! Cron-driven pipeline triggering.
//!
//! `start` runs the pipeline once immediately, then on every cron tick.
//! Ticks that land while a run is in progress are rejected by the
//! orchestrator and logged. Every run is tracked so `stop` can wait for
//! in-flight runs to release the run lock.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use threadpress_common::PipelineError;

use crate::orchestrator::PipelineOrchestrator;

/// Accepts 5-field (minute-first) or 6-field (second-first) cron expressions.
/// 5-field expressions fire at second 0.
pub fn normalize_cron(expr: &str) -> String {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() == 5 {
        format!("0 {}", fields.join(" "))
    } else {
        fields.join(" ")
    }
}

pub struct SchedulerHandle {
    scheduler: JobScheduler,
    cancel: CancellationToken,
    runs: TaskTracker,
}

impl SchedulerHandle {
    pub async fn start(orchestrator: Arc<PipelineOrchestrator>, schedule: &str) -> Result<Self> {
        let cron = normalize_cron(schedule);
        let cancel = CancellationToken::new();
        let runs = TaskTracker::new();
        let scheduler = JobScheduler::new().await?;

        let job_orchestrator = orchestrator.clone();
        let job_cancel = cancel.clone();
        let job_runs = runs.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let orchestrator = job_orchestrator.clone();
            let cancel = job_cancel.clone();
            Box::pin(job_runs.track_future(async move {
                if cancel.is_cancelled() {
                    return;
                }
                trigger(&orchestrator, &cancel).await;
            }))
        })
        .with_context(|| format!("invalid RUN_SCHEDULE: {schedule}"))?;

        scheduler.add(job).await?;
        scheduler.start().await?;
        info!(schedule = %cron, "Scheduler started");

        let initial_cancel = cancel.clone();
        runs.spawn(async move {
            info!("Running initial pipeline run");
            trigger(&orchestrator, &initial_cancel).await;
        });

        Ok(Self {
            scheduler,
            cancel,
            runs,
        })
    }

    /// Stops future ticks, cancels runs in flight and waits for them to
    /// release the run lock.
    pub async fn stop(mut self) -> Result<()> {
        self.cancel.cancel();
        self.scheduler.shutdown().await?;
        self.runs.close();
        self.runs.wait().await;
        info!("Scheduler stopped");
        Ok(())
    }
}

async fn trigger(orchestrator: &PipelineOrchestrator, cancel: &CancellationToken) {
    match orchestrator.run(cancel).await {
        Ok(stats) if stats.success() => {
            info!(outcome = %stats.outcome, "Scheduled run finished");
        }
        Ok(stats) => {
            error!(outcome = %stats.outcome, errors = stats.errors.len(), "Scheduled run failed");
        }
        Err(PipelineError::RunRejected) => {
            warn!("Previous run still in progress, skipping this trigger");
        }
        Err(e) => error!(error = %e, "Scheduled run could not start"),
    }
}
