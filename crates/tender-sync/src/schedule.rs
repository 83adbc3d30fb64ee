//! Cron wiring: ingestion, evaluation and digest daily, discovery weekly.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::TenderIntel;

fn cron_job<F, Fut>(cron: &str, intel: &Arc<TenderIntel>, task: F) -> Result<Job>
where
    F: Fn(Arc<TenderIntel>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let intel = Arc::clone(intel);
    Job::new_async(cron, move |_uuid, _l| Box::pin(task(Arc::clone(&intel))))
        .with_context(|| format!("creating scheduler job for cron {cron}"))
}

async fn scheduled_ingestion(intel: Arc<TenderIntel>) {
    let summary = intel.run_ingestion(intel.cron_window(), None).await;
    info!(
        run_id = %summary.run_id,
        status = %summary.status,
        new_items = summary.new_raw_captures,
        "scheduled ingestion finished"
    );
}

async fn scheduled_evaluation(intel: Arc<TenderIntel>) {
    let summary = intel.run_evaluation(None).await;
    info!(
        run_id = %summary.run_id,
        status = %summary.status,
        evaluated = summary.evaluated.len(),
        "scheduled evaluation finished"
    );
}

async fn scheduled_discovery(intel: Arc<TenderIntel>) {
    let summary = intel.run_source_discovery(intel.cron_window(), None).await;
    info!(
        run_id = %summary.run_id,
        status = %summary.status,
        new_sources = summary.new_sources.len(),
        "scheduled discovery finished"
    );
}

async fn scheduled_digest(intel: Arc<TenderIntel>) {
    match intel.get_digest().await {
        Ok(digest) => info!(date = %digest.date, entries = digest.entries.len(), "scheduled digest built"),
        Err(err) => warn!(error = %err, "scheduled digest failed"),
    }
}

/// Builds the job scheduler, or `None` when scheduling is disabled. Cron
/// expressions are six-field and evaluated in UTC.
pub async fn maybe_build_scheduler(intel: &Arc<TenderIntel>) -> Result<Option<JobScheduler>> {
    let config = intel.config();
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let jobs = [
        cron_job(&config.ingest_cron, intel, scheduled_ingestion)?,
        cron_job(&config.evaluate_cron, intel, scheduled_evaluation)?,
        cron_job(&config.discovery_cron, intel, scheduled_discovery)?,
        cron_job(&config.digest_cron, intel, scheduled_digest)?,
    ];
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    for job in jobs {
        sched.add(job).await.context("adding scheduler job")?;
    }
    info!(
        ingest = %config.ingest_cron,
        evaluate = %config.evaluate_cron,
        discovery = %config.discovery_cron,
        digest = %config.digest_cron,
        "scheduler configured"
    );
    Ok(Some(sched))
}

/// Runs the scheduler until ctrl-c.
pub async fn run_until_shutdown(intel: Arc<TenderIntel>) -> Result<()> {
    let Some(mut sched) = maybe_build_scheduler(&intel).await? else {
        warn!("scheduler disabled; set TENDER_SCHEDULER_ENABLED=true to run cron jobs");
        return Ok(());
    };
    sched.start().await.context("starting scheduler")?;
    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    info!("shutting down scheduler");
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(())
}
