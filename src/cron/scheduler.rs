//! Cron scheduler for periodic background tasks.
//!
//! Currently a single job: the null-image backfill sweep, which retries
//! off-chain image resolution outside the transfer path.

use std::sync::Arc;

use anyhow::Result;
use log::{error, info};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::db::Database;
use crate::worker::MetadataResolver;

use super::jobs;

/// Configuration for cron job intervals
#[derive(Debug, Clone)]
pub struct CronSettings {
    /// Interval for the null-image backfill sweep - default 10 minutes
    pub backfill_images_interval_secs: u64,
    /// Maximum tokens retried per sweep
    pub backfill_images_batch_limit: i64,
}

impl Default for CronSettings {
    fn default() -> Self {
        Self {
            backfill_images_interval_secs: 600,
            backfill_images_batch_limit: 500,
        }
    }
}

/// Cron scheduler that manages periodic background jobs.
pub struct CronScheduler {
    db: Arc<Database>,
    metadata: Arc<MetadataResolver>,
    settings: Arc<CronSettings>,
}

impl CronScheduler {
    pub fn new(db: Arc<Database>, metadata: Arc<MetadataResolver>, settings: CronSettings) -> Self {
        Self {
            db,
            metadata,
            settings: Arc::new(settings),
        }
    }

    /// Starts the cron scheduler and runs until cancellation.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        let mut scheduler = JobScheduler::new().await?;

        self.register_backfill_images_job(&scheduler).await?;

        scheduler.start().await?;
        info!("Cron scheduler started");

        cancellation_token.cancelled().await;
        info!("Cron scheduler shutting down...");

        scheduler.shutdown().await?;
        Ok(())
    }

    async fn register_backfill_images_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let db = self.db.clone();
        let metadata = self.metadata.clone();
        let interval = self.settings.backfill_images_interval_secs;
        let batch_limit = self.settings.backfill_images_batch_limit;

        let job = Job::new_repeated_async(
            std::time::Duration::from_secs(interval),
            move |_uuid, _lock| {
                let db = db.clone();
                let metadata = metadata.clone();
                Box::pin(async move {
                    if let Err(e) = jobs::backfill_images::run(&db, &metadata, batch_limit).await {
                        error!("Failed to backfill token images: {:#}", e);
                    }
                })
            },
        )?;

        scheduler.add(job).await?;
        info!("Registered backfill_images job (every {}s)", interval);
        Ok(())
    }
}
