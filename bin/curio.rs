use std::sync::Arc;

use anyhow::Context;
use jemallocator::Jemalloc;
use log::{error, info, warn, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use curio::{
    worker::{BalanceTracker, CollectionFetcher},
    ChainWorker, ContractClassifier, CronScheduler, CronSettings, Database, MetadataResolver,
    ReconciliationEngine, Settings,
};

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .unwrap();

    // Load configuration
    let settings = Arc::new(
        Settings::new()
            .context("Failed to load config.yaml. Please ensure it exists and is valid")?,
    );

    let cancellation_token = CancellationToken::new();

    let db = Arc::new(
        Database::new(settings.clone())
            .await
            .context("Failed to initialize database connection")?,
    );

    run_indexer(settings, db, cancellation_token).await
}

async fn run_indexer(
    settings: Arc<Settings>,
    db: Arc<Database>,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    let metadata = Arc::new(
        MetadataResolver::new(&settings.indexer, &settings.metadata)
            .context("Failed to create metadata resolver")?,
    );

    let classifier = ContractClassifier::new(&settings.indexer, db.clone())
        .context("Failed to create contract classifier")?;

    let collections = CollectionFetcher::new(&settings.indexer, db.clone())
        .context("Failed to create collection fetcher")?;

    let balances = BalanceTracker::new(settings.indexer.tracked_collections.clone());

    let engine = ReconciliationEngine::new(db.clone(), collections, metadata.clone(), balances);

    let worker = Arc::new(
        ChainWorker::new(&settings, db.clone(), classifier, engine)
            .context("Failed to create chain worker")?,
    );

    // Spawn the indexer worker; restart the sync loop on failure so a
    // transient store outage re-processes from the last checkpoint.
    let worker_token = cancellation_token.child_token();
    let worker_handle = tokio::spawn(async move {
        while !worker_token.is_cancelled() {
            if let Err(e) = worker.run(worker_token.clone()).await {
                warn!("Indexer stopped with error, restarting from checkpoint: {:#}", e);
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        }
    });

    info!("Indexer worker started");

    // Spawn the cron scheduler for the image backfill sweep
    let cron_scheduler = CronScheduler::new(db.clone(), metadata.clone(), CronSettings::default());

    let cron_token = cancellation_token.child_token();
    let cron_handle = tokio::spawn(async move {
        if let Err(e) = cron_scheduler.run(cron_token).await {
            error!("Cron scheduler failed: {:#}", e);
        }
    });

    info!("Cron scheduler started - background jobs will run periodically");

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    info!("Indexer running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
        };
    }

    info!("Finishing all tasks...");

    cancellation_token.cancel();

    info!("Waiting for indexer worker to stop...");
    let _ = worker_handle.await;

    info!("Waiting for cron scheduler to stop...");
    let _ = cron_handle.await;

    info!("All tasks stopped");
    Ok(())
}
