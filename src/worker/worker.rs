use alloy::{primitives::U256, sol_types::SolEvent};
use anyhow::Context;
use hypersync_client::{
    net_types::{BlockField, LogField, LogFilter, Query},
    Client, ClientConfig, SerializationFormat, StreamConfig,
};
use log::{info, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    abis::erc721,
    config::Settings,
    db::models::SyncCheckpoint,
    worker::{classifier::ContractClassifier, engine::ReconciliationEngine, parser},
    Database,
};

/// Interval for logging progress updates (10 seconds)
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Timeout for receiving data from HyperSync stream (5 minutes)
/// If no data is received within this time, reconnect the stream
const STREAM_RECV_TIMEOUT: Duration = Duration::from_secs(300);

/// Main indexer worker.
///
/// Streams ERC-721 transfer logs from HyperSync and processes them in
/// batches: decodes logs, filters out non-ERC-721 contracts through the
/// classifier, hands the batch to the reconciliation engine, then advances
/// the sync checkpoint. Batches run strictly one at a time, in increasing
/// block order.
pub struct ChainWorker {
    client: Arc<Client>,
    db: Arc<Database>,
    classifier: ContractClassifier,
    engine: ReconciliationEngine,
    filters: LogFilter,
    tip_poll_interval: Duration,
}

impl ChainWorker {
    pub fn new(
        settings: &Settings,
        db: Arc<Database>,
        classifier: ContractClassifier,
        engine: ReconciliationEngine,
    ) -> anyhow::Result<Self> {
        let url = settings
            .indexer
            .hypersync_url
            .parse()
            .context("Invalid HyperSync URL")?;

        let client_config = ClientConfig {
            serialization_format: SerializationFormat::CapnProto {
                should_cache_queries: false,
            },
            http_req_timeout_millis: 120_000,
            url,
            api_token: settings.indexer.hypersync_bearer_token.clone(),
            max_num_retries: 5,
            ..Default::default()
        };

        let client =
            Arc::new(Client::new(client_config).context("Failed to create HyperSync client")?);

        Ok(Self {
            client,
            db,
            classifier,
            engine,
            filters: LogFilter::all().and_topic0([erc721::Transfer::SIGNATURE_HASH.0])?,
            tip_poll_interval: Duration::from_millis(
                settings.indexer.tip_poll_interval_milliseconds,
            ),
        })
    }

    pub async fn run(&self, cancellation_token: CancellationToken) -> anyhow::Result<()> {
        let mut last_progress_log = Instant::now();

        loop {
            if cancellation_token.is_cancelled() {
                info!("Indexer received cancellation signal");
                break;
            }

            let mut last_synced_block: u64 =
                match self.db.postgres.get_sync_checkpoint().await {
                    Ok(Some(checkpoint)) => checkpoint.last_indexed_block,
                    Ok(None) => 0,
                    Err(e) => {
                        warn!(
                            "Failed to fetch checkpoint from postgres: {:?}. Starting from block 0.",
                            e
                        );
                        0
                    },
                };

            let query = Query::new()
                .from_block(last_synced_block)
                .where_logs(self.filters.clone())
                .select_block_fields([BlockField::Number, BlockField::Timestamp])
                .select_log_fields([
                    LogField::BlockNumber,
                    LogField::TransactionHash,
                    LogField::LogIndex,
                    LogField::Address,
                    LogField::Data,
                    LogField::Topic0,
                    LogField::Topic1,
                    LogField::Topic2,
                    LogField::Topic3,
                ]);

            let mut stream = self.client.stream(query, StreamConfig::default()).await?;

            while let Some(res) = tokio::time::timeout(STREAM_RECV_TIMEOUT, stream.recv())
                .await
                .map_err(|_| {
                    anyhow::anyhow!("Stream recv timeout after {:?}", STREAM_RECV_TIMEOUT)
                })?
            {
                let res = res.context("Stream error")?;

                // Block timestamps for the log batch
                let block_timestamps: FxHashMap<u64, u64> = res
                    .data
                    .blocks
                    .iter()
                    .flatten()
                    .filter_map(|b| {
                        let n = b.number?;
                        let t = U256::from_be_slice(b.timestamp.as_ref()?).to::<u64>();
                        Some((n, t))
                    })
                    .collect();

                // Decode transfer facts in chain order
                let decoded =
                    parser::parse_logs(res.data.logs.into_iter().flatten(), &block_timestamps);

                // Classification gate: only transfers from verified ERC-721
                // contracts reach the engine. Classify each distinct contract
                // once per batch at its first event's height.
                let mut verified: FxHashSet<String> = FxHashSet::default();
                let mut rejected: FxHashSet<String> = FxHashSet::default();

                for event in &decoded {
                    if verified.contains(&event.contract) || rejected.contains(&event.contract) {
                        continue;
                    }
                    if self.classifier.classify(&event.contract, event.block_number).await {
                        verified.insert(event.contract.clone());
                    } else {
                        rejected.insert(event.contract.clone());
                    }
                }

                let transfers: Vec<_> = decoded
                    .into_iter()
                    .filter(|t| verified.contains(&t.contract))
                    .collect();

                // A store failure inside the engine aborts here; the run
                // loop restarts the stream from the unchanged checkpoint.
                self.engine.process_batch(&transfers).await?;

                let next_block = res.next_block;
                last_synced_block = next_block;
                let checkpoint = SyncCheckpoint::new(next_block);

                if let Err(e) = self.db.postgres.set_sync_checkpoint(&checkpoint).await {
                    // Don't continue if the checkpoint update fails - this
                    // could cause the indexer to skip blocks on restart
                    return Err(anyhow::anyhow!(
                        "Critical: Failed to update checkpoint: {:?}. Stopping to prevent data loss.",
                        e
                    ));
                }

                if last_progress_log.elapsed() >= PROGRESS_LOG_INTERVAL {
                    info!(
                        "Synced to block {} ({} transfers in last batch)",
                        next_block,
                        transfers.len()
                    );
                    last_progress_log = Instant::now();
                }
            }

            // HEARTBEAT: refresh the checkpoint timestamp even when no new
            // logs arrived, so lag monitoring stays quiet during idle periods.
            let checkpoint = SyncCheckpoint::new(last_synced_block);
            if let Err(e) = self.db.postgres.set_sync_checkpoint(&checkpoint).await {
                warn!("Failed to update heartbeat checkpoint: {:?}", e);
            }

            // Sleep before next poll
            tokio::time::sleep(self.tip_poll_interval).await;
        }

        Ok(())
    }
}
