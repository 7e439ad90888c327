use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Indexer sync progress checkpoint (PostgreSQL).
///
/// Tracks the last successfully indexed block so restarts resume without
/// missing blocks. Re-processing is safe because every write is an upsert
/// keyed by entity identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub last_indexed_block: u64,
    pub updated_at: DateTime<Utc>,
}

impl SyncCheckpoint {
    pub fn new(last_indexed_block: u64) -> Self {
        Self {
            last_indexed_block,
            updated_at: Utc::now(),
        }
    }
}
