use serde::Serialize;

use crate::worker::parser::TransferEvent;

/// One observed ERC-721 transfer event (PostgreSQL).
///
/// Primary Key: id (unique per log)
///
/// Immutable fact; rows are insert-only and never updated.
#[derive(Debug, Clone, Serialize)]
pub struct Transfer {
    pub id: String,
    pub from_address: String,
    pub to_address: String,
    /// Composite key of the transferred token.
    pub token: String,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub tx_hash: String,
}

impl Transfer {
    pub fn from_event(event: &TransferEvent, token_key: String) -> Self {
        Self {
            id: event.id.clone(),
            from_address: event.from.clone(),
            to_address: event.to.clone(),
            token: token_key,
            block_number: event.block_number,
            block_timestamp: event.timestamp,
            tx_hash: event.tx_hash.clone(),
        }
    }
}
