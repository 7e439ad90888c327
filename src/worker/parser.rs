//! Log decoding for HyperSync logs.
//!
//! Turns raw transfer logs into typed [`TransferEvent`] facts. Logs that do
//! not decode as ERC-721 transfers are dropped silently; the topic filter
//! upstream already narrows the stream to `Transfer(address,address,uint256)`
//! signatures, but ERC-20 transfers share that signature and are rejected
//! here by topic count.

use alloy::{
    primitives::{LogData, B256},
    sol_types::SolEvent,
};
use rustc_hash::FxHashMap;

use crate::{abis::erc721, utils::hex_encode};

/// One decoded ERC-721 transfer fact, in chain order.
#[derive(Debug, Clone)]
pub struct TransferEvent {
    /// Chain-native event id, unique per log.
    pub id: String,
    pub from: String,
    pub to: String,
    pub token_id: alloy::primitives::U256,
    pub timestamp: u64,
    pub block_number: u64,
    pub tx_hash: String,
    /// Emitting contract address, lowercased.
    pub contract: String,
}

/// Decode a single log into a transfer fact.
///
/// ERC-721 `Transfer` carries `tokenId` as a third indexed topic, so only
/// 4-topic logs decode; ERC-20-shaped logs (2 indexed topics, value in data)
/// fail the decode and yield None.
pub fn decode_transfer(
    log_data: &LogData,
    contract: &str,
    block_number: u64,
    block_timestamp: u64,
    log_index: u32,
    tx_hash: &str,
) -> Option<TransferEvent> {
    let event = erc721::Transfer::decode_log_data(log_data).ok()?;

    Some(TransferEvent {
        id: format!("{:010}-{:06}", block_number, log_index),
        from: hex_encode(event.from.as_slice()),
        to: hex_encode(event.to.as_slice()),
        token_id: event.tokenId,
        timestamp: block_timestamp,
        block_number,
        tx_hash: tx_hash.to_string(),
        contract: contract.to_lowercase(),
    })
}

/// Parse HyperSync logs into transfer facts, preserving chain order.
pub fn parse_logs(
    logs: impl Iterator<Item = hypersync_client::simple_types::Log>,
    block_timestamps: &FxHashMap<u64, u64>,
) -> Vec<TransferEvent> {
    let mut transfers = Vec::new();

    for log in logs {
        if log.topics.is_empty() {
            continue;
        }

        let data = log
            .data
            .as_ref()
            .map(|d| d.as_ref().to_vec())
            .unwrap_or_default()
            .into();

        let topics: Vec<B256> = log
            .topics
            .iter()
            .flatten()
            .map(|t| B256::from_slice(t.as_ref()))
            .collect();

        let log_data = LogData::new_unchecked(topics, data);

        let tx_hash = log
            .transaction_hash
            .as_ref()
            .map(|h| hex_encode(h.as_ref()))
            .unwrap_or_default();

        let block_number: u64 = log.block_number.map(|x| x.into()).unwrap_or(0);
        let block_timestamp = block_timestamps.get(&block_number).copied().unwrap_or(0);

        let log_index = log
            .log_index
            .map(|i| {
                let v: u64 = i.into();
                v as u32
            })
            .unwrap_or(0);

        let log_address = log
            .address
            .as_ref()
            .map(|a| hex_encode(a.as_ref()))
            .unwrap_or_default();

        if let Some(transfer) = decode_transfer(
            &log_data,
            &log_address,
            block_number,
            block_timestamp,
            log_index,
            &tx_hash,
        ) {
            transfers.push(transfer);
        }
    }

    transfers
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, Bytes, U256};

    fn topic_for_address(address: Address) -> B256 {
        let mut bytes = [0u8; 32];
        bytes[12..].copy_from_slice(address.as_slice());
        B256::from(bytes)
    }

    fn erc721_transfer_log(from: Address, to: Address, token_id: U256) -> LogData {
        LogData::new_unchecked(
            vec![
                erc721::Transfer::SIGNATURE_HASH,
                topic_for_address(from),
                topic_for_address(to),
                B256::from(token_id.to_be_bytes::<32>()),
            ],
            Bytes::new(),
        )
    }

    #[test]
    fn test_decode_valid_transfer() {
        let from = Address::repeat_byte(0xAA);
        let to = Address::repeat_byte(0xBB);
        let log = erc721_transfer_log(from, to, U256::from(7));

        let event =
            decode_transfer(&log, "0xCAFE000000000000000000000000000000000001", 120, 99, 3, "0xtx")
                .unwrap();

        assert_eq!(event.from, format!("0x{}", "aa".repeat(20)));
        assert_eq!(event.to, format!("0x{}", "bb".repeat(20)));
        assert_eq!(event.token_id, U256::from(7));
        assert_eq!(event.block_number, 120);
        assert_eq!(event.timestamp, 99);
        assert_eq!(event.id, "0000000120-000003");
        // Contract address is normalized to lowercase
        assert_eq!(event.contract, "0xcafe000000000000000000000000000000000001");
    }

    #[test]
    fn test_erc20_shaped_transfer_is_rejected() {
        // Same signature, but value lives in data and only two indexed topics
        let log = LogData::new_unchecked(
            vec![
                erc721::Transfer::SIGNATURE_HASH,
                topic_for_address(Address::repeat_byte(0x01)),
                topic_for_address(Address::repeat_byte(0x02)),
            ],
            Bytes::from(U256::from(1000).to_be_bytes::<32>().to_vec()),
        );

        assert!(decode_transfer(&log, "0xdead", 1, 1, 0, "0xtx").is_none());
    }

    #[test]
    fn test_unrelated_event_is_rejected() {
        let log = LogData::new_unchecked(vec![B256::repeat_byte(0x42)], Bytes::new());
        assert!(decode_transfer(&log, "0xdead", 1, 1, 0, "0xtx").is_none());
    }
}
