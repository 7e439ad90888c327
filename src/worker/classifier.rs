//! ERC-721 contract classification.
//!
//! Transfer-shaped logs arrive from arbitrary contracts; only genuine
//! ERC-721 collections get indexed. Classification is permanent once
//! established, with the persistent store as the source of truth and a
//! process-scoped cache in front of it.

use alloy::{
    eips::BlockId,
    primitives::Address,
    providers::{DynProvider, ProviderBuilder},
};
use anyhow::Context;
use log::info;
use moka::future::Cache;
use std::sync::Arc;
use url::Url;

use crate::abis::erc721::IERC721;
use crate::config::IndexerSettings;
use crate::utils::{retry_call, RetryPolicy};
use crate::Database;

/// ERC-165 interface-detection marker.
const ERC165_INTERFACE_ID: [u8; 4] = [0x01, 0xff, 0xc9, 0xa7];
/// ERC-721 interface marker.
const ERC721_INTERFACE_ID: [u8; 4] = [0x80, 0xac, 0x58, 0xcd];

/// Decides whether an address is a genuine ERC-721 collection.
#[derive(Clone)]
pub struct ContractClassifier {
    db: Arc<Database>,
    provider: DynProvider,
    /// Addresses already classified positive. Never invalidated;
    /// classification is permanent once established. Negatives are not
    /// cached and get re-probed on their next appearance.
    verified: Cache<String, ()>,
    retry: RetryPolicy,
    min_call_block: u64,
}

impl ContractClassifier {
    pub fn new(settings: &IndexerSettings, db: Arc<Database>) -> anyhow::Result<Self> {
        let url = Url::parse(&settings.rpc_url).context("Invalid RPC URL")?;

        let client = ProviderBuilder::new().connect_http(url);
        let provider = DynProvider::new(client);

        let verified = Cache::builder().max_capacity(100_000).build();

        Ok(Self {
            db,
            provider,
            verified,
            retry: RetryPolicy::default(),
            min_call_block: settings.min_call_block,
        })
    }

    /// Classify `address` as ERC-721 or not, at `block_number`.
    ///
    /// Fail-closed: any unexpected failure along the way yields false. An
    /// unverified contract is never indexed.
    pub async fn classify(&self, address: &str, block_number: u64) -> bool {
        if self.verified.contains_key(address) {
            return true;
        }

        // A collection already in the store was classified before
        if let Ok(known) = self.db.postgres.get_collections(&[address.to_string()]).await {
            if !known.is_empty() {
                self.verified.insert(address.to_string(), ()).await;
                return true;
            }
        }

        let parsed: Address = match address.parse() {
            Ok(a) => a,
            Err(_) => return false,
        };

        let contract = IERC721::new(parsed, self.provider.clone());
        let block = BlockId::number(self.min_call_block.max(block_number));

        // Step 1: ERC-165 marker; call failure is a negative, not an error
        let supports_erc165 = retry_call(self.retry, || {
            let call = contract.supportsInterface(ERC165_INTERFACE_ID.into()).block(block);
            async move { call.call().await.map_err(anyhow::Error::from) }
        })
        .await;

        if !matches!(supports_erc165, Ok(true)) {
            return false;
        }

        // Step 2: ERC-721 marker
        let supports_erc721 = retry_call(self.retry, || {
            let call = contract.supportsInterface(ERC721_INTERFACE_ID.into()).block(block);
            async move { call.call().await.map_err(anyhow::Error::from) }
        })
        .await;

        if !matches!(supports_erc721, Ok(true)) {
            return false;
        }

        // Step 3: probe balanceOf with the zero address. Standards-conformant
        // ERC-721 implementations revert on it, so a failing call is the
        // positive signal here and a succeeding call the negative one.
        // Inherited heuristic; do not flip the polarity.
        let probe = retry_call(self.retry, || {
            let call = contract.balanceOf(Address::ZERO).block(block);
            async move { call.call().await.map_err(anyhow::Error::from) }
        })
        .await;

        let is_erc721 = probe.is_err();

        if is_erc721 {
            info!("Classified {} as ERC-721", address);
            self.verified.insert(address.to_string(), ()).await;
        }

        is_erc721
    }
}
