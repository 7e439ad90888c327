//! Collection-level metadata resolution.
//!
//! Collections are assumed immutable once deployed, so resolved records are
//! cached for the remainder of the process lifetime, with the persistent
//! store as a second-level cache.

use alloy::{
    eips::BlockId,
    primitives::{Address, U256},
    providers::{DynProvider, ProviderBuilder},
};
use anyhow::Context;
use log::warn;
use moka::future::Cache;
use std::sync::Arc;
use url::Url;

use crate::abis::erc721::IERC721;
use crate::config::IndexerSettings;
use crate::db::models::Collection;
use crate::utils::{retry_call, RetryPolicy};
use crate::Database;

/// Fetches and caches collection metadata (name, symbol, total supply).
#[derive(Clone)]
pub struct CollectionFetcher {
    db: Arc<Database>,
    provider: DynProvider,
    cache: Cache<String, Collection>,
    retry: RetryPolicy,
    min_call_block: u64,
}

impl CollectionFetcher {
    pub fn new(settings: &IndexerSettings, db: Arc<Database>) -> anyhow::Result<Self> {
        let url = Url::parse(&settings.rpc_url).context("Invalid RPC URL")?;

        let client = ProviderBuilder::new().connect_http(url);
        let provider = DynProvider::new(client);

        let cache = Cache::builder().max_capacity(100_000).build();

        Ok(Self {
            db,
            provider,
            cache,
            retry: RetryPolicy::default(),
            min_call_block: settings.min_call_block,
        })
    }

    /// Resolve the collection record for `address`.
    ///
    /// Name, symbol and total supply are read with three independent calls;
    /// a failed call leaves its field unset (supply zero) rather than
    /// aborting the others. The result is cached either way.
    pub async fn resolve(&self, address: &str, block_number: u64) -> Collection {
        let address = address.to_lowercase();

        if let Some(collection) = self.cache.get(&address).await {
            return collection;
        }

        if let Ok(stored) = self.db.postgres.get_collections(&[address.clone()]).await {
            if let Some(collection) = stored.into_iter().next() {
                self.cache.insert(address, collection.clone()).await;
                return collection;
            }
        }

        let collection = self.fetch_on_chain(&address, block_number).await;
        self.cache.insert(address, collection.clone()).await;
        collection
    }

    async fn fetch_on_chain(&self, address: &str, block_number: u64) -> Collection {
        let parsed: Address = match address.parse() {
            Ok(a) => a,
            Err(_) => {
                warn!("Unparseable collection address {}", address);
                return Collection::new(address.to_string(), None, None, U256::ZERO);
            },
        };

        let contract = IERC721::new(parsed, self.provider.clone());
        let block = BlockId::number(self.min_call_block.max(block_number));

        let name = retry_call(self.retry, || {
            let call = contract.name().block(block);
            async move { call.call().await.map_err(anyhow::Error::from) }
        });

        let symbol = retry_call(self.retry, || {
            let call = contract.symbol().block(block);
            async move { call.call().await.map_err(anyhow::Error::from) }
        });

        let total_supply = retry_call(self.retry, || {
            let call = contract.totalSupply().block(block);
            async move { call.call().await.map_err(anyhow::Error::from) }
        });

        let (name, symbol, total_supply) = tokio::join!(name, symbol, total_supply);

        if name.is_err() && symbol.is_err() {
            warn!("Collection {} resolved with no name or symbol", address);
        }

        Collection::new(
            address.to_string(),
            name.ok(),
            symbol.ok(),
            total_supply.unwrap_or(U256::ZERO),
        )
    }
}
