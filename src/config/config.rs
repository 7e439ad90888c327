use config::{Config, ConfigError, File};
use serde::Deserialize;

/// PostgreSQL database connection configuration.
///
/// Used for storing:
/// - Collections, owners, tokens and transfers
/// - Sync checkpoints
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    16
}

/// Chain source and on-chain read configuration.
///
/// HyperSync streams the transfer logs; the RPC endpoint serves the
/// classification and metadata read calls.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexerSettings {
    pub rpc_url: String,
    pub hypersync_url: String,
    pub hypersync_bearer_token: String,
    #[serde(default = "default_tip_poll_interval")]
    pub tip_poll_interval_milliseconds: u64,
    /// Height floor for on-chain reads. The archive node serving the RPC
    /// endpoint fails contract calls below this block, so every read is
    /// pinned to at least this height.
    #[serde(default = "default_min_call_block")]
    pub min_call_block: u64,
    /// Collections that get a dedicated per-owner balance counter.
    /// Transfers from other collections are still indexed, but do not
    /// maintain a counter.
    #[serde(default)]
    pub tracked_collections: Vec<String>,
}

fn default_tip_poll_interval() -> u64 {
    200
}

fn default_min_call_block() -> u64 {
    1_789_333
}

/// Off-chain metadata fetch configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct MetadataSettings {
    /// IPFS gateway host used when canonicalizing decentralized-storage URIs.
    #[serde(default = "default_gateway_host")]
    pub ipfs_gateway_host: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            ipfs_gateway_host: default_gateway_host(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

fn default_gateway_host() -> String {
    "nftstorage.link".to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

/// Root application configuration.
///
/// Loaded from `config.yaml` at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub postgres: PostgresSettings,
    pub indexer: IndexerSettings,
    #[serde(default)]
    pub metadata: MetadataSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config"))
            .build()?;

        let settings: Settings = s.try_deserialize()?;

        Ok(settings)
    }
}
