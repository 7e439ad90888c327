//! Token metadata URI and image resolution.
//!
//! `tokenURI` values observed on-chain are canonicalized before fetching:
//! decentralized-storage URIs are rewritten onto a single IPFS gateway, keyed
//! by the content identifier embedded in the URI. Resolution failures always
//! degrade to empty/None values; nothing here is fatal to a batch.

use alloy::{
    eips::BlockId,
    primitives::{Address, U256},
    providers::{DynProvider, ProviderBuilder},
};
use anyhow::Context;
use cid::{Cid, Version};
use log::error;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::abis::erc721::IERC721;
use crate::config::{IndexerSettings, MetadataSettings};
use crate::utils::{retry_call, RetryPolicy};

/// Off-chain token metadata document. Only the image fields matter; every
/// other field is ignored.
#[derive(Debug, Deserialize)]
struct TokenMetadata {
    image: Option<String>,
    image_alt: Option<String>,
}

/// Resolves token metadata URIs on-chain and images off-chain.
#[derive(Clone)]
pub struct MetadataResolver {
    provider: DynProvider,
    http: reqwest::Client,
    retry: RetryPolicy,
    min_call_block: u64,
    gateway_host: String,
}

impl MetadataResolver {
    pub fn new(indexer: &IndexerSettings, metadata: &MetadataSettings) -> anyhow::Result<Self> {
        let url = Url::parse(&indexer.rpc_url).context("Invalid RPC URL")?;

        let client = ProviderBuilder::new().connect_http(url);
        let provider = DynProvider::new(client);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(metadata.http_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            provider,
            http,
            retry: RetryPolicy::default(),
            min_call_block: indexer.min_call_block,
            gateway_host: metadata.ipfs_gateway_host.clone(),
        })
    }

    /// Read `tokenURI(tokenId)` at the given height (floored to the minimum
    /// call block). Returns an empty string after exhausting retries.
    pub async fn resolve_uri(&self, contract: &str, token_id: U256, block_number: u64) -> String {
        let address: Address = match contract.parse() {
            Ok(a) => a,
            Err(_) => {
                error!("Unparseable contract address {} for tokenURI read", contract);
                return String::new();
            },
        };

        let erc721 = IERC721::new(address, self.provider.clone());
        let block = BlockId::number(self.min_call_block.max(block_number));

        let result = retry_call(self.retry, || {
            let call = erc721.tokenURI(token_id).block(block);
            async move { call.call().await.map_err(anyhow::Error::from) }
        })
        .await;

        match result {
            Ok(uri) => uri,
            Err(e) => {
                error!("tokenURI({}) failed for {}: {:#}", token_id, contract, e);
                String::new()
            },
        }
    }

    /// Fetch the canonicalized metadata document and extract its image
    /// reference. Returns None for empty URIs, fetch failures, malformed
    /// JSON, or documents with no image field.
    pub async fn resolve_image(&self, uri: &str) -> Option<String> {
        if uri.is_empty() {
            return None;
        }

        let url = normalize_locator(uri, &self.gateway_host);

        let result = retry_call(self.retry, || {
            let request = self.http.get(&url);
            async move {
                let response = request.send().await?.error_for_status()?;
                Ok(response.json::<TokenMetadata>().await?)
            }
        })
        .await;

        match result {
            Ok(metadata) => match metadata.image.or(metadata.image_alt) {
                Some(image) => Some(image),
                None => {
                    error!("Token metadata has no image field: {}", url);
                    None
                },
            },
            Err(e) => {
                error!("Failed to fetch token metadata from {}: {:#}", url, e);
                None
            },
        }
    }
}

/// Canonicalize a metadata URI into a fetchable locator.
///
/// The first-longest path segment is treated as the candidate content
/// identifier. URIs without a parseable CID pass through unchanged, whatever
/// their scheme. With a valid CID:
/// - `ipfs://` URIs rewrite to `https://<cidV1>.ipfs.<gateway>/<last>`;
/// - permanent-storage arweave URLs stay as they are;
/// - pinata gateway URLs rewrite with the same template as ipfs.
pub fn normalize_locator(uri: &str, gateway_host: &str) -> String {
    let segments: Vec<&str> = uri.split('/').collect();

    let mut candidate = "";
    for segment in &segments {
        if segment.len() > candidate.len() {
            candidate = segment;
        }
    }

    let Ok(cid) = Cid::try_from(candidate) else {
        return uri.to_string();
    };

    let v1 = match cid.version() {
        Version::V1 => cid,
        _ => Cid::new_v1(cid.codec(), *cid.hash()),
    };

    let last_segment = segments.last().copied().unwrap_or_default();

    if uri.contains("ipfs://") || uri.contains("gateway.pinata.cloud") {
        // Display of a v1 CID is canonical lowercase base32
        return format!("https://{}.ipfs.{}/{}", v1, gateway_host, last_segment);
    }

    if uri.contains("https://arweave.net") {
        return uri.to_string();
    }

    uri.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GATEWAY: &str = "nftstorage.link";
    // Documented CIDv0/CIDv1 pair for the same content
    const CID_V0: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";
    const CID_V1: &str = "bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi";

    #[test]
    fn test_ipfs_uri_rewrites_to_gateway_with_v1_cid() {
        let uri = format!("ipfs://{}/1.json", CID_V0);
        let normalized = normalize_locator(&uri, GATEWAY);
        assert_eq!(
            normalized,
            format!("https://{}.ipfs.{}/1.json", CID_V1, GATEWAY)
        );
    }

    #[test]
    fn test_v1_cid_is_preserved_verbatim() {
        let uri = format!("ipfs://{}/42.json", CID_V1);
        let normalized = normalize_locator(&uri, GATEWAY);
        assert_eq!(
            normalized,
            format!("https://{}.ipfs.{}/42.json", CID_V1, GATEWAY)
        );
    }

    #[test]
    fn test_arweave_url_passes_through() {
        let uri = format!("https://arweave.net/{}/3.json", CID_V0);
        assert_eq!(normalize_locator(&uri, GATEWAY), uri);
    }

    #[test]
    fn test_pinata_gateway_is_rewritten() {
        let uri = format!("https://gateway.pinata.cloud/ipfs/{}/3.json", CID_V0);
        let normalized = normalize_locator(&uri, GATEWAY);
        assert_eq!(
            normalized,
            format!("https://{}.ipfs.{}/3.json", CID_V1, GATEWAY)
        );
    }

    #[test]
    fn test_uri_without_cid_is_unchanged() {
        let uri = "https://example.com/api/metadata/1.json";
        assert_eq!(normalize_locator(uri, GATEWAY), uri);
    }

    #[test]
    fn test_http_url_with_cid_but_unknown_host_is_unchanged() {
        let uri = format!("https://files.example.com/{}/1.json", CID_V0);
        assert_eq!(normalize_locator(&uri, GATEWAY), uri);
    }
}
