use alloy::primitives::U256;
use serde::Serialize;

/// A single NFT (PostgreSQL).
///
/// Primary Key: id = `{collection-address}-{tokenId}`
///
/// `old_uri` records the metadata URI as of the last resolution, so a later
/// observation can detect a URI migration. `image_uri` stays None when
/// off-chain resolution fails; the backfill sweep retries those rows.
#[derive(Debug, Clone, Serialize)]
pub struct Token {
    pub id: String,
    pub token_id: U256,
    pub uri: String,
    pub old_uri: String,
    pub image_uri: Option<String>,
    /// Address of the current owner.
    pub owner: String,
    /// Address of the collection this token belongs to.
    pub collection: String,
}

impl Token {
    pub fn new(
        id: String,
        token_id: U256,
        uri: String,
        image_uri: Option<String>,
        owner: String,
        collection: String,
    ) -> Self {
        Self {
            id,
            token_id,
            old_uri: uri.clone(),
            uri,
            image_uri,
            owner: owner.to_lowercase(),
            collection: collection.to_lowercase(),
        }
    }
}
