use alloy::primitives::U256;
use serde::Serialize;

/// A tracked ERC-721 contract (PostgreSQL).
///
/// Primary Key: address
///
/// Created the first time a transfer references the address and
/// classification succeeds; never deleted. Name, symbol and supply are
/// resolved best-effort and may stay unset when the on-chain calls fail.
#[derive(Debug, Clone, Serialize)]
pub struct Collection {
    pub address: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub total_supply: U256,
}

impl Collection {
    pub fn new(
        address: String,
        name: Option<String>,
        symbol: Option<String>,
        total_supply: U256,
    ) -> Self {
        Self {
            // Always lowercase addresses for consistent comparisons
            address: address.to_lowercase(),
            name,
            symbol,
            total_supply,
        }
    }
}
