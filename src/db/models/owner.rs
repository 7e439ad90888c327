use std::collections::HashMap;

use serde::Serialize;

/// An account that has appeared as a transfer party (PostgreSQL).
///
/// Primary Key: address
///
/// `collection_balances` holds one integer counter per tracked collection
/// the owner has touched. A counter only exists once the owner has touched
/// that collection; it is never clamped at zero.
#[derive(Debug, Clone, Serialize)]
pub struct Owner {
    pub address: String,
    /// Legacy aggregate balance, kept for schema compatibility.
    pub balance: i64,
    pub collection_balances: HashMap<String, i64>,
}

impl Owner {
    pub fn new(address: String) -> Self {
        Self {
            address: address.to_lowercase(),
            balance: 0,
            collection_balances: HashMap::new(),
        }
    }
}
