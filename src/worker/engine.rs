//! Batch reconciliation engine.
//!
//! Applies one batch of decoded transfer facts against a private working set
//! materialized from the store, then persists the whole entity set with bulk
//! upserts. Transfers are applied sequentially in chain order: a later
//! transfer in the batch must see the balance and URI effects of an earlier
//! one. Resolution failures degrade to empty/None fields; only store errors
//! abort the batch, and the surrounding run loop retries it from the same
//! checkpoint.

use std::sync::Arc;

use alloy::primitives::U256;
use anyhow::Result;
use log::{info, warn};
use rustc_hash::FxHashMap;

use crate::db::models::{Collection, Owner, Token, Transfer};
use crate::worker::{
    balances::{BalanceTracker, Direction},
    collections::CollectionFetcher,
    metadata::MetadataResolver,
    parser::TransferEvent,
};
use crate::Database;

/// Composite token key.
///
/// Always keyed by collection address, never by symbol: symbol resolution
/// can finish after a token was first keyed, and a key must be identical
/// across batches.
pub fn token_key(collection: &str, token_id: U256) -> String {
    format!("{}-{}", collection.to_lowercase(), token_id)
}

/// Batch-scoped, in-memory view of every entity the batch touches.
///
/// Private to a single batch execution; the only cross-batch shared state is
/// the store itself.
#[derive(Default)]
pub struct WorkingSet {
    pub collections: FxHashMap<String, Collection>,
    pub owners: FxHashMap<String, Owner>,
    pub tokens: FxHashMap<String, Token>,
    pub transfers: Vec<Transfer>,
}

impl WorkingSet {
    /// Lazily create an owner record with zero balances.
    fn ensure_owner(&mut self, address: &str) {
        if !self.owners.contains_key(address) {
            self.owners
                .insert(address.to_string(), Owner::new(address.to_string()));
        }
    }
}

/// Whether an observed URI signals that metadata actually moved.
///
/// An empty current URI is the resolution-failure sentinel, never an
/// observed on-chain value, so it must not trigger a migration.
fn uri_moved(current_uri: &str, stored_uri: &str) -> bool {
    !current_uri.is_empty() && current_uri != stored_uri
}

/// Apply re-resolved URI/image values to the working set, one token at a
/// time. An empty re-resolved URI is a failed read; the token keeps its
/// previous values rather than losing enrichment it already has.
fn apply_uri_migration(
    tokens: &mut FxHashMap<String, Token>,
    resolved: impl IntoIterator<Item = (String, String, Option<String>)>,
) {
    for (id, uri, image) in resolved {
        if uri.is_empty() {
            continue;
        }
        if let Some(token) = tokens.get_mut(&id) {
            token.uri = uri.clone();
            token.old_uri = uri;
            token.image_uri = image;
        }
    }
}

/// Move token ownership and settle both parties' balance counters.
fn settle_ownership(
    ws: &mut WorkingSet,
    balances: &BalanceTracker,
    event: &TransferEvent,
    key: &str,
) {
    balances.adjust(&mut ws.owners, &event.to, &event.contract, Direction::Increment);
    balances.adjust(&mut ws.owners, &event.from, &event.contract, Direction::Decrement);

    if let Some(token) = ws.tokens.get_mut(key) {
        token.owner = event.to.clone();
    }
}

/// Orchestrates classification results, metadata resolution and balance
/// tracking for one batch at a time.
pub struct ReconciliationEngine {
    db: Arc<Database>,
    collections: CollectionFetcher,
    metadata: Arc<MetadataResolver>,
    balances: BalanceTracker,
}

impl ReconciliationEngine {
    pub fn new(
        db: Arc<Database>,
        collections: CollectionFetcher,
        metadata: Arc<MetadataResolver>,
        balances: BalanceTracker,
    ) -> Self {
        Self {
            db,
            collections,
            metadata,
            balances,
        }
    }

    /// Apply a batch of transfer facts and persist the resulting entity set.
    pub async fn process_batch(&self, transfers: &[TransferEvent]) -> Result<()> {
        if transfers.is_empty() {
            return Ok(());
        }

        let mut ws = self.prewarm(transfers).await?;
        self.ensure_collections(&mut ws, transfers).await;

        for event in transfers {
            self.apply_transfer(&mut ws, event).await?;
        }

        self.persist(&ws).await?;

        info!(
            "Reconciled batch: {} transfers, {} tokens, {} owners, {} collections",
            ws.transfers.len(),
            ws.tokens.len(),
            ws.owners.len(),
            ws.collections.len()
        );

        Ok(())
    }

    /// Materialize the working set with three bulk reads against the store.
    /// Records absent from the store are simply absent here; they get
    /// created during application.
    async fn prewarm(&self, transfers: &[TransferEvent]) -> Result<WorkingSet> {
        let mut token_keys: Vec<String> = transfers
            .iter()
            .map(|t| token_key(&t.contract, t.token_id))
            .collect();
        token_keys.sort();
        token_keys.dedup();

        let mut owner_addresses: Vec<String> = transfers
            .iter()
            .flat_map(|t| [t.from.clone(), t.to.clone()])
            .collect();
        owner_addresses.sort();
        owner_addresses.dedup();

        let mut collection_addresses: Vec<String> =
            transfers.iter().map(|t| t.contract.clone()).collect();
        collection_addresses.sort();
        collection_addresses.dedup();

        let mut ws = WorkingSet::default();

        for token in self.db.postgres.get_tokens(&token_keys).await? {
            ws.tokens.insert(token.id.clone(), token);
        }
        for owner in self.db.postgres.get_owners(&owner_addresses).await? {
            ws.owners.insert(owner.address.clone(), owner);
        }
        for collection in self.db.postgres.get_collections(&collection_addresses).await? {
            ws.collections.insert(collection.address.clone(), collection);
        }

        Ok(ws)
    }

    /// Resolve every collection the batch references that the store did not
    /// already have.
    async fn ensure_collections(&self, ws: &mut WorkingSet, transfers: &[TransferEvent]) {
        for event in transfers {
            if ws.collections.contains_key(&event.contract) {
                continue;
            }
            let collection = self
                .collections
                .resolve(&event.contract, event.block_number)
                .await;
            ws.collections.insert(collection.address.clone(), collection);
        }
    }

    async fn apply_transfer(&self, ws: &mut WorkingSet, event: &TransferEvent) -> Result<()> {
        ws.ensure_owner(&event.from);
        ws.ensure_owner(&event.to);

        let key = token_key(&event.contract, event.token_id);

        if !ws.tokens.contains_key(&key) {
            // First observation of this token
            let uri = self
                .metadata
                .resolve_uri(&event.contract, event.token_id, event.block_number)
                .await;
            let image = self.metadata.resolve_image(&uri).await;

            self.balances
                .adjust(&mut ws.owners, &event.to, &event.contract, Direction::Increment);

            let token = Token::new(
                key.clone(),
                event.token_id,
                uri,
                image,
                event.to.clone(),
                event.contract.clone(),
            );
            ws.tokens.insert(key.clone(), token);
        } else {
            // Re-check the on-chain URI on every subsequent transfer; a
            // changed value means the metadata moved, possibly for every
            // token sharing the stale URI. A failed read (empty sentinel)
            // is not a move.
            let current_uri = self
                .metadata
                .resolve_uri(&event.contract, event.token_id, event.block_number)
                .await;
            let stale_uri = ws
                .tokens
                .get(&key)
                .map(|t| t.uri.clone())
                .unwrap_or_default();

            if uri_moved(&current_uri, &stale_uri) {
                if stale_uri.is_empty() {
                    // The stored URI is itself a failure sentinel: repair
                    // just this token. Fanning out on "" would drag every
                    // failed-resolution token into this transfer.
                    let image = self.metadata.resolve_image(&current_uri).await;
                    apply_uri_migration(&mut ws.tokens, [(key.clone(), current_uri, image)]);
                } else {
                    self.migrate_shared_uri(ws, &stale_uri, event.block_number)
                        .await?;
                }
            }

            settle_ownership(ws, &self.balances, event, &key);
        }

        ws.transfers.push(Transfer::from_event(event, key));
        Ok(())
    }

    /// URI migration fan-out.
    ///
    /// A shared or templated URI serving many tokens may have moved for all
    /// of them at once, so every token still storing the stale URI gets its
    /// URI and image re-derived from the chain for its own token id. The
    /// working set is extended from the store for tokens the batch had not
    /// already loaded.
    async fn migrate_shared_uri(
        &self,
        ws: &mut WorkingSet,
        stale_uri: &str,
        block_number: u64,
    ) -> Result<()> {
        // The sentinel never identifies a sibling group
        if stale_uri.is_empty() {
            return Ok(());
        }

        let mut sibling_ids: Vec<String> = ws
            .tokens
            .values()
            .filter(|t| t.uri == stale_uri)
            .map(|t| t.id.clone())
            .collect();

        for token in self.db.postgres.get_tokens_by_uri(stale_uri).await? {
            if !ws.tokens.contains_key(&token.id) {
                sibling_ids.push(token.id.clone());
                ws.tokens.insert(token.id.clone(), token);
            }
        }

        warn!(
            "URI migration: {} token(s) share stale URI {}",
            sibling_ids.len(),
            stale_uri
        );

        let mut resolved = Vec::with_capacity(sibling_ids.len());
        for id in sibling_ids {
            let (collection, token_id) = match ws.tokens.get(&id) {
                Some(token) => (token.collection.clone(), token.token_id),
                None => continue,
            };

            let uri = self.metadata.resolve_uri(&collection, token_id, block_number).await;
            let image = if uri.is_empty() {
                None
            } else {
                self.metadata.resolve_image(&uri).await
            };
            resolved.push((id, uri, image));
        }

        apply_uri_migration(&mut ws.tokens, resolved);

        Ok(())
    }

    /// Bulk-upsert the working set, dependencies before dependents so
    /// referential ordering holds: collections, owners, tokens, transfers.
    async fn persist(&self, ws: &WorkingSet) -> Result<()> {
        let collections: Vec<&Collection> = ws.collections.values().collect();
        self.db.postgres.set_collections(&collections).await?;

        let owners: Vec<&Owner> = ws.owners.values().collect();
        self.db.postgres.set_owners(&owners).await?;

        let tokens: Vec<&Token> = ws.tokens.values().collect();
        self.db.postgres.set_tokens(&tokens).await?;

        let transfers: Vec<&Transfer> = ws.transfers.iter().collect();
        self.db.postgres.set_transfers(&transfers).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLLECTION: &str = "0x8b5d62f396ca3c6cf19803234685e693733f9779";

    fn event(id: &str, from: &str, to: &str, token_id: u64) -> TransferEvent {
        TransferEvent {
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            token_id: U256::from(token_id),
            timestamp: 1_700_000_000,
            block_number: 2_000_000,
            tx_hash: "0xtx".to_string(),
            contract: COLLECTION.to_string(),
        }
    }

    #[test]
    fn test_token_key_is_deterministic_and_address_based() {
        let key = token_key("0xABCDEF0000000000000000000000000000000001", U256::from(5));
        assert_eq!(key, "0xabcdef0000000000000000000000000000000001-5");
        // Idempotent across repeated calls
        assert_eq!(
            key,
            token_key("0xabcdef0000000000000000000000000000000001", U256::from(5))
        );
    }

    #[test]
    fn test_ensure_owner_creates_with_zero_defaults() {
        let mut ws = WorkingSet::default();
        ws.ensure_owner("0x01");

        let owner = &ws.owners["0x01"];
        assert_eq!(owner.balance, 0);
        assert!(owner.collection_balances.is_empty());
    }

    #[test]
    fn test_ensure_owner_keeps_existing_record() {
        let mut ws = WorkingSet::default();
        ws.ensure_owner("0x01");
        ws.owners.get_mut("0x01").unwrap().balance = 5;

        ws.ensure_owner("0x01");
        assert_eq!(ws.owners["0x01"].balance, 5);
    }

    fn token(id: &str, token_id: u64, uri: &str, image: Option<&str>) -> Token {
        let mut token = Token::new(
            id.to_string(),
            U256::from(token_id),
            uri.to_string(),
            image.map(str::to_string),
            "0x01".to_string(),
            COLLECTION.to_string(),
        );
        token.old_uri = uri.to_string();
        token
    }

    #[test]
    fn test_uri_moved_requires_nonempty_current_value() {
        // An empty read is the resolution-failure sentinel, not a move
        assert!(!uri_moved("", "ipfs://old"));
        assert!(!uri_moved("", ""));
        assert!(!uri_moved("ipfs://same", "ipfs://same"));
        assert!(uri_moved("ipfs://new", "ipfs://old"));
        // A token stored with the sentinel gets repaired once a read succeeds
        assert!(uri_moved("ipfs://new", ""));
    }

    #[test]
    fn test_uri_migration_applies_each_tokens_own_values() {
        let mut tokens = FxHashMap::default();
        for n in 1..=3u64 {
            let key = token_key(COLLECTION, U256::from(n));
            tokens.insert(key.clone(), token(&key, n, "ipfs://old", Some("old.png")));
        }

        let resolved: Vec<(String, String, Option<String>)> = (1..=3u64)
            .map(|n| {
                (
                    token_key(COLLECTION, U256::from(n)),
                    format!("ipfs://new/{}.json", n),
                    Some(format!("{}.png", n)),
                )
            })
            .collect();

        apply_uri_migration(&mut tokens, resolved);

        for n in 1..=3u64 {
            let token = &tokens[&token_key(COLLECTION, U256::from(n))];
            assert_eq!(token.uri, format!("ipfs://new/{}.json", n));
            assert_eq!(token.old_uri, format!("ipfs://new/{}.json", n));
            assert_eq!(token.image_uri.as_deref(), Some(format!("{}.png", n).as_str()));
        }
    }

    #[test]
    fn test_failed_reresolution_keeps_previous_enrichment() {
        // A sibling whose re-read fails during the fan-out must not lose
        // the URI and image it already had.
        let mut tokens = FxHashMap::default();
        let key = token_key(COLLECTION, U256::from(1));
        tokens.insert(key.clone(), token(&key, 1, "ipfs://old", Some("old.png")));

        apply_uri_migration(&mut tokens, [(key.clone(), String::new(), None)]);

        let token = &tokens[&key];
        assert_eq!(token.uri, "ipfs://old");
        assert_eq!(token.old_uri, "ipfs://old");
        assert_eq!(token.image_uri.as_deref(), Some("old.png"));
    }

    #[test]
    fn test_same_batch_transfers_apply_in_order() {
        // A: 1 -> 2, then B: 2 -> 3. Final owner must be 3 and owner 2's
        // counter must net to zero, never be left at 1.
        let balances = BalanceTracker::new([COLLECTION.to_string()]);
        let mut ws = WorkingSet::default();

        let key = token_key(COLLECTION, U256::from(9));
        ws.tokens.insert(
            key.clone(),
            Token::new(
                key.clone(),
                U256::from(9),
                "ipfs://uri".to_string(),
                None,
                "0x01".to_string(),
                COLLECTION.to_string(),
            ),
        );

        let a = event("a", "0x01", "0x02", 9);
        let b = event("b", "0x02", "0x03", 9);

        for ev in [&a, &b] {
            ws.ensure_owner(&ev.from);
            ws.ensure_owner(&ev.to);
            settle_ownership(&mut ws, &balances, ev, &key);
        }

        assert_eq!(ws.tokens[&key].owner, "0x03");
        assert_eq!(ws.owners["0x02"].collection_balances[COLLECTION], 0);
        assert_eq!(ws.owners["0x03"].collection_balances[COLLECTION], 1);
        // Sender's first observed touch was a decrement: initialized to 1
        assert_eq!(ws.owners["0x01"].collection_balances[COLLECTION], 1);
    }
}
