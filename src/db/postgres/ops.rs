use log::error;
use tokio_postgres::Row;

use crate::db::models::{Collection, Owner, SyncCheckpoint, Token, Transfer};
use crate::db::postgres::PostgresClient;
use crate::utils::parse_u256;

/// Key of the single sync checkpoint row.
const CHECKPOINT_ID: &str = "erc721";

/// Sanitize a string for PostgreSQL by removing null bytes (0x00)
/// which are invalid in UTF-8 text columns. Token URIs come straight from
/// contract storage and are not guaranteed to be clean.
fn sanitize_string(s: &str) -> String {
    s.replace('\0', "")
}

fn row_to_collection(row: &Row) -> Collection {
    let total_supply: String = row.get("total_supply");
    Collection {
        address: row.get("address"),
        name: row.get("name"),
        symbol: row.get("symbol"),
        total_supply: parse_u256(&total_supply),
    }
}

fn row_to_owner(row: &Row) -> Owner {
    let balances: serde_json::Value = row.get("collection_balances");
    Owner {
        address: row.get("address"),
        balance: row.get("balance"),
        collection_balances: serde_json::from_value(balances).unwrap_or_default(),
    }
}

fn row_to_token(row: &Row) -> Token {
    let token_id: String = row.get("token_id");
    Token {
        id: row.get("id"),
        token_id: parse_u256(&token_id),
        uri: row.get("uri"),
        old_uri: row.get("old_uri"),
        image_uri: row.get("image_uri"),
        owner: row.get("owner"),
        collection: row.get("collection"),
    }
}

impl PostgresClient {
    // ==================== COLLECTIONS ====================

    /// Get collections by address (batched)
    pub async fn get_collections(&self, addresses: &[String]) -> anyhow::Result<Vec<Collection>> {
        if addresses.is_empty() {
            return Ok(vec![]);
        }

        let client = self.pool.get().await?;
        let query = r#"
            SELECT address, name, symbol, total_supply
            FROM curio.collections
            WHERE address = ANY($1)
        "#;

        let rows = client.query(query, &[&addresses]).await?;
        Ok(rows.iter().map(row_to_collection).collect())
    }

    /// Batch insert/update collections (multi-row VALUES upsert)
    pub async fn set_collections(&self, collections: &[&Collection]) -> anyhow::Result<()> {
        if collections.is_empty() {
            return Ok(());
        }

        const COLS_PER_ROW: usize = 4;
        const BATCH_SIZE: usize = 1000;

        let client = self.pool.get().await?;

        for chunk in collections.chunks(BATCH_SIZE) {
            let values_clauses: Vec<String> = chunk
                .iter()
                .enumerate()
                .map(|(i, _)| {
                    let start = i * COLS_PER_ROW + 1;
                    let placeholders: Vec<String> = (start..start + COLS_PER_ROW)
                        .map(|n| format!("${}", n))
                        .collect();
                    format!("({})", placeholders.join(", "))
                })
                .collect();

            let query = format!(
                r#"
                INSERT INTO curio.collections (address, name, symbol, total_supply)
                VALUES {}
                ON CONFLICT (address) DO UPDATE SET
                    name = EXCLUDED.name,
                    symbol = EXCLUDED.symbol,
                    total_supply = EXCLUDED.total_supply
                "#,
                values_clauses.join(", ")
            );

            // Owned converted values, fully built before params borrow them
            let mut converted: Vec<(Option<String>, Option<String>, String)> =
                Vec::with_capacity(chunk.len());
            for collection in chunk {
                converted.push((
                    collection.name.as_deref().map(sanitize_string),
                    collection.symbol.as_deref().map(sanitize_string),
                    collection.total_supply.to_string(),
                ));
            }

            let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
                Vec::with_capacity(chunk.len() * COLS_PER_ROW);

            for (i, collection) in chunk.iter().enumerate() {
                params.push(&collection.address);
                params.push(&converted[i].0);
                params.push(&converted[i].1);
                params.push(&converted[i].2);
            }

            client.execute(&query, &params).await.map_err(|e| {
                error!("Failed to batch insert {} collections: {:?}", chunk.len(), e);
                e
            })?;
        }

        Ok(())
    }

    // ==================== OWNERS ====================

    /// Get owners by address (batched)
    pub async fn get_owners(&self, addresses: &[String]) -> anyhow::Result<Vec<Owner>> {
        if addresses.is_empty() {
            return Ok(vec![]);
        }

        let client = self.pool.get().await?;
        let query = r#"
            SELECT address, balance, collection_balances
            FROM curio.owners
            WHERE address = ANY($1)
        "#;

        let rows = client.query(query, &[&addresses]).await?;
        Ok(rows.iter().map(row_to_owner).collect())
    }

    /// Batch insert/update owners (multi-row VALUES upsert)
    pub async fn set_owners(&self, owners: &[&Owner]) -> anyhow::Result<()> {
        if owners.is_empty() {
            return Ok(());
        }

        const COLS_PER_ROW: usize = 3;
        const BATCH_SIZE: usize = 1000;

        let client = self.pool.get().await?;

        for chunk in owners.chunks(BATCH_SIZE) {
            let values_clauses: Vec<String> = chunk
                .iter()
                .enumerate()
                .map(|(i, _)| {
                    let start = i * COLS_PER_ROW + 1;
                    let placeholders: Vec<String> = (start..start + COLS_PER_ROW)
                        .map(|n| format!("${}", n))
                        .collect();
                    format!("({})", placeholders.join(", "))
                })
                .collect();

            let query = format!(
                r#"
                INSERT INTO curio.owners (address, balance, collection_balances)
                VALUES {}
                ON CONFLICT (address) DO UPDATE SET
                    balance = EXCLUDED.balance,
                    collection_balances = EXCLUDED.collection_balances
                "#,
                values_clauses.join(", ")
            );

            let mut balances_json: Vec<serde_json::Value> = Vec::with_capacity(chunk.len());
            for owner in chunk {
                balances_json.push(
                    serde_json::to_value(&owner.collection_balances)
                        .unwrap_or(serde_json::Value::Object(Default::default())),
                );
            }

            let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
                Vec::with_capacity(chunk.len() * COLS_PER_ROW);

            for (i, owner) in chunk.iter().enumerate() {
                params.push(&owner.address);
                params.push(&owner.balance);
                params.push(&balances_json[i]);
            }

            client.execute(&query, &params).await.map_err(|e| {
                error!("Failed to batch insert {} owners: {:?}", chunk.len(), e);
                e
            })?;
        }

        Ok(())
    }

    // ==================== TOKENS ====================

    /// Get tokens by composite key (batched)
    pub async fn get_tokens(&self, ids: &[String]) -> anyhow::Result<Vec<Token>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let client = self.pool.get().await?;
        let query = r#"
            SELECT id, token_id, uri, old_uri, image_uri, owner, collection
            FROM curio.tokens
            WHERE id = ANY($1)
        "#;

        let rows = client.query(query, &[&ids]).await?;
        Ok(rows.iter().map(row_to_token).collect())
    }

    /// Get every token whose stored metadata URI equals `uri`.
    ///
    /// Used by the URI-migration fan-out: a shared/templated URI serving many
    /// tokens may move for all of them at once.
    pub async fn get_tokens_by_uri(&self, uri: &str) -> anyhow::Result<Vec<Token>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT id, token_id, uri, old_uri, image_uri, owner, collection
            FROM curio.tokens
            WHERE uri = $1
        "#;

        let rows = client.query(query, &[&uri]).await?;
        Ok(rows.iter().map(row_to_token).collect())
    }

    /// Get tokens with a missing image but a non-empty metadata URI.
    ///
    /// Backing query for the periodic image backfill sweep.
    pub async fn get_tokens_missing_image(&self, limit: i64) -> anyhow::Result<Vec<Token>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT id, token_id, uri, old_uri, image_uri, owner, collection
            FROM curio.tokens
            WHERE image_uri IS NULL AND uri <> ''
            ORDER BY id
            LIMIT $1
        "#;

        let rows = client.query(query, &[&limit]).await?;
        Ok(rows.iter().map(row_to_token).collect())
    }

    /// Batch insert/update tokens (multi-row VALUES upsert)
    pub async fn set_tokens(&self, tokens: &[&Token]) -> anyhow::Result<()> {
        if tokens.is_empty() {
            return Ok(());
        }

        const COLS_PER_ROW: usize = 7;
        const BATCH_SIZE: usize = 500;

        let client = self.pool.get().await?;

        for chunk in tokens.chunks(BATCH_SIZE) {
            let values_clauses: Vec<String> = chunk
                .iter()
                .enumerate()
                .map(|(i, _)| {
                    let start = i * COLS_PER_ROW + 1;
                    let placeholders: Vec<String> = (start..start + COLS_PER_ROW)
                        .map(|n| format!("${}", n))
                        .collect();
                    format!("({})", placeholders.join(", "))
                })
                .collect();

            let query = format!(
                r#"
                INSERT INTO curio.tokens (
                    id, token_id, uri, old_uri, image_uri, owner, collection
                ) VALUES {}
                ON CONFLICT (id) DO UPDATE SET
                    uri = EXCLUDED.uri,
                    old_uri = EXCLUDED.old_uri,
                    image_uri = EXCLUDED.image_uri,
                    owner = EXCLUDED.owner,
                    collection = EXCLUDED.collection
                "#,
                values_clauses.join(", ")
            );

            let mut converted: Vec<(String, String, String, Option<String>)> =
                Vec::with_capacity(chunk.len());
            for token in chunk {
                converted.push((
                    token.token_id.to_string(),
                    sanitize_string(&token.uri),
                    sanitize_string(&token.old_uri),
                    token.image_uri.as_deref().map(sanitize_string),
                ));
            }

            let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
                Vec::with_capacity(chunk.len() * COLS_PER_ROW);

            for (i, token) in chunk.iter().enumerate() {
                params.push(&token.id);
                params.push(&converted[i].0);
                params.push(&converted[i].1);
                params.push(&converted[i].2);
                params.push(&converted[i].3);
                params.push(&token.owner);
                params.push(&token.collection);
            }

            client.execute(&query, &params).await.map_err(|e| {
                error!("Failed to batch insert {} tokens: {:?}", chunk.len(), e);
                e
            })?;
        }

        Ok(())
    }

    // ==================== TRANSFERS ====================

    /// Batch insert transfers. Transfers are immutable facts keyed by the
    /// chain-native event id, so replays are absorbed by DO NOTHING.
    pub async fn set_transfers(&self, transfers: &[&Transfer]) -> anyhow::Result<()> {
        if transfers.is_empty() {
            return Ok(());
        }

        const COLS_PER_ROW: usize = 7;
        const BATCH_SIZE: usize = 500;

        let client = self.pool.get().await?;

        for chunk in transfers.chunks(BATCH_SIZE) {
            let values_clauses: Vec<String> = chunk
                .iter()
                .enumerate()
                .map(|(i, _)| {
                    let start = i * COLS_PER_ROW + 1;
                    let placeholders: Vec<String> = (start..start + COLS_PER_ROW)
                        .map(|n| format!("${}", n))
                        .collect();
                    format!("({})", placeholders.join(", "))
                })
                .collect();

            let query = format!(
                r#"
                INSERT INTO curio.transfers (
                    id, from_address, to_address, token, block_number, block_timestamp, tx_hash
                ) VALUES {}
                ON CONFLICT (id) DO NOTHING
                "#,
                values_clauses.join(", ")
            );

            let mut converted: Vec<(i64, i64)> = Vec::with_capacity(chunk.len());
            for transfer in chunk {
                converted.push((transfer.block_number as i64, transfer.block_timestamp as i64));
            }

            let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
                Vec::with_capacity(chunk.len() * COLS_PER_ROW);

            for (i, transfer) in chunk.iter().enumerate() {
                params.push(&transfer.id);
                params.push(&transfer.from_address);
                params.push(&transfer.to_address);
                params.push(&transfer.token);
                params.push(&converted[i].0);
                params.push(&converted[i].1);
                params.push(&transfer.tx_hash);
            }

            client.execute(&query, &params).await.map_err(|e| {
                error!("Failed to batch insert {} transfers: {:?}", chunk.len(), e);
                e
            })?;
        }

        Ok(())
    }

    // ==================== SYNC CHECKPOINT ====================

    /// Get the sync checkpoint
    pub async fn get_sync_checkpoint(&self) -> anyhow::Result<Option<SyncCheckpoint>> {
        let client = self.pool.get().await?;
        let query =
            "SELECT last_indexed_block, updated_at FROM curio.sync_checkpoints WHERE id = $1";

        let row = client.query_opt(query, &[&CHECKPOINT_ID]).await?;

        Ok(row.map(|r| {
            let last_indexed_block: i64 = r.get("last_indexed_block");
            SyncCheckpoint {
                last_indexed_block: last_indexed_block as u64,
                updated_at: r.get("updated_at"),
            }
        }))
    }

    /// Set the sync checkpoint
    pub async fn set_sync_checkpoint(&self, checkpoint: &SyncCheckpoint) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO curio.sync_checkpoints (id, last_indexed_block, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET
                last_indexed_block = EXCLUDED.last_indexed_block,
                updated_at = EXCLUDED.updated_at
        "#;

        let last_indexed_block = checkpoint.last_indexed_block as i64;

        client
            .execute(query, &[&CHECKPOINT_ID, &last_indexed_block, &checkpoint.updated_at])
            .await
            .map_err(|e| {
                error!("Failed to insert sync checkpoint: {:?}", e);
                e
            })?;

        Ok(())
    }
}
