//! Job to retry image resolution for tokens missing one.
//!
//! A token's image stays NULL whenever the off-chain fetch failed during
//! reconciliation. This sweep runs decoupled from the transfer path: it
//! scans for tokens with a NULL image but a non-empty metadata URI and
//! retries the fetch, persisting whatever succeeds.

use anyhow::Result;
use log::info;

use crate::db::models::Token;
use crate::db::Database;
use crate::worker::MetadataResolver;

pub async fn run(db: &Database, metadata: &MetadataResolver, batch_limit: i64) -> Result<()> {
    let start = std::time::Instant::now();

    let tokens = db.postgres.get_tokens_missing_image(batch_limit).await?;
    if tokens.is_empty() {
        return Ok(());
    }

    let candidates = tokens.len();

    // Image fetches for distinct tokens are independent; run them together
    let fetches = tokens.iter().map(|token| metadata.resolve_image(&token.uri));
    let images = futures::future::join_all(fetches).await;

    let resolved: Vec<Token> = tokens
        .into_iter()
        .zip(images)
        .filter_map(|(mut token, image)| {
            image.map(|image| {
                token.image_uri = Some(image);
                token
            })
        })
        .collect();

    if !resolved.is_empty() {
        let refs: Vec<&Token> = resolved.iter().collect();
        db.postgres.set_tokens(&refs).await?;
    }

    info!(
        "Completed backfill_images job in {:?} ({} resolved of {} candidates)",
        start.elapsed(),
        resolved.len(),
        candidates
    );
    Ok(())
}
