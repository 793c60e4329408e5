//! Upstream chain client contract.

use async_trait::async_trait;
use futures_util::future::try_join_all;

use crate::error::ChainError;
use crate::types::{Account, Block, GlobalProperties};

/// Most account names a single `get_accounts` call may carry.
pub const MAX_ACCOUNTS_PER_CALL: usize = 1000;

/// Read access to a chain node.
///
/// Implementations are expected to be cheap to share behind an `Arc`; every
/// collector of a watcher holds one.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_global_properties(&self) -> Result<GlobalProperties, ChainError>;

    /// `None` if the block does not exist yet.
    async fn get_block(&self, block_num: u64) -> Result<Option<Block>, ChainError>;

    /// Accounts that exist among `names`. Unknown names are skipped.
    async fn get_accounts(&self, names: &[String]) -> Result<Vec<Account>, ChainError>;
}

/// Looks `names` up in concurrent calls of at most `max` names each.
///
/// `max` is clamped to `1..=MAX_ACCOUNTS_PER_CALL`.
pub async fn fetch_accounts_chunked(
    client: &dyn ChainClient,
    names: &[String],
    max: usize,
) -> Result<Vec<Account>, ChainError> {
    if names.is_empty() {
        return Ok(Vec::new());
    }
    let max = max.clamp(1, MAX_ACCOUNTS_PER_CALL);
    let batches = try_join_all(names.chunks(max).map(|chunk| client.get_accounts(chunk))).await?;
    tracing::trace!(names = names.len(), calls = batches.len(), "fetched accounts");
    Ok(batches.into_iter().flatten().collect())
}
