//! Collectors backed by a [`ChainClient`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use blockwatch_engine::{
    downcast_options, Classifier, ClassifierId, ClassifierRef, Collected, Collector, DataContext,
    EngineError, QueryOptions, QueryOutput, Registrations,
};
use futures_util::future::try_join_all;

use crate::classifiers::{AccountClassifier, BlockClassifier, HeadClassifier, OperationsClassifier};
use crate::client::{fetch_accounts_chunked, ChainClient, MAX_ACCOUNTS_PER_CALL};
use crate::types::{Block, OperationRecord};

/// Reads the live head from the node every tick.
pub struct GlobalPropertiesCollector {
    client: Arc<dyn ChainClient>,
    registrations: Registrations,
}

impl GlobalPropertiesCollector {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self {
            client,
            registrations: Registrations::new(),
        }
    }
}

#[async_trait]
impl Collector for GlobalPropertiesCollector {
    fn name(&self) -> &'static str {
        "global_properties"
    }

    fn classifiers(&self) -> Vec<ClassifierId> {
        vec![HeadClassifier::id()]
    }

    fn registrations(&self) -> &Registrations {
        &self.registrations
    }

    async fn get(&self, _ctx: &DataContext) -> Result<Collected, EngineError> {
        let props = self
            .client
            .get_global_properties()
            .await
            .map_err(|e| EngineError::fetch(HeadClassifier::id(), e))?;
        Ok(Collected::new().with::<HeadClassifier>(props))
    }
}

/// Replays a fixed block range by moving a virtual head one block per tick.
///
/// The virtual head starts at `from`, never passes `to` and never runs ahead
/// of the real chain head. While the chain is still below `from` it reports
/// `from - 1`, so nothing before the range is ever fetched.
pub struct ReplayHeadCollector {
    client: Arc<dyn ChainClient>,
    registrations: Registrations,
    cursor: AtomicU64,
    from: u64,
    to: u64,
}

impl ReplayHeadCollector {
    pub fn new(client: Arc<dyn ChainClient>, from: u64, to: u64) -> Self {
        Self {
            client,
            registrations: Registrations::new(),
            cursor: AtomicU64::new(from),
            from,
            to,
        }
    }
}

#[async_trait]
impl Collector for ReplayHeadCollector {
    fn name(&self) -> &'static str {
        "replay_head"
    }

    fn classifiers(&self) -> Vec<ClassifierId> {
        vec![HeadClassifier::id()]
    }

    fn registrations(&self) -> &Registrations {
        &self.registrations
    }

    async fn get(&self, _ctx: &DataContext) -> Result<Collected, EngineError> {
        let mut props = self
            .client
            .get_global_properties()
            .await
            .map_err(|e| EngineError::fetch(HeadClassifier::id(), e))?;

        let next = self.cursor.load(Ordering::Acquire);
        let head = if props.head_block_number < next {
            next.saturating_sub(1).max(self.from.saturating_sub(1))
        } else {
            next.min(self.to)
        };
        if head == next && next < self.to {
            self.cursor.store(next + 1, Ordering::Release);
        }
        tracing::debug!(head, chain_head = props.head_block_number, to = self.to, "replay head");

        props.head_block_number = head;
        props.last_irreversible_block_num = props.last_irreversible_block_num.min(head);
        Ok(Collected::new().with::<HeadClassifier>(props))
    }
}

/// Fetches the blocks between the last processed block and the head.
///
/// Backs both [`BlockClassifier`] and [`OperationsClassifier`] from one
/// fetch. The first tick only fetches the head block, or starts at the block
/// given to [`BlockCollector::starting_at`]; later ticks catch up at most
/// `max_blocks_per_tick` blocks at a time. Heads below the start fetch
/// nothing.
pub struct BlockCollector {
    client: Arc<dyn ChainClient>,
    registrations: Registrations,
    last_processed: Mutex<Option<u64>>,
    start: Option<u64>,
    max_blocks_per_tick: u64,
}

impl BlockCollector {
    pub fn new(client: Arc<dyn ChainClient>, max_blocks_per_tick: usize) -> Self {
        Self {
            client,
            registrations: Registrations::new(),
            last_processed: Mutex::new(None),
            start: None,
            max_blocks_per_tick: max_blocks_per_tick.max(1) as u64,
        }
    }

    /// Never fetches a block below `start`.
    pub fn starting_at(mut self, start: u64) -> Self {
        self.start = Some(start);
        self
    }

    /// Block numbers to fetch for a head at `head`.
    fn pending(&self, head: u64) -> std::ops::RangeInclusive<u64> {
        let last = *self.last_processed.lock().unwrap_or_else(|e| e.into_inner());
        let window = self.max_blocks_per_tick - 1;
        match (last, self.start) {
            (None, None) => head..=head,
            (None, Some(start)) => start..=head.min(start.saturating_add(window)),
            (Some(last), _) if head > last => {
                (last + 1)..=head.min(last.saturating_add(self.max_blocks_per_tick))
            }
            // Empty range: nothing new.
            (Some(_), _) => 1..=0,
        }
    }
}

#[async_trait]
impl Collector for BlockCollector {
    fn name(&self) -> &'static str {
        "blocks"
    }

    fn classifiers(&self) -> Vec<ClassifierId> {
        vec![BlockClassifier::id(), OperationsClassifier::id()]
    }

    fn registrations(&self) -> &Registrations {
        &self.registrations
    }

    fn used_contexts(&self) -> Vec<ClassifierRef> {
        vec![ClassifierRef::of::<HeadClassifier>()]
    }

    async fn get(&self, ctx: &DataContext) -> Result<Collected, EngineError> {
        let head = ctx.get::<HeadClassifier>().await?.head_block_number;
        let pending = self.pending(head);

        let fetched = try_join_all(pending.map(|num| self.client.get_block(num)))
            .await
            .map_err(|e| EngineError::fetch(BlockClassifier::id(), e))?;

        // Stop at the first gap so it is retried next tick.
        let blocks: Vec<Block> = fetched.into_iter().map_while(|block| block).collect();
        if let Some(newest) = blocks.last() {
            *self.last_processed.lock().unwrap_or_else(|e| e.into_inner()) = Some(newest.block_num);
        }

        let operations: Vec<OperationRecord> = blocks.iter().flat_map(|block| block.operations()).collect();
        tracing::debug!(
            head,
            blocks = blocks.len(),
            operations = operations.len(),
            tick = ctx.tick(),
            "fetched blocks"
        );

        Ok(Collected::new()
            .with::<BlockClassifier>(blocks)
            .with::<OperationsClassifier>(operations))
    }

    async fn query(
        &self,
        _ctx: &DataContext,
        classifier: ClassifierId,
        options: QueryOptions,
    ) -> Result<QueryOutput, EngineError> {
        if classifier != BlockClassifier::id() {
            return Err(EngineError::QueryNotImplemented {
                collector: self.name(),
                classifier,
            });
        }
        let num = downcast_options::<BlockClassifier>(options)?;
        let block = self
            .client
            .get_block(num)
            .await
            .map_err(|e| EngineError::fetch(classifier, e))?;
        Ok(Box::new(block))
    }
}

/// Looks up every account registered by name, in chunked batches.
pub struct AccountCollector {
    client: Arc<dyn ChainClient>,
    registrations: Registrations,
    batch_size: usize,
}

impl AccountCollector {
    pub fn new(client: Arc<dyn ChainClient>, batch_size: usize) -> Self {
        Self {
            client,
            registrations: Registrations::new(),
            batch_size: batch_size.clamp(1, MAX_ACCOUNTS_PER_CALL),
        }
    }
}

#[async_trait]
impl Collector for AccountCollector {
    fn name(&self) -> &'static str {
        "accounts"
    }

    fn classifiers(&self) -> Vec<ClassifierId> {
        vec![AccountClassifier::id()]
    }

    fn registrations(&self) -> &Registrations {
        &self.registrations
    }

    async fn get(&self, _ctx: &DataContext) -> Result<Collected, EngineError> {
        let names = self.registrations.params();
        let accounts = fetch_accounts_chunked(self.client.as_ref(), &names, self.batch_size)
            .await
            .map_err(|e| EngineError::fetch(AccountClassifier::id(), e))?;
        let accounts: BTreeMap<_, _> = accounts
            .into_iter()
            .map(|account| (account.name.clone(), account))
            .collect();
        Ok(Collected::new().with::<AccountClassifier>(accounts))
    }

    async fn query(
        &self,
        _ctx: &DataContext,
        classifier: ClassifierId,
        options: QueryOptions,
    ) -> Result<QueryOutput, EngineError> {
        let names = downcast_options::<AccountClassifier>(options)?;
        let accounts = fetch_accounts_chunked(self.client.as_ref(), &names, self.batch_size)
            .await
            .map_err(|e| EngineError::fetch(classifier, e))?;
        Ok(Box::new(accounts))
    }
}
