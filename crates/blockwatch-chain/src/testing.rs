//! In-memory chain for tests and demos.
//!
//! [`InMemoryChain`] implements [`ChainClient`] over blocks and accounts held
//! in memory and counts every call, so tests can assert how often the
//! watcher actually reached the node.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};

use crate::client::ChainClient;
use crate::error::ChainError;
use crate::types::{Account, Block, GlobalProperties, Operation, Transaction};

const GENESIS_TIMESTAMP: i64 = 1_700_000_000;
const BLOCK_INTERVAL_SECS: i64 = 3;

/// Timestamp of block `num` on a chain producing a block every three seconds.
pub fn block_time(num: u64) -> NaiveDateTime {
    let offset = i64::try_from(num).unwrap_or(i64::MAX).saturating_mul(BLOCK_INTERVAL_SECS);
    DateTime::from_timestamp(GENESIS_TIMESTAMP.saturating_add(offset), 0)
        .map(|dt| dt.naive_utc())
        .unwrap_or_default()
}

#[derive(Debug, Default)]
struct ChainState {
    blocks: BTreeMap<u64, Block>,
    accounts: BTreeMap<String, Account>,
    head: u64,
}

#[derive(Debug, Default)]
struct CallCounts {
    global_properties: AtomicUsize,
    blocks: AtomicUsize,
    accounts: AtomicUsize,
}

#[derive(Debug, Default)]
pub struct InMemoryChain {
    state: Mutex<ChainState>,
    unavailable: AtomicBool,
    calls: CallCounts,
    account_batches: Mutex<Vec<usize>>,
}

impl InMemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// A chain with one empty block for every number in `1..=head`.
    pub fn with_empty_blocks(head: u64) -> Self {
        let chain = Self::new();
        for num in 1..=head {
            chain.push_block(block(num, Vec::new()));
        }
        chain
    }

    /// Adds `block` and moves the head to it if it is newer.
    pub fn push_block(&self, block: Block) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.head = state.head.max(block.block_num);
        state.blocks.insert(block.block_num, block);
    }

    /// Appends a block with `operations` right after the current head.
    pub fn produce(&self, operations: Vec<Operation>) -> u64 {
        let num = self.head() + 1;
        self.push_block(block(num, operations));
        num
    }

    pub fn set_account(&self, account: Account) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.accounts.insert(account.name.clone(), account);
    }

    /// Makes every call fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn head(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).head
    }

    pub fn global_properties_calls(&self) -> usize {
        self.calls.global_properties.load(Ordering::SeqCst)
    }

    pub fn block_calls(&self) -> usize {
        self.calls.blocks.load(Ordering::SeqCst)
    }

    pub fn account_calls(&self) -> usize {
        self.calls.accounts.load(Ordering::SeqCst)
    }

    /// Sizes of every `get_accounts` call so far, in call order.
    pub fn account_batches(&self) -> Vec<usize> {
        self.account_batches.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn check(&self, method: &'static str) -> Result<(), ChainError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ChainError::rpc(method, "node unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for InMemoryChain {
    async fn get_global_properties(&self) -> Result<GlobalProperties, ChainError> {
        self.calls.global_properties.fetch_add(1, Ordering::SeqCst);
        self.check("get_dynamic_global_properties")?;
        let head = self.head();
        Ok(GlobalProperties {
            head_block_number: head,
            last_irreversible_block_num: head.saturating_sub(20),
            time: block_time(head),
        })
    }

    async fn get_block(&self, block_num: u64) -> Result<Option<Block>, ChainError> {
        self.calls.blocks.fetch_add(1, Ordering::SeqCst);
        self.check("get_block")?;
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.blocks.get(&block_num).cloned())
    }

    async fn get_accounts(&self, names: &[String]) -> Result<Vec<Account>, ChainError> {
        self.calls.accounts.fetch_add(1, Ordering::SeqCst);
        self.account_batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(names.len());
        self.check("get_accounts")?;
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(names
            .iter()
            .filter_map(|name| state.accounts.get(name).cloned())
            .collect())
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────

/// Block `num` with one transaction per operation.
pub fn block(num: u64, operations: Vec<Operation>) -> Block {
    Block {
        block_num: num,
        timestamp: block_time(num),
        witness: "initminer".to_string(),
        transactions: operations
            .into_iter()
            .enumerate()
            .map(|(i, op)| Transaction {
                transaction_id: format!("{num:08x}{i:032x}"),
                operations: vec![op],
            })
            .collect(),
    }
}

pub fn vote(voter: &str, author: &str, permlink: &str) -> Operation {
    Operation::Vote {
        voter: voter.to_string(),
        author: author.to_string(),
        permlink: permlink.to_string(),
        weight: 10_000,
    }
}

pub fn post(author: &str, permlink: &str) -> Operation {
    Operation::Comment {
        parent_author: String::new(),
        parent_permlink: "blockwatch".to_string(),
        author: author.to_string(),
        permlink: permlink.to_string(),
        title: permlink.replace('-', " "),
        body: String::new(),
    }
}

pub fn reply(author: &str, parent_author: &str, permlink: &str) -> Operation {
    Operation::Comment {
        parent_author: parent_author.to_string(),
        parent_permlink: format!("{parent_author}-post"),
        author: author.to_string(),
        permlink: permlink.to_string(),
        title: String::new(),
        body: String::new(),
    }
}

pub fn transfer(from: &str, to: &str, amount: &str) -> Operation {
    Operation::Transfer {
        from: from.to_string(),
        to: to.to_string(),
        amount: amount.to_string(),
        memo: String::new(),
    }
}

pub fn account(name: &str, balance: &str) -> Account {
    Account {
        name: name.to_string(),
        balance: balance.to_string(),
        vesting_shares: "0.000000 VESTS".to_string(),
        post_count: 0,
    }
}
