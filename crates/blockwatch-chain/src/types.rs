//! Chain data shapes as returned by the node.

use std::fmt;

use blockwatch_engine::HeadBlock;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Dynamic global properties: where the chain head currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalProperties {
    pub head_block_number: u64,
    pub last_irreversible_block_num: u64,
    pub time: NaiveDateTime,
}

impl HeadBlock for GlobalProperties {
    fn head_block(&self) -> u64 {
        self.head_block_number
    }
}

/// A signed block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub block_num: u64,
    pub timestamp: NaiveDateTime,
    pub witness: String,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Every operation in the block, in order, tagged with where it came from.
    pub fn operations(&self) -> impl Iterator<Item = OperationRecord> + '_ {
        self.transactions.iter().flat_map(move |tx| {
            tx.operations.iter().map(move |op| OperationRecord {
                block_num: self.block_num,
                transaction_id: tx.transaction_id.clone(),
                timestamp: self.timestamp,
                op: op.clone(),
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub operations: Vec<Operation>,
}

/// The operations the watcher understands. Everything else arrives as
/// [`Operation::Other`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Operation {
    Vote {
        voter: String,
        author: String,
        permlink: String,
        weight: i16,
    },
    /// A root post when `parent_author` is empty, a reply otherwise.
    Comment {
        #[serde(default)]
        parent_author: String,
        parent_permlink: String,
        author: String,
        permlink: String,
        #[serde(default)]
        title: String,
        #[serde(default)]
        body: String,
    },
    Transfer {
        from: String,
        to: String,
        amount: String,
        #[serde(default)]
        memo: String,
    },
    CustomJson {
        id: String,
        #[serde(default)]
        required_auths: Vec<String>,
        #[serde(default)]
        required_posting_auths: Vec<String>,
        json: String,
    },
    AccountUpdate {
        account: String,
        #[serde(default)]
        json_metadata: String,
    },
    Other {
        name: String,
    },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Vote { .. } => OperationKind::Vote,
            Self::Comment { .. } => OperationKind::Comment,
            Self::Transfer { .. } => OperationKind::Transfer,
            Self::CustomJson { .. } => OperationKind::CustomJson,
            Self::AccountUpdate { .. } => OperationKind::AccountUpdate,
            Self::Other { .. } => OperationKind::Other,
        }
    }

    /// A comment with no parent.
    pub fn is_post(&self) -> bool {
        matches!(self, Self::Comment { parent_author, .. } if parent_author.is_empty())
    }

    pub fn is_reply(&self) -> bool {
        matches!(self, Self::Comment { parent_author, .. } if !parent_author.is_empty())
    }
}

/// Operation discriminant, used to filter by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Vote,
    Comment,
    Transfer,
    CustomJson,
    AccountUpdate,
    Other,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vote => "vote",
            Self::Comment => "comment",
            Self::Transfer => "transfer",
            Self::CustomJson => "custom_json",
            Self::AccountUpdate => "account_update",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One operation together with the block and transaction that carried it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub block_num: u64,
    pub transaction_id: String,
    pub timestamp: NaiveDateTime,
    pub op: Operation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub balance: String,
    #[serde(default)]
    pub vesting_shares: String,
    #[serde(default)]
    pub post_count: u64,
}
