//! Filters over chain operations and accounts.

use async_trait::async_trait;
use blockwatch_engine::{ClassifierRef, DataContext, EngineError, Filter};

use crate::classifiers::{AccountClassifier, OperationsClassifier};
use crate::impacted::impacted_accounts;
use crate::types::{Operation, OperationKind};

/// Matches when the tick carries an operation of `kind`, optionally one that
/// touches `account`.
#[derive(Debug, Clone)]
pub struct OperationFilter {
    kind: OperationKind,
    account: Option<String>,
}

impl OperationFilter {
    pub fn new(kind: OperationKind) -> Self {
        Self { kind, account: None }
    }

    pub fn touching(kind: OperationKind, account: impl Into<String>) -> Self {
        Self {
            kind,
            account: Some(account.into()),
        }
    }
}

#[async_trait]
impl Filter for OperationFilter {
    async fn matches(&self, ctx: &DataContext) -> Result<bool, EngineError> {
        let operations = ctx.get::<OperationsClassifier>().await?;
        Ok(operations.iter().any(|record| {
            record.op.kind() == self.kind
                && self
                    .account
                    .as_ref()
                    .map_or(true, |account| impacted_accounts(&record.op).contains(account))
        }))
    }

    fn used_contexts(&self) -> Vec<ClassifierRef> {
        vec![ClassifierRef::of::<OperationsClassifier>()]
    }
}

/// Root post by `author`.
#[derive(Debug, Clone)]
pub struct PostByFilter {
    author: String,
}

impl PostByFilter {
    pub fn new(author: impl Into<String>) -> Self {
        Self { author: author.into() }
    }
}

#[async_trait]
impl Filter for PostByFilter {
    async fn matches(&self, ctx: &DataContext) -> Result<bool, EngineError> {
        let operations = ctx.get::<OperationsClassifier>().await?;
        Ok(operations.iter().any(|record| {
            record.op.is_post() && matches!(&record.op, Operation::Comment { author, .. } if *author == self.author)
        }))
    }

    fn used_contexts(&self) -> Vec<ClassifierRef> {
        vec![ClassifierRef::of::<OperationsClassifier>()]
    }
}

/// Vote cast by `voter`.
#[derive(Debug, Clone)]
pub struct VoteByFilter {
    voter: String,
}

impl VoteByFilter {
    pub fn new(voter: impl Into<String>) -> Self {
        Self { voter: voter.into() }
    }
}

#[async_trait]
impl Filter for VoteByFilter {
    async fn matches(&self, ctx: &DataContext) -> Result<bool, EngineError> {
        let operations = ctx.get::<OperationsClassifier>().await?;
        Ok(operations
            .iter()
            .any(|record| matches!(&record.op, Operation::Vote { voter, .. } if *voter == self.voter)))
    }

    fn used_contexts(&self) -> Vec<ClassifierRef> {
        vec![ClassifierRef::of::<OperationsClassifier>()]
    }
}

/// Matches on ticks where `account`'s balance differs from the previous tick.
///
/// Never matches on the first tick the account is seen, nor when the account
/// does not exist.
#[derive(Debug, Clone)]
pub struct BalanceChangedFilter {
    account: String,
}

impl BalanceChangedFilter {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }
}

#[async_trait]
impl Filter for BalanceChangedFilter {
    async fn matches(&self, ctx: &DataContext) -> Result<bool, EngineError> {
        let accounts = ctx.get::<AccountClassifier>().await?;
        let Some(account) = accounts.get(&self.account) else {
            return Ok(false);
        };
        let history = ctx.access_store::<AccountClassifier>()?;
        let changed = history
            .lock()
            .await
            .observe(&account.name, &account.balance, ctx.tick());
        Ok(changed)
    }

    fn used_contexts(&self) -> Vec<ClassifierRef> {
        vec![ClassifierRef::with::<AccountClassifier>(self.account.clone())]
    }
}
