//! Payload providers for chain subscriptions.
//!
//! Each provider contributes at most one top-level key and returns an empty
//! fragment when it has nothing to report, so its key never shows up empty.

use async_trait::async_trait;
use blockwatch_engine::{ClassifierRef, DataContext, EngineError, Payload, Provider};
use serde::Serialize;
use serde_json::Value;

use crate::classifiers::{AccountClassifier, BlockClassifier, OperationsClassifier};
use crate::types::{Operation, OperationRecord};

/// `{ section: { key: value } }`
fn keyed(section: &str, key: &str, value: impl Serialize) -> Result<Payload, EngineError> {
    let mut inner = Payload::new();
    inner.insert(key.to_string(), serde_json::to_value(value)?);
    let mut payload = Payload::new();
    payload.insert(section.to_string(), Value::Object(inner));
    Ok(payload)
}

async fn records_where(
    ctx: &DataContext,
    section: &str,
    key: &str,
    keep: impl Fn(&Operation) -> bool,
) -> Result<Payload, EngineError> {
    let operations = ctx.get::<OperationsClassifier>().await?;
    let matching: Vec<&OperationRecord> = operations.iter().filter(|record| keep(&record.op)).collect();
    if matching.is_empty() {
        return Ok(Payload::new());
    }
    keyed(section, key, matching)
}

/// Newest block of the tick under `block`.
#[derive(Debug, Clone, Default)]
pub struct BlockProvider;

#[async_trait]
impl Provider for BlockProvider {
    async fn provide(&self, ctx: &DataContext) -> Result<Payload, EngineError> {
        let blocks = ctx.get::<BlockClassifier>().await?;
        let mut payload = Payload::new();
        if let Some(block) = blocks.last() {
            payload.insert("block".to_string(), serde_json::to_value(block)?);
        }
        Ok(payload)
    }

    fn used_contexts(&self) -> Vec<ClassifierRef> {
        vec![ClassifierRef::of::<BlockClassifier>()]
    }
}

/// Votes cast by `voter` under `votes.<voter>`.
#[derive(Debug, Clone)]
pub struct VotesProvider {
    voter: String,
}

impl VotesProvider {
    pub fn new(voter: impl Into<String>) -> Self {
        Self { voter: voter.into() }
    }
}

#[async_trait]
impl Provider for VotesProvider {
    async fn provide(&self, ctx: &DataContext) -> Result<Payload, EngineError> {
        records_where(ctx, "votes", &self.voter, |op| {
            matches!(op, Operation::Vote { voter, .. } if *voter == self.voter)
        })
        .await
    }

    fn used_contexts(&self) -> Vec<ClassifierRef> {
        vec![ClassifierRef::of::<OperationsClassifier>()]
    }
}

/// Root posts by `author` under `posts.<author>`.
#[derive(Debug, Clone)]
pub struct PostsProvider {
    author: String,
}

impl PostsProvider {
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            author: author.into(),
        }
    }
}

#[async_trait]
impl Provider for PostsProvider {
    async fn provide(&self, ctx: &DataContext) -> Result<Payload, EngineError> {
        records_where(ctx, "posts", &self.author, |op| {
            op.is_post() && matches!(op, Operation::Comment { author, .. } if *author == self.author)
        })
        .await
    }

    fn used_contexts(&self) -> Vec<ClassifierRef> {
        vec![ClassifierRef::of::<OperationsClassifier>()]
    }
}

/// Replies written by `author` under `comments.<author>`.
#[derive(Debug, Clone)]
pub struct CommentsProvider {
    author: String,
}

impl CommentsProvider {
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            author: author.into(),
        }
    }
}

#[async_trait]
impl Provider for CommentsProvider {
    async fn provide(&self, ctx: &DataContext) -> Result<Payload, EngineError> {
        records_where(ctx, "comments", &self.author, |op| {
            op.is_reply() && matches!(op, Operation::Comment { author, .. } if *author == self.author)
        })
        .await
    }

    fn used_contexts(&self) -> Vec<ClassifierRef> {
        vec![ClassifierRef::of::<OperationsClassifier>()]
    }
}

/// The account `name` under `accounts.<name>`.
#[derive(Debug, Clone)]
pub struct AccountProvider {
    name: String,
}

impl AccountProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Provider for AccountProvider {
    async fn provide(&self, ctx: &DataContext) -> Result<Payload, EngineError> {
        let accounts = ctx.get::<AccountClassifier>().await?;
        match accounts.get(&self.name) {
            Some(account) => keyed("accounts", &self.name, account),
            None => Ok(Payload::new()),
        }
    }

    fn used_contexts(&self) -> Vec<ClassifierRef> {
        vec![ClassifierRef::with::<AccountClassifier>(self.name.clone())]
    }
}
