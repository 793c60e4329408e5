//! Chain integration for the blockwatch observation engine.
//!
//! Provides the chain data types, the [`ChainClient`] contract the engine
//! reads through, and the standard collectors, filters and providers built on
//! it. [`Watcher`] wires them into an [`blockwatch_engine::ObserverMediator`]
//! from a [`Config`].

pub mod classifiers;
pub mod client;
pub mod collectors;
pub mod config;
pub mod error;
pub mod filters;
pub mod impacted;
pub mod providers;
pub mod telemetry;
pub mod testing;
pub mod types;
pub mod watcher;

pub use classifiers::{
    AccountClassifier, BalanceHistory, BlockClassifier, HeadClassifier, OperationsClassifier,
};
pub use client::{fetch_accounts_chunked, ChainClient, MAX_ACCOUNTS_PER_CALL};
pub use collectors::{
    AccountCollector, BlockCollector, GlobalPropertiesCollector, ReplayHeadCollector,
};
pub use config::{load_config, Config, ConfigError};
pub use error::ChainError;
pub use filters::{BalanceChangedFilter, OperationFilter, PostByFilter, VoteByFilter};
pub use impacted::impacted_accounts;
pub use providers::{AccountProvider, BlockProvider, CommentsProvider, PostsProvider, VotesProvider};
pub use telemetry::init_tracing;
pub use types::{
    Account, Block, GlobalProperties, Operation, OperationKind, OperationRecord, Transaction,
};
pub use watcher::{WatchMode, Watcher};
