//! Observation engine for block watchers.
//!
//! Every new block is a *tick*. On each tick the engine evaluates many
//! independent subscriptions and hands each subscriber only the data it asked
//! for, only when its condition holds. Three pieces make that cheap:
//!
//! | Piece | Role |
//! |-------|------|
//! | [`CollectorFactory`] | Reference-counted dependency graph of [`Collector`]s. Only collectors some subscription needs are active. |
//! | [`DataContext`] | Per-tick broker. A collector's `get` runs at most once per tick no matter how many filters and providers ask for it. |
//! | [`FilterContainer`] / [`CompositeFilter`] | AND/OR filter algebra that settles as soon as the outcome is known and silently abandons the rest. |
//!
//! The [`ObserverMediator`] ties them together: subscribing registers the
//! classifiers a subscription needs, every tick builds a fresh context,
//! evaluates filters, runs providers for the matches and merges their payload
//! fragments, and unsubscribing releases the registrations again.
//!
//! # Usage
//!
//! ```rust,ignore
//! use blockwatch_engine::{ChannelObserver, CollectorFactory, FilterContainer, ObserverMediator};
//!
//! let factory = CollectorFactory::builder("live")
//!     .with_collector(head_collector)
//!     .with_collector(block_collector)
//!     .build()?;
//! let mediator = ObserverMediator::new(factory);
//!
//! let (observer, mut rx) = ChannelObserver::new();
//! let subscription = mediator.subscribe(
//!     FilterContainer::any(vec![Box::new(post_by_alice), Box::new(vote_by_bob)]),
//!     vec![Box::new(block_provider)],
//!     observer,
//! )?;
//!
//! mediator.notify().await;
//! ```

mod classifier;
mod collector;
mod context;
mod error;
mod factory;
mod filter;
mod mediator;
mod policy;
mod provider;

pub use classifier::{Classifier, ClassifierId, ClassifierRef};
pub use collector::{
    downcast_options, Collected, Collector, QueryOptions, QueryOutput, RefCountTable,
    Registrations,
};
pub use context::DataContext;
pub use error::{DependencyPath, EngineError};
pub use factory::{CollectorFactory, FactoryBuilder};
pub use filter::{Combinator, CompositeFilter, Filter, FilterContainer};
pub use mediator::{
    ChannelObserver, Notification, Observer, ObserverMediator, Subscription, SubscriptionId,
};
pub use policy::{ContinuousPolicy, HeadBlock, LivePolicy, ReplayPolicy, TickControl, TickPolicy};
pub use provider::{merge_payload, Payload, Provider};
