//! Standard watcher wiring over a [`ChainClient`].

use std::sync::Arc;
use std::time::Duration;

use blockwatch_engine::{
    CollectorFactory, EngineError, Filter, LivePolicy, Observer, ObserverMediator, Provider,
    ReplayPolicy, Subscription,
};

use crate::classifiers::HeadClassifier;
use crate::client::ChainClient;
use crate::collectors::{AccountCollector, BlockCollector, GlobalPropertiesCollector, ReplayHeadCollector};
use crate::config::Config;
use crate::error::ChainError;

/// Whether the watcher follows the live head or replays a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    Live,
    Replay { from: u64, to: u64 },
}

/// A mediator over the standard chain collectors.
pub struct Watcher {
    mediator: ObserverMediator,
    mode: WatchMode,
    interval: Duration,
}

impl Watcher {
    /// Builds the collector graph for `config`.
    ///
    /// Live mode uses the node's head as the clock and ticks every
    /// `tick.interval_ms`. Replay mode walks `replay.from..=replay.to` one
    /// block per tick, back to back, and stops at the end of the range.
    ///
    /// # Errors
    ///
    /// Returns `ChainError::Config` for an unusable replay range.
    pub fn new(config: &Config, client: Arc<dyn ChainClient>) -> Result<Self, ChainError> {
        let range = config.replay.range()?;

        let mut blocks = BlockCollector::new(Arc::clone(&client), config.chain.max_blocks_per_tick);
        if let Some((from, _)) = range {
            blocks = blocks.starting_at(from);
        }

        let builder = CollectorFactory::builder(match range {
            Some(_) => "replay",
            None => "live",
        })
        .with_collector(blocks)
        .with_collector(AccountCollector::new(Arc::clone(&client), config.chain.account_batch));

        let (builder, mode, interval) = match range {
            Some((from, to)) => (
                builder
                    .with_collector(ReplayHeadCollector::new(client, from, to))
                    .with_policy(ReplayPolicy::<HeadClassifier>::new(to)),
                WatchMode::Replay { from, to },
                Duration::ZERO,
            ),
            None => (
                builder
                    .with_collector(GlobalPropertiesCollector::new(client))
                    .with_policy(LivePolicy::<HeadClassifier>::new()),
                WatchMode::Live,
                Duration::from_millis(config.tick.interval_ms),
            ),
        };

        let factory = builder.build()?;
        tracing::info!(?mode, interval_ms = interval.as_millis() as u64, "watcher configured");

        Ok(Self {
            mediator: ObserverMediator::new(factory),
            mode,
            interval,
        })
    }

    pub fn mediator(&self) -> &ObserverMediator {
        &self.mediator
    }

    pub fn mode(&self) -> WatchMode {
        self.mode
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Shorthand for [`ObserverMediator::subscribe`].
    pub fn subscribe(
        &self,
        filter: impl Filter + 'static,
        providers: Vec<Box<dyn Provider>>,
        observer: Arc<dyn Observer>,
    ) -> Result<Subscription, EngineError> {
        self.mediator.subscribe(filter, providers, observer)
    }

    /// Ticks until the replay range is exhausted or [`Watcher::shutdown`]
    /// is called.
    pub async fn run(&self) {
        self.mediator.run(self.interval).await;
    }

    /// Stops ticking and detaches every subscriber.
    pub fn shutdown(&self) -> Result<usize, ChainError> {
        Ok(self.mediator.shutdown()?)
    }
}
