//! Observer mediator: subscription lifecycle and the tick loop.
//!
//! Subscribing registers every classifier the subscription's filter and
//! providers need with the factory, which is what makes the backing
//! collectors active. Each tick then:
//!
//! 1. runs the factory's pre-notify hook,
//! 2. builds a fresh [`DataContext`],
//! 3. evaluates every subscriber concurrently, running providers against the
//!    same context for the ones that match and delivering the merged payload,
//! 4. asks the factory's post-notify hook whether to keep going.
//!
//! A failure while evaluating one subscriber goes to that subscriber's
//! [`Observer::error`] and nowhere else.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures_util::future::{join_all, try_join_all};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::classifier::ClassifierRef;
use crate::context::DataContext;
use crate::error::EngineError;
use crate::factory::CollectorFactory;
use crate::filter::Filter;
use crate::policy::TickControl;
use crate::provider::{merge_payload, Payload, Provider};

/// Downstream subscriber contract.
pub trait Observer: Send + Sync {
    /// A tick satisfied the subscription.
    fn next(&self, payload: Payload);

    /// Evaluating the subscription failed this tick.
    fn error(&self, error: EngineError);

    /// The subscription was detached. Nothing follows.
    fn complete(&self);
}

/// One message to a channel-backed observer.
#[derive(Debug, Clone)]
pub enum Notification {
    Next(Payload),
    Error(EngineError),
    Complete,
}

/// [`Observer`] forwarding everything into an unbounded tokio channel.
#[derive(Debug)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelObserver {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn send(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::trace!("observer receiver dropped, notification discarded");
        }
    }
}

impl Observer for ChannelObserver {
    fn next(&self, payload: Payload) {
        self.send(Notification::Next(payload));
    }

    fn error(&self, error: EngineError) {
        self.send(Notification::Error(error));
    }

    fn complete(&self) {
        self.send(Notification::Complete);
    }
}

/// Opaque subscriber handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

struct SubscriberEntry {
    filter: Box<dyn Filter>,
    providers: Vec<Box<dyn Provider>>,
    observer: Arc<dyn Observer>,
    refs: Vec<ClassifierRef>,
}

struct MediatorInner {
    factory: CollectorFactory,
    subscribers: Mutex<HashMap<SubscriptionId, Arc<SubscriberEntry>>>,
    shutdown: watch::Sender<bool>,
}

fn origin(id: SubscriptionId) -> String {
    format!("subscription {id}")
}

impl MediatorInner {
    fn subscribe(
        &self,
        filter: Box<dyn Filter>,
        providers: Vec<Box<dyn Provider>>,
        observer: Arc<dyn Observer>,
    ) -> Result<SubscriptionId, EngineError> {
        let id = SubscriptionId(Uuid::new_v4());
        let origin = origin(id);

        let mut refs: BTreeSet<ClassifierRef> = filter.used_contexts().into_iter().collect();
        for provider in &providers {
            refs.extend(provider.used_contexts());
        }

        // Nothing is registered unless every ref resolves.
        for reference in &refs {
            self.factory.validate(reference, &origin)?;
        }
        let mut pushed: Vec<&ClassifierRef> = Vec::with_capacity(refs.len());
        for reference in &refs {
            if let Err(e) = self.factory.push_classifier(reference, &origin) {
                for done in pushed {
                    if let Err(rollback) = self.factory.pop_classifier(done, &origin) {
                        tracing::warn!(classifier = %done, error = %rollback, "rollback failed");
                    }
                }
                return Err(e);
            }
            pushed.push(reference);
        }

        let refs: Vec<ClassifierRef> = refs.into_iter().collect();
        tracing::info!(subscription = %id, classifiers = refs.len(), providers = providers.len(), "subscribed");

        let entry = SubscriberEntry {
            filter,
            providers,
            observer,
            refs,
        };
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Arc::new(entry));
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<bool, EngineError> {
        let entry = self
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        let Some(entry) = entry else {
            return Ok(false);
        };

        entry.filter.cancel();

        let origin = origin(id);
        let mut outcome = Ok(true);
        for reference in &entry.refs {
            if let Err(e) = self.factory.pop_classifier(reference, &origin) {
                tracing::warn!(subscription = %id, classifier = %reference, error = %e, "failed to release classifier");
                outcome = Err(e);
            }
        }

        entry.observer.complete();
        tracing::info!(subscription = %id, "unsubscribed");
        outcome
    }

    fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&id)
    }

    fn snapshot(&self) -> Vec<(SubscriptionId, Arc<SubscriberEntry>)> {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(id, entry)| (*id, Arc::clone(entry)))
            .collect()
    }

    /// Evaluates one subscriber. Returns `true` if a payload was delivered.
    async fn evaluate(&self, id: SubscriptionId, entry: &SubscriberEntry, ctx: &DataContext) -> bool {
        let outcome = match entry.filter.matches(ctx).await {
            Ok(false) => return false,
            Ok(true) => try_join_all(entry.providers.iter().map(|provider| provider.provide(ctx))).await,
            Err(e) => Err(e),
        };

        // Detached while this tick was in flight.
        if !self.is_subscribed(id) {
            return false;
        }

        match outcome {
            Ok(fragments) => {
                let mut payload = Payload::new();
                for fragment in fragments {
                    merge_payload(&mut payload, fragment);
                }
                entry.observer.next(payload);
                true
            }
            Err(e) => {
                tracing::debug!(subscription = %id, tick = ctx.tick(), error = %e, "subscriber evaluation failed");
                entry.observer.error(e);
                false
            }
        }
    }
}

/// Drives ticks and owns the subscriber table.
///
/// Cloning is cheap; clones share the same factory and subscribers.
#[derive(Clone)]
pub struct ObserverMediator {
    inner: Arc<MediatorInner>,
}

impl ObserverMediator {
    pub fn new(factory: CollectorFactory) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(MediatorInner {
                factory,
                subscribers: Mutex::new(HashMap::new()),
                shutdown,
            }),
        }
    }

    pub fn factory(&self) -> &CollectorFactory {
        &self.inner.factory
    }

    /// Attaches a subscriber.
    ///
    /// Registers the union of the classifiers the filter and providers need.
    ///
    /// # Errors
    ///
    /// Returns a configuration error (`UnsupportedClassifier` or
    /// `CircularDependency`) if any of them cannot be registered. In that case
    /// no subscription is created and no count changes.
    pub fn subscribe(
        &self,
        filter: impl Filter + 'static,
        providers: Vec<Box<dyn Provider>>,
        observer: Arc<dyn Observer>,
    ) -> Result<Subscription, EngineError> {
        let id = self.inner.subscribe(Box::new(filter), providers, observer)?;
        Ok(Subscription {
            id,
            mediator: Arc::downgrade(&self.inner),
        })
    }

    /// Detaches a subscriber, releases its classifiers and signals
    /// `complete`. Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<bool, EngineError> {
        self.inner.unsubscribe(id)
    }

    /// Detaches every subscriber. Returns how many were detached.
    pub fn unsubscribe_all(&self) -> Result<usize, EngineError> {
        let ids: Vec<SubscriptionId> = self.inner.snapshot().into_iter().map(|(id, _)| id).collect();
        let mut detached = 0;
        let mut outcome = Ok(());
        for id in ids {
            match self.inner.unsubscribe(id) {
                Ok(true) => detached += 1,
                Ok(false) => {}
                Err(e) => {
                    detached += 1;
                    outcome = Err(e);
                }
            }
        }
        outcome.map(|()| detached)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Runs one tick.
    pub async fn notify(&self) -> TickControl {
        let factory = &self.inner.factory;
        if let Err(e) = factory.pre_notify() {
            tracing::error!(factory = factory.name(), error = %e, "pre-notify hook failed");
        }

        let ctx = factory.collect();
        let entries = self.inner.snapshot();
        let delivered = join_all(
            entries
                .iter()
                .map(|(id, entry)| self.inner.evaluate(*id, entry, &ctx)),
        )
        .await
        .into_iter()
        .filter(|delivered| *delivered)
        .count();

        tracing::debug!(
            tick = ctx.tick(),
            subscribers = entries.len(),
            delivered,
            timings = ?ctx.timings(),
            "tick evaluated"
        );

        match factory.post_notify(&ctx).await {
            Ok(control) => control,
            Err(e) => {
                tracing::warn!(tick = ctx.tick(), error = %e, "post-notify hook failed, continuing");
                TickControl::Continue
            }
        }
    }

    /// Ticks every `interval` until the factory's policy stops or
    /// [`ObserverMediator::shutdown`] is called. A zero interval ticks back
    /// to back, yielding in between.
    pub async fn run(&self, interval: Duration) {
        let mut shutdown = self.inner.shutdown.subscribe();
        tracing::info!(
            factory = self.inner.factory.name(),
            interval_ms = interval.as_millis() as u64,
            "starting tick loop"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            if self.notify().await == TickControl::Stop {
                tracing::info!(factory = self.inner.factory.name(), "tick policy stopped the loop");
                break;
            }
            if interval.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        tracing::info!(factory = self.inner.factory.name(), "tick loop finished");
    }

    /// Stops scheduling ticks and detaches every subscriber.
    ///
    /// Fetches already in flight for the current tick are left to finish.
    pub fn shutdown(&self) -> Result<usize, EngineError> {
        self.inner.shutdown.send_replace(true);
        self.unsubscribe_all()
    }

    pub fn is_shut_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }
}

/// Handle returned by [`ObserverMediator::subscribe`].
///
/// Dropping the handle leaves the subscription in place.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    mediator: Weak<MediatorInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Detaches the subscriber and triggers its `complete`.
    pub fn unsubscribe(self) -> Result<bool, EngineError> {
        match self.mediator.upgrade() {
            Some(mediator) => mediator.unsubscribe(self.id),
            None => Ok(false),
        }
    }
}
