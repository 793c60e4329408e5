//! Per-tick data evaluation context.
//!
//! A [`DataContext`] is created by [`CollectorFactory::collect`] for exactly
//! one tick. It memoizes collector fetches by collector *instance*: when
//! several classifiers are backed by the same collector, the first `get` of
//! any of them starts the fetch and everybody else shares its result.
//!
//! Fetches run on their own task. A filter branch that is abandoned by a
//! composite short-circuit therefore never aborts the network calls it
//! started; they finish and their result stays cached for the rest of the
//! tick.
//!
//! [`CollectorFactory::collect`]: crate::CollectorFactory::collect

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, FutureExt, Shared};

use crate::classifier::{Classifier, ClassifierId};
use crate::collector::{Collected, Collector};
use crate::error::{DependencyPath, EngineError};

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<Collected>, EngineError>>>;

/// Persistent per-classifier scratch stores, owned by the factory.
#[derive(Default)]
pub(crate) struct StoreRegistry {
    stores: Mutex<HashMap<ClassifierId, Arc<dyn Any + Send + Sync>>>,
}

impl StoreRegistry {
    fn access<C: Classifier>(&self) -> Result<Arc<tokio::sync::Mutex<C::Store>>, EngineError> {
        let mut stores = self.stores.lock().unwrap_or_else(|e| e.into_inner());
        let store = stores
            .entry(C::id())
            .or_insert_with(|| {
                tracing::debug!(classifier = C::NAME, "created persistent store");
                let store: Arc<dyn Any + Send + Sync> =
                    Arc::new(tokio::sync::Mutex::new(C::Store::default()));
                store
            })
            .clone();
        store
            .downcast::<tokio::sync::Mutex<C::Store>>()
            .map_err(|_| EngineError::MissingData {
                collector: "store",
                classifier: C::id(),
            })
    }

    pub(crate) fn len(&self) -> usize {
        self.stores.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

struct ContextInner {
    tick: u64,
    requester: String,
    bindings: HashMap<ClassifierId, Arc<dyn Collector>>,
    fetches: Mutex<HashMap<usize, SharedFetch>>,
    timings: Mutex<BTreeMap<String, Duration>>,
    stores: Arc<StoreRegistry>,
}

/// Ephemeral per-tick broker between filters/providers and collectors.
///
/// Cloning is cheap; all clones share the same cache.
#[derive(Clone)]
pub struct DataContext {
    inner: Arc<ContextInner>,
}

fn collector_key(collector: &Arc<dyn Collector>) -> usize {
    Arc::as_ptr(collector) as *const () as usize
}

impl DataContext {
    pub(crate) fn new(
        tick: u64,
        requester: impl Into<String>,
        bindings: HashMap<ClassifierId, Arc<dyn Collector>>,
        stores: Arc<StoreRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                tick,
                requester: requester.into(),
                bindings,
                fetches: Mutex::new(HashMap::new()),
                timings: Mutex::new(BTreeMap::new()),
                stores,
            }),
        }
    }

    /// Sequence number of the tick this context belongs to.
    pub fn tick(&self) -> u64 {
        self.inner.tick
    }

    /// Returns `true` if classifier `C` has an active collector this tick.
    pub fn is_active<C: Classifier>(&self) -> bool {
        self.inner.bindings.contains_key(&C::id())
    }

    /// Classifiers bound in this context, in ascending order.
    pub fn active_classifiers(&self) -> Vec<ClassifierId> {
        let mut active: Vec<_> = self.inner.bindings.keys().copied().collect();
        active.sort();
        active
    }

    /// Number of collector fetches started so far this tick.
    pub fn fetch_count(&self) -> usize {
        self.inner.fetches.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn collector_for(&self, classifier: ClassifierId, origin: &str) -> Result<Arc<dyn Collector>, EngineError> {
        self.inner
            .bindings
            .get(&classifier)
            .cloned()
            .ok_or_else(|| EngineError::UnsupportedClassifier {
                requester: self.inner.requester.clone(),
                classifier,
                origin: origin.to_string(),
                path: DependencyPath(vec![classifier]),
            })
    }

    /// Returns this tick's data for classifier `C`.
    ///
    /// The backing collector's `get` runs at most once per tick; every
    /// caller, for any classifier that collector backs, shares that run.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnsupportedClassifier` if no active collector
    /// backs `C`, or whatever the collector's fetch failed with.
    pub async fn get<C: Classifier>(&self) -> Result<Arc<C::Data>, EngineError> {
        let classifier = C::id();
        let collector = self.collector_for(classifier, "get")?;
        let name = collector.name();
        let collected = self.fetch(classifier, collector).await?;
        collected
            .slice::<C>()
            .ok_or(EngineError::MissingData {
                collector: name,
                classifier,
            })
    }

    fn fetch(&self, classifier: ClassifierId, collector: Arc<dyn Collector>) -> SharedFetch {
        let key = collector_key(&collector);
        let mut fetches = self.inner.fetches.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(fetch) = fetches.get(&key) {
            tracing::trace!(classifier = %classifier, tick = self.inner.tick, "sharing collector fetch");
            return fetch.clone();
        }

        let ctx = self.clone();
        let task = tokio::spawn(async move {
            let started = Instant::now();
            let result = collector.get(&ctx).await;
            let elapsed = started.elapsed();
            ctx.add_timing(classifier.name(), elapsed);
            tracing::debug!(
                collector = collector.name(),
                classifier = %classifier,
                tick = ctx.tick(),
                elapsed_ms = elapsed.as_millis() as u64,
                ok = result.is_ok(),
                "collector fetch finished"
            );
            result.map(Arc::new)
        });

        let fetch = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(EngineError::TaskFailed {
                    classifier,
                    message: e.to_string(),
                }),
            }
        }
        .boxed()
        .shared();

        fetches.insert(key, fetch.clone());
        fetch
    }

    /// One-off parameterized lookup for classifier `C`.
    ///
    /// Always reaches the collector; neither served from nor stored in the
    /// per-tick `get` cache.
    pub async fn query<C: Classifier>(&self, options: C::QueryOptions) -> Result<C::QueryResult, EngineError> {
        let classifier = C::id();
        let collector = self.collector_for(classifier, "query")?;
        let started = Instant::now();
        let output = collector.query(self, classifier, Box::new(options)).await;
        self.add_timing(format!("{}.query", C::NAME), started.elapsed());
        output?
            .downcast::<C::QueryResult>()
            .map(|result| *result)
            .map_err(|_| EngineError::MissingData {
                collector: collector.name(),
                classifier,
            })
    }

    /// Persistent store for classifier `C`, created on first access.
    ///
    /// Unlike `get` data, the store survives across ticks. It is meant for
    /// values a filter has to remember between evaluations.
    pub fn access_store<C: Classifier>(&self) -> Result<Arc<tokio::sync::Mutex<C::Store>>, EngineError> {
        self.inner.stores.access::<C>()
    }

    /// Adds `elapsed` to the timing bucket `name`.
    pub fn add_timing(&self, name: impl Into<String>, elapsed: Duration) {
        let mut timings = self.inner.timings.lock().unwrap_or_else(|e| e.into_inner());
        *timings.entry(name.into()).or_default() += elapsed;
    }

    /// Snapshot of accumulated timings.
    pub fn timings(&self) -> BTreeMap<String, Duration> {
        self.inner.timings.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl std::fmt::Debug for DataContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataContext")
            .field("tick", &self.inner.tick)
            .field("requester", &self.inner.requester)
            .field("active", &self.active_classifiers())
            .finish()
    }
}
