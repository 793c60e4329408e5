//! Collector contract and reference-counted registration tables.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::classifier::{Classifier, ClassifierId, ClassifierRef};
use crate::context::DataContext;
use crate::error::EngineError;

/// Type-erased query options handed to [`Collector::query`].
pub type QueryOptions = Box<dyn Any + Send>;

/// Type-erased query result returned by [`Collector::query`].
pub type QueryOutput = Box<dyn Any + Send>;

/// Recovers the typed options of classifier `C` from [`QueryOptions`].
pub fn downcast_options<C: Classifier>(options: QueryOptions) -> Result<C::QueryOptions, EngineError> {
    options
        .downcast::<C::QueryOptions>()
        .map(|options| *options)
        .map_err(|_| EngineError::InvalidQueryOptions {
            classifier: C::id(),
        })
}

/// The result of one collector `get`: one slice per classifier it backs.
#[derive(Default)]
pub struct Collected {
    slices: HashMap<ClassifierId, Arc<dyn Any + Send + Sync>>,
}

impl Collected {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the slice for classifier `C`, replacing any earlier one.
    pub fn insert<C: Classifier>(&mut self, data: C::Data) -> &mut Self {
        self.slices.insert(C::id(), Arc::new(data));
        self
    }

    /// Builder form of [`Collected::insert`].
    pub fn with<C: Classifier>(mut self, data: C::Data) -> Self {
        self.insert::<C>(data);
        self
    }

    /// Returns the slice for classifier `C` if present with the declared type.
    pub fn slice<C: Classifier>(&self) -> Option<Arc<C::Data>> {
        let slice = Arc::clone(self.slices.get(&C::id())?);
        slice.downcast::<C::Data>().ok()
    }
}

impl std::fmt::Debug for Collected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collected")
            .field("classifiers", &self.slices.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Reference-count table keyed by parameter.
///
/// Entries are removed when their count reaches zero so that a key nobody
/// watches any more drops out of [`RefCountTable::keys`] immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefCountTable<K: Ord> {
    counts: BTreeMap<K, usize>,
}

impl<K: Ord> Default for RefCountTable<K> {
    fn default() -> Self {
        Self {
            counts: BTreeMap::new(),
        }
    }
}

impl<K: Ord> RefCountTable<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the count for `key` and returns the new count.
    pub fn add(&mut self, key: K) -> usize {
        let count = self.counts.entry(key).or_insert(0);
        *count += 1;
        *count
    }

    /// Decrements the count for `key`, removing it at zero.
    ///
    /// Returns the remaining count, or `None` if `key` was not tracked.
    pub fn remove(&mut self, key: &K) -> Option<usize> {
        let count = self.counts.get_mut(key)?;
        *count -= 1;
        let remaining = *count;
        if remaining == 0 {
            self.counts.remove(key);
        }
        Some(remaining)
    }

    pub fn count(&self, key: &K) -> usize {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.counts.contains_key(key)
    }

    /// Tracked keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.counts.keys()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

#[derive(Debug, Default)]
struct RegistrationState {
    bare: usize,
    params: RefCountTable<String>,
}

/// Registration bookkeeping embedded in every collector.
///
/// Bare registrations (no options) and parameterized registrations are
/// counted separately. Mutation is synchronous and never spans an await.
#[derive(Debug, Default)]
pub struct Registrations {
    state: Mutex<RegistrationState>,
}

impl Registrations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, options: Option<&str>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match options {
            Some(key) => {
                let count = state.params.add(key.to_string());
                tracing::trace!(param = key, count, "registered parameter");
            }
            None => state.bare += 1,
        }
    }

    /// Releases one registration. Releasing something never registered is a
    /// no-op, so counts never go negative.
    pub fn unregister(&self, options: Option<&str>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match options {
            Some(key) => match state.params.remove(&key.to_string()) {
                Some(remaining) => {
                    tracing::trace!(param = key, remaining, "unregistered parameter")
                }
                None => tracing::warn!(param = key, "unregister of untracked parameter ignored"),
            },
            None if state.bare > 0 => state.bare -= 1,
            None => tracing::warn!("unregister of untracked bare registration ignored"),
        }
    }

    /// `true` while any registration, bare or parameterized, is held.
    pub fn has_registered(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.bare > 0 || !state.params.is_empty()
    }

    /// Snapshot of the parameters currently tracked, in ascending order.
    pub fn params(&self) -> Vec<String> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.params.keys().cloned().collect()
    }

    /// Current count for one parameter.
    pub fn param_count(&self, key: &str) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.params.count(&key.to_string())
    }

    pub fn bare_count(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).bare
    }
}

/// A stateful fetch unit backing one or more classifiers.
///
/// Collectors are created once with their factory and live as long as it
/// does. The factory only binds a collector into a tick's [`DataContext`]
/// while [`Collector::has_registered`] holds, so an idle collector never
/// fetches.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Collector name for diagnostics.
    fn name(&self) -> &'static str;

    /// Classifiers whose data this collector produces.
    fn classifiers(&self) -> Vec<ClassifierId>;

    /// The collector's reference-count table.
    fn registrations(&self) -> &Registrations;

    /// Classifiers this collector itself reads from the context.
    fn used_contexts(&self) -> Vec<ClassifierRef> {
        Vec::new()
    }

    fn register(&self, options: Option<&str>) {
        self.registrations().register(options);
    }

    fn unregister(&self, options: Option<&str>) {
        self.registrations().unregister(options);
    }

    fn has_registered(&self) -> bool {
        self.registrations().has_registered()
    }

    /// Fetches one slice per backed classifier, using the parameters that
    /// are currently registered. Runs at most once per tick.
    async fn get(&self, _ctx: &DataContext) -> Result<Collected, EngineError> {
        Err(EngineError::GetNotImplemented {
            collector: self.name(),
        })
    }

    /// One-off parameterized fetch. Never cached.
    async fn query(
        &self,
        _ctx: &DataContext,
        classifier: ClassifierId,
        _options: QueryOptions,
    ) -> Result<QueryOutput, EngineError> {
        Err(EngineError::QueryNotImplemented {
            collector: self.name(),
            classifier,
        })
    }
}
