//! Dependency graph of collectors.
//!
//! The factory owns every collector for the lifetime of the process. Pushing
//! a [`ClassifierRef`] registers it with its collector and then walks the
//! collector's own [`Collector::used_contexts`], so a subscription on
//! "operations" transitively keeps "head" alive. Popping walks the same edges
//! and releases them.
//!
//! Each walk threads the current path. Every recursive branch gets its own
//! copy of that path, so two siblings requiring the same classifier at the
//! same depth are not mistaken for a cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::classifier::{ClassifierId, ClassifierRef};
use crate::collector::Collector;
use crate::context::{DataContext, StoreRegistry};
use crate::error::{DependencyPath, EngineError};
use crate::policy::{ContinuousPolicy, TickControl, TickPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Walk {
    Validate,
    Register,
    Unregister,
}

/// Builder for [`CollectorFactory`].
pub struct FactoryBuilder {
    name: String,
    collectors: Vec<Arc<dyn Collector>>,
    policy: Box<dyn TickPolicy>,
}

impl FactoryBuilder {
    /// Binds a collector to every classifier it backs.
    pub fn with_collector(mut self, collector: impl Collector + 'static) -> Self {
        self.collectors.push(Arc::new(collector));
        self
    }

    /// Binds an already shared collector.
    pub fn with_shared_collector(mut self, collector: Arc<dyn Collector>) -> Self {
        self.collectors.push(collector);
        self
    }

    /// Replaces the default [`ContinuousPolicy`].
    pub fn with_policy(mut self, policy: impl TickPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Builds the factory.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::DuplicateCollector` if two collectors claim the
    /// same classifier.
    pub fn build(self) -> Result<CollectorFactory, EngineError> {
        let mut bindings: HashMap<ClassifierId, Arc<dyn Collector>> = HashMap::new();
        for collector in &self.collectors {
            for classifier in collector.classifiers() {
                if let Some(existing) = bindings.get(&classifier) {
                    return Err(EngineError::DuplicateCollector {
                        factory: self.name,
                        classifier,
                        existing: existing.name(),
                        duplicate: collector.name(),
                    });
                }
                bindings.insert(classifier, Arc::clone(collector));
            }
        }

        tracing::debug!(
            factory = %self.name,
            collectors = self.collectors.len(),
            classifiers = bindings.len(),
            "built collector factory"
        );

        Ok(CollectorFactory {
            name: self.name,
            bindings,
            stores: Arc::new(StoreRegistry::default()),
            policy: self.policy,
            ticks: AtomicU64::new(0),
        })
    }
}

/// Owns all collectors and decides which of them are active each tick.
pub struct CollectorFactory {
    name: String,
    bindings: HashMap<ClassifierId, Arc<dyn Collector>>,
    stores: Arc<StoreRegistry>,
    policy: Box<dyn TickPolicy>,
    ticks: AtomicU64,
}

impl CollectorFactory {
    pub fn builder(name: impl Into<String>) -> FactoryBuilder {
        FactoryBuilder {
            name: name.into(),
            collectors: Vec::new(),
            policy: Box::new(ContinuousPolicy),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The collector bound to `classifier`, if any.
    pub fn collector(&self, classifier: ClassifierId) -> Option<&Arc<dyn Collector>> {
        self.bindings.get(&classifier)
    }

    /// Registers `reference` and, transitively, everything its collector
    /// depends on.
    ///
    /// The whole walk is validated before any count changes, so a failed
    /// push leaves every collector untouched.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnsupportedClassifier` if a classifier on the
    /// walk has no collector, or `EngineError::CircularDependency` if the walk
    /// revisits a classifier already on its path.
    pub fn push_classifier(&self, reference: &ClassifierRef, origin: &str) -> Result<(), EngineError> {
        self.walk(reference, origin, &[], Walk::Validate)?;
        self.walk(reference, origin, &[], Walk::Register)
    }

    /// Releases a registration made by [`CollectorFactory::push_classifier`].
    ///
    /// Must be called with the same reference, options included, that was
    /// pushed.
    pub fn pop_classifier(&self, reference: &ClassifierRef, origin: &str) -> Result<(), EngineError> {
        self.walk(reference, origin, &[], Walk::Validate)?;
        self.walk(reference, origin, &[], Walk::Unregister)
    }

    /// Checks that `reference` could be pushed without changing any count.
    pub fn validate(&self, reference: &ClassifierRef, origin: &str) -> Result<(), EngineError> {
        self.walk(reference, origin, &[], Walk::Validate)
    }

    fn walk(
        &self,
        reference: &ClassifierRef,
        origin: &str,
        stack: &[ClassifierId],
        mode: Walk,
    ) -> Result<(), EngineError> {
        let classifier = reference.classifier;
        let mut path = stack.to_vec();
        path.push(classifier);

        if stack.contains(&classifier) {
            return Err(EngineError::CircularDependency {
                factory: self.name.clone(),
                classifier,
                origin: origin.to_string(),
                path: DependencyPath(path),
            });
        }

        let collector = self
            .bindings
            .get(&classifier)
            .ok_or_else(|| EngineError::UnsupportedClassifier {
                requester: self.name.clone(),
                classifier,
                origin: origin.to_string(),
                path: DependencyPath(path.clone()),
            })?;

        match mode {
            Walk::Validate => {}
            Walk::Register => {
                collector.register(reference.options.as_deref());
                tracing::debug!(factory = %self.name, classifier = %reference, origin, "pushed classifier");
            }
            Walk::Unregister => {
                collector.unregister(reference.options.as_deref());
                tracing::debug!(factory = %self.name, classifier = %reference, origin, "popped classifier");
            }
        }

        for dependency in collector.used_contexts() {
            self.walk(&dependency, origin, &path, mode)?;
        }
        Ok(())
    }

    /// Builds the context for a new tick.
    ///
    /// Only collectors holding at least one registration are bound; idle
    /// collectors are left out and never fetch.
    pub fn collect(&self) -> DataContext {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let active: HashMap<ClassifierId, Arc<dyn Collector>> = self
            .bindings
            .iter()
            .filter(|(_, collector)| collector.has_registered())
            .map(|(classifier, collector)| (*classifier, Arc::clone(collector)))
            .collect();

        tracing::trace!(
            factory = %self.name,
            tick,
            active = active.len(),
            idle = self.bindings.len() - active.len(),
            "collected active classifiers"
        );

        DataContext::new(tick, self.name.clone(), active, Arc::clone(&self.stores))
    }

    /// Number of contexts built so far.
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Number of persistent stores created so far.
    pub fn store_count(&self) -> usize {
        self.stores.len()
    }

    /// Runs the policy hook before a tick's context is built.
    pub fn pre_notify(&self) -> Result<(), EngineError> {
        self.policy.pre_notify(self)
    }

    /// Runs the policy hook after every subscriber of a tick has settled.
    pub async fn post_notify(&self, ctx: &DataContext) -> Result<TickControl, EngineError> {
        self.policy.post_notify(ctx).await
    }
}

impl std::fmt::Debug for CollectorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut classifiers: Vec<_> = self.bindings.keys().collect();
        classifiers.sort();
        f.debug_struct("CollectorFactory")
            .field("name", &self.name)
            .field("classifiers", &classifiers)
            .field("ticks", &self.tick_count())
            .finish()
    }
}
