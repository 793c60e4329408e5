//! Classifier contract: the catalog every other component is keyed by.

use std::fmt;

/// Stable identity of a classifier.
///
/// Classifiers are compared by name, so two classifier types must never share
/// a [`Classifier::NAME`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassifierId(&'static str);

impl ClassifierId {
    /// Creates an identity from a classifier name.
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Returns the identity of classifier `C`.
    pub fn of<C: Classifier + ?Sized>() -> Self {
        Self(C::NAME)
    }

    /// Returns the classifier name.
    pub fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ClassifierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Compile-time description of one kind of derivable data.
///
/// A classifier has no runtime behavior. It names the shapes a backing
/// [`Collector`](crate::Collector) produces and consumes:
///
/// - `Data` is what `get` yields once per tick,
/// - `QueryOptions` / `QueryResult` describe one-off `query` lookups,
/// - `Store` is the cross-tick scratch state reachable through
///   [`DataContext::access_store`](crate::DataContext::access_store).
///
/// Shapes a classifier does not use are declared as `()`.
pub trait Classifier: Send + Sync + 'static {
    /// Stable classifier name, used in diagnostics and timing buckets.
    const NAME: &'static str;

    /// Shape of the data fetched once per tick.
    type Data: Send + Sync + 'static;

    /// Parameters accepted by a one-off query.
    type QueryOptions: Send + 'static;

    /// Result of a one-off query.
    type QueryResult: Send + 'static;

    /// Persistent scratch store surviving across ticks.
    type Store: Default + Send + 'static;

    /// Returns this classifier's identity.
    fn id() -> ClassifierId {
        ClassifierId::of::<Self>()
    }
}

/// Registration descriptor.
///
/// Either a bare classifier or a classifier narrowed to one parameter, such
/// as "accounts, for account `gtg`". The same descriptor must be used to
/// register and to unregister, since `options` is the reference-count key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassifierRef {
    pub classifier: ClassifierId,
    pub options: Option<String>,
}

impl ClassifierRef {
    /// Bare registration of classifier `C`.
    pub fn of<C: Classifier>() -> Self {
        Self {
            classifier: C::id(),
            options: None,
        }
    }

    /// Parameterized registration of classifier `C`.
    pub fn with<C: Classifier>(options: impl Into<String>) -> Self {
        Self {
            classifier: C::id(),
            options: Some(options.into()),
        }
    }
}

impl From<ClassifierId> for ClassifierRef {
    fn from(classifier: ClassifierId) -> Self {
        Self {
            classifier,
            options: None,
        }
    }
}

impl fmt::Display for ClassifierRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.options {
            Some(options) => write!(f, "{}({})", self.classifier, options),
            None => write!(f, "{}", self.classifier),
        }
    }
}
