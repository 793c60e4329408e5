//! Error types for the observation engine.

use std::fmt;
use std::sync::Arc;

use crate::classifier::ClassifierId;

/// The chain of classifiers walked while resolving a registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyPath(pub Vec<ClassifierId>);

impl DependencyPath {
    /// Returns `true` if `classifier` appears anywhere on the path.
    pub fn contains(&self, classifier: ClassifierId) -> bool {
        self.0.contains(&classifier)
    }
}

impl fmt::Display for DependencyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        for (i, classifier) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            f.write_str(classifier.name())?;
        }
        Ok(())
    }
}

/// Errors raised by the observation engine.
///
/// `EngineError` is `Clone` because a single collector fetch is shared by
/// every filter and provider that awaits it within a tick.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// No collector is bound to the requested classifier.
    #[error("{requester} does not support classifier {classifier} (origin: {origin}, path: {path})")]
    UnsupportedClassifier {
        requester: String,
        classifier: ClassifierId,
        origin: String,
        path: DependencyPath,
    },

    /// Declared collector dependencies form a cycle.
    #[error("{factory}: circular dependency on {classifier} registered by {origin} (path: {path})")]
    CircularDependency {
        factory: String,
        classifier: ClassifierId,
        origin: String,
        path: DependencyPath,
    },

    /// Two collectors claim the same classifier.
    #[error("{factory}: classifier {classifier} is backed by both {existing} and {duplicate}")]
    DuplicateCollector {
        factory: String,
        classifier: ClassifierId,
        existing: &'static str,
        duplicate: &'static str,
    },

    /// The collector has no per-tick fetch.
    #[error("collector {collector} does not implement get")]
    GetNotImplemented { collector: &'static str },

    /// The collector has no one-off query for this classifier.
    #[error("collector {collector} does not implement query for {classifier}")]
    QueryNotImplemented {
        collector: &'static str,
        classifier: ClassifierId,
    },

    /// A collector produced nothing of the declared type for a classifier.
    #[error("collector {collector} returned no {classifier} data of the declared type")]
    MissingData {
        collector: &'static str,
        classifier: ClassifierId,
    },

    /// Query options did not match the classifier's declared option type.
    #[error("invalid query options for {classifier}")]
    InvalidQueryOptions { classifier: ClassifierId },

    /// An upstream fetch failed.
    #[error("fetch failed for {classifier}: {message}")]
    Fetch {
        classifier: ClassifierId,
        message: String,
    },

    /// The task driving a collector fetch panicked or was cancelled.
    #[error("collector task for {classifier} did not complete: {message}")]
    TaskFailed {
        classifier: ClassifierId,
        message: String,
    },

    /// A filter failed for a reason of its own.
    #[error("filter {filter} failed: {message}")]
    Filter { filter: String, message: String },

    /// A payload fragment could not be serialized.
    #[error("payload serialization error: {0}")]
    Serialization(Arc<serde_json::Error>),
}

impl EngineError {
    /// Wraps an upstream failure for `classifier`.
    pub fn fetch(classifier: ClassifierId, err: impl fmt::Display) -> Self {
        Self::Fetch {
            classifier,
            message: err.to_string(),
        }
    }

    /// Returns `true` for errors that indicate a wiring mistake rather than a
    /// runtime condition.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedClassifier { .. }
                | Self::CircularDependency { .. }
                | Self::DuplicateCollector { .. }
        )
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(Arc::new(err))
    }
}
