//! Providers turn a tick's data into payload fragments for subscribers.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::classifier::ClassifierRef;
use crate::context::DataContext;
use crate::error::EngineError;

/// The JSON object delivered to a subscriber.
pub type Payload = Map<String, Value>;

/// Produces one payload fragment for a satisfied subscription.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn provide(&self, ctx: &DataContext) -> Result<Payload, EngineError>;

    /// Classifiers this provider reads.
    fn used_contexts(&self) -> Vec<ClassifierRef>;
}

/// Merges `fragment` into `payload`.
///
/// For a key present in both:
///
/// - arrays are concatenated,
/// - objects are merged one level deep, the fragment's inner keys winning,
/// - anything else is replaced by the fragment's value.
pub fn merge_payload(payload: &mut Payload, fragment: Payload) {
    for (key, incoming) in fragment {
        let Some(existing) = payload.get_mut(&key) else {
            payload.insert(key, incoming);
            continue;
        };
        match (existing, incoming) {
            (Value::Array(current), Value::Array(more)) => current.extend(more),
            (Value::Object(current), Value::Object(more)) => current.extend(more),
            (slot, incoming) => {
                tracing::debug!(key = %key, "payload key written by more than one provider, keeping the last");
                *slot = incoming;
            }
        }
    }
}
