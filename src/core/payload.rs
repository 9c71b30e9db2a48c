//! Job payload and its canonical serialization.
//!
//! A payload names the handler to run (`class`) and carries its argument
//! bag. The encoded form is canonical: object keys are sorted at every
//! nesting level, so two payloads with the same content encode to the same
//! bytes regardless of insertion order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Argument bag passed to a handler: string keys, JSON-representable values.
pub type JobArgs = serde_json::Map<String, Value>;

/// Errors that can occur when encoding or decoding payloads.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The payload could not be serialized.
    #[error("failed to encode payload: {0}")]
    Encode(serde_json::Error),

    /// The stored payload is not valid.
    #[error("failed to decode payload: {0}")]
    Decode(serde_json::Error),
}

/// The serialized body of a queued job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Fully-qualified handler name.
    pub class: String,
    /// Argument bag handed to the handler on every invocation.
    pub args: JobArgs,
}

impl JobPayload {
    /// Create a payload for the named handler.
    pub fn new(class: impl Into<String>, args: JobArgs) -> Self {
        Self {
            class: class.into(),
            args,
        }
    }

    /// Encode to the canonical wire form.
    ///
    /// The encoding is bit-stable across backends: rehydrating it yields an
    /// identical handler name and argument bag.
    pub fn encode(&self) -> Result<String, PayloadError> {
        let value = serde_json::to_value(self).map_err(PayloadError::Encode)?;
        serde_json::to_string(&canonicalize(value)).map_err(PayloadError::Encode)
    }

    /// Decode from the wire form produced by [`encode`](Self::encode).
    pub fn decode(s: &str) -> Result<Self, PayloadError> {
        serde_json::from_str(s).map_err(PayloadError::Decode)
    }
}

/// Rebuild a value with object keys sorted at every level.
///
/// `serde_json`'s map ordering depends on crate features, so the canonical
/// form is enforced explicitly rather than assumed.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut sorted = serde_json::Map::new();
            for (key, val) in entries {
                sorted.insert(key, canonicalize(val));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
