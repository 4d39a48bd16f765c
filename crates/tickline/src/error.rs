//! Error types for tickline.

use thiserror::Error;

/// A `Result` alias with [`enum@Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tickline operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A topic or timer id was empty or contained the configured separator.
    ///
    /// Compound keys must split back into their components, so the separator
    /// is forbidden inside both parts.
    #[error("invalid {field}: {value:?} must be non-empty and must not contain {separator:?}")]
    InvalidIdentifier {
        /// Which identifier was rejected (`"topic"` or `"timer_id"`).
        field: &'static str,
        /// The rejected value.
        value: String,
        /// The configured separator.
        separator: String,
    },

    /// The per-timer write lock could not be acquired within the configured
    /// timeout. Another writer is holding it, or the store is unreachable.
    #[error("timed out acquiring lock {key} after {waited_ms} ms")]
    LockAcquisitionTimeout {
        /// The store key of the contended lock.
        key: String,
        /// How long the caller waited before giving up.
        waited_ms: u64,
    },

    /// Failed to serialize a payload on the write path.
    #[error("failed to encode payload for topic {topic:?}: {source}")]
    Encode {
        /// The topic the payload was scheduled under.
        topic: String,
        /// The underlying serialization error.
        #[source]
        source: serde_json::Error,
    },

    /// Stored payload bytes are not parseable at all (malformed JSON).
    ///
    /// Not retried: the bytes will not get better. The entry is left in the
    /// store for the operator.
    #[error("failed to parse payload for timer {key}: {source}")]
    PayloadDecode {
        /// The compound timer key.
        key: String,
        /// The underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },

    /// Stored payload parsed as JSON but does not match the handler's
    /// declared payload schema. Not retried.
    #[error("payload for timer {key} does not match the handler schema: {source}")]
    PayloadValidation {
        /// The compound timer key.
        key: String,
        /// The underlying validation error.
        #[source]
        source: serde_json::Error,
    },

    /// No handler is registered for the topic.
    #[error("handler is not found, topic={topic:?}")]
    HandlerNotFound {
        /// The unroutable topic.
        topic: String,
    },

    /// A handler returned an error. The timer stays in the store and is
    /// retried on a later poll once its consume lease expires or is released.
    #[error("handler for timer {key} failed: {message}")]
    HandlerFailure {
        /// The compound timer key.
        key: String,
        /// The handler error, rendered with `Display`.
        message: String,
    },

    /// The same topic was registered more than once.
    #[error("duplicate handler registration for topic {0:?}")]
    DuplicateHandler(String),

    /// A timeline member does not contain the separator and cannot be split
    /// back into `(topic, timer_id)`.
    #[error("corrupted timeline member {member:?}: separator {separator:?} not found")]
    CorruptKey {
        /// The unsplittable member string.
        member: String,
        /// The separator that was expected.
        separator: String,
    },

    /// Redis storage error.
    ///
    /// Preserves the full `redis::RedisError` for matching on specific
    /// conditions (connection refused, script errors, etc.).
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl Error {
    /// Create an identifier validation error.
    pub(crate) fn invalid_identifier(
        field: &'static str,
        value: impl Into<String>,
        separator: impl Into<String>,
    ) -> Self {
        Error::InvalidIdentifier {
            field,
            value: value.into(),
            separator: separator.into(),
        }
    }

    /// Classify a `serde_json` read error for the compound key `key`.
    ///
    /// Syntax and EOF errors mean the stored bytes are not JSON at all;
    /// data errors mean well-formed JSON that fails the handler's schema.
    pub(crate) fn classify_decode(key: impl Into<String>, source: serde_json::Error) -> Self {
        match source.classify() {
            serde_json::error::Category::Data => Error::PayloadValidation {
                key: key.into(),
                source,
            },
            _ => Error::PayloadDecode {
                key: key.into(),
                source,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_classification() {
        let syntax = serde_json::from_slice::<serde_json::Value>(b"not json").unwrap_err();
        assert!(matches!(
            Error::classify_decode("a--b", syntax),
            Error::PayloadDecode { .. }
        ));

        #[derive(serde::Deserialize, Debug)]
        #[allow(dead_code)]
        struct Shaped {
            msg: String,
        }
        let data = serde_json::from_slice::<Shaped>(b"{}").unwrap_err();
        assert!(matches!(
            Error::classify_decode("a--b", data),
            Error::PayloadValidation { .. }
        ));
    }
}
