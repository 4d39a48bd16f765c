//! Timer identity: the validated `(topic, timer_id)` pair and its compound key.
//!
//! A timer is addressed by the pair `(topic, timer_id)`. Inside the store the
//! pair is flattened into a single compound member `topic ⊕ separator ⊕
//! timer_id` so it can serve both as an ordered-set member and as a hash
//! field. Because the separator is forbidden inside both components, the
//! compound form is a bijection: [`TimerKey::split`] is the exact inverse of
//! [`TimerKey::join`] for every key this module will construct.

use time::OffsetDateTime;

use crate::error::{Error, Result};

/// Validated timer identity.
///
/// Both components are non-empty and free of the configured separator.
/// Construction is the only place identifier rules are checked; everything
/// downstream can join and split without re-validating.
///
/// # Example
///
/// ```
/// use tickline::TimerKey;
///
/// let key = TimerKey::new("ping", "t1", "--").unwrap();
/// assert_eq!(key.join("--"), "ping--t1");
///
/// let back = TimerKey::split("ping--t1", "--").unwrap();
/// assert_eq!(back.topic(), "ping");
/// assert_eq!(back.timer_id(), "t1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerKey {
    topic: String,
    timer_id: String,
}

impl TimerKey {
    /// Validate and construct a timer key.
    ///
    /// Fails with [`Error::InvalidIdentifier`] when either component is empty
    /// or contains `separator`.
    pub fn new(topic: &str, timer_id: &str, separator: &str) -> Result<Self> {
        if topic.is_empty() || topic.contains(separator) {
            return Err(Error::invalid_identifier("topic", topic, separator));
        }
        if timer_id.is_empty() || timer_id.contains(separator) {
            return Err(Error::invalid_identifier("timer_id", timer_id, separator));
        }
        Ok(Self {
            topic: topic.to_string(),
            timer_id: timer_id.to_string(),
        })
    }

    /// Split a compound store member back into its components.
    ///
    /// Splits on the *first* occurrence of `separator`. Members without the
    /// separator are corrupted store entries and fail with
    /// [`Error::CorruptKey`].
    pub fn split(member: &str, separator: &str) -> Result<Self> {
        let Some((topic, timer_id)) = member.split_once(separator) else {
            return Err(Error::CorruptKey {
                member: member.to_string(),
                separator: separator.to_string(),
            });
        };
        Ok(Self {
            topic: topic.to_string(),
            timer_id: timer_id.to_string(),
        })
    }

    /// The routing key selecting the handler.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The caller-chosen, unique-within-topic identifier.
    pub fn timer_id(&self) -> &str {
        &self.timer_id
    }

    /// The compound member used verbatim inside the store.
    pub fn join(&self, separator: &str) -> String {
        format!("{}{}{}", self.topic, separator, self.timer_id)
    }
}

impl std::fmt::Display for TimerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.topic, self.timer_id)
    }
}

/// Current wall-clock time as integer milliseconds since the epoch.
///
/// Deadlines and timeline scores use this unit everywhere.
pub(crate) fn now_ms() -> i64 {
    epoch_ms(OffsetDateTime::now_utc())
}

/// Convert a timestamp to epoch milliseconds.
pub(crate) fn epoch_ms(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Convert epoch milliseconds back to a timestamp.
pub(crate) fn from_epoch_ms(ms: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
