//! Storage abstraction for the timeline, payload map, and locks.
//!
//! This module provides the [`TimerStore`] trait that abstracts over
//! different storage backends. Two implementations are provided:
//!
//! - [`MemoryStore`] — in-process store for tests and local development
//! - [`RedisStore`] — Redis storage for production (requires `redis` feature)

mod memory;
#[cfg(feature = "redis")]
mod redis;

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis::RedisStore;

use crate::error::Result;

/// A due timeline member with its deadline score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueTimer {
    /// The compound `topic ⊕ separator ⊕ timer_id` member.
    pub member: String,
    /// The deadline the member was scheduled for, in epoch milliseconds.
    pub deadline_ms: i64,
}

/// Storage backend for scheduled timers.
///
/// The store holds two structures that must stay consistent: an ordered set
/// (*timeline*) whose members are compound timer keys scored by deadline, and
/// a hash (*payload map*) from the same keys to serialized payload bytes.
/// [`add_timer`](Self::add_timer) and [`remove_timer`](Self::remove_timer)
/// MUST touch both in a single atomic operation so that no observer can see a
/// member in one structure but not the other.
///
/// Lock keys are plain store keys with TTLs; [`acquire_lock`](Self::acquire_lock)
/// is an exclusive create and [`release_lock`](Self::release_lock) is an
/// atomic compare-and-delete on the holder's fencing token, so a holder whose
/// TTL already expired cannot delete a lock someone else now owns.
///
/// # Implementations
///
/// - [`MemoryStore`] — single-process, for tests and local development
/// - [`RedisStore`] — Redis with Lua-scripted atomic operations (requires
///   `redis` feature)
pub trait TimerStore: Send + Sync + Clone + 'static {
    /// Write a timer: timeline member + payload bytes, atomically.
    ///
    /// Overwrites any existing entry under the same member (both the score
    /// and the bytes).
    fn add_timer(
        &self,
        member: &str,
        deadline_ms: i64,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Delete a timer from the timeline and the payload map, atomically.
    ///
    /// Returns `true` if the member existed in the timeline. Deleting a
    /// nonexistent timer is a no-op, not an error.
    fn remove_timer(&self, member: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Fetch members with deadline in `[0, now_ms]`, ascending by deadline,
    /// at most `limit`.
    fn due_timers(
        &self,
        now_ms: i64,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<DueTimer>>> + Send;

    /// Fetch the payload bytes for a member, if present.
    fn fetch_payload(&self, member: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Exclusive-create a lock key holding `token`, expiring after `ttl`.
    ///
    /// Returns `false` without side effects when the key already exists.
    fn acquire_lock(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Delete a lock key iff it still holds `token` (compare-and-delete).
    ///
    /// Returns `true` if the lock was deleted, `false` if it had already
    /// expired or is now held by someone else.
    fn release_lock(&self, key: &str, token: &str)
        -> impl Future<Output = Result<bool>> + Send;

    /// Diagnostic dump: all timeline members ordered by deadline, plus the
    /// full payload map.
    fn all_timers(
        &self,
    ) -> impl Future<Output = Result<(Vec<String>, HashMap<String, Vec<u8>>)>> + Send;
}
