//! In-process store implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use super::{DueTimer, TimerStore};
use crate::error::Result;

/// In-process [`TimerStore`] for tests and local development.
///
/// Clones share the same underlying state, so several engines constructed
/// from clones of one `MemoryStore` behave like workers sharing a store,
/// which makes lease contention testable without a server.
///
/// Lock TTLs are measured with `tokio::time::Instant` and enforced lazily on
/// access, so tests running under `tokio::time::pause` can advance the clock
/// past a lease instead of sleeping.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    /// member → deadline in epoch ms.
    timeline: HashMap<String, i64>,
    /// member → payload bytes.
    payloads: HashMap<String, Vec<u8>>,
    /// lock key → holder.
    locks: HashMap<String, LockEntry>,
}

#[derive(Debug)]
struct LockEntry {
    token: String,
    expires_at: Instant,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop only the payload half of an entry, leaving the timeline member
    /// behind. Simulates an orphaned entry for dispatch tests.
    #[cfg(test)]
    pub(crate) fn drop_payload(&self, member: &str) {
        self.inner.lock().unwrap().payloads.remove(member);
    }
}

impl Inner {
    fn purge_expired_lock(&mut self, key: &str, now: Instant) {
        if let Some(entry) = self.locks.get(key) {
            if entry.expires_at <= now {
                self.locks.remove(key);
            }
        }
    }
}

impl TimerStore for MemoryStore {
    async fn add_timer(&self, member: &str, deadline_ms: i64, payload: Vec<u8>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.timeline.insert(member.to_string(), deadline_ms);
        inner.payloads.insert(member.to_string(), payload);
        Ok(())
    }

    async fn remove_timer(&self, member: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let existed = inner.timeline.remove(member).is_some();
        inner.payloads.remove(member);
        Ok(existed)
    }

    async fn due_timers(&self, now_ms: i64, limit: usize) -> Result<Vec<DueTimer>> {
        let inner = self.inner.lock().unwrap();
        let mut due: Vec<DueTimer> = inner
            .timeline
            .iter()
            .filter(|(_, &deadline)| deadline <= now_ms)
            .map(|(member, &deadline_ms)| DueTimer {
                member: member.clone(),
                deadline_ms,
            })
            .collect();
        due.sort_by(|a, b| (a.deadline_ms, &a.member).cmp(&(b.deadline_ms, &b.member)));
        due.truncate(limit);
        Ok(due)
    }

    async fn fetch_payload(&self, member: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.lock().unwrap().payloads.get(member).cloned())
    }

    async fn acquire_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        inner.purge_expired_lock(key, now);
        if inner.locks.contains_key(key) {
            return Ok(false);
        }
        inner.locks.insert(
            key.to_string(),
            LockEntry {
                token: token.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<bool> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        inner.purge_expired_lock(key, now);
        match inner.locks.get(key) {
            Some(entry) if entry.token == token => {
                inner.locks.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn all_timers(&self) -> Result<(Vec<String>, HashMap<String, Vec<u8>>)> {
        let inner = self.inner.lock().unwrap();
        let mut entries: Vec<(&String, &i64)> = inner.timeline.iter().collect();
        entries.sort_by(|a, b| (a.1, a.0).cmp(&(b.1, b.0)));
        let members = entries.into_iter().map(|(member, _)| member.clone()).collect();
        Ok((members, inner.payloads.clone()))
    }
}
