//! Redis store implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use super::{DueTimer, TimerStore};
use crate::error::Result;
use crate::runtime::RuntimeConfig;

/// Atomic compare-and-delete: drop the lock key only while it still holds
/// this holder's fencing token.
const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Atomic multi-remove across the timeline and the payload map.
const REMOVE_TIMER_SCRIPT: &str = r#"
local removed = redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
return removed
"#;

/// Redis-backed store for production use.
///
/// The timeline is a sorted set scored by deadline milliseconds and the
/// payload map is a hash; both keys come from [`RuntimeConfig`]. Writes that
/// must touch both run as `MULTI`/`EXEC` pipelines, and the two operations
/// that need read-check-write semantics (lock release, timer removal) run as
/// Lua scripts, so no observer can see the timeline and the payload map
/// disagree.
///
/// Cloning shares the underlying multiplexed connection, which reconnects
/// on its own after network failures.
///
/// # Example
///
/// ```ignore
/// use tickline::{RedisStore, RuntimeConfig, TimerEngine};
///
/// let config = RuntimeConfig::default();
/// let store = RedisStore::connect("redis://127.0.0.1/", &config).await?;
/// let engine = TimerEngine::builder(store).include_router(router).build()?;
/// ```
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    timeline_key: String,
    payloads_key: String,
    release_script: Arc<Script>,
    remove_script: Arc<Script>,
}

impl RedisStore {
    /// Build a store on an existing connection manager, taking the timeline
    /// and payload key names from `config`.
    pub fn new(conn: ConnectionManager, config: &RuntimeConfig) -> Self {
        Self {
            conn,
            timeline_key: config.timeline_key.clone(),
            payloads_key: config.payloads_key.clone(),
            release_script: Arc::new(Script::new(RELEASE_LOCK_SCRIPT)),
            remove_script: Arc::new(Script::new(REMOVE_TIMER_SCRIPT)),
        }
    }

    /// Connect to a Redis URL and build a store.
    pub async fn connect(url: &str, config: &RuntimeConfig) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, config))
    }
}

impl TimerStore for RedisStore {
    async fn add_timer(&self, member: &str, deadline_ms: i64, payload: Vec<u8>) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .zadd(&self.timeline_key, member, deadline_ms)
            .ignore()
            .hset(&self.payloads_key, member, payload)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn remove_timer(&self, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .remove_script
            .key(&self.timeline_key)
            .key(&self.payloads_key)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn due_timers(&self, now_ms: i64, limit: usize) -> Result<Vec<DueTimer>> {
        let mut conn = self.conn.clone();
        let members: Vec<(String, i64)> = redis::cmd("ZRANGEBYSCORE")
            .arg(&self.timeline_key)
            .arg(0)
            .arg(now_ms)
            .arg("WITHSCORES")
            .arg("LIMIT")
            .arg(0)
            .arg(limit as i64)
            .query_async(&mut conn)
            .await?;
        Ok(members
            .into_iter()
            .map(|(member, deadline_ms)| DueTimer {
                member,
                deadline_ms,
            })
            .collect())
    }

    async fn fetch_payload(&self, member: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let payload: Option<Vec<u8>> = conn.hget(&self.payloads_key, member).await?;
        Ok(payload)
    }

    async fn acquire_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let created: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(created.is_some())
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release_script
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn all_timers(&self) -> Result<(Vec<String>, HashMap<String, Vec<u8>>)> {
        let mut conn = self.conn.clone();
        // One transaction so the two reads describe the same instant.
        let (members, payloads): (Vec<String>, HashMap<String, Vec<u8>>) = redis::pipe()
            .atomic()
            .zrange(&self.timeline_key, 0, -1)
            .hgetall(&self.payloads_key)
            .query_async(&mut conn)
            .await?;
        Ok((members, payloads))
    }
}
