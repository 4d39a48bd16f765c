//! Distributed locks built on the store's exclusive-create primitive.
//!
//! Two lock flavors share one mechanism (a store key with a TTL holding a
//! per-holder fencing token) and differ only in acquisition discipline:
//!
//! - the **timer lock** (`lock:timer:<member>`) serializes scheduler writes
//!   to one timer; acquisition blocks with backoff up to a timeout
//! - the **consume lease** (`lock:consume:<member>`) claims a due timer for
//!   dispatch; acquisition is a single non-blocking attempt, and on handler
//!   success the lease is deliberately left to expire so a worker with a
//!   lagging view cannot re-dispatch a timer whose deletion it has not yet
//!   observed
//!
//! Release is an atomic compare-and-delete on the fencing token: a holder
//! whose TTL expired cannot delete the lock from the holder that replaced it.

use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::TimerStore;

/// Delay between acquisition attempts while blocking on the timer lock.
const ACQUIRE_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Store key of the write lock for a compound timer member.
pub fn timer_lock_key(member: &str) -> String {
    format!("lock:timer:{member}")
}

/// Store key of the consume lease for a compound timer member.
pub fn consume_lock_key(member: &str) -> String {
    format!("lock:consume:{member}")
}

/// A lock this process acquired and has not yet released.
///
/// Holds the fencing token proving ownership. There is no implicit release
/// on drop: every exit path of a protected region either calls
/// [`release`] or deliberately leaves the lock to expire.
#[derive(Debug)]
pub struct HeldLock {
    /// The store key of the lock.
    pub key: String,
    /// This holder's fencing token.
    pub token: String,
}

/// Acquire a lock, polling with backoff until `timeout` elapses.
///
/// Fails with [`Error::LockAcquisitionTimeout`] when the lock stays
/// contended for the whole window.
pub async fn acquire_blocking<S: TimerStore>(
    store: &S,
    key: String,
    ttl: Duration,
    timeout: Duration,
) -> Result<HeldLock> {
    let token = Uuid::new_v4().to_string();
    let deadline = Instant::now() + timeout;

    loop {
        if store.acquire_lock(&key, &token, ttl).await? {
            return Ok(HeldLock { key, token });
        }
        if Instant::now() + ACQUIRE_RETRY_INTERVAL > deadline {
            return Err(Error::LockAcquisitionTimeout {
                key,
                waited_ms: timeout.as_millis() as u64,
            });
        }
        tokio::time::sleep(ACQUIRE_RETRY_INTERVAL).await;
    }
}

/// Attempt a single non-blocking acquisition.
///
/// Returns `None` when another holder has the lock. This is the consume
/// lease discipline: a contended timer is simply someone else's to dispatch.
pub async fn acquire_once<S: TimerStore>(
    store: &S,
    key: String,
    ttl: Duration,
) -> Result<Option<HeldLock>> {
    let token = Uuid::new_v4().to_string();
    if store.acquire_lock(&key, &token, ttl).await? {
        Ok(Some(HeldLock { key, token }))
    } else {
        Ok(None)
    }
}

/// Release a held lock via compare-and-delete on its fencing token.
///
/// Returns `false` when the lock had already expired (and possibly been
/// re-acquired by someone else); that is not an error.
pub async fn release<S: TimerStore>(store: &S, lock: &HeldLock) -> Result<bool> {
    store.release_lock(&lock.key, &lock.token).await
}
