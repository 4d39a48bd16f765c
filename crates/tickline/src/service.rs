//! Scheduler write path: admitting and cancelling timers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::lock;
use crate::router::TimerRegistry;
use crate::runtime::RuntimeConfig;
use crate::store::TimerStore;
use crate::timer::{now_ms, TimerKey};

/// App-facing scheduler handle.
///
/// This is the write path: [`set_timer`](Self::set_timer) admits a timer into
/// the store and [`remove_timer`](Self::remove_timer) cancels one. Both run
/// under the per-timer write lock, which linearizes two writers racing on the
/// same `(topic, timer_id)`: the later call's outcome is the one dispatch
/// observes.
///
/// Cloneable and cheap to share; typically obtained from
/// [`TimerEngine::service`](crate::TimerEngine::service) and handed to
/// whatever parts of the application schedule events.
#[derive(Clone)]
pub struct TimerService<S: TimerStore> {
    store: S,
    registry: Arc<TimerRegistry>,
    config: Arc<RuntimeConfig>,
}

impl<S: TimerStore> TimerService<S> {
    pub(crate) fn new(store: S, registry: Arc<TimerRegistry>, config: Arc<RuntimeConfig>) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Schedule a timer to fire `activation_period` from now.
    ///
    /// The payload is serialized up front; what dispatch later delivers is
    /// the bytes written here, validated against the handler's schema at
    /// dispatch time, not at scheduling time. Scheduling on a topic with no
    /// registered handler succeeds unless
    /// [`strict_topics`](RuntimeConfig::strict_topics) is set; the permissive
    /// default lets producers schedule without linking handler code.
    ///
    /// Overwriting an existing `(topic, timer_id)` is allowed: both the
    /// deadline and the payload are replaced, and dispatch sees only the
    /// later write.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidIdentifier`] for malformed identifiers,
    /// [`Error::Encode`] when the payload fails to serialize,
    /// [`Error::HandlerNotFound`] in strict mode,
    /// [`Error::LockAcquisitionTimeout`] when the write lock stays contended,
    /// and store I/O errors.
    pub async fn set_timer<P>(
        &self,
        topic: &str,
        timer_id: &str,
        payload: &P,
        activation_period: Duration,
    ) -> Result<()>
    where
        P: Serialize + Sync + ?Sized,
    {
        let key = TimerKey::new(topic, timer_id, &self.config.separator)?;
        self.check_topic(topic)?;

        let bytes = serde_json::to_vec(payload).map_err(|source| Error::Encode {
            topic: topic.to_string(),
            source,
        })?;
        let deadline_ms = now_ms() + activation_period.as_millis() as i64;
        let member = key.join(&self.config.separator);

        let held = self.lock_member(&member).await?;
        let written = self.store.add_timer(&member, deadline_ms, bytes).await;
        self.unlock_member(&member, &held).await;
        written?;

        debug!(%key, deadline_ms, "timer scheduled");
        Ok(())
    }

    /// Cancel a timer.
    ///
    /// Returns `true` when an entry was removed and `false` when nothing was
    /// scheduled under the pair; the no-op case is not an error. A timer
    /// already mid-dispatch converges to the same final state: its entry is
    /// absent either way.
    pub async fn remove_timer(&self, topic: &str, timer_id: &str) -> Result<bool> {
        let key = TimerKey::new(topic, timer_id, &self.config.separator)?;
        self.check_topic(topic)?;

        let member = key.join(&self.config.separator);

        let held = self.lock_member(&member).await?;
        let removed = self.store.remove_timer(&member).await;
        self.unlock_member(&member, &held).await;
        let removed = removed?;

        debug!(%key, removed, "timer removed");
        Ok(removed)
    }

    /// Diagnostic dump of everything scheduled: timeline members ordered by
    /// deadline, plus the raw payload map.
    pub async fn fetch_all_timers(&self) -> Result<(Vec<String>, HashMap<String, Vec<u8>>)> {
        self.store.all_timers().await
    }

    fn check_topic(&self, topic: &str) -> Result<()> {
        if self.config.strict_topics && !self.registry.contains(topic) {
            return Err(Error::HandlerNotFound {
                topic: topic.to_string(),
            });
        }
        Ok(())
    }

    async fn lock_member(&self, member: &str) -> Result<lock::HeldLock> {
        lock::acquire_blocking(
            &self.store,
            lock::timer_lock_key(member),
            self.config.timer_lock_ttl,
            self.config.lock_acquire_timeout,
        )
        .await
    }

    async fn unlock_member(&self, member: &str, held: &lock::HeldLock) {
        // Failure to release is survivable: the lock TTL bounds the damage.
        match lock::release(&self.store, held).await {
            Ok(_) => {}
            Err(error) => warn!(%member, %error, "failed to release timer lock"),
        }
    }
}
