//! Dispatch worker: polls the timeline and fans out due timers to handlers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::backoff::PollBackoff;
use super::RuntimeConfig;
use crate::error::{Error, Result};
use crate::handler::TimerContext;
use crate::lock::{self, HeldLock};
use crate::router::TimerRegistry;
use crate::store::TimerStore;
use crate::timer::{from_epoch_ms, now_ms, TimerKey};

/// Consume leases currently held by this worker's in-flight dispatch tasks,
/// member → fencing token.
///
/// Tasks register on acquisition and deregister when they settle the lease
/// themselves. Whatever is left after a forced cancellation belongs to tasks
/// that never reached their release path; the worker sweeps those so no
/// timer stays claimed until TTL expiry for no reason.
type LeaseTable = Arc<Mutex<HashMap<String, String>>>;

/// How an individual dispatch settled, deciding the fate of its lease.
enum Dispatched {
    /// Handler succeeded and the entry was deleted. The lease is kept so a
    /// worker with a lagging view cannot re-dispatch before noticing the
    /// deletion.
    Completed,
    /// Payload already gone: another worker finished this timer between our
    /// poll and our fetch. Lease kept, nothing to do.
    PayloadMissing,
    /// Member cannot be split into `(topic, timer_id)`. Lease kept so the
    /// corrupt entry is reported once per lease TTL instead of every poll.
    CorruptMember,
}

/// Worker that runs the poll → claim → dispatch → delete cycle.
///
/// One worker per [`run_forever`](crate::TimerEngine::run_forever) call.
/// Within a poll cycle, each due member gets its own task, bounded by the
/// configured concurrency; the cycle completes when its batch has settled.
///
/// # Lifecycle
///
/// 1. Poll the timeline for members with deadline ≤ now, up to `batch_size`
/// 2. Per member: claim the consume lease, fetch the payload, split the key,
///    look up the route, decode, invoke the handler
/// 3. On handler success delete the entry (lease kept); on any failure that
///    deserves a retry, release the lease
/// 4. Full batch → re-poll immediately; short batch → sleep `poll_interval`;
///    poll error → bounded exponential backoff
/// 5. On stop: finish the in-flight batch within `shutdown_grace`, then
///    cancel the stragglers and release their leases
pub(crate) struct DispatchWorker<S: TimerStore> {
    store: S,
    registry: Arc<TimerRegistry>,
    config: Arc<RuntimeConfig>,
    worker_id: String,
    limiter: Arc<Semaphore>,
    leases: LeaseTable,
    tasks: JoinSet<()>,
}

impl<S: TimerStore> DispatchWorker<S> {
    pub(crate) fn new(
        store: S,
        registry: Arc<TimerRegistry>,
        config: Arc<RuntimeConfig>,
        worker_id: String,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(config.concurrency));
        Self {
            store,
            registry,
            config,
            worker_id,
            limiter,
            leases: LeaseTable::default(),
            tasks: JoinSet::new(),
        }
    }

    /// Run until the shutdown receiver signals.
    pub(crate) async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.worker_id, "dispatch worker started");

        let mut backoff = PollBackoff::new(
            self.config.poll_backoff_base,
            self.config.poll_backoff_cap,
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            // A poll can block on a dispatch slot when every permit is held
            // by a slow handler; shutdown must still get through. Dropping
            // the poll future is safe: no lease is held between store calls,
            // and already-spawned tasks keep running in the join set.
            let polled = tokio::select! {
                polled = self.poll_once() => polled,
                _ = shutdown.changed() => continue,
            };

            let delay = match polled {
                Ok(claimed) if claimed >= self.config.batch_size => {
                    // Saturated: the timeline likely has more due members.
                    backoff.reset();
                    Duration::ZERO
                }
                Ok(_) => {
                    backoff.reset();
                    self.config.poll_interval
                }
                Err(error) => {
                    let delay = backoff.next_delay();
                    error!(
                        worker_id = %self.worker_id,
                        %error,
                        backoff_ms = delay.as_millis() as u64,
                        "poll failed, backing off"
                    );
                    delay
                }
            };

            if !self.drain_batch(&mut shutdown).await {
                break;
            }

            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }

        info!(worker_id = %self.worker_id, "dispatch worker shutting down");
        self.finish_with_grace().await;
        info!(worker_id = %self.worker_id, "dispatch worker stopped");
    }

    /// Run exactly one poll cycle to completion and return how many members
    /// the poll returned.
    pub(crate) async fn run_cycle(&mut self) -> Result<usize> {
        let claimed = self.poll_once().await?;
        while let Some(joined) = self.tasks.join_next().await {
            log_join_outcome(joined);
        }
        Ok(claimed)
    }

    /// Poll the timeline and spawn a dispatch task per due member.
    async fn poll_once(&mut self) -> Result<usize> {
        if self.config.concurrency == 0 {
            return Ok(0);
        }

        let due = self
            .store
            .due_timers(now_ms(), self.config.batch_size)
            .await?;
        let claimed = due.len();
        if claimed > 0 {
            debug!(worker_id = %self.worker_id, count = claimed, "due timers polled");
        }

        for timer in due {
            // Blocks when `concurrency` tasks are in flight; a slot frees as
            // soon as any one of them settles.
            let Ok(permit) = Arc::clone(&self.limiter).acquire_owned().await else {
                break;
            };

            let store = self.store.clone();
            let registry = Arc::clone(&self.registry);
            let config = Arc::clone(&self.config);
            let leases = Arc::clone(&self.leases);
            let worker_id = self.worker_id.clone();

            self.tasks.spawn(async move {
                let _permit = permit;
                dispatch_one(store, registry, config, leases, worker_id, timer.member, timer.deadline_ms)
                    .await;
            });
        }

        Ok(claimed)
    }

    /// Await the current batch. Returns `false` when shutdown was signalled,
    /// leaving unfinished tasks for [`finish_with_grace`](Self::finish_with_grace).
    async fn drain_batch(&mut self, shutdown: &mut watch::Receiver<bool>) -> bool {
        loop {
            tokio::select! {
                joined = self.tasks.join_next() => match joined {
                    Some(outcome) => log_join_outcome(outcome),
                    None => return true,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return false;
                    }
                }
            }
        }
    }

    /// Let in-flight tasks finish within the grace period, then cancel the
    /// rest and release any consume leases they left registered.
    async fn finish_with_grace(&mut self) {
        if self.tasks.is_empty() {
            return;
        }

        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while let Some(joined) = self.tasks.join_next().await {
                log_join_outcome(joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                worker_id = %self.worker_id,
                grace_secs = self.config.shutdown_grace.as_secs(),
                outstanding = self.tasks.len(),
                "shutdown grace exceeded, cancelling in-flight dispatches"
            );
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}

            let abandoned: Vec<(String, String)> =
                self.leases.lock().unwrap().drain().collect();
            for (member, token) in abandoned {
                let held = HeldLock {
                    key: lock::consume_lock_key(&member),
                    token,
                };
                match lock::release(&self.store, &held).await {
                    Ok(_) => debug!(%member, "released lease of cancelled dispatch"),
                    Err(error) => {
                        warn!(%member, %error, "failed to release lease of cancelled dispatch");
                    }
                }
            }
        }
    }
}

fn log_join_outcome(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(join_error) = joined {
        if join_error.is_panic() {
            error!(%join_error, "dispatch task panicked");
        }
    }
}

/// Dispatch a single due member end to end.
///
/// Never returns an error: every outcome is logged and settled here, so one
/// bad timer cannot take down the poll loop or its batch.
async fn dispatch_one<S: TimerStore>(
    store: S,
    registry: Arc<TimerRegistry>,
    config: Arc<RuntimeConfig>,
    leases: LeaseTable,
    worker_id: String,
    member: String,
    deadline_ms: i64,
) {
    let lease = match lock::acquire_once(
        &store,
        lock::consume_lock_key(&member),
        config.consume_lease_ttl,
    )
    .await
    {
        Ok(Some(lease)) => lease,
        Ok(None) => {
            debug!(%member, "timer is locked by another worker, skipping");
            return;
        }
        Err(error) => {
            error!(%member, %error, "failed to acquire consume lease");
            return;
        }
    };
    leases
        .lock()
        .unwrap()
        .insert(member.clone(), lease.token.clone());

    let settled = dispatch_claimed(&store, &registry, &config, &worker_id, &member, deadline_ms).await;

    match settled {
        Ok(Dispatched::Completed) => {
            debug!(%member, "timer dispatched");
        }
        Ok(Dispatched::PayloadMissing) => {
            warn!(%member, "no payload found for due timer, skipping");
        }
        Ok(Dispatched::CorruptMember) => {
            // Already logged with the split failure detail.
        }
        Err(error) => {
            match &error {
                Error::HandlerNotFound { topic } => {
                    warn!(%member, topic = topic.as_str(), "handler is not found, leaving timer for operator");
                }
                Error::HandlerFailure { .. } => {
                    error!(%member, %error, "handler failed, timer will be retried");
                }
                Error::PayloadDecode { .. } | Error::PayloadValidation { .. } => {
                    error!(%member, %error, "failed to parse payload, leaving timer for operator");
                }
                _ => {
                    error!(%member, %error, "dispatch failed, timer will be retried");
                }
            }
            // Every error path allows another attempt (or operator
            // intervention) as soon as the next poll sees the member.
            if let Err(release_error) = lock::release(&store, &lease).await {
                warn!(%member, %release_error, "failed to release consume lease");
            }
        }
    }

    leases.lock().unwrap().remove(&member);
}

/// The lease-holding section of a dispatch: fetch, split, route, decode,
/// invoke, delete.
async fn dispatch_claimed<S: TimerStore>(
    store: &S,
    registry: &TimerRegistry,
    config: &RuntimeConfig,
    worker_id: &str,
    member: &str,
    deadline_ms: i64,
) -> Result<Dispatched> {
    let Some(payload) = store.fetch_payload(member).await? else {
        return Ok(Dispatched::PayloadMissing);
    };

    let key = match TimerKey::split(member, &config.separator) {
        Ok(key) => key,
        Err(error) => {
            error!(%member, %error, "abandoning corrupted timeline member");
            return Ok(Dispatched::CorruptMember);
        }
    };

    let Some(route) = registry.get(key.topic()) else {
        return Err(Error::HandlerNotFound {
            topic: key.topic().to_string(),
        });
    };

    let ctx = TimerContext::new(
        key.topic(),
        key.timer_id(),
        from_epoch_ms(deadline_ms),
        worker_id,
    );
    route.dispatch(member, &payload, &ctx).await?;

    // The handler returned cleanly: this dispatch owns the delete. The
    // overwrite race is accepted; a payload written after our fetch is
    // deleted with the entry (dispatch reflects the payload read at fetch
    // time).
    store.remove_timer(member).await?;
    Ok(Dispatched::Completed)
}

#[cfg(test)]
mod tests {
    use std::result::Result;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use serde::Deserialize;

    use super::*;
    use crate::handler::TimerHandler;
    use crate::router::Router;
    use crate::store::MemoryStore;

    #[derive(Deserialize)]
    struct Empty {}

    #[derive(Default)]
    struct Counting {
        calls: AtomicU32,
    }

    struct CountingHandler(Arc<Counting>);

    #[async_trait]
    impl TimerHandler for CountingHandler {
        const TOPIC: &'static str = "count";
        type Payload = Empty;
        type Error = std::convert::Infallible;

        async fn handle(&self, _: Empty, _: &TimerContext) -> Result<(), Self::Error> {
            self.0.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn worker(store: MemoryStore, router: Router, config: RuntimeConfig) -> DispatchWorker<MemoryStore> {
        let registry = Arc::new(TimerRegistry::from_router(router).unwrap());
        DispatchWorker::new(store, registry, Arc::new(config), "test-worker".to_string())
    }

    #[tokio::test]
    async fn missing_payload_keeps_lease_and_member() {
        let store = MemoryStore::new();
        let counting = Arc::new(Counting::default());
        let router = Router::new().route(CountingHandler(Arc::clone(&counting)));

        store.add_timer("count--t1", 0, b"{}".to_vec()).await.unwrap();
        store.drop_payload("count--t1");

        let mut worker = worker(store.clone(), router, RuntimeConfig::default());
        assert_eq!(worker.run_cycle().await.unwrap(), 1);

        assert_eq!(counting.calls.load(Ordering::SeqCst), 0);
        // The member survives for a recovery tool, and the lease is left to
        // expire rather than released.
        let (members, _) = store.all_timers().await.unwrap();
        assert_eq!(members, vec!["count--t1".to_string()]);
        let lease = lock::acquire_once(
            &store,
            lock::consume_lock_key("count--t1"),
            Duration::from_secs(30),
        )
        .await
        .unwrap();
        assert!(lease.is_none());
    }

    #[tokio::test]
    async fn corrupt_member_is_abandoned() {
        let store = MemoryStore::new();
        let router = Router::new().route(CountingHandler(Arc::default()));

        store
            .add_timer("no_separator", 0, b"{}".to_vec())
            .await
            .unwrap();

        let mut worker = worker(store.clone(), router, RuntimeConfig::default());
        worker.run_cycle().await.unwrap();

        let (members, _) = store.all_timers().await.unwrap();
        assert_eq!(members, vec!["no_separator".to_string()]);
    }

    #[tokio::test]
    async fn unknown_topic_releases_lease_and_keeps_member() {
        let store = MemoryStore::new();
        let router = Router::new().route(CountingHandler(Arc::default()));

        store
            .add_timer("unrouted--t1", 0, b"{}".to_vec())
            .await
            .unwrap();

        let mut worker = worker(store.clone(), router, RuntimeConfig::default());
        worker.run_cycle().await.unwrap();

        let (members, _) = store.all_timers().await.unwrap();
        assert_eq!(members, vec!["unrouted--t1".to_string()]);
        // Lease was released, so the next cycle could claim it again.
        let lease = lock::acquire_once(
            &store,
            lock::consume_lock_key("unrouted--t1"),
            Duration::from_secs(30),
        )
        .await
        .unwrap();
        assert!(lease.is_some());
    }

    #[tokio::test]
    async fn zero_concurrency_claims_nothing() {
        let store = MemoryStore::new();
        let counting = Arc::new(Counting::default());
        let router = Router::new().route(CountingHandler(Arc::clone(&counting)));

        store.add_timer("count--t1", 0, b"{}".to_vec()).await.unwrap();

        let config = RuntimeConfig {
            concurrency: 0,
            ..Default::default()
        };
        let mut worker = worker(store.clone(), router, config);
        assert_eq!(worker.run_cycle().await.unwrap(), 0);

        assert_eq!(counting.calls.load(Ordering::SeqCst), 0);
        let (members, _) = store.all_timers().await.unwrap();
        assert_eq!(members.len(), 1);
    }

    #[tokio::test]
    async fn successful_dispatch_deletes_and_keeps_lease() {
        let store = MemoryStore::new();
        let counting = Arc::new(Counting::default());
        let router = Router::new().route(CountingHandler(Arc::clone(&counting)));

        store.add_timer("count--t1", 0, b"{}".to_vec()).await.unwrap();

        let mut worker = worker(store.clone(), router, RuntimeConfig::default());
        assert_eq!(worker.run_cycle().await.unwrap(), 1);

        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
        let (members, payloads) = store.all_timers().await.unwrap();
        assert!(members.is_empty());
        assert!(payloads.is_empty());
        // Lease deliberately left to expire after success.
        let lease = lock::acquire_once(
            &store,
            lock::consume_lock_key("count--t1"),
            Duration::from_secs(30),
        )
        .await
        .unwrap();
        assert!(lease.is_none());
    }

    #[tokio::test]
    async fn future_timers_are_not_polled() {
        let store = MemoryStore::new();
        let counting = Arc::new(Counting::default());
        let router = Router::new().route(CountingHandler(Arc::clone(&counting)));

        store
            .add_timer("count--t1", now_ms() + 60_000, b"{}".to_vec())
            .await
            .unwrap();

        let mut worker = worker(store.clone(), router, RuntimeConfig::default());
        assert_eq!(worker.run_cycle().await.unwrap(), 0);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 0);
    }
}
