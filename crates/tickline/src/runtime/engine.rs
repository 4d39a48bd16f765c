//! Engine construction and lifecycle.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use super::dispatch_worker::DispatchWorker;
use super::RuntimeConfig;
use crate::error::Result;
use crate::router::{Router, TimerRegistry};
use crate::service::TimerService;
use crate::store::TimerStore;

/// Builder for a [`TimerEngine`].
///
/// Collects routers and configuration, then freezes them at
/// [`build`](Self::build). Construction performs no I/O; the first store
/// call happens on the first scheduler write or poll.
pub struct EngineBuilder<S: TimerStore> {
    store: S,
    router: Router,
    config: RuntimeConfig,
}

impl<S: TimerStore> EngineBuilder<S> {
    fn new(store: S) -> Self {
        Self {
            store,
            router: Router::new(),
            config: RuntimeConfig::default(),
        }
    }

    /// Merge a router's routes into the engine.
    ///
    /// May be called multiple times; topic collisions across routers fail
    /// [`build`](Self::build) with `DuplicateHandler`.
    pub fn include_router(mut self, router: Router) -> Self {
        self.router = self.router.merge(router);
        self
    }

    /// Register a single handler directly, without a separate router.
    pub fn route<H: crate::TimerHandler>(mut self, handler: H) -> Self {
        self.router = self.router.route(handler);
        self
    }

    /// Set the engine configuration.
    ///
    /// If not called, uses [`RuntimeConfig::default()`].
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Freeze the registry and construct the engine.
    ///
    /// Fails with [`Error::DuplicateHandler`](crate::Error::DuplicateHandler)
    /// when any topic was registered twice; a colliding registration can
    /// never reach a running engine.
    pub fn build(self) -> Result<TimerEngine<S>> {
        let registry = Arc::new(TimerRegistry::from_router(self.router)?);
        let worker_id = self
            .config
            .worker_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let config = Arc::new(self.config);
        let service = Arc::new(TimerService::new(
            self.store.clone(),
            Arc::clone(&registry),
            Arc::clone(&config),
        ));
        let (stop, _) = watch::channel(false);

        Ok(TimerEngine {
            store: self.store,
            registry,
            service,
            config,
            worker_id,
            stop,
        })
    }
}

/// The timer engine: scheduler write path plus the dispatch loop.
///
/// Workers on different machines coordinate purely through the store, so
/// running several engines against one store scales out dispatch: each due
/// timer is still handled by exactly one of them, decided by its consume
/// lease.
///
/// # Example
///
/// ```ignore
/// let engine = TimerEngine::builder(store)
///     .include_router(router)
///     .config(RuntimeConfig::default())
///     .build()?;
///
/// engine.set_timer("reminder", "order-17", &reminder, Duration::from_secs(3600)).await?;
///
/// // Runs until `stop()` is called from elsewhere.
/// engine.run_forever().await?;
/// ```
pub struct TimerEngine<S: TimerStore> {
    store: S,
    registry: Arc<TimerRegistry>,
    service: Arc<TimerService<S>>,
    config: Arc<RuntimeConfig>,
    worker_id: String,
    stop: watch::Sender<bool>,
}

impl<S: TimerStore> std::fmt::Debug for TimerEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerEngine")
            .field("worker_id", &self.worker_id)
            .field("config", &self.config)
            .finish()
    }
}

impl<S: TimerStore> TimerEngine<S> {
    /// Start building an engine on top of a store.
    pub fn builder(store: S) -> EngineBuilder<S> {
        EngineBuilder::new(store)
    }

    /// A cloneable handle to the scheduler write path.
    pub fn service(&self) -> Arc<TimerService<S>> {
        Arc::clone(&self.service)
    }

    /// This engine's worker identifier, as it appears in logs.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Number of registered routes.
    pub fn route_count(&self) -> usize {
        self.registry.len()
    }

    /// Schedule a timer. See [`TimerService::set_timer`].
    pub async fn set_timer<P>(
        &self,
        topic: &str,
        timer_id: &str,
        payload: &P,
        activation_period: std::time::Duration,
    ) -> Result<()>
    where
        P: Serialize + Sync + ?Sized,
    {
        self.service
            .set_timer(topic, timer_id, payload, activation_period)
            .await
    }

    /// Cancel a timer. See [`TimerService::remove_timer`].
    pub async fn remove_timer(&self, topic: &str, timer_id: &str) -> Result<bool> {
        self.service.remove_timer(topic, timer_id).await
    }

    /// Diagnostic dump of everything scheduled. See
    /// [`TimerService::fetch_all_timers`].
    pub async fn fetch_all_timers(
        &self,
    ) -> Result<(Vec<String>, std::collections::HashMap<String, Vec<u8>>)> {
        self.service.fetch_all_timers().await
    }

    /// Run a single poll cycle to completion and return how many due members
    /// the poll saw.
    ///
    /// Useful for applications that drive dispatch from their own loop or
    /// cron instead of [`run_forever`](Self::run_forever), and for tests.
    pub async fn handle_ready_timers(&self) -> Result<usize> {
        let mut worker = DispatchWorker::new(
            self.store.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
            format!("{}-cycle", self.worker_id),
        );
        worker.run_cycle().await
    }

    /// Run the dispatch loop until [`stop`](Self::stop) is called.
    ///
    /// Calling this from several tasks runs several workers over the same
    /// store; the consume lease keeps them from double-dispatching. Returns
    /// after in-flight dispatches have settled or the shutdown grace period
    /// forced them out.
    pub async fn run_forever(&self) -> Result<()> {
        info!(
            worker_id = %self.worker_id,
            routes = self.registry.len(),
            "timer engine starting"
        );
        let worker = DispatchWorker::new(
            self.store.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
            self.worker_id.clone(),
        );
        worker.run(self.stop.subscribe()).await;
        Ok(())
    }

    /// Signal the dispatch loop to exit at the next safe point.
    ///
    /// Cancels the inter-poll sleep immediately; already-claimed timers get
    /// up to [`shutdown_grace`](RuntimeConfig::shutdown_grace) to finish.
    /// Idempotent, and effective even if called before
    /// [`run_forever`](Self::run_forever).
    pub fn stop(&self) {
        // send_replace updates the value even when no worker is subscribed
        // yet, so a stop issued before run_forever still wins.
        self.stop.send_replace(true);
    }
}
