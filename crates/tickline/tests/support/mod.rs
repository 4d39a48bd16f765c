#![allow(dead_code)]

pub mod handlers;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tickline::{MemoryStore, Router, RuntimeConfig, TimerEngine};
use tokio::task::JoinHandle;

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("tickline=debug")
        .try_init();
}

pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const CHECK_INTERVAL: Duration = Duration::from_millis(20);

/// Config with intervals tightened for tests.
pub fn fast_config() -> RuntimeConfig {
    RuntimeConfig {
        poll_interval: Duration::from_millis(50),
        lock_acquire_timeout: Duration::from_millis(500),
        shutdown_grace: Duration::from_secs(2),
        ..Default::default()
    }
}

/// Poll until `check` returns `Some(T)` or the timeout expires.
pub async fn wait_until<F, Fut, T>(timeout: Duration, check: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if let Some(result) = check().await {
            return Ok(result);
        }
        if tokio::time::Instant::now() > deadline {
            return Err(anyhow!("timeout waiting for condition"));
        }
        tokio::time::sleep(CHECK_INTERVAL).await;
    }
}

/// A running engine over a `MemoryStore`, stopped automatically on drop.
pub struct TestApp {
    pub store: MemoryStore,
    pub engine: Arc<TimerEngine<MemoryStore>>,
    handle: Option<JoinHandle<()>>,
}

impl TestApp {
    /// Build an engine and run its dispatch loop on a background task.
    pub fn start(router: Router, config: RuntimeConfig) -> Result<Self> {
        Self::start_on(MemoryStore::new(), router, config)
    }

    /// Same as [`start`](Self::start), over a caller-provided store. Used to
    /// run several engines against shared state.
    pub fn start_on(store: MemoryStore, router: Router, config: RuntimeConfig) -> Result<Self> {
        init_test_tracing();
        let engine = Arc::new(
            TimerEngine::builder(store.clone())
                .include_router(router)
                .config(config)
                .build()?,
        );
        let handle = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let _ = engine.run_forever().await;
            })
        };
        Ok(Self {
            store,
            engine,
            handle: Some(handle),
        })
    }

    /// Stop the engine and wait for the dispatch loop to exit.
    pub async fn shutdown(mut self) -> Result<()> {
        self.engine.stop();
        if let Some(handle) = self.handle.take() {
            tokio::time::timeout(Duration::from_secs(10), handle)
                .await
                .map_err(|_| anyhow!("dispatch loop did not stop"))??;
        }
        Ok(())
    }

    /// Number of entries currently in the store.
    pub async fn stored_count(&self) -> Result<usize> {
        let (members, _) = self.engine.fetch_all_timers().await?;
        Ok(members.len())
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        // Signal shutdown if not already done (e.g., on panic or early
        // return); the loop exits in the background.
        self.engine.stop();
    }
}
