//! Handlers shared by the integration scenarios.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tickline::{TimerContext, TimerHandler};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingPayload {
    pub msg: String,
}

impl PingPayload {
    pub fn new(msg: &str) -> Self {
        Self {
            msg: msg.to_string(),
        }
    }
}

/// Collects payloads delivered to handlers.
#[derive(Clone, Default)]
pub struct Recorder {
    received: Arc<Mutex<Vec<PingPayload>>>,
}

impl Recorder {
    pub fn push(&self, payload: PingPayload) {
        self.received.lock().unwrap().push(payload);
    }

    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    pub fn all(&self) -> Vec<PingPayload> {
        self.received.lock().unwrap().clone()
    }
}

/// Records every delivery and succeeds.
pub struct PingHandler {
    pub recorder: Recorder,
}

#[async_trait]
impl TimerHandler for PingHandler {
    const TOPIC: &'static str = "ping";
    type Payload = PingPayload;
    type Error = std::convert::Infallible;

    async fn handle(&self, payload: PingPayload, _: &TimerContext) -> Result<(), Self::Error> {
        self.recorder.push(payload);
        Ok(())
    }
}

/// Fails the first `failures` deliveries, then succeeds.
pub struct FlakyHandler {
    pub recorder: Recorder,
    pub attempts: Arc<AtomicU32>,
    failures: Arc<AtomicU32>,
}

impl FlakyHandler {
    pub fn failing(failures: u32) -> (Self, Recorder, Arc<AtomicU32>) {
        let recorder = Recorder::default();
        let attempts = Arc::new(AtomicU32::new(0));
        let handler = Self {
            recorder: recorder.clone(),
            attempts: Arc::clone(&attempts),
            failures: Arc::new(AtomicU32::new(failures)),
        };
        (handler, recorder, attempts)
    }
}

#[async_trait]
impl TimerHandler for FlakyHandler {
    const TOPIC: &'static str = "flaky";
    type Payload = PingPayload;
    type Error = String;

    async fn handle(&self, payload: PingPayload, _: &TimerContext) -> Result<(), Self::Error> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err("transient failure".to_string());
        }
        self.recorder.push(payload);
        Ok(())
    }
}

/// Signals when it starts, then blocks far longer than any test runs.
pub struct SlowHandler {
    pub started: Arc<AtomicBool>,
    pub finished: Arc<AtomicBool>,
}

impl SlowHandler {
    pub fn new() -> (Self, Arc<AtomicBool>, Arc<AtomicBool>) {
        let started = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let handler = Self {
            started: Arc::clone(&started),
            finished: Arc::clone(&finished),
        };
        (handler, started, finished)
    }
}

#[async_trait]
impl TimerHandler for SlowHandler {
    const TOPIC: &'static str = "slow";
    type Payload = PingPayload;
    type Error = std::convert::Infallible;

    async fn handle(&self, _: PingPayload, _: &TimerContext) -> Result<(), Self::Error> {
        self.started.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}
