//! Distributed timer service over a Redis-class store.
//!
//! Tickline lets an application schedule payload-bearing events to fire at a
//! future wall-clock time and invokes registered handlers when those times
//! elapse. Any number of worker processes share one store; each due timer is
//! dispatched by exactly one of them.
//!
//! - **Write path** — [`TimerEngine::set_timer`] serializes the payload and
//!   admits the timer under a per-timer write lock; [`TimerEngine::remove_timer`]
//!   cancels by identity
//! - **Read path** — the dispatch loop polls the store for due timers, claims
//!   each with a one-shot expiring lease, validates the payload against the
//!   handler's schema, and deletes the timer once the handler returns cleanly
//! - **At-least-once** — a handler may run more than once for one timer
//!   (worker crash, handler error); handlers must be idempotent
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         store (Redis-class)                          │
//! │   timeline: sorted set  K → deadline_ms                              │
//! │   payloads: hash        K → bytes                                    │
//! │   locks:    lock:timer:K / lock:consume:K  (TTL + fencing token)     │
//! └──────────────────────────────────────────────────────────────────────┘
//!        ▲ set_timer / remove_timer              │ poll → lease → dispatch
//!   ┌────┴─────────┐                      ┌──────▼──────────┐
//!   │ TimerService │                      │ TimerEngine     │
//!   │  (write path)│                      │  dispatch loop  │ × N workers
//!   └──────────────┘                      └─────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use tickline::{Router, RuntimeConfig, TimerContext, TimerEngine, TimerHandler};
//!
//! struct ReminderHandler;
//!
//! #[async_trait::async_trait]
//! impl TimerHandler for ReminderHandler {
//!     const TOPIC: &'static str = "reminder";
//!     type Payload = Reminder;
//!     type Error = anyhow::Error;
//!
//!     async fn handle(&self, reminder: Reminder, _ctx: &TimerContext) -> anyhow::Result<()> {
//!         println!("{}", reminder.message);
//!         Ok(())
//!     }
//! }
//!
//! let engine = TimerEngine::builder(store)
//!     .include_router(Router::new().route(ReminderHandler))
//!     .config(RuntimeConfig::default())
//!     .build()?;
//!
//! engine.set_timer("reminder", "order-17", &reminder, Duration::from_secs(3600)).await?;
//! engine.run_forever().await?;
//! ```
//!
//! # Feature Flags
//!
//! - `redis` — Enables [`RedisStore`] for production use with Redis
//!
//! # Design Documentation
//!
//! See `DESIGN.md` for architectural decisions.

mod error;
mod handler;
mod router;
mod service;
mod timer;

pub mod lock;
pub mod runtime;
pub mod store;

pub use error::{Error, Result};
pub use handler::{TimerContext, TimerHandler};
pub use router::Router;
pub use runtime::{EngineBuilder, RuntimeConfig, TimerEngine};
pub use service::TimerService;
pub use store::{DueTimer, MemoryStore, TimerStore};
#[cfg(feature = "redis")]
pub use store::RedisStore;
pub use timer::TimerKey;
