//! Runtime for polling and dispatching due timers.
//!
//! This module provides the engine side of the library:
//!
//! - [`TimerEngine`] — owns the dispatch loop and the scheduler handle
//! - [`EngineBuilder`] — registers routers and configuration before start
//! - [`RuntimeConfig`] — polling, batching, locking, and shutdown options
//!
//! # Example
//!
//! ```ignore
//! use tickline::{RuntimeConfig, TimerEngine};
//!
//! let engine = TimerEngine::builder(store)
//!     .include_router(router)
//!     .config(RuntimeConfig::default())
//!     .build()?;
//!
//! engine.run_forever().await?;
//! ```

mod backoff;
mod config;
mod dispatch_worker;
mod engine;

pub use config::RuntimeConfig;
pub use engine::{EngineBuilder, TimerEngine};
