//! Engine configuration.

use std::time::Duration;

/// Configuration for the timer engine.
///
/// Supplied once at engine construction; there is no process-global state.
/// Environment parsing, files, and flags are the caller's concern: build a
/// `RuntimeConfig` however the application loads settings and hand it to
/// [`EngineBuilder::config`](crate::EngineBuilder::config).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tickline::RuntimeConfig;
///
/// let config = RuntimeConfig {
///     poll_interval: Duration::from_millis(250),
///     batch_size: 32,
///     concurrency: 16,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Name of the ordered-set key holding deadlines. Default: `timers_timeline`.
    pub timeline_key: String,

    /// Name of the hash key holding payload bytes. Default: `timers_payloads`.
    pub payloads_key: String,

    /// Sequence joining `topic` and `timer_id` into the compound store key.
    ///
    /// Forbidden inside both components. Changing it orphans timers written
    /// under the old separator. Default: `--`.
    pub separator: String,

    /// Idle sleep between polls when the last batch came back short.
    ///
    /// Timer precision is limited by this interval. Default: 1 second.
    pub poll_interval: Duration,

    /// Maximum timers fetched per poll. A full batch triggers an immediate
    /// re-poll instead of the idle sleep. Default: 128.
    pub batch_size: usize,

    /// Maximum concurrent dispatch tasks per worker.
    ///
    /// Zero disables dispatch entirely: polls return without claiming
    /// anything. Default: 64.
    pub concurrency: usize,

    /// TTL on the per-timer write lock held by `set_timer`/`remove_timer`.
    /// Default: 5 seconds.
    pub timer_lock_ttl: Duration,

    /// TTL on the per-timer dispatch lease.
    ///
    /// Should exceed the longest expected handler run; a crashed worker's
    /// claim expires after this long. On success the lease is left to run
    /// out, so this is also how long a deleted timer's key stays shielded
    /// from workers with a lagging view. Default: 30 seconds.
    pub consume_lease_ttl: Duration,

    /// How long the write path waits for the timer lock before failing with
    /// `LockAcquisitionTimeout`. Default: 5 seconds.
    pub lock_acquire_timeout: Duration,

    /// Time between the stop signal and forced cancellation of in-flight
    /// dispatch tasks. Default: 10 seconds.
    pub shutdown_grace: Duration,

    /// Base delay of the backoff applied after a failed poll. Default: 100 ms.
    pub poll_backoff_base: Duration,

    /// Upper bound on the poll backoff. Default: 30 seconds.
    pub poll_backoff_cap: Duration,

    /// Reject writes for topics with no registered handler.
    ///
    /// Off by default: `set_timer` on an unknown topic succeeds and dispatch
    /// later logs `HandlerNotFound`, leaving the entry in the store.
    pub strict_topics: bool,

    /// Worker identifier used in logs to tell cluster members apart.
    ///
    /// If `None`, a UUID is generated when the engine is built.
    pub worker_id: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timeline_key: "timers_timeline".to_string(),
            payloads_key: "timers_payloads".to_string(),
            separator: "--".to_string(),
            poll_interval: Duration::from_secs(1),
            batch_size: 128,
            concurrency: 64,
            timer_lock_ttl: Duration::from_secs(5),
            consume_lease_ttl: Duration::from_secs(30),
            lock_acquire_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(10),
            poll_backoff_base: Duration::from_millis(100),
            poll_backoff_cap: Duration::from_secs(30),
            strict_topics: false,
            worker_id: None,
        }
    }
}
