//! Handler trait for consuming fired timers.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;

/// Handler invoked when a timer on its topic fires.
///
/// Implement this trait once per topic. The associated [`Payload`](Self::Payload)
/// type doubles as the schema declaration: stored payload bytes are decoded
/// into it before the handler runs, and bytes that do not fit fail dispatch
/// with a validation error instead of reaching the handler.
///
/// # Delivery semantics
///
/// Timers have **at-least-once** delivery. A handler may be called again for
/// the same timer after a worker crash or after returning an error, so
/// handlers must be idempotent. Returning `Ok(())` deletes the timer from the
/// store; returning `Err(_)` leaves it in place for retry on a later poll.
///
/// # Example
///
/// ```ignore
/// struct ReminderHandler {
///     mailer: Mailer,
/// }
///
/// #[async_trait]
/// impl TimerHandler for ReminderHandler {
///     const TOPIC: &'static str = "reminder";
///     type Payload = Reminder;
///     type Error = anyhow::Error;
///
///     async fn handle(&self, reminder: Reminder, ctx: &TimerContext) -> Result<(), Self::Error> {
///         self.mailer.send(&reminder.address, &reminder.body).await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait TimerHandler: Send + Sync + 'static {
    /// Default topic for this handler, used by [`Router::route`](crate::Router::route).
    ///
    /// Must be stable across deployments: timers already in the store carry
    /// it inside their compound key.
    const TOPIC: &'static str;

    /// The payload schema. Decoding stored bytes into this type is the
    /// validation step; mismatches never reach [`handle`](Self::handle).
    type Payload: DeserializeOwned + Send;

    /// The error type returned by this handler.
    ///
    /// Must implement `Display` for logging. Common choices: `anyhow::Error`
    /// or custom error types.
    type Error: std::fmt::Display + Send + 'static;

    /// Consume a fired timer.
    ///
    /// Runs concurrently with other dispatches, bounded by the engine's
    /// concurrency limit. Handlers are cooperative tasks: CPU-heavy work
    /// should be offloaded.
    async fn handle(&self, payload: Self::Payload, ctx: &TimerContext)
        -> Result<(), Self::Error>;
}

/// Dispatch metadata passed to every handler invocation.
///
/// Handler dependencies (clients, pools, channels) belong in the handler
/// struct itself; the context only describes the timer being dispatched.
#[derive(Debug, Clone)]
pub struct TimerContext {
    /// Topic the timer was scheduled under.
    pub topic: String,

    /// Caller-chosen timer identifier.
    pub timer_id: String,

    /// The deadline the timer was scheduled for.
    ///
    /// Dispatch happens at or after this instant; the gap is bounded by the
    /// poll interval plus queueing delay under load.
    pub scheduled_for: OffsetDateTime,

    /// Identifier of the worker performing this dispatch.
    pub worker_id: String,
}

impl TimerContext {
    /// Create a new dispatch context.
    pub fn new(
        topic: impl Into<String>,
        timer_id: impl Into<String>,
        scheduled_for: OffsetDateTime,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            timer_id: timer_id.into(),
            scheduled_for,
            worker_id: worker_id.into(),
        }
    }

    /// How far past its deadline the timer is at `now`.
    ///
    /// Returns zero when dispatch happens before the deadline (clock skew
    /// between workers).
    pub fn overdue_by(&self, now: OffsetDateTime) -> std::time::Duration {
        (now - self.scheduled_for)
            .try_into()
            .unwrap_or(std::time::Duration::ZERO)
    }
}
