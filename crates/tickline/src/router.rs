//! Handler registration and the frozen topic registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::handler::{TimerContext, TimerHandler};

/// Type-erased route for dynamic dispatch.
///
/// This trait allows the registry to store handlers with different payload
/// types in a single map while preserving type-safe invocation.
#[async_trait]
pub(crate) trait RouteEntry: Send + Sync {
    /// Decode the stored bytes against the handler's payload schema and
    /// invoke the handler.
    ///
    /// Decode and validation failures are classified before the handler
    /// runs; handler errors come back as [`Error::HandlerFailure`].
    async fn dispatch(&self, member: &str, payload: &[u8], ctx: &TimerContext) -> Result<()>;
}

/// Typed route that captures the concrete handler at registration.
struct TypedRoute<H: TimerHandler> {
    handler: H,
}

#[async_trait]
impl<H: TimerHandler> RouteEntry for TypedRoute<H> {
    async fn dispatch(&self, member: &str, payload: &[u8], ctx: &TimerContext) -> Result<()> {
        let payload: H::Payload = serde_json::from_slice(payload)
            .map_err(|source| Error::classify_decode(member, source))?;

        self.handler
            .handle(payload, ctx)
            .await
            .map_err(|e| Error::HandlerFailure {
                key: member.to_string(),
                message: e.to_string(),
            })
    }
}

/// Collects handler registrations before the engine starts.
///
/// Registration is fluent; duplicate topics are recorded rather than panicking
/// and surface as [`Error::DuplicateHandler`] when the engine is built, so a
/// collision can never make it into a running engine.
///
/// # Example
///
/// ```ignore
/// let router = Router::new()
///     .route(ReminderHandler { mailer })
///     .route_as("reminder_v2", ReminderV2Handler { mailer });
///
/// let engine = TimerEngine::builder(store)
///     .include_router(router)
///     .build()?;
/// ```
#[derive(Default)]
pub struct Router {
    routes: HashMap<&'static str, Arc<dyn RouteEntry>>,
    duplicate_topic: Option<String>,
}

impl Router {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its declared [`TimerHandler::TOPIC`].
    pub fn route<H: TimerHandler>(self, handler: H) -> Self {
        self.route_as(H::TOPIC, handler)
    }

    /// Register a handler under an explicit topic, overriding its default.
    pub fn route_as<H: TimerHandler>(mut self, topic: &'static str, handler: H) -> Self {
        if self.routes.contains_key(topic) {
            if self.duplicate_topic.is_none() {
                self.duplicate_topic = Some(topic.to_string());
            }
            return self;
        }
        self.routes.insert(topic, Arc::new(TypedRoute { handler }));
        self
    }

    /// Merge another router into this one (union of routes).
    ///
    /// Topic collisions between the two routers are recorded and fail the
    /// engine build, same as duplicates within one router.
    pub fn merge(mut self, other: Router) -> Self {
        if self.duplicate_topic.is_none() {
            self.duplicate_topic = other.duplicate_topic;
        }
        for (topic, entry) in other.routes {
            if self.routes.contains_key(topic) {
                if self.duplicate_topic.is_none() {
                    self.duplicate_topic = Some(topic.to_string());
                }
                continue;
            }
            self.routes.insert(topic, entry);
        }
        self
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Frozen topic → route map the dispatch loop reads from.
///
/// Built once at engine construction; read-only afterwards, so lookups need
/// no locking.
pub(crate) struct TimerRegistry {
    routes: HashMap<&'static str, Arc<dyn RouteEntry>>,
}

impl std::fmt::Debug for TimerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerRegistry")
            .field("topics", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TimerRegistry {
    /// Freeze a router into a registry, rejecting recorded duplicates.
    pub(crate) fn from_router(router: Router) -> Result<Self> {
        if let Some(topic) = router.duplicate_topic {
            return Err(Error::DuplicateHandler(topic));
        }
        Ok(Self {
            routes: router.routes,
        })
    }

    /// Look up the route for a topic.
    pub(crate) fn get(&self, topic: &str) -> Option<&Arc<dyn RouteEntry>> {
        self.routes.get(topic)
    }

    /// Returns `true` if a handler is registered for `topic`.
    pub(crate) fn contains(&self, topic: &str) -> bool {
        self.routes.contains_key(topic)
    }

    /// Number of registered routes.
    pub(crate) fn len(&self) -> usize {
        self.routes.len()
    }
}
