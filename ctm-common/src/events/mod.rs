//! Event types for the monitor event system
//!
//! Provides the shared event definitions and the EventBus that fans outlier
//! notifications out to connected dashboards.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::db::OutlierLog;

/// Monitor event types
///
/// Serialised adjacently tagged, so an outlier travels as
/// `{"type": "outlier", "data": {...}}`. Dashboards depend on this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum CtmEvent {
    /// Sent once to each new subscriber
    Connection {
        /// Greeting text
        message: String,
    },

    /// A new outlier log entry was recorded
    ///
    /// Suppressed duplicates (same patient, message, type and reported date)
    /// are never re-emitted.
    Outlier(OutlierLog),
}

impl CtmEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            CtmEvent::Connection { .. } => "connection",
            CtmEvent::Outlier(_) => "outlier",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Default number of subscribers the bus accepts through [`EventBus::try_subscribe`]
pub const DEFAULT_MAX_SUBSCRIBERS: usize = 256;

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block the ingest pipeline)
/// - Multiple concurrent subscribers
/// - Automatic deregistration when a subscriber drops its receiver
/// - Lagged message detection for slow subscribers
///
/// The bus is bounded twice: `capacity` events are buffered per subscriber
/// before the oldest are dropped, and at most `max_subscribers` receivers are
/// handed out by [`EventBus::try_subscribe`].
///
/// # Examples
///
/// ```
/// use ctm_common::events::{CtmEvent, EventBus};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(CtmEvent::Connection {
///     message: "hello".to_string(),
/// });
///
/// assert_eq!(rx.try_recv().unwrap().event_type(), "connection");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CtmEvent>,
    capacity: usize,
    max_subscribers: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        Self::with_max_subscribers(capacity, DEFAULT_MAX_SUBSCRIBERS)
    }

    /// Creates a new EventBus with a subscriber limit
    pub fn with_max_subscribers(capacity: usize, max_subscribers: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity: capacity.max(1),
            max_subscribers,
        }
    }

    /// Subscribe to all future events, ignoring the subscriber limit
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<CtmEvent> {
        self.tx.subscribe()
    }

    /// Subscribe if the registry has room
    ///
    /// Returns `None` once `max_subscribers` receivers are alive. Dropping a
    /// receiver frees its slot.
    pub fn try_subscribe(&self) -> Option<broadcast::Receiver<CtmEvent>> {
        if self.tx.receiver_count() >= self.max_subscribers {
            tracing::warn!(
                subscribers = self.tx.receiver_count(),
                max = self.max_subscribers,
                "Subscriber limit reached, rejecting new subscriber"
            );
            return None;
        }
        Some(self.tx.subscribe())
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: CtmEvent,
    ) -> Result<usize, broadcast::error::SendError<CtmEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Delivery is fire-and-forget: the ingest pipeline never waits on or
    /// fails because of subscribers.
    pub fn emit_lossy(&self, event: CtmEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the configured subscriber limit
    pub fn max_subscribers(&self) -> usize {
        self.max_subscribers
    }
}
