//! Port traits: the boundary between the controller core and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ RuleEngine / CommandDispatcher (domain)
//! ```
//!
//! The transport (MQTT broker, serial gateway, in-memory loopback) and the
//! wall clock are driven adapters implementing these traits.  The core
//! consumes them through `Arc<dyn …>` so the same engine runs against a
//! real broker or a test double.

use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::dispatch::CommandResult;
use crate::error::Result;

// ───────────────────────────────────────────────────────────────
// Bus port (pub/sub transport)
// ───────────────────────────────────────────────────────────────

/// Callback invoked with the payload of every message on a topic.
///
/// Adapters may call handlers from any thread, concurrently.
pub type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Handle returned by [`Bus::subscribe`].
pub type SubscriptionId = u64;

/// Abstract publish/subscribe bus.
pub trait Bus: Send + Sync {
    /// Publish `payload` on `topic`.  `retain` asks the broker to keep the
    /// last message for late subscribers.
    fn publish(&self, topic: &str, payload: &str, retain: bool) -> core::result::Result<(), BusError>;

    /// Register `handler` for `topic`.
    fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
    ) -> core::result::Result<SubscriptionId, BusError>;

    /// Drop a subscription.  Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Local wall-clock time, used for time-window rules and alert stamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

// ───────────────────────────────────────────────────────────────
// Command port (engine → dispatcher)
// ───────────────────────────────────────────────────────────────

/// Reliable command delivery, as seen by the rule engine.
///
/// Implemented by [`CommandDispatcher`](crate::dispatch::CommandDispatcher);
/// blocks until the command is acknowledged, rejected or timed out.
pub trait CommandPort: Send + Sync {
    fn dispatch(&self, template: &str) -> Result<CommandResult>;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`Bus`] operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The transport is shut down or disconnected.
    Closed,
    /// The transport refused the operation.
    Rejected(String),
}

impl core::fmt::Display for BusError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Closed => write!(f, "bus closed"),
            Self::Rejected(msg) => write!(f, "rejected: {}", msg),
        }
    }
}
