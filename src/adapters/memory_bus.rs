//! In-process bus.
//!
//! [`Router`] is the subscription table shared by the in-process
//! transports.  Delivery is synchronous: `publish` calls every handler
//! registered for the exact topic on the publishing thread, after the
//! table lock has been released, so handlers may publish in turn.
//!
//! [`MemoryBus`] adds a record of everything published, for tests and
//! simulation.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::app::ports::{Bus, BusError, MessageHandler, SubscriptionId};

#[derive(Default)]
struct Table {
    next_id: SubscriptionId,
    subscribers: Vec<(SubscriptionId, String, MessageHandler)>,
    retained: HashMap<String, String>,
    closed: bool,
}

/// Exact-match topic router.
#[derive(Default)]
pub struct Router {
    table: Mutex<Table>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `payload` to the subscribers of `topic`.
    pub fn deliver(&self, topic: &str, payload: &str, retain: bool) -> Result<usize, BusError> {
        let handlers: Vec<MessageHandler> = {
            let mut table = self.lock();
            if table.closed {
                return Err(BusError::Closed);
            }
            if retain {
                table.retained.insert(topic.to_owned(), payload.to_owned());
            }
            table
                .subscribers
                .iter()
                .filter(|(_, t, _)| t == topic)
                .map(|(_, _, h)| h.clone())
                .collect()
        };
        for handler in &handlers {
            handler(payload);
        }
        Ok(handlers.len())
    }

    /// Register a handler.  A retained message on the topic is delivered
    /// to it immediately.
    pub fn add(&self, topic: &str, handler: MessageHandler) -> Result<SubscriptionId, BusError> {
        let (id, retained) = {
            let mut table = self.lock();
            if table.closed {
                return Err(BusError::Closed);
            }
            table.next_id += 1;
            let id = table.next_id;
            table
                .subscribers
                .push((id, topic.to_owned(), handler.clone()));
            (id, table.retained.get(topic).cloned())
        };
        if let Some(payload) = retained {
            handler(&payload);
        }
        Ok(id)
    }

    pub fn remove(&self, id: SubscriptionId) {
        self.lock().subscribers.retain(|(sid, _, _)| *sid != id);
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock()
            .subscribers
            .iter()
            .filter(|(_, t, _)| t == topic)
            .count()
    }

    pub fn retained(&self, topic: &str) -> Option<String> {
        self.lock().retained.get(topic).cloned()
    }

    /// Refuse every further operation.
    pub fn close(&self) {
        let mut table = self.lock();
        table.closed = true;
        table.subscribers.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

/// Loopback bus that records every publish.
#[derive(Default)]
pub struct MemoryBus {
    router: Router,
    history: Mutex<Vec<Published>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads published on `topic`, oldest first.
    pub fn published(&self, topic: &str) -> Vec<String> {
        self.history()
            .into_iter()
            .filter(|p| p.topic == topic)
            .map(|p| p.payload)
            .collect()
    }

    pub fn history(&self) -> Vec<Published> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }
}

impl Bus for MemoryBus {
    fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), BusError> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Published {
                topic: topic.to_owned(),
                payload: payload.to_owned(),
                retain,
            });
        self.router.deliver(topic, payload, retain).map(|_| ())
    }

    fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<SubscriptionId, BusError> {
        self.router.add(topic, handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.router.remove(id);
    }
}
