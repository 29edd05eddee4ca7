//! Active-alert tracker.
//!
//! An alert is *active* from the first time its condition evaluates true
//! for a given (rule, node) pair until it is explicitly cleared.  The
//! tracker only reports transitions:
//!
//! 1. [`AlertTracker::raise`] on an inactive pair creates the entry and
//!    returns `true`; the caller publishes a raise notification.
//! 2. Raising an active pair only refreshes `last_modified`.
//! 3. [`AlertTracker::clear`] on an active pair removes it and returns
//!    `true`; the caller publishes a clear notification.
//! 4. Clearing an inactive pair is a no-op.
//!
//! Entries are keyed by a SHA-256 digest of the rule's canonical
//! identity and the node id, so the same logical rule and node always
//! map to the same key, across restarts included.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::NaiveDateTime;
use log::{debug, info};
use serde::Serialize;

use crate::error::{Error, Result};

/// Digest of a rule's stable identity fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RuleKey([u8; 32]);

impl RuleKey {
    /// Hash the postcard encoding of `identity`.
    pub fn of<T: Serialize + ?Sized>(identity: &T) -> Result<Self> {
        let bytes = postcard::to_allocvec(identity)
            .map_err(|e| Error::Config(format!("rule identity not serialisable: {e}")))?;
        Ok(Self(hmac_sha256::Hash::hash(&bytes)))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Dedupe key of one (rule, node) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlertKey([u8; 32]);

impl AlertKey {
    pub fn new(rule: &RuleKey, node: &str) -> Self {
        let mut h = hmac_sha256::Hash::new();
        h.update(rule.as_bytes());
        h.update(node.as_bytes());
        Self(h.finalize())
    }
}

/// Bookkeeping for a raised alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveAlert {
    pub created_at: NaiveDateTime,
    pub last_modified: NaiveDateTime,
}

/// Thread-safe set of active alerts.
#[derive(Debug, Default)]
pub struct AlertTracker {
    active: Mutex<HashMap<AlertKey, ActiveAlert>>,
}

impl AlertTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the pair active.  Returns `true` only on the inactive → active
    /// transition.
    pub fn raise(&self, rule: &RuleKey, node: &str, now: NaiveDateTime) -> bool {
        let key = AlertKey::new(rule, node);
        let mut active = self.lock();
        match active.get_mut(&key) {
            Some(entry) => {
                entry.last_modified = now;
                debug!("alerts: node {node} still active since {}", entry.created_at);
                false
            }
            None => {
                active.insert(
                    key,
                    ActiveAlert {
                        created_at: now,
                        last_modified: now,
                    },
                );
                info!("alerts: RAISED for node {node}");
                true
            }
        }
    }

    /// Mark the pair inactive.  Returns `true` only when it was active.
    pub fn clear(&self, rule: &RuleKey, node: &str) -> bool {
        let key = AlertKey::new(rule, node);
        let removed = self.lock().remove(&key).is_some();
        if removed {
            info!("alerts: CLEARED for node {node}");
        }
        removed
    }

    pub fn get(&self, rule: &RuleKey, node: &str) -> Option<ActiveAlert> {
        self.lock().get(&AlertKey::new(rule, node)).copied()
    }

    pub fn is_active(&self, rule: &RuleKey, node: &str) -> bool {
        self.get(rule, node).is_some()
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<AlertKey, ActiveAlert>> {
        self.active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
