//! Node liveness tracking.
//!
//! Every configured node has a countdown that telemetry resets and ticks
//! decrement.  A node whose countdown reaches zero is reported through
//! the [`AlertTracker`] under a synthetic "node timeout" rule, so the
//! alert is raised once and cleared by the next message from the node.
//!
//! Lock order is always liveness map → alert map, never the reverse.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};

use crate::alerts::{AlertTracker, RuleKey};
use crate::config::ControllerConfig;
use crate::error::Result;

/// Operator shown in node timeout notifications.
pub const TIMEOUT_OP: &str = "=";

pub struct NodeLivenessTracker {
    remaining: Mutex<BTreeMap<String, f64>>,
    timeout_secs: f64,
    title: String,
    alerts: Arc<AlertTracker>,
    rule_key: RuleKey,
}

impl NodeLivenessTracker {
    /// One countdown per node in the node table, each starting full.
    pub fn new(config: &ControllerConfig, alerts: Arc<AlertTracker>) -> Result<Self> {
        let timeout_secs = config.node_timeout.freq_secs;
        let title = config.node_timeout.title.clone();
        let rule_key = RuleKey::of(&("node_timeout", TIMEOUT_OP, timeout_secs, title.as_str()))?;
        let remaining = config
            .node
            .keys()
            .map(|id| (id.clone(), timeout_secs))
            .collect();
        Ok(Self {
            remaining: Mutex::new(remaining),
            timeout_secs,
            title,
            alerts,
            rule_key,
        })
    }

    /// Restart the node's countdown and clear its timeout alert.
    /// Returns `true` when an active alert was cleared.  Unknown nodes
    /// are ignored.
    pub fn reset(&self, node: &str) -> bool {
        let mut remaining = self.lock();
        let Some(slot) = remaining.get_mut(node) else {
            debug!("liveness: ignoring unknown node {node}");
            return false;
        };
        *slot = self.timeout_secs;
        self.alerts.clear(&self.rule_key, node)
    }

    /// Advance every countdown by `delta_secs` and raise the timeout alert
    /// for nodes that have run out.  Returns the nodes whose alert was
    /// newly raised.
    pub fn tick(&self, delta_secs: f64, now: chrono::NaiveDateTime) -> Vec<String> {
        let mut remaining = self.lock();
        let mut raised = Vec::new();
        for (node, left) in remaining.iter_mut() {
            *left = (*left - delta_secs).max(0.0);
            if *left <= 0.0 && self.alerts.raise(&self.rule_key, node, now) {
                warn!("liveness: node {node} silent for {}s", self.timeout_secs);
                raised.push(node.clone());
            }
        }
        raised
    }

    pub fn timeout_secs(&self) -> f64 {
        self.timeout_secs
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn rule_key(&self) -> RuleKey {
        self.rule_key
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, f64>> {
        self.remaining.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
