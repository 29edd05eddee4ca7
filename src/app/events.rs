//! Outbound notifications.
//!
//! The [`RuleEngine`](super::engine::RuleEngine) emits these on the notify
//! topic.  The forwarder on the other side (push service, mail relay)
//! turns them into messages for people.

use std::fmt;

use chrono::NaiveDateTime;

use crate::wire::Payload;

/// Timestamp format used in notification bodies.
const STAMP: &str = "%H:%M:%S %m/%d/%y";

/// A human-facing notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// An alert was raised or cleared.
    Alert(AlertNotice),
    /// Free-form note (status report).
    Note {
        title: String,
        body: String,
        at: NaiveDateTime,
    },
}

/// Raise/clear transition of one (rule, node) alert.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertNotice {
    /// Display name of the node (`?` when it has none).
    pub node: String,
    pub title: String,
    pub cleared: bool,
    pub value: String,
    pub op: String,
    pub setpoint: String,
    pub at: NaiveDateTime,
}

impl fmt::Display for AlertNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.cleared { "|CLEARED|" } else { "|" };
        write!(
            f,
            "[{}] {} {} {} {} {} @ {}",
            self.node,
            self.title,
            mark,
            self.value,
            self.op,
            self.setpoint,
            self.at.format(STAMP)
        )
    }
}

impl Notification {
    /// Encode for the notify topic.
    pub fn to_payload(&self) -> String {
        let mut p = Payload::new();
        match self {
            Self::Alert(alert) => {
                p.push("type", "alert");
                p.push("body", alert.to_string());
            }
            Self::Note { title, body, at } => {
                p.push("type", "note");
                p.push("title", title.as_str());
                p.push("body", format!("{body} @ {}", at.format(STAMP)));
            }
        }
        p.encode()
    }
}
