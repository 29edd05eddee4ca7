//! Line-oriented bus over a reader/writer pair.
//!
//! Each line is `<topic> <payload>`.  Input lines are delivered to local
//! subscribers; every publish is delivered locally as well and written to
//! the output, so a gateway process (or a person at a terminal) sees the
//! commands, notifications and ticks the controller emits.

use std::io::{BufRead, Write};
use std::sync::{Mutex, PoisonError};

use log::{debug, warn};

use crate::app::ports::{Bus, BusError, MessageHandler, SubscriptionId};

use super::memory_bus::Router;

pub struct StdioBus {
    router: Router,
    out: Mutex<Box<dyn Write + Send>>,
}

impl StdioBus {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            router: Router::new(),
            out: Mutex::new(out),
        }
    }

    /// Bus writing to standard output.
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Deliver one input line.  Blank lines and lines without a topic are
    /// skipped.
    pub fn feed_line(&self, line: &str) -> Result<(), BusError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Ok(());
        }
        let Some((topic, payload)) = line.split_once(' ') else {
            debug!("stdio: no payload in {line:?}, skipped");
            return Ok(());
        };
        self.router.deliver(topic, payload.trim_start(), false).map(|_| ())
    }

    /// Feed every line of `input` until EOF.  Returns the number of lines
    /// read.
    pub fn pump(&self, input: impl BufRead) -> std::io::Result<usize> {
        let mut count = 0;
        for line in input.lines() {
            let line = line?;
            count += 1;
            if let Err(e) = self.feed_line(&line) {
                warn!("stdio: input not delivered: {e}");
            }
        }
        Ok(count)
    }

    pub fn close(&self) {
        self.router.close();
    }
}

impl Bus for StdioBus {
    fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), BusError> {
        {
            let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
            writeln!(out, "{topic} {payload}")
                .and_then(|()| out.flush())
                .map_err(|e| BusError::Rejected(e.to_string()))?;
        }
        self.router.deliver(topic, payload, retain).map(|_| ())
    }

    fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<SubscriptionId, BusError> {
        self.router.add(topic, handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.router.remove(id);
    }
}
