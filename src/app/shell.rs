//! Administrative command topic.
//!
//! Accepts two kinds of message, matched case-insensitively:
//!
//! - `node=…&cmd=…&r=…&s=…` is sent to the node through the dispatcher,
//!   exactly as written;
//! - `get=report` publishes the status report as a note.
//!
//! Anything else is ignored.  Bursts are throttled by a token bucket.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use burster::Limiter;
use log::{debug, info, warn};

use crate::config::ShellConfig;
use crate::dispatch::CommandResult;
use crate::error::Result;
use crate::wire::Payload;

use super::engine::RuleEngine;
use super::ports::CommandPort;

/// Shell commands per second (and burst size).
const SHELL_RATE: u64 = 5;

/// Fields a forwarded node command must carry.
const COMMAND_FIELDS: [&str; 4] = ["node", "cmd", "r", "s"];

/// What happened to one shell message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellOutcome {
    Disabled,
    Throttled,
    Sent(CommandResult),
    Reported,
    Ignored,
}

pub struct ShellHandler {
    enabled: bool,
    report_enabled: bool,
    limiter: Mutex<burster::TokenBucket<fn() -> Duration>>,
    commands: Arc<dyn CommandPort>,
}

impl ShellHandler {
    pub fn new(config: &ShellConfig, commands: Arc<dyn CommandPort>) -> Self {
        Self {
            enabled: config.enabled,
            report_enabled: config.report_enabled,
            limiter: Mutex::new(burster::TokenBucket::new_with_time_provider(
                SHELL_RATE,
                SHELL_RATE,
                monotonic_now as fn() -> Duration,
            )),
            commands,
        }
    }

    pub fn handle(&self, raw: &str, engine: &RuleEngine) -> Result<ShellOutcome> {
        if !self.enabled {
            debug!("shell: disabled, ignoring {raw:?}");
            return Ok(ShellOutcome::Disabled);
        }
        if !self.admit() {
            warn!("shell: rate limit exceeded, dropping {raw:?}");
            return Ok(ShellOutcome::Throttled);
        }

        let lowered = Payload::decode(&raw.to_lowercase())?;
        if COMMAND_FIELDS.iter().all(|f| lowered.contains(f)) {
            info!("shell: forwarding {raw}");
            let result = self.commands.dispatch(raw)?;
            return Ok(ShellOutcome::Sent(result));
        }
        if lowered.first("get") == Some("report") {
            if !self.report_enabled {
                debug!("shell: report disabled");
                return Ok(ShellOutcome::Ignored);
            }
            engine.notify(&engine.report_note());
            return Ok(ShellOutcome::Reported);
        }
        debug!("shell: nothing to do for {raw:?}");
        Ok(ShellOutcome::Ignored)
    }

    fn admit(&self) -> bool {
        self.limiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_consume(1)
            .is_ok()
    }
}

fn monotonic_now() -> Duration {
    use std::time::Instant;
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    START.get_or_init(Instant::now).elapsed()
}
