//! Reliable command dispatch over a lossy link.
//!
//! ```text
//!  send(template)
//!    │ resolve symbols
//!    ▼
//!  ┌─ attempt 1..=retries+1 ─────────────────────────────┐
//!  │ issue token ─▶ publish `…&tok=<token>` ─▶ wait      │
//!  │                                 ▲                    │
//!  │       clock thread: countdown ──┤                    │
//!  │   result topic: `tok=…&tx=ack` ─┘                    │
//!  └─ Ack → done; Nack/Timeout → next attempt ────────────┘
//! ```
//!
//! Each attempt owns exactly one token, which is removed from the store
//! when the attempt ends.  Late results for removed tokens are dropped.

pub mod resolve;
pub mod token;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::app::ports::{Bus, CommandPort, MessageHandler, SubscriptionId};
use crate::config::{ControllerConfig, DispatchConfig};
use crate::error::{Error, Result};
use crate::shutdown::StopSignal;
use crate::task;
use crate::wire::Payload;

pub use resolve::SymbolResolver;
pub use token::{Outcome, Token, TokenCodec};

use token::{TokenLease, TokenStore};

/// Final outcome of a [`CommandDispatcher::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResult {
    Ack,
    Nack,
    Timeout,
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ack => "ack",
            Self::Nack => "nack",
            Self::Timeout => "timeout",
        })
    }
}

struct Shared {
    bus: Arc<dyn Bus>,
    resolver: SymbolResolver,
    codec: TokenCodec,
    store: TokenStore,
    params: DispatchConfig,
    command_topic: String,
    result_topic: String,
    stop: Arc<StopSignal>,
    running: AtomicBool,
}

/// Publishes commands and waits for their acknowledgements.
pub struct CommandDispatcher {
    shared: Arc<Shared>,
    clock: Mutex<Option<JoinHandle<()>>>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl CommandDispatcher {
    pub fn new(config: &ControllerConfig, bus: Arc<dyn Bus>, stop: Arc<StopSignal>) -> Self {
        Self::with_codec(config, bus, stop, TokenCodec::random())
    }

    /// Construct with a fixed token codec (deterministic tokens in tests).
    pub fn with_codec(
        config: &ControllerConfig,
        bus: Arc<dyn Bus>,
        stop: Arc<StopSignal>,
        codec: TokenCodec,
    ) -> Self {
        let shared = Shared {
            bus,
            resolver: SymbolResolver::from_config(config),
            codec,
            store: TokenStore::new(token::random_u32() >> 8),
            params: config.dispatch.clone(),
            command_topic: config.topics.command.clone(),
            result_topic: config.topics.telemetry.clone(),
            stop,
            running: AtomicBool::new(false),
        };
        Self {
            shared: Arc::new(shared),
            clock: Mutex::new(None),
            subscription: Mutex::new(None),
        }
    }

    /// Start the countdown clock and listen for results.  Idempotent.
    pub fn start(&self) -> Result<()> {
        let mut clock = lock(&self.clock);
        if clock.is_some() {
            return Ok(());
        }

        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let handle = task::spawn_named("dispatch-clock", move || shared.run_clock())
            .inspect_err(|_| self.shared.running.store(false, Ordering::Release))?;
        *clock = Some(handle);
        drop(clock);

        let shared = Arc::clone(&self.shared);
        let handler: MessageHandler = Arc::new(move |payload: &str| {
            shared.on_inbound(payload);
        });
        let id = self.shared.bus.subscribe(&self.shared.result_topic, handler)?;
        *lock(&self.subscription) = Some(id);

        info!(
            "dispatch: started (timeout={}s, retries={}, results on {})",
            self.shared.params.timeout_secs, self.shared.params.retries, self.shared.result_topic
        );
        Ok(())
    }

    /// Stop the clock and release any waiting senders.  In-flight sends
    /// return [`CommandResult::Timeout`] without retrying.
    pub fn stop(&self) {
        if let Some(id) = lock(&self.subscription).take() {
            self.shared.bus.unsubscribe(id);
        }
        self.shared.stop.trigger();
        self.shared.store.wake_all();
        if let Some(handle) = lock(&self.clock).take() {
            task::join_logged("dispatch-clock", handle);
        }
        self.shared.running.store(false, Ordering::Release);
        info!("dispatch: stopped");
    }

    /// Resolve, publish and confirm one command.  Blocks until an
    /// attempt is acknowledged or every attempt has failed.
    ///
    /// Returns `Err` only for failures that retrying cannot fix: a
    /// malformed template, an unresolved symbol, a bus refusal, or a
    /// dispatcher that was never started.
    pub fn send(&self, template: &str) -> Result<CommandResult> {
        self.shared.send(template)
    }

    /// Handle a message from the result topic.  Returns `true` when it
    /// settled a live token.
    pub fn on_inbound(&self, payload: &str) -> bool {
        self.shared.on_inbound(payload)
    }

    /// Number of live tokens.
    pub fn pending(&self) -> usize {
        self.shared.store.len()
    }
}

impl CommandPort for CommandDispatcher {
    fn dispatch(&self, template: &str) -> Result<CommandResult> {
        self.send(template)
    }
}

impl Drop for CommandDispatcher {
    fn drop(&mut self) {
        if lock(&self.clock).is_some() {
            self.stop();
        }
    }
}

impl Shared {
    fn run_clock(&self) {
        let interval = Duration::from_millis(self.params.clock_interval_ms);
        let step = interval.as_secs_f64();
        debug!("dispatch: clock running every {interval:?}");
        while !self.stop.wait_timeout(interval) {
            self.store.elapse(step);
        }
        self.store.wake_all();
        debug!("dispatch: clock stopped");
    }

    fn send(&self, template: &str) -> Result<CommandResult> {
        if self.stop.is_triggered() {
            return Ok(CommandResult::Timeout);
        }
        if !self.running.load(Ordering::Acquire) {
            return Err(Error::Init("command dispatcher not started".into()));
        }

        let resolved = self
            .resolver
            .resolve(template)
            .inspect_err(|e| error!("dispatch: bad command {template:?}: {e}"))?;

        let wake = Duration::from_millis(self.params.wait_interval_ms);
        let attempts = self.params.retries.saturating_add(1);
        let mut result = CommandResult::Timeout;
        for attempt in 1..=attempts {
            if self.stop.is_triggered() {
                debug!("dispatch: stop requested, abandoning {template:?}");
                result = CommandResult::Timeout;
                break;
            }

            let lease = TokenLease::issue(&self.store, &self.codec, self.params.timeout_secs);
            let mut message = resolved.clone();
            message.push("tok", lease.token().as_str());
            self.bus
                .publish(&self.command_topic, &message.encode(), false)
                .inspect_err(|e| error!("dispatch: publish failed for {template:?}: {e}"))?;
            debug!(
                "dispatch: tok={} (#{}) pending",
                lease.token(),
                self.codec.decode(lease.token()).unwrap_or_default()
            );

            result = self.store.wait_terminal(lease.token(), wake, &self.stop);
            info!(
                "dispatch: {template} tok={} attempt {attempt}/{attempts}: {result}",
                lease.token()
            );
            if result == CommandResult::Ack {
                break;
            }
        }
        if result != CommandResult::Ack {
            warn!("dispatch: {template} gave up: {result}");
        }
        Ok(result)
    }

    fn on_inbound(&self, raw: &str) -> bool {
        let Ok(payload) = Payload::decode(raw) else {
            return false;
        };
        // Telemetry shares the topic; only messages carrying both fields
        // are results.
        let (Some(tok), Some(tx)) = (payload.first("tok"), payload.first("tx")) else {
            return false;
        };
        let Some(outcome) = Outcome::from_wire(tx) else {
            debug!("dispatch: tok={tok} unknown result {tx:?}");
            return false;
        };
        let known = self.store.resolve(tok, outcome);
        if !known {
            debug!(
                "dispatch: tok={tok} (#{}) not pending, discarded",
                self.codec.decode(tok).unwrap_or_default()
            );
        }
        known
    }
}

/// Whether a message on the telemetry topic is a command result
/// (`tok=…&tx=…`) rather than a reading.
pub fn is_command_result(raw: &str) -> bool {
    Payload::decode(raw).is_ok_and(|p| p.contains("tok") && p.contains("tx"))
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
