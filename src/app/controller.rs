//! Controller: wires the bus to the engine, dispatcher and shell.
//!
//! ```text
//!   bus callbacks (any thread)
//!     │ telemetry / tick / shell
//!     ▼
//!   INBOX (embassy-sync Channel, bounded)
//!     │
//!     ▼
//!   "event-pump" thread ── RuleEngine / ShellHandler ── CommandDispatcher
//!                                                          ▲
//!   results on the telemetry topic ────────────────────────┘ (direct)
//!
//!   "tick" thread ── publishes `ts=<epoch>` every tick.freq_secs
//! ```
//!
//! Results bypass the inbox so a `send` blocking the pump thread can
//! still see its acknowledgement.  A full inbox drops the message with a
//! warning rather than blocking the bus.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{debug, error, info, warn};

use crate::config::{ControllerConfig, Topics};
use crate::dispatch::{is_command_result, CommandDispatcher};
use crate::error::Result;
use crate::shutdown::StopSignal;
use crate::task;

use super::engine::RuleEngine;
use super::ports::{Bus, Clock, MessageHandler, SubscriptionId};
use super::shell::ShellHandler;

/// Inbox depth.  Bus callbacks never block; overflow is dropped.
pub const INBOX_DEPTH: usize = 32;

/// Work item for the event pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Telemetry(String),
    Tick(String),
    Shell(String),
    Stop,
}

type Inbox = Channel<CriticalSectionRawMutex, Inbound, INBOX_DEPTH>;

pub struct Controller {
    topics: Topics,
    tick_period: Duration,
    config_text: String,
    bus: Arc<dyn Bus>,
    stop: Arc<StopSignal>,
    dispatcher: Arc<CommandDispatcher>,
    engine: Arc<RuleEngine>,
    shell: Arc<ShellHandler>,
    inbox: Arc<Inbox>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl Controller {
    pub fn new(config: &ControllerConfig, bus: Arc<dyn Bus>, clock: Arc<dyn Clock>) -> Result<Self> {
        let stop = Arc::new(StopSignal::new());
        let dispatcher = Arc::new(CommandDispatcher::new(
            config,
            Arc::clone(&bus),
            Arc::clone(&stop),
        ));
        Self::with_dispatcher(config, bus, clock, stop, dispatcher)
    }

    /// Construct around an existing dispatcher (which must share `stop`).
    /// The configuration is validated again, as it may have been edited
    /// after loading.
    pub fn with_dispatcher(
        config: &ControllerConfig,
        bus: Arc<dyn Bus>,
        clock: Arc<dyn Clock>,
        stop: Arc<StopSignal>,
        dispatcher: Arc<CommandDispatcher>,
    ) -> Result<Self> {
        config.validate()?;
        let engine = RuleEngine::new(config, dispatcher.clone(), Arc::clone(&bus), clock)?;
        let shell = ShellHandler::new(&config.shell, dispatcher.clone());
        Ok(Self {
            topics: config.topics.clone(),
            tick_period: Duration::from_secs_f64(config.tick.freq_secs),
            config_text: serde_json::to_string(config)?,
            bus,
            stop,
            dispatcher,
            engine: Arc::new(engine),
            shell: Arc::new(shell),
            inbox: Arc::new(Channel::new()),
            tasks: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// Publish this text on the config topic at start instead of the
    /// re-serialised configuration.
    pub fn with_config_text(mut self, raw: impl Into<String>) -> Self {
        self.config_text = raw.into();
        self
    }

    /// Start the dispatcher, the event pump and the tick generator, then
    /// subscribe to the inbound topics.
    pub fn start(&self) -> Result<()> {
        let started = !self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty();
        if started {
            return Ok(());
        }
        self.dispatcher.start()?;

        let pump = {
            let inbox = Arc::clone(&self.inbox);
            let engine = Arc::clone(&self.engine);
            let shell = Arc::clone(&self.shell);
            task::spawn_named("event-pump", move || run_pump(&inbox, &engine, &shell))?
        };
        self.track("event-pump", pump);

        let ticker = {
            let bus = Arc::clone(&self.bus);
            let stop = Arc::clone(&self.stop);
            let topic = self.topics.tick.clone();
            let period = self.tick_period;
            task::spawn_named("tick", move || run_ticker(bus.as_ref(), &stop, &topic, period))?
        };
        self.track("tick", ticker);

        self.subscribe(&self.topics.telemetry, |payload| {
            // Command results are consumed by the dispatcher directly.
            (!is_command_result(payload)).then(|| Inbound::Telemetry(payload.to_owned()))
        })?;
        self.subscribe(&self.topics.tick, |payload| {
            Some(Inbound::Tick(payload.to_owned()))
        })?;
        self.subscribe(&self.topics.shell, |payload| {
            Some(Inbound::Shell(payload.to_owned()))
        })?;

        self.bus.publish(&self.topics.config, &self.config_text, true)?;
        info!(
            "controller: started (telemetry on {}, ticks every {:?})",
            self.topics.telemetry, self.tick_period
        );
        Ok(())
    }

    /// Cooperative shutdown: stop intake, release blocked sends, drain the
    /// pump and join every thread.  Idempotent.
    pub fn stop(&self) {
        for id in self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            self.bus.unsubscribe(id);
        }
        self.stop.trigger();
        self.dispatcher.stop();

        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        if tasks.iter().any(|(name, _)| *name == "event-pump") {
            futures_lite::future::block_on(self.inbox.send(Inbound::Stop));
        }
        for (name, handle) in tasks {
            task::join_logged(name, handle);
        }
        info!("controller: stopped");
    }

    /// Queue a message for the event pump as if it came from the bus.
    /// Returns `false` when the inbox is full.
    pub fn enqueue(&self, item: Inbound) -> bool {
        self.inbox.try_send(item).is_ok()
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn stop_signal(&self) -> Arc<StopSignal> {
        Arc::clone(&self.stop)
    }

    fn subscribe(&self, topic: &str, wrap: fn(&str) -> Option<Inbound>) -> Result<()> {
        let inbox = Arc::clone(&self.inbox);
        let name = topic.to_owned();
        let handler: MessageHandler = Arc::new(move |payload: &str| {
            let Some(item) = wrap(payload) else {
                return;
            };
            if inbox.try_send(item).is_err() {
                warn!("controller: inbox full, dropped message on {name}");
            }
        });
        let id = self.bus.subscribe(topic, handler)?;
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
        Ok(())
    }

    fn track(&self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, handle));
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        let running = !self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty();
        if running {
            self.stop();
        }
    }
}

fn run_pump(inbox: &Inbox, engine: &RuleEngine, shell: &ShellHandler) {
    debug!("controller: event pump running");
    futures_lite::future::block_on(async {
        loop {
            match inbox.receive().await {
                Inbound::Telemetry(raw) => engine.on_telemetry(&raw),
                Inbound::Tick(raw) => engine.on_tick(&raw),
                Inbound::Shell(raw) => match shell.handle(&raw, engine) {
                    Ok(outcome) => debug!("controller: shell {raw:?} -> {outcome:?}"),
                    Err(e) => error!("controller: shell {raw:?} failed: {e}"),
                },
                Inbound::Stop => break,
            }
        }
    });
    debug!("controller: event pump stopped");
}

fn run_ticker(bus: &dyn Bus, stop: &StopSignal, topic: &str, period: Duration) {
    while !stop.wait_timeout(period) {
        let payload = format!("ts={}", Utc::now().timestamp());
        if let Err(e) = bus.publish(topic, &payload, false) {
            warn!("controller: tick not published: {e}");
        }
    }
    debug!("controller: tick generator stopped");
}
