//! Simulated remote node for integration tests.
//!
//! [`NodeSim`] listens on the command topic of a [`MemoryBus`], records
//! every command it receives and answers on the telemetry topic according
//! to a scripted policy, the way a gateway relays a node's ack/nack.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use fieldctl::adapters::memory_bus::MemoryBus;
use fieldctl::app::ports::{Bus, MessageHandler};
use fieldctl::config::ControllerConfig;
use fieldctl::wire::Payload;

/// How the node answers one received command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum Reply {
    Ack,
    Nack,
    /// Report the token as still pending (`tx=`), which changes nothing.
    Pending,
    Silent,
    /// Ack from another thread after a delay.
    AckAfter(Duration),
}

type Policy = dyn Fn(usize) -> Reply + Send + Sync;

pub struct NodeSim {
    received: Arc<Mutex<Vec<Payload>>>,
}

#[allow(dead_code)]
impl NodeSim {
    /// Attach to `bus`.  `policy` gets the 1-based index of each command.
    pub fn attach(
        bus: &Arc<MemoryBus>,
        config: &ControllerConfig,
        policy: impl Fn(usize) -> Reply + Send + Sync + 'static,
    ) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let policy: Arc<Policy> = Arc::new(policy);
        let weak: Weak<MemoryBus> = Arc::downgrade(bus);
        let results = config.topics.telemetry.clone();
        let log = received.clone();

        let handler: MessageHandler = Arc::new(move |raw: &str| {
            let payload = Payload::decode(raw).expect("command must decode");
            let token = payload.first("tok").unwrap_or_default().to_owned();
            let index = {
                let mut log = log.lock().unwrap();
                log.push(payload);
                log.len()
            };
            let Some(bus) = weak.upgrade() else { return };
            let reply = |tx: &str| format!("tok={token}&tx={tx}");
            match policy(index) {
                Reply::Ack => bus.publish(&results, &reply("ack"), false).unwrap(),
                Reply::Nack => bus.publish(&results, &reply("nack"), false).unwrap(),
                Reply::Pending => bus.publish(&results, &reply(""), false).unwrap(),
                Reply::Silent => {}
                Reply::AckAfter(delay) => {
                    let results = results.clone();
                    let msg = reply("ack");
                    std::thread::spawn(move || {
                        std::thread::sleep(delay);
                        bus.publish(&results, &msg, false).unwrap();
                    });
                }
            }
        });
        bus.subscribe(&config.topics.command, handler).unwrap();
        Self { received }
    }

    pub fn commands(&self) -> Vec<Payload> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.commands()
            .iter()
            .map(|p| p.first("tok").unwrap_or_default().to_owned())
            .collect()
    }

    /// Commands with the token stripped, re-encoded.
    pub fn bodies(&self) -> Vec<String> {
        self.commands()
            .iter()
            .map(|p| {
                let mut out = Payload::new();
                for key in p.keys().filter(|k| *k != "tok") {
                    for value in p.get_all(key).unwrap_or_default() {
                        out.push(key, value.as_str());
                    }
                }
                out.encode()
            })
            .collect()
    }
}

/// Configuration with fast dispatch timing for tests.
#[allow(dead_code)]
pub fn fast_config(json: &str, retries: u32, timeout_secs: f64) -> ControllerConfig {
    let mut config = ControllerConfig::from_json(json).unwrap();
    config.dispatch.retries = retries;
    config.dispatch.timeout_secs = timeout_secs;
    config.dispatch.clock_interval_ms = 5;
    config.dispatch.wait_interval_ms = 5;
    config
}
