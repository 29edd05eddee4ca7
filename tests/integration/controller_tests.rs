//! Full controller on an in-memory bus: subscriptions, event pump,
//! shell topic and shutdown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fieldctl::adapters::clock::FixedClock;
use fieldctl::adapters::memory_bus::MemoryBus;
use fieldctl::app::controller::{Controller, Inbound};
use fieldctl::app::ports::Bus;
use fieldctl::wire::Payload;
use fieldctl::Error;

use super::mock_bus::{fast_config, NodeSim, Reply};

const CONFIG: &str = r#"{
    "accept": ["soil"],
    "node": {"3": "garden"},
    "symbols": {"cmd": {"1": "pump"}},
    "node_timeout": {"freq_secs": 60, "title": "node timeout"},
    "tick": {"freq_secs": 60},
    "rules": {"soil": [{
        "value": "moisture",
        "on": {"op": "<", "setpoint": 20, "cmd": "node=garden&cmd=pump&r=1&s=1"}
    }]},
    "report": {"node": {"garden": [{"label": "Moisture", "value": "moisture", "unit": "%"}]}}
}"#;

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn rig(policy: impl Fn(usize) -> Reply + Send + Sync + 'static) -> (Controller, NodeSim, Arc<MemoryBus>) {
    let config = fast_config(CONFIG, 1, 0.5);
    let bus = Arc::new(MemoryBus::new());
    let node = NodeSim::attach(&bus, &config, policy);
    let controller = Controller::new(&config, bus.clone(), Arc::new(FixedClock::at_hm(7, 30))).unwrap();
    controller.start().unwrap();
    (controller, node, bus)
}

fn bodies(bus: &MemoryBus) -> Vec<String> {
    bus.published("notify/sub")
        .iter()
        .map(|raw| Payload::decode(raw).unwrap().first("body").unwrap().to_owned())
        .collect()
}

#[test]
fn start_publishes_retained_config() {
    let (c, _, bus) = rig(|_| Reply::Ack);
    let retained = bus.router().retained("control/config").expect("config retained");
    let echoed: serde_json::Value = serde_json::from_str(&retained).unwrap();
    assert_eq!(echoed["node"]["3"], "garden");
    c.stop();
}

#[test]
fn telemetry_is_pumped_to_the_dispatcher() {
    // The ack arrives from another thread while the pump is blocked in send.
    let (c, node, bus) = rig(|_| Reply::AckAfter(Duration::from_millis(20)));
    bus.publish("serial/pub", "t=soil&node=3&moisture=9", false).unwrap();
    wait_until("pump command", || node.count() == 1);
    assert_eq!(node.bodies(), vec!["node=3&cmd=1&r=1&s=1"]);
    wait_until("ack settled", || c.dispatcher().pending() == 0);
    c.stop();
    assert_eq!(node.count(), 1, "acked command is not retried");
}

#[test]
fn telemetry_with_look_alike_fields_reaches_the_engine() {
    let (c, node, bus) = rig(|_| Reply::Ack);
    bus.publish("serial/pub", "t=soil&node=3&moisture=5&ptx=1&stok=2", false)
        .unwrap();
    wait_until("pump command", || node.count() == 1);
    assert_eq!(node.bodies(), vec!["node=3&cmd=1&r=1&s=1"]);
    c.stop();
}

#[test]
fn shell_report_request_publishes_note() {
    let (c, _, bus) = rig(|_| Reply::Ack);
    bus.publish("serial/pub", "t=soil&node=3&moisture=42", false).unwrap();
    bus.publish("control/command", "get=report", false).unwrap();
    wait_until("report note", || !bus.published("notify/sub").is_empty());
    let note = Payload::decode(&bus.published("notify/sub")[0]).unwrap();
    assert_eq!(note.first("type"), Some("note"));
    assert_eq!(note.first("title"), Some("Status report"));
    assert!(note.first("body").unwrap().contains("Moisture: 42 %"));
    c.stop();
}

#[test]
fn shell_command_is_forwarded() {
    let (c, node, bus) = rig(|_| Reply::Ack);
    bus.publish("control/command", "node=3&cmd=pump&r=2&s=0", false).unwrap();
    wait_until("forwarded command", || node.count() == 1);
    assert_eq!(node.bodies(), vec!["node=3&cmd=1&r=2&s=0"]);
    c.stop();
}

#[test]
fn tick_raises_liveness_alert_and_telemetry_clears_it() {
    let (c, _, bus) = rig(|_| Reply::Ack);
    bus.publish("control/tick", "ts=1777777777", false).unwrap();
    wait_until("timeout alert", || bodies(&bus).len() == 1);
    assert!(bodies(&bus)[0].starts_with("[garden] node timeout | 60 = 60 @ "));

    bus.publish("serial/pub", "t=soil&node=3&moisture=50", false).unwrap();
    wait_until("clear notice", || bodies(&bus).len() == 2);
    assert!(bodies(&bus)[1].contains("|CLEARED|"));
    c.stop();
}

#[test]
fn stop_unsubscribes_and_joins() {
    let (c, node, bus) = rig(|_| Reply::Ack);
    c.stop();
    assert!(c.stop_signal().is_triggered());
    assert_eq!(bus.router().subscriber_count("serial/pub"), 0);
    bus.publish("serial/pub", "t=soil&node=3&moisture=1", false).unwrap();
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(node.count(), 0);
    c.stop();
}

#[test]
fn enqueued_items_bypass_the_bus() {
    let (c, node, _) = rig(|_| Reply::Ack);
    assert!(c.enqueue(Inbound::Telemetry("t=soil&node=3&moisture=3".into())));
    wait_until("pump command", || node.count() == 1);
    c.stop();
}

#[test]
fn out_of_range_tick_is_a_config_error() {
    let mut config = fast_config(CONFIG, 1, 0.5);
    config.tick.freq_secs = 1e20;
    let bus = Arc::new(MemoryBus::new());
    let err = Controller::new(&config, bus, Arc::new(FixedClock::at_hm(7, 30)))
        .err()
        .expect("tick period rejected");
    assert!(matches!(err, Error::Config(_)), "{err}");
}
