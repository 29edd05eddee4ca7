//! RuleEngine driving the real dispatcher against a simulated node.

use std::sync::Arc;

use fieldctl::adapters::clock::FixedClock;
use fieldctl::adapters::memory_bus::MemoryBus;
use fieldctl::app::engine::RuleEngine;
use fieldctl::dispatch::{CommandDispatcher, TokenCodec};
use fieldctl::shutdown::StopSignal;
use fieldctl::wire::Payload;

use super::mock_bus::{fast_config, NodeSim, Reply};

const SOIL: &str = r#"{
    "accept": ["soil"],
    "node": {"3": "garden"},
    "rules": {
        "soil": [{
            "value": "moisture",
            "alert": {"op": "<", "setpoint": 15, "title": "dry soil"},
            "on": {"op": "<", "setpoint": 20, "cmd": "node=3&cmd=pump&r=1&s=1"},
            "off": {"op": ">", "setpoint": 50, "cmd": "node=3&cmd=pump&r=1&s=0"}
        }]
    }
}"#;

struct Rig {
    engine: RuleEngine,
    dispatcher: Arc<CommandDispatcher>,
    node: NodeSim,
    bus: Arc<MemoryBus>,
}

fn rig(json: &str, policy: impl Fn(usize) -> Reply + Send + Sync + 'static) -> Rig {
    let config = fast_config(json, 2, 0.05);
    let bus = Arc::new(MemoryBus::new());
    let node = NodeSim::attach(&bus, &config, policy);
    let dispatcher = Arc::new(CommandDispatcher::with_codec(
        &config,
        bus.clone(),
        Arc::new(StopSignal::new()),
        TokenCodec::with_salt(1),
    ));
    dispatcher.start().unwrap();
    let engine = RuleEngine::new(
        &config,
        dispatcher.clone(),
        bus.clone(),
        Arc::new(FixedClock::at_hm(10, 0)),
    )
    .unwrap();
    Rig {
        engine,
        dispatcher,
        node,
        bus,
    }
}

#[test]
fn soil_moisture_drives_the_pump() {
    let r = rig(SOIL, |_| Reply::Ack);
    for m in [40, 12, 30, 55] {
        r.engine.on_telemetry(&format!("t=soil&node=3&moisture={m}"));
    }
    assert_eq!(
        r.node.bodies(),
        vec!["node=3&cmd=pump&r=1&s=1", "node=3&cmd=pump&r=1&s=0"],
        "pump on once at 12, off at 55"
    );
    assert_eq!(r.dispatcher.pending(), 0);
    r.dispatcher.stop();
}

#[test]
fn dry_soil_alert_raises_and_clears_once() {
    let r = rig(SOIL, |_| Reply::Ack);
    for m in [12, 10, 30, 40] {
        r.engine.on_telemetry(&format!("t=soil&node=3&moisture={m}"));
    }
    let notes: Vec<String> = r
        .bus
        .published("notify/sub")
        .iter()
        .map(|raw| Payload::decode(raw).unwrap().first("body").unwrap().to_owned())
        .collect();
    assert_eq!(notes.len(), 2, "{notes:?}");
    assert!(notes[0].starts_with("[garden] dry soil | 12.0 < 15 @ "));
    assert!(notes[1].starts_with("[garden] dry soil |CLEARED| 30.0 < 15 @ "));
    assert_eq!(r.engine.alerts().active_count(), 0);
    r.dispatcher.stop();
}

#[test]
fn unacknowledged_command_does_not_block_later_rules() {
    let json = r#"{
        "accept": ["soil"],
        "node": {"3": "garden"},
        "rules": {
            "soil": [{"value": "moisture", "on": {"op": "<", "setpoint": 20, "cmd": "node=3&cmd=1&r=1&s=1"}}],
            "signal": [{"value": "rssi", "on": {"op": "<", "setpoint": -90, "cmd": "node=3&cmd=2&r=1&s=1"}}]
        }
    }"#;
    let r = rig(json, |_| Reply::Silent);
    r.engine
        .on_telemetry("t=soil&node=3&moisture=5&rssi=-95");
    let bodies = r.node.bodies();
    assert_eq!(bodies.len(), 6, "3 attempts for each rule");
    assert!(bodies[..3].iter().all(|b| b == "node=3&cmd=1&r=1&s=1"));
    assert!(bodies[3..].iter().all(|b| b == "node=3&cmd=2&r=1&s=1"));
    r.dispatcher.stop();
}

#[test]
fn unresolved_command_skips_rule_but_not_siblings() {
    let json = r#"{
        "accept": ["soil"],
        "node": {"3": "garden"},
        "symbols": {"cmd": {"1": "pump"}},
        "rules": {"soil": [
            {"value": "moisture", "on": {"op": "<", "setpoint": 20, "cmd": "node=3&cmd=valve&r=1&s=1"}},
            {"value": "moisture", "on": {"op": "<", "setpoint": 20, "cmd": "node=3&cmd=pump&r=1&s=1"}}
        ]}
    }"#;
    let r = rig(json, |_| Reply::Ack);
    r.engine.on_telemetry("t=soil&node=3&moisture=5");
    assert_eq!(r.node.bodies(), vec!["node=3&cmd=1&r=1&s=1"]);
    r.dispatcher.stop();
}
