//! Integration tests for the ack/retry protocol of `CommandDispatcher`
//! against a simulated node on an in-memory bus.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fieldctl::adapters::memory_bus::MemoryBus;
use fieldctl::dispatch::{CommandDispatcher, CommandResult, TokenCodec};
use fieldctl::shutdown::StopSignal;

use super::mock_bus::{fast_config, NodeSim, Reply};

const CONFIG: &str = r#"{
    "node": {"3": "garden"},
    "symbols": {"cmd": {"1": "pump", "2": "light"}}
}"#;

fn rig(
    retries: u32,
    timeout_secs: f64,
    policy: impl Fn(usize) -> Reply + Send + Sync + 'static,
) -> (CommandDispatcher, NodeSim, Arc<MemoryBus>) {
    let config = fast_config(CONFIG, retries, timeout_secs);
    let bus = Arc::new(MemoryBus::new());
    let node = NodeSim::attach(&bus, &config, policy);
    let dispatcher = CommandDispatcher::with_codec(
        &config,
        bus.clone(),
        Arc::new(StopSignal::new()),
        TokenCodec::with_salt(0x5eed),
    );
    dispatcher.start().unwrap();
    (dispatcher, node, bus)
}

// ── Delivery outcomes ─────────────────────────────────────────

#[test]
fn immediate_ack_uses_exactly_one_token() {
    let (d, node, _) = rig(2, 0.5, |_| Reply::Ack);
    assert_eq!(d.send("node=3&cmd=1&r=1&s=1").unwrap(), CommandResult::Ack);
    assert_eq!(node.count(), 1);
    assert_eq!(d.pending(), 0);
    d.stop();
}

#[test]
fn silent_node_exhausts_every_attempt() {
    let (d, node, _) = rig(2, 0.05, |_| Reply::Silent);
    assert_eq!(d.send("node=3&cmd=1&r=1&s=1").unwrap(), CommandResult::Timeout);
    assert_eq!(node.count(), 3, "retries + 1 attempts");
    let tokens: HashSet<_> = node.tokens().into_iter().collect();
    assert_eq!(tokens.len(), 3, "fresh token per attempt");
    assert_eq!(d.pending(), 0, "no leaked tokens");
    d.stop();
}

#[test]
fn pending_reports_do_not_end_the_wait() {
    let (d, node, _) = rig(0, 0.05, |_| Reply::Pending);
    assert_eq!(d.send("node=3&cmd=1&r=1&s=1").unwrap(), CommandResult::Timeout);
    assert_eq!(node.count(), 1);
    d.stop();
}

#[test]
fn nack_is_retried_until_ack() {
    let (d, node, _) = rig(2, 0.5, |n| if n == 1 { Reply::Nack } else { Reply::Ack });
    assert_eq!(d.send("node=3&cmd=1&r=1&s=1").unwrap(), CommandResult::Ack);
    assert_eq!(node.count(), 2);
    d.stop();
}

#[test]
fn persistent_nack_is_reported() {
    let (d, node, _) = rig(1, 0.5, |_| Reply::Nack);
    assert_eq!(d.send("node=3&cmd=1&r=1&s=1").unwrap(), CommandResult::Nack);
    assert_eq!(node.count(), 2);
    d.stop();
}

#[test]
fn ack_from_another_thread_wakes_the_sender() {
    let (d, node, _) = rig(0, 2.0, |_| Reply::AckAfter(Duration::from_millis(30)));
    let start = Instant::now();
    assert_eq!(d.send("node=3&cmd=1&r=1&s=1").unwrap(), CommandResult::Ack);
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(node.count(), 1);
    d.stop();
}

#[test]
fn late_ack_for_expired_token_is_discarded() {
    let (d, node, _) = rig(0, 0.03, |_| Reply::Silent);
    assert_eq!(d.send("node=3&cmd=1&r=1&s=1").unwrap(), CommandResult::Timeout);
    let token = &node.tokens()[0];
    assert!(!d.on_inbound(&format!("tok={token}&tx=ack")));
    assert_eq!(d.pending(), 0);
    d.stop();
}

// ── Template resolution ───────────────────────────────────────

#[test]
fn symbolic_template_is_resolved_before_publish() {
    let (d, node, _) = rig(0, 0.5, |_| Reply::Ack);
    d.send("node=garden&cmd=pump&r=1&s=1").unwrap();
    assert_eq!(node.bodies(), vec!["node=3&cmd=1&r=1&s=1"]);
    d.stop();
}

#[test]
fn unresolved_symbol_is_not_retried() {
    let (d, node, _) = rig(5, 0.05, |_| Reply::Ack);
    assert!(d.send("node=garden&cmd=sprinkler&r=1&s=1").is_err());
    assert_eq!(node.count(), 0);
    d.stop();
}

// ── Concurrency and shutdown ──────────────────────────────────

#[test]
fn concurrent_senders_get_independent_tokens() {
    let (d, node, _) = rig(0, 1.0, |_| Reply::AckAfter(Duration::from_millis(10)));
    let d = Arc::new(d);
    let workers: Vec<_> = (0..4)
        .map(|i| {
            let d = d.clone();
            std::thread::spawn(move || d.send(&format!("node=3&cmd=1&r={i}&s=1")).unwrap())
        })
        .collect();
    for w in workers {
        assert_eq!(w.join().unwrap(), CommandResult::Ack);
    }
    let tokens: HashSet<_> = node.tokens().into_iter().collect();
    assert_eq!(tokens.len(), 4);
    assert_eq!(d.pending(), 0);
    d.stop();
}

#[test]
fn stop_releases_in_flight_send_without_retry() {
    let (d, node, _) = rig(3, 30.0, |_| Reply::Silent);
    let d = Arc::new(d);
    let sender = {
        let d = d.clone();
        std::thread::spawn(move || {
            let start = Instant::now();
            (d.send("node=3&cmd=1&r=1&s=1").unwrap(), start.elapsed())
        })
    };
    std::thread::sleep(Duration::from_millis(50));
    d.stop();
    let (result, waited) = sender.join().unwrap();
    assert_eq!(result, CommandResult::Timeout);
    assert!(waited < Duration::from_secs(5));
    assert_eq!(node.count(), 1, "no retry after stop");
    assert_eq!(d.pending(), 0);
}
