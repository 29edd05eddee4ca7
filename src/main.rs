//! fieldctl: controller entry point.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  stdin  "<topic> <payload>" ──▶ StdioBus ──▶ stdout         │
//! │                                   │  ▲                      │
//! │  ──────────── Port Trait Boundary ┼──┼──────────────        │
//! │                                   ▼  │                      │
//! │  Controller ── event pump ── RuleEngine ── CommandDispatcher │
//! │            └─ tick generator                                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `fieldctl <config.json>`.  Runs until stdin closes.

#![deny(unused_must_use)]

use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;

use fieldctl::adapters::clock::SystemClock;
use fieldctl::adapters::console_log;
use fieldctl::adapters::stdio_bus::StdioBus;
use fieldctl::app::controller::Controller;
use fieldctl::config::ControllerConfig;

fn main() -> Result<()> {
    console_log::init().context("installing logger")?;

    let path = std::env::args()
        .nth(1)
        .context("usage: fieldctl <config.json>")?;
    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    let config = ControllerConfig::from_json(&raw).with_context(|| format!("loading {path}"))?;
    // Publish the operator's document, compacted onto one line.
    let compact = serde_json::from_str::<serde_json::Value>(&raw)
        .with_context(|| format!("parsing {path}"))?
        .to_string();

    let bus = Arc::new(StdioBus::stdout());
    let controller =
        Controller::new(&config, bus.clone(), Arc::new(SystemClock))?.with_config_text(compact);
    controller.start()?;
    info!("fieldctl: reading `<topic> <payload>` lines from stdin");

    let lines = bus.pump(std::io::stdin().lock())?;
    info!("fieldctl: input closed after {lines} lines, shutting down");
    controller.stop();
    bus.close();
    Ok(())
}
