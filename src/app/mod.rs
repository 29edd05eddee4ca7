//! Application core.
//!
//! Rule evaluation, notifications, the status report and the shell
//! topic, plus the [`controller::Controller`] that wires them to a bus.
//! All I/O goes through the **port traits** in [`ports`], so the core runs
//! unchanged against a broker, stdio or an in-memory test bus.

pub mod controller;
pub mod engine;
pub mod events;
pub mod ports;
pub mod report;
pub mod shell;
