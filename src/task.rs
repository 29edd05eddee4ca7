//! Named background threads.
//!
//! Every long-lived loop in the controller (dispatcher clock, event pump,
//! tick generator) is spawned through [`spawn_named`] so thread names show
//! up in panics and debuggers, and spawn failures surface as
//! [`Error::Init`] instead of aborting.

use std::thread::JoinHandle;

use crate::error::{Error, Result};

const STACK_KB: usize = 256;

pub fn spawn_named(name: &'static str, f: impl FnOnce() + Send + 'static) -> Result<JoinHandle<()>> {
    log::debug!("task: spawning '{name}' (stack={STACK_KB}KB)");
    std::thread::Builder::new()
        .name(name.into())
        .stack_size(STACK_KB * 1024)
        .spawn(f)
        .map_err(|e| Error::Init(format!("spawn {name}: {e}")))
}

/// Join a task, logging rather than propagating a panic.
pub fn join_logged(name: &str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        log::error!("task: '{name}' panicked");
    }
}
