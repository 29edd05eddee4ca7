//! fieldctl library.
//!
//! Rule evaluation, alert tracking, node liveness and reliable command
//! dispatch for a field-automation controller.  The transport and the
//! clock are port traits ([`app::ports`]); the adapters in [`adapters`]
//! provide in-memory, stdio and system implementations.

#![deny(unused_must_use)]

pub mod adapters;
pub mod alerts;
pub mod app;
pub mod config;
pub mod dispatch;
pub mod liveness;
pub mod rules;
pub mod shutdown;
pub mod wire;

mod error;
mod task;

pub use error::{Error, Result};
