//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against the in-memory bus and a simulated node.  Everything runs on
//! the host with no broker or gateway required.

mod controller_tests;
mod dispatcher_tests;
mod engine_tests;
mod mock_bus;
