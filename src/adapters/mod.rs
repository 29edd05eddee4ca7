//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter       | Implements | Connects to                       |
//! |---------------|------------|-----------------------------------|
//! | `memory_bus`  | Bus        | In-process loopback (tests, sim)  |
//! | `stdio_bus`   | Bus        | `<topic> <payload>` lines on stdio|
//! | `clock`       | Clock      | Local system time / fixed time    |
//! | `console_log` | log        | env_logger on stderr              |

pub mod clock;
pub mod console_log;
pub mod memory_bus;
pub mod stdio_bus;
