//! Console logger for the binary.
//!
//! Installs `env_logger` as the `log` backend, writing to stderr so stdout
//! stays free for the stdio bus.  Filters come from `FIELDCTL_LOG` using
//! the usual directive syntax (`info`, `warn,fieldctl::dispatch=debug`)
//! and default to `info`.

use env_logger::{Builder, Env, Target};
use log::SetLoggerError;

/// Environment variable holding the filter directives.
pub const LEVEL_ENV: &str = "FIELDCTL_LOG";

const DEFAULT_FILTER: &str = "info";

/// Logger builder with the controller's defaults applied.
pub fn builder() -> Builder {
    let mut builder = Builder::from_env(Env::new().filter_or(LEVEL_ENV, DEFAULT_FILTER));
    builder.target(Target::Stderr).format_timestamp_millis();
    builder
}

/// Install the console logger.  Fails if a logger is already set.
pub fn init() -> Result<(), SetLoggerError> {
    builder().try_init()
}
