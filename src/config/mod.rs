//! Configuration for the serial transport.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `SERIAL_TRANSPORT_CONFIG` environment variable (explicit path)
//! 2. `./serial-transport.toml` (current directory)
//! 3. `serial-transport.toml` in the platform configuration directory
//! 4. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! Operational knobs can be overridden via environment variables named
//! `SERIAL_TRANSPORT_<SECTION>_<KEY>`:
//! - `SERIAL_TRANSPORT_TRANSPORT_SETTLE_DELAY_MS=50`
//! - `SERIAL_TRANSPORT_THREADS_TERM_TIMEOUT_MS=3000`
//! - `SERIAL_TRANSPORT_SERIAL_DEFAULT_BAUD=115200`
//! - `SERIAL_TRANSPORT_LOGGING_LEVEL=debug`
//! - `SERIAL_TRANSPORT_TESTING_PORT=COM15`
//!
//! Legacy `TEST_PORT`, `TEST_BAUD`, `TEST_TIMEOUT` and `TEST_LOOPBACK`
//! are also read.
//!
//! # Example
//!
//! ```rust,no_run
//! use serial_transport::config::ConfigLoader;
//! use serial_transport::runtime;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let loader = ConfigLoader::load()?;
//! let _guard = runtime::initialize(loader.config().to_transport_config())?;
//! # Ok(())
//! # }
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader,
    CONFIG_PATH_ENV, ENV_PREFIX,
};
pub use schema::{
    Config, LogFormat, LoggingConfig, SerialConfig, TestingConfig, ThreadsConfig,
    TransportSection,
};
