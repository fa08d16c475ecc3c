//! Configuration schema definitions.
//!
//! This module defines the structure of the configuration file using serde.
//! All configuration sections are defined here with appropriate defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::error::{ConfigError, ConfigResult};
use crate::port::{IoMode, LineSettings, ReadMode, MIN_QUEUE_SIZE};
use crate::runtime::TransportConfig;
use crate::thread::ThreadPriority;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Transport timing and queue sizing
    pub transport: TransportSection,
    /// Managed thread defaults
    pub threads: ThreadsConfig,
    /// Serial line defaults
    pub serial: SerialConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Hardware testing configuration
    pub testing: TestingConfig,
}

impl Config {
    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> ConfigResult<()> {
        let t = &self.transport;
        for (key, size) in [
            ("transport.in_queue_size", t.in_queue_size),
            ("transport.out_queue_size", t.out_queue_size),
        ] {
            if size != 0 && size < MIN_QUEUE_SIZE {
                return Err(ConfigError::validation(
                    key,
                    format!("must be 0 or at least {MIN_QUEUE_SIZE}"),
                ));
            }
        }
        if t.rx_queue_capacity == 0 {
            return Err(ConfigError::validation(
                "transport.rx_queue_capacity",
                "must be greater than 0",
            ));
        }
        if t.poll_interval_ms == 0 {
            return Err(ConfigError::validation(
                "transport.poll_interval_ms",
                "must be greater than 0",
            ));
        }
        if self.threads.term_timeout_ms == 0 {
            return Err(ConfigError::validation(
                "threads.term_timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.serial.default_baud == 0 {
            return Err(ConfigError::validation(
                "serial.default_baud",
                "must be greater than 0",
            ));
        }
        for (name, settings) in &self.serial.port_defaults {
            if settings.validate().is_err() {
                return Err(ConfigError::validation(
                    format!("serial.port_defaults.{name}.baud_rate"),
                    "must be greater than 0",
                ));
            }
        }
        Ok(())
    }

    /// Runtime knobs to install with [`crate::runtime::initialize`].
    pub fn to_transport_config(&self) -> TransportConfig {
        let t = &self.transport;
        TransportConfig {
            settle_delay: Duration::from_millis(t.settle_delay_ms),
            cancel_yield: Duration::from_millis(t.cancel_yield_ms),
            poll_interval: Duration::from_millis(t.poll_interval_ms),
            term_timeout: Duration::from_millis(self.threads.term_timeout_ms),
            rx_queue_capacity: t.rx_queue_capacity,
            purge_drain_len: t.purge_drain_len,
            default_seed: self.threads.default_seed,
            port_defaults: self
                .serial
                .port_defaults
                .iter()
                .map(|(name, settings)| (self.serial.resolve_port(name), *settings))
                .collect(),
        }
    }
}

/// Transport configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    /// Pause after releasing a device on close
    pub settle_delay_ms: u64,
    /// Pause between cancelling I/O and releasing the device
    pub cancel_yield_ms: u64,
    /// Idle poll interval of the overlapped engine
    pub poll_interval_ms: u64,
    /// Receive queue capacity when no input queue size is given
    pub rx_queue_capacity: usize,
    /// Bytes drained by purge after discarding
    pub purge_drain_len: usize,
    /// Driver input queue size requested on open (0 = driver default)
    pub in_queue_size: usize,
    /// Driver output queue size requested on open (0 = driver default)
    pub out_queue_size: usize,
    /// Completion engine used on open
    pub io_mode: IoMode,
}

impl Default for TransportSection {
    fn default() -> Self {
        let defaults = TransportConfig::default();
        Self {
            settle_delay_ms: defaults.settle_delay.as_millis() as u64,
            cancel_yield_ms: defaults.cancel_yield.as_millis() as u64,
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
            rx_queue_capacity: defaults.rx_queue_capacity,
            purge_drain_len: defaults.purge_drain_len,
            in_queue_size: 0,
            out_queue_size: 0,
            io_mode: IoMode::Overlapped,
        }
    }
}

/// Managed thread configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadsConfig {
    /// How long to wait for a worker before abandoning it
    pub term_timeout_ms: u64,
    /// Seed of each worker's thread-local PRNG
    pub default_seed: u32,
    /// Priority of the event monitor thread
    pub monitor_priority: ThreadPriority,
}

impl Default for ThreadsConfig {
    fn default() -> Self {
        Self {
            term_timeout_ms: 1500,
            default_seed: 1,
            monitor_priority: ThreadPriority::Normal,
        }
    }
}

impl ThreadsConfig {
    pub fn term_timeout(&self) -> Duration {
        Duration::from_millis(self.term_timeout_ms)
    }
}

/// Serial port configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Default baud rate for new connections
    pub default_baud: u32,
    /// Default read/write timeout in milliseconds
    pub default_timeout_ms: u64,
    /// Read timeout policy applied after open
    pub read_mode: ReadMode,
    /// Port aliases for convenience
    pub port_aliases: BTreeMap<String, String>,
    /// Line settings applied whenever the named device is opened
    pub port_defaults: BTreeMap<String, LineSettings>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            default_baud: 9600,
            default_timeout_ms: 1000,
            read_mode: ReadMode::Nonblocking,
            port_aliases: BTreeMap::new(),
            port_defaults: BTreeMap::new(),
        }
    }
}

impl SerialConfig {
    /// Get the default timeout as Duration
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Resolve a port name through aliases
    pub fn resolve_port(&self, name: &str) -> String {
        self.port_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

/// Hardware testing configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestingConfig {
    /// Test port name
    pub port: Option<String>,
    /// Test baud rate
    pub baud: u32,
    /// Whether a loopback plug is fitted on the test port
    pub loopback_enabled: bool,
    /// Test timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for TestingConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud: 115200,
            loopback_enabled: false,
            timeout_ms: 2000,
        }
    }
}

impl TestingConfig {
    /// Get the test timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Log format: "json", "pretty", "compact"
    pub format: LogFormat,
    /// Append to this file instead of stderr
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Pretty format with colors
    #[default]
    Pretty,
    /// Compact format
    Compact,
}
