//! Utility functions for hardware testing.
//!
//! Provides helpers for port discovery, test setup/teardown, and timing utilities.

#![allow(dead_code)]

use serial_transport::config::ConfigLoader;
use serial_transport::port::{
    available_ports, DataBits, IoMode, Parity, PortInfo, SerialPort, StopBits,
};
use serial_transport::sync::Timeout;
use std::time::{Duration, Instant};

/// Hardware test settings from the `[testing]` config section.
///
/// `TEST_PORT`, `TEST_BAUD` and `TEST_LOOPBACK` override the file.
pub struct TestPortConfig {
    pub port_name: String,
    pub baud_rate: u32,
    pub loopback_enabled: bool,
    pub timeout: Timeout,
}

impl TestPortConfig {
    /// `None` when no test port is configured.
    pub fn from_env() -> Option<Self> {
        let testing = match ConfigLoader::load() {
            Ok(loader) => loader.into_config().testing,
            Err(e) => {
                println!("Ignoring unusable configuration: {}", e);
                return None;
            }
        };

        Some(TestPortConfig {
            port_name: testing.port?,
            baud_rate: testing.baud,
            loopback_enabled: testing.loopback_enabled,
            timeout: Timeout::from_millis(u32::try_from(testing.timeout_ms).unwrap_or(u32::MAX)),
        })
    }
}

/// Print available ports for debugging.
pub fn print_available_ports() {
    let ports = available_ports().unwrap_or_default();

    if ports.is_empty() {
        println!("No serial ports detected on this system");
        return;
    }

    println!("Available serial ports ({}):", ports.len());
    for (idx, port) in ports.iter().enumerate() {
        println!("  {}. {} ({})", idx + 1, port.name, port.transport);
        if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            println!("     VID:PID = {:04x}:{:04x}", vid, pid);
        }
        if let Some(ref manufacturer) = port.manufacturer {
            println!("     Manufacturer: {}", manufacturer);
        }
    }
}

/// Get port info for a specific port.
pub fn get_port_info(port_name: &str) -> Option<PortInfo> {
    available_ports()
        .unwrap_or_default()
        .into_iter()
        .find(|p| p.name == port_name)
}

/// Timing helper for measuring operation duration.
pub struct TimingHelper {
    start: Instant,
    name: String,
}

impl TimingHelper {
    pub fn new(name: &str) -> Self {
        println!("Starting: {}", name);
        TimingHelper {
            start: Instant::now(),
            name: name.to_string(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn finish(self) -> Duration {
        let elapsed = self.elapsed();
        println!("Completed: {} in {:?}", self.name, elapsed);
        elapsed
    }
}

/// Test fixture holding an open, configured hardware port.
pub struct PortTestFixture {
    pub port: SerialPort,
    pub config: TestPortConfig,
}

impl PortTestFixture {
    /// Open the port named by `TEST_PORT` in `mode`.
    pub fn setup(mode: IoMode) -> Option<Self> {
        let config = TestPortConfig::from_env()?;

        println!(
            "Setting up test fixture for {} at {} baud",
            config.port_name, config.baud_rate
        );

        let port = SerialPort::new();
        if let Err(e) = port.open(config.port_name.as_str(), 0, 0, mode) {
            println!("Failed to open port: {}", e);
            return None;
        }
        if let Err(e) = port.setup(
            config.baud_rate,
            DataBits::Eight,
            Parity::None,
            StopBits::One,
            true,
            true,
        ) {
            println!("Failed to configure port: {}", e);
            return None;
        }

        Some(PortTestFixture { port, config })
    }
}

impl Drop for PortTestFixture {
    fn drop(&mut self) {
        let _ = self.port.close();
    }
}
