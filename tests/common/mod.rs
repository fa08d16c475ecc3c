//! Shared test utilities for the serial transport tests.
//!
//! This module provides common test infrastructure including:
//! - Loopback ports that need no hardware
//! - A fast-settling runtime configuration
//! - Polling helpers for asynchronous completion

#![allow(dead_code)]

use serial_transport::port::{IoMode, LoopbackBus, LoopbackDevice, SerialPort};
use serial_transport::runtime::{self, RuntimeGuard, TransportConfig};
use serial_transport::sync::Timeout;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Runtime timings short enough for tests.
pub fn fast_config() -> TransportConfig {
    TransportConfig {
        settle_delay: Duration::from_millis(20),
        cancel_yield: Duration::from_millis(1),
        term_timeout: Duration::from_millis(300),
        ..TransportConfig::default()
    }
}

/// Install `fast_config`. Callers must be `#[serial]`.
pub fn fast_runtime() -> RuntimeGuard {
    runtime::initialize(fast_config()).expect("runtime already initialized")
}

/// A port on a fresh bus with one device named `name`.
pub fn loopback_port(name: &str) -> (Arc<SerialPort>, Arc<LoopbackDevice>, LoopbackBus) {
    let bus = LoopbackBus::new();
    let device = bus.add_device(name);
    let port = Arc::new(SerialPort::with_provider(Arc::new(bus.clone())));
    (port, device, bus)
}

/// A loopback port already opened in `mode`.
pub fn open_loopback(name: &str, mode: IoMode) -> (Arc<SerialPort>, Arc<LoopbackDevice>) {
    let (port, device, _bus) = loopback_port(name);
    port.open(name, 0, 0, mode).expect("loopback open failed");
    (port, device)
}

/// Read until `len` bytes arrived or `within` elapsed.
pub fn read_exactly(port: &SerialPort, len: usize, within: Duration) -> Vec<u8> {
    let deadline = Instant::now() + within;
    let mut out = Vec::with_capacity(len);
    let mut buf = vec![0u8; len];
    while out.len() < len && Instant::now() < deadline {
        let n = port
            .read(&mut buf[..len - out.len()], Timeout::from_millis(20))
            .expect("read failed");
        out.extend_from_slice(&buf[..n]);
        if n == 0 {
            std::thread::sleep(Duration::from_millis(2));
        }
    }
    out
}

/// Poll `cond` until it holds or `within` elapses.
pub fn wait_until(within: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}
