//! Tests requiring actual serial hardware.
//!
//! These tests are skipped if no hardware is available.
//!
//! # Running Hardware Tests
//!
//! ```bash
//! # Set environment variables
//! export TEST_PORT=COM3                  # or /dev/ttyUSB0 on Linux
//! export TEST_BAUD=115200                # optional, default: 115200
//! export TEST_LOOPBACK=1                 # if port has TX-RX loopback
//!
//! # Run tests
//! cargo test --features hardware-tests -- --ignored
//! ```

use super::utils::{print_available_ports, PortTestFixture, TimingHelper};
use serial_transport::port::{Availability, EventMask, IoMode, ReadMode, SerialPort};
use serial_transport::sync::Timeout;
use std::time::{Duration, Instant};

fn loopback_fixture(mode: IoMode) -> Option<PortTestFixture> {
    let fixture = PortTestFixture::setup(mode)?;
    if !fixture.config.loopback_enabled {
        println!("Skipping: TEST_LOOPBACK not set");
        return None;
    }
    Some(fixture)
}

fn read_back(port: &SerialPort, len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; len];
    let deadline = Instant::now() + Duration::from_secs(2);
    while out.len() < len && Instant::now() < deadline {
        let n = port
            .read(&mut buf[..len - out.len()], Timeout::from_millis(100))
            .unwrap();
        out.extend_from_slice(&buf[..n]);
    }
    out
}

#[test]
#[ignore] // Run with --ignored flag
fn test_real_port_open_close() {
    print_available_ports();
    let Some(fixture) = PortTestFixture::setup(IoMode::Overlapped) else {
        println!("Skipping hardware test: TEST_PORT not set or unavailable");
        return;
    };

    assert!(fixture.port.is_open());
    assert_eq!(
        fixture.port.name().as_deref(),
        Some(fixture.config.port_name.as_str())
    );
    assert_eq!(
        SerialPort::check_port(&fixture.config.port_name),
        Availability::InUse
    );

    let timing = TimingHelper::new("close with settling delay");
    fixture.port.close().unwrap();
    assert!(timing.finish() >= Duration::from_millis(100));
}

#[test]
#[ignore]
fn test_real_port_loopback_round_trip() {
    for mode in [IoMode::Overlapped, IoMode::Synchronous] {
        let Some(fixture) = loopback_fixture(mode) else {
            return;
        };
        fixture.port.purge().unwrap();

        let payload = b"The quick brown fox\r\n";
        let written = fixture.port.write(payload, fixture.config.timeout).unwrap();
        assert_eq!(written, payload.len());

        assert_eq!(read_back(&fixture.port, payload.len()), payload);
    }
}

#[test]
#[ignore]
fn test_real_port_timeout_behavior() {
    let Some(fixture) = PortTestFixture::setup(IoMode::Overlapped) else {
        return;
    };
    fixture.port.purge().unwrap();
    fixture.port.set_read_mode(ReadMode::Blocking).unwrap();

    let mut buf = [0u8; 64];
    let started = Instant::now();
    let n = fixture.port.read(&mut buf, Timeout::from_millis(200)).unwrap();

    assert_eq!(n, 0);
    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[test]
#[ignore]
fn test_real_port_rx_event() {
    let Some(fixture) = loopback_fixture(IoMode::Overlapped) else {
        return;
    };
    fixture.port.purge().unwrap();
    fixture.port.comm_event_wait_initiate().unwrap();

    fixture.port.write(b"!", Timeout::from_millis(500)).unwrap();

    fixture
        .port
        .wait_for_comm_event(Timeout::from_millis(2000))
        .unwrap();
    assert!(fixture.port.event_type().contains(EventMask::RX_CHAR));
}

#[test]
#[ignore]
fn test_real_port_multiple_open_close() {
    let Some(fixture) = PortTestFixture::setup(IoMode::Overlapped) else {
        return;
    };
    let name = fixture.config.port_name.clone();
    drop(fixture);

    let port = SerialPort::new();
    for cycle in 0..5 {
        port.open(name.as_str(), 0, 0, IoMode::Overlapped)
            .unwrap_or_else(|e| panic!("open failed on cycle {cycle}: {e}"));
        port.close().unwrap();
    }
}
