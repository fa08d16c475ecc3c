//! Property tests for configuration read-back and loopback transfer.

mod common;

use common::{fast_runtime, open_loopback, read_exactly};
use proptest::prelude::*;
use serial_test::serial;
use serial_transport::port::{DataBits, IoMode, LineSettings, Parity, StopBits};
use serial_transport::sync::Timeout;
use std::time::Duration;

fn data_bits() -> impl Strategy<Value = DataBits> {
    prop_oneof![
        Just(DataBits::Five),
        Just(DataBits::Six),
        Just(DataBits::Seven),
        Just(DataBits::Eight),
    ]
}

fn parity() -> impl Strategy<Value = Parity> {
    prop_oneof![
        Just(Parity::None),
        Just(Parity::Odd),
        Just(Parity::Even),
        Just(Parity::Mark),
        Just(Parity::Space),
    ]
}

fn stop_bits() -> impl Strategy<Value = StopBits> {
    prop_oneof![Just(StopBits::One), Just(StopBits::Two)]
}

#[test]
#[serial]
fn setup_then_read_back_returns_same_settings() {
    let _rt = fast_runtime();
    let (port, _device) = open_loopback("PROP0", IoMode::Synchronous);

    proptest!(ProptestConfig::with_cases(64), |(
        baud in 1u32..4_000_000,
        bits in data_bits(),
        par in parity(),
        stop in stop_bits(),
        dtr in any::<bool>(),
        rts in any::<bool>(),
    )| {
        port.setup(baud, bits, par, stop, dtr, rts).unwrap();

        prop_assert_eq!(
            port.line_settings().unwrap(),
            LineSettings::new(baud, bits, par, stop)
        );
        prop_assert_eq!(port.dtr(), dtr);
        prop_assert_eq!(port.rts(), rts);
    });
}

#[test]
#[serial]
fn loopback_delivers_written_bytes_in_order() {
    let _rt = fast_runtime();
    let (sync_port, _d1) = open_loopback("PROP1", IoMode::Synchronous);
    let (overlapped_port, _d2) = open_loopback("PROP2", IoMode::Overlapped);

    proptest!(ProptestConfig::with_cases(32), |(
        payload in proptest::collection::vec(any::<u8>(), 1..512),
    )| {
        for port in [&sync_port, &overlapped_port] {
            let written = port.write(&payload, Timeout::from_millis(500)).unwrap();
            prop_assert_eq!(written, payload.len());

            let echoed = read_exactly(port, payload.len(), Duration::from_secs(2));
            prop_assert_eq!(&echoed, &payload);
        }
    });
}
