//! Serial transport layer.
//!
//! [`SerialPort`] is the transport. It talks to devices through the
//! [`DeviceProvider`]/[`CommDriver`] backend traits, implemented for host
//! serial devices by [`SystemProvider`] and in-process by [`LoopbackBus`],
//! enabling dependency injection and testing without hardware.

pub mod backend;
pub(crate) mod engine;
pub mod error;
pub(crate) mod events;
pub mod loopback;
pub mod monitor;
pub mod serial;
pub mod system;
pub mod types;

#[cfg(feature = "async-io")]
pub mod async_port;

pub use backend::{CommDriver, DeviceProvider};
pub use error::{translate_os_error, SerialError, SerialResult};
pub use loopback::{LoopbackBus, LoopbackDevice};
pub use monitor::EventMonitor;
pub use serial::{SerialPort, MIN_QUEUE_SIZE};
pub use system::{available_ports, PortInfo, SystemProvider};
pub use types::{
    Availability, DataBits, EventMask, Handshake, IoMode, LineErrors, LineSettings, ModemStatus,
    Parity, PortId, ReadMode, StopBits,
};

#[cfg(feature = "async-io")]
pub use async_port::AsyncSerialPort;
