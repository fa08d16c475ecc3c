//! Serial Transport Library
//!
//! A timeout-bounded byte transport over serial communication devices, with
//! comm-event notification, explicit cancellation, and the synchronization
//! and managed-thread primitives it is built on.
//!
//! # Modules
//!
//! - `sync`: Events, mutexes, semaphores, critical sections and multi-object waits
//! - `thread`: Managed worker threads with cooperative and escalated termination
//! - `port`: The serial transport, its backends and value types
//! - `runtime`: Process-wide transport configuration
//! - `config`: Configuration management with TOML support
//! - `logging`: Tracing subscriber setup
//!
//! # Example
//!
//! ```
//! use serial_transport::port::{IoMode, LoopbackBus, SerialPort};
//! use serial_transport::sync::Timeout;
//! use std::sync::Arc;
//!
//! let bus = LoopbackBus::new();
//! bus.add_device("LOOP1");
//! let port = SerialPort::with_provider(Arc::new(bus));
//!
//! port.open("LOOP1", 0, 0, IoMode::Overlapped).unwrap();
//! assert_eq!(port.write(b"hi", Timeout::from_millis(100)).unwrap(), 2);
//! ```

pub mod config;
pub mod logging;
pub mod port;
pub mod runtime;
pub mod sync;
pub mod thread;

// Re-export commonly used types for convenience
pub use port::{
    Availability, DataBits, EventMask, EventMonitor, Handshake, IoMode, LineErrors, LineSettings,
    Parity, PortId, ReadMode, SerialError, SerialPort, SerialResult, StopBits,
};
pub use runtime::{RuntimeGuard, TransportConfig};
pub use sync::Timeout;
pub use thread::{ManagedThread, ThreadContext, ThreadError, ThreadPriority};

#[cfg(feature = "async-io")]
pub use port::AsyncSerialPort;
