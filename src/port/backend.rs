//! Device backends.
//!
//! [`DeviceProvider`] opens named devices and probes their availability;
//! [`CommDriver`] is one open device. Both are implemented by the system
//! backend (real serial ports) and by the in-process loopback bus used in
//! tests, so the transport itself never touches an OS handle directly.

use std::fmt;
use std::io;
use std::sync::Arc;

use super::types::{Availability, Handshake, LineErrors, LineSettings, ModemStatus};

/// One open communication device.
///
/// Methods take `&self`: the transport calls into the driver concurrently from
/// the caller and from its I/O engine thread.
pub trait CommDriver: Send + Sync + fmt::Debug {
    /// Device name this driver was opened with.
    fn name(&self) -> &str;

    /// Copy queued input into `buf` without blocking; `Ok(0)` when nothing is queued.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Accept as much of `data` as the device can take right now.
    fn write(&self, data: &[u8]) -> io::Result<usize>;

    fn bytes_to_read(&self) -> io::Result<usize>;

    fn bytes_to_write(&self) -> io::Result<usize> {
        Ok(0)
    }

    fn set_line_settings(&self, settings: &LineSettings) -> io::Result<()>;

    fn line_settings(&self) -> io::Result<LineSettings>;

    fn set_flow_control(&self, handshake: Handshake) -> io::Result<()>;

    fn flow_control(&self) -> io::Result<Handshake>;

    fn set_dtr(&self, level: bool) -> io::Result<()>;

    fn set_rts(&self, level: bool) -> io::Result<()>;

    fn modem_status(&self) -> io::Result<ModemStatus>;

    fn set_break(&self) -> io::Result<()>;

    fn clear_break(&self) -> io::Result<()>;

    /// Discard queued input and output.
    fn clear_buffers(&self) -> io::Result<()>;

    /// Read and clear the driver's latched line errors.
    fn take_line_errors(&self) -> io::Result<LineErrors> {
        Ok(LineErrors::empty())
    }

    /// Request driver queue sizes; drivers without tunable queues accept any size.
    fn set_queue_sizes(&self, _input: usize, _output: usize) -> io::Result<()> {
        Ok(())
    }

    /// Release the device. Later calls fail with `NotConnected`.
    fn close(&self) -> io::Result<()>;
}

/// Factory for [`CommDriver`]s.
pub trait DeviceProvider: Send + Sync + fmt::Debug {
    /// Open `name` for exclusive use.
    fn open(&self, name: &str) -> io::Result<Arc<dyn CommDriver>>;

    /// Classify `name` without keeping it open.
    fn probe(&self, name: &str) -> Availability;

    /// Device name for a numeric port index.
    fn index_name(&self, index: u32) -> String {
        default_index_name(index)
    }
}

#[cfg(windows)]
pub(crate) fn default_index_name(index: u32) -> String {
    format!(r"\\.\COM{index}")
}

#[cfg(not(windows))]
pub(crate) fn default_index_name(index: u32) -> String {
    format!("/dev/ttyS{}", index.saturating_sub(1))
}

pub(crate) fn not_connected(name: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotConnected,
        format!("device {name} has been closed"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(windows))]
    #[test]
    fn test_index_names_are_one_based() {
        assert_eq!(default_index_name(1), "/dev/ttyS0");
        assert_eq!(default_index_name(4), "/dev/ttyS3");
    }

    #[cfg(windows)]
    #[test]
    fn test_index_names_use_device_namespace() {
        assert_eq!(default_index_name(12), r"\\.\COM12");
    }
}
