//! System serial ports through the `serialport` crate.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::backend::{not_connected, CommDriver, DeviceProvider};
use super::error::{serialport_to_io, SerialResult};
use super::types::{Availability, Handshake, LineSettings, ModemStatus, Parity};

/// Bound on a single blocking call into the OS driver.
const IO_TIMEOUT: Duration = Duration::from_millis(10);

/// Device names currently held open by this process.
static OPEN_DEVICES: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Provider for the host's serial devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProvider;

impl DeviceProvider for SystemProvider {
    fn open(&self, name: &str) -> io::Result<Arc<dyn CommDriver>> {
        if !OPEN_DEVICES.lock().insert(name.to_string()) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{name} is already open in this process"),
            ));
        }

        let opened = serialport::new(name, LineSettings::default().baud_rate)
            .timeout(IO_TIMEOUT)
            .open();
        match opened {
            Ok(port) => {
                debug!(port = %name, "System port opened");
                Ok(Arc::new(SystemDriver {
                    name: name.to_string(),
                    port: Mutex::new(Some(port)),
                }))
            }
            Err(e) => {
                let err = serialport_to_io(e);
                OPEN_DEVICES.lock().remove(name);
                Err(err)
            }
        }
    }

    fn probe(&self, name: &str) -> Availability {
        if OPEN_DEVICES.lock().contains(name) {
            return Availability::InUse;
        }
        match serialport::new(name, LineSettings::default().baud_rate)
            .timeout(IO_TIMEOUT)
            .open()
        {
            Ok(port) => {
                drop(port);
                Availability::Available
            }
            Err(e) => classify_open_error(&serialport_to_io(e)),
        }
    }
}

fn classify_open_error(err: &io::Error) -> Availability {
    match err.kind() {
        io::ErrorKind::NotFound => return Availability::NotPresent,
        io::ErrorKind::PermissionDenied => return Availability::InUse,
        _ => {}
    }
    match err.raw_os_error() {
        Some(code) if is_absent_code(code) => Availability::NotPresent,
        Some(code) if is_busy_code(code) => Availability::InUse,
        _ => Availability::UnknownError,
    }
}

#[cfg(unix)]
fn is_absent_code(code: i32) -> bool {
    [libc::ENOENT, libc::ENODEV, libc::ENXIO].contains(&code)
}

#[cfg(unix)]
fn is_busy_code(code: i32) -> bool {
    [libc::EBUSY, libc::EACCES, libc::EPERM].contains(&code)
}

#[cfg(windows)]
fn is_absent_code(code: i32) -> bool {
    use winapi::shared::winerror::{ERROR_FILE_NOT_FOUND, ERROR_PATH_NOT_FOUND};
    [ERROR_FILE_NOT_FOUND, ERROR_PATH_NOT_FOUND].contains(&(code as u32))
}

#[cfg(windows)]
fn is_busy_code(code: i32) -> bool {
    use winapi::shared::winerror::{ERROR_ACCESS_DENIED, ERROR_SHARING_VIOLATION};
    [ERROR_ACCESS_DENIED, ERROR_SHARING_VIOLATION].contains(&(code as u32))
}

#[cfg(not(any(unix, windows)))]
fn is_absent_code(_code: i32) -> bool {
    false
}

#[cfg(not(any(unix, windows)))]
fn is_busy_code(_code: i32) -> bool {
    false
}

/// Open system port.
pub struct SystemDriver {
    name: String,
    port: Mutex<Option<Box<dyn serialport::SerialPort>>>,
}

impl SystemDriver {
    fn with_port<T>(
        &self,
        f: impl FnOnce(&mut dyn serialport::SerialPort) -> serialport::Result<T>,
    ) -> io::Result<T> {
        let mut guard = self.port.lock();
        let port = guard.as_mut().ok_or_else(|| not_connected(&self.name))?;
        f(port.as_mut()).map_err(serialport_to_io)
    }

    fn release(&self) {
        if self.port.lock().take().is_some() {
            OPEN_DEVICES.lock().remove(&self.name);
            debug!(port = %self.name, "System port released");
        }
    }
}

fn is_would_block(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

impl CommDriver for SystemDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self.port.lock();
        let port = guard.as_mut().ok_or_else(|| not_connected(&self.name))?;
        let queued = port.bytes_to_read().map_err(serialport_to_io)? as usize;
        if queued == 0 || buf.is_empty() {
            return Ok(0);
        }
        let len = queued.min(buf.len());
        match port.read(&mut buf[..len]) {
            Ok(n) => Ok(n),
            Err(e) if is_would_block(&e) => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write(&self, data: &[u8]) -> io::Result<usize> {
        let mut guard = self.port.lock();
        let port = guard.as_mut().ok_or_else(|| not_connected(&self.name))?;
        match port.write(data) {
            Ok(n) => Ok(n),
            Err(e) if is_would_block(&e) => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn bytes_to_read(&self) -> io::Result<usize> {
        self.with_port(|p| p.bytes_to_read()).map(|n| n as usize)
    }

    fn bytes_to_write(&self) -> io::Result<usize> {
        self.with_port(|p| p.bytes_to_write()).map(|n| n as usize)
    }

    fn set_line_settings(&self, settings: &LineSettings) -> io::Result<()> {
        let parity = match settings.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
            Parity::Mark | Parity::Space => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "mark/space parity is not supported by the system backend",
                ))
            }
        };
        self.with_port(|p| {
            p.set_baud_rate(settings.baud_rate)?;
            p.set_data_bits(settings.data_bits.into())?;
            p.set_parity(parity)?;
            p.set_stop_bits(settings.stop_bits.into())
        })
    }

    fn line_settings(&self) -> io::Result<LineSettings> {
        self.with_port(|p| {
            let parity = match p.parity()? {
                serialport::Parity::None => Parity::None,
                serialport::Parity::Odd => Parity::Odd,
                serialport::Parity::Even => Parity::Even,
            };
            Ok(LineSettings {
                baud_rate: p.baud_rate()?,
                data_bits: p.data_bits()?.into(),
                parity,
                stop_bits: p.stop_bits()?.into(),
            })
        })
    }

    fn set_flow_control(&self, handshake: Handshake) -> io::Result<()> {
        self.with_port(|p| p.set_flow_control(handshake.into()))
    }

    fn flow_control(&self) -> io::Result<Handshake> {
        self.with_port(|p| p.flow_control()).map(Handshake::from)
    }

    fn set_dtr(&self, level: bool) -> io::Result<()> {
        self.with_port(|p| p.write_data_terminal_ready(level))
    }

    fn set_rts(&self, level: bool) -> io::Result<()> {
        self.with_port(|p| p.write_request_to_send(level))
    }

    fn modem_status(&self) -> io::Result<ModemStatus> {
        self.with_port(|p| {
            Ok(ModemStatus {
                cts: p.read_clear_to_send()?,
                dsr: p.read_data_set_ready()?,
                ring: p.read_ring_indicator()?,
                rlsd: p.read_carrier_detect()?,
            })
        })
    }

    fn set_break(&self) -> io::Result<()> {
        self.with_port(|p| p.set_break())
    }

    fn clear_break(&self) -> io::Result<()> {
        self.with_port(|p| p.clear_break())
    }

    fn clear_buffers(&self) -> io::Result<()> {
        self.with_port(|p| p.clear(serialport::ClearBuffer::All))
    }

    fn close(&self) -> io::Result<()> {
        self.release();
        Ok(())
    }
}

impl Drop for SystemDriver {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for SystemDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemDriver")
            .field("name", &self.name)
            .field("open", &self.port.lock().is_some())
            .finish()
    }
}

/// A serial device reported by the operating system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    pub name: String,
    pub transport: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
}

/// Enumerate the host's serial devices.
pub fn available_ports() -> SerialResult<Vec<PortInfo>> {
    use serialport::SerialPortType;

    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let mut info = PortInfo {
                name: p.port_name,
                transport: "unknown",
                vid: None,
                pid: None,
                manufacturer: None,
                product: None,
            };
            match p.port_type {
                SerialPortType::UsbPort(usb) => {
                    info.transport = "usb";
                    info.vid = Some(usb.vid);
                    info.pid = Some(usb.pid);
                    info.manufacturer = usb.manufacturer;
                    info.product = usb.product;
                }
                SerialPortType::BluetoothPort => info.transport = "bluetooth",
                SerialPortType::PciPort => info.transport = "pci",
                SerialPortType::Unknown => {}
            }
            info
        })
        .collect())
}
