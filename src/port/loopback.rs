//! In-process loopback devices for exercising the transport without hardware.
//!
//! A [`LoopbackBus`] is a [`DeviceProvider`] holding named
//! [`LoopbackDevice`]s. Each device behaves like a port fitted with a
//! loopback plug: transmitted bytes reappear on its input, RTS drives CTS and
//! DTR drives DSR/RLSD. Tests can also inject input, modem line changes and
//! line errors, stall the transmitter, and make individual driver calls fail.
//!
//! # Example
//! ```
//! use serial_transport::port::{LoopbackBus, SerialPort, IoMode};
//! use serial_transport::sync::Timeout;
//! use std::sync::Arc;
//!
//! let bus = LoopbackBus::new();
//! bus.add_device("LOOP0");
//!
//! let port = SerialPort::with_provider(Arc::new(bus.clone()));
//! port.open("LOOP0", 0, 0, IoMode::Synchronous).unwrap();
//! port.write(b"ping", Timeout::ZERO).unwrap();
//!
//! let mut buf = [0u8; 4];
//! let n = port.read(&mut buf, Timeout::ZERO).unwrap();
//! assert_eq!(&buf[..n], b"ping");
//! ```

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::backend::{not_connected, CommDriver, DeviceProvider};
use super::types::{Availability, Handshake, LineErrors, LineSettings, ModemStatus};

#[derive(Debug, Default)]
struct FailureKnobs {
    next_open: Option<io::ErrorKind>,
    setup: bool,
    line_control: bool,
    clear_buffers: bool,
    queue_sizes: bool,
}

#[derive(Debug)]
struct DeviceState {
    open: bool,
    closed_at: Option<Instant>,
    open_count: usize,
    rx: VecDeque<u8>,
    tx_log: Vec<u8>,
    loopback: bool,
    stall_tx: bool,
    settings: LineSettings,
    handshake: Handshake,
    dtr: bool,
    rts: bool,
    modem: ModemStatus,
    line_errors: LineErrors,
    break_active: bool,
    break_count: usize,
    clear_count: usize,
    queue_sizes: (usize, usize),
    fail: FailureKnobs,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            open: false,
            closed_at: None,
            open_count: 0,
            rx: VecDeque::new(),
            tx_log: Vec::new(),
            loopback: true,
            stall_tx: false,
            settings: LineSettings::default(),
            handshake: Handshake::Off,
            dtr: false,
            rts: false,
            modem: ModemStatus::default(),
            line_errors: LineErrors::empty(),
            break_active: false,
            break_count: 0,
            clear_count: 0,
            queue_sizes: (0, 0),
            fail: FailureKnobs::default(),
        }
    }
}

/// A simulated device on a [`LoopbackBus`].
#[derive(Debug)]
pub struct LoopbackDevice {
    name: String,
    state: Mutex<DeviceState>,
}

impl LoopbackDevice {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(DeviceState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue bytes as if received from the far end.
    pub fn inject(&self, data: &[u8]) {
        self.state.lock().rx.extend(data);
    }

    /// Drain everything the port transmitted so far.
    pub fn take_tx(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.lock().tx_log)
    }

    /// Route transmitted bytes (and RTS/DTR) back to the input side. On by default.
    pub fn set_loopback(&self, enabled: bool) {
        self.state.lock().loopback = enabled;
    }

    /// Make the transmitter accept no bytes until unstalled.
    pub fn set_stall_tx(&self, stalled: bool) {
        self.state.lock().stall_tx = stalled;
    }

    pub fn set_modem_status(&self, status: ModemStatus) {
        self.state.lock().modem = status;
    }

    pub fn set_cts(&self, level: bool) {
        self.state.lock().modem.cts = level;
    }

    pub fn set_dsr(&self, level: bool) {
        self.state.lock().modem.dsr = level;
    }

    pub fn set_ring(&self, level: bool) {
        self.state.lock().modem.ring = level;
    }

    pub fn set_rlsd(&self, level: bool) {
        self.state.lock().modem.rlsd = level;
    }

    /// Latch line errors as if detected by the UART.
    pub fn inject_line_errors(&self, errors: LineErrors) {
        self.state.lock().line_errors |= errors;
    }

    /// Fail the next open attempt with `kind`.
    pub fn fail_next_open(&self, kind: io::ErrorKind) {
        self.state.lock().fail.next_open = Some(kind);
    }

    /// Fail line-setting commits while set.
    pub fn set_fail_setup(&self, fail: bool) {
        self.state.lock().fail.setup = fail;
    }

    /// Fail break set/clear while set.
    pub fn set_fail_line_control(&self, fail: bool) {
        self.state.lock().fail.line_control = fail;
    }

    /// Fail buffer purges while set.
    pub fn set_fail_clear_buffers(&self, fail: bool) {
        self.state.lock().fail.clear_buffers = fail;
    }

    /// Reject queue size requests while set.
    pub fn set_fail_queue_sizes(&self, fail: bool) {
        self.state.lock().fail.queue_sizes = fail;
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    pub fn dtr(&self) -> bool {
        self.state.lock().dtr
    }

    pub fn rts(&self) -> bool {
        self.state.lock().rts
    }

    pub fn settings(&self) -> LineSettings {
        self.state.lock().settings
    }

    pub fn break_active(&self) -> bool {
        self.state.lock().break_active
    }

    pub fn break_count(&self) -> usize {
        self.state.lock().break_count
    }

    pub fn clear_count(&self) -> usize {
        self.state.lock().clear_count
    }

    pub fn queue_sizes(&self) -> (usize, usize) {
        self.state.lock().queue_sizes
    }

    pub fn pending_input(&self) -> usize {
        self.state.lock().rx.len()
    }
}

#[derive(Debug, Default)]
struct BusInner {
    devices: Mutex<HashMap<String, Arc<LoopbackDevice>>>,
    reopen_guard: Mutex<Option<Duration>>,
}

/// Named collection of loopback devices; cloning shares the bus.
#[derive(Debug, Clone, Default)]
pub struct LoopbackBus {
    inner: Arc<BusInner>,
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device, or return the existing one with that name.
    pub fn add_device(&self, name: impl Into<String>) -> Arc<LoopbackDevice> {
        let name = name.into();
        let mut devices = self.inner.devices.lock();
        Arc::clone(
            devices
                .entry(name.clone())
                .or_insert_with(|| Arc::new(LoopbackDevice::new(name))),
        )
    }

    pub fn device(&self, name: &str) -> Option<Arc<LoopbackDevice>> {
        self.inner.devices.lock().get(name).cloned()
    }

    /// Unplug a device. An open driver keeps working on its own handle.
    pub fn remove_device(&self, name: &str) -> Option<Arc<LoopbackDevice>> {
        self.inner.devices.lock().remove(name)
    }

    pub fn device_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.devices.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Reject re-opening a device within `window` of its last close.
    pub fn set_reopen_guard(&self, window: Option<Duration>) {
        *self.inner.reopen_guard.lock() = window;
    }
}

impl DeviceProvider for LoopbackBus {
    fn open(&self, name: &str) -> io::Result<Arc<dyn CommDriver>> {
        let device = self.device(name).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no loopback device {name}"))
        })?;
        let guard = *self.inner.reopen_guard.lock();

        let mut st = device.state.lock();
        if let Some(kind) = st.fail.next_open.take() {
            return Err(io::Error::new(kind, "injected open failure"));
        }
        if st.open {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{name} is in use"),
            ));
        }
        if let (Some(window), Some(closed_at)) = (guard, st.closed_at) {
            if closed_at.elapsed() < window {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    format!("{name} is still being torn down"),
                ));
            }
        }
        st.open = true;
        st.open_count += 1;
        drop(st);

        debug!(port = %name, "Loopback device opened");
        Ok(Arc::new(LoopbackDriver {
            device,
            closed: AtomicBool::new(false),
        }))
    }

    fn probe(&self, name: &str) -> Availability {
        match self.device(name) {
            None => Availability::NotPresent,
            Some(device) if device.is_open() => Availability::InUse,
            Some(_) => Availability::Available,
        }
    }

    fn index_name(&self, index: u32) -> String {
        format!("LOOP{index}")
    }
}

/// Open handle onto a [`LoopbackDevice`].
#[derive(Debug)]
pub struct LoopbackDriver {
    device: Arc<LoopbackDevice>,
    closed: AtomicBool,
}

impl LoopbackDriver {
    fn with_state<T>(&self, f: impl FnOnce(&mut DeviceState) -> io::Result<T>) -> io::Result<T> {
        if self.closed.load(Ordering::Acquire) {
            return Err(not_connected(&self.device.name));
        }
        f(&mut self.device.state.lock())
    }
}

fn injected(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("injected {what} failure"))
}

impl CommDriver for LoopbackDriver {
    fn name(&self) -> &str {
        &self.device.name
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.with_state(|st| {
            let n = buf.len().min(st.rx.len());
            for (dst, src) in buf.iter_mut().zip(st.rx.drain(..n)) {
                *dst = src;
            }
            Ok(n)
        })
    }

    fn write(&self, data: &[u8]) -> io::Result<usize> {
        self.with_state(|st| {
            if st.stall_tx {
                return Ok(0);
            }
            st.tx_log.extend_from_slice(data);
            if st.loopback {
                st.rx.extend(data);
            }
            Ok(data.len())
        })
    }

    fn bytes_to_read(&self) -> io::Result<usize> {
        self.with_state(|st| Ok(st.rx.len()))
    }

    fn set_line_settings(&self, settings: &LineSettings) -> io::Result<()> {
        self.with_state(|st| {
            if st.fail.setup {
                return Err(injected("setup"));
            }
            st.settings = *settings;
            Ok(())
        })
    }

    fn line_settings(&self) -> io::Result<LineSettings> {
        self.with_state(|st| Ok(st.settings))
    }

    fn set_flow_control(&self, handshake: Handshake) -> io::Result<()> {
        self.with_state(|st| {
            if st.fail.setup {
                return Err(injected("setup"));
            }
            st.handshake = handshake;
            Ok(())
        })
    }

    fn flow_control(&self) -> io::Result<Handshake> {
        self.with_state(|st| Ok(st.handshake))
    }

    fn set_dtr(&self, level: bool) -> io::Result<()> {
        self.with_state(|st| {
            st.dtr = level;
            if st.loopback {
                st.modem.dsr = level;
                st.modem.rlsd = level;
            }
            Ok(())
        })
    }

    fn set_rts(&self, level: bool) -> io::Result<()> {
        self.with_state(|st| {
            st.rts = level;
            if st.loopback {
                st.modem.cts = level;
            }
            Ok(())
        })
    }

    fn modem_status(&self) -> io::Result<ModemStatus> {
        self.with_state(|st| Ok(st.modem))
    }

    fn set_break(&self) -> io::Result<()> {
        self.with_state(|st| {
            if st.fail.line_control {
                return Err(injected("break"));
            }
            st.break_active = true;
            st.break_count += 1;
            if st.loopback {
                st.line_errors |= LineErrors::BREAK;
            }
            Ok(())
        })
    }

    fn clear_break(&self) -> io::Result<()> {
        self.with_state(|st| {
            if st.fail.line_control {
                return Err(injected("break"));
            }
            st.break_active = false;
            Ok(())
        })
    }

    fn clear_buffers(&self) -> io::Result<()> {
        self.with_state(|st| {
            if st.fail.clear_buffers {
                return Err(injected("purge"));
            }
            st.rx.clear();
            st.clear_count += 1;
            Ok(())
        })
    }

    fn take_line_errors(&self) -> io::Result<LineErrors> {
        self.with_state(|st| Ok(std::mem::take(&mut st.line_errors)))
    }

    fn set_queue_sizes(&self, input: usize, output: usize) -> io::Result<()> {
        self.with_state(|st| {
            if st.fail.queue_sizes {
                return Err(injected("queue size"));
            }
            st.queue_sizes = (input, output);
            Ok(())
        })
    }

    fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut st = self.device.state.lock();
        st.open = false;
        st.closed_at = Some(Instant::now());
        st.break_active = false;
        debug!(port = %self.device.name, "Loopback device closed");
        Ok(())
    }
}

impl Drop for LoopbackDriver {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
