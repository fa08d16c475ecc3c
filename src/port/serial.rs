//! The serial transport.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::backend::{CommDriver, DeviceProvider};
use super::engine::IoEngine;
use super::error::{translate_os_error, SerialError, SerialResult};
use super::events::CommEventState;
use super::system::SystemProvider;
use super::types::{
    Availability, DataBits, EventMask, Handshake, IoMode, LineErrors, LineSettings, ModemStatus,
    Parity, PortId, ReadMode, StopBits,
};
use crate::runtime;
use crate::sync::{CriticalSection, Timeout};

/// Smallest driver queue size `open` accepts when sizes are given.
pub const MIN_QUEUE_SIZE: usize = 16;

#[derive(Debug)]
struct OpenPort {
    name: String,
    driver: Arc<dyn CommDriver>,
    engine: IoEngine,
}

#[derive(Debug, Default)]
struct ErrorSlots {
    last: Option<SerialError>,
    read: Option<SerialError>,
    write: Option<SerialError>,
}

/// Timeout-bounded byte transport over one communication device.
///
/// Every method takes `&self`; a port is typically shared as `Arc<SerialPort>`
/// between a reader, a writer and an event-monitor thread. Reads are
/// serialized internally. Concurrent writes from several threads are not, and
/// must be prevented by the caller.
///
/// While the port is closed every operation except [`SerialPort::open`] and
/// the availability probes fails with [`SerialError::InvalidHandle`].
///
/// `read` and `write` report a timeout as success with the number of bytes
/// transferred so far. Callers tell "no data" from "error" by the count.
#[derive(Debug)]
pub struct SerialPort {
    provider: Arc<dyn DeviceProvider>,
    port: RwLock<Option<Arc<OpenPort>>>,
    events: Arc<CommEventState>,
    read_lock: CriticalSection,
    dtr: AtomicBool,
    rts: AtomicBool,
    errors: Mutex<ErrorSlots>,
}

impl Default for SerialPort {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialPort {
    /// Closed port backed by the host's serial devices.
    pub fn new() -> Self {
        Self::with_provider(Arc::new(SystemProvider))
    }

    /// Closed port backed by `provider`.
    pub fn with_provider(provider: Arc<dyn DeviceProvider>) -> Self {
        Self {
            provider,
            port: RwLock::new(None),
            events: Arc::new(CommEventState::new()),
            read_lock: CriticalSection::new(),
            dtr: AtomicBool::new(false),
            rts: AtomicBool::new(false),
            errors: Mutex::new(ErrorSlots::default()),
        }
    }

    /// Probe a host device without opening it.
    pub fn check_port(name: &str) -> Availability {
        SystemProvider.probe(name)
    }

    /// Probe `name` through this port's provider.
    pub fn check_availability(&self, name: &str) -> Availability {
        self.provider.probe(name)
    }

    /// Open a device.
    ///
    /// Non-zero queue sizes must both be at least [`MIN_QUEUE_SIZE`]; the
    /// input size also bounds the engine's receive queue. On any failure the
    /// device is released again before the error is returned.
    pub fn open(
        &self,
        id: impl Into<PortId>,
        in_queue: usize,
        out_queue: usize,
        mode: IoMode,
    ) -> SerialResult<()> {
        let mut slot = self.port.write();
        if slot.is_some() {
            return Err(SerialError::AlreadyOpen);
        }

        let name = match id.into() {
            PortId::Name(name) => name,
            PortId::Index(index) => self.provider.index_name(index),
        };
        match self.open_device(&name, in_queue, out_queue, mode) {
            Ok(open) => {
                info!(port = %name, ?mode, "Port opened");
                *slot = Some(Arc::new(open));
                self.record(Ok(()))
            }
            Err(e) => self.record(Err(e)),
        }
    }

    /// Open with driver-default queue sizes and the overlapped engine.
    pub fn open_default(&self, id: impl Into<PortId>) -> SerialResult<()> {
        self.open(id, 0, 0, IoMode::Overlapped)
    }

    fn open_device(
        &self,
        name: &str,
        in_queue: usize,
        out_queue: usize,
        mode: IoMode,
    ) -> SerialResult<OpenPort> {
        let driver = self.provider.open(name).map_err(|e| {
            warn!(port = %name, error = %e, "Unable to open port");
            translate_os_error(&e)
        })?;

        let dtr = self.dtr.load(Ordering::Acquire);
        let rts = self.rts.load(Ordering::Acquire);
        if let Err(e) = driver.set_dtr(dtr).and_then(|_| driver.set_rts(rts)) {
            warn!(port = %name, error = %e, "Unable to restore DTR/RTS");
        }

        if in_queue != 0 || out_queue != 0 {
            let sized = if in_queue < MIN_QUEUE_SIZE || out_queue < MIN_QUEUE_SIZE {
                Err(SerialError::PortSetupFailed)
            } else {
                driver
                    .set_queue_sizes(in_queue, out_queue)
                    .map_err(|_| SerialError::PortSetupFailed)
            };
            if let Err(e) = sized {
                warn!(port = %name, in_queue, out_queue, "Unable to set queue sizes");
                let _ = driver.close();
                return Err(e);
            }
        }

        self.events.reset_for_open();

        let config = runtime::current();
        if let Some(defaults) = config.port_defaults.get(name) {
            if let Err(e) = driver.set_line_settings(defaults) {
                warn!(port = %name, error = %e, "Unable to apply default comm configuration");
            }
        }

        let capacity = if in_queue == 0 {
            config.rx_queue_capacity
        } else {
            in_queue
        };
        let engine = match IoEngine::start(
            Arc::clone(&driver),
            Arc::clone(&self.events),
            mode,
            capacity,
            config.poll_interval,
        ) {
            Ok(engine) => engine,
            Err(e) => {
                let _ = driver.close();
                return Err(e);
            }
        };

        Ok(OpenPort {
            name: name.to_string(),
            driver,
            engine,
        })
    }

    /// Cancel outstanding I/O, release the device and wait out the settling delay.
    ///
    /// Closing a closed port does nothing.
    pub fn close(&self) -> SerialResult<()> {
        let Some(open) = self.port.write().take() else {
            return Ok(());
        };
        let config = runtime::current();

        open.engine.cancel();
        std::thread::sleep(config.cancel_yield);
        if !open.engine.shutdown() {
            warn!(port = %open.name, "I/O engine did not stop cleanly");
        }
        if let Err(e) = open.driver.close() {
            warn!(port = %open.name, error = %e, "Error releasing port");
        }
        std::thread::sleep(config.settle_delay);

        info!(port = %open.name, "Port closed");
        self.record(Ok(()))
    }

    /// Whether a device is currently bound to this port.
    pub fn is_open(&self) -> bool {
        self.port.read().is_some()
    }

    /// Device name of the open port.
    pub fn name(&self) -> Option<String> {
        self.port.read().as_ref().map(|p| p.name.clone())
    }

    fn open_port(&self) -> SerialResult<Arc<OpenPort>> {
        self.port
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or(SerialError::InvalidHandle)
    }

    fn record<T>(&self, result: SerialResult<T>) -> SerialResult<T> {
        self.errors.lock().last = result.as_ref().err().copied();
        result
    }

    /// Run `f` against the open port and record its outcome as the last error.
    fn with_open<T>(&self, f: impl FnOnce(&OpenPort) -> SerialResult<T>) -> SerialResult<T> {
        let result = self.open_port().and_then(|p| f(&p));
        self.record(result)
    }

    /// Configure baud rate, framing and output lines.
    ///
    /// A failed commit may leave the device partially reconfigured.
    pub fn setup(
        &self,
        baud_rate: u32,
        data_bits: DataBits,
        parity: Parity,
        stop_bits: StopBits,
        dtr: bool,
        rts: bool,
    ) -> SerialResult<()> {
        let settings = LineSettings::new(baud_rate, data_bits, parity, stop_bits);
        self.with_open(|p| {
            settings.validate()?;
            p.driver.set_line_settings(&settings).map_err(|e| {
                warn!(port = %p.name, error = %e, %settings, "Unable to apply line settings");
                translate_os_error(&e)
            })?;
            p.driver
                .set_dtr(dtr)
                .and_then(|_| p.driver.set_rts(rts))
                .map_err(|e| translate_os_error(&e))?;
            self.dtr.store(dtr, Ordering::Release);
            self.rts.store(rts, Ordering::Release);
            debug!(port = %p.name, %settings, dtr, rts, "Port configured");
            Ok(())
        })
    }

    /// Apply line settings, keeping the current DTR/RTS levels.
    pub fn apply_settings(&self, settings: &LineSettings) -> SerialResult<()> {
        self.setup(
            settings.baud_rate,
            settings.data_bits,
            settings.parity,
            settings.stop_bits,
            self.dtr(),
            self.rts(),
        )
    }

    /// Current baud rate and framing as reported by the driver.
    pub fn line_settings(&self) -> SerialResult<LineSettings> {
        self.with_open(|p| p.driver.line_settings().map_err(|e| translate_os_error(&e)))
    }

    /// Current baud rate.
    pub fn baud_rate(&self) -> SerialResult<u32> {
        self.line_settings().map(|s| s.baud_rate)
    }

    /// Current number of data bits.
    pub fn data_bits(&self) -> SerialResult<DataBits> {
        self.line_settings().map(|s| s.data_bits)
    }

    /// Current parity mode.
    pub fn parity(&self) -> SerialResult<Parity> {
        self.line_settings().map(|s| s.parity)
    }

    /// Current number of stop bits.
    pub fn stop_bits(&self) -> SerialResult<StopBits> {
        self.line_settings().map(|s| s.stop_bits)
    }

    /// Set flow control.
    ///
    /// # Arguments
    ///
    /// * `handshake` - `Off`, `Hardware` (RTS/CTS) or `Software` (XON/XOFF)
    pub fn setup_handshaking(&self, handshake: Handshake) -> SerialResult<()> {
        self.with_open(|p| {
            p.driver
                .set_flow_control(handshake)
                .map_err(|e| translate_os_error(&e))
        })
    }

    /// Current flow control.
    pub fn handshaking(&self) -> SerialResult<Handshake> {
        self.with_open(|p| p.driver.flow_control().map_err(|e| translate_os_error(&e)))
    }

    /// Select whether reads return immediately or wait to fill the buffer.
    pub fn set_read_mode(&self, mode: ReadMode) -> SerialResult<()> {
        self.with_open(|p| {
            p.engine.set_read_mode(mode);
            Ok(())
        })
    }

    /// Read timeout policy in effect.
    pub fn read_mode(&self) -> SerialResult<ReadMode> {
        self.with_open(|p| Ok(p.engine.read_mode()))
    }

    /// Replace the comm event mask. An outstanding wait completes with no event.
    pub fn set_event_mask(&self, mask: EventMask) -> SerialResult<()> {
        self.with_open(|_| {
            self.events.set_mask(mask);
            Ok(())
        })
    }

    /// Events that complete a comm event wait.
    pub fn event_mask(&self) -> EventMask {
        self.events.mask()
    }

    /// Set the character whose receipt raises [`EventMask::RX_FLAG`].
    pub fn set_event_char(&self, ch: u8, adjust_mask: bool) -> SerialResult<()> {
        self.with_open(|_| {
            self.events.set_event_char(ch, adjust_mask);
            Ok(())
        })
    }

    /// Character that raises [`EventMask::RX_FLAG`].
    pub fn event_char(&self) -> SerialResult<u8> {
        self.with_open(|_| Ok(self.events.event_char()))
    }

    fn comm_events_available(p: &OpenPort) -> SerialResult<()> {
        match p.engine.mode() {
            IoMode::Overlapped => Ok(()),
            IoMode::Synchronous => Err(SerialError::InvalidArgument),
        }
    }

    /// Arm a wait for the next masked event. Does nothing while a wait is armed.
    pub fn comm_event_wait_initiate(&self) -> SerialResult<()> {
        self.with_open(|p| {
            Self::comm_events_available(p)?;
            self.events.initiate();
            p.engine.wake();
            Ok(())
        })
    }

    /// Block until the armed wait completes.
    pub fn wait_for_comm_event(&self, timeout: Timeout) -> SerialResult<()> {
        self.with_open(|p| Self::comm_events_available(p))?;
        let result = if self.events.wait(timeout) {
            Ok(())
        } else {
            Err(SerialError::Timeout)
        };
        self.record(result)
    }

    /// Read and clear the events that completed the last wait.
    ///
    /// Empty when the wait was released without a classifiable cause.
    pub fn event_type(&self) -> EventMask {
        self.events.take_last()
    }

    /// Complete any armed wait with no event and wake every waiter.
    pub fn force_comm_event(&self) {
        self.events.force();
    }

    /// Abort every in-flight read, write and comm-event wait.
    pub fn cancel_io(&self) -> SerialResult<()> {
        self.with_open(|p| {
            p.engine.cancel();
            debug!(port = %p.name, "Outstanding I/O cancelled");
            Ok(())
        })
    }

    /// Write `data`, waiting up to `timeout` for it to drain.
    pub fn write(&self, data: &[u8], timeout: Timeout) -> SerialResult<usize> {
        let result = self.open_port().and_then(|p| p.engine.write(data, timeout));
        self.errors.lock().write = result.as_ref().err().copied();
        result
    }

    /// Write the UTF-8 bytes of `text`. See [`SerialPort::write`].
    pub fn write_str(&self, text: &str, timeout: Timeout) -> SerialResult<usize> {
        self.write(text.as_bytes(), timeout)
    }

    /// Read into `buf`, waiting up to `timeout` in blocking read mode.
    pub fn read(&self, buf: &mut [u8], timeout: Timeout) -> SerialResult<usize> {
        let _reader = self.read_lock.lock();
        let result = self.open_port().and_then(|p| p.engine.read(buf, timeout));
        self.errors.lock().read = result.as_ref().err().copied();
        result
    }

    /// Best-effort flush: clear break, discard both directions, clear line errors.
    ///
    /// Every step runs even if an earlier one failed; the last failure is returned.
    pub fn purge(&self) -> SerialResult<()> {
        let p = self.record(self.open_port())?;
        let mut failure = None;
        {
            let _reader = self.read_lock.lock();
            if let Err(e) = p.driver.clear_break() {
                warn!(port = %p.name, error = %e, "Purge: clearing break failed");
                failure = Some(translate_os_error(&e));
            }
            p.engine.discard();
            if let Err(e) = p.driver.clear_buffers() {
                warn!(port = %p.name, error = %e, "Purge: discarding buffers failed");
                failure = Some(translate_os_error(&e));
            }
            match p.engine.take_line_errors() {
                Ok(errors) if !errors.is_empty() => {
                    debug!(port = %p.name, ?errors, "Purge: cleared line errors")
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(port = %p.name, error = %e, "Purge: clearing line errors failed");
                    failure = Some(e);
                }
            }
        }

        let mut junk = vec![0u8; runtime::current().purge_drain_len];
        let drained = {
            let _reader = self.read_lock.lock();
            p.engine.read(&mut junk, Timeout::ZERO)
        };
        match drained {
            Ok(0) => {}
            Ok(n) => debug!(port = %p.name, bytes = n, "Purge: drained late input"),
            Err(e) => debug!(port = %p.name, error = %e, "Purge: drain read failed"),
        }

        self.record(failure.map_or(Ok(()), Err))
    }

    /// Hold the line in the break state for `duration`.
    pub fn send_break(&self, duration: Duration) -> SerialResult<()> {
        self.with_open(|p| {
            p.driver.set_break().map_err(|e| {
                warn!(port = %p.name, error = %e, "Unable to set break");
                SerialError::PortUnavailable
            })?;
            std::thread::sleep(duration);
            p.driver.clear_break().map_err(|e| {
                warn!(port = %p.name, error = %e, "Unable to clear break");
                SerialError::PortUnavailable
            })
        })
    }

    /// Latched line errors; reading clears them.
    pub fn line_errors(&self) -> SerialResult<LineErrors> {
        self.with_open(|p| p.engine.take_line_errors())
    }

    /// Snapshot of the modem input lines.
    pub fn modem_status(&self) -> SerialResult<ModemStatus> {
        self.with_open(|p| p.driver.modem_status().map_err(|e| translate_os_error(&e)))
    }

    /// Clear To Send.
    pub fn cts(&self) -> SerialResult<bool> {
        self.modem_status().map(|s| s.cts)
    }

    /// Data Set Ready.
    pub fn dsr(&self) -> SerialResult<bool> {
        self.modem_status().map(|s| s.dsr)
    }

    /// Ring Indicator.
    pub fn ring(&self) -> SerialResult<bool> {
        self.modem_status().map(|s| s.ring)
    }

    /// Receive Line Signal Detect (carrier detect).
    pub fn rlsd(&self) -> SerialResult<bool> {
        self.modem_status().map(|s| s.rlsd)
    }

    /// Logical DTR level; persists across re-open.
    pub fn dtr(&self) -> bool {
        self.dtr.load(Ordering::Acquire)
    }

    /// Logical RTS level; persists across re-open.
    pub fn rts(&self) -> bool {
        self.rts.load(Ordering::Acquire)
    }

    /// Drive DTR and remember the level for the next open.
    pub fn set_dtr(&self, level: bool) -> SerialResult<()> {
        self.with_open(|p| {
            p.driver.set_dtr(level).map_err(|e| translate_os_error(&e))?;
            self.dtr.store(level, Ordering::Release);
            Ok(())
        })
    }

    /// Drive RTS and remember the level for the next open.
    pub fn set_rts(&self, level: bool) -> SerialResult<()> {
        self.with_open(|p| {
            p.driver.set_rts(level).map_err(|e| translate_os_error(&e))?;
            self.rts.store(level, Ordering::Release);
            Ok(())
        })
    }

    /// Bytes received and not yet read.
    pub fn bytes_available(&self) -> SerialResult<usize> {
        self.with_open(|p| p.engine.bytes_available())
    }

    /// Outcome of the most recent non-I/O operation; `None` means success.
    pub fn last_error(&self) -> Option<SerialError> {
        self.errors.lock().last
    }

    /// Outcome of the most recent [`SerialPort::read`].
    pub fn last_read_error(&self) -> Option<SerialError> {
        self.errors.lock().read
    }

    /// Outcome of the most recent [`SerialPort::write`].
    pub fn last_write_error(&self) -> Option<SerialError> {
        self.errors.lock().write
    }
}

impl Drop for SerialPort {
    fn drop(&mut self) {
        if let Some(name) = self.name() {
            warn!(port = %name, "Port dropped while open; closing");
            let _ = self.close();
        }
    }
}
