//! Completion engine behind an open port.
//!
//! In [`IoMode::Overlapped`] a managed thread pumps the driver: received bytes
//! land in a bounded input queue (or directly in a pending read), pending
//! writes are pushed out, and modem/line-status changes become comm events.
//! Callers start an operation, then block on its private completion event with
//! their own timeout. A wait that times out detaches the operation and returns
//! whatever it transferred so far.
//!
//! In [`IoMode::Synchronous`] there is no thread; reads and writes poll the
//! driver on the calling thread.

use memchr::memchr;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::backend::CommDriver;
use super::error::{translate_os_error, SerialError, SerialResult};
use super::events::CommEventState;
use super::types::{EventMask, IoMode, LineErrors, ModemStatus, ReadMode};
use crate::sync::{Event, Timeout};
use crate::thread::{ManagedThread, ThreadPriority, Wakeup};

const PUMP_CHUNK: usize = 256;

/// An in-flight read or write.
#[derive(Debug)]
struct PendingOp {
    state: Mutex<OpState>,
    done: Event,
}

#[derive(Debug)]
struct OpState {
    data: Vec<u8>,
    /// Bytes written so far (writes only; reads use `data.len()`).
    offset: usize,
    target: usize,
    outcome: Option<SerialResult<()>>,
}

impl PendingOp {
    fn read(target: usize, already: &[u8]) -> Arc<Self> {
        let mut data = Vec::with_capacity(target);
        data.extend_from_slice(already);
        Arc::new(Self {
            state: Mutex::new(OpState {
                data,
                offset: 0,
                target,
                outcome: None,
            }),
            done: Event::manual(),
        })
    }

    fn write(data: &[u8], offset: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(OpState {
                data: data.to_vec(),
                offset,
                target: data.len(),
                outcome: None,
            }),
            done: Event::manual(),
        })
    }

    /// Append received bytes; returns how many were taken.
    fn fill(&self, bytes: &[u8]) -> usize {
        let mut st = self.state.lock();
        let take = (st.target - st.data.len()).min(bytes.len());
        st.data.extend_from_slice(&bytes[..take]);
        if st.data.len() == st.target {
            st.outcome = Some(Ok(()));
            self.done.set();
        }
        take
    }

    fn is_finished(&self) -> bool {
        self.state.lock().outcome.is_some()
    }

    fn finish(&self, outcome: SerialResult<()>) {
        let mut st = self.state.lock();
        if st.outcome.is_none() {
            st.outcome = Some(outcome);
        }
        self.done.set();
    }
}

#[derive(Debug)]
struct IoState {
    rx: VecDeque<u8>,
    rx_capacity: usize,
    rx_high: bool,
    read_op: Option<Arc<PendingOp>>,
    write_op: Option<Arc<PendingOp>>,
    modem: ModemStatus,
    line_errors: LineErrors,
    read_mode: ReadMode,
    cancel_epoch: u64,
}

impl IoState {
    fn drain_into(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.rx.len());
        for (dst, src) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *dst = src;
        }
        if self.rx.len() * 5 < self.rx_capacity * 4 {
            self.rx_high = false;
        }
        n
    }
}

fn is_same(slot: &Option<Arc<PendingOp>>, op: &Arc<PendingOp>) -> bool {
    slot.as_ref().is_some_and(|o| Arc::ptr_eq(o, op))
}

#[derive(Debug)]
struct EngineShared {
    name: String,
    mode: IoMode,
    driver: Arc<dyn CommDriver>,
    events: Arc<CommEventState>,
    io: Mutex<IoState>,
    /// Serializes driver reads so received bytes keep their order.
    pump: Mutex<()>,
    wake: Event,
    poll_interval: Duration,
}

impl EngineShared {
    /// One pump cycle: receive, transmit, then modem and line status.
    fn tick(&self) {
        let mut raised = self.pump_rx();
        raised |= self.service_write();

        if let Ok(status) = self.driver.modem_status() {
            let mut io = self.io.lock();
            raised |= status.changes_since(&io.modem);
            io.modem = status;
        }

        if let Ok(errors) = self.driver.take_line_errors() {
            if !errors.is_empty() {
                self.io.lock().line_errors |= errors;
                if errors.contains(LineErrors::BREAK) {
                    raised |= EventMask::BREAK;
                }
                if !(errors - LineErrors::BREAK).is_empty() {
                    raised |= EventMask::LINE_ERROR;
                }
            }
        }

        if !raised.is_empty() {
            self.events.raise(raised);
        }
    }

    /// Move everything the driver has queued into the engine.
    fn pump_rx(&self) -> EventMask {
        let _pump = self.pump.lock();
        let mut raised = EventMask::empty();
        let mut chunk = [0u8; PUMP_CHUNK];
        loop {
            match self.driver.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => raised |= self.ingest(&chunk[..n]),
                Err(e) => {
                    let err = translate_os_error(&e);
                    debug!(port = %self.name, error = %e, "Driver read failed");
                    if let Some(op) = self.io.lock().read_op.take() {
                        op.finish(Err(err));
                    }
                    break;
                }
            }
        }
        raised
    }

    fn ingest(&self, bytes: &[u8]) -> EventMask {
        let mut raised = EventMask::RX_CHAR;
        if memchr(self.events.event_char(), bytes).is_some() {
            raised |= EventMask::RX_FLAG;
        }

        let mut io = self.io.lock();
        let mut rest = bytes;
        if let Some(op) = io.read_op.clone() {
            let taken = op.fill(rest);
            rest = &rest[taken..];
            if op.is_finished() {
                io.read_op = None;
            }
        }

        let space = io.rx_capacity.saturating_sub(io.rx.len());
        let keep = space.min(rest.len());
        io.rx.extend(&rest[..keep]);
        if keep < rest.len() {
            io.line_errors |= LineErrors::RX_OVER;
            raised |= EventMask::LINE_ERROR;
            warn!(
                port = %self.name,
                dropped = rest.len() - keep,
                "Input queue overflow"
            );
        }
        if !io.rx_high && io.rx.len() * 5 >= io.rx_capacity * 4 {
            io.rx_high = true;
            raised |= EventMask::RX_80_FULL;
        }
        raised
    }

    fn service_write(&self) -> EventMask {
        let Some(op) = self.io.lock().write_op.clone() else {
            return EventMask::empty();
        };
        self.push_write(&op)
    }

    /// Push the unwritten tail of `op`; skipped once the op has an outcome.
    fn push_write(&self, op: &Arc<PendingOp>) -> EventMask {
        let (finished, drained) = {
            let mut st = op.state.lock();
            if st.outcome.is_some() {
                (true, false)
            } else {
                let offset = st.offset;
                match self.driver.write(&st.data[offset..]) {
                    Ok(n) => {
                        st.offset += n;
                        if st.offset == st.target {
                            st.outcome = Some(Ok(()));
                            op.done.set();
                        }
                    }
                    Err(e) => {
                        st.outcome = Some(Err(translate_os_error(&e)));
                        op.done.set();
                    }
                }
                (st.outcome.is_some(), st.offset == st.target)
            }
        };

        if !finished {
            return EventMask::empty();
        }
        let mut io = self.io.lock();
        if is_same(&io.write_op, op) {
            io.write_op = None;
        }
        if drained {
            EventMask::TX_EMPTY
        } else {
            EventMask::empty()
        }
    }

    fn read_overlapped(&self, buf: &mut [u8], timeout: Timeout) -> SerialResult<usize> {
        let raised = self.pump_rx();
        if !raised.is_empty() {
            self.events.raise(raised);
        }
        let op = {
            let mut io = self.io.lock();
            let n = io.drain_into(buf);
            if n == buf.len() || io.read_mode == ReadMode::Nonblocking {
                return Ok(n);
            }
            let op = PendingOp::read(buf.len(), &buf[..n]);
            io.read_op = Some(Arc::clone(&op));
            op
        };
        self.wake.set();

        if !op.done.wait(timeout) {
            let mut io = self.io.lock();
            if is_same(&io.read_op, &op) {
                io.read_op = None;
            }
        }

        let st = op.state.lock();
        let n = st.data.len();
        buf[..n].copy_from_slice(&st.data);
        match st.outcome {
            Some(Err(e)) => Err(e),
            _ => Ok(n),
        }
    }

    fn write_overlapped(&self, data: &[u8], timeout: Timeout) -> SerialResult<usize> {
        let written = self.driver.write(data).map_err(|e| translate_os_error(&e))?;
        if written == data.len() {
            self.events.raise(EventMask::TX_EMPTY);
            return Ok(written);
        }

        let op = PendingOp::write(data, written);
        self.io.lock().write_op = Some(Arc::clone(&op));
        self.wake.set();

        let timed_out = !op.done.wait(timeout);
        if timed_out {
            let mut io = self.io.lock();
            if is_same(&io.write_op, &op) {
                io.write_op = None;
            }
        }

        let mut st = op.state.lock();
        if timed_out && st.outcome.is_none() {
            // Detached. The pump may still hold a clone and must not send the tail.
            st.outcome = Some(Ok(()));
        }
        match st.outcome {
            Some(Err(e)) => Err(e),
            _ => Ok(st.offset),
        }
    }

    fn read_direct(&self, buf: &mut [u8], timeout: Timeout) -> SerialResult<usize> {
        let deadline = timeout.deadline();
        let (epoch, mode) = {
            let io = self.io.lock();
            (io.cancel_epoch, io.read_mode)
        };
        let mut n = 0;
        loop {
            n += self
                .driver
                .read(&mut buf[n..])
                .map_err(|e| translate_os_error(&e))?;
            if n == buf.len() || mode == ReadMode::Nonblocking {
                return Ok(n);
            }
            if self.io.lock().cancel_epoch != epoch {
                return Err(SerialError::Aborted);
            }
            if !self.pause(deadline) {
                return Ok(n);
            }
        }
    }

    fn write_direct(&self, data: &[u8], timeout: Timeout) -> SerialResult<usize> {
        let deadline = timeout.deadline();
        let epoch = self.io.lock().cancel_epoch;
        let mut offset = 0;
        loop {
            offset += self
                .driver
                .write(&data[offset..])
                .map_err(|e| translate_os_error(&e))?;
            if offset == data.len() {
                return Ok(offset);
            }
            if self.io.lock().cancel_epoch != epoch {
                return Err(SerialError::Aborted);
            }
            if !self.pause(deadline) {
                return Ok(offset);
            }
        }
    }

    /// Sleep one poll interval, bounded by `deadline`; `false` once it has passed.
    fn pause(&self, deadline: Option<std::time::Instant>) -> bool {
        let wait = match Timeout::remaining(deadline) {
            Timeout::Infinite => self.poll_interval,
            Timeout::After(d) if d.is_zero() => return false,
            Timeout::After(d) => d.min(self.poll_interval),
        };
        std::thread::sleep(wait);
        true
    }

    fn cancel(&self) {
        let (read_op, write_op) = {
            let mut io = self.io.lock();
            io.cancel_epoch += 1;
            (io.read_op.take(), io.write_op.take())
        };
        for op in [read_op, write_op].into_iter().flatten() {
            op.finish(Err(SerialError::Aborted));
        }
        self.events.force();
    }
}

/// Completion engine of one open port.
#[derive(Debug)]
pub(crate) struct IoEngine {
    shared: Arc<EngineShared>,
    thread: Mutex<Option<ManagedThread>>,
}

impl IoEngine {
    pub(crate) fn start(
        driver: Arc<dyn CommDriver>,
        events: Arc<CommEventState>,
        mode: IoMode,
        rx_capacity: usize,
        poll_interval: Duration,
    ) -> SerialResult<Self> {
        let name = driver.name().to_string();
        let modem = driver.modem_status().unwrap_or_default();
        let shared = Arc::new(EngineShared {
            name: name.clone(),
            mode,
            driver,
            events,
            io: Mutex::new(IoState {
                rx: VecDeque::with_capacity(rx_capacity),
                rx_capacity,
                rx_high: false,
                read_op: None,
                write_op: None,
                modem,
                line_errors: LineErrors::empty(),
                read_mode: ReadMode::Nonblocking,
                cancel_epoch: 0,
            }),
            pump: Mutex::new(()),
            wake: Event::auto(),
            poll_interval,
        });

        let thread = match mode {
            IoMode::Synchronous => None,
            IoMode::Overlapped => {
                let thread = ManagedThread::new(format!("serial-io:{name}"));
                let pump = Arc::clone(&shared);
                thread
                    .launch(ThreadPriority::Normal, move |ctx| {
                        loop {
                            pump.tick();
                            let idle = Timeout::from(pump.poll_interval);
                            if ctx.park_on(&pump.wake, idle) == Wakeup::Terminated {
                                break;
                            }
                        }
                        0
                    })
                    .map_err(|e| {
                        warn!(port = %name, error = %e, "Failed to start I/O engine");
                        SerialError::PortSetupFailed
                    })?;
                Some(thread)
            }
        };

        Ok(Self {
            shared,
            thread: Mutex::new(thread),
        })
    }

    pub(crate) fn mode(&self) -> IoMode {
        self.shared.mode
    }

    pub(crate) fn read(&self, buf: &mut [u8], timeout: Timeout) -> SerialResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.shared.mode {
            IoMode::Overlapped => self.shared.read_overlapped(buf, timeout),
            IoMode::Synchronous => self.shared.read_direct(buf, timeout),
        }
    }

    pub(crate) fn write(&self, data: &[u8], timeout: Timeout) -> SerialResult<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        match self.shared.mode {
            IoMode::Overlapped => self.shared.write_overlapped(data, timeout),
            IoMode::Synchronous => self.shared.write_direct(data, timeout),
        }
    }

    pub(crate) fn set_read_mode(&self, mode: ReadMode) {
        self.shared.io.lock().read_mode = mode;
    }

    pub(crate) fn read_mode(&self) -> ReadMode {
        self.shared.io.lock().read_mode
    }

    /// Queued input, counting both the engine queue and the driver.
    pub(crate) fn bytes_available(&self) -> SerialResult<usize> {
        let queued = self.shared.io.lock().rx.len();
        let driver = self
            .shared
            .driver
            .bytes_to_read()
            .map_err(|e| translate_os_error(&e))?;
        Ok(queued + driver)
    }

    /// Latched line errors, cleared by this call.
    pub(crate) fn take_line_errors(&self) -> SerialResult<LineErrors> {
        let fresh = self
            .shared
            .driver
            .take_line_errors()
            .map_err(|e| translate_os_error(&e))?;
        let mut io = self.shared.io.lock();
        Ok(std::mem::take(&mut io.line_errors) | fresh)
    }

    /// Drop queued input and abort in-flight operations.
    pub(crate) fn discard(&self) {
        let (read_op, write_op) = {
            let mut io = self.shared.io.lock();
            io.rx.clear();
            io.rx_high = false;
            (io.read_op.take(), io.write_op.take())
        };
        for op in [read_op, write_op].into_iter().flatten() {
            op.finish(Err(SerialError::Aborted));
        }
    }

    /// Abort every in-flight operation and release any comm-event waiter.
    pub(crate) fn cancel(&self) {
        self.shared.cancel();
    }

    pub(crate) fn wake(&self) {
        self.shared.wake.set();
    }

    /// Cancel outstanding I/O and stop the engine thread.
    pub(crate) fn shutdown(&self) -> bool {
        self.shared.cancel();
        let thread = self.thread.lock().take();
        match thread {
            Some(thread) => thread.terminate_and_wait(),
            None => true,
        }
    }
}

impl Drop for IoEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
