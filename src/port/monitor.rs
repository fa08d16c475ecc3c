//! Background listener delivering comm events to a handler.
//!
//! An [`EventMonitor`] owns a [`ManagedThread`] that repeatedly arms a comm
//! event wait on a shared [`SerialPort`], blocks on it, and passes every
//! non-empty [`EventMask`] to the handler. Reads and writes on the same port
//! proceed independently from other threads.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::error::{SerialError, SerialResult};
use super::serial::SerialPort;
use super::types::EventMask;
use crate::sync::Timeout;
use crate::thread::{ManagedThread, ThreadPriority};

/// Upper bound on a single blocked wait, so a stop request is noticed even
/// when it races the re-arm.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Exit code of a listener that stopped because the port failed.
pub const MONITOR_PORT_FAILED: i32 = 1;

#[derive(Debug)]
pub struct EventMonitor {
    port: Arc<SerialPort>,
    thread: ManagedThread,
}

impl EventMonitor {
    /// Start listening on `port`, which must be open in overlapped mode.
    pub fn start<F>(port: Arc<SerialPort>, handler: F) -> SerialResult<Self>
    where
        F: FnMut(EventMask) + Send + 'static,
    {
        Self::start_with_priority(port, ThreadPriority::Normal, handler)
    }

    pub fn start_with_priority<F>(
        port: Arc<SerialPort>,
        priority: ThreadPriority,
        mut handler: F,
    ) -> SerialResult<Self>
    where
        F: FnMut(EventMask) + Send + 'static,
    {
        port.comm_event_wait_initiate()?;
        let name = port.name().unwrap_or_default();
        let thread = ManagedThread::new(format!("serial-events:{name}"));

        let listener = Arc::clone(&port);
        thread
            .launch(priority, move |ctx| {
                while !ctx.should_stop() {
                    if let Err(e) = listener.comm_event_wait_initiate() {
                        debug!(port = %name, error = %e, "Event listener stopping");
                        return MONITOR_PORT_FAILED;
                    }
                    match listener.wait_for_comm_event(Timeout::from(WAIT_SLICE)) {
                        Ok(()) => {
                            let events = listener.event_type();
                            if !events.is_empty() && !ctx.should_stop() {
                                handler(events);
                            }
                        }
                        Err(SerialError::Timeout) => {}
                        Err(e) => {
                            debug!(port = %name, error = %e, "Event listener stopping");
                            return MONITOR_PORT_FAILED;
                        }
                    }
                }
                0
            })
            .map_err(|e| {
                warn!(error = %e, "Unable to start event listener");
                SerialError::PortSetupFailed
            })?;

        Ok(Self { port, thread })
    }

    pub fn port(&self) -> &Arc<SerialPort> {
        &self.port
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_running()
    }

    /// Exit code of the listener once it has stopped.
    pub fn exit_code(&self) -> Option<i32> {
        self.thread.exit_code()
    }

    /// Stop the listener, waking its blocked wait. Returns `false` if it had
    /// to be abandoned.
    pub fn stop(&self) -> bool {
        self.thread.terminate();
        self.port.force_comm_event();
        self.thread.wait_for_term()
    }
}

impl Drop for EventMonitor {
    fn drop(&mut self) {
        if self.thread.is_running() {
            self.stop();
        }
    }
}
