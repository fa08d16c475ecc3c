//! Tokio facade over the blocking transport.
//!
//! Every call runs the corresponding [`SerialPort`] method on the blocking
//! thread pool, so an async task never stalls the runtime while a read or
//! write waits out its timeout. Timeouts keep their blocking semantics: a
//! read or write that times out resolves to `Ok` with the partial count.
//!
//! Note: This module is gated behind the `async-io` feature flag.

use std::sync::Arc;
use tokio::task::JoinError;
use tracing::warn;

use super::error::{SerialError, SerialResult};
use super::serial::SerialPort;
use super::types::{IoMode, PortId};
use crate::sync::Timeout;

/// Cloneable async handle to a shared [`SerialPort`].
#[derive(Debug, Clone)]
pub struct AsyncSerialPort {
    inner: Arc<SerialPort>,
}

fn join_failed(e: JoinError) -> SerialError {
    warn!(error = %e, "Blocking serial task failed");
    SerialError::Aborted
}

impl AsyncSerialPort {
    pub fn new(port: Arc<SerialPort>) -> Self {
        Self { inner: port }
    }

    /// The wrapped port, for calls that never block.
    pub fn port(&self) -> &Arc<SerialPort> {
        &self.inner
    }

    async fn run<T, F>(&self, f: F) -> SerialResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&SerialPort) -> SerialResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(join_failed)?
    }

    pub async fn open(
        &self,
        id: impl Into<PortId>,
        in_queue: usize,
        out_queue: usize,
        mode: IoMode,
    ) -> SerialResult<()> {
        let id = id.into();
        self.run(move |port| port.open(id, in_queue, out_queue, mode))
            .await
    }

    /// Close the port; the settling delay is spent off the async runtime.
    pub async fn close(&self) -> SerialResult<()> {
        self.run(|port| port.close()).await
    }

    pub async fn write(&self, data: &[u8], timeout: Timeout) -> SerialResult<usize> {
        let data = data.to_vec();
        self.run(move |port| port.write(&data, timeout)).await
    }

    pub async fn read(&self, buffer: &mut [u8], timeout: Timeout) -> SerialResult<usize> {
        let len = buffer.len();
        let (temp, n) = self
            .run(move |port| {
                let mut temp = vec![0u8; len];
                let n = port.read(&mut temp, timeout)?;
                Ok((temp, n))
            })
            .await?;
        buffer[..n].copy_from_slice(&temp[..n]);
        Ok(n)
    }

    pub async fn purge(&self) -> SerialResult<()> {
        self.run(|port| port.purge()).await
    }

    pub async fn wait_for_comm_event(&self, timeout: Timeout) -> SerialResult<()> {
        self.run(move |port| port.wait_for_comm_event(timeout)).await
    }

    pub async fn bytes_available(&self) -> SerialResult<usize> {
        self.run(|port| port.bytes_available()).await
    }
}

impl From<Arc<SerialPort>> for AsyncSerialPort {
    fn from(port: Arc<SerialPort>) -> Self {
        Self::new(port)
    }
}
