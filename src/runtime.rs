//! Process-wide transport configuration with an initialize-once lifecycle.
//!
//! The embedding application installs a [`TransportConfig`] with
//! [`initialize`] and keeps the returned [`RuntimeGuard`] alive for as long as
//! the configuration should stay installed. Code that runs without an
//! installed configuration sees [`TransportConfig::default`].

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::port::LineSettings;

/// Timing and sizing knobs shared by every transport and managed thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Pause after releasing a device before `close` returns.
    pub settle_delay: Duration,
    /// Pause between cancelling outstanding I/O and releasing the device.
    pub cancel_yield: Duration,
    /// Idle interval of the overlapped I/O engine between driver polls.
    pub poll_interval: Duration,
    /// How long `wait_for_term` waits before abandoning a worker.
    pub term_timeout: Duration,
    /// Input queue capacity used when `open` is given a queue size of 0.
    pub rx_queue_capacity: usize,
    /// Length of the drain read performed by `purge`.
    pub purge_drain_len: usize,
    /// Default per-thread PRNG seed.
    pub default_seed: u32,
    /// Persisted per-device line settings applied when a device is opened.
    pub port_defaults: BTreeMap<String, LineSettings>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(200),
            cancel_yield: Duration::from_millis(10),
            poll_interval: Duration::from_millis(2),
            term_timeout: Duration::from_millis(1500),
            rx_queue_capacity: 4096,
            purge_drain_len: 4000,
            default_seed: 1,
            port_defaults: BTreeMap::new(),
        }
    }
}

type ThreadCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Start/stop callbacks run on worker threads that declared an apartment requirement.
#[derive(Clone)]
pub struct ThreadHooks {
    pub on_start: ThreadCallback,
    pub on_stop: ThreadCallback,
}

impl ThreadHooks {
    pub fn new(
        on_start: impl Fn(&str) + Send + Sync + 'static,
        on_stop: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_start: Arc::new(on_start),
            on_stop: Arc::new(on_stop),
        }
    }
}

impl fmt::Debug for ThreadHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadHooks").finish_non_exhaustive()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("transport runtime is already initialized")]
    AlreadyInitialized,
}

static INSTALLED: Lazy<RwLock<Option<Arc<TransportConfig>>>> = Lazy::new(|| RwLock::new(None));
static HOOKS: Lazy<RwLock<Option<ThreadHooks>>> = Lazy::new(|| RwLock::new(None));
static DEFAULTS: Lazy<Arc<TransportConfig>> = Lazy::new(|| Arc::new(TransportConfig::default()));

/// Keeps the installed configuration alive; dropping it tears the runtime down.
#[derive(Debug)]
#[must_use = "dropping the guard immediately uninstalls the configuration"]
pub struct RuntimeGuard {
    _private: (),
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        INSTALLED.write().take();
        HOOKS.write().take();
        debug!("Transport runtime torn down");
    }
}

/// Install `config` as the process-wide configuration.
pub fn initialize(config: TransportConfig) -> Result<RuntimeGuard, RuntimeError> {
    let mut slot = INSTALLED.write();
    if slot.is_some() {
        return Err(RuntimeError::AlreadyInitialized);
    }
    debug!(?config, "Transport runtime initialized");
    *slot = Some(Arc::new(config));
    Ok(RuntimeGuard { _private: () })
}

pub fn is_initialized() -> bool {
    INSTALLED.read().is_some()
}

/// The installed configuration, or the built-in defaults.
pub fn current() -> Arc<TransportConfig> {
    INSTALLED
        .read()
        .as_ref()
        .map(Arc::clone)
        .unwrap_or_else(|| Arc::clone(&DEFAULTS))
}

/// Register the apartment start/stop hooks. Replaces any earlier pair.
pub fn set_thread_hooks(hooks: ThreadHooks) {
    *HOOKS.write() = Some(hooks);
}

pub fn clear_thread_hooks() {
    HOOKS.write().take();
}

pub(crate) fn thread_hooks() -> Option<ThreadHooks> {
    HOOKS.read().clone()
}
