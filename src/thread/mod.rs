//! Managed worker threads with cooperative and escalated termination.
//!
//! A [`ManagedThread`] runs one worker closure at a time. The worker receives a
//! [`ThreadContext`] through which it observes stop requests and parks in
//! waits that [`ManagedThread::terminate`] is guaranteed to break.
//!
//! Completion is signaled exactly once per launch, after the worker returns
//! (or panics). When a worker ignores a stop request for longer than the
//! configured term timeout, [`ManagedThread::wait_for_term`] abandons it and
//! reports `false`.

mod error;
mod priority;

pub use error::ThreadError;
pub use priority::ThreadPriority;

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, warn};

use crate::runtime;
use crate::sync::{Event, MultiWait, MultiWaitResult, Timeout};

/// Exit code recorded when the worker panicked.
pub const PANIC_EXIT_CODE: i32 = -1;

thread_local! {
    static RNG: RefCell<StdRng> = RefCell::new(StdRng::seed_from_u64(1));
}

/// Run `f` with this thread's seeded pseudo-random generator.
///
/// Workers launched by a [`ManagedThread`] start from the thread's seed, so
/// their sequence is reproducible. Not suitable for cryptography.
pub fn with_rng<R>(f: impl FnOnce(&mut StdRng) -> R) -> R {
    RNG.with(|rng| f(&mut rng.borrow_mut()))
}

fn seed_rng(seed: u32) {
    RNG.with(|rng| *rng.borrow_mut() = StdRng::seed_from_u64(u64::from(seed)));
}

/// Shareable "stop requested" flag.
///
/// Cloning shares the flag, so one flag can coordinate several threads via
/// [`ManagedThread::set_terminate_flag`].
#[derive(Debug, Clone, Default)]
pub struct TerminateFlag(Arc<AtomicBool>);

impl TerminateFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn ptr_eq(&self, other: &TerminateFlag) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// How a [`ThreadContext::park_on`] wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    Signaled,
    Terminated,
    TimedOut,
}

#[derive(Debug)]
struct Shared {
    name: String,
    flag: RwLock<TerminateFlag>,
}

/// State of a single launch.
#[derive(Debug)]
struct RunState {
    running: AtomicBool,
    abandoned: AtomicBool,
    abort_start: AtomicBool,
    start_gate: Event,
    park: Event,
    done: Event,
    exit_code: Mutex<Option<i32>>,
}

impl RunState {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            abandoned: AtomicBool::new(false),
            abort_start: AtomicBool::new(false),
            start_gate: Event::manual(),
            park: Event::manual(),
            done: Event::manual(),
            exit_code: Mutex::new(None),
        }
    }

    fn complete(&self, code: Option<i32>) {
        *self.exit_code.lock() = code;
        self.running.store(false, Ordering::Release);
        self.done.set();
    }
}

/// Handle given to the worker closure.
#[derive(Debug, Clone)]
pub struct ThreadContext {
    shared: Arc<Shared>,
    run: Arc<RunState>,
}

impl ThreadContext {
    /// Whether the worker has been asked to stop.
    pub fn should_stop(&self) -> bool {
        self.shared.flag.read().is_set() || self.run.abandoned.load(Ordering::Acquire)
    }

    /// Sleep up to `timeout`; returns `true` early when termination is requested.
    pub fn park(&self, timeout: Timeout) -> bool {
        self.run.park.wait(timeout) || self.should_stop()
    }

    /// Wait for `event` or a termination request, whichever comes first.
    ///
    /// A signaled `event` takes precedence over a simultaneous stop request.
    pub fn park_on(&self, event: &Event, timeout: Timeout) -> Wakeup {
        let mut wait = match MultiWait::new(&[event, &self.run.park]) {
            Ok(w) => w,
            // Only reachable when the caller passes the park event itself.
            Err(_) => {
                return if self.park(timeout) {
                    Wakeup::Terminated
                } else {
                    Wakeup::TimedOut
                }
            }
        };
        let outcome = wait.lock(timeout, false, None);
        wait.commit();
        match outcome {
            MultiWaitResult::Signaled(0) => Wakeup::Signaled,
            MultiWaitResult::Signaled(_) => Wakeup::Terminated,
            _ if self.should_stop() => Wakeup::Terminated,
            _ => Wakeup::TimedOut,
        }
    }

    pub fn thread_name(&self) -> &str {
        &self.shared.name
    }
}

/// Owner of a restartable worker thread.
#[derive(Debug)]
pub struct ManagedThread {
    shared: Arc<Shared>,
    requires_apartment: bool,
    seed: Option<u32>,
    run: Mutex<Option<Arc<RunState>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    exit_lock: Mutex<()>,
}

impl ManagedThread {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                flag: RwLock::new(TerminateFlag::new()),
            }),
            requires_apartment: false,
            seed: None,
            run: Mutex::new(None),
            handle: Mutex::new(None),
            exit_lock: Mutex::new(()),
        }
    }

    /// Run the registered runtime thread hooks around the worker.
    pub fn with_apartment(mut self, required: bool) -> Self {
        self.requires_apartment = required;
        self
    }

    /// Seed for the worker's thread-local PRNG; defaults to the runtime seed.
    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn requires_apartment(&self) -> bool {
        self.requires_apartment
    }

    /// Start `worker` on a new OS thread.
    ///
    /// With a priority other than [`ThreadPriority::Normal`] the thread holds
    /// before running the worker until the priority has been applied; if that
    /// fails the worker never runs and [`ThreadError::Priority`] is returned.
    pub fn launch<F>(&self, priority: ThreadPriority, worker: F) -> Result<(), ThreadError>
    where
        F: FnOnce(&ThreadContext) -> i32 + Send + 'static,
    {
        let _exit = self.exit_lock.lock();
        let mut current = self.run.lock();
        if current
            .as_ref()
            .is_some_and(|r| r.running.load(Ordering::Acquire))
        {
            return Err(ThreadError::already_running(self.name()));
        }
        if let Some(previous) = self.handle.lock().take() {
            let _ = previous.join();
        }

        let flag = self.shared.flag.read().clone();
        flag.clear();

        let run = Arc::new(RunState::new());
        let held = priority != ThreadPriority::Normal;
        if !held {
            run.start_gate.set();
        }

        let (report_tx, report_rx) = mpsc::channel();
        let ctx = ThreadContext {
            shared: Arc::clone(&self.shared),
            run: Arc::clone(&run),
        };
        let apartment = self.requires_apartment;
        let seed = self.seed.unwrap_or_else(|| runtime::current().default_seed);

        let spawned = std::thread::Builder::new()
            .name(self.shared.name.clone())
            .spawn(move || {
                if held {
                    let applied = priority::apply_to_current(priority);
                    let failed = applied.is_err();
                    let _ = report_tx.send(applied);
                    if failed {
                        ctx.run.complete(None);
                        return;
                    }
                }
                ctx.run.start_gate.wait(Timeout::Infinite);
                if ctx.run.abort_start.load(Ordering::Acquire) {
                    ctx.run.complete(None);
                    return;
                }
                thread_entry(ctx, apartment, seed, worker);
            });

        let handle = match spawned {
            Ok(h) => h,
            Err(e) => {
                return Err(ThreadError::Spawn {
                    name: self.name().to_string(),
                    reason: e.to_string(),
                })
            }
        };

        if held {
            let applied = report_rx
                .recv()
                .unwrap_or_else(|_| Err("thread exited before applying priority".to_string()));
            if let Err(reason) = applied {
                run.abort_start.store(true, Ordering::Release);
                run.start_gate.set();
                let _ = handle.join();
                warn!(thread = %self.name(), ?priority, %reason, "Priority assignment failed; worker not started");
                return Err(ThreadError::Priority {
                    name: self.name().to_string(),
                    priority,
                    reason,
                });
            }
            run.start_gate.set();
        }

        debug!(thread = %self.name(), ?priority, "Thread launched");
        *current = Some(run);
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Request a cooperative stop and break any parked wait.
    pub fn terminate(&self) {
        let flag = self.shared.flag.read().clone();
        if !flag.is_set() {
            flag.set();
        }
        if let Some(run) = self.run.lock().as_ref() {
            run.start_gate.set();
            run.park.set();
        }
        debug!(thread = %self.name(), "Termination requested");
    }

    /// Wait for the worker to finish, abandoning it after the term timeout.
    ///
    /// Returns `true` when the worker exited (or was never running) and
    /// `false` when it had to be abandoned.
    pub fn wait_for_term(&self) -> bool {
        let _exit = self.exit_lock.lock();
        let Some(run) = self.run.lock().clone() else {
            return true;
        };
        if !run.running.load(Ordering::Acquire) {
            self.reap();
            return true;
        }

        let term_timeout = runtime::current().term_timeout;
        if run.done.wait(Timeout::from(term_timeout)) {
            self.reap();
            return true;
        }

        // No safe way to kill a thread: detach it and let it observe the stop flag.
        run.abandoned.store(true, Ordering::Release);
        run.running.store(false, Ordering::Release);
        self.handle.lock().take();
        error!(
            thread = %self.name(),
            timeout_ms = term_timeout.as_millis() as u64,
            "Worker did not exit in time; forcibly abandoned"
        );
        false
    }

    pub fn terminate_and_wait(&self) -> bool {
        self.terminate();
        self.wait_for_term()
    }

    pub fn is_running(&self) -> bool {
        self.run
            .lock()
            .as_ref()
            .is_some_and(|r| r.running.load(Ordering::Acquire))
    }

    /// Exit code of the last completed launch.
    pub fn exit_code(&self) -> Option<i32> {
        self.run.lock().as_ref().and_then(|r| *r.exit_code.lock())
    }

    /// Share termination with an externally owned flag.
    pub fn set_terminate_flag(&self, flag: TerminateFlag) {
        *self.shared.flag.write() = flag;
    }

    pub fn terminate_flag(&self) -> TerminateFlag {
        self.shared.flag.read().clone()
    }

    pub fn is_terminate_requested(&self) -> bool {
        self.shared.flag.read().is_set()
    }

    fn reap(&self) {
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ManagedThread {
    fn drop(&mut self) {
        if self.is_running() {
            self.terminate_and_wait();
        } else {
            self.reap();
        }
    }
}

fn thread_entry<F>(ctx: ThreadContext, apartment: bool, seed: u32, worker: F)
where
    F: FnOnce(&ThreadContext) -> i32,
{
    let hooks = if apartment {
        runtime::thread_hooks()
    } else {
        None
    };
    if let Some(h) = &hooks {
        (h.on_start)(ctx.thread_name());
    }
    seed_rng(seed);

    let code = match panic::catch_unwind(AssertUnwindSafe(|| worker(&ctx))) {
        Ok(code) => code,
        Err(_) => {
            error!(thread = %ctx.thread_name(), "Worker panicked");
            PANIC_EXIT_CODE
        }
    };

    if let Some(h) = &hooks {
        (h.on_stop)(ctx.thread_name());
    }
    ctx.run.complete(Some(code));
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::time::{Duration, Instant};

    #[test]
    fn test_worker_exit_code() {
        let t = ManagedThread::new("exit-code");
        t.launch(ThreadPriority::Normal, |_| 7).unwrap();
        assert!(t.wait_for_term());
        assert_eq!(t.exit_code(), Some(7));
        assert!(!t.is_running());
    }

    #[test]
    fn test_launch_while_running_fails() {
        let t = ManagedThread::new("busy");
        t.launch(ThreadPriority::Normal, |ctx| {
            while !ctx.park(Timeout::from(Duration::from_millis(50))) {}
            0
        })
        .unwrap();

        let err = t.launch(ThreadPriority::Normal, |_| 0).unwrap_err();
        assert_eq!(err, ThreadError::already_running("busy"));
        assert!(t.terminate_and_wait());
    }

    #[test]
    fn test_terminate_breaks_park() {
        let t = ManagedThread::new("parked");
        t.launch(ThreadPriority::Normal, |ctx| {
            if ctx.park(Timeout::Infinite) {
                1
            } else {
                0
            }
        })
        .unwrap();

        let start = Instant::now();
        assert!(t.terminate_and_wait());
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(t.exit_code(), Some(1));
    }

    #[test]
    fn test_park_on_prefers_event() {
        let t = ManagedThread::new("park-on");
        let event = Arc::new(Event::auto());
        let e = Arc::clone(&event);
        event.set();
        t.launch(ThreadPriority::Normal, move |ctx| {
            match ctx.park_on(&e, Timeout::ZERO) {
                Wakeup::Signaled => 1,
                Wakeup::Terminated => 2,
                Wakeup::TimedOut => 3,
            }
        })
        .unwrap();
        assert!(t.wait_for_term());
        assert_eq!(t.exit_code(), Some(1));
        assert!(!event.is_signaled());
    }

    #[test]
    fn test_panicking_worker_completes() {
        let t = ManagedThread::new("panics");
        t.launch(ThreadPriority::Normal, |_| panic!("worker failure"))
            .unwrap();
        assert!(t.wait_for_term());
        assert_eq!(t.exit_code(), Some(PANIC_EXIT_CODE));
    }

    #[test]
    fn test_relaunch_after_completion() {
        let t = ManagedThread::new("relaunch");
        t.launch(ThreadPriority::Normal, |_| 1).unwrap();
        assert!(t.wait_for_term());
        t.launch(ThreadPriority::Normal, |ctx| {
            if ctx.should_stop() {
                -5
            } else {
                2
            }
        })
        .unwrap();
        assert!(t.wait_for_term());
        assert_eq!(t.exit_code(), Some(2));
    }

    #[test]
    fn test_delegated_flag() {
        let shared = TerminateFlag::new();
        let t = ManagedThread::new("delegated");
        t.set_terminate_flag(shared.clone());
        assert!(t.terminate_flag().ptr_eq(&shared));

        t.launch(ThreadPriority::Normal, |ctx| {
            while !ctx.should_stop() {
                ctx.park(Timeout::from(Duration::from_millis(5)));
            }
            0
        })
        .unwrap();

        shared.set();
        assert!(t.wait_for_term());
        assert!(t.is_terminate_requested());
    }

    #[test]
    fn test_seeded_rng_is_reproducible() {
        let draw = || {
            let t = ManagedThread::new("rng").with_seed(42);
            let (tx, rx) = mpsc::channel();
            t.launch(ThreadPriority::Normal, move |_| {
                let values: Vec<u32> = with_rng(|rng| (0..4).map(|_| rng.gen()).collect());
                tx.send(values).unwrap();
                0
            })
            .unwrap();
            assert!(t.wait_for_term());
            rx.recv().unwrap()
        };
        assert_eq!(draw(), draw());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_launch_with_lowered_priority() {
        let t = ManagedThread::new("low");
        t.launch(ThreadPriority::BelowNormal, |_| 3).unwrap();
        assert!(t.wait_for_term());
        assert_eq!(t.exit_code(), Some(3));
    }
}
