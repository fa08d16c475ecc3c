//! Scheduling priority applied from inside the worker thread.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadPriority {
    Lowest,
    BelowNormal,
    #[default]
    Normal,
    AboveNormal,
    Highest,
    TimeCritical,
}

impl ThreadPriority {
    /// Per-thread nice value used on Unix.
    pub fn nice_value(self) -> i32 {
        match self {
            Self::Lowest => 10,
            Self::BelowNormal => 5,
            Self::Normal => 0,
            Self::AboveNormal => -5,
            Self::Highest => -10,
            Self::TimeCritical => -20,
        }
    }

    /// Relative priority passed to `SetThreadPriority` on Windows.
    pub fn win32_value(self) -> i32 {
        match self {
            Self::Lowest => -2,
            Self::BelowNormal => -1,
            Self::Normal => 0,
            Self::AboveNormal => 1,
            Self::Highest => 2,
            Self::TimeCritical => 15,
        }
    }
}

/// Apply `priority` to the calling thread.
#[cfg(target_os = "linux")]
pub(crate) fn apply_to_current(priority: ThreadPriority) -> Result<(), String> {
    // SAFETY: gettid has no preconditions and setpriority only reads its arguments.
    let rc = unsafe {
        let tid = libc::syscall(libc::SYS_gettid) as libc::id_t;
        libc::setpriority(libc::PRIO_PROCESS, tid, priority.nice_value())
    };
    if rc == -1 {
        return Err(std::io::Error::last_os_error().to_string());
    }
    Ok(())
}

#[cfg(all(unix, not(target_os = "linux")))]
pub(crate) fn apply_to_current(priority: ThreadPriority) -> Result<(), String> {
    tracing::debug!(
        ?priority,
        "Per-thread priority is not supported on this platform; keeping inherited priority"
    );
    Ok(())
}

#[cfg(windows)]
pub(crate) fn apply_to_current(priority: ThreadPriority) -> Result<(), String> {
    use winapi::um::processthreadsapi::{GetCurrentThread, SetThreadPriority};

    // SAFETY: GetCurrentThread returns a pseudo handle valid for the calling thread.
    let ok = unsafe { SetThreadPriority(GetCurrentThread(), priority.win32_value()) };
    if ok == 0 {
        return Err(std::io::Error::last_os_error().to_string());
    }
    Ok(())
}
