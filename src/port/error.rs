//! Transport error taxonomy and OS error translation.
//!
//! Every OS error that crosses into the transport is translated here, so the
//! rest of the crate only ever deals in [`SerialError`] categories.

use std::io;
use thiserror::Error;

/// Outcome category of a failed transport operation.
///
/// Success is `Ok(..)`. Line-status conditions (framing, overrun, ...) are not
/// errors in this sense; they are reported through
/// [`LineErrors`](super::LineErrors).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum SerialError {
    #[error("operation timed out")]
    Timeout,

    /// Queue sizing or another open-time setup step was rejected.
    #[error("port setup failed")]
    PortSetupFailed,

    /// The operation requires an open port.
    #[error("port is not open")]
    InvalidHandle,

    #[error("invalid argument")]
    InvalidArgument,

    /// Device missing, access denied, or the driver refused a line control request.
    #[error("port unavailable")]
    PortUnavailable,

    #[error("port is already open")]
    AlreadyOpen,

    /// The operation was cancelled by `cancel_io` or `close`.
    #[error("operation aborted")]
    Aborted,

    /// Unclassified OS error; carries the raw code (or -1 when none exists).
    #[error("unknown OS error (code {0})")]
    Unknown(i32),
}

/// Result type for transport operations.
pub type SerialResult<T> = Result<T, SerialError>;

#[cfg(windows)]
fn is_unavailable_code(code: i32) -> bool {
    use winapi::shared::winerror::{
        ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND, ERROR_GEN_FAILURE, ERROR_PATH_NOT_FOUND,
    };
    [
        ERROR_FILE_NOT_FOUND,
        ERROR_PATH_NOT_FOUND,
        ERROR_ACCESS_DENIED,
        ERROR_GEN_FAILURE,
    ]
    .contains(&(code as u32))
}

#[cfg(unix)]
fn is_unavailable_code(code: i32) -> bool {
    [
        libc::ENOENT,
        libc::EACCES,
        libc::EPERM,
        libc::ENODEV,
        libc::ENXIO,
        libc::EIO,
        libc::EBUSY,
    ]
    .contains(&code)
}

#[cfg(not(any(unix, windows)))]
fn is_unavailable_code(_code: i32) -> bool {
    false
}

/// Map an OS error onto the transport taxonomy.
pub fn translate_os_error(err: &io::Error) -> SerialError {
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
            return SerialError::PortUnavailable
        }
        io::ErrorKind::InvalidInput => return SerialError::InvalidArgument,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => return SerialError::Timeout,
        io::ErrorKind::Interrupted => return SerialError::Aborted,
        _ => {}
    }
    match err.raw_os_error() {
        Some(code) if is_unavailable_code(code) => SerialError::PortUnavailable,
        Some(code) => SerialError::Unknown(code),
        None => SerialError::Unknown(-1),
    }
}

impl From<io::Error> for SerialError {
    fn from(err: io::Error) -> Self {
        translate_os_error(&err)
    }
}

impl From<serialport::Error> for SerialError {
    fn from(err: serialport::Error) -> Self {
        translate_os_error(&serialport_to_io(err))
    }
}

/// Convert a serialport error into an `io::Error` that keeps its category.
///
/// `serialport` drops the errno of failures it cannot classify. For those the
/// thread's last OS error is used instead, so this must run straight after
/// the failing call.
pub(crate) fn serialport_to_io(err: serialport::Error) -> io::Error {
    let kind = match err.kind() {
        serialport::ErrorKind::NoDevice => io::ErrorKind::NotFound,
        serialport::ErrorKind::InvalidInput => io::ErrorKind::InvalidInput,
        serialport::ErrorKind::Io(io::ErrorKind::Other) | serialport::ErrorKind::Unknown => {
            return with_last_os_code(err.description)
        }
        serialport::ErrorKind::Io(kind) => kind,
    };
    io::Error::new(kind, err.description)
}

fn with_last_os_code(description: String) -> io::Error {
    match io::Error::last_os_error().raw_os_error() {
        Some(code) if code != 0 => io::Error::from_raw_os_error(code),
        _ => io::Error::new(io::ErrorKind::Other, description),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(SerialError::InvalidHandle.to_string(), "port is not open");
        assert_eq!(
            SerialError::Unknown(87).to_string(),
            "unknown OS error (code 87)"
        );
    }

    #[test]
    fn test_translate_by_kind() {
        let cases = [
            (io::ErrorKind::NotFound, SerialError::PortUnavailable),
            (io::ErrorKind::PermissionDenied, SerialError::PortUnavailable),
            (io::ErrorKind::InvalidInput, SerialError::InvalidArgument),
            (io::ErrorKind::TimedOut, SerialError::Timeout),
            (io::ErrorKind::Interrupted, SerialError::Aborted),
            (io::ErrorKind::Other, SerialError::Unknown(-1)),
        ];
        for (kind, expected) in cases {
            assert_eq!(translate_os_error(&io::Error::from(kind)), expected);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_translate_raw_codes() {
        let busy = io::Error::from_raw_os_error(libc::EBUSY);
        assert_eq!(translate_os_error(&busy), SerialError::PortUnavailable);

        let other = io::Error::from_raw_os_error(libc::EPIPE);
        assert_eq!(translate_os_error(&other), SerialError::Unknown(libc::EPIPE));
    }

    #[test]
    fn test_from_serialport_error() {
        let err = serialport::Error::new(serialport::ErrorKind::NoDevice, "gone");
        assert_eq!(SerialError::from(err), SerialError::PortUnavailable);

        let err = serialport::Error::new(serialport::ErrorKind::InvalidInput, "bad baud");
        assert_eq!(SerialError::from(err), SerialError::InvalidArgument);
    }

    #[test]
    fn test_serialport_io_kind_is_kept() {
        let err = serialport::Error::new(
            serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied),
            "locked",
        );
        let io_err = serialport_to_io(err);
        assert_eq!(io_err.kind(), io::ErrorKind::PermissionDenied);
        assert_eq!(translate_os_error(&io_err), SerialError::PortUnavailable);
    }
}
