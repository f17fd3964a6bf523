//! Status translation
//!
//! Maps the two kinds of failure signal a WebDAV round trip can produce into
//! one small, POSIX-flavoured taxonomy:
//!
//! - HTTP status codes (directly, or embedded at the start of the session's
//!   last error text such as `"404 Not Found"`)
//! - transport-level result codes (connect failures, timeouts, auth, ...)
//!
//! Every function here is pure.

use crate::transport::{TransportCode, TransportError};

/// Error taxonomy surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    PermissionDenied,
    NotFound,
    /// Timeouts and unreachable servers; the caller may retry later
    Transient,
    /// The resource is locked
    AccessDenied,
    InvalidRequest,
    OutOfSpace,
    Io,
    OutOfMemory,
    InvalidArgument,
    /// The transport reported a failure it could not qualify
    Unknown,
    NotSupported,
}

impl ErrorKind {
    /// POSIX errno for this taxonomy member
    pub fn errno(self) -> i32 {
        match self {
            ErrorKind::PermissionDenied => libc::EPERM,
            ErrorKind::NotFound => libc::ENOENT,
            ErrorKind::Transient => libc::EAGAIN,
            ErrorKind::AccessDenied => libc::EACCES,
            ErrorKind::InvalidRequest => libc::EINVAL,
            ErrorKind::OutOfSpace => libc::ENOSPC,
            ErrorKind::Io => libc::EIO,
            ErrorKind::OutOfMemory => libc::ENOMEM,
            ErrorKind::InvalidArgument => libc::EINVAL,
            ErrorKind::Unknown => libc::EIO,
            ErrorKind::NotSupported => libc::ENOSYS,
        }
    }

    /// Whether a sync engine may reasonably retry the operation
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

/// Translate an HTTP status code. `None` means success.
pub fn from_http_status(status: u16) -> Option<ErrorKind> {
    match status {
        200..=205 | 207 | 304 => None,
        401 | 402 | 407 => Some(ErrorKind::PermissionDenied),
        301 | 303 | 404 | 410 => Some(ErrorKind::NotFound),
        408 | 504 => Some(ErrorKind::Transient),
        423 => Some(ErrorKind::AccessDenied),
        400 | 403 | 405 | 409 | 411 | 412 | 414 | 415 | 424 | 501 => {
            Some(ErrorKind::InvalidRequest)
        }
        413 | 507 => Some(ErrorKind::OutOfSpace),
        _ => Some(ErrorKind::Io),
    }
}

/// Translate a session error text whose leading token is a status code.
///
/// Text without a leading number is an I/O failure.
pub fn from_error_text(text: &str) -> Option<ErrorKind> {
    match leading_status(text) {
        Some(code) => from_http_status(code),
        None => Some(ErrorKind::Io),
    }
}

/// Translate a transport result code. `None` means success.
///
/// A generic transport error maps to [`ErrorKind::Unknown`] rather than to
/// success; use [`classify`] to refine it with the error text.
pub fn from_transport_code(code: TransportCode) -> Option<ErrorKind> {
    match code {
        TransportCode::Ok => None,
        TransportCode::Error => Some(ErrorKind::Unknown),
        TransportCode::Auth | TransportCode::ProxyAuth => Some(ErrorKind::AccessDenied),
        TransportCode::Connect | TransportCode::Timeout | TransportCode::Retry => {
            Some(ErrorKind::Transient)
        }
        TransportCode::Failed => Some(ErrorKind::InvalidRequest),
        TransportCode::Redirect => Some(ErrorKind::NotFound),
        TransportCode::Lookup => Some(ErrorKind::Io),
    }
}

/// Classify a failed transport call.
///
/// Generic errors are the transport's way of saying "the server answered
/// with a non-success status"; that status is read from the error text.
/// A generic error whose text carries no failing status stays `Unknown`.
pub fn classify(err: &TransportError) -> ErrorKind {
    if err.code == TransportCode::Error {
        if let Some(code) = leading_status(&err.message) {
            return from_http_status(code).unwrap_or(ErrorKind::Unknown);
        }
        return ErrorKind::Unknown;
    }
    from_transport_code(err.code).unwrap_or(ErrorKind::Unknown)
}

fn leading_status(text: &str) -> Option<u16> {
    let text = text.trim_start();
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    text[..end].parse().ok()
}
