use std::io;
use thiserror::Error;

use crate::config::ConfigError;
use crate::status::{self, ErrorKind};
use crate::transport::TransportError;

/// Main error type for webdav-adapter operations
#[derive(Error, Debug)]
pub enum DavError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Temporarily unavailable, retry later: {0}")]
    Transient(String),

    #[error("Access denied (locked): {0}")]
    AccessDenied(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No space left: {0}")]
    NoSpace(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Out of memory")]
    OutOfMemory,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown outcome: {0}")]
    Unknown(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl DavError {
    /// Build an error of the given taxonomy member with a context message
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::PermissionDenied => DavError::PermissionDenied(message),
            ErrorKind::NotFound => DavError::NotFound(message),
            ErrorKind::Transient => DavError::Transient(message),
            ErrorKind::AccessDenied => DavError::AccessDenied(message),
            ErrorKind::InvalidRequest => DavError::InvalidRequest(message),
            ErrorKind::OutOfSpace => DavError::NoSpace(message),
            ErrorKind::Io => DavError::Backend(message),
            ErrorKind::OutOfMemory => DavError::OutOfMemory,
            ErrorKind::InvalidArgument => DavError::InvalidArgument(message),
            ErrorKind::Unknown => DavError::Unknown(message),
            ErrorKind::NotSupported => DavError::NotSupported(message),
        }
    }

    /// Classify a transport failure through the status translator
    pub fn from_transport(err: TransportError) -> Self {
        let kind = status::classify(&err);
        DavError::from_kind(kind, err.to_string())
    }

    /// The taxonomy member this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            DavError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            DavError::NotFound(_) => ErrorKind::NotFound,
            DavError::Transient(_) => ErrorKind::Transient,
            DavError::AccessDenied(_) => ErrorKind::AccessDenied,
            DavError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            DavError::NoSpace(_) => ErrorKind::OutOfSpace,
            DavError::Io(e) if e.kind() == io::ErrorKind::NotFound => ErrorKind::NotFound,
            DavError::Io(_) | DavError::Backend(_) => ErrorKind::Io,
            DavError::OutOfMemory => ErrorKind::OutOfMemory,
            DavError::InvalidArgument(_) | DavError::Config(_) => ErrorKind::InvalidArgument,
            DavError::Unknown(_) => ErrorKind::Unknown,
            DavError::NotSupported(_) => ErrorKind::NotSupported,
        }
    }

    /// Convert error to libc errno for callers that speak POSIX.
    ///
    /// Always the errno of `kind()`; local OS errors surface as EIO or
    /// ENOENT, never with their own code.
    pub fn errno(&self) -> i32 {
        self.kind().errno()
    }
}

/// Result type alias for webdav-adapter operations
pub type Result<T> = std::result::Result<T, DavError>;
