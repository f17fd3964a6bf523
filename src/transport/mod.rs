//! Transport abstraction for WebDAV round trips
//!
//! The adapter never speaks HTTP itself. It calls into a [`Transport`],
//! which owns connection handling, request framing and the multistatus
//! wire format. Two implementations ship with the crate:
//!
//! - [`http::HttpTransport`]: reqwest-based client for real servers
//! - [`memory::MemoryTransport`]: in-process store for tests and embedding
//!
//! All paths handed to a transport are absolute, percent-escaped request
//! paths such as `/remote.php/webdav/My%20File.txt`.

pub mod http;
pub mod memory;
pub mod xml;

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWrite;

use crate::session::{Authenticator, Endpoint};

/// Transport-level result codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportCode {
    Ok,
    /// The server answered, but not with success; the status is in the message
    Error,
    /// Host name lookup failed
    Lookup,
    /// Server authentication failed
    Auth,
    /// Proxy authentication failed
    ProxyAuth,
    /// Could not connect
    Connect,
    /// Connection timed out
    Timeout,
    /// The request could not be built or sent
    Failed,
    /// The request should be retried
    Retry,
    /// The server redirected elsewhere
    Redirect,
}

/// A failed transport call: a result code plus the last error text
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub code: TransportCode,
    pub message: String,
}

impl TransportError {
    pub fn new(code: TransportCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// A non-success HTTP answer, rendered as `"<code> <reason>"`
    pub fn status(status: u16, reason: &str) -> Self {
        Self::new(TransportCode::Error, format!("{} {}", status, reason))
    }

    /// Like [`TransportError::status`], with the canonical reason phrase
    pub fn from_status(status: u16) -> Self {
        Self::status(status, reason_phrase(status))
    }
}

/// Canonical reason phrase of a status code
pub fn reason_phrase(status: u16) -> &'static str {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown Status")
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// PROPFIND depth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Depth {
    pub fn header_value(self) -> &'static str {
        match self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        }
    }
}

/// WebDAV namespace URI
pub const DAV_NAMESPACE: &str = "DAV:";

/// A qualified property name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropName {
    pub namespace: Cow<'static, str>,
    pub name: Cow<'static, str>,
}

impl PropName {
    pub const fn dav(name: &'static str) -> Self {
        Self {
            namespace: Cow::Borrowed(DAV_NAMESPACE),
            name: Cow::Borrowed(name),
        }
    }

    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Cow::Owned(namespace.into()),
            name: Cow::Owned(name.into()),
        }
    }
}

impl fmt::Display for PropName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}{}", self.namespace, self.name)
    }
}

pub const GET_LAST_MODIFIED: PropName = PropName::dav("getlastmodified");
pub const GET_CONTENT_LENGTH: PropName = PropName::dav("getcontentlength");
pub const RESOURCE_TYPE: PropName = PropName::dav("resourcetype");
pub const GET_CONTENT_TYPE: PropName = PropName::dav("getcontenttype");

/// Namespace-less dead property ownCloud servers read the modification time
/// from, in seconds since the epoch
pub const LAST_MODIFIED: PropName = PropName {
    namespace: Cow::Borrowed(""),
    name: Cow::Borrowed("lastmodified"),
};

/// Property values of one listed resource.
///
/// Values are the raw text the server sent. Structured properties such as
/// `resourcetype` are flattened to the space-separated local names of their
/// child elements (`"collection"`).
#[derive(Debug, Clone, Default)]
pub struct PropSet {
    values: HashMap<PropName, String>,
}

impl PropSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &PropName) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: PropName, value: impl Into<String>) {
        self.values.insert(name, value.into());
    }

    pub fn extend(&mut self, other: PropSet) {
        self.values.extend(other.values);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One `<response>` of a PROPFIND answer
#[derive(Debug, Clone)]
pub struct PropfindEntry {
    /// Escaped path of the resource
    pub href: String,
    /// Response-level status, when the server sent one instead of propstats
    pub status: Option<u16>,
    pub props: PropSet,
}

/// HTTP/WebDAV methods the adapter uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Put,
    Delete,
    Mkcol,
    Move,
    Propfind,
    Proppatch,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Mkcol => "MKCOL",
            Method::Move => "MOVE",
            Method::Propfind => "PROPFIND",
            Method::Proppatch => "PROPPATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A created but not yet dispatched request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub path: String,
}

/// Request body backed by a local file
#[derive(Debug)]
pub struct RequestBody {
    pub file: std::fs::File,
    pub len: u64,
}

/// One PROPPATCH operation; `None` removes the property
#[derive(Debug, Clone)]
pub struct PropPatch {
    pub name: PropName,
    pub value: Option<String>,
}

impl PropPatch {
    pub fn set(name: PropName, value: impl Into<String>) -> Self {
        Self {
            name,
            value: Some(value.into()),
        }
    }

    pub fn remove(name: PropName) -> Self {
        Self { name, value: None }
    }
}

/// Core transport trait.
///
/// Convenience methods (`delete`, `mkcol`, ...) fail with
/// [`TransportCode::Error`] and a `"<status> <reason>"` message when the
/// server answers with a non-success status. [`Transport::dispatch`] instead
/// hands the final status back to the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    /// List `path` and return one entry per `<response>`
    async fn propfind(
        &self,
        path: &str,
        depth: Depth,
        props: &[PropName],
    ) -> TransportResult<Vec<PropfindEntry>>;

    /// Download `path` into `sink`, returning the number of bytes written
    async fn get(
        &self,
        path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> TransportResult<u64>;

    /// Create a request to be dispatched later
    fn create_request(&self, method: Method, path: &str) -> Request {
        Request {
            method,
            path: path.to_string(),
        }
    }

    /// Send a request created by [`Transport::create_request`] and return
    /// the final status code
    async fn dispatch(&self, request: Request, body: Option<RequestBody>)
        -> TransportResult<u16>;

    async fn delete(&self, path: &str) -> TransportResult<()>;

    async fn move_resource(&self, from: &str, to: &str, overwrite: bool) -> TransportResult<()>;

    async fn mkcol(&self, path: &str) -> TransportResult<()>;

    async fn proppatch(&self, path: &str, ops: &[PropPatch]) -> TransportResult<()>;
}

/// Settings a session hands to the factory when it connects
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub endpoint: Endpoint,
    pub read_timeout: Duration,
    pub user_agent: String,
}

/// Creates the transport for a session
pub trait TransportFactory: Send + Sync {
    fn create(
        &self,
        options: &TransportOptions,
        auth: Arc<Authenticator>,
    ) -> TransportResult<Arc<dyn Transport>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_message() {
        let err = TransportError::status(404, "Not Found");
        assert_eq!(err.code, TransportCode::Error);
        assert_eq!(err.to_string(), "404 Not Found");
        assert_eq!(TransportError::from_status(507).to_string(), "507 Insufficient Storage");
        assert_eq!(reason_phrase(423), "Locked");
    }

    #[test]
    fn test_prop_name_display() {
        assert_eq!(GET_CONTENT_LENGTH.to_string(), "{DAV:}getcontentlength");
        assert_eq!(PropName::new("", "lastmodified").to_string(), "{}lastmodified");
    }

    #[test]
    fn test_prop_set_lookup_by_owned_name() {
        let mut props = PropSet::new();
        props.insert(PropName::new("DAV:", "getcontentlength"), "10");
        assert_eq!(props.get(&GET_CONTENT_LENGTH), Some("10"));
        assert_eq!(props.get(&RESOURCE_TYPE), None);
    }
}
