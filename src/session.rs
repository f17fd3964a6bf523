//! Transport session
//!
//! A session owns exactly one transport to one endpoint. It is established
//! lazily by the first operation that needs the network and reused after
//! that; [`Session::connect`] is cheap to call before every operation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{DavError, Result};
use crate::transport::{Transport, TransportFactory, TransportOptions};
use crate::uri::decode_path;

/// Maximum length of an interactively supplied username or password
pub const MAX_CREDENTIAL_LEN: usize = 255;

/// Default read timeout for a session
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

const USERNAME_PROMPT: &str = "Enter your username: ";
const PASSWORD_PROMPT: &str = "Enter your password: ";

/// URI schemes that select HTTPS
const SECURE_SCHEMES: &[&str] = &["ownclouds", "webdavs", "davs", "https"];

/// Wire protocol of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    fn from_uri_scheme(scheme: &str) -> Self {
        if SECURE_SCHEMES.contains(&scheme) {
            Scheme::Https
        } else {
            Scheme::Http
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// Resolved remote endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Parse a URI into an endpoint plus any credentials embedded in it
    pub fn parse(uri: &str) -> Result<(Endpoint, Option<Credentials>)> {
        let url = Url::parse(uri)
            .map_err(|e| DavError::Backend(format!("Failed to parse URI {:?}: {}", uri, e)))?;

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| DavError::Backend(format!("URI has no host: {:?}", uri)))?
            .to_string();

        let scheme = Scheme::from_uri_scheme(url.scheme());
        let port = url.port().unwrap_or_else(|| scheme.default_port());

        let credentials = if url.username().is_empty() {
            None
        } else {
            Some(Credentials {
                username: decode_path(url.username()),
                password: url.password().map(decode_path),
            })
        };

        Ok((Endpoint { scheme, host, port }, credentials))
    }

    /// `scheme://host:port`, the prefix for absolute request URLs
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

/// Username and optional password
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: Option<String>) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// What the interactive credential callback is asked for
#[derive(Debug, Clone, Copy)]
pub struct AuthPrompt<'a> {
    pub prompt: &'a str,
    /// Longer answers are truncated
    pub max_len: usize,
    /// `true` when asking for the username, `false` for the password
    pub is_username: bool,
    pub attempt: u32,
}

/// Interactive credential callback. User data is whatever the closure
/// captures.
pub type AuthCallback = Box<dyn FnMut(&AuthPrompt<'_>) -> Option<String> + Send>;

struct AuthState {
    credentials: Option<Credentials>,
    callback: Option<AuthCallback>,
}

/// Answers authentication challenges on behalf of the transport
pub struct Authenticator {
    state: Mutex<AuthState>,
}

impl Authenticator {
    pub fn new(credentials: Option<Credentials>, callback: Option<AuthCallback>) -> Self {
        Self {
            state: Mutex::new(AuthState {
                credentials,
                callback,
            }),
        }
    }

    /// Replace the static credentials
    pub fn set_credentials(&self, credentials: Option<Credentials>) {
        self.state.lock().credentials = credentials;
    }

    pub fn has_credentials(&self) -> bool {
        self.state.lock().credentials.is_some()
    }

    /// Drop stored credentials and the callback
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.credentials = None;
        state.callback = None;
    }

    /// Answer a challenge for `realm`.
    ///
    /// Static credentials win. Otherwise the callback is asked once for the
    /// username and once for the password. `None` fails the challenge.
    /// Deciding how many attempts to make is up to the transport.
    pub fn challenge(&self, realm: &str, attempt: u32) -> Option<Credentials> {
        let mut state = self.state.lock();

        if let Some(credentials) = &state.credentials {
            debug!("Authentication required for {}, using static credentials", realm);
            return Some(credentials.clone());
        }

        let Some(callback) = state.callback.as_mut() else {
            warn!("Authentication required for {} but no credentials are available", realm);
            return None;
        };

        debug!("Authentication required for {}, asking the credential callback", realm);
        let username = callback(&AuthPrompt {
            prompt: USERNAME_PROMPT,
            max_len: MAX_CREDENTIAL_LEN,
            is_username: true,
            attempt,
        })?;
        let password = callback(&AuthPrompt {
            prompt: PASSWORD_PROMPT,
            max_len: MAX_CREDENTIAL_LEN,
            is_username: false,
            attempt,
        });

        Some(Credentials {
            username: truncate(username, MAX_CREDENTIAL_LEN),
            password: password.map(|p| truncate(p, MAX_CREDENTIAL_LEN)),
        })
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Authenticator")
            .field("credentials", &state.credentials)
            .field("callback", &state.callback.is_some())
            .finish()
    }
}

fn truncate(mut value: String, max_len: usize) -> String {
    if value.len() > max_len {
        let mut end = max_len;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        value.truncate(end);
    }
    value
}

/// Lazily connected session to one endpoint
pub struct Session {
    factory: Box<dyn TransportFactory>,
    auth: Arc<Authenticator>,
    read_timeout: Duration,
    user_agent: String,
    endpoint: Option<Endpoint>,
    transport: Option<Arc<dyn Transport>>,
}

impl Session {
    pub fn new(
        factory: Box<dyn TransportFactory>,
        auth: Arc<Authenticator>,
        read_timeout: Duration,
        user_agent: String,
    ) -> Self {
        Self {
            factory,
            auth,
            read_timeout,
            user_agent,
            endpoint: None,
            transport: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn authenticator(&self) -> &Arc<Authenticator> {
        &self.auth
    }

    /// The transport, once connected
    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.clone()
    }

    /// Ensure a transport exists, creating it from `uri` on first use
    pub fn connect(&mut self, uri: &str) -> Result<Arc<dyn Transport>> {
        if let Some(transport) = &self.transport {
            return Ok(transport.clone());
        }

        let (endpoint, credentials) = Endpoint::parse(uri)?;
        trace!(
            "connect: scheme={} host={} port={}",
            endpoint.scheme.as_str(),
            endpoint.host,
            endpoint.port
        );

        if let Some(credentials) = credentials {
            debug!("Using credentials from URI for user {}", credentials.username);
            self.auth.set_credentials(Some(credentials));
        }

        let options = TransportOptions {
            endpoint: endpoint.clone(),
            read_timeout: self.read_timeout,
            user_agent: self.user_agent.clone(),
        };

        let transport = self
            .factory
            .create(&options, self.auth.clone())
            .map_err(|e| DavError::Backend(format!("Failed to create transport: {}", e)))?;

        debug!("Connected to {}", endpoint.base_url());
        self.endpoint = Some(endpoint);
        self.transport = Some(transport.clone());
        Ok(transport)
    }

    /// Release the transport and all stored credentials
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            debug!("Closing session");
        }
        self.endpoint = None;
        self.auth.clear();
    }
}
