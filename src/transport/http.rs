//! reqwest-based WebDAV transport
//!
//! Redirects are not followed; a 3xx answer surfaces as a status error.
//! Basic authentication is answered through the session's
//! [`Authenticator`] on the first 401 and the credentials are then reused
//! for every later request of this transport.

use std::io::Seek;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::redirect::Policy;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

use super::xml::{parse_multistatus, propfind_body, proppatch_body};
use super::{
    Depth, Method, PropName, PropPatch, PropfindEntry, Request, RequestBody, Transport,
    TransportCode, TransportError, TransportFactory, TransportOptions, TransportResult,
};
use crate::session::{Authenticator, Credentials};

const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

/// Creates [`HttpTransport`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpTransportFactory;

impl TransportFactory for HttpTransportFactory {
    fn create(
        &self,
        options: &TransportOptions,
        auth: Arc<Authenticator>,
    ) -> TransportResult<Arc<dyn Transport>> {
        Ok(Arc::new(HttpTransport::new(options, auth)?))
    }
}

/// WebDAV over HTTP(S)
pub struct HttpTransport {
    client: Client,
    base_url: String,
    auth: Arc<Authenticator>,
    credentials: Mutex<Option<Credentials>>,
}

impl HttpTransport {
    pub fn new(options: &TransportOptions, auth: Arc<Authenticator>) -> TransportResult<Self> {
        let client = Client::builder()
            .redirect(Policy::none())
            .connect_timeout(options.read_timeout)
            .read_timeout(options.read_timeout)
            .user_agent(options.user_agent.clone())
            .build()
            .map_err(|e| {
                TransportError::new(
                    TransportCode::Failed,
                    format!("Failed to create HTTP client: {}", e),
                )
            })?;

        Ok(Self {
            client,
            base_url: options.endpoint.base_url(),
            auth,
            credentials: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send the request produced by `build`, answering one authentication
    /// challenge. `build` runs again for the retry, so bodies must be
    /// re-creatable.
    async fn send<F>(
        &self,
        method: &reqwest::Method,
        path: &str,
        build: F,
    ) -> TransportResult<Response>
    where
        F: Fn(&Client) -> TransportResult<RequestBuilder> + Sync,
    {
        let mut challenged = false;
        loop {
            let mut builder = build(&self.client)?;
            let credentials = self.credentials.lock().clone();
            if let Some(credentials) = credentials {
                builder = builder.basic_auth(credentials.username, credentials.password);
            }

            trace!("{} {}", method, path);
            let response = builder.send().await.map_err(transport_error)?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED {
                if challenged {
                    warn!("Authentication failed for {}", path);
                    return Err(TransportError::new(TransportCode::Auth, "401 Unauthorized"));
                }
                challenged = true;

                let realm = realm(&response).unwrap_or_default();
                match self.auth.challenge(&realm, 0) {
                    Some(credentials) => {
                        *self.credentials.lock() = Some(credentials);
                        continue;
                    }
                    None => {
                        return Err(TransportError::new(TransportCode::Auth, "401 Unauthorized"))
                    }
                }
            }

            if status == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
                return Err(TransportError::new(
                    TransportCode::ProxyAuth,
                    "407 Proxy Authentication Required",
                ));
            }

            debug!("{} {} -> {}", method, path, status.as_u16());
            return Ok(response);
        }
    }

    /// Send a body-less request and require a success status
    async fn simple(
        &self,
        method: reqwest::Method,
        path: &str,
        headers: &[(&str, String)],
    ) -> TransportResult<()> {
        let url = self.url(path);
        let response = self
            .send(&method, path, |client| {
                let mut builder = client.request(method.clone(), &url);
                for (name, value) in headers {
                    builder = builder.header(*name, value.as_str());
                }
                Ok(builder)
            })
            .await?;
        success(response).map(|_| ())
    }
}

fn dav_method(method: &str) -> TransportResult<reqwest::Method> {
    reqwest::Method::from_bytes(method.as_bytes()).map_err(|_| {
        TransportError::new(
            TransportCode::Failed,
            format!("Invalid HTTP method: {}", method),
        )
    })
}

/// reqwest only flags its own deadlines; a read timeout arrives as a
/// `TimedOut` io error somewhere in the source chain
fn is_timeout(err: &reqwest::Error) -> bool {
    if err.is_timeout() {
        return true;
    }
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::TimedOut {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

fn transport_error(err: reqwest::Error) -> TransportError {
    let code = if is_timeout(&err) {
        TransportCode::Timeout
    } else if err.is_connect() {
        TransportCode::Connect
    } else if err.is_redirect() {
        TransportCode::Redirect
    } else if err.is_builder() || err.is_request() {
        TransportCode::Failed
    } else {
        TransportCode::Error
    };
    TransportError::new(code, err.to_string())
}

fn success(response: Response) -> TransportResult<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(TransportError::status(
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown Status"),
        ))
    }
}

/// Realm of a `WWW-Authenticate: Basic realm="..."` challenge
fn realm(response: &Response) -> Option<String> {
    let header = response.headers().get(WWW_AUTHENTICATE)?.to_str().ok()?;
    parse_realm(header)
}

fn parse_realm(header: &str) -> Option<String> {
    let start = header.find("realm=")? + "realm=".len();
    let rest = &header[start..];
    let value = match rest.strip_prefix('"') {
        Some(quoted) => quoted.split('"').next()?,
        None => rest.split(',').next()?.trim(),
    };
    Some(value.to_string())
}

#[async_trait]
impl Transport for HttpTransport {
    async fn propfind(
        &self,
        path: &str,
        depth: Depth,
        props: &[PropName],
    ) -> TransportResult<Vec<PropfindEntry>> {
        let method = dav_method(Method::Propfind.as_str())?;
        let url = self.url(path);
        let body = propfind_body(props);

        let response = self
            .send(&method, path, |client| {
                Ok(client
                    .request(method.clone(), &url)
                    .header("Depth", depth.header_value())
                    .header(CONTENT_TYPE, XML_CONTENT_TYPE)
                    .body(body.clone()))
            })
            .await?;

        let text = success(response)?.text().await.map_err(transport_error)?;
        parse_multistatus(&text)
    }

    async fn get(
        &self,
        path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> TransportResult<u64> {
        let method = reqwest::Method::GET;
        let url = self.url(path);
        let mut response = success(
            self.send(&method, path, |client| Ok(client.get(&url)))
                .await?,
        )?;

        let mut total = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(transport_error)? {
            sink.write_all(&chunk).await.map_err(|e| {
                TransportError::new(
                    TransportCode::Error,
                    format!("Failed to write download: {}", e),
                )
            })?;
            total += chunk.len() as u64;
        }
        sink.flush().await.map_err(|e| {
            TransportError::new(TransportCode::Error, format!("Failed to write download: {}", e))
        })?;
        Ok(total)
    }

    async fn dispatch(&self, request: Request, body: Option<RequestBody>) -> TransportResult<u16> {
        let method = dav_method(request.method.as_str())?;
        let url = self.url(&request.path);

        let response = self
            .send(&method, &request.path, |client| {
                let mut builder = client.request(method.clone(), &url);
                if let Some(body) = &body {
                    let mut file = body.file.try_clone().map_err(|e| {
                        TransportError::new(
                            TransportCode::Failed,
                            format!("Failed to reopen body: {}", e),
                        )
                    })?;
                    file.rewind().map_err(|e| {
                        TransportError::new(
                            TransportCode::Failed,
                            format!("Failed to rewind body: {}", e),
                        )
                    })?;
                    builder = builder
                        .header(CONTENT_LENGTH, HeaderValue::from(body.len))
                        .body(reqwest::Body::from(tokio::fs::File::from_std(file)));
                }
                Ok(builder)
            })
            .await?;

        Ok(response.status().as_u16())
    }

    async fn delete(&self, path: &str) -> TransportResult<()> {
        self.simple(reqwest::Method::DELETE, path, &[]).await
    }

    async fn move_resource(&self, from: &str, to: &str, overwrite: bool) -> TransportResult<()> {
        let headers = [
            ("Destination", self.url(to)),
            ("Overwrite", if overwrite { "T" } else { "F" }.to_string()),
        ];
        self.simple(dav_method(Method::Move.as_str())?, from, &headers).await
    }

    async fn mkcol(&self, path: &str) -> TransportResult<()> {
        self.simple(dav_method(Method::Mkcol.as_str())?, path, &[]).await
    }

    async fn proppatch(&self, path: &str, ops: &[PropPatch]) -> TransportResult<()> {
        let method = dav_method(Method::Proppatch.as_str())?;
        let url = self.url(path);
        let body = proppatch_body(ops);

        let response = self
            .send(&method, path, |client| {
                Ok(client
                    .request(method.clone(), &url)
                    .header(CONTENT_TYPE, XML_CONTENT_TYPE)
                    .body(body.clone()))
            })
            .await?;
        success(response).map(|_| ())
    }
}
