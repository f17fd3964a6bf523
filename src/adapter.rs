//! Filesystem-shaped operations over a WebDAV session
//!
//! [`DavAdapter`] is what a sync engine talks to. Every method blocks until
//! its round trip is done; the adapter drives the async transport on its
//! own current-thread runtime.
//!
//! Methods take full URIs (`ownclouds://host/remote.php/webdav/dir/file`).
//! A bare absolute path is accepted once the session is connected, or when
//! `endpoint.url` is configured.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info, trace};

use crate::catalog::{fetch_catalog, Catalog};
use crate::config::Config;
use crate::error::{DavError, Result};
use crate::session::{AuthCallback, Authenticator, Session};
use crate::stat::{FileStat, StatCache};
use crate::transfer::{OpenFlags, TransferContext};
use crate::transport::http::HttpTransportFactory;
use crate::transport::{Depth, PropPatch, Transport, TransportFactory, LAST_MODIFIED};
use crate::uri;

/// Timestamps for [`DavAdapter::utimes`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTimes {
    pub accessed: SystemTime,
    pub modified: SystemTime,
}

impl FileTimes {
    pub fn new(accessed: SystemTime, modified: SystemTime) -> Self {
        Self { accessed, modified }
    }
}

/// WebDAV store exposed through local filesystem operations
pub struct DavAdapter {
    config: Config,
    session: Session,
    stat_cache: StatCache,
    /// Runtime the transport runs on
    runtime: tokio::runtime::Runtime,
}

impl DavAdapter {
    /// Module entry point: an adapter over HTTP with default configuration.
    ///
    /// `auth_callback` is asked for credentials when the server demands them
    /// and none are known; it carries its own user data.
    pub fn init(
        method_name: &str,
        args: &str,
        auth_callback: Option<AuthCallback>,
    ) -> Result<Self> {
        info!(
            "webdav-adapter {} initializing: method={} args={:?}",
            env!("CARGO_PKG_VERSION"),
            method_name,
            args
        );
        Self::with_auth_callback(Config::default(), Box::new(HttpTransportFactory), auth_callback)
    }

    pub fn new(config: Config, factory: Box<dyn TransportFactory>) -> Result<Self> {
        Self::with_auth_callback(config, factory, None)
    }

    pub fn with_auth_callback(
        config: Config,
        factory: Box<dyn TransportFactory>,
        auth_callback: Option<AuthCallback>,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let auth = Arc::new(Authenticator::new(config.endpoint.credentials(), auth_callback));
        let session = Session::new(
            factory,
            auth,
            config.endpoint.read_timeout,
            config.endpoint.user_agent.clone(),
        );

        Ok(Self {
            config,
            session,
            stat_cache: StatCache::new(),
            runtime,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run an async operation on the adapter's runtime and wait for it
    fn run_async<F, T>(&self, future: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        self.runtime.block_on(future)
    }

    /// Make sure the session is up. Cheap once connected.
    pub fn connect(&mut self, uri: &str) -> Result<Arc<dyn Transport>> {
        let target = if uri.starts_with('/') && !self.session.is_connected() {
            self.config.endpoint.url.clone().ok_or_else(|| {
                DavError::InvalidArgument(format!(
                    "{} is a bare path and no endpoint url is configured",
                    uri
                ))
            })?
        } else {
            uri.to_string()
        };
        self.session.connect(&target)
    }

    /// Connect and resolve the request path of `uri`
    fn prepare(&mut self, uri: &str) -> Result<(Arc<dyn Transport>, String)> {
        let transport = self.connect(uri)?;
        let path = uri::request_path(uri)?;
        Ok((transport, path))
    }

    fn connected_transport(&self) -> Result<Arc<dyn Transport>> {
        self.session
            .transport()
            .ok_or_else(|| DavError::Backend("Session is not connected".to_string()))
    }

    /// Decoded base name, the stat cache key
    fn cache_key(path: &str) -> String {
        uri::basename(&uri::decode_path(path)).to_string()
    }

    // ------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------

    /// Open a file. Write mode requires the parent collection to exist;
    /// read mode downloads the content before returning.
    pub fn open(&mut self, uri: &str, flags: OpenFlags) -> Result<TransferContext> {
        let (transport, path) = self.prepare(uri)?;
        trace!("open: {} flags={:#o}", path, flags.bits());

        if flags.is_write() {
            let parent = uri::dirname(uri);
            self.stat(parent).map_err(|e| {
                debug!("open: parent {} of {} unavailable: {}", parent, path, e);
                e
            })?;
        }

        let config = self.config.transfer.clone();
        self.run_async(TransferContext::open(transport.as_ref(), &path, flags, &config))
    }

    /// Create or truncate a file. The mode is not transmitted.
    pub fn creat(&mut self, uri: &str, mode: u32) -> Result<TransferContext> {
        trace!("creat: {} mode={:#o}", uri, mode);
        let mut handle = self.open(
            uri,
            OpenFlags::CREATE | OpenFlags::WRITE_ONLY | OpenFlags::TRUNCATE,
        )?;
        handle.write(&[])?;
        Ok(handle)
    }

    pub fn read(&mut self, handle: &mut TransferContext, buf: &mut [u8]) -> Result<usize> {
        handle.read(buf)
    }

    pub fn write(&mut self, handle: &mut TransferContext, buf: &[u8]) -> Result<usize> {
        handle.write(buf)
    }

    /// Close a handle, uploading written content
    pub fn close(&mut self, handle: TransferContext) -> Result<()> {
        let path = handle.path().to_string();
        let transport = self.connected_transport()?;
        self.run_async(handle.close(transport.as_ref()))
            .map_err(|e| {
                error!("close: {} failed: {}", path, e);
                e
            })
    }

    /// Handles are strictly sequential
    pub fn lseek(
        &mut self,
        _handle: &mut TransferContext,
        _offset: i64,
        _whence: i32,
    ) -> Result<u64> {
        Err(DavError::NotSupported("lseek".to_string()))
    }

    // ------------------------------------------------------------------
    // Directories
    // ------------------------------------------------------------------

    /// List a collection
    pub fn opendir(&mut self, uri: &str) -> Result<Catalog> {
        let (transport, path) = self.prepare(uri)?;
        self.run_async(fetch_catalog(transport.as_ref(), &path, Depth::One, false))
    }

    /// Next entry of a listing, remembered for a following `stat`
    pub fn readdir(&mut self, dir: &mut Catalog) -> Option<FileStat> {
        let resource = dir.next()?;
        let stat = FileStat::from_resource(&resource);
        self.stat_cache.store(stat.clone());
        Some(stat)
    }

    pub fn closedir(&mut self, dir: Catalog) -> Result<()> {
        trace!("closedir: {} ({} entries)", dir.target(), dir.len());
        drop(dir);
        Ok(())
    }

    pub fn mkdir(&mut self, uri: &str, mode: u32) -> Result<()> {
        let (transport, path) = self.prepare(uri)?;
        let path = uri::collection_path(&path);
        debug!("mkdir: {} mode={:#o}", path, mode);
        self.run_async(transport.mkcol(&path))
            .map_err(DavError::from_transport)
    }

    pub fn rmdir(&mut self, uri: &str) -> Result<()> {
        self.delete(uri)
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    /// Stat a resource.
    ///
    /// Answered from the stat cache when the last `readdir` entry has the
    /// same base name, otherwise by listing the resource.
    pub fn stat(&mut self, uri: &str) -> Result<FileStat> {
        let path = uri::request_path(uri)?;
        let name = Self::cache_key(&path);
        if let Some(cached) = self.stat_cache.get(&name) {
            trace!("stat: {} answered from cache", path);
            return Ok(cached.clone());
        }

        let (transport, path) = self.prepare(uri)?;
        let catalog = self.run_async(fetch_catalog(transport.as_ref(), &path, Depth::One, true))?;
        let resource = catalog
            .find_or_first(&path)
            .ok_or_else(|| DavError::NotFound(format!("{} not found", path)))?;
        Ok(FileStat::from_resource(resource))
    }

    /// Set the remote modification time
    pub fn utimes(&mut self, uri: &str, times: Option<FileTimes>) -> Result<()> {
        let times =
            times.ok_or_else(|| DavError::InvalidArgument("utimes needs timestamps".to_string()))?;
        let secs = times
            .modified
            .duration_since(UNIX_EPOCH)
            .map_err(|_| {
                DavError::InvalidArgument("modification time is before the epoch".to_string())
            })?
            .as_secs();

        let (transport, path) = self.prepare(uri)?;
        debug!("utimes: {} mtime={}", path, secs);
        let ops = [PropPatch::set(LAST_MODIFIED, secs.to_string())];
        self.run_async(transport.proppatch(&path, &ops))
            .map_err(DavError::from_transport)
    }

    /// Permissions are not stored remotely
    pub fn chmod(&mut self, uri: &str, mode: u32) -> Result<()> {
        trace!("chmod: {} mode={:#o} ignored", uri, mode);
        Ok(())
    }

    /// Ownership is not stored remotely
    pub fn chown(&mut self, uri: &str, uid: u32, gid: u32) -> Result<()> {
        trace!("chown: {} {}:{} ignored", uri, uid, gid);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Namespace
    // ------------------------------------------------------------------

    pub fn unlink(&mut self, uri: &str) -> Result<()> {
        self.delete(uri)
    }

    fn delete(&mut self, uri: &str) -> Result<()> {
        let (transport, path) = self.prepare(uri)?;
        debug!("delete: {}", path);
        self.stat_cache.invalidate(&Self::cache_key(&path));
        self.run_async(transport.delete(&path))
            .map_err(DavError::from_transport)
    }

    /// Move a resource, replacing whatever is at the destination
    pub fn rename(&mut self, old_uri: &str, new_uri: &str) -> Result<()> {
        let (transport, from) = self.prepare(old_uri)?;
        let to = uri::request_path(new_uri)?;
        debug!("rename: {} -> {}", from, to);

        self.stat_cache.invalidate(&Self::cache_key(&from));
        self.stat_cache.invalidate(&Self::cache_key(&to));
        self.run_async(transport.move_resource(&from, &to, true))
            .map_err(DavError::from_transport)
    }

    /// Release the session, its credentials and the credential callback
    pub fn shutdown(mut self) {
        info!("webdav-adapter shutting down");
        self.stat_cache.clear();
        self.session.close();
    }
}
