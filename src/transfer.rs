//! Open file handles
//!
//! Remote content never streams straight into the caller. A handle opened
//! for reading downloads the whole object into a local temp file first;
//! a handle opened for writing collects everything in a temp file and
//! uploads it in one PUT when closed. The temp file is gone once the handle
//! is closed, whether or not the close succeeded.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use bitflags::bitflags;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace, warn};

use crate::config::TransferConfig;
use crate::error::{DavError, Result};
use crate::status;
use crate::transport::{reason_phrase, Method, Request, RequestBody, Transport};

bitflags! {
    /// `open(2)` flags as the caller passes them.
    ///
    /// Raw values from a POSIX caller go through `from_bits_retain`, so
    /// flags this crate ignores (`O_APPEND`, `O_EXCL`, ...) are kept.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: i32 {
        const READ_ONLY = libc::O_RDONLY;
        const WRITE_ONLY = libc::O_WRONLY;
        const READ_WRITE = libc::O_RDWR;
        const CREATE = libc::O_CREAT;
        const TRUNCATE = libc::O_TRUNC;
    }
}

impl OpenFlags {
    /// Any of write-only, read-write or create selects write mode
    pub fn is_write(self) -> bool {
        let access = self.bits() & libc::O_ACCMODE;
        access == libc::O_WRONLY || access == libc::O_RDWR || self.contains(Self::CREATE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Read,
    Write,
}

impl From<OpenFlags> for TransferMode {
    fn from(flags: OpenFlags) -> Self {
        if flags.is_write() {
            TransferMode::Write
        } else {
            TransferMode::Read
        }
    }
}

/// One open file
#[derive(Debug)]
pub struct TransferContext {
    mode: TransferMode,
    /// Escaped request path
    path: String,
    temp_path: TempPath,
    file: Option<File>,
    reopened: bool,
    bytes_transferred: u64,
    /// Upload created at open, sent at close
    pending: Option<Request>,
}

impl TransferContext {
    /// Open `path` in the mode `flags` select.
    ///
    /// Read mode downloads the object before returning.
    pub async fn open(
        transport: &dyn Transport,
        path: &str,
        flags: OpenFlags,
        config: &TransferConfig,
    ) -> Result<Self> {
        let mode = TransferMode::from(flags);
        let dir = config.temp_dir.clone().unwrap_or_else(std::env::temp_dir);
        let (file, temp_path) = tempfile::Builder::new()
            .prefix(&config.temp_prefix)
            .tempfile_in(&dir)?
            .into_parts();
        trace!("open {} ({:?}) via {}", path, mode, temp_path.display());

        match mode {
            TransferMode::Write => Ok(Self {
                mode,
                path: path.to_string(),
                temp_path,
                file: Some(file),
                reopened: false,
                bytes_transferred: 0,
                pending: Some(transport.create_request(Method::Put, path)),
            }),
            TransferMode::Read => {
                let mut local = tokio::fs::File::from_std(file);
                let size = transport
                    .get(path, &mut local)
                    .await
                    .map_err(DavError::from_transport)?;
                local.flush().await?;
                drop(local);
                debug!("Downloaded {} ({} bytes)", path, size);

                Ok(Self {
                    mode,
                    path: path.to_string(),
                    temp_path,
                    file: None,
                    reopened: false,
                    bytes_transferred: 0,
                    pending: None,
                })
            }
        }
    }

    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Local temp file backing this handle
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    /// Read from the downloaded copy. Returns 0 at end of file.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.mode != TransferMode::Read {
            return Err(DavError::InvalidArgument(format!(
                "{} is not open for reading",
                self.path
            )));
        }

        if self.file.is_none() && !self.reopened {
            self.file = Some(File::open(&self.temp_path)?);
            self.reopened = true;
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };

        let n = file.read(buf)?;
        self.bytes_transferred += n as u64;
        Ok(n)
    }

    /// Append to the local copy with a single write
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.mode != TransferMode::Write {
            return Err(DavError::InvalidArgument(format!(
                "{} is not open for writing",
                self.path
            )));
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| DavError::InvalidArgument(format!("{} is closed", self.path)))?;

        let n = file.write(buf)?;
        if n < buf.len() {
            warn!(
                "Short write to {}: {} of {} bytes",
                self.temp_path.display(),
                n,
                buf.len()
            );
        }
        self.bytes_transferred += n as u64;
        Ok(n)
    }

    /// Finish the transfer. Write mode uploads the local copy.
    pub async fn close(mut self, transport: &dyn Transport) -> Result<()> {
        let result = match self.mode {
            TransferMode::Write => self.upload(transport).await,
            TransferMode::Read => {
                self.file = None;
                Ok(())
            }
        };

        let temp = self.temp_path.to_path_buf();
        if let Err(e) = self.temp_path.close() {
            warn!("Failed to remove temp file {}: {}", temp.display(), e);
        }
        result
    }

    async fn upload(&mut self, transport: &dyn Transport) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        let request = self
            .pending
            .take()
            .ok_or_else(|| {
                DavError::InvalidArgument(format!("{} has no pending upload", self.path))
            })?;

        let file = File::open(&self.temp_path)?;
        let len = file.metadata()?.len();
        debug!("Uploading {} ({} bytes)", self.path, len);

        let status = transport
            .dispatch(request, Some(RequestBody { file, len }))
            .await
            .map_err(DavError::from_transport)?;

        if (200..300).contains(&status) {
            return Ok(());
        }

        let message = format!("{} {}", status, reason_phrase(status));
        Err(match status::from_http_status(status) {
            Some(kind) => DavError::from_kind(kind, message),
            None => DavError::Backend(message),
        })
    }
}
