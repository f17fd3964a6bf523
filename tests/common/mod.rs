//! Shared harness for adapter integration tests
//!
//! Each test gets its own in-memory server, an adapter connected to it and
//! a private temp directory for transfer files.

#![allow(dead_code)]

use std::path::Path;

use tempfile::TempDir;
use webdav_adapter::config::Config;
use webdav_adapter::transfer::OpenFlags;
use webdav_adapter::transport::memory::MemoryServer;
use webdav_adapter::DavAdapter;

pub const BASE: &str = "owncloud://cloud.test/dav";

pub struct TestContext {
    pub server: MemoryServer,
    pub dav: DavAdapter,
    pub temp_dir: TempDir,
}

impl TestContext {
    /// Fresh server holding only `/dav`
    pub fn new() -> Self {
        let server = MemoryServer::new();
        server.add_collection("/dav");

        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut config = Config::default();
        config.transfer.temp_dir = Some(temp_dir.path().to_path_buf());

        let dav = DavAdapter::new(config, Box::new(server.clone()))
            .expect("Failed to create adapter");

        Self {
            server,
            dav,
            temp_dir,
        }
    }

    /// Full URI of a path below the base collection
    pub fn uri(&self, path: &str) -> String {
        format!("{}/{}", BASE, path.trim_start_matches('/'))
    }

    /// Write `content` through open/write/close
    pub fn write_file(&mut self, path: &str, content: &[u8]) -> webdav_adapter::Result<()> {
        let uri = self.uri(path);
        let mut handle = self
            .dav
            .open(&uri, OpenFlags::WRITE_ONLY | OpenFlags::CREATE | OpenFlags::TRUNCATE)?;
        let mut written = 0;
        while written < content.len() {
            written += self.dav.write(&mut handle, &content[written..])?;
        }
        self.dav.close(handle)
    }

    /// Read a whole file through open/read/close
    pub fn read_file(&mut self, path: &str) -> webdav_adapter::Result<Vec<u8>> {
        let uri = self.uri(path);
        let mut handle = self.dav.open(&uri, OpenFlags::READ_ONLY)?;
        let mut content = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = self.dav.read(&mut handle, &mut buf)?;
            if n == 0 {
                break;
            }
            content.extend_from_slice(&buf[..n]);
        }
        self.dav.close(handle)?;
        Ok(content)
    }

    /// Names in listing order
    pub fn list(&mut self, path: &str) -> webdav_adapter::Result<Vec<String>> {
        let uri = self.uri(path);
        let mut dir = self.dav.opendir(&uri)?;
        let mut names = Vec::new();
        while let Some(entry) = self.dav.readdir(&mut dir) {
            names.push(entry.name);
        }
        self.dav.closedir(dir)?;
        Ok(names)
    }
}

/// Assert that no transfer temp file is left behind
pub fn assert_no_temp_files(dir: &Path) {
    let leftovers: Vec<_> = std::fs::read_dir(dir)
        .expect("Failed to read temp dir")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name())
        .collect();
    assert!(
        leftovers.is_empty(),
        "Expected no temp files in {:?}, found {:?}",
        dir,
        leftovers
    );
}

/// Deterministic pseudo-random content
pub fn pattern_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
