//! Stat form of listed resources and the single-slot stat cache

use std::time::SystemTime;

use tracing::trace;

use crate::catalog::{Resource, ResourceKind};

/// Mode bits reported for collections
pub const DIRECTORY_MODE: u32 = libc::S_IFDIR as u32 | 0o755;
/// Mode bits reported for everything else
pub const FILE_MODE: u32 = libc::S_IFREG as u32 | 0o644;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    /// Failed or redirected listing entry; the server said nothing usable
    Unknown,
}

/// What `stat` and `readdir` report about a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub name: String,
    pub file_type: FileType,
    pub size: u64,
    pub mtime: Option<SystemTime>,
    pub mode: u32,
}

impl FileStat {
    pub fn from_resource(resource: &Resource) -> Self {
        let file_type = match resource.kind {
            ResourceKind::Collection => FileType::Directory,
            ResourceKind::Normal => FileType::Regular,
            ResourceKind::Error | ResourceKind::Reference => FileType::Unknown,
        };
        Self {
            name: resource.name.clone(),
            file_type,
            size: resource.size,
            mtime: resource.modified,
            mode: permissions_for(resource.kind),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }
}

/// Synthesized permissions; WebDAV does not report any
pub fn permissions_for(kind: ResourceKind) -> u32 {
    match kind {
        ResourceKind::Collection => DIRECTORY_MODE,
        _ => FILE_MODE,
    }
}

/// Remembers the stat form of the last resource handed out by `readdir`.
///
/// Lookups are by base name only, so a hit is a hint rather than the truth.
#[derive(Debug, Default)]
pub struct StatCache {
    slot: Option<FileStat>,
}

impl StatCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached stat for `name`, if the slot holds it
    pub fn get(&self, name: &str) -> Option<&FileStat> {
        self.slot.as_ref().filter(|s| s.name == name)
    }

    pub fn store(&mut self, stat: FileStat) {
        trace!("Stat cache now holds {}", stat.name);
        self.slot = Some(stat);
    }

    /// Forget the slot if it holds `name`
    pub fn invalidate(&mut self, name: &str) {
        if self.get(name).is_some() {
            trace!("Stat cache dropped {}", name);
            self.slot = None;
        }
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }
}
