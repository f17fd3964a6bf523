//! Directory listings
//!
//! A listing is one PROPFIND turned into an ordered [`Catalog`] of
//! [`Resource`]s: failed entries first in the order the server sent them,
//! then collections, then everything else, each of the last two tiers in
//! byte-wise URI order.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::time::SystemTime;

use chrono::{DateTime, NaiveDateTime};
use tracing::{debug, trace};

use crate::error::{DavError, Result};
use crate::transport::{
    Depth, PropName, PropfindEntry, Transport, GET_CONTENT_LENGTH, GET_CONTENT_TYPE,
    GET_LAST_MODIFIED, RESOURCE_TYPE,
};
use crate::uri;

/// Properties requested for every listing
pub const LISTING_PROPS: [PropName; 4] = [
    GET_LAST_MODIFIED,
    GET_CONTENT_LENGTH,
    RESOURCE_TYPE,
    GET_CONTENT_TYPE,
];

/// What a listed resource is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Normal,
    Collection,
    /// The server answered this entry with a redirect
    Reference,
    /// The server answered this entry with a failure
    Error,
}

impl ResourceKind {
    fn tier(self) -> u8 {
        match self {
            ResourceKind::Error => 0,
            ResourceKind::Collection => 1,
            ResourceKind::Normal | ResourceKind::Reference => 2,
        }
    }
}

/// One listed entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Decoded path
    pub uri: String,
    pub name: String,
    pub kind: ResourceKind,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl Resource {
    pub fn from_entry(entry: &PropfindEntry) -> Self {
        let uri = uri::decode_path(&uri::href_path(&entry.href));
        let name = uri::basename(&uri).to_string();

        let kind = match entry.status {
            Some(status) if (300..400).contains(&status) => ResourceKind::Reference,
            Some(status) if !(200..300).contains(&status) => ResourceKind::Error,
            _ => classify(entry),
        };

        Self {
            name,
            kind,
            size: entry
                .props
                .get(&GET_CONTENT_LENGTH)
                .map(parse_size)
                .unwrap_or(0),
            modified: entry
                .props
                .get(&GET_LAST_MODIFIED)
                .and_then(parse_http_date),
            uri,
        }
    }

    pub fn is_collection(&self) -> bool {
        self.kind == ResourceKind::Collection
    }
}

/// A collection is a resource with no content length whose type says so
fn classify(entry: &PropfindEntry) -> ResourceKind {
    let has_length = entry.props.get(&GET_CONTENT_LENGTH).is_some();
    let is_collection = entry
        .props
        .get(&RESOURCE_TYPE)
        .map(|t| t.contains("collection"))
        .unwrap_or(false);

    if !has_length && is_collection {
        ResourceKind::Collection
    } else {
        ResourceKind::Normal
    }
}

/// Parse a content length.
///
/// Leading whitespace is skipped; a value with anything after its digits is
/// not a length and yields 0, as does an empty or overflowing one.
pub fn parse_size(text: &str) -> u64 {
    let text = text.trim_start();
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    if end != text.len() {
        return 0;
    }
    text.parse().unwrap_or(0)
}

/// Parse an HTTP date in any of the three formats RFC 2616 allows
pub fn parse_http_date(text: &str) -> Option<SystemTime> {
    let text = text.trim();

    // RFC 1123: Sun, 06 Nov 1994 08:49:37 GMT
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.into());
    }
    // RFC 850: Sunday, 06-Nov-94 08:49:37 GMT
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%A, %d-%b-%y %H:%M:%S GMT") {
        return Some(dt.and_utc().into());
    }
    // asctime: Sun Nov  6 08:49:37 1994
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%a %b %e %H:%M:%S %Y") {
        return Some(dt.and_utc().into());
    }
    DateTime::parse_from_rfc3339(text).ok().map(Into::into)
}

/// Catalog order: errors keep server order, the rest sort by tier then URI
fn catalog_order(a: &Resource, b: &Resource) -> Ordering {
    let (ta, tb) = (a.kind.tier(), b.kind.tier());
    if ta == 0 && tb == 0 {
        return Ordering::Equal;
    }
    ta.cmp(&tb).then_with(|| a.uri.as_bytes().cmp(b.uri.as_bytes()))
}

/// An open directory handle
#[derive(Debug, Clone)]
pub struct Catalog {
    target: String,
    entries: Vec<Resource>,
    cursor: usize,
}

impl Catalog {
    /// Build a catalog from raw listing entries.
    ///
    /// Entries naming `target` itself are dropped unless `include_target`.
    pub fn from_entries(target: &str, entries: &[PropfindEntry], include_target: bool) -> Self {
        let mut resources: Vec<Resource> = Vec::with_capacity(entries.len());
        let mut seen: HashSet<String> = HashSet::with_capacity(entries.len());
        for entry in entries {
            let path = uri::href_path(&entry.href);
            if !include_target && uri::same_path(&path, target) {
                trace!("Skipping listing target {}", path);
                continue;
            }
            let resource = Resource::from_entry(entry);
            if !seen.insert(resource.uri.clone()) {
                trace!("Skipping duplicate entry {}", resource.uri);
                continue;
            }
            resources.push(resource);
        }

        resources.sort_by(catalog_order);

        Self {
            target: uri::decode_path(target),
            entries: resources,
            cursor: 0,
        }
    }

    /// Decoded path that was listed
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn entries(&self) -> &[Resource] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the entry for `path`, falling back to the first entry
    pub fn find_or_first(&self, path: &str) -> Option<&Resource> {
        let wanted = uri::decode_path(path);
        self.entries
            .iter()
            .find(|r| uri::same_path(&r.uri, &wanted))
            .or_else(|| self.entries.first())
    }
}

impl Iterator for Catalog {
    type Item = Resource;

    fn next(&mut self) -> Option<Resource> {
        let resource = self.entries.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(resource)
    }
}

/// List `path` and build its catalog. A failed listing yields no catalog.
pub async fn fetch_catalog(
    transport: &dyn Transport,
    path: &str,
    depth: Depth,
    include_target: bool,
) -> Result<Catalog> {
    let entries = transport
        .propfind(path, depth, &LISTING_PROPS)
        .await
        .map_err(DavError::from_transport)?;

    let catalog = Catalog::from_entries(path, &entries, include_target);
    debug!(
        "Listed {}: {} entries ({} returned by server)",
        path,
        catalog.len(),
        entries.len()
    );
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PropSet;
    use std::time::{Duration, UNIX_EPOCH};

    fn file(href: &str, size: &str) -> PropfindEntry {
        let mut props = PropSet::new();
        props.insert(GET_CONTENT_LENGTH, size);
        props.insert(RESOURCE_TYPE, "");
        PropfindEntry {
            href: href.to_string(),
            status: None,
            props,
        }
    }

    fn collection(href: &str) -> PropfindEntry {
        let mut props = PropSet::new();
        props.insert(RESOURCE_TYPE, "collection");
        PropfindEntry {
            href: href.to_string(),
            status: None,
            props,
        }
    }

    fn failed(href: &str, status: u16) -> PropfindEntry {
        PropfindEntry {
            href: href.to_string(),
            status: Some(status),
            props: PropSet::new(),
        }
    }

    fn names(catalog: &Catalog) -> Vec<&str> {
        catalog.entries().iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_scenario_ordering() {
        let entries = vec![
            collection("/dav/dir/"),
            file("/dav/dir/z.txt", "5"),
            collection("/dav/dir/b/"),
            file("/dav/dir/a.txt", "10"),
        ];
        let catalog = Catalog::from_entries("/dav/dir", &entries, false);
        assert_eq!(names(&catalog), vec!["b", "a.txt", "z.txt"]);
        assert_eq!(catalog.entries()[1].size, 10);
        assert_eq!(catalog.entries()[1].kind, ResourceKind::Normal);
        assert_eq!(catalog.entries()[0].kind, ResourceKind::Collection);
    }

    #[test]
    fn test_errors_first_in_server_order() {
        let entries = vec![
            file("/d/a", "1"),
            failed("/d/y-err", 500),
            collection("/d/c/"),
            failed("/d/b-err", 403),
            failed("/d/moved", 301),
        ];
        let catalog = Catalog::from_entries("/d", &entries, false);
        assert_eq!(names(&catalog), vec!["y-err", "b-err", "c", "a", "moved"]);
        assert_eq!(catalog.entries()[4].kind, ResourceKind::Reference);
        assert_eq!(catalog.entries()[0].kind, ResourceKind::Error);
    }

    #[test]
    fn test_bytewise_uri_order() {
        let entries = vec![
            file("/d/b", "1"),
            file("/d/B", "1"),
            file("/d/%C3%A4", "1"),
            file("/d/a", "1"),
        ];
        let catalog = Catalog::from_entries("/d", &entries, false);
        assert_eq!(names(&catalog), vec!["B", "a", "b", "ä"]);
    }

    #[test]
    fn test_duplicate_hrefs_keep_first() {
        let mut entries: Vec<PropfindEntry> =
            (0..5000).map(|i| file(&format!("/d/f{:05}", i), "1")).collect();
        entries.push(file("/d/f00042", "9"));

        let catalog = Catalog::from_entries("/d", &entries, false);
        assert_eq!(catalog.len(), 5000);
        let dup = catalog.entries().iter().find(|r| r.name == "f00042").unwrap();
        assert_eq!(dup.size, 1);
    }

    #[test]
    fn test_target_exclusion_and_inclusion() {
        let entries = vec![collection("/dav/My%20Dir/"), file("/dav/My%20Dir/f", "1")];

        let excluded = Catalog::from_entries("/dav/My Dir", &entries, false);
        assert_eq!(excluded.len(), 1);
        assert_eq!(excluded.entries()[0].uri, "/dav/My Dir/f");

        let included = Catalog::from_entries("/dav/My%20Dir/", &entries, true);
        assert_eq!(included.len(), 2);
        assert_eq!(
            included.entries().iter().filter(|r| r.name == "My Dir").count(),
            1
        );
    }

    #[test]
    fn test_collection_requires_missing_length() {
        let mut entry = collection("/d/odd");
        entry.props.insert(GET_CONTENT_LENGTH, "0");
        assert_eq!(Resource::from_entry(&entry).kind, ResourceKind::Normal);
    }

    #[test]
    fn test_absolute_href() {
        let entry = file("https://host/dav/x%20y", "3");
        let resource = Resource::from_entry(&entry);
        assert_eq!(resource.uri, "/dav/x y");
        assert_eq!(resource.name, "x y");
    }

    #[test]
    fn test_iteration_advances_cursor() {
        let entries = vec![file("/d/a", "1"), file("/d/b", "2")];
        let mut catalog = Catalog::from_entries("/d", &entries, false);
        assert_eq!(catalog.next().unwrap().name, "a");
        assert_eq!(catalog.next().unwrap().name, "b");
        assert!(catalog.next().is_none());
        assert!(catalog.next().is_none());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("10"), 10);
        assert_eq!(parse_size("  42"), 42);
        assert_eq!(parse_size("12abc"), 0);
        assert_eq!(parse_size("12 "), 0);
        assert_eq!(parse_size(""), 0);
        assert_eq!(parse_size("-1"), 0);
        assert_eq!(parse_size("99999999999999999999999"), 0);
    }

    #[test]
    fn test_parse_http_date_formats() {
        let expected = UNIX_EPOCH + Duration::from_secs(784_111_777);
        assert_eq!(parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT"), Some(expected));
        assert_eq!(parse_http_date("Sunday, 06-Nov-94 08:49:37 GMT"), Some(expected));
        assert_eq!(parse_http_date("Sun Nov  6 08:49:37 1994"), Some(expected));
        assert_eq!(parse_http_date("yesterday"), None);
    }

    #[test]
    fn test_fetch_catalog_translates_failures() {
        use crate::session::{Authenticator, Endpoint, DEFAULT_READ_TIMEOUT};
        use crate::status::ErrorKind;
        use crate::transport::memory::MemoryServer;
        use crate::transport::{TransportFactory, TransportOptions};
        use std::sync::Arc;

        let server = MemoryServer::new();
        server.add_file("/dav/f", "abc");
        let (endpoint, _) = Endpoint::parse("owncloud://host/dav").unwrap();
        let options = TransportOptions {
            endpoint,
            read_timeout: DEFAULT_READ_TIMEOUT,
            user_agent: "test".to_string(),
        };
        let transport = server
            .create(&options, Arc::new(Authenticator::new(None, None)))
            .unwrap();

        let listing = fetch_catalog(transport.as_ref(), "/dav", Depth::One, false);
        let catalog = tokio_test::block_on(listing).unwrap();
        assert_eq!(catalog.target(), "/dav");
        assert_eq!(catalog.entries()[0].size, 3);

        let listing = fetch_catalog(transport.as_ref(), "/gone", Depth::One, false);
        let err = tokio_test::block_on(listing).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_find_or_first() {
        let entries = vec![collection("/d/"), file("/d/x", "1")];
        let catalog = Catalog::from_entries("/d", &entries, true);
        assert_eq!(catalog.find_or_first("/d/x").unwrap().name, "x");
        assert_eq!(catalog.find_or_first("/nowhere").unwrap().name, "d");
    }
}
