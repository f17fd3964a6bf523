//! URI and request-path helpers
//!
//! Callers hand the adapter full URIs (`ownclouds://host/dav/dir/file`).
//! Transports work on escaped request paths (`/dav/dir/file`), catalogs on
//! decoded paths.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;

use crate::error::{DavError, Result};

/// Characters escaped in request paths
const PATH_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Escaped request path of a URI. A bare absolute path is accepted as well.
pub fn request_path(uri: &str) -> Result<String> {
    if uri.starts_with('/') {
        return Ok(escape_path(&decode_path(uri)));
    }

    let url = Url::parse(uri)
        .map_err(|e| DavError::InvalidArgument(format!("Invalid URI {:?}: {}", uri, e)))?;

    let path = url.path();
    if path.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(path.to_string())
    }
}

/// Percent-decode a path, replacing invalid UTF-8 sequences
pub fn decode_path(path: &str) -> String {
    percent_decode_str(path).decode_utf8_lossy().into_owned()
}

/// Percent-escape a decoded path
pub fn escape_path(path: &str) -> String {
    utf8_percent_encode(path, PATH_SET).to_string()
}

/// Path component of an href, which servers may send as an absolute URL
pub fn href_path(href: &str) -> String {
    if href.starts_with('/') {
        return href.to_string();
    }
    match Url::parse(href) {
        Ok(url) if !url.path().is_empty() => url.path().to_string(),
        _ => href.to_string(),
    }
}

/// Final segment of a path or URI, ignoring a trailing separator
pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Everything before the final segment of a path or URI
pub fn dirname(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/",
        Some(idx) => &trimmed[..idx],
        None => ".",
    }
}

/// Compare two request paths, ignoring escaping differences and a trailing
/// separator
pub fn same_path(a: &str, b: &str) -> bool {
    let a = decode_path(a);
    let b = decode_path(b);
    let a = a.trim_end_matches('/');
    let b = b.trim_end_matches('/');
    a == b
}

/// Path with exactly one trailing separator, as MKCOL expects
pub fn collection_path(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_path_from_custom_scheme() {
        let uri = "ownclouds://user:pw@cloud.example.com:8443/dav/My File.txt";
        let path = request_path(uri).unwrap();
        assert_eq!(path, "/dav/My%20File.txt");
    }

    #[test]
    fn test_request_path_without_path() {
        assert_eq!(request_path("owncloud://host").unwrap(), "/");
    }

    #[test]
    fn test_request_path_from_bare_path() {
        assert_eq!(request_path("/dav/a b").unwrap(), "/dav/a%20b");
        assert_eq!(request_path("/dav/a%20b").unwrap(), "/dav/a%20b");
    }

    #[test]
    fn test_request_path_rejects_garbage() {
        assert!(request_path("not a uri").is_err());
    }

    #[test]
    fn test_decode_and_escape() {
        assert_eq!(decode_path("/dav/%C3%A4%20x"), "/dav/ä x");
        assert_eq!(escape_path("/dav/ä x"), "/dav/%C3%A4%20x");
    }

    #[test]
    fn test_href_path() {
        assert_eq!(href_path("/dav/a"), "/dav/a");
        assert_eq!(href_path("https://host:8443/dav/a%20b"), "/dav/a%20b");
    }

    #[test]
    fn test_basename_and_dirname() {
        assert_eq!(basename("/dav/dir/file.txt"), "file.txt");
        assert_eq!(basename("/dav/dir/"), "dir");
        assert_eq!(basename("owncloud://host/dav/x"), "x");
        assert_eq!(dirname("owncloud://host/dav/dir/file.txt"), "owncloud://host/dav/dir");
        assert_eq!(dirname("/dav/"), "/");
        assert_eq!(dirname("/file"), "/");
    }

    #[test]
    fn test_same_path() {
        assert!(same_path("/dav/dir/", "/dav/dir"));
        assert!(same_path("/dav/a%20b", "/dav/a b"));
        assert!(!same_path("/dav/a", "/dav/b"));
    }

    #[test]
    fn test_collection_path() {
        assert_eq!(collection_path("/dav/new"), "/dav/new/");
        assert_eq!(collection_path("/dav/new/"), "/dav/new/");
    }
}
