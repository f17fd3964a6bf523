//! Namespace and metadata operation tests

mod common;

use std::time::{Duration, UNIX_EPOCH};

use common::*;
use webdav_adapter::transport::{Method, LAST_MODIFIED};
use webdav_adapter::{ErrorKind, FileTimes};

#[test]
fn test_mkdir_and_rmdir() {
    let mut ctx = TestContext::new();
    let uri = ctx.uri("photos");

    ctx.dav.mkdir(&uri, 0o755).unwrap();
    assert!(ctx.server.is_collection("/dav/photos"));
    let log = ctx.server.request_log();
    assert!(log.contains(&(Method::Mkcol, "/dav/photos/".to_string())));

    ctx.dav.rmdir(&uri).unwrap();
    assert!(!ctx.server.exists("/dav/photos"));
}

#[test]
fn test_mkdir_existing_is_invalid_request() {
    let mut ctx = TestContext::new();
    ctx.server.add_collection("/dav/exists");
    let err = ctx.dav.mkdir(&ctx.uri("exists"), 0o755).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

#[test]
fn test_mkdir_without_parent_conflicts() {
    let mut ctx = TestContext::new();
    let err = ctx.dav.mkdir(&ctx.uri("a/b/c"), 0o755).unwrap_err();
    assert_eq!(err.errno(), libc::EINVAL);
}

#[test]
fn test_unlink() {
    let mut ctx = TestContext::new();
    ctx.server.add_file("/dav/old.log", "x");

    ctx.dav.unlink(&ctx.uri("old.log")).unwrap();
    assert!(!ctx.server.exists("/dav/old.log"));

    let err = ctx.dav.unlink(&ctx.uri("old.log")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_rename_overwrites_destination() {
    let mut ctx = TestContext::new();
    ctx.server.add_file("/dav/src.txt", "new");
    ctx.server.add_file("/dav/dst.txt", "old");

    ctx.dav
        .rename(&ctx.uri("src.txt"), &ctx.uri("dst.txt"))
        .unwrap();
    assert!(!ctx.server.exists("/dav/src.txt"));
    assert_eq!(ctx.server.file("/dav/dst.txt").unwrap(), b"new");
}

#[test]
fn test_rename_directory_with_spaces() {
    let mut ctx = TestContext::new();
    ctx.server.add_file("/dav/My Docs/a.txt", "1");

    ctx.dav
        .rename(&ctx.uri("My Docs"), &ctx.uri("Archived Docs"))
        .unwrap();
    assert_eq!(ctx.server.file("/dav/Archived Docs/a.txt").unwrap(), b"1");
}

#[test]
fn test_rename_missing_source() {
    let mut ctx = TestContext::new();
    let err = ctx
        .dav
        .rename(&ctx.uri("nothing"), &ctx.uri("something"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_utimes_sets_modification_time() {
    let mut ctx = TestContext::new();
    ctx.server.add_file("/dav/f", "x");
    let accessed = UNIX_EPOCH + Duration::from_secs(1_600_000_000);
    let modified = UNIX_EPOCH + Duration::from_secs(1_650_000_000);

    ctx.dav
        .utimes(&ctx.uri("f"), Some(FileTimes::new(accessed, modified)))
        .unwrap();
    assert_eq!(
        ctx.server.dead_prop("/dav/f", &LAST_MODIFIED).as_deref(),
        Some("1650000000")
    );
    assert_eq!(ctx.dav.stat(&ctx.uri("f")).unwrap().mtime, Some(modified));
}

#[test]
fn test_utimes_on_missing_resource() {
    let mut ctx = TestContext::new();
    let now = std::time::SystemTime::now();
    let err = ctx
        .dav
        .utimes(&ctx.uri("missing"), Some(FileTimes::new(now, now)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_session_connects_once() {
    let mut ctx = TestContext::new();
    ctx.server.add_file("/dav/a", "1");

    ctx.dav.stat(&ctx.uri("a")).unwrap();
    ctx.dav.mkdir(&ctx.uri("d"), 0o755).unwrap();
    ctx.list("").unwrap();
    assert_eq!(ctx.server.connections(), 1);
}

#[test]
fn test_request_timeout_is_transient() {
    let mut ctx = TestContext::new();
    ctx.server.fail(Method::Delete, 408);
    let err = ctx.dav.unlink(&ctx.uri("x")).unwrap_err();
    assert_eq!(err.errno(), libc::EAGAIN);
}
