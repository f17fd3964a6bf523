//! In-process WebDAV store
//!
//! [`MemoryServer`] keeps a tree of files and collections behind a shared
//! lock and hands out [`MemoryTransport`]s that speak to it with WebDAV
//! semantics (status codes included). It also counts connections and
//! requests, and can be told to fail, which is what the test-suite uses it
//! for.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use super::{
    Depth, Method, PropName, PropPatch, PropSet, PropfindEntry, Request, RequestBody, Transport,
    TransportCode, TransportError, TransportFactory, TransportOptions, TransportResult,
    GET_CONTENT_LENGTH, GET_CONTENT_TYPE, GET_LAST_MODIFIED, LAST_MODIFIED, RESOURCE_TYPE,
};
use crate::session::{Authenticator, Credentials};
use crate::uri::{decode_path, escape_path};

#[derive(Debug, Clone)]
enum NodeKind {
    File(Vec<u8>),
    Collection,
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    modified: SystemTime,
    /// Insertion order, used as the listing order
    seq: u64,
    /// Response-level status reported in listings instead of properties
    status: Option<u16>,
    dead_props: HashMap<PropName, String>,
}

#[derive(Debug)]
struct Store {
    nodes: BTreeMap<String, Node>,
    next_seq: u64,
    required: Option<Credentials>,
    failures: HashMap<Method, u16>,
    connections: usize,
    requests: Vec<(Method, String)>,
}

impl Store {
    fn insert(&mut self, path: String, kind: NodeKind, modified: SystemTime) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let dead_props = self
            .nodes
            .get(&path)
            .map(|n| n.dead_props.clone())
            .unwrap_or_default();
        self.nodes.insert(
            path,
            Node {
                kind,
                modified,
                seq,
                status: None,
                dead_props,
            },
        );
    }

    fn ensure_parents(&mut self, path: &str) {
        let mut parent = parent_of(path);
        let mut missing = Vec::new();
        while let Some(p) = parent {
            if self.nodes.contains_key(p) {
                break;
            }
            missing.push(p.to_string());
            parent = parent_of(p);
        }
        for p in missing.into_iter().rev() {
            self.insert(p, NodeKind::Collection, SystemTime::now());
        }
    }

    fn parent_is_collection(&self, path: &str) -> bool {
        match parent_of(path) {
            Some(parent) => matches!(
                self.nodes.get(parent).map(|n| &n.kind),
                Some(NodeKind::Collection)
            ),
            None => true,
        }
    }

    fn subtree(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        self.nodes
            .keys()
            .filter(|k| k.as_str() == path || k.starts_with(&prefix))
            .cloned()
            .collect()
    }
}

/// Decoded, slash-normalized store key
fn normalize(path: &str) -> String {
    let decoded = decode_path(path);
    let trimmed = decoded.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Shared in-process WebDAV tree
#[derive(Debug, Clone)]
pub struct MemoryServer {
    store: Arc<Mutex<Store>>,
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryServer {
    /// An empty server holding only the root collection
    pub fn new() -> Self {
        let mut store = Store {
            nodes: BTreeMap::new(),
            next_seq: 0,
            required: None,
            failures: HashMap::new(),
            connections: 0,
            requests: Vec::new(),
        };
        store.insert("/".to_string(), NodeKind::Collection, SystemTime::now());
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    /// Reject requests until the authenticator produces `credentials`
    pub fn with_credentials(self, credentials: Credentials) -> Self {
        self.store.lock().required = Some(credentials);
        self
    }

    /// Add a file, creating missing parent collections
    pub fn add_file(&self, path: &str, data: impl Into<Vec<u8>>) {
        self.add_file_with_mtime(path, data, SystemTime::now());
    }

    pub fn add_file_with_mtime(&self, path: &str, data: impl Into<Vec<u8>>, modified: SystemTime) {
        let path = normalize(path);
        let mut store = self.store.lock();
        store.ensure_parents(&path);
        store.insert(path, NodeKind::File(data.into()), modified);
    }

    /// Add a collection, creating missing parent collections
    pub fn add_collection(&self, path: &str) {
        let path = normalize(path);
        let mut store = self.store.lock();
        store.ensure_parents(&path);
        store.insert(path, NodeKind::Collection, SystemTime::now());
    }

    /// Report `path` in listings with a response-level `status`
    pub fn set_status(&self, path: &str, status: u16) {
        if let Some(node) = self.store.lock().nodes.get_mut(&normalize(path)) {
            node.status = Some(status);
        }
    }

    /// Answer every request of `method` with `status` until cleared
    pub fn fail(&self, method: Method, status: u16) {
        self.store.lock().failures.insert(method, status);
    }

    pub fn clear_failures(&self) {
        self.store.lock().failures.clear();
    }

    pub fn exists(&self, path: &str) -> bool {
        self.store.lock().nodes.contains_key(&normalize(path))
    }

    pub fn is_collection(&self, path: &str) -> bool {
        matches!(
            self.store.lock().nodes.get(&normalize(path)).map(|n| &n.kind),
            Some(NodeKind::Collection)
        )
    }

    /// Contents of a file
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.store.lock().nodes.get(&normalize(path)).map(|n| &n.kind) {
            Some(NodeKind::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn modified(&self, path: &str) -> Option<SystemTime> {
        self.store.lock().nodes.get(&normalize(path)).map(|n| n.modified)
    }

    pub fn dead_prop(&self, path: &str, name: &PropName) -> Option<String> {
        self.store
            .lock()
            .nodes
            .get(&normalize(path))
            .and_then(|n| n.dead_props.get(name).cloned())
    }

    /// Number of transports created so far
    pub fn connections(&self) -> usize {
        self.store.lock().connections
    }

    /// Number of requests received so far
    pub fn requests(&self) -> usize {
        self.store.lock().requests.len()
    }

    /// Number of requests of `method` received so far
    pub fn requests_for(&self, method: Method) -> usize {
        self.store
            .lock()
            .requests
            .iter()
            .filter(|(m, _)| *m == method)
            .count()
    }

    /// Every request received so far, as (method, escaped path)
    pub fn request_log(&self) -> Vec<(Method, String)> {
        self.store.lock().requests.clone()
    }
}

impl TransportFactory for MemoryServer {
    fn create(
        &self,
        options: &TransportOptions,
        auth: Arc<Authenticator>,
    ) -> TransportResult<Arc<dyn Transport>> {
        self.store.lock().connections += 1;
        debug!("Memory transport created for {}", options.endpoint.base_url());
        Ok(Arc::new(MemoryTransport {
            store: self.store.clone(),
            auth,
            authorized: Mutex::new(false),
        }))
    }
}

/// Transport over a [`MemoryServer`]
pub struct MemoryTransport {
    store: Arc<Mutex<Store>>,
    auth: Arc<Authenticator>,
    authorized: Mutex<bool>,
}

impl MemoryTransport {
    /// Record the request, check credentials and return any injected status
    fn begin(&self, method: Method, path: &str) -> TransportResult<Option<u16>> {
        trace!("{} {}", method, path);
        let required = {
            let mut store = self.store.lock();
            store.requests.push((method, path.to_string()));
            store.required.clone()
        };

        if let Some(required) = required {
            if !*self.authorized.lock() {
                match self.auth.challenge("memory", 0) {
                    Some(credentials) if credentials == required => {
                        *self.authorized.lock() = true;
                    }
                    _ => {
                        return Err(TransportError::new(
                            TransportCode::Auth,
                            "401 Unauthorized",
                        ))
                    }
                }
            }
        }

        Ok(self.store.lock().failures.get(&method).copied())
    }

    /// Like `begin`, with an injected status turned into an error
    fn begin_checked(&self, method: Method, path: &str) -> TransportResult<()> {
        match self.begin(method, path)? {
            Some(status) => Err(TransportError::from_status(status)),
            None => Ok(()),
        }
    }

    fn entry(path: &str, node: &Node, props: &[PropName]) -> PropfindEntry {
        let mut href = escape_path(path);
        if matches!(node.kind, NodeKind::Collection) && !href.ends_with('/') {
            href.push('/');
        }

        if let Some(status) = node.status {
            return PropfindEntry {
                href,
                status: Some(status),
                props: PropSet::new(),
            };
        }

        let mut all = PropSet::new();
        all.insert(GET_LAST_MODIFIED, http_date(node.modified));
        match &node.kind {
            NodeKind::File(data) => {
                all.insert(GET_CONTENT_LENGTH, data.len().to_string());
                all.insert(RESOURCE_TYPE, "");
                all.insert(GET_CONTENT_TYPE, "application/octet-stream");
            }
            NodeKind::Collection => {
                all.insert(RESOURCE_TYPE, "collection");
            }
        }
        for (name, value) in &node.dead_props {
            all.insert(name.clone(), value.clone());
        }

        let props = if props.is_empty() {
            all
        } else {
            let mut selected = PropSet::new();
            for name in props {
                if let Some(value) = all.get(name) {
                    selected.insert(name.clone(), value);
                }
            }
            selected
        };

        PropfindEntry {
            href,
            status: None,
            props,
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn propfind(
        &self,
        path: &str,
        depth: Depth,
        props: &[PropName],
    ) -> TransportResult<Vec<PropfindEntry>> {
        self.begin_checked(Method::Propfind, path)?;

        let key = normalize(path);
        let store = self.store.lock();
        let target = store
            .nodes
            .get(&key)
            .ok_or_else(|| TransportError::from_status(404))?;

        let mut entries = vec![Self::entry(&key, target, props)];
        if depth != Depth::Zero && matches!(target.kind, NodeKind::Collection) {
            let mut children: Vec<(&String, &Node)> = store
                .subtree(&key)
                .iter()
                .filter(|k| **k != key)
                .filter_map(|k| store.nodes.get_key_value(k))
                .filter(|(k, _)| depth == Depth::Infinity || parent_of(k) == Some(key.as_str()))
                .collect();
            children.sort_by_key(|(_, node)| node.seq);
            entries.extend(children.into_iter().map(|(k, node)| Self::entry(k, node, props)));
        }
        Ok(entries)
    }

    async fn get(
        &self,
        path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> TransportResult<u64> {
        self.begin_checked(Method::Get, path)?;

        let data = {
            let store = self.store.lock();
            match store.nodes.get(&normalize(path)).map(|n| &n.kind) {
                Some(NodeKind::File(data)) => data.clone(),
                Some(NodeKind::Collection) => return Err(TransportError::from_status(405)),
                None => return Err(TransportError::from_status(404)),
            }
        };

        let write_failed = |e: std::io::Error| {
            TransportError::new(TransportCode::Error, format!("Write failed: {}", e))
        };
        sink.write_all(&data).await.map_err(write_failed)?;
        sink.flush().await.map_err(write_failed)?;
        Ok(data.len() as u64)
    }

    async fn dispatch(&self, request: Request, body: Option<RequestBody>) -> TransportResult<u16> {
        if let Some(status) = self.begin(request.method, &request.path)? {
            return Ok(status);
        }

        let key = normalize(&request.path);
        match request.method {
            Method::Put => {
                let mut data = Vec::new();
                if let Some(body) = body {
                    let mut file = tokio::fs::File::from_std(body.file);
                    file.read_to_end(&mut data).await.map_err(|e| {
                        TransportError::new(
                            TransportCode::Failed,
                            format!("Failed to read body: {}", e),
                        )
                    })?;
                    data.truncate(body.len as usize);
                }

                let mut store = self.store.lock();
                if !store.parent_is_collection(&key) {
                    return Ok(409);
                }
                let status = match store.nodes.get(&key).map(|n| &n.kind) {
                    Some(NodeKind::Collection) => return Ok(405),
                    Some(NodeKind::File(_)) => 204,
                    None => 201,
                };
                debug!("PUT {} ({} bytes)", key, data.len());
                store.insert(key, NodeKind::File(data), SystemTime::now());
                Ok(status)
            }
            Method::Get => {
                let mut sink = tokio::io::sink();
                self.get(&request.path, &mut sink).await.map(|_| 200)
            }
            Method::Delete => self.delete(&request.path).await.map(|_| 204),
            Method::Mkcol => self.mkcol(&request.path).await.map(|_| 201),
            Method::Propfind => self
                .propfind(&request.path, Depth::One, &[])
                .await
                .map(|_| 207),
            Method::Move | Method::Proppatch => Ok(400),
        }
    }

    async fn delete(&self, path: &str) -> TransportResult<()> {
        self.begin_checked(Method::Delete, path)?;

        let key = normalize(path);
        let mut store = self.store.lock();
        if !store.nodes.contains_key(&key) {
            return Err(TransportError::from_status(404));
        }
        if key == "/" {
            return Err(TransportError::from_status(403));
        }
        for k in store.subtree(&key) {
            store.nodes.remove(&k);
        }
        Ok(())
    }

    async fn move_resource(&self, from: &str, to: &str, overwrite: bool) -> TransportResult<()> {
        self.begin_checked(Method::Move, from)?;

        let from = normalize(from);
        let to = normalize(to);
        let mut store = self.store.lock();

        if !store.nodes.contains_key(&from) {
            return Err(TransportError::from_status(404));
        }
        if from == to {
            return Err(TransportError::from_status(403));
        }
        if to.starts_with(&format!("{}/", from)) {
            return Err(TransportError::from_status(409));
        }
        if !store.parent_is_collection(&to) {
            return Err(TransportError::from_status(409));
        }
        if store.nodes.contains_key(&to) {
            if !overwrite {
                return Err(TransportError::from_status(412));
            }
            for k in store.subtree(&to) {
                store.nodes.remove(&k);
            }
        }

        for old in store.subtree(&from) {
            if let Some(node) = store.nodes.remove(&old) {
                let new = format!("{}{}", to, &old[from.len()..]);
                store.nodes.insert(new, node);
            }
        }
        debug!("MOVE {} -> {}", from, to);
        Ok(())
    }

    async fn mkcol(&self, path: &str) -> TransportResult<()> {
        self.begin_checked(Method::Mkcol, path)?;

        let key = normalize(path);
        let mut store = self.store.lock();
        if store.nodes.contains_key(&key) {
            return Err(TransportError::from_status(405));
        }
        if !store.parent_is_collection(&key) {
            return Err(TransportError::from_status(409));
        }
        store.insert(key, NodeKind::Collection, SystemTime::now());
        Ok(())
    }

    async fn proppatch(&self, path: &str, ops: &[PropPatch]) -> TransportResult<()> {
        self.begin_checked(Method::Proppatch, path)?;

        let key = normalize(path);
        let mut store = self.store.lock();
        let node = store
            .nodes
            .get_mut(&key)
            .ok_or_else(|| TransportError::from_status(404))?;

        for op in ops {
            match &op.value {
                Some(value) => {
                    if op.name == LAST_MODIFIED {
                        if let Ok(secs) = value.trim().parse::<u64>() {
                            node.modified = UNIX_EPOCH + std::time::Duration::from_secs(secs);
                        }
                    }
                    node.dead_props.insert(op.name.clone(), value.clone());
                }
                None => {
                    node.dead_props.remove(&op.name);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Endpoint, DEFAULT_READ_TIMEOUT};
    use std::io::{Seek, Write};

    fn transport(server: &MemoryServer, auth: Authenticator) -> Arc<dyn Transport> {
        let (endpoint, _) = Endpoint::parse("owncloud://host/dav").unwrap();
        let options = TransportOptions {
            endpoint,
            read_timeout: DEFAULT_READ_TIMEOUT,
            user_agent: "test".to_string(),
        };
        server.create(&options, Arc::new(auth)).unwrap()
    }

    fn anonymous(server: &MemoryServer) -> Arc<dyn Transport> {
        transport(server, Authenticator::new(None, None))
    }

    #[tokio::test]
    async fn test_listing_keeps_insertion_order() {
        let server = MemoryServer::new();
        server.add_file("/dav/b.txt", "bb");
        server.add_collection("/dav/z");
        server.add_file("/dav/a b.txt", "a");
        server.add_file("/dav/z/nested", "n");

        let t = anonymous(&server);
        let entries = t.propfind("/dav", Depth::One, &[]).await.unwrap();
        let hrefs: Vec<_> = entries.iter().map(|e| e.href.as_str()).collect();
        assert_eq!(hrefs, vec!["/dav/", "/dav/b.txt", "/dav/z/", "/dav/a%20b.txt"]);
        assert_eq!(entries[1].props.get(&GET_CONTENT_LENGTH), Some("2"));
        assert_eq!(entries[2].props.get(&RESOURCE_TYPE), Some("collection"));

        let deep = t.propfind("/dav", Depth::Infinity, &[]).await.unwrap();
        assert_eq!(deep.len(), 5);
        let flat = t.propfind("/dav", Depth::Zero, &[]).await.unwrap();
        assert_eq!(flat.len(), 1);
    }

    #[tokio::test]
    async fn test_propfind_selects_requested_props() {
        let server = MemoryServer::new();
        server.add_file("/f", "x");
        let t = anonymous(&server);
        let entries = t.propfind("/f", Depth::Zero, &[GET_CONTENT_LENGTH]).await.unwrap();
        assert_eq!(entries[0].props.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_resource_is_404() {
        let server = MemoryServer::new();
        let t = anonymous(&server);
        let err = t.propfind("/nope", Depth::One, &[]).await.unwrap_err();
        assert_eq!(err.code, TransportCode::Error);
        assert_eq!(err.message, "404 Not Found");
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let server = MemoryServer::new();
        server.add_collection("/dav");
        let t = anonymous(&server);

        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"hello").unwrap();
        file.rewind().unwrap();
        let request = t.create_request(Method::Put, "/dav/new.txt");
        let status = t
            .dispatch(request, Some(RequestBody { file, len: 5 }))
            .await
            .unwrap();
        assert_eq!(status, 201);
        assert_eq!(server.file("/dav/new.txt").unwrap(), b"hello");

        let mut sink = Vec::new();
        let n = t.get("/dav/new.txt", &mut sink).await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(sink, b"hello");
    }

    #[tokio::test]
    async fn test_put_without_parent_conflicts() {
        let server = MemoryServer::new();
        let t = anonymous(&server);
        let request = t.create_request(Method::Put, "/missing/file");
        assert_eq!(t.dispatch(request, None).await.unwrap(), 409);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let server = MemoryServer::new();
        server.fail(Method::Put, 507);
        server.fail(Method::Mkcol, 423);
        let t = anonymous(&server);

        let request = t.create_request(Method::Put, "/file");
        assert_eq!(t.dispatch(request, None).await.unwrap(), 507);
        assert!(!server.exists("/file"));

        let err = t.mkcol("/dir").await.unwrap_err();
        assert_eq!(err.message, "423 Locked");

        server.clear_failures();
        t.mkcol("/dir").await.unwrap();
        assert!(server.is_collection("/dir"));
    }

    #[tokio::test]
    async fn test_move_subtree() {
        let server = MemoryServer::new();
        server.add_file("/a/x/f", "1");
        server.add_collection("/b");
        let t = anonymous(&server);

        t.move_resource("/a/x", "/b/y", true).await.unwrap();
        assert!(!server.exists("/a/x"));
        assert_eq!(server.file("/b/y/f").unwrap(), b"1");

        server.add_file("/a/z", "2");
        server.add_file("/b/taken", "3");
        let err = t.move_resource("/a/z", "/b/taken", false).await.unwrap_err();
        assert_eq!(err.message, "412 Precondition Failed");
    }

    #[tokio::test]
    async fn test_delete_and_mkcol() {
        let server = MemoryServer::new();
        server.add_file("/d/f", "1");
        let t = anonymous(&server);

        assert_eq!(t.mkcol("/d").await.unwrap_err().message, "405 Method Not Allowed");
        assert_eq!(t.mkcol("/x/y").await.unwrap_err().message, "409 Conflict");

        t.delete("/d").await.unwrap();
        assert!(!server.exists("/d/f"));
        assert_eq!(t.delete("/d").await.unwrap_err().message, "404 Not Found");
    }

    #[tokio::test]
    async fn test_proppatch_lastmodified() {
        let server = MemoryServer::new();
        server.add_file("/f", "1");
        let t = anonymous(&server);

        t.proppatch("/f", &[PropPatch::set(LAST_MODIFIED, "1700000000")])
            .await
            .unwrap();
        assert_eq!(
            server.modified("/f").unwrap(),
            UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000)
        );
        assert_eq!(server.dead_prop("/f", &LAST_MODIFIED).as_deref(), Some("1700000000"));
    }

    #[tokio::test]
    async fn test_required_credentials() {
        let server = MemoryServer::new().with_credentials(Credentials::new("u", Some("p".into())));

        let denied = anonymous(&server);
        let err = denied.propfind("/", Depth::Zero, &[]).await.unwrap_err();
        assert_eq!(err.code, TransportCode::Auth);

        let allowed = transport(
            &server,
            Authenticator::new(Some(Credentials::new("u", Some("p".into()))), None),
        );
        allowed.propfind("/", Depth::Zero, &[]).await.unwrap();
        assert_eq!(server.requests(), 2);
        assert_eq!(server.requests_for(Method::Propfind), 2);
    }

    #[test]
    fn test_http_date_format() {
        let t = UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
        assert_eq!(http_date(t), "Tue, 14 Nov 2023 22:13:20 GMT");
    }
}
