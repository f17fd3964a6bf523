//! WebDAV XML bodies
//!
//! Builds PROPFIND / PROPPATCH request bodies and reads `207 Multi-Status`
//! answers into [`PropfindEntry`] values. Namespaces are resolved, so
//! `<D:href>`, `<d:href>` and `<href xmlns="DAV:">` are all the same element.

use std::borrow::Cow;

use xmlparser::{ElementEnd, Token, Tokenizer};

use super::{
    PropName, PropPatch, PropSet, PropfindEntry, TransportCode, TransportError, DAV_NAMESPACE,
};

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

/// PROPFIND body asking for `props`, or for all properties when empty
pub fn propfind_body(props: &[PropName]) -> String {
    let mut body = String::from(XML_DECLARATION);
    if props.is_empty() {
        body.push_str(r#"<D:propfind xmlns:D="DAV:"><D:allprop/></D:propfind>"#);
        return body;
    }
    body.push_str(r#"<D:propfind xmlns:D="DAV:"><D:prop>"#);
    for prop in props {
        push_element(&mut body, prop, None);
    }
    body.push_str("</D:prop></D:propfind>");
    body
}

/// PROPPATCH body applying `ops` in order
pub fn proppatch_body(ops: &[PropPatch]) -> String {
    let mut body = String::from(XML_DECLARATION);
    body.push_str(r#"<D:propertyupdate xmlns:D="DAV:">"#);
    for op in ops {
        let verb = if op.value.is_some() { "set" } else { "remove" };
        body.push_str(&format!("<D:{}><D:prop>", verb));
        push_element(&mut body, &op.name, op.value.as_deref());
        body.push_str(&format!("</D:prop></D:{}>", verb));
    }
    body.push_str("</D:propertyupdate>");
    body
}

fn push_element(body: &mut String, name: &PropName, value: Option<&str>) {
    let (open, close) = if name.namespace == DAV_NAMESPACE {
        (format!("D:{}", name.name), format!("D:{}", name.name))
    } else {
        (
            format!(r#"{} xmlns="{}""#, name.name, escape(&name.namespace)),
            name.name.to_string(),
        )
    };
    match value {
        Some(value) => body.push_str(&format!("<{}>{}</{}>", open, escape(value), close)),
        None => body.push_str(&format!("<{}/>", open)),
    }
}

/// Escape text for element content or a double-quoted attribute
pub fn escape(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Resolve the five predefined entities and character references
pub fn unescape(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find(';') else {
            out.push_str(&rest[start..]);
            return Cow::Owned(out);
        };
        let entity = &after[..end];
        let resolved = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match resolved {
            Some(c) => out.push(c),
            None => out.push_str(&rest[start..start + end + 2]),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Status code of an HTTP status line such as `HTTP/1.1 404 Not Found`
pub fn parse_status_line(line: &str) -> Option<u16> {
    line.split_whitespace().nth(1)?.parse().ok()
}

struct Frame {
    namespace: String,
    local: String,
    bindings: Vec<(String, String)>,
}

struct PendingElement {
    prefix: String,
    local: String,
    bindings: Vec<(String, String)>,
}

#[derive(Default)]
struct ResponseState {
    href: Option<String>,
    status: Option<u16>,
    props: PropSet,
}

struct PropertyState {
    name: PropName,
    depth: usize,
    children: Vec<String>,
}

#[derive(Default)]
struct MultistatusReader {
    stack: Vec<Frame>,
    entries: Vec<PropfindEntry>,
    response: Option<ResponseState>,
    propstat: Option<(PropSet, Option<u16>)>,
    property: Option<PropertyState>,
    text: String,
}

impl MultistatusReader {
    fn resolve(&self, pending: &PendingElement) -> String {
        pending
            .bindings
            .iter()
            .rev()
            .chain(self.stack.iter().rev().flat_map(|f| f.bindings.iter().rev()))
            .find(|(prefix, _)| *prefix == pending.prefix)
            .map(|(_, ns)| ns.clone())
            .unwrap_or_default()
    }

    /// Whether the element `up` levels above the top is `DAV:<local>`
    fn is_dav(&self, up: usize, local: &str) -> bool {
        self.stack
            .len()
            .checked_sub(up + 1)
            .and_then(|idx| self.stack.get(idx))
            .map(|f| f.namespace == DAV_NAMESPACE && f.local == local)
            .unwrap_or(false)
    }

    fn open(&mut self, pending: PendingElement) {
        let namespace = self.resolve(&pending);
        self.stack.push(Frame {
            namespace,
            local: pending.local,
            bindings: pending.bindings,
        });
        self.text.clear();

        let depth = self.stack.len();
        if let Some(property) = self.property.as_mut() {
            if depth == property.depth + 1 {
                if let Some(frame) = self.stack.last() {
                    property.children.push(frame.local.clone());
                }
            }
            return;
        }

        if self.is_dav(0, "response") {
            self.response = Some(ResponseState::default());
        } else if self.is_dav(0, "propstat") && self.response.is_some() {
            self.propstat = Some((PropSet::new(), None));
        } else if self.is_dav(1, "prop") && self.propstat.is_some() {
            if let Some(frame) = self.stack.last() {
                self.property = Some(PropertyState {
                    name: PropName::new(frame.namespace.clone(), frame.local.clone()),
                    depth,
                    children: Vec::new(),
                });
            }
        }
    }

    fn close(&mut self) {
        let depth = self.stack.len();

        if let Some(property) = self.property.take() {
            if depth != property.depth {
                self.property = Some(property);
            } else {
                let value = if property.children.is_empty() {
                    self.text.trim().to_string()
                } else {
                    property.children.join(" ")
                };
                if let Some((props, _)) = self.propstat.as_mut() {
                    props.insert(property.name, value);
                }
            }
        } else if self.is_dav(0, "href") && self.is_dav(1, "response") {
            if let Some(response) = self.response.as_mut() {
                response.href = Some(self.text.trim().to_string());
            }
        } else if self.is_dav(0, "status") && self.is_dav(1, "propstat") {
            if let Some((_, status)) = self.propstat.as_mut() {
                *status = parse_status_line(&self.text);
            }
        } else if self.is_dav(0, "status") && self.is_dav(1, "response") {
            if let Some(response) = self.response.as_mut() {
                response.status = parse_status_line(&self.text);
            }
        } else if self.is_dav(0, "propstat") {
            if let (Some((props, status)), Some(response)) =
                (self.propstat.take(), self.response.as_mut())
            {
                // Properties reported under a failing propstat do not exist
                if status.map_or(true, |s| (200..300).contains(&s)) {
                    response.props.extend(props);
                }
            }
        } else if self.is_dav(0, "response") {
            if let Some(response) = self.response.take() {
                if let Some(href) = response.href.filter(|h| !h.is_empty()) {
                    self.entries.push(PropfindEntry {
                        href,
                        status: response.status,
                        props: response.props,
                    });
                }
            }
        }

        self.stack.pop();
        self.text.clear();
    }
}

/// Read a `207 Multi-Status` body
pub fn parse_multistatus(body: &str) -> Result<Vec<PropfindEntry>, TransportError> {
    let mut reader = MultistatusReader::default();
    let mut pending: Option<PendingElement> = None;

    for token in Tokenizer::from(body) {
        let token = token.map_err(|e| {
            TransportError::new(TransportCode::Error, format!("Malformed multistatus body: {}", e))
        })?;

        match token {
            Token::ElementStart { prefix, local, .. } => {
                pending = Some(PendingElement {
                    prefix: prefix.as_str().to_string(),
                    local: local.as_str().to_string(),
                    bindings: Vec::new(),
                });
            }
            Token::Attribute {
                prefix,
                local,
                value,
                ..
            } => {
                if let Some(element) = pending.as_mut() {
                    if prefix.as_str() == "xmlns" {
                        let namespace = unescape(value.as_str()).into_owned();
                        element.bindings.push((local.as_str().to_string(), namespace));
                    } else if prefix.as_str().is_empty() && local.as_str() == "xmlns" {
                        element
                            .bindings
                            .push((String::new(), unescape(value.as_str()).into_owned()));
                    }
                }
            }
            Token::ElementEnd { end, .. } => match end {
                ElementEnd::Open => {
                    if let Some(element) = pending.take() {
                        reader.open(element);
                    }
                }
                ElementEnd::Empty => {
                    if let Some(element) = pending.take() {
                        reader.open(element);
                        reader.close();
                    }
                }
                ElementEnd::Close(..) => reader.close(),
            },
            Token::Text { text } => reader.text.push_str(&unescape(text.as_str())),
            Token::Cdata { text, .. } => reader.text.push_str(text.as_str()),
            _ => {}
        }
    }

    Ok(reader.entries)
}
