//! Request serialisation.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;
use http::header::{HeaderName, HeaderValue};
use http::{Method, Version};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Everything except RFC 3986 unreserved characters is escaped.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const AVERAGE_HEADER_SIZE: usize = 30;

static BOUNDARY_SEQ: AtomicU64 = AtomicU64::new(0);

/// The serialised shape of an outgoing request: method, origin-form target,
/// version, and headers kept as an ordered list so they hit the wire in
/// insertion order.
#[derive(Debug)]
pub(crate) struct RequestHead {
    pub(crate) method: Method,
    pub(crate) target: String,
    pub(crate) version: Version,
    pub(crate) headers: Vec<(HeaderName, HeaderValue)>,
}

impl RequestHead {
    pub(crate) fn contains(&self, name: &HeaderName) -> bool {
        self.headers.iter().any(|(n, _)| n == name)
    }

    pub(crate) fn get(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Inserts or replaces in place, preserving the original position on
    /// replacement.
    pub(crate) fn set(&mut self, name: HeaderName, value: HeaderValue) {
        if let Some(slot) = self.headers.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.headers.push((name, value));
        }
    }
}

/// Renders the head and body into a single write-ready buffer.
pub(crate) fn render(head: &RequestHead, body: &[u8]) -> BytesMut {
    let init_cap =
        30 + head.target.len() + head.headers.len() * AVERAGE_HEADER_SIZE + body.len();
    let mut dst = BytesMut::with_capacity(init_cap);

    dst.extend_from_slice(head.method.as_str().as_bytes());
    dst.extend_from_slice(b" ");
    dst.extend_from_slice(head.target.as_bytes());
    if head.version == Version::HTTP_10 {
        dst.extend_from_slice(b" HTTP/1.0\r\n");
    } else {
        dst.extend_from_slice(b" HTTP/1.1\r\n");
    }

    for (name, value) in &head.headers {
        dst.extend_from_slice(name.as_str().as_bytes());
        dst.extend_from_slice(b": ");
        dst.extend_from_slice(value.as_bytes());
        dst.extend_from_slice(b"\r\n");
    }
    dst.extend_from_slice(b"\r\n");

    dst.extend_from_slice(body);
    dst
}

/// RFC 3986 escaping of a single component.
pub(crate) fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

/// `k=v&k2=v2` with both sides RFC 3986 escaped.
pub(crate) fn encode_pairs(pairs: &[(String, String)]) -> String {
    let mut out = String::new();
    for (name, value) in pairs {
        if !out.is_empty() {
            out.push('&');
        }
        out.push_str(&encode_component(name));
        out.push('=');
        out.push_str(&encode_component(value));
    }
    out
}

/// One part of a `multipart/form-data` body.
#[derive(Clone, Debug)]
pub struct Part {
    pub name: String,
    pub contents: Vec<u8>,
    pub filename: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl Part {
    pub fn new(name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Part {
        Part {
            name: name.into(),
            contents: contents.into(),
            filename: None,
            headers: Vec::new(),
        }
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Part {
        self.filename = Some(filename.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Part {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A process-unique boundary token.
pub(crate) fn multipart_boundary() -> String {
    format!(
        "----polyfetch{:08x}{:08x}",
        std::process::id(),
        BOUNDARY_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

pub(crate) fn render_multipart(parts: &[Part], boundary: &str) -> BytesMut {
    let mut dst = BytesMut::new();
    for part in parts {
        dst.extend_from_slice(b"--");
        dst.extend_from_slice(boundary.as_bytes());
        dst.extend_from_slice(b"\r\n");

        dst.extend_from_slice(b"Content-Disposition: form-data; name=\"");
        dst.extend_from_slice(part.name.as_bytes());
        dst.extend_from_slice(b"\"");
        if let Some(filename) = &part.filename {
            dst.extend_from_slice(b"; filename=\"");
            dst.extend_from_slice(filename.as_bytes());
            dst.extend_from_slice(b"\"");
        }
        dst.extend_from_slice(b"\r\n");

        for (name, value) in &part.headers {
            dst.extend_from_slice(name.as_bytes());
            dst.extend_from_slice(b": ");
            dst.extend_from_slice(value.as_bytes());
            dst.extend_from_slice(b"\r\n");
        }

        dst.extend_from_slice(b"\r\n");
        dst.extend_from_slice(&part.contents);
        dst.extend_from_slice(b"\r\n");
    }
    dst.extend_from_slice(b"--");
    dst.extend_from_slice(boundary.as_bytes());
    dst.extend_from_slice(b"--\r\n");
    dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{CONNECTION, HOST};

    fn head() -> RequestHead {
        RequestHead {
            method: Method::GET,
            target: "/index?x=1".to_string(),
            version: Version::HTTP_11,
            headers: vec![
                (HOST, HeaderValue::from_static("example.com")),
                (CONNECTION, HeaderValue::from_static("keep-alive")),
            ],
        }
    }

    #[test]
    fn renders_request_line_and_headers_in_order() {
        let rendered = render(&head(), b"");
        assert_eq!(
            &rendered[..],
            &b"GET /index?x=1 HTTP/1.1\r\nhost: example.com\r\nconnection: keep-alive\r\n\r\n"[..]
        );
    }

    #[test]
    fn renders_http_10_line() {
        let mut h = head();
        h.version = Version::HTTP_10;
        let rendered = render(&h, b"");
        assert!(rendered.starts_with(b"GET /index?x=1 HTTP/1.0\r\n"));
    }

    #[test]
    fn body_follows_blank_line() {
        let rendered = render(&head(), b"a=b");
        assert!(rendered.ends_with(b"\r\n\r\na=b"));
    }

    #[test]
    fn set_replaces_in_place() {
        let mut h = head();
        h.set(CONNECTION, HeaderValue::from_static("close"));
        assert_eq!(h.headers.len(), 2);
        assert_eq!(
            h.get(&CONNECTION).map(|v| v.as_bytes()),
            Some(&b"close"[..])
        );
        // Still second in the list.
        assert_eq!(h.headers[1].0, CONNECTION);
    }

    #[test]
    fn rfc3986_component_escaping() {
        assert_eq!(encode_component("a b"), "a%20b");
        assert_eq!(encode_component("x~y-z._"), "x~y-z._");
        assert_eq!(encode_component("k&v=1"), "k%26v%3D1");
    }

    #[test]
    fn pair_encoding() {
        let pairs = vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "two words".to_string()),
        ];
        assert_eq!(encode_pairs(&pairs), "a=1&b=two%20words");
    }

    #[test]
    fn multipart_layout() {
        let parts = vec![
            Part::new("field", "value"),
            Part::new("file", &b"data"[..])
                .filename("f.txt")
                .header("Content-Type", "text/plain"),
        ];
        let body = render_multipart(&parts, "----bound");
        let text = String::from_utf8(body.to_vec()).expect("utf8");
        assert!(text.starts_with("------bound\r\nContent-Disposition: form-data; name=\"field\"\r\n\r\nvalue\r\n"));
        assert!(text.contains("name=\"file\"; filename=\"f.txt\"\r\nContent-Type: text/plain\r\n\r\ndata\r\n"));
        assert!(text.ends_with("------bound--\r\n"));
    }

    #[test]
    fn boundaries_are_unique() {
        assert_ne!(multipart_boundary(), multipart_boundary());
    }
}
