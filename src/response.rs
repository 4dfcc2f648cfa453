//! Parsed HTTP responses.

use bytes::Bytes;
use http::header::{HeaderMap, CONNECTION};
use http::{StatusCode, Version};

use crate::proto::{self, parse::ResponseHead};

/// A complete response: parsed head plus the accumulated body.
///
/// Cloning is cheap (the body is reference-counted), so the same response can
/// be observed by a callback and returned from an awaited request.
#[derive(Clone, Debug)]
pub struct Response {
    status: StatusCode,
    version: Version,
    reason: Option<String>,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    pub(crate) fn new(head: ResponseHead, body: Bytes) -> Response {
        Response {
            status: head.status,
            version: head.version,
            reason: head.reason,
            headers: head.headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// The reason phrase exactly as the peer sent it, when one was present.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// The body interpreted as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Whether the peer declared this connection reusable.
    pub(crate) fn keep_alive(&self) -> bool {
        self.headers
            .get(CONNECTION)
            .map(proto::connection_keep_alive)
            .unwrap_or(false)
    }
}
