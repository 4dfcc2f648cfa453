//! The per-request protocol state machine and its option bag.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, Version};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::trace;
use url::Url;

use crate::connect::BoxTransport;
use crate::error::{Error, Parse};
use crate::event::EventEmitter;
use crate::origin::Origin;
use crate::proto::decode::{Decoded, Decoder};
use crate::proto::encode::{self, Part, RequestHead};
use crate::proto;
use crate::proto::parse::{self, ResponseHead};
use crate::response::Response;

pub(crate) const SUCCESS: &str = "success";
pub(crate) const ERROR: &str = "error";
pub(crate) const PROGRESS: &str = "progress";

const DEFAULT_REDIRECT_LIMIT: usize = 5;

pub(crate) type SuccessCallback = Arc<dyn Fn(&Response) + Send + Sync>;
pub(crate) type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;
pub(crate) type ProgressCallback = Arc<dyn Fn(&Bytes) + Send + Sync>;

/// Events a request emits over its lifetime. `Success` and `Error` are
/// mutually exclusive and fire at most once; `Progress` fires per decoded
/// body chunk.
#[derive(Debug)]
pub enum RequestEvent {
    Success(Response),
    Error(Error),
    Progress(Bytes),
}

/// The request body, as supplied by the caller.
#[derive(Clone, Debug, Default)]
pub enum Body {
    #[default]
    Empty,
    /// Raw bytes, sent as-is.
    Bytes(Bytes),
    /// Name/value pairs: form-encoded into the body for methods that carry
    /// one, appended to the query string otherwise.
    Form(Vec<(String, String)>),
    /// `multipart/form-data` with a generated boundary.
    Multipart(Vec<Part>),
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Body {
        Body::Bytes(b)
    }
}

impl From<Vec<u8>> for Body {
    fn from(b: Vec<u8>) -> Body {
        Body::Bytes(Bytes::from(b))
    }
}

impl From<&'static [u8]> for Body {
    fn from(b: &'static [u8]) -> Body {
        Body::Bytes(Bytes::from_static(b))
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Body {
        Body::Bytes(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Body {
    fn from(s: String) -> Body {
        Body::Bytes(Bytes::from(s))
    }
}

impl From<Vec<(String, String)>> for Body {
    fn from(pairs: Vec<(String, String)>) -> Body {
        Body::Form(pairs)
    }
}

impl From<Vec<Part>> for Body {
    fn from(parts: Vec<Part>) -> Body {
        Body::Multipart(parts)
    }
}

/// A query-string override. A `Pairs` value is RFC 3986 encoded; a `Raw`
/// string is trusted to be encoded already. Either replaces the query that
/// came with the URL.
#[derive(Clone, Debug)]
pub enum Query {
    Pairs(Vec<(String, String)>),
    Raw(String),
}

impl From<Vec<(String, String)>> for Query {
    fn from(pairs: Vec<(String, String)>) -> Query {
        Query::Pairs(pairs)
    }
}

impl From<&str> for Query {
    fn from(s: &str) -> Query {
        Query::Raw(s.to_string())
    }
}

impl From<String> for Query {
    fn from(s: String) -> Query {
        Query::Raw(s)
    }
}

/// Per-request options.
///
/// ```
/// use polyfetch::RequestOptions;
/// let opts = RequestOptions::new()
///     .method(http::Method::POST)
///     .header("x-trace", "1")
///     .data("a=1&b=2");
/// ```
#[derive(Clone, Default)]
pub struct RequestOptions {
    pub(crate) method: Option<Method>,
    pub(crate) version: Option<Version>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) data: Body,
    pub(crate) query: Option<Query>,
    pub(crate) redirect_limit: Option<usize>,
    pub(crate) redirect_count: usize,
    pub(crate) on_success: Option<SuccessCallback>,
    pub(crate) on_error: Option<ErrorCallback>,
    pub(crate) on_progress: Option<ProgressCallback>,
}

impl RequestOptions {
    pub fn new() -> RequestOptions {
        RequestOptions::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Protocol version for the request line; `HTTP/1.1` unless set.
    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Appends a header; later values for the same name replace earlier ones
    /// in place.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn data(mut self, data: impl Into<Body>) -> Self {
        self.data = data.into();
        self
    }

    /// Replaces the URL's query string.
    pub fn query(mut self, query: impl Into<Query>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// How many redirects to follow before failing; 5 unless set.
    pub fn redirect_limit(mut self, max: usize) -> Self {
        self.redirect_limit = Some(max);
        self
    }

    pub fn on_success(mut self, f: impl Fn(&Response) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_progress(mut self, f: impl Fn(&Bytes) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub(crate) fn redirect_max(&self) -> usize {
        self.redirect_limit.unwrap_or(DEFAULT_REDIRECT_LIMIT)
    }
}

impl std::fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOptions")
            .field("method", &self.method)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("query", &self.query)
            .finish()
    }
}

/// One outgoing request bound to a connection for its lifetime.
pub(crate) struct Request {
    head: RequestHead,
    body: Bytes,
    events: Arc<EventEmitter<RequestEvent>>,
    /// One-shot: flips false when the request is serialised onto the wire.
    writable: bool,
    /// True once any response byte has been read.
    received: bool,
}

impl Request {
    /// Folds the options into a serialisable request for `url`.
    pub(crate) fn build(
        url: &Url,
        origin: &Origin,
        options: &RequestOptions,
    ) -> crate::Result<Request> {
        let method = options.method.clone().unwrap_or(Method::GET);
        let carries_body = method == Method::POST
            || method == Method::PUT
            || method == Method::PATCH
            || method == Method::DELETE;

        let mut content_type: Option<HeaderValue> = None;
        let mut form_query: Option<String> = None;
        let body: Bytes = match &options.data {
            Body::Empty => Bytes::new(),
            Body::Bytes(b) => {
                content_type = Some(HeaderValue::from_static(
                    "application/x-www-form-urlencoded",
                ));
                b.clone()
            }
            Body::Form(pairs) => {
                if carries_body {
                    content_type = Some(HeaderValue::from_static(
                        "application/x-www-form-urlencoded",
                    ));
                    Bytes::from(encode::encode_pairs(pairs))
                } else {
                    form_query = Some(encode::encode_pairs(pairs));
                    Bytes::new()
                }
            }
            Body::Multipart(parts) => {
                let boundary = encode::multipart_boundary();
                let value = format!("multipart/form-data; boundary={}", boundary);
                content_type = Some(
                    HeaderValue::from_str(&value)
                        .map_err(|_| Error::new_parse(Parse::Header))?,
                );
                encode::render_multipart(parts, &boundary).freeze()
            }
        };

        let mut query = match &options.query {
            Some(Query::Pairs(pairs)) => Some(encode::encode_pairs(pairs)),
            Some(Query::Raw(raw)) => Some(raw.clone()),
            None => url.query().map(str::to_string),
        };
        if let Some(extra) = form_query {
            query = Some(match query {
                Some(q) if !q.is_empty() => format!("{}&{}", q, extra),
                _ => extra,
            });
        }
        let target = match query {
            Some(q) if !q.is_empty() => format!("{}?{}", url.path(), q),
            _ => url.path().to_string(),
        };

        let mut head = RequestHead {
            method,
            target,
            version: options.version.unwrap_or(Version::HTTP_11),
            headers: Vec::new(),
        };
        head.set(
            HOST,
            HeaderValue::from_str(&origin.host_header())
                .map_err(|_| Error::new_parse(Parse::Header))?,
        );
        head.set(CONNECTION, HeaderValue::from_static("keep-alive"));
        head.set(
            USER_AGENT,
            HeaderValue::from_static(concat!("polyfetch/", env!("CARGO_PKG_VERSION"))),
        );
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::new_parse(Parse::Header))?;
            let value =
                HeaderValue::from_str(value).map_err(|_| Error::new_parse(Parse::Header))?;
            head.set(name, value);
        }
        if !body.is_empty() {
            if let Some(ct) = content_type {
                if !head.contains(&CONTENT_TYPE) {
                    head.set(CONTENT_TYPE, ct);
                }
            }
            let mut len = itoa::Buffer::new();
            head.set(
                CONTENT_LENGTH,
                HeaderValue::from_str(len.format(body.len() as u64))
                    .map_err(|_| Error::new_parse(Parse::Header))?,
            );
        }

        Ok(Request {
            head,
            body,
            events: Arc::new(EventEmitter::new()),
            writable: true,
            received: false,
        })
    }

    pub(crate) fn events(&self) -> &Arc<EventEmitter<RequestEvent>> {
        &self.events
    }

    pub(crate) fn received_any(&self) -> bool {
        self.received
    }

    /// Makes the request writable again for a retry on a fresh connection.
    pub(crate) fn rewind(&mut self) {
        self.writable = true;
        self.received = false;
    }

    /// Serialises the request onto `io` and drives the response to
    /// completion. Returns the response and whether the connection may be
    /// reused afterwards.
    pub(crate) async fn dispatch(
        &mut self,
        io: &mut BoxTransport,
    ) -> crate::Result<(Response, bool)> {
        if !self.writable {
            return Err(Error::new_reused());
        }
        self.writable = false;

        let wire = encode::render(&self.head, &self.body);
        trace!("sending {} request bytes", wire.len());
        io.write_all(&wire).await?;
        io.flush().await?;

        let mut recv = BytesMut::with_capacity(8192);
        let head = loop {
            if let Some(head) = parse::parse_head(&mut recv)? {
                break head;
            }
            let n = io.read_buf(&mut recv).await?;
            if n == 0 {
                return Err(Error::new_closed());
            }
            self.received = true;
        };
        trace!("response head: {} {:?}", head.status, head.version);

        let mut decoder = match self.body_mode(&head) {
            Some(decoder) => decoder,
            None => {
                let response = Response::new(head, Bytes::new());
                let reusable =
                    self.request_keep_alive() && response.keep_alive() && recv.is_empty();
                return Ok((response, reusable));
            }
        };

        let mut body = BytesMut::new();
        let mut peer_closed = false;
        loop {
            match decoder.decode(&mut recv)? {
                Decoded::Data(data) => {
                    body.extend_from_slice(&data);
                    self.events.emit(PROGRESS, &RequestEvent::Progress(data));
                }
                Decoded::Complete => break,
                Decoded::NeedMore => {
                    let n = io.read_buf(&mut recv).await?;
                    if n == 0 {
                        decoder.on_eof()?;
                        peer_closed = true;
                        break;
                    }
                    self.received = true;
                }
            }
        }

        let response = Response::new(head, body.freeze());
        let reusable = !peer_closed
            && !decoder.is_eof_mode()
            && self.request_keep_alive()
            && response.keep_alive()
            && recv.is_empty();
        Ok((response, reusable))
    }

    /// Reuse needs HTTP/1.1 and a `Connection: keep-alive` declaration on
    /// both sides; this is our side of the agreement.
    fn request_keep_alive(&self) -> bool {
        self.head.version == Version::HTTP_11
            && self
                .head
                .get(&CONNECTION)
                .map(proto::connection_keep_alive)
                .unwrap_or(false)
    }

    /// Picks the body framing, or `None` when the response has no body.
    fn body_mode(&self, head: &ResponseHead) -> Option<Decoder> {
        if self.head.method == Method::HEAD {
            return None;
        }
        let status = head.status.as_u16();
        let content_length = proto::content_length_parse(&head.headers);
        if content_length == Some(0)
            || head.status.is_informational()
            || status == 204
            || status == 304
        {
            return None;
        }
        if proto::transfer_encoding_non_identity(&head.headers) {
            return Some(Decoder::chunked());
        }
        match content_length {
            Some(len) => Some(Decoder::length(len)),
            None => Some(Decoder::eof()),
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.head.method)
            .field("target", &self.head.target)
            .field("writable", &self.writable)
            .finish()
    }
}
