//! Error and Result module.

use std::error::Error as StdError;
use std::fmt;

/// Result type often returned from methods that can have `polyfetch` errors.
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// Represents errors that can occur handling HTTP requests.
///
/// The struct is opaque; inspect it through the `is_*` accessors or through
/// [`Error::code`] for the legacy numeric timeout codes.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

#[derive(Debug)]
pub(crate) enum Kind {
    /// The request URL could not be parsed, or has no host.
    InvalidUrl,
    /// The connection could not be established within `connect_timeout`.
    ConnectTimeout { peer: String, secs: u64 },
    /// The response did not complete within `timeout`.
    ReadTimeout { peer: String, secs: u64 },
    /// The response could not be parsed.
    Parse(Parse),
    /// The redirect chain exceeded `allow_redirects.max`.
    TooManyRedirects,
    /// The peer closed the connection before the message completed.
    Closed,
    /// The request was already serialised onto the wire.
    Reused,
    /// Establishing the connection failed.
    Connect,
    /// An I/O error on an established connection.
    Io,
    /// The request was dropped before a response arrived.
    Canceled,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Parse {
    StatusLine,
    Header,
    Chunk,
    TooLarge,
}

impl Error {
    fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(crate) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    pub(crate) fn new_invalid_url() -> Error {
        Error::new(Kind::InvalidUrl)
    }

    pub(crate) fn new_connect_timeout(peer: String, secs: u64) -> Error {
        Error::new(Kind::ConnectTimeout { peer, secs })
    }

    pub(crate) fn new_read_timeout(peer: String, secs: u64) -> Error {
        Error::new(Kind::ReadTimeout { peer, secs })
    }

    pub(crate) fn new_parse(parse: Parse) -> Error {
        Error::new(Kind::Parse(parse))
    }

    pub(crate) fn new_too_many_redirects() -> Error {
        Error::new(Kind::TooManyRedirects)
    }

    pub(crate) fn new_closed() -> Error {
        Error::new(Kind::Closed)
    }

    pub(crate) fn new_reused() -> Error {
        Error::new(Kind::Reused)
    }

    pub(crate) fn new_connect<C: Into<Cause>>(cause: C) -> Error {
        Error::new(Kind::Connect).with(cause)
    }

    pub(crate) fn new_canceled() -> Error {
        Error::new(Kind::Canceled)
    }

    /// Legacy numeric code: 1 for a connect timeout, 128 for a read timeout.
    pub fn code(&self) -> Option<u32> {
        match self.inner.kind {
            Kind::ConnectTimeout { .. } => Some(1),
            Kind::ReadTimeout { .. } => Some(128),
            _ => None,
        }
    }

    /// Returns true if the request URL was rejected.
    pub fn is_invalid_url(&self) -> bool {
        matches!(self.inner.kind, Kind::InvalidUrl)
    }

    /// Returns true if the connection could not be established in time.
    pub fn is_connect_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::ConnectTimeout { .. })
    }

    /// Returns true if the response did not complete in time.
    pub fn is_read_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::ReadTimeout { .. })
    }

    /// Returns true if the response could not be parsed.
    pub fn is_parse(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse(_))
    }

    /// Returns true if the redirect limit was exceeded.
    pub fn is_too_many_redirects(&self) -> bool {
        matches!(self.inner.kind, Kind::TooManyRedirects)
    }

    /// Returns true if the peer closed the connection mid-message.
    pub fn is_closed(&self) -> bool {
        matches!(self.inner.kind, Kind::Closed)
    }

    /// Returns true if a request was serialised twice.
    pub fn is_reused(&self) -> bool {
        matches!(self.inner.kind, Kind::Reused)
    }

    /// Returns true if dialing the peer failed.
    pub fn is_connect(&self) -> bool {
        matches!(self.inner.kind, Kind::Connect)
    }

    /// Returns true for I/O failures on an established connection.
    pub fn is_io(&self) -> bool {
        matches!(self.inner.kind, Kind::Io)
    }

    /// Returns true if the request was dropped before completing.
    pub fn is_canceled(&self) -> bool {
        matches!(self.inner.kind, Kind::Canceled)
    }

    fn description(&self) -> String {
        match &self.inner.kind {
            Kind::InvalidUrl => "invalid url".to_string(),
            Kind::ConnectTimeout { peer, secs } => {
                format!("connect {} timeout after {}s", peer, secs)
            }
            Kind::ReadTimeout { peer, secs } => {
                format!("read {} timeout after {}s", peer, secs)
            }
            Kind::Parse(Parse::StatusLine) => "invalid status line".to_string(),
            Kind::Parse(Parse::Header) => "invalid header".to_string(),
            Kind::Parse(Parse::Chunk) => "bad chunked length".to_string(),
            Kind::Parse(Parse::TooLarge) => "message head too large".to_string(),
            Kind::TooManyRedirects => "too many redirects".to_string(),
            Kind::Closed => "connection closed before message completed".to_string(),
            Kind::Reused => "request already sent".to_string(),
            Kind::Connect => "error establishing connection".to_string(),
            Kind::Io => "io error".to_string(),
            Kind::Canceled => "request canceled".to_string(),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut b = f.debug_tuple("Error");
        b.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            b.field(cause);
        }
        b.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref cause) = self.inner.cause {
            write!(f, "{}: {}", self.description(), cause)
        } else {
            f.write_str(&self.description())
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::new(Kind::Io).with(err)
    }
}

impl From<httparse::Error> for Error {
    fn from(err: httparse::Error) -> Error {
        let parse = match err {
            httparse::Error::Status | httparse::Error::Version => Parse::StatusLine,
            httparse::Error::TooManyHeaders => Parse::TooLarge,
            _ => Parse::Header,
        };
        Error::new_parse(parse).with(err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Error {
        Error::new(Kind::InvalidUrl).with(err)
    }
}
