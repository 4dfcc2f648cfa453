//! Response head parsing.

use bytes::{Buf, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{StatusCode, Version};
use tracing::trace;

use crate::error::{Error, Parse};

const MAX_HEADERS: usize = 100;

/// A reasonable bound on how many bytes a response head may occupy before it
/// is rejected outright.
const MAX_HEAD_BYTES: usize = 64 * 1024;

#[derive(Debug)]
pub(crate) struct ResponseHead {
    pub(crate) version: Version,
    pub(crate) status: StatusCode,
    pub(crate) reason: Option<String>,
    pub(crate) headers: HeaderMap,
}

/// Attempts to parse a complete response head out of `buf`.
///
/// On success the head bytes (through the blank line) are consumed from
/// `buf`, leaving any already-received body bytes in place. Returns
/// `Ok(None)` while the head is still incomplete.
pub(crate) fn parse_head(buf: &mut BytesMut) -> crate::Result<Option<ResponseHead>> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut consumed = 0;
    let mut parsed = None;
    {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut res = httparse::Response::new(&mut headers);
        trace!("Response.parse([Header; {}], [u8; {}])", MAX_HEADERS, buf.len());
        match res.parse(buf.as_ref())? {
            httparse::Status::Complete(len) => {
                trace!("Response.parse Complete({})", len);
                consumed = len;

                let code = res.code.ok_or(Error::new_parse(Parse::StatusLine))?;
                let status = StatusCode::from_u16(code)
                    .map_err(|_| Error::new_parse(Parse::StatusLine))?;
                let version = if res.version == Some(0) {
                    Version::HTTP_10
                } else {
                    Version::HTTP_11
                };
                let reason = res
                    .reason
                    .filter(|reason| !reason.is_empty())
                    .map(str::to_string);

                let mut map = HeaderMap::with_capacity(res.headers.len());
                for header in res.headers.iter() {
                    let name = HeaderName::from_bytes(header.name.as_bytes())
                        .map_err(|_| Error::new_parse(Parse::Header))?;
                    let value = HeaderValue::from_bytes(header.value)
                        .map_err(|_| Error::new_parse(Parse::Header))?;
                    map.append(name, value);
                }

                parsed = Some(ResponseHead {
                    version,
                    status,
                    reason,
                    headers: map,
                });
            }
            httparse::Status::Partial => {
                if buf.len() > MAX_HEAD_BYTES {
                    return Err(Error::new_parse(Parse::TooLarge));
                }
            }
        }
    }

    match parsed {
        Some(head) => {
            buf.advance(consumed);
            Ok(Some(head))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_headers_and_leftover() {
        let mut buf = BytesMut::from(
            &b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: keep-alive\r\n\r\nok"[..],
        );
        let head = parse_head(&mut buf).expect("parse").expect("complete");
        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(head.version, Version::HTTP_11);
        assert_eq!(head.reason.as_deref(), Some("OK"));
        assert_eq!(
            head.headers.get("content-length").map(|v| v.as_bytes()),
            Some(&b"2"[..])
        );
        assert_eq!(&buf[..], b"ok");
    }

    #[test]
    fn partial_returns_none() {
        let mut buf = BytesMut::from(&b"HTTP/1.1 200 OK\r\nContent-"[..]);
        assert!(parse_head(&mut buf).expect("parse").is_none());
        assert_eq!(&buf[..], b"HTTP/1.1 200 OK\r\nContent-");
    }

    #[test]
    fn empty_reason_is_allowed() {
        let mut buf = BytesMut::from(&b"HTTP/1.1 204 \r\n\r\n"[..]);
        let head = parse_head(&mut buf).expect("parse").expect("complete");
        assert_eq!(head.status, StatusCode::NO_CONTENT);
        assert_eq!(head.reason, None);
    }

    #[test]
    fn http_10_version() {
        let mut buf = BytesMut::from(&b"HTTP/1.0 200 OK\r\n\r\n"[..]);
        let head = parse_head(&mut buf).expect("parse").expect("complete");
        assert_eq!(head.version, Version::HTTP_10);
    }

    #[test]
    fn malformed_start_line_fails() {
        let mut buf = BytesMut::from(&b"BLAH nonsense\r\n\r\n"[..]);
        assert!(parse_head(&mut buf).expect_err("reject").is_parse());

        let mut buf = BytesMut::from(&b"HTTP/1.1 20x OK\r\n\r\n"[..]);
        assert!(parse_head(&mut buf).expect_err("reject").is_parse());
    }

    #[test]
    fn duplicate_headers_are_kept() {
        let mut buf =
            BytesMut::from(&b"HTTP/1.1 200 OK\r\nSet-Thing: a\r\nSet-Thing: b\r\n\r\n"[..]);
        let head = parse_head(&mut buf).expect("parse").expect("complete");
        let values: Vec<_> = head.headers.get_all("set-thing").iter().collect();
        assert_eq!(values.len(), 2);
    }
}
