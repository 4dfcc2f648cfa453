//! HTTP/1.1 wire protocol: serialisation, head parsing, body decoding.

pub(crate) mod decode;
pub(crate) mod encode;
pub(crate) mod parse;

use http::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};

pub(crate) fn connection_keep_alive(value: &HeaderValue) -> bool {
    connection_has(value, "keep-alive")
}

fn connection_has(value: &HeaderValue, needle: &str) -> bool {
    if let Ok(s) = value.to_str() {
        for val in s.split(',') {
            if val.trim().eq_ignore_ascii_case(needle) {
                return true;
            }
        }
    }
    false
}

/// If multiple `Content-Length` headers were sent, everything can still be
/// alright if they all contain the same value, and all parse correctly.
/// If not, the length is treated as unknown.
pub(crate) fn content_length_parse(headers: &HeaderMap) -> Option<u64> {
    let mut folded = None;
    for value in headers.get_all(CONTENT_LENGTH) {
        let n: u64 = value.to_str().ok()?.trim().parse().ok()?;
        match folded {
            Some(prev) if prev != n => return None,
            _ => folded = Some(n),
        }
    }
    folded
}

/// True when a `Transfer-Encoding` header is present whose final encoding is
/// anything other than `identity`.
pub(crate) fn transfer_encoding_non_identity(headers: &HeaderMap) -> bool {
    let mut values = headers.get_all(TRANSFER_ENCODING).into_iter();
    let Some(last) = values.next_back() else {
        return false;
    };
    if let Ok(s) = last.to_str() {
        if let Some(encoding) = s.rsplit(',').next() {
            return !encoding.trim().eq_ignore_ascii_case("identity");
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HeaderName;

    fn map(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(
                HeaderName::from_bytes(name.as_bytes()).expect("name"),
                HeaderValue::from_str(value).expect("value"),
            );
        }
        headers
    }

    #[test]
    fn keep_alive_values() {
        assert!(connection_keep_alive(&HeaderValue::from_static("keep-alive")));
        assert!(connection_keep_alive(&HeaderValue::from_static("Keep-Alive")));
        assert!(connection_keep_alive(&HeaderValue::from_static(
            "upgrade, keep-alive"
        )));
        assert!(!connection_keep_alive(&HeaderValue::from_static("close")));
    }

    #[test]
    fn content_length_agreement() {
        assert_eq!(
            content_length_parse(&map(&[("content-length", "42")])),
            Some(42)
        );
        assert_eq!(
            content_length_parse(&map(&[
                ("content-length", "42"),
                ("content-length", "42")
            ])),
            Some(42)
        );
        assert_eq!(
            content_length_parse(&map(&[
                ("content-length", "42"),
                ("content-length", "7")
            ])),
            None
        );
        assert_eq!(content_length_parse(&map(&[("content-length", "nope")])), None);
    }

    #[test]
    fn transfer_encoding_detection() {
        assert!(transfer_encoding_non_identity(&map(&[(
            "transfer-encoding",
            "chunked"
        )])));
        assert!(transfer_encoding_non_identity(&map(&[(
            "transfer-encoding",
            "gzip, chunked"
        )])));
        assert!(!transfer_encoding_non_identity(&map(&[(
            "transfer-encoding",
            "identity"
        )])));
        assert!(!transfer_encoding_non_identity(&map(&[])));
    }
}
