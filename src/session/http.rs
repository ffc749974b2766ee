//! Minimal HTTP/1.1 over the captured channel.
//!
//! The request is built byte-for-byte so the captured application records
//! contain exactly what was sent. Responses are parsed with `httparse` and
//! framed by Content-Length, chunked transfer encoding, or connection close.
//! Interim 1xx responses are skipped.

use httparse::{Response, Status, EMPTY_HEADER};
use thiserror::Error;

/// Maximum number of headers (or trailers) accepted per message.
const MAX_HEADERS: usize = 64;

/// Errors framing an HTTP response.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HttpError {
    /// Status line not of the form `HTTP/1.x <code> <reason>`.
    #[error("malformed status line")]
    MalformedStatusLine,

    /// Header line without a colon, or not UTF-8.
    #[error("malformed header line")]
    MalformedHeader,

    /// Content-Length not a decimal integer.
    #[error("invalid content-length")]
    InvalidContentLength,

    /// Chunk size line not hex, or chunk not CRLF-terminated.
    #[error("invalid chunk framing")]
    InvalidChunk,

    /// Connection closed before the message was complete.
    #[error("response truncated")]
    Truncated,

    /// Response exceeds the configured cap.
    #[error("response exceeds {limit} bytes")]
    TooLarge {
        /// Configured cap.
        limit: usize,
    },
}

/// Outgoing GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Value of the Host header.
    pub host: String,
    /// Request target.
    pub path: String,
    /// Value of the User-Agent header.
    pub user_agent: String,
    /// Bearer token for the Authorization header.
    pub bearer_token: Option<String>,
    /// Raw Cookie header value.
    pub cookie: Option<String>,
}

impl HttpRequest {
    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("GET {} HTTP/1.1\r\n", self.path);
        out.push_str(&format!("Host: {}\r\n", self.host));
        out.push_str(&format!("User-Agent: {}\r\n", self.user_agent));
        out.push_str("Content-Type: application/json\r\n");
        if let Some(token) = &self.bearer_token {
            out.push_str(&format!("Authorization: Bearer {}\r\n", token));
        }
        if let Some(cookie) = &self.cookie {
            out.push_str(&format!("Cookie: {}\r\n", cookie));
        }
        out.push_str("Connection: close\r\n\r\n");
        out.into_bytes()
    }
}

/// Parsed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Reason phrase.
    pub reason: String,
    /// Headers in arrival order.
    pub headers: Vec<(String, String)>,
    /// Decoded body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// First header with this name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Try to parse a complete response from `buf`.
    ///
    /// `Ok(None)` means more bytes are needed. With `eof` set, a body without
    /// length framing ends at the end of `buf`, and anything incomplete is
    /// [`HttpError::Truncated`].
    pub fn parse(buf: &[u8], eof: bool) -> Result<Option<HttpResponse>, HttpError> {
        let mut rest = buf;

        loop {
            let mut headers = [EMPTY_HEADER; MAX_HEADERS];
            let mut head = Response::new(&mut headers);
            let head_len = match head.parse(rest).map_err(head_error)? {
                Status::Complete(len) => len,
                Status::Partial if eof => return Err(HttpError::Truncated),
                Status::Partial => return Ok(None),
            };
            let status = head.code.ok_or(HttpError::MalformedStatusLine)?;

            // 100 Continue, 102 Processing, 103 Early Hints carry no body
            if (100..200).contains(&status) && status != 101 {
                rest = &rest[head_len..];
                continue;
            }

            let mut response = HttpResponse {
                status,
                reason: head.reason.unwrap_or_default().to_string(),
                headers: collect_headers(head.headers)?,
                body: Vec::new(),
            };
            let rest = &rest[head_len..];

            let chunked = response
                .header("transfer-encoding")
                .map(|v| v.to_ascii_lowercase().contains("chunked"))
                .unwrap_or(false);

            let body = if chunked {
                decode_chunked(rest)?
            } else if let Some(len) = response.header("content-length") {
                let len: usize = len.parse().map_err(|_| HttpError::InvalidContentLength)?;
                rest.get(..len).map(<[u8]>::to_vec)
            } else if status == 101 || status == 204 || status == 304 {
                Some(Vec::new())
            } else if eof {
                Some(rest.to_vec())
            } else {
                None
            };

            return match body {
                Some(body) => {
                    response.body = body;
                    Ok(Some(response))
                }
                None if eof => Err(HttpError::Truncated),
                None => Ok(None),
            };
        }
    }
}

fn head_error(e: httparse::Error) -> HttpError {
    match e {
        httparse::Error::Status | httparse::Error::Version => HttpError::MalformedStatusLine,
        _ => HttpError::MalformedHeader,
    }
}

fn collect_headers(headers: &[httparse::Header<'_>]) -> Result<Vec<(String, String)>, HttpError> {
    headers
        .iter()
        .map(|h| {
            let value = std::str::from_utf8(h.value).map_err(|_| HttpError::MalformedHeader)?;
            Ok((h.name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Decode a chunked body; `Ok(None)` if the terminating chunk has not arrived.
fn decode_chunked(mut rest: &[u8]) -> Result<Option<Vec<u8>>, HttpError> {
    let mut body = Vec::new();

    loop {
        let (line_len, size) = match httparse::parse_chunk_size(rest).map_err(|_| HttpError::InvalidChunk)? {
            Status::Complete(parsed) => parsed,
            Status::Partial => return Ok(None),
        };
        rest = &rest[line_len..];

        if size == 0 {
            return decode_trailers(rest).map(|done| done.then_some(body));
        }

        // Chunk data plus its CRLF
        let framed = usize::try_from(size)
            .ok()
            .and_then(|size| size.checked_add(2))
            .ok_or(HttpError::InvalidChunk)?;
        let Some(chunk) = rest.get(..framed) else {
            return Ok(None);
        };
        let (data, crlf) = chunk.split_at(framed - 2);
        if crlf != b"\r\n" {
            return Err(HttpError::InvalidChunk);
        }
        body.extend_from_slice(data);
        rest = &rest[framed..];
    }
}

/// `true` once the trailer section (possibly empty) is complete.
fn decode_trailers(rest: &[u8]) -> Result<bool, HttpError> {
    let mut trailers = [EMPTY_HEADER; MAX_HEADERS];
    match httparse::parse_headers(rest, &mut trailers).map_err(|_| HttpError::InvalidChunk)? {
        Status::Complete(_) => Ok(true),
        Status::Partial => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> HttpRequest {
        HttpRequest {
            host: "api.example.com".into(),
            path: "/v1/balance".into(),
            user_agent: "tls-oracle/0.1".into(),
            bearer_token: Some("tok".into()),
            cookie: None,
        }
    }

    #[test]
    fn test_request_bytes() {
        let text = String::from_utf8(request().to_bytes()).unwrap();
        assert!(text.starts_with("GET /v1/balance HTTP/1.1\r\nHost: api.example.com\r\n"));
        assert!(text.contains("Content-Type: application/json\r\n"));
        assert!(text.contains("Authorization: Bearer tok\r\n"));
        assert!(!text.contains("Cookie"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_content_length_body() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        assert_eq!(HttpResponse::parse(&raw[..raw.len() - 1], false).unwrap(), None);

        let response = HttpResponse::parse(raw, false).unwrap().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.reason, "OK");
        assert_eq!(response.header("CONTENT-LENGTH"), Some("5"));
        assert_eq!(response.body, b"hello");
    }

    #[test]
    fn test_chunked_body() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\n{\"a\"\r\n3;ext=1\r\n:1}\r\n0\r\n\r\n";
        let response = HttpResponse::parse(raw, false).unwrap().unwrap();
        assert_eq!(response.body, b"{\"a\":1}");

        let partial = &raw[..raw.len() - 5];
        assert_eq!(HttpResponse::parse(partial, false).unwrap(), None);
        assert_eq!(HttpResponse::parse(partial, true), Err(HttpError::Truncated));
    }

    #[test]
    fn test_read_to_close_body() {
        let raw = b"HTTP/1.0 200 OK\r\n\r\nall of it";
        assert_eq!(HttpResponse::parse(raw, false).unwrap(), None);
        assert_eq!(HttpResponse::parse(raw, true).unwrap().unwrap().body, b"all of it");
    }

    #[test]
    fn test_chunk_trailers() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nok\r\n0\r\nX-Sum: 1\r\n\r\n";
        assert_eq!(HttpResponse::parse(raw, false).unwrap().unwrap().body, b"ok");
        assert_eq!(HttpResponse::parse(&raw[..raw.len() - 2], false).unwrap(), None);
    }

    #[test]
    fn test_oversized_chunk_size_is_an_error() {
        // Chunk size plus its CRLF overflows
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\nab";
        assert_eq!(HttpResponse::parse(raw, false), Err(HttpError::InvalidChunk));
        assert_eq!(HttpResponse::parse(raw, true), Err(HttpError::InvalidChunk));

        // Largest accepted size never completes from a short buffer
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nfffffffffffffff\r\nab";
        assert_eq!(HttpResponse::parse(raw, false).unwrap(), None);
        assert_eq!(HttpResponse::parse(raw, true), Err(HttpError::Truncated));
    }

    #[test]
    fn test_interim_responses_are_skipped() {
        let raw = b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 103 Early Hints\r\nLink: </a.css>\r\n\r\n\
HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
        let response = HttpResponse::parse(raw, false).unwrap().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.header("link"), None);
        assert_eq!(response.body, b"ok");

        // Only the interim head so far
        assert_eq!(HttpResponse::parse(b"HTTP/1.1 100 Continue\r\n\r\n", false).unwrap(), None);
        assert_eq!(
            HttpResponse::parse(b"HTTP/1.1 100 Continue\r\n\r\n", true),
            Err(HttpError::Truncated)
        );
    }

    #[test]
    fn test_malformed_responses() {
        assert_eq!(HttpResponse::parse(b"SMTP 220\r\n\r\n", false), Err(HttpError::MalformedStatusLine));
        assert_eq!(
            HttpResponse::parse(b"HTTP/1.1 200 OK\r\nbroken\r\n\r\n", false),
            Err(HttpError::MalformedHeader)
        );
        assert_eq!(
            HttpResponse::parse(b"HTTP/1.1 200 OK\r\nContent-Length: x\r\n\r\n", false),
            Err(HttpError::InvalidContentLength)
        );
        assert_eq!(
            HttpResponse::parse(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n", false),
            Err(HttpError::InvalidChunk)
        );
    }
}
