//! Minimal HTTP/1.x head handling.
//!
//! The relay only needs to know whether a request asks for a WebSocket
//! upgrade, what it targets, and where each message body ends; heads are
//! replayed to the peer byte for byte.

use audit_log::{AuditEntry, Direction, EntryKind};
use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING, UPGRADE};
use http::{HeaderMap, Method, StatusCode, Version};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest request head accepted from a client.
pub const MAX_HEAD_LEN: usize = 64 * 1024;

pub(crate) const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Index just past the first blank line in `buf`, if any.
pub(crate) fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
        .map(|pos| pos + HEAD_TERMINATOR.len())
}

#[derive(Debug, thiserror::Error)]
pub enum HeadError {
    #[error("connection closed before the request head was complete")]
    Closed,

    #[error("request head exceeds {0} bytes")]
    TooLarge(usize),

    #[error("head is not valid UTF-8")]
    Encoding,

    #[error("malformed request line: {0:?}")]
    RequestLine(String),

    #[error("malformed status line: {0:?}")]
    StatusLine(String),

    #[error("invalid content length: {0:?}")]
    ContentLength(String),

    #[error("malformed header line: {0:?}")]
    HeaderLine(String),

    #[error("unsupported protocol version: {0}")]
    Version(String),

    #[error("invalid method: {0}")]
    Method(#[from] http::method::InvalidMethod),

    #[error("invalid status code: {0}")]
    Status(#[from] http::status::InvalidStatusCode),

    #[error("invalid header name: {0}")]
    HeaderName(#[from] http::header::InvalidHeaderName),

    #[error("invalid header value: {0}")]
    HeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where the body following a head ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLength {
    Empty,
    Fixed(u64),
    Chunked,
    /// Everything until the sender closes the connection.
    UntilClose,
}

fn parse_version(version: &str) -> Result<Version, HeadError> {
    match version {
        "HTTP/1.1" => Ok(Version::HTTP_11),
        "HTTP/1.0" => Ok(Version::HTTP_10),
        other => Err(HeadError::Version(other.to_string())),
    }
}

fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> Result<HeaderMap, HeadError> {
    let mut headers = HeaderMap::new();
    for line in lines.take_while(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HeadError::HeaderLine(line.to_string()))?;
        headers.append(
            HeaderName::from_bytes(name.as_bytes())?,
            HeaderValue::from_str(value.trim())?,
        );
    }
    Ok(headers)
}

/// Body framing declared by `headers`; `None` when they declare none.
fn declared_body(headers: &HeaderMap) -> Result<Option<BodyLength>, HeadError> {
    let chunked = headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .last()
        .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
    if chunked {
        return Ok(Some(BodyLength::Chunked));
    }

    match headers.get(CONTENT_LENGTH) {
        None => Ok(None),
        Some(value) => {
            let text = value.to_str().unwrap_or_default().trim();
            let len = text
                .parse::<u64>()
                .map_err(|_| HeadError::ContentLength(text.to_string()))?;
            Ok(Some(if len == 0 {
                BodyLength::Empty
            } else {
                BodyLength::Fixed(len)
            }))
        }
    }
}

/// A parsed request head together with the exact bytes it came from.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: HeaderMap,
    raw: Bytes,
}

impl RequestHead {
    /// Parse a complete head, terminator included.
    pub fn parse(raw: Bytes) -> Result<Self, HeadError> {
        let text = std::str::from_utf8(&raw).map_err(|_| HeadError::Encoding)?;
        let mut lines = text.split("\r\n");

        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split(' ');
        let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next())
        {
            (Some(m), Some(t), Some(v), None) if !m.is_empty() && !t.is_empty() => (m, t, v),
            _ => return Err(HeadError::RequestLine(request_line.to_string())),
        };

        let version = parse_version(version)?;
        let headers = parse_headers(lines)?;

        Ok(Self {
            method: Method::from_bytes(method.as_bytes())?,
            target: target.to_string(),
            version,
            headers,
            raw,
        })
    }

    /// The head exactly as received.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Whether this request asks to switch to the WebSocket protocol.
    pub fn is_websocket_upgrade(&self) -> bool {
        let upgrade = self
            .headers
            .get_all(UPGRADE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.split(',').any(|p| p.trim().eq_ignore_ascii_case("websocket")));

        let connection = self
            .headers
            .get_all(CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("upgrade")));

        upgrade && connection
    }

    /// How the request body is delimited. Requests without framing headers
    /// have no body.
    pub fn body_length(&self) -> Result<BodyLength, HeadError> {
        Ok(declared_body(&self.headers)?.unwrap_or(BodyLength::Empty))
    }

    /// The `upgrade` or `http` entry recording this request.
    pub fn audit_entry(&self, dir: Direction) -> AuditEntry {
        if self.is_websocket_upgrade() {
            AuditEntry::new(dir, EntryKind::Upgrade, self.target.clone())
        } else {
            AuditEntry::new(dir, EntryKind::Http, format!("{} {}", self.method, self.target))
        }
    }
}

/// Status and headers of an upstream response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub version: Version,
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// Parse a complete head, terminator included.
    pub fn parse(raw: &[u8]) -> Result<Self, HeadError> {
        let text = std::str::from_utf8(raw).map_err(|_| HeadError::Encoding)?;
        let mut lines = text.split("\r\n");

        let status_line = lines.next().unwrap_or_default();
        let mut parts = status_line.splitn(3, ' ');
        let (version, status) = match (parts.next(), parts.next()) {
            (Some(v), Some(code)) if code.len() == 3 => (v, code),
            _ => return Err(HeadError::StatusLine(status_line.to_string())),
        };

        Ok(Self {
            version: parse_version(version)?,
            status: StatusCode::from_bytes(status.as_bytes())?,
            headers: parse_headers(lines)?,
        })
    }

    /// How the response body is delimited. A response without framing
    /// headers runs until the upstream closes.
    pub fn body_length(&self) -> Result<BodyLength, HeadError> {
        if self.status.is_informational()
            || self.status == StatusCode::NO_CONTENT
            || self.status == StatusCode::NOT_MODIFIED
        {
            return Ok(BodyLength::Empty);
        }
        Ok(declared_body(&self.headers)?.unwrap_or(BodyLength::UntilClose))
    }
}

/// Read from `reader` until a full request head has arrived.
///
/// Returns the head and whatever bytes were read past it.
pub async fn read_request_head<R>(reader: &mut R) -> Result<(RequestHead, Bytes), HeadError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(4096);
    let mut searched: usize = 0;

    loop {
        let search_from = searched.saturating_sub(HEAD_TERMINATOR.len() - 1);
        if let Some(end) = find_head_end(&buf[search_from..]) {
            let rest = buf.split_off(search_from + end);
            let head = RequestHead::parse(buf.freeze())?;
            return Ok((head, rest.freeze()));
        }
        if buf.len() > MAX_HEAD_LEN {
            return Err(HeadError::TooLarge(MAX_HEAD_LEN));
        }

        searched = buf.len();
        if reader.read_buf(&mut buf).await? == 0 {
            return Err(HeadError::Closed);
        }
    }
}

/// A complete `Connection: close` response with a plain-text body.
pub fn simple_response(status: StatusCode) -> Vec<u8> {
    let reason = status.canonical_reason().unwrap_or("Unknown");
    format!(
        "HTTP/1.1 {} {reason}\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {reason}",
        status.as_u16(),
        reason.len(),
    )
    .into_bytes()
}
