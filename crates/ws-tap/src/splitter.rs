//! Separates HTTP/1 messages from the WebSocket stream that may follow
//! them on the same connection.
//!
//! A connection can carry any number of plain requests (keep-alive) before
//! one of them upgrades. Each direction is tracked on its own: the client
//! side walks request heads and bodies, the upstream side walks response
//! heads and bodies, and each switches to WebSocket framing at its own
//! upgrade boundary.

use bytes::BytesMut;

use crate::http_head::{
    find_head_end, BodyLength, HeadError, RequestHead, ResponseHead, HEAD_TERMINATOR, MAX_HEAD_LEN,
};

/// Longest chunk-size or trailer line accepted inside a chunked body.
const MAX_CHUNK_LINE: usize = 4 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    #[error("HTTP head exceeds {limit} bytes without a terminator")]
    HeaderTooLarge { limit: usize },

    #[error(transparent)]
    Head(#[from] HeadError),

    #[error("invalid chunk size line: {0:?}")]
    ChunkSize(String),

    #[error("chunked body line exceeds {limit} bytes")]
    ChunkLineTooLong { limit: usize },
}

/// Which kind of HTTP message a direction carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// Client to upstream.
    Requests,
    /// Upstream to client.
    Responses,
}

/// What one chunk contained, once HTTP framing has been peeled off.
#[derive(Debug, Default)]
pub struct Split<'a> {
    /// Request heads completed by this chunk, in wire order.
    pub requests: Vec<RequestHead>,
    /// The part of the chunk that belongs to the WebSocket stream.
    pub stream: &'a [u8],
}

#[derive(Debug)]
enum Phase {
    /// Head bytes seen so far, none of which end the head yet.
    Head(BytesMut),
    Body(Body),
    Streaming,
}

/// Passive tap on one direction of a connection.
///
/// Moves from HTTP messages to `Streaming` at most once, at the end of an
/// upgrade request head (client side) or a `101` response head (upstream
/// side). It only decides which bytes are WebSocket framing; forwarding to
/// the peer happens before it and is never affected by it.
#[derive(Debug)]
pub struct UpgradeSplitter {
    role: Role,
    phase: Phase,
}

impl UpgradeSplitter {
    /// A client-side splitter waiting for a request head.
    pub fn requests() -> Self {
        Self {
            role: Role::Requests,
            phase: Phase::Head(BytesMut::new()),
        }
    }

    /// A client-side splitter positioned just past `head`, which was read
    /// before the connection was relayed.
    pub fn after_request(head: &RequestHead) -> Result<Self, HeadError> {
        let phase = if head.is_websocket_upgrade() {
            Phase::Streaming
        } else {
            Phase::after(head.body_length()?)
        };
        Ok(Self {
            role: Role::Requests,
            phase,
        })
    }

    /// An upstream-side splitter waiting for a response head.
    pub fn responses() -> Self {
        Self {
            role: Role::Responses,
            phase: Phase::Head(BytesMut::new()),
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.phase, Phase::Streaming)
    }

    /// Walk `chunk` through any HTTP heads and bodies it contains.
    ///
    /// Before the upgrade boundary the returned stream is empty. On the
    /// chunk that crosses it, the stream is whatever follows the boundary
    /// in that chunk. Afterwards it is the whole chunk.
    pub fn split<'a>(&mut self, chunk: &'a [u8]) -> Result<Split<'a>, SplitError> {
        let mut out = Split::default();
        let mut pos = 0;

        loop {
            let rest = &chunk[pos..];
            match &mut self.phase {
                Phase::Streaming => {
                    out.stream = rest;
                    return Ok(out);
                }
                _ if rest.is_empty() => return Ok(out),
                Phase::Body(body) => match body.advance(rest)? {
                    Progress::Partial => return Ok(out),
                    Progress::Complete(used) => {
                        pos += used;
                        self.phase = Phase::Head(BytesMut::new());
                    }
                },
                Phase::Head(pending) => {
                    // Stray line breaks between messages are not part of a head.
                    if pending.is_empty() {
                        let blank = rest.iter().take_while(|b| matches!(b, b'\r' | b'\n')).count();
                        if blank > 0 {
                            pos += blank;
                            continue;
                        }
                    }

                    // The terminator may straddle the previous chunk and this one.
                    let seen = pending.len();
                    let search_from = seen.saturating_sub(HEAD_TERMINATOR.len() - 1);
                    pending.extend_from_slice(rest);

                    let Some(end) = find_head_end(&pending[search_from..]) else {
                        if pending.len() > MAX_HEAD_LEN {
                            return Err(SplitError::HeaderTooLarge {
                                limit: MAX_HEAD_LEN,
                            });
                        }
                        return Ok(out);
                    };

                    let head_len = search_from + end;
                    let raw = pending.split_to(head_len).freeze();
                    pos += head_len - seen;
                    self.phase = match self.role {
                        Role::Requests => {
                            let head = RequestHead::parse(raw)?;
                            let next = Self::after_request(&head)?.phase;
                            out.requests.push(head);
                            next
                        }
                        Role::Responses => {
                            let head = ResponseHead::parse(&raw)?;
                            if head.status == http::StatusCode::SWITCHING_PROTOCOLS {
                                Phase::Streaming
                            } else {
                                Phase::after(head.body_length()?)
                            }
                        }
                    };
                }
            }
        }
    }
}

impl Phase {
    fn after(body: BodyLength) -> Self {
        match body {
            BodyLength::Empty => Self::Head(BytesMut::new()),
            BodyLength::Fixed(len) => Self::Body(Body::Fixed(len)),
            BodyLength::Chunked => Self::Body(Body::ChunkSize(Vec::new())),
            BodyLength::UntilClose => Self::Body(Body::UntilClose),
        }
    }
}

enum Progress {
    /// All input was body and more is expected.
    Partial,
    /// The body ended after this many bytes of the input.
    Complete(usize),
}

/// Position inside a message body.
#[derive(Debug)]
enum Body {
    Fixed(u64),
    UntilClose,
    /// Reading a chunk-size line.
    ChunkSize(Vec<u8>),
    ChunkData(u64),
    /// Skipping the line break after chunk data.
    ChunkEnd(u8),
    /// Reading trailer lines after the last chunk.
    Trailer(Vec<u8>),
}

impl Body {
    fn advance(&mut self, input: &[u8]) -> Result<Progress, SplitError> {
        let mut pos = 0;

        while pos < input.len() {
            let rest = &input[pos..];
            match self {
                Self::UntilClose => return Ok(Progress::Partial),
                Self::Fixed(remaining) => {
                    let take = body_take(rest, *remaining);
                    pos += take;
                    *remaining -= take as u64;
                    if *remaining == 0 {
                        return Ok(Progress::Complete(pos));
                    }
                }
                Self::ChunkData(remaining) => {
                    let take = body_take(rest, *remaining);
                    pos += take;
                    *remaining -= take as u64;
                    if *remaining == 0 {
                        *self = Self::ChunkEnd(2);
                    }
                }
                Self::ChunkEnd(left) => {
                    pos += 1;
                    *left -= 1;
                    if *left == 0 {
                        *self = Self::ChunkSize(Vec::new());
                    }
                }
                Self::ChunkSize(line) => {
                    pos += 1;
                    if !take_line_byte(line, rest[0])? {
                        continue;
                    }
                    let size = parse_chunk_size(line)?;
                    *self = match size {
                        0 => Self::Trailer(Vec::new()),
                        size => Self::ChunkData(size),
                    };
                }
                Self::Trailer(line) => {
                    pos += 1;
                    if !take_line_byte(line, rest[0])? {
                        continue;
                    }
                    if line.is_empty() {
                        return Ok(Progress::Complete(pos));
                    }
                    line.clear();
                }
            }
        }

        Ok(Progress::Partial)
    }
}

fn body_take(input: &[u8], remaining: u64) -> usize {
    input.len().min(usize::try_from(remaining).unwrap_or(usize::MAX))
}

/// Append `byte` to `line`; `true` once the line is complete, with its
/// line break stripped.
fn take_line_byte(line: &mut Vec<u8>, byte: u8) -> Result<bool, SplitError> {
    match byte {
        b'\n' => {
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            Ok(true)
        }
        _ if line.len() >= MAX_CHUNK_LINE => Err(SplitError::ChunkLineTooLong {
            limit: MAX_CHUNK_LINE,
        }),
        _ => {
            line.push(byte);
            Ok(false)
        }
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, SplitError> {
    let text = String::from_utf8_lossy(line);
    let size = text.split(';').next().unwrap_or_default().trim();
    u64::from_str_radix(size, 16).map_err(|_| SplitError::ChunkSize(text.into_owned()))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    const RESPONSE: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n";

    const UPGRADE: &[u8] = b"GET /devtools/page/7 HTTP/1.1\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\r\n";

    fn stream_of(splitter: &mut UpgradeSplitter, chunk: &[u8]) -> Vec<u8> {
        splitter.split(chunk).unwrap().stream.to_vec()
    }

    #[test]
    fn streaming_passes_everything() {
        let upgrade = RequestHead::parse(Bytes::from_static(UPGRADE)).unwrap();
        let mut splitter = UpgradeSplitter::after_request(&upgrade).unwrap();
        assert_eq!(stream_of(&mut splitter, b"\x81\x00"), b"\x81\x00");
        assert_eq!(stream_of(&mut splitter, UPGRADE), UPGRADE);
    }

    #[test]
    fn header_alone_yields_nothing_and_switches() {
        let mut splitter = UpgradeSplitter::responses();
        assert!(stream_of(&mut splitter, RESPONSE).is_empty());
        assert!(splitter.is_streaming());
        assert_eq!(stream_of(&mut splitter, b"next"), b"next");
    }

    #[test]
    fn bytes_after_terminator_in_same_chunk_are_returned() {
        let mut chunk = RESPONSE.to_vec();
        chunk.extend_from_slice(b"\x81\x02hi");

        let mut splitter = UpgradeSplitter::responses();
        assert_eq!(stream_of(&mut splitter, &chunk), b"\x81\x02hi");
    }

    #[test]
    fn terminator_split_at_every_position() {
        let mut wire = RESPONSE.to_vec();
        wire.extend_from_slice(b"\x81\x02hi");

        for cut in 0..=wire.len() {
            let mut splitter = UpgradeSplitter::responses();
            let mut out = stream_of(&mut splitter, &wire[..cut]);
            out.extend(stream_of(&mut splitter, &wire[cut..]));
            assert_eq!(out, b"\x81\x02hi", "cut at {cut}");
            assert!(splitter.is_streaming());
        }
    }

    #[test]
    fn incomplete_header_keeps_buffering() {
        let mut splitter = UpgradeSplitter::responses();
        assert!(stream_of(&mut splitter, b"HTTP/1.1 101 Switching Protocols\r\n").is_empty());
        assert!(stream_of(&mut splitter, b"Upgrade: websocket\r\n\r").is_empty());
        assert!(!splitter.is_streaming());
        assert_eq!(stream_of(&mut splitter, b"\n\x89\x00"), b"\x89\x00");
    }

    #[test]
    fn unbounded_header_is_rejected() {
        let mut splitter = UpgradeSplitter::responses();
        let filler = vec![b'a'; 1024];
        let mut failed = None;
        for _ in 0..=MAX_HEAD_LEN / filler.len() {
            if let Err(err) = splitter.split(&filler) {
                failed = Some(err);
                break;
            }
        }
        assert!(matches!(failed, Some(SplitError::HeaderTooLarge { .. })));
    }

    #[test]
    fn responses_before_the_upgrade_are_skipped() {
        // Body bytes look like frames with reserved opcodes; none may leak.
        let mut wire = b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\n\x83\x00\x83\x00".to_vec();
        wire.extend_from_slice(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
              3;ext=1\r\n\x83\x83\x83\r\n2\r\n\x8f\x8f\r\n0\r\nX-Trailer: 1\r\n\r\n",
        );
        wire.extend_from_slice(b"HTTP/1.1 204 No Content\r\n\r\n");
        wire.extend_from_slice(RESPONSE);
        wire.extend_from_slice(b"\x81\x02hi");

        for cut in 0..=wire.len() {
            let mut splitter = UpgradeSplitter::responses();
            let mut out = stream_of(&mut splitter, &wire[..cut]);
            out.extend(stream_of(&mut splitter, &wire[cut..]));
            assert_eq!(out, b"\x81\x02hi", "cut at {cut}");
        }

        let mut byte_at_a_time = UpgradeSplitter::responses();
        let mut out = Vec::new();
        for byte in &wire {
            out.extend(stream_of(&mut byte_at_a_time, std::slice::from_ref(byte)));
        }
        assert_eq!(out, b"\x81\x02hi");
    }

    #[test]
    fn keep_alive_requests_are_reported_until_the_upgrade() {
        let mut wire = b"GET /json/version HTTP/1.1\r\nHost: x\r\n\r\n".to_vec();
        wire.extend_from_slice(b"PUT /json/new?about:blank HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc");
        wire.extend_from_slice(UPGRADE);
        wire.extend_from_slice(b"\x81\x80\x00\x00\x00\x00");

        let mut splitter = UpgradeSplitter::requests();
        let split = splitter.split(&wire).unwrap();
        let targets: Vec<_> = split.requests.iter().map(|h| h.target.as_str()).collect();
        assert_eq!(targets, ["/json/version", "/json/new?about:blank", "/devtools/page/7"]);
        assert!(split.requests[2].is_websocket_upgrade());
        assert_eq!(split.stream, b"\x81\x80\x00\x00\x00\x00");
        assert!(splitter.is_streaming());
    }

    #[test]
    fn request_heads_split_across_chunks() {
        let mut splitter = UpgradeSplitter::requests();
        let wire = b"GET /json HTTP/1.1\r\n\r\nGET /json/list HTTP/1.1\r\n\r\n";

        let mut targets = Vec::new();
        for piece in wire.chunks(5) {
            let split = splitter.split(piece).unwrap();
            assert!(split.stream.is_empty());
            targets.extend(split.requests.into_iter().map(|h| h.target));
        }
        assert_eq!(targets, ["/json", "/json/list"]);
        assert!(!splitter.is_streaming());
    }

    #[test]
    fn after_request_skips_the_first_body() {
        let head = RequestHead::parse(Bytes::from_static(
            b"POST /json/new HTTP/1.1\r\nContent-Length: 5\r\n\r\n",
        ))
        .unwrap();
        let mut splitter = UpgradeSplitter::after_request(&head).unwrap();

        let mut wire = b"abcde".to_vec();
        wire.extend_from_slice(UPGRADE);
        let split = splitter.split(&wire).unwrap();
        assert_eq!(split.requests.len(), 1);
        assert!(splitter.is_streaming());
    }

    #[test]
    fn response_without_length_runs_to_close() {
        let mut splitter = UpgradeSplitter::responses();
        assert!(stream_of(&mut splitter, b"HTTP/1.0 200 OK\r\n\r\n").is_empty());
        // Even an embedded 101 head is body now.
        assert!(stream_of(&mut splitter, RESPONSE).is_empty());
        assert!(!splitter.is_streaming());
    }

    #[test]
    fn malformed_framing_is_an_error() {
        let mut splitter = UpgradeSplitter::requests();
        assert!(matches!(
            splitter.split(b"NOT A REQUEST\r\n\r\n"),
            Err(SplitError::Head(_))
        ));

        let mut splitter = UpgradeSplitter::responses();
        assert!(matches!(
            splitter.split(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n"),
            Err(SplitError::ChunkSize(_))
        ));

        let mut splitter = UpgradeSplitter::responses();
        let mut wire = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
        wire.extend(vec![b'1'; MAX_CHUNK_LINE + 1]);
        assert!(matches!(
            splitter.split(&wire),
            Err(SplitError::ChunkLineTooLong { .. })
        ));
    }
}
