//! Byte-exact bidirectional relay with per-direction taps.

use std::fmt;

use audit_log::{AuditEntry, AuditSink, Direction};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::frame::FrameDecoder;
use crate::http_head::{HeadError, RequestHead};
use crate::splitter::UpgradeSplitter;
use crate::tap::{DirectionTap, TapError};

/// Read buffer size for each direction.
const READ_BUF_LEN: usize = 16 * 1024;

/// The two taps of a connection pair.
#[derive(Debug)]
pub struct Taps {
    /// Observes bytes from the client (`ext→gw`).
    pub client: DirectionTap,
    /// Observes bytes from the upstream endpoint (`gw→ext`).
    pub upstream: DirectionTap,
}

impl Taps {
    /// Taps for a connection whose first request head, `head`, has already
    /// been read from the client. The upstream side starts at its first
    /// response.
    pub fn after_request(head: &RequestHead, max_frame_len: usize) -> Result<Self, HeadError> {
        Ok(Self::with_client(
            UpgradeSplitter::after_request(head)?,
            max_frame_len,
        ))
    }

    fn with_client(client: UpgradeSplitter, max_frame_len: usize) -> Self {
        Self {
            client: DirectionTap::new(
                Direction::ExtensionToGateway,
                client,
                FrameDecoder::new(max_frame_len),
            ),
            upstream: DirectionTap::new(
                Direction::GatewayToExtension,
                UpgradeSplitter::responses(),
                FrameDecoder::new(max_frame_len),
            ),
        }
    }
}

/// Why one direction of a pair stopped.
#[derive(Debug)]
pub enum PumpEnd {
    /// The reading side closed cleanly.
    Eof,
    ReadFailed(std::io::Error),
    WriteFailed(std::io::Error),
    /// The reading side sent bytes that cannot be decoded.
    Undecodable(TapError),
}

impl fmt::Display for PumpEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eof => write!(f, "connection closed"),
            Self::ReadFailed(err) => write!(f, "read error: {err}"),
            Self::WriteFailed(err) => write!(f, "write error: {err}"),
            Self::Undecodable(err) => write!(f, "decode error: {err}"),
        }
    }
}

/// How a connection pair ended.
#[derive(Debug)]
pub struct PairClosed {
    /// The side whose close or failure ended the pair.
    pub initiator: Direction,
    pub end: PumpEnd,
}

/// Relay `client` and `upstream` until either side ends, then drop both.
///
/// `initial` holds client bytes already read (past the request head); they
/// are sent upstream first. Every chunk is forwarded and then observed by
/// its direction's tap, and the resulting entries go to `audit`. A `close`
/// entry tagged with the initiating side is always recorded.
pub async fn relay<C, U>(
    client: C,
    upstream: U,
    initial: &[u8],
    taps: Taps,
    audit: &AuditSink,
) -> PairClosed
where
    C: AsyncRead + AsyncWrite,
    U: AsyncRead + AsyncWrite,
{
    let (client_rd, client_wr) = tokio::io::split(client);
    let (upstream_rd, mut upstream_wr) = tokio::io::split(upstream);

    let Taps {
        client: mut client_tap,
        upstream: upstream_tap,
    } = taps;

    let closed = match forward(&mut upstream_wr, &mut client_tap, initial, audit).await {
        Err(end) => PairClosed {
            initiator: initiator_of(Direction::ExtensionToGateway, &end),
            end,
        },
        Ok(()) => {
            // Whichever direction ends first drops the other, closing both
            // sockets.
            tokio::select! {
                end = pump(client_rd, upstream_wr, client_tap, audit) => PairClosed {
                    initiator: initiator_of(Direction::ExtensionToGateway, &end),
                    end,
                },
                end = pump(upstream_rd, client_wr, upstream_tap, audit) => PairClosed {
                    initiator: initiator_of(Direction::GatewayToExtension, &end),
                    end,
                },
            }
        }
    };

    audit.record(AuditEntry::close(closed.initiator, closed.end.to_string()));
    closed
}

/// A write failure means the peer of the reading side went away.
fn initiator_of(reading: Direction, end: &PumpEnd) -> Direction {
    match (end, reading) {
        (PumpEnd::WriteFailed(_), Direction::ExtensionToGateway) => Direction::GatewayToExtension,
        (PumpEnd::WriteFailed(_), Direction::GatewayToExtension) => Direction::ExtensionToGateway,
        _ => reading,
    }
}

/// Copy `reader` into `writer` until either fails, tapping each chunk.
async fn pump<R, W>(
    mut reader: R,
    mut writer: W,
    mut tap: DirectionTap,
    audit: &AuditSink,
) -> PumpEnd
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; READ_BUF_LEN];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return PumpEnd::Eof,
            Ok(n) => n,
            Err(err) => return PumpEnd::ReadFailed(err),
        };

        if let Err(end) = forward(&mut writer, &mut tap, &buf[..n], audit).await {
            return end;
        }
    }
}

/// Forward one chunk unchanged, then let the tap see it.
async fn forward<W>(
    writer: &mut W,
    tap: &mut DirectionTap,
    chunk: &[u8],
    audit: &AuditSink,
) -> Result<(), PumpEnd>
where
    W: AsyncWrite + Unpin,
{
    if chunk.is_empty() {
        return Ok(());
    }

    writer
        .write_all(chunk)
        .await
        .map_err(PumpEnd::WriteFailed)?;

    for entry in tap.observe(chunk).map_err(PumpEnd::Undecodable)? {
        audit.record(entry);
    }
    Ok(())
}
