use audit_log::{AuditEntry, Direction};

use crate::frame::{FrameDecoder, FrameError};
use crate::splitter::{SplitError, UpgradeSplitter};

#[derive(Debug, thiserror::Error)]
pub enum TapError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Split(#[from] SplitError),
}

/// The splitter → decoder pipeline for one direction of one connection.
///
/// Owned exclusively by the task pumping that direction.
#[derive(Debug)]
pub struct DirectionTap {
    direction: Direction,
    splitter: UpgradeSplitter,
    decoder: FrameDecoder,
}

impl DirectionTap {
    pub fn new(direction: Direction, splitter: UpgradeSplitter, decoder: FrameDecoder) -> Self {
        Self {
            direction,
            splitter,
            decoder,
        }
    }

    /// Observe bytes that were just forwarded and return the audit entries
    /// for the requests and frames they completed, in wire order.
    pub fn observe(&mut self, chunk: &[u8]) -> Result<Vec<AuditEntry>, TapError> {
        let split = self.splitter.split(chunk)?;

        let mut entries: Vec<AuditEntry> = split
            .requests
            .iter()
            .inspect(|head| {
                tracing::debug!(
                    dir = %self.direction,
                    method = %head.method,
                    target = %head.target,
                    upgrade = head.is_websocket_upgrade(),
                    "request on open connection"
                );
            })
            .map(|head| head.audit_entry(self.direction))
            .collect();

        if !split.stream.is_empty() {
            entries.extend(
                self.decoder
                    .feed(split.stream)?
                    .iter()
                    .filter_map(|frame| frame.audit_entry(self.direction)),
            );
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use audit_log::EntryKind;

    use super::*;
    use crate::frame::tests::encode;

    fn upstream_tap() -> DirectionTap {
        DirectionTap::new(
            Direction::GatewayToExtension,
            UpgradeSplitter::responses(),
            FrameDecoder::default(),
        )
    }

    #[test]
    fn decoding_waits_for_the_upgrade_header_to_end() {
        let mut tap = upstream_tap();

        // The header arrives cut mid-word; nothing is decoded until its
        // terminator has gone by.
        let first = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnec";
        assert!(tap.observe(first).unwrap().is_empty());

        let mut second = b"tion: Upgrade\r\n\r\n".to_vec();
        second.extend(encode(0x1, br#"{"id":1,"result":{}}"#, None));
        let entries = tap.observe(&second).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::WsText);
        assert_eq!(entries[0].dir, Direction::GatewayToExtension);
        assert_eq!(entries[0].data, r#"{"id":1,"result":{}}"#);
    }

    #[test]
    fn header_bytes_are_never_decoded() {
        let mut tap = upstream_tap();
        // 0x83 would be a reserved opcode if it reached the decoder; here it
        // is part of a response body.
        assert!(tap
            .observe(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n\x83\x00")
            .unwrap()
            .is_empty());
        assert!(tap.observe(b"HTTP/1.1 101 OK\r\n").unwrap().is_empty());
        assert!(tap.observe(b"\r\n").unwrap().is_empty());
    }

    #[test]
    fn client_requests_and_frames_come_out_in_order() {
        let mut tap = DirectionTap::new(
            Direction::ExtensionToGateway,
            UpgradeSplitter::requests(),
            FrameDecoder::default(),
        );

        let mut wire = b"GET /json/version HTTP/1.1\r\n\r\n".to_vec();
        wire.extend_from_slice(
            b"GET /devtools/page/1 HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n",
        );
        wire.extend(encode(
            0x1,
            br#"{"id":1,"method":"Runtime.evaluate","params":{"expression":"1"}}"#,
            Some([1, 2, 3, 4]),
        ));

        let entries = tap.observe(&wire).unwrap();
        let kinds: Vec<_> = entries.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, [EntryKind::Http, EntryKind::Upgrade, EntryKind::WsText]);
        assert_eq!(entries[0].data, "GET /json/version");
        assert_eq!(entries[1].data, "/devtools/page/1");
        assert!(entries.iter().all(|e| e.dir == Direction::ExtensionToGateway));
    }

    #[test]
    fn decode_errors_surface() {
        let mut tap = upstream_tap();
        let mut wire = b"HTTP/1.1 101 Switching Protocols\r\n\r\n".to_vec();
        wire.extend_from_slice(b"\x8f\x00");
        assert!(matches!(tap.observe(&wire), Err(TapError::Frame(_))));
    }

    #[test]
    fn framing_errors_surface() {
        let mut tap = upstream_tap();
        assert!(matches!(
            tap.observe(b"garbage\r\n\r\n"),
            Err(TapError::Split(_))
        ));
    }
}
