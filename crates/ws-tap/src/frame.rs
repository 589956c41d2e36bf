//! Streaming WebSocket frame decoder.
//!
//! The relay never terminates the WebSocket itself; it only watches the
//! bytes go by. [`FrameDecoder`] accumulates whatever the socket hands it
//! and yields a [`Frame`] each time a complete one is buffered, no matter
//! how the frame was split across reads.

use bytes::{Buf, Bytes, BytesMut};

use audit_log::{AuditEntry, Direction};

/// Default per-frame payload limit.
pub const DEFAULT_MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Errors that make a byte stream undecodable. All of them are fatal to the
/// connection: the decoder never tries to resynchronise.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("reserved opcode {0:#x}")]
    ReservedOpcode(u8),

    #[error("declared payload length {0} overflows the buffer length type")]
    LengthOverflow(u64),

    #[error("declared payload length {len} exceeds the limit of {limit} bytes")]
    FrameTooLarge { len: u64, limit: usize },
}

/// Frame type, from the low nibble of the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl TryFrom<u8> for OpCode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(FrameError::ReservedOpcode(other)),
        }
    }
}

/// One decoded frame. The payload is already unmasked.
///
/// Fragmented messages are not reassembled: each frame stands alone and
/// `fin` is only carried along.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: OpCode,
    pub fin: bool,
    pub masked: bool,
    pub payload: Bytes,
}

impl Frame {
    /// The audit record for this frame, if it gets one.
    ///
    /// Text frames are recorded in full (invalid UTF-8 is decoded lossily
    /// rather than dropped). Binary frames record only their size.
    /// Continuation and control frames are not recorded.
    pub fn audit_entry(&self, dir: Direction) -> Option<AuditEntry> {
        match self.opcode {
            OpCode::Text => Some(AuditEntry::ws_text(
                dir,
                String::from_utf8_lossy(&self.payload),
            )),
            OpCode::Binary => Some(AuditEntry::ws_binary(dir, self.payload.len())),
            _ => None,
        }
    }
}

/// XOR `payload` in place with the 4-byte masking key. Applying it twice
/// restores the input.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

/// Per-direction decoder owning the direction's byte buffer.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_len: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_len,
        }
    }

    /// Append `chunk` and return every frame that is now complete, in wire
    /// order. Bytes of an incomplete trailing frame stay buffered.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, FrameError> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(frame) = self.decode_next()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn decode_next(&mut self) -> Result<Option<Frame>, FrameError> {
        let buf = &self.buf;
        if buf.len() < 2 {
            return Ok(None);
        }

        let fin = buf[0] & 0x80 != 0;
        let opcode = OpCode::try_from(buf[0] & 0x0F)?;
        let masked = buf[1] & 0x80 != 0;

        let (declared, header_len): (u64, usize) = match buf[1] & 0x7F {
            126 => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                (u64::from((&buf[2..4]).get_u16()), 4)
            }
            127 => {
                if buf.len() < 10 {
                    return Ok(None);
                }
                ((&buf[2..10]).get_u64(), 10)
            }
            code => (u64::from(code), 2),
        };

        let payload_len =
            usize::try_from(declared).map_err(|_| FrameError::LengthOverflow(declared))?;
        if payload_len > self.max_frame_len {
            return Err(FrameError::FrameTooLarge {
                len: declared,
                limit: self.max_frame_len,
            });
        }

        let mask_len: usize = if masked { 4 } else { 0 };
        let total = (header_len + mask_len)
            .checked_add(payload_len)
            .ok_or(FrameError::LengthOverflow(declared))?;
        if buf.len() < total {
            return Ok(None);
        }

        let mut raw = self.buf.split_to(total);
        raw.advance(header_len);
        if masked {
            let key = [raw[0], raw[1], raw[2], raw[3]];
            raw.advance(4);
            apply_mask(&mut raw, key);
        }

        Ok(Some(Frame {
            opcode,
            fin,
            masked,
            payload: raw.freeze(),
        }))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use audit_log::EntryKind;

    use super::*;

    const KEY: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    /// Encode a single final frame.
    pub(crate) fn encode(opcode: u8, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
        let mut out = vec![0x80 | opcode];
        let mask_bit = if mask.is_some() { 0x80 } else { 0 };

        match payload.len() {
            len @ 0..=125 => out.push(mask_bit | len as u8),
            len @ 126..=0xFFFF => {
                out.push(mask_bit | 126);
                out.extend_from_slice(&(len as u16).to_be_bytes());
            }
            len => {
                out.push(mask_bit | 127);
                out.extend_from_slice(&(len as u64).to_be_bytes());
            }
        }

        match mask {
            Some(key) => {
                out.extend_from_slice(&key);
                let mut body = payload.to_vec();
                apply_mask(&mut body, key);
                out.extend_from_slice(&body);
            }
            None => out.extend_from_slice(payload),
        }
        out
    }

    fn payload_of(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn every_opcode_and_length_decodes_from_one_chunk() {
        let opcodes = [
            (0x0, OpCode::Continuation),
            (0x1, OpCode::Text),
            (0x2, OpCode::Binary),
            (0x8, OpCode::Close),
            (0x9, OpCode::Ping),
            (0xA, OpCode::Pong),
        ];

        for (raw_op, opcode) in opcodes {
            for len in [0, 1, 125, 126, 65535, 65536] {
                for mask in [None, Some(KEY)] {
                    let payload = payload_of(len);
                    let mut decoder = FrameDecoder::default();

                    let frames = decoder.feed(&encode(raw_op, &payload, mask)).unwrap();

                    assert_eq!(frames.len(), 1, "opcode {raw_op} len {len} mask {mask:?}");
                    assert_eq!(frames[0].opcode, opcode);
                    assert_eq!(frames[0].masked, mask.is_some());
                    assert!(frames[0].fin);
                    assert_eq!(&frames[0].payload[..], &payload[..]);
                    assert_eq!(decoder.buffered(), 0);
                }
            }
        }
    }

    #[test]
    fn any_three_way_split_matches_whole_feed() {
        let wire = encode(0x1, &payload_of(130), Some(KEY));
        let expected = FrameDecoder::default().feed(&wire).unwrap();
        assert_eq!(expected.len(), 1);

        for i in 0..=wire.len() {
            for j in i..=wire.len() {
                let mut decoder = FrameDecoder::default();
                let mut frames = decoder.feed(&wire[..i]).unwrap();
                frames.extend(decoder.feed(&wire[i..j]).unwrap());
                frames.extend(decoder.feed(&wire[j..]).unwrap());
                assert_eq!(frames, expected, "split at {i}/{j}");
            }
        }
    }

    #[test]
    fn byte_at_a_time_feeding_emits_only_complete_frames() {
        let wire = encode(0x2, &payload_of(70000), None);
        let mut decoder = FrameDecoder::default();

        for (i, byte) in wire.iter().enumerate() {
            let frames = decoder.feed(std::slice::from_ref(byte)).unwrap();
            if i + 1 < wire.len() {
                assert!(frames.is_empty(), "frame surfaced early at byte {i}");
            } else {
                assert_eq!(frames.len(), 1);
                assert_eq!(frames[0].payload.len(), 70000);
            }
        }
    }

    #[test]
    fn concatenated_frames_decode_in_order() {
        let mut wire = Vec::new();
        let mut expected = Vec::new();
        for n in 0..10usize {
            let text = format!("{{\"id\":{n}}}");
            let mask = (n % 2 == 0).then_some(KEY);
            wire.extend(encode(0x1, text.as_bytes(), mask));
            expected.push(text);
        }
        wire.extend(encode(0x9, b"", None));

        let frames = FrameDecoder::default().feed(&wire).unwrap();
        assert_eq!(frames.len(), 11);
        for (frame, text) in frames.iter().zip(&expected) {
            assert_eq!(frame.payload, text.as_bytes());
        }
        assert_eq!(frames[10].opcode, OpCode::Ping);
    }

    #[test]
    fn trailing_partial_frame_stays_buffered() {
        let first = encode(0x1, b"complete", None);
        let second = encode(0x1, b"partial", Some(KEY));

        let mut wire = first.clone();
        wire.extend_from_slice(&second[..5]);

        let mut decoder = FrameDecoder::default();
        let frames = decoder.feed(&wire).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(decoder.buffered(), 5);

        let frames = decoder.feed(&second[5..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, &b"partial"[..]);
    }

    #[test]
    fn remasking_reproduces_the_wire_bytes() {
        let payload = payload_of(300);
        let wire = encode(0x2, &payload, Some(KEY));

        let frame = FrameDecoder::default().feed(&wire).unwrap().remove(0);
        let mut remasked = frame.payload.to_vec();
        apply_mask(&mut remasked, KEY);

        assert_eq!(&remasked[..], &wire[wire.len() - payload.len()..]);
    }

    #[test]
    fn short_extended_headers_wait_for_more_bytes() {
        let mut decoder = FrameDecoder::default();
        assert!(decoder.feed(&[0x82, 127, 0, 0, 0]).unwrap().is_empty());
        assert!(decoder.feed(&[0x82]).unwrap().is_empty());
        assert!(decoder.feed(&[126, 0]).unwrap().is_empty());
    }

    #[test]
    fn fragmented_frames_are_emitted_individually() {
        let mut wire = vec![0x01, 3];
        wire.extend_from_slice(b"{\"a");
        wire.extend_from_slice(&[0x80, 3]);
        wire.extend_from_slice(b"\":1");

        let frames = FrameDecoder::default().feed(&wire).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(!frames[0].fin);
        assert_eq!(frames[0].opcode, OpCode::Text);
        assert_eq!(frames[1].opcode, OpCode::Continuation);
        assert!(frames[1].fin);
    }

    #[test]
    fn reserved_opcode_is_fatal() {
        let err = FrameDecoder::default().feed(&[0x83, 0]).unwrap_err();
        assert!(matches!(err, FrameError::ReservedOpcode(0x3)));
    }

    #[test]
    fn oversized_declared_length_is_fatal() {
        let mut header = vec![0x82, 127];
        header.extend_from_slice(&u64::MAX.to_be_bytes());

        let err = FrameDecoder::default().feed(&header).unwrap_err();
        assert!(matches!(
            err,
            FrameError::FrameTooLarge { .. } | FrameError::LengthOverflow(_)
        ));

        let mut small = FrameDecoder::new(16);
        let err = small.feed(&encode(0x1, &[b'x'; 17], None)).unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { len: 17, limit: 16 }));
    }

    #[test]
    fn only_text_and_binary_frames_are_audited() {
        let dir = Direction::ExtensionToGateway;
        let mut wire = Vec::new();
        wire.extend(encode(0x8, &[0x03, 0xe8], Some(KEY)));
        wire.extend(encode(0x9, b"ping", None));
        wire.extend(encode(0xA, b"pong", None));
        wire.extend(encode(0x0, b"tail", None));
        wire.extend(encode(0x1, b"{\"id\":7}", Some(KEY)));
        wire.extend(encode(0x2, b"secret-bytes", None));

        let entries: Vec<AuditEntry> = FrameDecoder::default()
            .feed(&wire)
            .unwrap()
            .iter()
            .filter_map(|f| f.audit_entry(dir))
            .collect();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, EntryKind::WsText);
        assert_eq!(entries[0].data, "{\"id\":7}");
        assert_eq!(entries[1].kind, EntryKind::WsBinary);
        assert_eq!(entries[1].data, "<12 bytes>");
        assert!(!entries[1].data.contains("secret"));
    }

    #[test]
    fn invalid_utf8_text_is_still_audited() {
        let wire = encode(0x1, &[b'o', b'k', 0xff, 0xfe], None);
        let frame = FrameDecoder::default().feed(&wire).unwrap().remove(0);

        let entry = frame.audit_entry(Direction::GatewayToExtension).unwrap();
        assert_eq!(entry.kind, EntryKind::WsText);
        assert!(entry.data.starts_with("ok"));
        assert!(entry.data.contains('\u{FFFD}'));
    }
}
