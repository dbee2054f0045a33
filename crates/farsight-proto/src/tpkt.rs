//! TPKT transport framing.
//!
//! The outermost layer establishes packet boundaries over a byte stream:
//! `[version:u8=3][reserved:u8=0][length:u16BE]` followed by the payload,
//! where the length covers the whole frame including the 4-byte header.
//! The stream transport delivers bytes without message boundaries, so
//! reassembly across deliveries happens here in a [`FrameAssembler`], not
//! in the transport.

use bytes::{Buf, Bytes, BytesMut};
use farsight_wire::{BytesField, Composite, Field};

use crate::errors::{ProtoError, Result};

/// Bytes the fixed TPKT header occupies.
pub const HEADER_LEN: usize = 4;

/// Framing version this stack speaks.
pub const VERSION: u8 = 3;

fn header(payload: impl Into<Bytes>) -> Composite {
    Composite::new("tpkt")
        .member("version", Field::u8_const(VERSION))
        .member("reserved", Field::u8_const(0))
        .member(
            "length",
            Field::computed_u16_be(|s| Some(s.total_size() as u64)),
        )
        .member("payload", BytesField::remainder(payload))
}

/// Wrap a payload in a TPKT frame.
///
/// # Errors
///
/// [`ProtoError::Malformed`] if the payload is too large for the 16-bit
/// length field.
pub fn frame(payload: impl Into<Bytes>) -> Result<Bytes> {
    let payload = payload.into();
    if payload.len() > usize::from(u16::MAX) - HEADER_LEN {
        return Err(ProtoError::Malformed(format!(
            "payload of {} bytes exceeds the framing length field",
            payload.len()
        )));
    }
    let mut record = header(payload);
    Ok(record.encode_to_bytes()?)
}

/// Incremental reassembler of TPKT frames from stream chunks.
///
/// Feed every received chunk through [`FrameAssembler::push`] and drain
/// complete payloads with [`FrameAssembler::next_payload`]. Internal state
/// is tied to one byte stream; a reconnect requires a fresh assembler.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: BytesMut,
}

impl FrameAssembler {
    /// Assembler with no buffered bytes.
    #[must_use]
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    /// Append a chunk received from the transport.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes buffered but not yet returned as a payload.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Extract the next complete frame's payload, if one has fully arrived.
    ///
    /// Returns `Ok(None)` while the header or body is still short; push
    /// more bytes and call again.
    ///
    /// # Errors
    ///
    /// [`ProtoError::ProtocolMismatch`] if the version byte is wrong and
    /// [`ProtoError::Malformed`] if the declared length cannot even cover
    /// the header. Both leave the stream unusable.
    pub fn next_payload(&mut self) -> Result<Option<Bytes>> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        if self.buf[0] != VERSION {
            return Err(ProtoError::ProtocolMismatch { version: self.buf[0] });
        }
        let declared = usize::from(u16::from_be_bytes([self.buf[2], self.buf[3]]));
        if declared < HEADER_LEN {
            return Err(ProtoError::Malformed(format!(
                "frame length {declared} is shorter than its own header"
            )));
        }
        if self.buf.len() < declared {
            return Ok(None);
        }
        let mut frame = self.buf.split_to(declared);
        frame.advance(HEADER_LEN);
        Ok(Some(frame.freeze()))
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn empty_payload_is_four_bytes() {
        assert_eq!(&frame(Bytes::new()).unwrap()[..], hex!("03 00 00 04"));
    }

    #[test]
    fn length_covers_header_and_payload() {
        let wire = frame(&b"\xAA\xBB\xCC"[..]).unwrap();
        assert_eq!(&wire[..], hex!("03 00 00 07 AA BB CC"));
    }

    #[test]
    fn assembler_waits_for_full_frame() {
        let mut assembler = FrameAssembler::new();
        assembler.push(&hex!("03 00"));
        assert_eq!(assembler.next_payload().unwrap(), None);
        assembler.push(&hex!("00 07 AA BB"));
        assert_eq!(assembler.next_payload().unwrap(), None);
        assembler.push(&hex!("CC"));
        assert_eq!(
            assembler.next_payload().unwrap(),
            Some(Bytes::from_static(&hex!("AA BB CC")))
        );
        assert_eq!(assembler.next_payload().unwrap(), None);
    }

    #[test]
    fn assembler_splits_coalesced_frames() {
        let mut assembler = FrameAssembler::new();
        assembler.push(&hex!("03 00 00 05 11 03 00 00 04"));
        assert_eq!(assembler.next_payload().unwrap(), Some(Bytes::from_static(&[0x11])));
        assert_eq!(assembler.next_payload().unwrap(), Some(Bytes::new()));
        assert_eq!(assembler.next_payload().unwrap(), None);
    }

    #[test]
    fn wrong_version_is_fatal() {
        let mut assembler = FrameAssembler::new();
        assembler.push(&hex!("7F 00 00 04"));
        assert_eq!(
            assembler.next_payload().unwrap_err(),
            ProtoError::ProtocolMismatch { version: 0x7F }
        );
    }

    #[test]
    fn undersized_declared_length_is_rejected() {
        let mut assembler = FrameAssembler::new();
        assembler.push(&hex!("03 00 00 03"));
        assert!(matches!(assembler.next_payload(), Err(ProtoError::Malformed(_))));
    }

    proptest! {
        /// Any chunking of any frame sequence reproduces the payloads.
        #[test]
        fn reassembly_is_chunking_invariant(
            payloads in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 0..64),
                1..8,
            ),
            chunk_len in 1usize..16,
        ) {
            let mut stream = Vec::new();
            for payload in &payloads {
                stream.extend_from_slice(&frame(payload.clone()).unwrap());
            }

            let mut assembler = FrameAssembler::new();
            let mut recovered = Vec::new();
            for chunk in stream.chunks(chunk_len) {
                assembler.push(chunk);
                while let Some(payload) = assembler.next_payload().unwrap() {
                    recovered.push(payload.to_vec());
                }
            }
            prop_assert_eq!(recovered, payloads);
        }
    }
}
