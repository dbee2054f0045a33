//! Fuzzer for the negotiation records.
//!
//! Decodes arbitrary bytes as a connection request and as a connection
//! confirm. Decoding must never panic, and whenever a request decodes it
//! must re-encode to something that decodes back to the same value.

#![no_main]

use farsight_proto::{ConnectionConfirm, ConnectionRequest};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(request) = ConnectionRequest::decode(data) {
        // A decoded cookie can hold bytes the encoder rejects, so only
        // cookie-free requests are round-tripped.
        if request.cookie_user.is_none() {
            let encoded = request.encode().expect("decoded request must re-encode");
            let again =
                ConnectionRequest::decode(&encoded).expect("re-encoded request must decode");
            assert_eq!(request.protocols, again.protocols);
            assert_eq!(request.flags, again.flags);
        }
    }

    // Confirm decoding maps failure records to errors, so only exercise
    // for panics.
    let _ = ConnectionConfirm::decode(data);
});
