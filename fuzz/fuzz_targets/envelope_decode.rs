//! Fuzzer for tagged envelope streams.
//!
//! Decodes arbitrary bytes as a capability stream and as a certificate,
//! with both catalog roles. Decoding must never panic; unknown tags in the
//! tolerant catalogs come back opaque with exactly the declared body.

#![no_main]

use farsight_proto::caps::{self, CatalogRole};
use farsight_proto::{envelope, gcc, ConstantTable};
use farsight_wire::VariantBody;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let table = ConstantTable::builtin();

    for role in [CatalogRole::Client, CatalogRole::Server] {
        let registry = caps::capability_registry(&table, role).expect("builtin tags resolve");
        if let Ok(records) = envelope::decode_stream(&registry, data) {
            for (tag, body) in records {
                if let VariantBody::Opaque(raw) = body {
                    assert!(!registry.knows(tag));
                    assert!(raw.len() <= data.len());
                }
            }
        }
    }

    let certificates = gcc::certificate_registry(&table).expect("builtin tags resolve");
    let _ = gcc::decode_certificate(&certificates, data);
});
