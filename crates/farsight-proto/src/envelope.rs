//! Tag-length envelopes shared by capability sets and settings blocks.
//!
//! Both catalogs wrap their records the same way on the wire:
//! `[typeTag:u16LE][length:u16LE][body]`, where the length counts the
//! 4-byte envelope header as well as the body. Streams are a plain
//! back-to-back sequence of envelopes with no outer count.

use bytes::{BufMut, Bytes, BytesMut};
use farsight_wire::{Composite, Field, Reader, Scope, VariantBody, VariantRegistry};

use crate::errors::{ProtoError, Result};

/// Bytes the envelope header occupies, counted inside `length`.
pub const HEADER_LEN: usize = 4;

/// Wrap a record in an envelope and serialize the whole thing.
///
/// # Errors
///
/// [`ProtoError::Wire`] if the body fails to resolve or encode.
pub fn seal(tag: u64, body: Composite) -> Result<Bytes> {
    let mut record = Composite::new("envelope")
        .member("tag", Field::u16_le(tag as u16))
        .member(
            "length",
            Field::computed_u16_le(|s: &Scope<'_>| Some(s.total_size() as u64)),
        )
        .member("body", body);
    Ok(record.encode_to_bytes()?)
}

/// Serialize a sequence of `(tag, record)` pairs as one envelope stream.
///
/// # Errors
///
/// The [`seal`] errors.
pub fn seal_stream(records: impl IntoIterator<Item = (u64, Composite)>) -> Result<Bytes> {
    let mut out = BytesMut::new();
    for (tag, body) in records {
        out.put_slice(&seal(tag, body)?);
    }
    Ok(out.freeze())
}

/// Decode an envelope stream, dispatching bodies through the registry.
///
/// Each body decodes inside a window of exactly `length - 4` bytes, so a
/// record that does not fill its declared length (or an unknown tag under
/// an opaque policy) cannot desynchronize the envelopes that follow.
///
/// # Errors
///
/// [`ProtoError::Malformed`] if an envelope declares a length shorter than
/// its own header, plus any registry dispatch or record decode error.
pub fn decode_stream(
    registry: &VariantRegistry,
    payload: &[u8],
) -> Result<Vec<(u64, VariantBody)>> {
    let mut r = Reader::new(payload);
    let mut records = Vec::new();
    while !r.is_empty() {
        let mut head = Composite::new("envelope_header")
            .member("tag", Field::u16_le(0))
            .member("length", Field::u16_le(0));
        head.decode(&mut r)?;
        let tag = head.value("tag")?;
        let length = head.value("length")? as usize;
        let body_len = length.checked_sub(HEADER_LEN).ok_or_else(|| {
            ProtoError::Malformed(format!(
                "envelope tag {tag:#06x} declares length {length}, shorter than its header"
            ))
        })?;
        records.push((tag, registry.decode_body(tag, body_len, &mut r)?));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use farsight_wire::UnknownTagPolicy;
    use hex_literal::hex;

    use super::*;

    fn pair_schema() -> Composite {
        Composite::new("pair")
            .member("a", Field::u16_le(0))
            .member("b", Field::u16_le(0))
    }

    fn registry(policy: UnknownTagPolicy) -> VariantRegistry {
        let mut registry = VariantRegistry::new("test", policy);
        registry.register(0x0001, pair_schema);
        registry
    }

    #[test]
    fn seal_counts_its_own_header() {
        let wire = seal(0x0001, pair_schema()).unwrap();
        assert_eq!(&wire[..], hex!("01 00 08 00 00 00 00 00"));
    }

    #[test]
    fn stream_round_trips() {
        let mut second = pair_schema();
        second.set_value("a", 7).unwrap();
        let wire = seal_stream([(0x0001, pair_schema()), (0x0001, second)]).unwrap();

        let records = decode_stream(&registry(UnknownTagPolicy::Opaque), &wire).unwrap();
        assert_eq!(records.len(), 2);
        match &records[1].1 {
            VariantBody::Known(record) => assert_eq!(record.value("a").unwrap(), 7),
            VariantBody::Opaque(_) => panic!("registered tag decoded as opaque"),
        }
    }

    #[test]
    fn unknown_tag_is_preserved_opaquely() {
        let wire = hex!("ff 00 07 00 aa bb cc 01 00 08 00 00 00 00 00");
        let records = decode_stream(&registry(UnknownTagPolicy::Opaque), &wire).unwrap();
        assert_eq!(records.len(), 2);
        match &records[0].1 {
            VariantBody::Opaque(body) => assert_eq!(&body[..], hex!("aa bb cc")),
            VariantBody::Known(_) => panic!("unknown tag decoded as known"),
        }
    }

    #[test]
    fn undersized_length_is_rejected() {
        let wire = hex!("01 00 03 00");
        assert!(matches!(
            decode_stream(&registry(UnknownTagPolicy::Opaque), &wire),
            Err(ProtoError::Malformed(_))
        ));
    }

    #[test]
    fn oversized_body_tolerates_trailing_bytes() {
        // Known record plus 2 trailing bytes a newer peer appended.
        let wire = hex!("01 00 0a 00 05 00 06 00 99 99");
        let records = decode_stream(&registry(UnknownTagPolicy::Opaque), &wire).unwrap();
        match &records[0].1 {
            VariantBody::Known(record) => assert_eq!(record.value("a").unwrap(), 5),
            VariantBody::Opaque(_) => panic!("registered tag decoded as opaque"),
        }
    }
}
