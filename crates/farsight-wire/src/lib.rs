//! Declarative binary structure engine.
//!
//! Wire structures are declared once as ordered records of typed members
//! ([`Composite`]); the declaration drives sizing, encoding, and decoding
//! symmetrically. Length and count fields are expressed as computed or
//! sibling-bound members and are filled in by a resolution phase immediately
//! before serialization, so a structure's framing can never disagree with
//! its content.
//!
//! The engine knows nothing about any particular protocol. Protocol crates
//! declare their packets as composites and register tag-dispatched bodies
//! in a [`VariantRegistry`].

pub mod array;
pub mod composite;
pub mod errors;
pub mod field;
pub mod reader;
pub mod variant;

pub use array::{Array, CountSource};
pub use composite::{Composite, Member, Presence, PresenceFn, Scope};
pub use errors::{Result, WireError};
pub use field::{Binding, ByteOrder, BytesField, ComputeFn, Field, IntWidth, LenFn, LenSpec};
pub use reader::Reader;
pub use variant::{UnknownTagPolicy, VariantBody, VariantRegistry};

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    /// Length-prefixed record in the shape most framing headers take: the
    /// length field covers the whole record, itself included.
    fn framed(payload: &'static [u8]) -> Composite {
        Composite::new("framed")
            .member("version", Field::u8_const(3))
            .member(
                "length",
                Field::computed_u16_be(|s| Some(s.total_size() as u64)),
            )
            .member("payload", BytesField::remainder(payload))
    }

    #[test]
    fn computed_length_covers_whole_record() {
        let mut record = framed(b"hello");
        let wire = record.encode_to_bytes().unwrap();
        assert_eq!(&wire[..], &[0x03, 0x00, 0x08, b'h', b'e', b'l', b'l', b'o']);
        assert_eq!(record.value("length").unwrap(), 8);
        assert_eq!(record.size().unwrap(), 8);
    }

    #[test]
    fn resolution_reruns_after_mutation() {
        let mut record = framed(b"hello");
        let _ = record.encode_to_bytes().unwrap();
        record.set_bytes("payload", &b"hi"[..]).unwrap();
        let wire = record.encode_to_bytes().unwrap();
        assert_eq!(&wire[..], &[0x03, 0x00, 0x05, b'h', b'i']);
    }

    #[test]
    fn decode_populates_and_checks_constants() {
        let mut record = framed(b"");
        record.decode(&mut Reader::new(&[0x03, 0x00, 0x07, 1, 2, 3, 4])).unwrap();
        assert_eq!(record.value("length").unwrap(), 7);
        assert_eq!(&record.bytes_value("payload").unwrap()[..], &[1, 2, 3, 4]);

        let mut record = framed(b"");
        let err = record.decode(&mut Reader::new(&[0x04, 0x00, 0x03])).unwrap_err();
        assert_eq!(
            err,
            WireError::ConstantMismatch { field: "version", expected: 3, actual: 4 }
        );
    }

    #[test]
    fn sibling_bound_count_is_synchronized() {
        let element = Composite::new("pair")
            .member("a", Field::u8(0))
            .member("b", Field::u8(0));
        let mut record = Composite::new("list")
            .member("count", Field::u16_le(0))
            .member("items", Array::of(element.clone(), CountSource::Sibling("count")));

        for v in [1u8, 2, 3] {
            let mut item = element.clone();
            item.set_value("a", u64::from(v)).unwrap();
            item.set_value("b", u64::from(v) * 16).unwrap();
            record.array_mut("items").unwrap().push(item);
        }
        // Out-of-date on purpose; resolution must overwrite it.
        record.set_value("count", 9).unwrap();

        let wire = record.encode_to_bytes().unwrap();
        assert_eq!(&wire[..], &[3, 0, 1, 16, 2, 32, 3, 48]);

        let mut decoded = Composite::new("list")
            .member("count", Field::u16_le(0))
            .member("items", Array::of(element, CountSource::Sibling("count")));
        decoded.decode(&mut Reader::new(&wire)).unwrap();
        assert_eq!(decoded.array("items").unwrap().len(), 3);
        assert_eq!(decoded.array("items").unwrap().elements()[2].value("b").unwrap(), 48);
    }

    #[test]
    fn conditional_member_follows_its_predicate() {
        fn record() -> Composite {
            Composite::new("cond")
                .member("kind", Field::u8(0))
                .member_when("extra", Field::u16_le(0xBEEF), |s| s.value("kind") == Some(1))
        }

        let mut with = record();
        with.set_value("kind", 1).unwrap();
        assert_eq!(&with.encode_to_bytes().unwrap()[..], &[1, 0xEF, 0xBE]);

        let mut without = record();
        assert_eq!(&without.encode_to_bytes().unwrap()[..], &[0]);
        assert!(!without.is_present("extra").unwrap());

        let mut decoded = record();
        decoded.decode(&mut Reader::new(&[1, 0x34, 0x12])).unwrap();
        assert!(decoded.is_present("extra").unwrap());
        assert_eq!(decoded.value("extra").unwrap(), 0x1234);
    }

    #[test]
    fn trailing_member_decodes_only_when_bytes_remain() {
        fn record() -> Composite {
            Composite::new("tail")
                .member("head", Field::u8(0))
                .member_if_remaining("opt", Field::u8(0x55))
        }

        let mut short = record();
        short.decode(&mut Reader::new(&[7])).unwrap();
        assert!(!short.is_present("opt").unwrap());

        let mut long = record();
        long.decode(&mut Reader::new(&[7, 9])).unwrap();
        assert_eq!(long.value("opt").unwrap(), 9);
    }

    #[test]
    fn mutual_dependence_is_rejected() {
        let mut record = Composite::new("cycle")
            .member("a", Field::computed_u8(|s| s.value("b").map(|v| v + 1)))
            .member("b", Field::computed_u8(|s| s.value("a").map(|v| v + 1)));
        assert_eq!(
            record.encode_to_bytes().unwrap_err(),
            WireError::CyclicDependency { composite: "cycle" }
        );
    }

    #[test]
    fn nested_records_resolve_their_own_lengths() {
        let inner = Composite::new("inner")
            .member("len", Field::computed_u8(|s| Some(s.total_size() as u64)))
            .member("body", BytesField::fixed(&b"abc"[..]));
        let mut outer = Composite::new("outer")
            .member("total", Field::computed_u16_be(|s| Some(s.total_size() as u64)))
            .member("inner", inner);
        let wire = outer.encode_to_bytes().unwrap();
        assert_eq!(&wire[..], &[0x00, 0x06, 0x04, b'a', b'b', b'c']);
    }

    #[test]
    fn unknown_member_is_reported_by_name() {
        let record = Composite::new("r").member("a", Field::u8(0));
        assert_eq!(
            record.value("missing").unwrap_err(),
            WireError::UnknownField { field: "missing" }
        );
    }

    proptest! {
        #[test]
        fn framed_round_trip(payload in proptest::collection::vec(any::<u8>(), 0..256)) {
            let mut record = framed(b"");
            record.set_bytes("payload", payload.clone()).unwrap();
            let wire = record.encode_to_bytes().unwrap();
            prop_assert_eq!(wire.len(), payload.len() + 3);

            let mut decoded = framed(b"");
            decoded.decode(&mut Reader::new(&wire)).unwrap();
            prop_assert_eq!(decoded.value("length").unwrap() as usize, wire.len());
            prop_assert_eq!(&decoded.bytes_value("payload").unwrap()[..], &payload[..]);
            prop_assert_eq!(decoded.encode_to_bytes().unwrap(), wire);
        }
    }
}
