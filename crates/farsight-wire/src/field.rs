//! Leaf field types: fixed-width integers and byte strings.
//!
//! A [`Field`] is a typed leaf with a value-binding mode. Literal fields hold
//! a caller-set value, constant fields are immutable and verified on decode,
//! and computed fields evaluate a pure function of sibling state at
//! serialization time - deferred evaluation is required because many fields
//! describe "size of the remaining structure", which is unknown until the
//! owning record is finalized.

use std::fmt;
use std::sync::Arc;

use bytes::{BufMut, Bytes};

use crate::composite::Scope;
use crate::errors::{Result, WireError};
use crate::reader::Reader;

/// Byte order of a multi-byte integer on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Network byte order (most significant byte first)
    Big,
    /// Least significant byte first
    Little,
}

/// Width of an integer field in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    /// One byte
    U8,
    /// Two bytes
    U16,
    /// Four bytes
    U32,
}

impl IntWidth {
    /// Serialized width in bytes.
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }

    /// Largest value representable at this width.
    #[must_use]
    pub const fn max_value(self) -> u64 {
        match self {
            Self::U8 => u8::MAX as u64,
            Self::U16 => u16::MAX as u64,
            Self::U32 => u32::MAX as u64,
        }
    }
}

/// Pure function of sibling state, evaluated during resolution.
///
/// Returns `None` while a sibling the computation depends on is itself
/// unresolved; the fixed-point driver retries on the next pass.
pub type ComputeFn = Arc<dyn for<'a> Fn(&Scope<'a>) -> Option<u64> + Send + Sync>;

/// Value-binding mode of an integer field.
#[derive(Clone)]
pub enum Binding {
    /// Caller-set literal; decoding overwrites it with the on-wire value.
    Value,
    /// Declared constant; immutable, and the decoded value must match.
    Constant(u64),
    /// Derived from sibling state immediately before serialization.
    Computed(ComputeFn),
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value => write!(f, "Value"),
            Self::Constant(c) => write!(f, "Constant({c:#x})"),
            Self::Computed(_) => write!(f, "Computed(..)"),
        }
    }
}

/// Fixed-width unsigned integer leaf.
#[derive(Debug, Clone)]
pub struct Field {
    pub(crate) width: IntWidth,
    pub(crate) order: ByteOrder,
    pub(crate) binding: Binding,
    pub(crate) value: Option<u64>,
}

impl Field {
    fn literal(width: IntWidth, order: ByteOrder, value: u64) -> Self {
        Self { width, order, binding: Binding::Value, value: Some(value) }
    }

    fn constant(width: IntWidth, order: ByteOrder, value: u64) -> Self {
        Self { width, order, binding: Binding::Constant(value), value: Some(value) }
    }

    /// One-byte literal field.
    #[must_use]
    pub fn u8(value: u8) -> Self {
        Self::literal(IntWidth::U8, ByteOrder::Big, u64::from(value))
    }

    /// One-byte constant field.
    #[must_use]
    pub fn u8_const(value: u8) -> Self {
        Self::constant(IntWidth::U8, ByteOrder::Big, u64::from(value))
    }

    /// Two-byte big-endian literal field.
    #[must_use]
    pub fn u16_be(value: u16) -> Self {
        Self::literal(IntWidth::U16, ByteOrder::Big, u64::from(value))
    }

    /// Two-byte little-endian literal field.
    #[must_use]
    pub fn u16_le(value: u16) -> Self {
        Self::literal(IntWidth::U16, ByteOrder::Little, u64::from(value))
    }

    /// Two-byte little-endian constant field.
    #[must_use]
    pub fn u16_le_const(value: u16) -> Self {
        Self::constant(IntWidth::U16, ByteOrder::Little, u64::from(value))
    }

    /// Two-byte big-endian constant field.
    #[must_use]
    pub fn u16_be_const(value: u16) -> Self {
        Self::constant(IntWidth::U16, ByteOrder::Big, u64::from(value))
    }

    /// Four-byte big-endian literal field.
    #[must_use]
    pub fn u32_be(value: u32) -> Self {
        Self::literal(IntWidth::U32, ByteOrder::Big, u64::from(value))
    }

    /// Four-byte little-endian literal field.
    #[must_use]
    pub fn u32_le(value: u32) -> Self {
        Self::literal(IntWidth::U32, ByteOrder::Little, u64::from(value))
    }

    /// Four-byte little-endian constant field.
    #[must_use]
    pub fn u32_le_const(value: u32) -> Self {
        Self::constant(IntWidth::U32, ByteOrder::Little, u64::from(value))
    }

    /// Computed field of the given width and order.
    ///
    /// The closure runs against the owning record's scope during resolution;
    /// it must be pure and must return `None` (rather than a placeholder)
    /// while its dependencies are unresolved.
    pub fn computed<F>(width: IntWidth, order: ByteOrder, compute: F) -> Self
    where
        F: for<'a> Fn(&Scope<'a>) -> Option<u64> + Send + Sync + 'static,
    {
        Self { width, order, binding: Binding::Computed(Arc::new(compute)), value: None }
    }

    /// One-byte computed field.
    pub fn computed_u8<F>(compute: F) -> Self
    where
        F: for<'a> Fn(&Scope<'a>) -> Option<u64> + Send + Sync + 'static,
    {
        Self::computed(IntWidth::U8, ByteOrder::Big, compute)
    }

    /// Two-byte big-endian computed field.
    pub fn computed_u16_be<F>(compute: F) -> Self
    where
        F: for<'a> Fn(&Scope<'a>) -> Option<u64> + Send + Sync + 'static,
    {
        Self::computed(IntWidth::U16, ByteOrder::Big, compute)
    }

    /// Two-byte little-endian computed field.
    pub fn computed_u16_le<F>(compute: F) -> Self
    where
        F: for<'a> Fn(&Scope<'a>) -> Option<u64> + Send + Sync + 'static,
    {
        Self::computed(IntWidth::U16, ByteOrder::Little, compute)
    }

    /// Four-byte little-endian computed field.
    pub fn computed_u32_le<F>(compute: F) -> Self
    where
        F: for<'a> Fn(&Scope<'a>) -> Option<u64> + Send + Sync + 'static,
    {
        Self::computed(IntWidth::U32, ByteOrder::Little, compute)
    }

    /// Serialized width in bytes.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width.bytes()
    }

    /// Current value; `None` for a computed field that has not resolved.
    #[must_use]
    pub fn value(&self) -> Option<u64> {
        self.value
    }

    /// Assign a value.
    ///
    /// # Errors
    ///
    /// [`WireError::ImmutableField`] if the binding is constant, and
    /// [`WireError::MalformedField`] if the value does not fit the width.
    pub fn set_value(&mut self, name: &'static str, value: u64) -> Result<()> {
        if matches!(self.binding, Binding::Constant(_)) {
            return Err(WireError::ImmutableField { field: name });
        }
        if value > self.width.max_value() {
            return Err(WireError::MalformedField {
                field: name,
                reason: format!("value {value:#x} exceeds {} byte width", self.width.bytes()),
            });
        }
        self.value = Some(value);
        Ok(())
    }

    /// Emit the resolved value.
    pub(crate) fn encode(&self, name: &'static str, dst: &mut impl BufMut) -> Result<()> {
        let value = self.value.ok_or_else(|| WireError::MalformedField {
            field: name,
            reason: "field is unresolved at encode time".to_string(),
        })?;
        match (self.width, self.order) {
            (IntWidth::U8, _) => dst.put_u8(value as u8),
            (IntWidth::U16, ByteOrder::Big) => dst.put_u16(value as u16),
            (IntWidth::U16, ByteOrder::Little) => dst.put_u16_le(value as u16),
            (IntWidth::U32, ByteOrder::Big) => dst.put_u32(value as u32),
            (IntWidth::U32, ByteOrder::Little) => dst.put_u32_le(value as u32),
        }
        Ok(())
    }

    /// Consume exactly the declared width and store the decoded value.
    pub(crate) fn decode(&mut self, name: &'static str, r: &mut Reader<'_>) -> Result<()> {
        let raw = r.take(self.width.bytes())?;
        let value = match (self.width, self.order) {
            (IntWidth::U8, _) => u64::from(raw[0]),
            (IntWidth::U16, ByteOrder::Big) => u64::from(u16::from_be_bytes([raw[0], raw[1]])),
            (IntWidth::U16, ByteOrder::Little) => u64::from(u16::from_le_bytes([raw[0], raw[1]])),
            (IntWidth::U32, ByteOrder::Big) => {
                u64::from(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
            },
            (IntWidth::U32, ByteOrder::Little) => {
                u64::from(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            },
        };
        if let Binding::Constant(expected) = self.binding {
            if value != expected {
                return Err(WireError::ConstantMismatch { field: name, expected, actual: value });
            }
        }
        self.value = Some(value);
        Ok(())
    }
}

/// Pure function of sibling state yielding a decode length in bytes.
pub type LenFn = Arc<dyn for<'a> Fn(&Scope<'a>) -> Option<usize> + Send + Sync>;

/// Length rule of a byte-string field.
#[derive(Clone)]
pub enum LenSpec {
    /// Exactly this many bytes on the wire.
    Fixed(usize),
    /// Length is carried by the named sibling field.
    ///
    /// On encode the sibling is synchronized to the current content length
    /// before any bytes are emitted; on decode the sibling must already have
    /// been read.
    Sibling(&'static str),
    /// Content runs until (and absorbs) this delimiter.
    Terminated(&'static [u8]),
    /// Decode length is an arbitrary function of earlier siblings, for
    /// lengths derived arithmetically from a length field rather than
    /// carried verbatim. Encoded width is the current content length.
    Computed(LenFn),
    /// Content spans whatever remains of the decode window.
    Remainder,
}

impl fmt::Debug for LenSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(n) => write!(f, "Fixed({n})"),
            Self::Sibling(name) => write!(f, "Sibling({name})"),
            Self::Terminated(delim) => write!(f, "Terminated({delim:?})"),
            Self::Computed(_) => write!(f, "Computed(..)"),
            Self::Remainder => write!(f, "Remainder"),
        }
    }
}

/// Variable- or fixed-length byte string leaf.
#[derive(Debug, Clone)]
pub struct BytesField {
    pub(crate) len: LenSpec,
    pub(crate) value: Bytes,
}

impl BytesField {
    /// Fixed-width field holding exactly `value.len()` bytes.
    #[must_use]
    pub fn fixed(value: impl Into<Bytes>) -> Self {
        let value = value.into();
        Self { len: LenSpec::Fixed(value.len()), value }
    }

    /// Fixed-width field of `n` zero bytes (wire padding).
    #[must_use]
    pub fn zeroed(n: usize) -> Self {
        Self { len: LenSpec::Fixed(n), value: Bytes::from(vec![0u8; n]) }
    }

    /// Field whose length is carried by the named sibling.
    #[must_use]
    pub fn length_from(sibling: &'static str, value: impl Into<Bytes>) -> Self {
        Self { len: LenSpec::Sibling(sibling), value: value.into() }
    }

    /// Delimiter-terminated field; the delimiter is written after the
    /// content and absorbed on decode.
    #[must_use]
    pub fn terminated(delimiter: &'static [u8], value: impl Into<Bytes>) -> Self {
        Self { len: LenSpec::Terminated(delimiter), value: value.into() }
    }

    /// Field whose decode length is computed from earlier siblings.
    pub fn computed_len<F>(len: F, value: impl Into<Bytes>) -> Self
    where
        F: for<'a> Fn(&Scope<'a>) -> Option<usize> + Send + Sync + 'static,
    {
        Self { len: LenSpec::Computed(Arc::new(len)), value: value.into() }
    }

    /// Field spanning the rest of the decode window.
    #[must_use]
    pub fn remainder(value: impl Into<Bytes>) -> Self {
        Self { len: LenSpec::Remainder, value: value.into() }
    }

    /// Serialized width in bytes, including any terminator.
    #[must_use]
    pub fn width(&self) -> usize {
        match &self.len {
            LenSpec::Fixed(n) => *n,
            LenSpec::Terminated(delim) => self.value.len() + delim.len(),
            LenSpec::Sibling(_) | LenSpec::Computed(_) | LenSpec::Remainder => self.value.len(),
        }
    }

    /// Current content.
    #[must_use]
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Replace the content.
    ///
    /// # Errors
    ///
    /// [`WireError::MalformedField`] if a fixed-length field is given
    /// content of a different length.
    pub fn set_value(&mut self, name: &'static str, value: impl Into<Bytes>) -> Result<()> {
        let value = value.into();
        if let LenSpec::Fixed(n) = &self.len {
            if value.len() != *n {
                return Err(WireError::MalformedField {
                    field: name,
                    reason: format!("fixed field holds {n} bytes, got {}", value.len()),
                });
            }
        }
        self.value = value;
        Ok(())
    }

    pub(crate) fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(&self.value);
        if let LenSpec::Terminated(delim) = &self.len {
            dst.put_slice(delim);
        }
    }

    /// Decode; `resolved_len` supplies the caller-computed width for
    /// [`LenSpec::Sibling`] and [`LenSpec::Computed`] fields.
    pub(crate) fn decode(&mut self, r: &mut Reader<'_>, resolved_len: Option<usize>) -> Result<()> {
        let content = match &self.len {
            LenSpec::Fixed(n) => r.take(*n)?,
            LenSpec::Terminated(delim) => r.take_until(delim)?,
            LenSpec::Remainder => r.take(r.remaining())?,
            LenSpec::Sibling(sibling) => {
                let n = resolved_len.ok_or(WireError::UnknownField { field: sibling })?;
                r.take(n)?
            },
            LenSpec::Computed(_) => {
                let n = resolved_len.ok_or_else(|| WireError::MalformedField {
                    field: "length",
                    reason: "computed length did not resolve".to_string(),
                })?;
                r.take(n)?
            },
        };
        self.value = Bytes::copy_from_slice(content);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_widths_and_orders() {
        let cases: [(Field, &[u8]); 5] = [
            (Field::u8(0xAB), &[0xAB]),
            (Field::u16_be(0x1234), &[0x12, 0x34]),
            (Field::u16_le(0x1234), &[0x34, 0x12]),
            (Field::u32_be(0xDEAD_BEEF), &[0xDE, 0xAD, 0xBE, 0xEF]),
            (Field::u32_le(0xDEAD_BEEF), &[0xEF, 0xBE, 0xAD, 0xDE]),
        ];
        for (field, wire) in cases {
            let mut buf = Vec::new();
            field.encode("f", &mut buf).unwrap();
            assert_eq!(buf, wire);
            assert_eq!(buf.len(), field.width());

            let mut clone = field.clone();
            clone.decode("f", &mut Reader::new(wire)).unwrap();
            assert_eq!(clone.value(), field.value());
        }
    }

    #[test]
    fn constant_rejects_assignment() {
        let mut f = Field::u8_const(0xE0);
        let err = f.set_value("code", 0x01).unwrap_err();
        assert_eq!(err, WireError::ImmutableField { field: "code" });
        assert_eq!(f.value(), Some(0xE0));
    }

    #[test]
    fn constant_mismatch_on_decode() {
        let mut f = Field::u8_const(0x03);
        let err = f.decode("version", &mut Reader::new(&[0x04])).unwrap_err();
        assert_eq!(
            err,
            WireError::ConstantMismatch { field: "version", expected: 0x03, actual: 0x04 }
        );
    }

    #[test]
    fn value_must_fit_width() {
        let mut f = Field::u16_le(0);
        assert!(matches!(
            f.set_value("len", 0x1_0000),
            Err(WireError::MalformedField { field: "len", .. })
        ));
    }

    #[test]
    fn terminated_bytes_round_trip() {
        let field = BytesField::terminated(b"\r\n", &b"Cookie: mstshash=fern"[..]);
        let mut buf = Vec::new();
        field.encode(&mut buf);
        assert_eq!(buf, b"Cookie: mstshash=fern\r\n");
        assert_eq!(buf.len(), field.width());

        let mut clone = field.clone();
        clone.decode(&mut Reader::new(&buf), None).unwrap();
        assert_eq!(clone.value(), field.value());
    }

    #[test]
    fn fixed_bytes_length_is_enforced() {
        let mut field = BytesField::zeroed(4);
        assert!(field.set_value("pad", &b"abc"[..]).is_err());
        assert!(field.set_value("pad", &b"abcd"[..]).is_ok());
    }
}
