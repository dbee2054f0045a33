//! Ordered records of named members.
//!
//! A [`Composite`] is the unit of structure in the engine: an ordered list
//! of named entries, each a leaf field, a nested composite, or an array.
//! Member order is wire order. The same declaration drives sizing, encoding,
//! and decoding, so a structure written once cannot drift between the three.
//!
//! Serialization runs in two phases. Resolution first synchronizes count
//! fields with their bound arrays, evaluates presence, and drives computed
//! fields to a fixed point; emission then walks the resolved entries and
//! writes bytes. Splitting the phases is what lets computed lengths observe
//! the final size of members declared after them.

use std::fmt;
use std::sync::Arc;

use bytes::{BufMut, Bytes};

use crate::array::{Array, CountSource};
use crate::errors::{Result, WireError};
use crate::field::{Binding, BytesField, Field, LenSpec};
use crate::reader::Reader;

/// Pure predicate over sibling state deciding whether a member exists.
pub type PresenceFn = Arc<dyn for<'a> Fn(&Scope<'a>) -> bool + Send + Sync>;

/// Whether an entry takes part in serialization.
#[derive(Clone)]
pub enum Presence {
    /// Member is always on the wire.
    Always,
    /// Member exists iff the predicate holds.
    ///
    /// On decode the predicate sees only the members decoded so far, so it
    /// must depend exclusively on earlier siblings.
    When(PresenceFn),
    /// Member exists iff any bytes remain in the decode window. Always
    /// emitted on encode.
    IfRemaining,
}

impl fmt::Debug for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "Always"),
            Self::When(_) => write!(f, "When(..)"),
            Self::IfRemaining => write!(f, "IfRemaining"),
        }
    }
}

/// One member of a composite.
#[derive(Debug, Clone)]
pub enum Member {
    /// Fixed-width integer leaf.
    Uint(Field),
    /// Byte-string leaf.
    Bytes(BytesField),
    /// Nested record.
    Composite(Composite),
    /// Repeated record.
    Array(Array),
}

impl From<Field> for Member {
    fn from(f: Field) -> Self {
        Self::Uint(f)
    }
}

impl From<BytesField> for Member {
    fn from(b: BytesField) -> Self {
        Self::Bytes(b)
    }
}

impl From<Composite> for Member {
    fn from(c: Composite) -> Self {
        Self::Composite(c)
    }
}

impl From<Array> for Member {
    fn from(a: Array) -> Self {
        Self::Array(a)
    }
}

/// Named member slot with its presence rule and last-observed presence.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) name: &'static str,
    pub(crate) member: Member,
    pub(crate) presence: Presence,
    pub(crate) present: Option<bool>,
}

/// Read-only view of a composite's entries, handed to computed-field and
/// presence closures.
#[derive(Debug)]
pub struct Scope<'a> {
    pub(crate) name: &'static str,
    pub(crate) entries: &'a [Entry],
}

impl Scope<'_> {
    fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Value of the named integer sibling, if resolved and present.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<u64> {
        let entry = self.entry(name)?;
        if entry.present == Some(false) {
            return None;
        }
        match &entry.member {
            Member::Uint(f) => f.value(),
            _ => None,
        }
    }

    /// Content length of the named byte-string sibling.
    #[must_use]
    pub fn len_of(&self, name: &str) -> Option<usize> {
        match &self.entry(name)?.member {
            Member::Bytes(b) => Some(b.value().len()),
            Member::Array(a) => Some(a.len()),
            _ => None,
        }
    }

    /// Serialized width of the named sibling, zero when absent.
    #[must_use]
    pub fn size_of(&self, name: &str) -> Option<usize> {
        let entry = self.entry(name)?;
        if entry.present == Some(false) {
            return Some(0);
        }
        Some(member_width(&entry.member))
    }

    /// Serialized width of the whole record, absent members excluded.
    ///
    /// Widths never depend on unresolved values, so this is exact even
    /// while computed fields are still settling.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.present != Some(false))
            .map(|e| member_width(&e.member))
            .sum()
    }
}

fn member_width(member: &Member) -> usize {
    match member {
        Member::Uint(f) => f.width(),
        Member::Bytes(b) => b.width(),
        Member::Composite(c) => c.resolved_size(),
        Member::Array(a) => a.width(),
    }
}

/// Ordered record of named members.
#[derive(Debug, Clone)]
pub struct Composite {
    pub(crate) name: &'static str,
    pub(crate) entries: Vec<Entry>,
}

impl Composite {
    /// Empty record with a diagnostic name.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self { name, entries: Vec::new() }
    }

    /// Declared name of this record.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Append an always-present member.
    #[must_use]
    pub fn member(mut self, name: &'static str, member: impl Into<Member>) -> Self {
        self.entries.push(Entry {
            name,
            member: member.into(),
            presence: Presence::Always,
            present: Some(true),
        });
        self
    }

    /// Append a member gated on a predicate over earlier siblings.
    #[must_use]
    pub fn member_when<F>(mut self, name: &'static str, member: impl Into<Member>, when: F) -> Self
    where
        F: for<'a> Fn(&Scope<'a>) -> bool + Send + Sync + 'static,
    {
        self.entries.push(Entry {
            name,
            member: member.into(),
            presence: Presence::When(Arc::new(when)),
            present: None,
        });
        self
    }

    /// Append a trailing member that decodes only when bytes remain.
    #[must_use]
    pub fn member_if_remaining(mut self, name: &'static str, member: impl Into<Member>) -> Self {
        self.entries.push(Entry {
            name,
            member: member.into(),
            presence: Presence::IfRemaining,
            present: None,
        });
        self
    }

    fn entry(&self, name: &'static str) -> Result<&Entry> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .ok_or(WireError::UnknownField { field: name })
    }

    fn entry_mut(&mut self, name: &'static str) -> Result<&mut Entry> {
        self.entries
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or(WireError::UnknownField { field: name })
    }

    /// Value of the named integer member.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownField`] if no integer member has this name, or
    /// [`WireError::MalformedField`] if the member is an unresolved
    /// computed field.
    pub fn value(&self, name: &'static str) -> Result<u64> {
        match &self.entry(name)?.member {
            Member::Uint(f) => f.value().ok_or_else(|| WireError::MalformedField {
                field: name,
                reason: "computed field has not been resolved".to_string(),
            }),
            _ => Err(WireError::UnknownField { field: name }),
        }
    }

    /// Assign the named integer member.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownField`] for a missing member and the
    /// [`Field::set_value`] errors otherwise.
    pub fn set_value(&mut self, name: &'static str, value: u64) -> Result<()> {
        match &mut self.entry_mut(name)?.member {
            Member::Uint(f) => f.set_value(name, value),
            _ => Err(WireError::UnknownField { field: name }),
        }
    }

    /// Content of the named byte-string member.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownField`] if no byte-string member has this name.
    pub fn bytes_value(&self, name: &'static str) -> Result<&Bytes> {
        match &self.entry(name)?.member {
            Member::Bytes(b) => Ok(b.value()),
            _ => Err(WireError::UnknownField { field: name }),
        }
    }

    /// Replace the content of the named byte-string member.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownField`] for a missing member and the
    /// [`BytesField::set_value`] errors otherwise.
    pub fn set_bytes(&mut self, name: &'static str, value: impl Into<Bytes>) -> Result<()> {
        match &mut self.entry_mut(name)?.member {
            Member::Bytes(b) => b.set_value(name, value),
            _ => Err(WireError::UnknownField { field: name }),
        }
    }

    /// The named nested record.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownField`] if no composite member has this name.
    pub fn composite(&self, name: &'static str) -> Result<&Composite> {
        match &self.entry(name)?.member {
            Member::Composite(c) => Ok(c),
            _ => Err(WireError::UnknownField { field: name }),
        }
    }

    /// Mutable access to the named nested record.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownField`] if no composite member has this name.
    pub fn composite_mut(&mut self, name: &'static str) -> Result<&mut Composite> {
        match &mut self.entry_mut(name)?.member {
            Member::Composite(c) => Ok(c),
            _ => Err(WireError::UnknownField { field: name }),
        }
    }

    /// The named array member.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownField`] if no array member has this name.
    pub fn array(&self, name: &'static str) -> Result<&Array> {
        match &self.entry(name)?.member {
            Member::Array(a) => Ok(a),
            _ => Err(WireError::UnknownField { field: name }),
        }
    }

    /// Mutable access to the named array member.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownField`] if no array member has this name.
    pub fn array_mut(&mut self, name: &'static str) -> Result<&mut Array> {
        match &mut self.entry_mut(name)?.member {
            Member::Array(a) => Ok(a),
            _ => Err(WireError::UnknownField { field: name }),
        }
    }

    /// Whether the named member was present the last time this record was
    /// resolved or decoded.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownField`] if no member has this name.
    pub fn is_present(&self, name: &'static str) -> Result<bool> {
        Ok(self.entry(name)?.present.unwrap_or(true))
    }

    /// Serialized width based on current presence flags.
    #[must_use]
    pub(crate) fn resolved_size(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.present != Some(false))
            .map(|e| member_width(&e.member))
            .sum()
    }

    /// Resolve and return the serialized width.
    ///
    /// # Errors
    ///
    /// The [`Composite::resolve`] errors.
    pub fn size(&mut self) -> Result<usize> {
        self.resolve()?;
        Ok(self.resolved_size())
    }

    /// Drive the record to a fully serializable state.
    ///
    /// Clears stale computed values, synchronizes count fields with their
    /// bound arrays and byte strings, evaluates presence, and iterates
    /// computed fields to a fixed point.
    ///
    /// # Errors
    ///
    /// [`WireError::CyclicDependency`] if a full pass over the remaining
    /// computed fields makes no progress.
    pub fn resolve(&mut self) -> Result<()> {
        self.clear_computed();
        self.sync_counts();
        self.mark_presence();
        self.fixed_point()
    }

    fn clear_computed(&mut self) {
        for entry in &mut self.entries {
            match &mut entry.member {
                Member::Uint(f) => {
                    if matches!(f.binding, Binding::Computed(_)) {
                        f.value = None;
                    }
                },
                Member::Composite(c) => c.clear_computed(),
                Member::Array(a) => {
                    for element in &mut a.elements {
                        element.clear_computed();
                    }
                },
                Member::Bytes(_) => {},
            }
        }
    }

    /// Push array and byte-string lengths into their bound count fields.
    fn sync_counts(&mut self) {
        let mut counts: Vec<(&'static str, u64)> = Vec::new();
        for entry in &mut self.entries {
            match &mut entry.member {
                Member::Array(a) => {
                    if let CountSource::Sibling(sibling) = a.count {
                        counts.push((sibling, a.elements.len() as u64));
                    }
                    for element in &mut a.elements {
                        element.sync_counts();
                    }
                },
                Member::Bytes(b) => {
                    if let LenSpec::Sibling(sibling) = &b.len {
                        counts.push((sibling, b.value.len() as u64));
                    }
                },
                Member::Composite(c) => c.sync_counts(),
                Member::Uint(_) => {},
            }
        }
        for (sibling, count) in counts {
            if let Ok(Member::Uint(f)) = self.entry_mut(sibling).map(|e| &mut e.member) {
                if matches!(f.binding, Binding::Value) {
                    f.value = Some(count);
                }
            }
        }
    }

    fn mark_presence(&mut self) {
        let flags: Vec<bool> = self
            .entries
            .iter()
            .map(|entry| match &entry.presence {
                Presence::Always | Presence::IfRemaining => true,
                Presence::When(pred) => {
                    pred(&Scope { name: self.name, entries: &self.entries })
                },
            })
            .collect();
        for (entry, present) in self.entries.iter_mut().zip(flags) {
            entry.present = Some(present);
            match &mut entry.member {
                Member::Composite(c) => c.mark_presence(),
                Member::Array(a) => {
                    for element in &mut a.elements {
                        element.mark_presence();
                    }
                },
                Member::Uint(_) | Member::Bytes(_) => {},
            }
        }
    }

    fn fixed_point(&mut self) -> Result<()> {
        for entry in &mut self.entries {
            match &mut entry.member {
                Member::Composite(c) => c.fixed_point()?,
                Member::Array(a) => {
                    for element in &mut a.elements {
                        element.fixed_point()?;
                    }
                },
                Member::Uint(_) | Member::Bytes(_) => {},
            }
        }
        loop {
            let mut updates: Vec<(usize, u64)> = Vec::new();
            let mut stalled = 0usize;
            let scope = Scope { name: self.name, entries: &self.entries };
            for (i, entry) in self.entries.iter().enumerate() {
                if entry.present == Some(false) {
                    continue;
                }
                if let Member::Uint(f) = &entry.member {
                    if f.value.is_none() {
                        if let Binding::Computed(compute) = &f.binding {
                            match compute(&scope) {
                                Some(value) => updates.push((i, value)),
                                None => stalled += 1,
                            }
                        }
                    }
                }
            }
            if updates.is_empty() {
                if stalled > 0 {
                    return Err(WireError::CyclicDependency { composite: self.name });
                }
                return Ok(());
            }
            for (i, value) in updates {
                if let Member::Uint(f) = &mut self.entries[i].member {
                    f.value = Some(value);
                }
            }
        }
    }

    /// Resolve and serialize into `dst`.
    ///
    /// # Errors
    ///
    /// The [`Composite::resolve`] errors, plus [`WireError::MalformedField`]
    /// if a computed field is somehow still unresolved at emission.
    pub fn encode(&mut self, dst: &mut impl BufMut) -> Result<()> {
        self.resolve()?;
        self.emit(dst)
    }

    /// Resolve and serialize into a fresh byte buffer.
    ///
    /// # Errors
    ///
    /// The [`Composite::encode`] errors.
    pub fn encode_to_bytes(&mut self) -> Result<Bytes> {
        let mut buf = Vec::with_capacity(self.resolved_size().max(16));
        self.encode(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    fn emit(&self, dst: &mut impl BufMut) -> Result<()> {
        for entry in &self.entries {
            if entry.present == Some(false) {
                continue;
            }
            match &entry.member {
                Member::Uint(f) => f.encode(entry.name, dst)?,
                Member::Bytes(b) => b.encode(dst),
                Member::Composite(c) => c.emit(dst)?,
                Member::Array(a) => {
                    for element in &a.elements {
                        element.emit(dst)?;
                    }
                },
            }
        }
        Ok(())
    }

    /// Populate this record from the reader, consuming exactly the bytes
    /// the structure declares.
    ///
    /// Presence predicates are evaluated against the members decoded so
    /// far; skipped members keep their built values and are flagged absent.
    ///
    /// # Errors
    ///
    /// [`WireError::TruncatedInput`] when the window runs short, and
    /// [`WireError::ConstantMismatch`] when a declared constant disagrees
    /// with the wire.
    pub fn decode(&mut self, r: &mut Reader<'_>) -> Result<()> {
        let name = self.name;
        for i in 0..self.entries.len() {
            let (before, rest) = self.entries.split_at_mut(i);
            let entry = &mut rest[0];
            let decoded = Scope { name, entries: before };
            let present = match &entry.presence {
                Presence::Always => true,
                Presence::IfRemaining => !r.is_empty(),
                Presence::When(pred) => pred(&decoded),
            };
            entry.present = Some(present);
            if !present {
                continue;
            }
            match &mut entry.member {
                Member::Uint(f) => f.decode(entry.name, r)?,
                Member::Bytes(b) => {
                    let resolved_len = match &b.len {
                        LenSpec::Sibling(sibling) => Some(
                            decoded
                                .value(sibling)
                                .ok_or(WireError::UnknownField { field: *sibling })?
                                as usize,
                        ),
                        LenSpec::Computed(len) => {
                            Some(len(&decoded).ok_or_else(|| WireError::MalformedField {
                                field: entry.name,
                                reason: "length function could not resolve from decoded siblings"
                                    .to_string(),
                            })?)
                        },
                        _ => None,
                    };
                    b.decode(r, resolved_len)?;
                },
                Member::Composite(c) => c.decode(r)?,
                Member::Array(a) => a.decode(&decoded, r)?,
            }
        }
        Ok(())
    }
}
