//! Homogeneous repeated records.

use crate::composite::{Composite, Scope};
use crate::errors::{Result, WireError};
use crate::reader::Reader;

/// Where the element count of an [`Array`] comes from on decode.
#[derive(Debug, Clone, Copy)]
pub enum CountSource {
    /// Always exactly this many elements.
    Fixed(usize),
    /// The named sibling field carries the count.
    ///
    /// On encode the sibling is synchronized to the current element count
    /// before serialization, so the two can never disagree on the wire.
    Sibling(&'static str),
}

/// Repeated composite with a uniform element shape.
///
/// The template element is cloned once per decoded entry; pushed elements
/// are kept as given.
#[derive(Debug, Clone)]
pub struct Array {
    pub(crate) template: Composite,
    pub(crate) count: CountSource,
    pub(crate) elements: Vec<Composite>,
}

impl Array {
    /// Empty array whose decoded elements are clones of `template`.
    #[must_use]
    pub fn of(template: Composite, count: CountSource) -> Self {
        Self { template, count, elements: Vec::new() }
    }

    /// Append an element for encoding.
    pub fn push(&mut self, element: Composite) {
        self.elements.push(element);
    }

    /// Number of elements currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// True when no elements are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Elements in wire order.
    #[must_use]
    pub fn elements(&self) -> &[Composite] {
        &self.elements
    }

    /// Mutable access to the elements.
    pub fn elements_mut(&mut self) -> &mut Vec<Composite> {
        &mut self.elements
    }

    /// Serialized width of all elements combined.
    #[must_use]
    pub fn width(&self) -> usize {
        self.elements.iter().map(Composite::resolved_size).sum()
    }

    /// Decode `count` elements, reading the count from the already-decoded
    /// sibling scope when bound to one.
    pub(crate) fn decode(&mut self, before: &Scope<'_>, r: &mut Reader<'_>) -> Result<()> {
        let count = match self.count {
            CountSource::Fixed(n) => n,
            CountSource::Sibling(sibling) => before
                .value(sibling)
                .ok_or(WireError::UnknownField { field: sibling })?
                as usize,
        };
        self.elements.clear();
        for _ in 0..count {
            let mut element = self.template.clone();
            element.decode(r)?;
            self.elements.push(element);
        }
        Ok(())
    }
}
