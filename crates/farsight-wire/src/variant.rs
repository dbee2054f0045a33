//! Tag-dispatched decoding of heterogeneous record streams.
//!
//! Capability sets and settings blocks arrive as a sequence of
//! `[tag][length][body]` envelopes whose body shape depends on the tag. A
//! [`VariantRegistry`] maps tags to record constructors and decodes each
//! body inside a window of exactly the advertised length, so one malformed
//! or unknown body can never desynchronize the stream.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::composite::Composite;
use crate::errors::{Result, WireError};
use crate::reader::Reader;

/// What to do with a tag no constructor is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownTagPolicy {
    /// Reject the stream with [`WireError::UnknownVariant`].
    Fail,
    /// Preserve the body verbatim so it can be re-emitted untouched.
    Opaque,
}

/// Decoded body of one envelope.
#[derive(Debug, Clone)]
pub enum VariantBody {
    /// The tag was registered and its record decoded.
    Known(Composite),
    /// The tag was unknown; the raw body bytes, preserved exactly.
    Opaque(Bytes),
}

type Constructor = Arc<dyn Fn() -> Composite + Send + Sync>;

/// Registry of record constructors keyed by discriminator tag.
#[derive(Clone)]
pub struct VariantRegistry {
    name: &'static str,
    constructors: HashMap<u64, Constructor>,
    policy: UnknownTagPolicy,
}

impl fmt::Debug for VariantRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariantRegistry")
            .field("name", &self.name)
            .field("tags", &self.constructors.len())
            .field("policy", &self.policy)
            .finish()
    }
}

impl VariantRegistry {
    /// Empty registry with the given unknown-tag policy.
    #[must_use]
    pub fn new(name: &'static str, policy: UnknownTagPolicy) -> Self {
        Self { name, constructors: HashMap::new(), policy }
    }

    /// Diagnostic name of this registry.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register a constructor for `tag`, replacing any previous one.
    pub fn register<F>(&mut self, tag: u64, constructor: F)
    where
        F: Fn() -> Composite + Send + Sync + 'static,
    {
        self.constructors.insert(tag, Arc::new(constructor));
    }

    /// True when a constructor is registered for `tag`.
    #[must_use]
    pub fn knows(&self, tag: u64) -> bool {
        self.constructors.contains_key(&tag)
    }

    /// Build a fresh, unpopulated record for `tag`.
    #[must_use]
    pub fn build(&self, tag: u64) -> Option<Composite> {
        self.constructors.get(&tag).map(|ctor| ctor())
    }

    /// Decode one body of exactly `body_len` bytes dispatched on `tag`.
    ///
    /// The body decodes inside its own window; trailing bytes a newer peer
    /// appended after the known structure are tolerated and skipped, since
    /// the envelope length, not the record shape, owns the framing.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownVariant`] for an unregistered tag under
    /// [`UnknownTagPolicy::Fail`], [`WireError::TruncatedInput`] if fewer
    /// than `body_len` bytes remain, and any record decode error.
    pub fn decode_body(
        &self,
        tag: u64,
        body_len: usize,
        r: &mut Reader<'_>,
    ) -> Result<VariantBody> {
        let mut window = r.sub_reader(body_len)?;
        match self.constructors.get(&tag) {
            Some(ctor) => {
                let mut record = ctor();
                record.decode(&mut window)?;
                Ok(VariantBody::Known(record))
            },
            None => match self.policy {
                UnknownTagPolicy::Fail => Err(WireError::UnknownVariant { tag }),
                UnknownTagPolicy::Opaque => {
                    Ok(VariantBody::Opaque(Bytes::copy_from_slice(window.take(body_len)?)))
                },
            },
        }
    }
}
