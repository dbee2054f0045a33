//! Error types for the structure engine.
//!
//! All errors are structured, testable, and carry enough context to point at
//! the offending field without a debugger. Truncation is its own variant
//! because callers at the framing boundary treat it as "buffer more bytes",
//! not as a fatal condition.

use thiserror::Error;

/// Errors that can occur while resolving, encoding, or decoding a record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Fewer bytes remain than the next member requires.
    ///
    /// Recoverable at the framing boundary: the caller may retry the decode
    /// once more input has arrived.
    #[error("truncated input: next member needs {needed} bytes, {available} available")]
    TruncatedInput {
        /// Bytes the pending read requires
        needed: usize,
        /// Bytes actually remaining
        available: usize,
    },

    /// A constant field decoded to a value other than its declared constant.
    ///
    /// This signals protocol desynchronization and is fatal to the
    /// connection that produced the bytes.
    #[error("constant mismatch in `{field}`: expected {expected:#x}, got {actual:#x}")]
    ConstantMismatch {
        /// Declared field name
        field: &'static str,
        /// Declared constant value
        expected: u64,
        /// Value read from the wire
        actual: u64,
    },

    /// Computed fields could not be resolved to a fixed point.
    ///
    /// A full resolution pass made no progress, so the remaining computed
    /// fields depend on each other (directly or through a cycle).
    #[error("cyclic dependency while resolving composite `{composite}`")]
    CyclicDependency {
        /// Composite whose resolution stalled
        composite: &'static str,
    },

    /// Attempted to assign a value to a constant field.
    #[error("field `{field}` is a declared constant and cannot be assigned")]
    ImmutableField {
        /// Declared field name
        field: &'static str,
    },

    /// No registered constructor for a discriminator tag.
    ///
    /// Only raised under [`UnknownTagPolicy::Fail`]; catalogs that opt into
    /// opaque pass-through never see this error.
    ///
    /// [`UnknownTagPolicy::Fail`]: crate::variant::UnknownTagPolicy::Fail
    #[error("unknown variant tag {tag:#x}")]
    UnknownVariant {
        /// Discriminator value read before dispatch
        tag: u64,
    },

    /// A member referenced by name does not exist in the composite.
    #[error("composite has no member named `{field}`")]
    UnknownField {
        /// Requested member name
        field: &'static str,
    },

    /// A field is structurally invalid for the requested operation.
    #[error("malformed field `{field}`: {reason}")]
    MalformedField {
        /// Declared field name
        field: &'static str,
        /// What went wrong
        reason: String,
    },
}

/// Convenient Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, WireError>;
