//! Protocol-level error taxonomy.

use thiserror::Error;

use crate::x224::FailureCode;

/// Errors raised while framing, negotiating, or exchanging settings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtoError {
    /// Frame header carried a version other than the one this stack speaks.
    ///
    /// The stream is desynchronized or the peer is not speaking this
    /// protocol at all; fatal to the connection.
    #[error("protocol mismatch: framing version {version:#04x}, expected 0x03")]
    ProtocolMismatch {
        /// Version byte actually read
        version: u8,
    },

    /// The server answered the security negotiation with a failure code.
    ///
    /// Retryable: the caller may reattempt the whole connection sequence
    /// with a downgraded security mode.
    #[error("security negotiation failed: {code}")]
    NegotiationFailure {
        /// Reason reported by the server
        code: FailureCode,
    },

    /// The server selected a security protocol this stack does not
    /// implement.
    #[error("server selected unsupported protocol {protocol:#010x}")]
    UnsupportedProtocol {
        /// Raw selected-protocol value
        protocol: u32,
    },

    /// A required entry is missing from the constant table.
    ///
    /// Raised while building catalogs, before any packet work starts;
    /// always a startup failure, never a per-packet one.
    #[error("constant table has no entry `{section}/{name}`")]
    MissingConstant {
        /// Table section
        section: &'static str,
        /// Entry name within the section
        name: &'static str,
    },

    /// A structurally valid record carried values this layer cannot accept.
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// Structure-engine failure while encoding or decoding.
    #[error(transparent)]
    Wire(#[from] farsight_wire::WireError),
}

impl ProtoError {
    /// True for errors that mean "buffer more bytes and retry the decode"
    /// rather than "abort the connection".
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Wire(farsight_wire::WireError::TruncatedInput { .. }))
    }
}

/// Convenient Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtoError>;
