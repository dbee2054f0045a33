//! Error types for connection setup and driving.

use std::time::Duration;

use farsight_proto::{FailureCode, ProtoError};
use thiserror::Error;

use crate::connection::ClientState;

/// Errors raised while sequencing or driving a connection.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// An operation was invoked in a state that does not allow it.
    #[error("operation `{operation}` is invalid in state {state:?}")]
    InvalidState {
        /// State the machine was in
        state: ClientState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// The negotiation round-trip did not complete in time.
    #[error("negotiation timed out after {elapsed:?}")]
    HandshakeTimeout {
        /// Time waited before giving up
        elapsed: Duration,
    },

    /// The server refused every security mode we were willing to offer.
    #[error("negotiation failed with no security mode left to offer: {code}")]
    Negotiation {
        /// Last failure reason reported by the server
        code: FailureCode,
    },

    /// Protocol-layer failure while encoding or decoding.
    #[error(transparent)]
    Protocol(#[from] ProtoError),

    /// The peer closed the byte stream.
    #[error("transport closed by peer")]
    TransportClosed,

    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ConnectionError {
    /// True for failures worth retrying the whole connection sequence for.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::HandshakeTimeout { .. } | Self::Negotiation { .. } | Self::Transport(_)
        )
    }
}

/// Convenient Result type alias for connection operations.
pub type Result<T> = std::result::Result<T, ConnectionError>;
