//! Connection establishment engine.
//!
//! Drives the setup exchange end to end: framed connection request,
//! security negotiation with downgrade retry, settings and capability
//! exchange, then session payload delivery. Protocol logic lives in a
//! sans-IO state machine ([`connection::ClientConnection`]); the async
//! driver ([`client::Client`]) executes its actions over a pluggable
//! transport.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod connection;
pub mod error;
pub mod transport;

pub use client::{Client, Established};
pub use connection::{
    ClientAction, ClientConnection, ClientState, ConnectionConfig, NegotiatedState,
};
pub use error::{ConnectionError, Result};
pub use transport::{Connect, StreamTransport, Transport};
