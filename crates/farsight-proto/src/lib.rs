//! Connection-establishment wire protocol.
//!
//! Everything a connection needs before a session becomes usable: TPKT
//! framing over the byte stream, the X224 security-mode negotiation, and
//! the envelope-wrapped settings and capability catalogs exchanged during
//! setup. All packet layouts are declared through the `farsight-wire`
//! structure engine, so each record is a single declaration driving
//! sizing, encoding, and decoding alike.
//!
//! The crate is sans-IO: it turns records into bytes and bytes into
//! records. Connection sequencing and transport handling live in
//! `farsight-core`.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod caps;
pub mod constants;
pub mod envelope;
pub mod errors;
pub mod gcc;
pub mod options;
pub mod tpkt;
pub mod x224;

pub use constants::ConstantTable;
pub use errors::{ProtoError, Result};
pub use options::SessionOptions;
pub use tpkt::FrameAssembler;
pub use x224::{
    ConnectionConfirm, ConnectionRequest, FailureCode, SecurityProtocols, SelectedProtocol,
};
