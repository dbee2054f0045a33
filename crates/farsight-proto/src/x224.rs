//! X224 connection requests and the security-mode negotiation they carry.
//!
//! The connection request travels as a TPKT payload:
//! `[li:u8][code:u8=0xE0][dstRef:u16LE=0][srcRef:u16LE=0][classOpt:u8=0]`
//! followed by an optional CRLF-terminated routing cookie and an 8-byte
//! negotiation block `[type:u8][flags:u8][length:u16LE=8][value:u32LE]`.
//! The length indicator `li` counts every byte after itself.
//!
//! The confirm travels the same way with code `0xD0`. Its negotiation block
//! is optional; an absent block means a legacy server that only speaks
//! standard security.

use std::fmt;

use bitflags::bitflags;
use bytes::Bytes;
use farsight_wire::{BytesField, Composite, Field, Reader, Scope};
use serde::{Deserialize, Serialize};

use crate::errors::{ProtoError, Result};

/// TPDU code of a connection request.
pub const CODE_CONNECTION_REQUEST: u8 = 0xE0;
/// TPDU code of a connection confirm.
pub const CODE_CONNECTION_CONFIRM: u8 = 0xD0;

/// Negotiation block type codes.
const NEG_REQUEST: u8 = 0x01;
const NEG_RESPONSE: u8 = 0x02;
const NEG_FAILURE: u8 = 0x03;

/// Fixed TPDU bytes after the length indicator, negotiation excluded.
const FIXED_AFTER_LI: usize = 6;
/// Serialized size of a negotiation block, its own header included.
const NEG_BLOCK_LEN: u16 = 8;

const COOKIE_PREFIX: &str = "Cookie: mstshash=";

bitflags! {
    /// Security protocols a client is willing to speak, as a wire bitmask.
    ///
    /// The empty set is meaningful: it requests legacy standard security.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct SecurityProtocols: u32 {
        /// TLS security
        const SSL = 0x0000_0001;
        /// CredSSP (network level authentication)
        const HYBRID = 0x0000_0002;
        /// CredSSP with early user authorization
        const HYBRID_EX = 0x0000_0008;
    }
}

/// Protocol the server selected in its confirm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectedProtocol {
    /// Legacy standard security
    Rdp,
    /// TLS security
    Ssl,
    /// CredSSP
    Hybrid,
}

impl SelectedProtocol {
    fn from_wire(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::Rdp),
            1 => Ok(Self::Ssl),
            2 => Ok(Self::Hybrid),
            other => Err(ProtoError::UnsupportedProtocol { protocol: other }),
        }
    }

    fn to_wire(self) -> u32 {
        match self {
            Self::Rdp => 0,
            Self::Ssl => 1,
            Self::Hybrid => 2,
        }
    }
}

impl fmt::Display for SelectedProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rdp => write!(f, "standard security"),
            Self::Ssl => write!(f, "TLS"),
            Self::Hybrid => write!(f, "CredSSP"),
        }
    }
}

/// Reason a server refused the negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCode {
    /// Server only accepts TLS
    SslRequired,
    /// Server forbids TLS
    SslNotAllowed,
    /// Server has no certificate installed
    SslCertNotOnServer,
    /// Request flags were inconsistent
    InconsistentFlags,
    /// Server requires CredSSP
    HybridRequired,
    /// Server requires TLS with user authentication
    SslWithUserAuthRequired,
    /// Unrecognized reason code, preserved verbatim
    Other(u32),
}

impl FailureCode {
    /// Map a wire reason code.
    #[must_use]
    pub fn from_wire(code: u32) -> Self {
        match code {
            1 => Self::SslRequired,
            2 => Self::SslNotAllowed,
            3 => Self::SslCertNotOnServer,
            4 => Self::InconsistentFlags,
            5 => Self::HybridRequired,
            6 => Self::SslWithUserAuthRequired,
            other => Self::Other(other),
        }
    }

    /// The wire reason code.
    #[must_use]
    pub fn to_wire(self) -> u32 {
        match self {
            Self::SslRequired => 1,
            Self::SslNotAllowed => 2,
            Self::SslCertNotOnServer => 3,
            Self::InconsistentFlags => 4,
            Self::HybridRequired => 5,
            Self::SslWithUserAuthRequired => 6,
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SslRequired => write!(f, "server requires TLS"),
            Self::SslNotAllowed => write!(f, "server does not allow TLS"),
            Self::SslCertNotOnServer => write!(f, "server has no TLS certificate"),
            Self::InconsistentFlags => write!(f, "inconsistent negotiation flags"),
            Self::HybridRequired => write!(f, "server requires CredSSP"),
            Self::SslWithUserAuthRequired => {
                write!(f, "server requires TLS with user authentication")
            },
            Self::Other(code) => write!(f, "failure code {code}"),
        }
    }
}

fn negotiation_block(neg_type: u8, flags: u8, value: u32) -> Composite {
    Composite::new("negotiation")
        .member("type", Field::u8_const(neg_type))
        .member("flags", Field::u8(flags))
        .member("length", Field::u16_le_const(NEG_BLOCK_LEN))
        .member("value", Field::u32_le(value))
}

/// Negotiation block shape used on decode, where the type byte selects the
/// meaning of the value field and so cannot be a constant.
fn negotiation_block_any() -> Composite {
    Composite::new("negotiation")
        .member("type", Field::u8(0))
        .member("flags", Field::u8(0))
        .member("length", Field::u16_le_const(NEG_BLOCK_LEN))
        .member("value", Field::u32_le(0))
}

fn li_field() -> Field {
    Field::computed_u8(|s: &Scope<'_>| Some(s.total_size() as u64 - 1))
}

/// Client connection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    /// Routing cookie user name, emitted as `Cookie: mstshash=<user>`.
    pub cookie_user: Option<String>,
    /// Security protocols the client offers.
    pub protocols: SecurityProtocols,
    /// Negotiation request flags, normally zero.
    pub flags: u8,
}

impl ConnectionRequest {
    /// Request offering the given protocols, no cookie.
    #[must_use]
    pub fn new(protocols: SecurityProtocols) -> Self {
        Self { cookie_user: None, protocols, flags: 0 }
    }

    /// Attach a routing cookie user name.
    #[must_use]
    pub fn with_cookie(mut self, user: impl Into<String>) -> Self {
        self.cookie_user = Some(user.into());
        self
    }

    /// Serialize as a TPKT payload.
    ///
    /// # Errors
    ///
    /// [`ProtoError::Malformed`] if the cookie user name contains bytes
    /// that would corrupt the CRLF-terminated cookie line.
    pub fn encode(&self) -> Result<Bytes> {
        let mut record = Composite::new("connection_request")
            .member("li", li_field())
            .member("code", Field::u8_const(CODE_CONNECTION_REQUEST))
            .member("dst_ref", Field::u16_le_const(0))
            .member("src_ref", Field::u16_le_const(0))
            .member("class_option", Field::u8_const(0));
        if let Some(user) = &self.cookie_user {
            if !user.bytes().all(|b| b.is_ascii_graphic()) {
                return Err(ProtoError::Malformed(format!(
                    "cookie user name {user:?} is not printable ASCII"
                )));
            }
            let line = format!("{COOKIE_PREFIX}{user}");
            record = record.member("cookie", BytesField::terminated(b"\r\n", line.into_bytes()));
        }
        record = record.member(
            "negotiation",
            negotiation_block(NEG_REQUEST, self.flags, self.protocols.bits()),
        );
        Ok(record.encode_to_bytes()?)
    }

    /// Parse a TPKT payload as a connection request.
    ///
    /// A request short enough to rule out a cookie line skips the cookie
    /// member entirely; a request with no negotiation block offers only
    /// standard security.
    ///
    /// # Errors
    ///
    /// [`ProtoError::Wire`] for structural failures and
    /// [`ProtoError::Malformed`] for a cookie line without the expected
    /// prefix.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut record = Composite::new("connection_request")
            .member("li", Field::u8(0))
            .member("code", Field::u8_const(CODE_CONNECTION_REQUEST))
            .member("dst_ref", Field::u16_le_const(0))
            .member("src_ref", Field::u16_le_const(0))
            .member("class_option", Field::u8_const(0))
            .member_when(
                "cookie",
                BytesField::terminated(b"\r\n", Bytes::new()),
                |s: &Scope<'_>| {
                    s.value("li")
                        .is_some_and(|li| li > (FIXED_AFTER_LI + NEG_BLOCK_LEN as usize) as u64)
                },
            )
            .member_if_remaining("negotiation", negotiation_block_any());
        record.decode(&mut Reader::new(payload))?;

        let cookie_user = if record.is_present("cookie")? {
            let line = record.bytes_value("cookie")?;
            let line = std::str::from_utf8(line)
                .map_err(|_| ProtoError::Malformed("cookie line is not UTF-8".to_string()))?;
            let user = line.strip_prefix(COOKIE_PREFIX).ok_or_else(|| {
                ProtoError::Malformed(format!("unrecognized cookie line {line:?}"))
            })?;
            Some(user.to_string())
        } else {
            None
        };

        let (protocols, flags) = if record.is_present("negotiation")? {
            let negotiation = record.composite("negotiation")?;
            if negotiation.value("type")? != u64::from(NEG_REQUEST) {
                return Err(ProtoError::Malformed(format!(
                    "negotiation type {:#04x} in a connection request",
                    negotiation.value("type")?
                )));
            }
            (
                SecurityProtocols::from_bits_retain(negotiation.value("value")? as u32),
                negotiation.value("flags")? as u8,
            )
        } else {
            (SecurityProtocols::empty(), 0)
        };

        Ok(Self { cookie_user, protocols, flags })
    }
}

/// Server connection confirm, after negotiation outcome analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfirm {
    /// Protocol the server selected.
    pub selected: SelectedProtocol,
    /// Negotiation response flags.
    pub flags: u8,
}

impl ConnectionConfirm {
    /// Serialize as a TPKT payload.
    ///
    /// # Errors
    ///
    /// [`ProtoError::Wire`] if serialization fails.
    pub fn encode(&self) -> Result<Bytes> {
        let mut record = Composite::new("connection_confirm")
            .member("li", li_field())
            .member("code", Field::u8_const(CODE_CONNECTION_CONFIRM))
            .member("dst_ref", Field::u16_le(0))
            .member("src_ref", Field::u16_le(0))
            .member("class_option", Field::u8(0))
            .member(
                "negotiation",
                negotiation_block(NEG_RESPONSE, self.flags, self.selected.to_wire()),
            );
        Ok(record.encode_to_bytes()?)
    }

    /// Serialize a negotiation failure as a TPKT payload.
    ///
    /// # Errors
    ///
    /// [`ProtoError::Wire`] if serialization fails.
    pub fn encode_failure(code: FailureCode) -> Result<Bytes> {
        let mut record = Composite::new("connection_confirm")
            .member("li", li_field())
            .member("code", Field::u8_const(CODE_CONNECTION_CONFIRM))
            .member("dst_ref", Field::u16_le(0))
            .member("src_ref", Field::u16_le(0))
            .member("class_option", Field::u8(0))
            .member("negotiation", negotiation_block(NEG_FAILURE, 0, code.to_wire()));
        Ok(record.encode_to_bytes()?)
    }

    /// Parse a TPKT payload as a connection confirm.
    ///
    /// # Errors
    ///
    /// [`ProtoError::NegotiationFailure`] when the server answered with a
    /// failure block, [`ProtoError::UnsupportedProtocol`] when it selected
    /// a protocol this stack does not implement, and [`ProtoError::Wire`]
    /// for structural failures.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut record = Composite::new("connection_confirm")
            .member("li", Field::u8(0))
            .member("code", Field::u8_const(CODE_CONNECTION_CONFIRM))
            .member("dst_ref", Field::u16_le(0))
            .member("src_ref", Field::u16_le(0))
            .member("class_option", Field::u8(0))
            .member_if_remaining("negotiation", negotiation_block_any());
        record.decode(&mut Reader::new(payload))?;

        if !record.is_present("negotiation")? {
            return Ok(Self { selected: SelectedProtocol::Rdp, flags: 0 });
        }
        let negotiation = record.composite("negotiation")?;
        let flags = negotiation.value("flags")? as u8;
        let value = negotiation.value("value")? as u32;
        match negotiation.value("type")? as u8 {
            NEG_RESPONSE => Ok(Self { selected: SelectedProtocol::from_wire(value)?, flags }),
            NEG_FAILURE => {
                Err(ProtoError::NegotiationFailure { code: FailureCode::from_wire(value) })
            },
            other => Err(ProtoError::Malformed(format!(
                "negotiation type {other:#04x} in a connection confirm"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn request_without_cookie_matches_wire_layout() {
        let request = ConnectionRequest::new(SecurityProtocols::SSL | SecurityProtocols::HYBRID);
        let wire = request.encode().unwrap();
        assert_eq!(
            &wire[..],
            hex!("0e e0 00 00 00 00 00 01 00 08 00 03 00 00 00")
        );
    }

    #[test]
    fn request_round_trips_with_cookie() {
        let request = ConnectionRequest::new(SecurityProtocols::SSL).with_cookie("mollweide");
        let wire = request.encode().unwrap();
        assert_eq!(wire[0] as usize, wire.len() - 1);
        assert!(wire[7..].starts_with(b"Cookie: mstshash=mollweide\r\n"));

        let decoded = ConnectionRequest::decode(&wire).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn request_without_negotiation_offers_standard_security() {
        let decoded = ConnectionRequest::decode(&hex!("06 e0 00 00 00 00 00")).unwrap();
        assert_eq!(decoded.protocols, SecurityProtocols::empty());
        assert_eq!(decoded.cookie_user, None);
    }

    #[test]
    fn cookie_user_must_be_printable() {
        let request = ConnectionRequest::new(SecurityProtocols::SSL).with_cookie("bad\r\nname");
        assert!(matches!(request.encode(), Err(ProtoError::Malformed(_))));
    }

    #[test]
    fn confirm_without_negotiation_selects_standard_security() {
        let confirm = ConnectionConfirm::decode(&hex!("06 d0 00 00 00 00 00")).unwrap();
        assert_eq!(confirm.selected, SelectedProtocol::Rdp);
    }

    #[test]
    fn confirm_response_round_trips() {
        let confirm = ConnectionConfirm { selected: SelectedProtocol::Hybrid, flags: 0 };
        let wire = confirm.encode().unwrap();
        assert_eq!(ConnectionConfirm::decode(&wire).unwrap(), confirm);
    }

    #[test]
    fn confirm_failure_surfaces_the_reason() {
        let wire = ConnectionConfirm::encode_failure(FailureCode::SslRequired).unwrap();
        assert_eq!(&wire[7..], hex!("03 00 08 00 01 00 00 00"));
        assert_eq!(
            ConnectionConfirm::decode(&wire).unwrap_err(),
            ProtoError::NegotiationFailure { code: FailureCode::SslRequired }
        );
    }

    #[test]
    fn confirm_selecting_hybrid_ex_is_unsupported() {
        let wire = hex!("0e d0 00 00 00 00 00 02 00 08 00 08 00 00 00");
        assert_eq!(
            ConnectionConfirm::decode(&wire).unwrap_err(),
            ProtoError::UnsupportedProtocol { protocol: 8 }
        );
    }

    #[test]
    fn unknown_failure_code_is_preserved() {
        assert_eq!(FailureCode::from_wire(0x2A), FailureCode::Other(0x2A));
        assert_eq!(FailureCode::from_wire(5), FailureCode::HybridRequired);
    }
}
