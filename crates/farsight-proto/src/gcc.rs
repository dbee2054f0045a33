//! Conference-control settings blocks and server certificates.
//!
//! Client and server exchange their session parameters as envelope-wrapped
//! settings blocks (core, security, network on each side). The server
//! security block optionally embeds a certificate whose concrete layout is
//! selected by a version tag, decoded through a dedicated
//! [`VariantRegistry`].

use bytes::Bytes;
use farsight_wire::{
    Array, BytesField, Composite, CountSource, Field, Reader, Scope, UnknownTagPolicy,
    VariantBody, VariantRegistry,
};

use crate::constants::ConstantTable;
use crate::envelope;
use crate::errors::Result;
use crate::options::SessionOptions;

/// Protocol version advertised in core settings blocks.
pub const RDP_VERSION_5_PLUS: u32 = 0x0008_0004;
/// MCS channel the server always exposes.
pub const MCS_GLOBAL_CHANNEL: u16 = 1003;

const RNS_UD_COLOR_8BPP: u16 = 0xCA01;
const RNS_UD_SAS_DEL: u16 = 0xAA03;
const HIGH_COLOR_24BPP: u16 = 0x0018;
/// 15, 16, 24 and 32 bpp support bits combined.
const SUPPORTED_COLOR_DEPTHS: u16 = 0x000F;
const SUPPORT_ERRINFO_PDU: u16 = 0x0001;
const KEYBOARD_IBM_101_102_KEYS: u32 = 4;
/// 40-bit, 56-bit and 128-bit encryption method bits combined.
const ENCRYPTION_METHODS_ALL: u32 = 0x0000_000B;
/// `RSA1` in little-endian byte order.
const RSA_MAGIC: u32 = 0x3141_5352;

/// Zero-padded fixed-width UTF-16LE string, truncated to fit.
fn fixed_utf16(text: &str, width: usize) -> Bytes {
    let mut out = vec![0u8; width];
    let mut at = 0;
    for unit in text.encode_utf16() {
        // Leave room for the trailing NUL pair.
        if at + 2 > width.saturating_sub(2) {
            break;
        }
        out[at..at + 2].copy_from_slice(&unit.to_le_bytes());
        at += 2;
    }
    Bytes::from(out)
}

/// Zero-padded fixed-width ASCII string, truncated to fit.
fn fixed_ascii(text: &str, width: usize) -> Bytes {
    let mut out = vec![0u8; width];
    for (slot, b) in out.iter_mut().zip(text.bytes()) {
        *slot = b;
    }
    Bytes::from(out)
}

/// Client core settings block body.
///
/// The tail starting at the IME file name is optional on the wire; older
/// peers simply stop early, so every trailing member decodes only while
/// bytes remain.
#[must_use]
pub fn client_core_data(options: &SessionOptions) -> Composite {
    Composite::new("client_core_data")
        .member("rdp_version", Field::u32_le(RDP_VERSION_5_PLUS))
        .member("desktop_width", Field::u16_le(options.width))
        .member("desktop_height", Field::u16_le(options.height))
        .member("color_depth", Field::u16_le(RNS_UD_COLOR_8BPP))
        .member("sas_sequence", Field::u16_le(RNS_UD_SAS_DEL))
        .member("keyboard_layout", Field::u32_le(options.keyboard_layout))
        .member("client_build", Field::u32_le(3790))
        .member("client_name", BytesField::fixed(fixed_utf16(&options.client_name, 32)))
        .member("keyboard_type", Field::u32_le(KEYBOARD_IBM_101_102_KEYS))
        .member("keyboard_subtype", Field::u32_le(0))
        .member("keyboard_fn_keys", Field::u32_le(12))
        .member_if_remaining("ime_file_name", BytesField::zeroed(64))
        .member_if_remaining("post_beta2_color_depth", Field::u16_le(RNS_UD_COLOR_8BPP))
        .member_if_remaining("client_product_id", Field::u16_le(1))
        .member_if_remaining("serial_number", Field::u32_le(0))
        .member_if_remaining("high_color_depth", Field::u16_le(HIGH_COLOR_24BPP))
        .member_if_remaining("supported_color_depths", Field::u16_le(SUPPORTED_COLOR_DEPTHS))
        .member_if_remaining("early_capability_flags", Field::u16_le(SUPPORT_ERRINFO_PDU))
        .member_if_remaining("client_dig_product_id", BytesField::zeroed(64))
        .member_if_remaining("connection_type", Field::u8(0))
        .member_if_remaining("pad1_octet", Field::u8(0))
        .member_if_remaining("server_selected_protocol", Field::u32_le(0))
}

/// Client security settings block body.
#[must_use]
pub fn client_security_data() -> Composite {
    Composite::new("client_security_data")
        .member("encryption_methods", Field::u32_le(ENCRYPTION_METHODS_ALL))
        .member("ext_encryption_methods", Field::u32_le(0))
}

/// One static virtual channel definition.
#[must_use]
pub fn channel_def(name: &str, channel_options: u32) -> Composite {
    Composite::new("channel_def")
        .member("name", BytesField::fixed(fixed_ascii(name, 8)))
        .member("options", Field::u32_le(channel_options))
}

/// Client network settings block body listing the requested channels.
#[must_use]
pub fn client_network_data(channels: &[String]) -> Composite {
    let mut record = Composite::new("client_network_data")
        .member("channel_count", Field::u32_le(0))
        .member(
            "channels",
            Array::of(channel_def("", 0), CountSource::Sibling("channel_count")),
        );
    if let Ok(array) = record.array_mut("channels") {
        for name in channels {
            array.push(channel_def(name, 0));
        }
    }
    record
}

/// Server core settings block body.
#[must_use]
pub fn server_core_data() -> Composite {
    Composite::new("server_core_data")
        .member("rdp_version", Field::u32_le(RDP_VERSION_5_PLUS))
        .member_if_remaining("client_requested_protocol", Field::u32_le(0))
        .member_if_remaining("early_capability_flags", Field::u32_le(0))
}

fn channel_id() -> Composite {
    Composite::new("channel_id").member("id", Field::u16_le(0))
}

/// Server network settings block body granting the listed channel ids.
///
/// A single pad short aligns the block to a 4-byte boundary when the
/// channel count is odd.
#[must_use]
pub fn server_network_data(channel_ids: &[u16]) -> Composite {
    let mut record = Composite::new("server_network_data")
        .member("mcs_channel_id", Field::u16_le(MCS_GLOBAL_CHANNEL))
        .member("channel_count", Field::u16_le(0))
        .member(
            "channel_ids",
            Array::of(channel_id(), CountSource::Sibling("channel_count")),
        )
        .member_when("pad", Field::u16_le(0), |s: &Scope<'_>| {
            s.value("channel_count").is_some_and(|count| count % 2 == 1)
        });
    if let Ok(array) = record.array_mut("channel_ids") {
        for id in channel_ids {
            let mut element = channel_id();
            let _ = element.set_value("id", u64::from(*id));
            array.push(element);
        }
    }
    record
}

fn security_section_present(s: &Scope<'_>) -> bool {
    s.value("encryption_method") != Some(0) || s.value("encryption_level") != Some(0)
}

/// Server security settings block body.
///
/// When both the encryption method and level are zero the block ends after
/// those two words; otherwise a server random and a certificate follow.
/// The certificate is kept as raw bytes here and interpreted separately
/// through [`certificate_registry`].
#[must_use]
pub fn server_security_data() -> Composite {
    Composite::new("server_security_data")
        .member("encryption_method", Field::u32_le(0))
        .member("encryption_level", Field::u32_le(0))
        .member_when(
            "server_random_len",
            Field::u32_le_const(0x20),
            security_section_present,
        )
        .member_when("server_cert_len", Field::u32_le(0), security_section_present)
        .member_when(
            "server_random",
            BytesField::length_from("server_random_len", Bytes::from(vec![0u8; 0x20])),
            security_section_present,
        )
        .member_when(
            "server_certificate",
            BytesField::length_from("server_cert_len", Bytes::new()),
            security_section_present,
        )
}

/// Microsoft proprietary certificate body (version 1).
#[must_use]
pub fn proprietary_certificate() -> Composite {
    Composite::new("proprietary_certificate")
        .member("sig_alg_id", Field::u32_le_const(1))
        .member("key_alg_id", Field::u32_le_const(1))
        .member("public_key_blob_type", Field::u16_le_const(0x0006))
        .member(
            "public_key_blob_len",
            Field::computed_u16_le(|s: &Scope<'_>| {
                s.size_of("public_key_blob").map(|n| n as u64)
            }),
        )
        .member("public_key_blob", rsa_public_key())
        .member("signature_blob_type", Field::u16_le_const(0x0008))
        .member(
            "signature_blob_len",
            Field::computed_u16_le(|s: &Scope<'_>| {
                s.len_of("signature_blob").map(|n| n as u64 + 8)
            }),
        )
        .member(
            "signature_blob",
            BytesField::computed_len(
                |s: &Scope<'_>| {
                    s.value("signature_blob_len").and_then(|l| (l as usize).checked_sub(8))
                },
                Bytes::new(),
            ),
        )
        .member("padding", BytesField::zeroed(8))
}

/// RSA public key blob inside a proprietary certificate.
///
/// The three length words are all arithmetic over the modulus length, so
/// they are derived rather than settable.
#[must_use]
pub fn rsa_public_key() -> Composite {
    Composite::new("rsa_public_key")
        .member("magic", Field::u32_le_const(RSA_MAGIC))
        .member(
            "keylen",
            Field::computed_u32_le(|s: &Scope<'_>| s.len_of("modulus").map(|m| m as u64 + 8)),
        )
        .member(
            "bitlen",
            Field::computed_u32_le(|s: &Scope<'_>| s.len_of("modulus").map(|m| m as u64 * 8)),
        )
        .member(
            "datalen",
            Field::computed_u32_le(|s: &Scope<'_>| {
                s.len_of("modulus").and_then(|m| m.checked_sub(1)).map(|m| m as u64)
            }),
        )
        .member("pub_exp", Field::u32_le(0))
        .member(
            "modulus",
            BytesField::computed_len(
                |s: &Scope<'_>| s.value("keylen").and_then(|k| (k as usize).checked_sub(8)),
                Bytes::new(),
            ),
        )
        .member("padding", BytesField::zeroed(8))
}

fn cert_blob() -> Composite {
    Composite::new("cert_blob")
        .member("cb_cert", Field::u32_le(0))
        .member("ab_cert", BytesField::length_from("cb_cert", Bytes::new()))
}

/// X.509 certificate chain body (version 2).
#[must_use]
pub fn x509_certificate_chain() -> Composite {
    Composite::new("x509_certificate_chain")
        .member("num_cert_blobs", Field::u32_le(0))
        .member(
            "cert_blobs",
            Array::of(cert_blob(), CountSource::Sibling("num_cert_blobs")),
        )
        .member(
            "padding",
            BytesField::computed_len(
                |s: &Scope<'_>| s.value("num_cert_blobs").map(|n| 8 + 4 * n as usize),
                Bytes::new(),
            ),
        )
}

/// X.509 chain populated with DER blobs and correctly sized padding.
///
/// # Errors
///
/// [`ProtoError::Wire`] if a blob cannot be stored.
pub fn build_x509_chain(blobs: &[Bytes]) -> Result<Composite> {
    let mut record = x509_certificate_chain();
    {
        let array = record.array_mut("cert_blobs")?;
        for der in blobs {
            let mut blob = cert_blob();
            blob.set_bytes("ab_cert", der.clone())?;
            array.push(blob);
        }
    }
    record.set_bytes("padding", vec![0u8; 8 + 4 * blobs.len()])?;
    Ok(record)
}

/// Certificate registry keyed by the certificate version tag.
///
/// Unknown versions fail: a certificate this stack cannot interpret is
/// unusable, unlike an unknown capability set.
///
/// # Errors
///
/// [`ProtoError::MissingConstant`] if the table lacks a certificate tag.
pub fn certificate_registry(table: &ConstantTable) -> Result<VariantRegistry> {
    let mut registry = VariantRegistry::new("server_certificate", UnknownTagPolicy::Fail);
    registry.register(table.get("cert", "proprietary")?, proprietary_certificate);
    registry.register(table.get("cert", "x509")?, x509_certificate_chain);
    Ok(registry)
}

/// Parse a raw certificate: a 4-byte version word followed by the
/// version-selected body. The top version bit is a licensing marker and is
/// masked off before dispatch.
///
/// # Errors
///
/// [`farsight_wire::WireError::UnknownVariant`] (wrapped) for a version
/// with no registered layout, plus any body decode error.
pub fn decode_certificate(
    registry: &VariantRegistry,
    payload: &[u8],
) -> Result<(u32, VariantBody)> {
    let mut r = Reader::new(payload);
    let mut head = Composite::new("certificate_head").member("dw_version", Field::u32_le(0));
    head.decode(&mut r)?;
    let version = head.value("dw_version")? as u32;
    let body = registry.decode_body(u64::from(version & 0x7FFF_FFFF), r.remaining(), &mut r)?;
    Ok((version, body))
}

/// Serialize a certificate body under its version word.
///
/// # Errors
///
/// [`ProtoError::Wire`] if the body fails to encode.
pub fn encode_certificate(version: u32, body: Composite) -> Result<Bytes> {
    let mut record = Composite::new("server_certificate")
        .member("dw_version", Field::u32_le(version))
        .member("body", body);
    Ok(record.encode_to_bytes()?)
}

/// Registry of client-side settings blocks. Unknown block types pass
/// through opaquely for forward compatibility.
///
/// # Errors
///
/// [`ProtoError::MissingConstant`] if the table lacks a block tag.
pub fn client_settings_registry(table: &ConstantTable) -> Result<VariantRegistry> {
    let mut registry = VariantRegistry::new("client_settings", UnknownTagPolicy::Opaque);
    registry.register(table.get("settings", "cs_core")?, || {
        client_core_data(&SessionOptions::default())
    });
    registry.register(table.get("settings", "cs_security")?, client_security_data);
    registry.register(table.get("settings", "cs_net")?, || client_network_data(&[]));
    Ok(registry)
}

/// Registry of server-side settings blocks.
///
/// # Errors
///
/// [`ProtoError::MissingConstant`] if the table lacks a block tag.
pub fn server_settings_registry(table: &ConstantTable) -> Result<VariantRegistry> {
    let mut registry = VariantRegistry::new("server_settings", UnknownTagPolicy::Opaque);
    registry.register(table.get("settings", "sc_core")?, server_core_data);
    registry.register(table.get("settings", "sc_security")?, server_security_data);
    registry.register(table.get("settings", "sc_net")?, || server_network_data(&[]));
    Ok(registry)
}

/// Serialize the client's three settings blocks as one envelope stream.
///
/// # Errors
///
/// [`ProtoError::MissingConstant`] for a missing tag and any encode error.
pub fn client_settings(options: &SessionOptions, table: &ConstantTable) -> Result<Bytes> {
    envelope::seal_stream([
        (table.get("settings", "cs_core")?, client_core_data(options)),
        (table.get("settings", "cs_security")?, client_security_data()),
        (table.get("settings", "cs_net")?, client_network_data(&options.channels)),
    ])
}

/// Serialize the server's three settings blocks as one envelope stream.
///
/// # Errors
///
/// [`ProtoError::MissingConstant`] for a missing tag and any encode error.
pub fn server_settings(channel_ids: &[u16], table: &ConstantTable) -> Result<Bytes> {
    envelope::seal_stream([
        (table.get("settings", "sc_core")?, server_core_data()),
        (table.get("settings", "sc_security")?, server_security_data()),
        (table.get("settings", "sc_net")?, server_network_data(channel_ids)),
    ])
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn client_core_data_reflects_options() {
        let options = SessionOptions { width: 1920, height: 1080, ..SessionOptions::default() };
        let mut record = client_core_data(&options);
        let wire = record.encode_to_bytes().unwrap();
        assert_eq!(&wire[..4], hex!("04 00 08 00"));
        assert_eq!(&wire[4..8], hex!("80 07 38 04"));
        // UTF-16LE client name starts after the fixed 20-byte prefix.
        assert_eq!(&wire[20..24], &[b'f', 0, b'a', 0]);
    }

    #[test]
    fn client_core_data_decodes_short_legacy_block() {
        // Only the mandatory prefix: 11 members, 64 bytes.
        let mut full = client_core_data(&SessionOptions::default());
        let wire = full.encode_to_bytes().unwrap();
        let mut record = client_core_data(&SessionOptions::default());
        record.decode(&mut Reader::new(&wire[..64])).unwrap();
        assert!(!record.is_present("ime_file_name").unwrap());
        assert_eq!(record.value("keyboard_fn_keys").unwrap(), 12);
    }

    #[test]
    fn network_data_counts_its_channels() {
        let channels = vec!["cliprdr".to_string(), "rdpsnd".to_string()];
        let mut record = client_network_data(&channels);
        let wire = record.encode_to_bytes().unwrap();
        assert_eq!(&wire[..4], hex!("02 00 00 00"));
        assert_eq!(&wire[4..11], b"cliprdr");
        assert_eq!(wire.len(), 4 + 2 * 12);

        let mut decoded = client_network_data(&[]);
        decoded.decode(&mut Reader::new(&wire)).unwrap();
        let names: Vec<_> = decoded
            .array("channels")
            .unwrap()
            .elements()
            .iter()
            .map(|c| c.bytes_value("name").unwrap().clone())
            .collect();
        assert_eq!(&names[1][..6], b"rdpsnd");
    }

    #[test]
    fn server_network_data_pads_odd_channel_counts() {
        let mut odd = server_network_data(&[1004]);
        assert_eq!(odd.encode_to_bytes().unwrap().len(), 2 + 2 + 2 + 2);
        let mut even = server_network_data(&[1004, 1005]);
        assert_eq!(even.encode_to_bytes().unwrap().len(), 2 + 2 + 4);
    }

    #[test]
    fn unencrypted_security_block_is_two_words() {
        let mut record = server_security_data();
        assert_eq!(&record.encode_to_bytes().unwrap()[..], hex!("00 00 00 00 00 00 00 00"));
    }

    #[test]
    fn encrypted_security_block_carries_random_and_certificate() {
        let mut record = server_security_data();
        record.set_value("encryption_method", 0x02).unwrap();
        record.set_value("encryption_level", 0x01).unwrap();
        record.set_bytes("server_certificate", &b"certbytes"[..]).unwrap();
        let wire = record.encode_to_bytes().unwrap();
        // method + level + two lengths + 32-byte random + certificate
        assert_eq!(wire.len(), 4 + 4 + 4 + 4 + 32 + 9);
        assert_eq!(&wire[12..16], hex!("09 00 00 00"));

        let mut decoded = server_security_data();
        decoded.decode(&mut Reader::new(&wire)).unwrap();
        assert_eq!(&decoded.bytes_value("server_certificate").unwrap()[..], b"certbytes");
    }

    #[test]
    fn proprietary_certificate_round_trips() {
        let table = ConstantTable::builtin();
        let registry = certificate_registry(&table).unwrap();

        let mut cert = proprietary_certificate();
        {
            let blob = cert.composite_mut("public_key_blob").unwrap();
            blob.set_value("pub_exp", 0x10001).unwrap();
            blob.set_bytes("modulus", vec![0xAB; 64]).unwrap();
        }
        cert.set_bytes("signature_blob", vec![0xCD; 64]).unwrap();
        let wire = encode_certificate(1, cert).unwrap();

        let (version, body) = decode_certificate(&registry, &wire).unwrap();
        assert_eq!(version, 1);
        let record = match body {
            VariantBody::Known(record) => record,
            VariantBody::Opaque(_) => panic!("registered version decoded as opaque"),
        };
        let blob = record.composite("public_key_blob").unwrap();
        assert_eq!(blob.value("keylen").unwrap(), 72);
        assert_eq!(blob.value("bitlen").unwrap(), 512);
        assert_eq!(blob.value("datalen").unwrap(), 63);
        assert_eq!(blob.bytes_value("modulus").unwrap().len(), 64);
    }

    #[test]
    fn x509_chain_round_trips() {
        let table = ConstantTable::builtin();
        let registry = certificate_registry(&table).unwrap();

        let blobs = vec![Bytes::from_static(b"first"), Bytes::from_static(b"second der")];
        let chain = build_x509_chain(&blobs).unwrap();
        let wire = encode_certificate(2, chain).unwrap();

        let (version, body) = decode_certificate(&registry, &wire).unwrap();
        assert_eq!(version, 2);
        let record = match body {
            VariantBody::Known(record) => record,
            VariantBody::Opaque(_) => panic!("registered version decoded as opaque"),
        };
        assert_eq!(record.value("num_cert_blobs").unwrap(), 2);
        let decoded_blobs = record.array("cert_blobs").unwrap();
        assert_eq!(&decoded_blobs.elements()[1].bytes_value("ab_cert").unwrap()[..], b"second der");
        assert_eq!(record.bytes_value("padding").unwrap().len(), 16);
    }

    #[test]
    fn unknown_certificate_version_fails() {
        let table = ConstantTable::builtin();
        let registry = certificate_registry(&table).unwrap();
        let wire = hex!("05 00 00 00 aa bb");
        assert!(matches!(
            decode_certificate(&registry, &wire),
            Err(crate::errors::ProtoError::Wire(farsight_wire::WireError::UnknownVariant {
                tag: 5
            }))
        ));
    }

    #[test]
    fn settings_streams_round_trip() {
        let table = ConstantTable::builtin();
        let options = SessionOptions {
            channels: vec!["cliprdr".to_string()],
            ..SessionOptions::default()
        };
        let wire = client_settings(&options, &table).unwrap();
        let registry = client_settings_registry(&table).unwrap();
        let blocks = envelope::decode_stream(&registry, &wire).unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].0, 0xC001);
        match &blocks[2].1 {
            VariantBody::Known(net) => {
                assert_eq!(net.value("channel_count").unwrap(), 1);
            },
            VariantBody::Opaque(_) => panic!("registered block decoded as opaque"),
        }
    }
}
