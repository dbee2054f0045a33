//! Capability set schemas and the catalog that dispatches them.
//!
//! Each capability travels in the shared envelope
//! `[typeTag:u16LE][length:u16LE][body]`. The bodies below follow the
//! protocol's documented defaults; session parameters (screen geometry,
//! color depth, keyboard layout) override the relevant fields at build
//! time. Unknown capability tags pass through opaquely so an advertised
//! set from a newer peer survives a round trip untouched.

use bytes::Bytes;
use farsight_wire::{
    Array, BytesField, Composite, CountSource, Field, UnknownTagPolicy, VariantBody,
    VariantRegistry,
};

use crate::constants::ConstantTable;
use crate::envelope;
use crate::errors::Result;
use crate::options::SessionOptions;

const NEGOTIATE_ORDER_SUPPORT: u16 = 0x0002;
const DESKTOP_SAVE_SIZE: u32 = 480 * 480;

/// General capability body: protocol version and compression mode.
#[must_use]
pub fn general() -> Composite {
    Composite::new("general_capability")
        .member("os_major_type", Field::u16_le(0))
        .member("os_minor_type", Field::u16_le(0))
        .member("protocol_version", Field::u16_le_const(0x0200))
        .member("pad2octets_a", Field::u16_le(0))
        .member("general_compression_types", Field::u16_le_const(0))
        .member("extra_flags", Field::u16_le(0))
        .member("update_capability_flag", Field::u16_le_const(0))
        .member("remote_unshare_flag", Field::u16_le_const(0))
        .member("general_compression_level", Field::u16_le_const(0))
        .member("refresh_rect_support", Field::u8(0))
        .member("suppress_output_support", Field::u8(0))
}

/// Bitmap capability body: color depth and desktop geometry.
#[must_use]
pub fn bitmap(options: &SessionOptions) -> Composite {
    Composite::new("bitmap_capability")
        .member("preferred_bits_per_pixel", Field::u16_le(options.color_depth))
        .member("receive_1bpp", Field::u16_le(0x0001))
        .member("receive_4bpp", Field::u16_le(0x0001))
        .member("receive_8bpp", Field::u16_le(0x0001))
        .member("desktop_width", Field::u16_le(options.width))
        .member("desktop_height", Field::u16_le(options.height))
        .member("pad2octets", Field::u16_le(0))
        .member("desktop_resize_flag", Field::u16_le(0))
        .member("bitmap_compression_flag", Field::u16_le_const(0x0001))
        .member("high_color_flags", Field::u8(0))
        .member("drawing_flags", Field::u8(0))
        .member("multiple_rectangle_support", Field::u16_le_const(0x0001))
        .member("pad2octets_b", Field::u16_le(0))
}

/// Drawing-order capability body. The 32-byte order support table stays
/// all zero: no drawing orders are negotiated.
#[must_use]
pub fn order() -> Composite {
    Composite::new("order_capability")
        .member("terminal_descriptor", BytesField::zeroed(16))
        .member("pad4octets_a", Field::u32_le(0))
        .member("desktop_save_x_granularity", Field::u16_le(1))
        .member("desktop_save_y_granularity", Field::u16_le(20))
        .member("pad2octets_a", Field::u16_le(0))
        .member("maximum_order_level", Field::u16_le(1))
        .member("number_fonts", Field::u16_le(0))
        .member("order_flags", Field::u16_le(NEGOTIATE_ORDER_SUPPORT))
        .member("order_support", BytesField::zeroed(32))
        .member("text_flags", Field::u16_le(0))
        .member("order_support_ex_flags", Field::u16_le(0))
        .member("pad4octets_b", Field::u32_le(0))
        .member("desktop_save_size", Field::u32_le(DESKTOP_SAVE_SIZE))
        .member("pad2octets_c", Field::u16_le(0))
        .member("pad2octets_d", Field::u16_le(0))
        .member("text_ansi_code_page", Field::u16_le(0))
        .member("pad2octets_e", Field::u16_le(0))
}

/// Bitmap cache capability body (revision 1), all caches disabled.
#[must_use]
pub fn bitmap_cache() -> Composite {
    let mut record = Composite::new("bitmap_cache_capability");
    for pad in ["pad1", "pad2", "pad3", "pad4", "pad5", "pad6"] {
        record = record.member(pad, Field::u32_le(0));
    }
    record
        .member("cache0_entries", Field::u16_le(0))
        .member("cache0_maximum_cell_size", Field::u16_le(0))
        .member("cache1_entries", Field::u16_le(0))
        .member("cache1_maximum_cell_size", Field::u16_le(0))
        .member("cache2_entries", Field::u16_le(0))
        .member("cache2_maximum_cell_size", Field::u16_le(0))
}

/// Pointer capability body. The trailing cache size word exists only in
/// the server's variant of the block.
#[must_use]
pub fn pointer(is_server: bool) -> Composite {
    let record = Composite::new("pointer_capability")
        .member("color_pointer_flag", Field::u16_le(0))
        .member("color_pointer_cache_size", Field::u16_le(20));
    if is_server {
        record.member("pointer_cache_size", Field::u16_le(0))
    } else {
        record
    }
}

/// Input capability body: keyboard parameters.
#[must_use]
pub fn input(options: &SessionOptions) -> Composite {
    Composite::new("input_capability")
        .member("input_flags", Field::u16_le(0))
        .member("pad2octets_a", Field::u16_le(0))
        .member("keyboard_layout", Field::u32_le(options.keyboard_layout))
        .member("keyboard_type", Field::u32_le(4))
        .member("keyboard_subtype", Field::u32_le(0))
        .member("keyboard_function_key", Field::u32_le(12))
        .member("ime_file_name", BytesField::zeroed(64))
}

/// Brush capability body.
#[must_use]
pub fn brush() -> Composite {
    Composite::new("brush_capability").member("brush_support_level", Field::u32_le(0))
}

fn cache_entry() -> Composite {
    Composite::new("cache_entry")
        .member("cache_entries", Field::u16_le(0))
        .member("cache_maximum_cell_size", Field::u16_le(0))
}

/// Glyph cache capability body: a fixed table of ten cache entries.
#[must_use]
pub fn glyph_cache() -> Composite {
    let mut record = Composite::new("glyph_cache_capability")
        .member("glyph_cache", Array::of(cache_entry(), CountSource::Fixed(10)))
        .member("frag_cache", Field::u32_le(0))
        .member("glyph_support_level", Field::u16_le(0))
        .member("pad2octets", Field::u16_le(0));
    if let Ok(array) = record.array_mut("glyph_cache") {
        for _ in 0..10 {
            array.push(cache_entry());
        }
    }
    record
}

/// Offscreen bitmap cache capability body.
#[must_use]
pub fn offscreen_cache() -> Composite {
    Composite::new("offscreen_cache_capability")
        .member("offscreen_support_level", Field::u32_le(0))
        .member("offscreen_cache_size", Field::u16_le(0))
        .member("offscreen_cache_entries", Field::u16_le(0))
}

/// Virtual channel capability body. The chunk size word is a later
/// addition and is absent in older peers.
#[must_use]
pub fn virtual_channel() -> Composite {
    Composite::new("virtual_channel_capability")
        .member("flags", Field::u32_le(0))
        .member_if_remaining("vc_chunk_size", Field::u32_le(0))
}

/// Sound capability body.
#[must_use]
pub fn sound() -> Composite {
    Composite::new("sound_capability")
        .member("sound_flags", Field::u16_le(0))
        .member("pad2octets_a", Field::u16_le(0))
}

/// Control capability body. The server ignores its contents.
#[must_use]
pub fn control() -> Composite {
    Composite::new("control_capability")
        .member("control_flags", Field::u16_le(0))
        .member("remote_detach_flag", Field::u16_le(0))
        .member("control_interest", Field::u16_le(0x0002))
        .member("detach_interest", Field::u16_le(0x0002))
}

/// Window activation capability body. The server ignores its contents.
#[must_use]
pub fn activation() -> Composite {
    Composite::new("activation_capability")
        .member("help_key_flag", Field::u16_le(0))
        .member("help_key_index_flag", Field::u16_le(0))
        .member("help_extended_key_flag", Field::u16_le(0))
        .member("window_manager_key_flag", Field::u16_le(0))
}

/// Font capability body.
#[must_use]
pub fn font() -> Composite {
    Composite::new("font_capability")
        .member("font_support_flags", Field::u16_le(0x0001))
        .member("pad2octets", Field::u16_le(0))
}

/// Color table cache capability body.
#[must_use]
pub fn color_cache() -> Composite {
    Composite::new("color_cache_capability")
        .member("color_table_cache_size", Field::u16_le(0x0006))
        .member("pad2octets", Field::u16_le(0))
}

/// Share capability body: the server's channel id.
#[must_use]
pub fn share() -> Composite {
    Composite::new("share_capability")
        .member("node_id", Field::u16_le(0))
        .member("pad2octets", Field::u16_le(0))
}

/// Multifragment update capability body: maximum fast-path buffer size.
#[must_use]
pub fn multifragment_update() -> Composite {
    Composite::new("multifragment_update_capability")
        .member("max_request_size", Field::u32_le(0))
}

/// Catalog of every capability schema, keyed by its wire tag.
///
/// The role decides which shape the pointer block takes when one is
/// decoded, since the client and server variants differ only in length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogRole {
    /// Decode blocks as a client emits them.
    Client,
    /// Decode blocks as a server emits them.
    Server,
}

/// Registry of all capability bodies under the opaque unknown-tag policy.
///
/// # Errors
///
/// [`ProtoError::MissingConstant`] if the table lacks a capability tag.
///
/// [`ProtoError::MissingConstant`]: crate::errors::ProtoError::MissingConstant
pub fn capability_registry(table: &ConstantTable, role: CatalogRole) -> Result<VariantRegistry> {
    let mut registry = VariantRegistry::new("capabilities", UnknownTagPolicy::Opaque);
    let defaults = SessionOptions::default();
    let for_server = role == CatalogRole::Server;

    registry.register(table.get("caps", "general")?, general);
    {
        let defaults = defaults.clone();
        registry.register(table.get("caps", "bitmap")?, move || bitmap(&defaults));
    }
    registry.register(table.get("caps", "order")?, order);
    registry.register(table.get("caps", "bitmap_cache")?, bitmap_cache);
    registry.register(table.get("caps", "pointer")?, move || pointer(for_server));
    {
        let defaults = defaults.clone();
        registry.register(table.get("caps", "input")?, move || input(&defaults));
    }
    registry.register(table.get("caps", "brush")?, brush);
    registry.register(table.get("caps", "glyph_cache")?, glyph_cache);
    registry.register(table.get("caps", "offscreen_cache")?, offscreen_cache);
    registry.register(table.get("caps", "virtual_channel")?, virtual_channel);
    registry.register(table.get("caps", "sound")?, sound);
    registry.register(table.get("caps", "control")?, control);
    registry.register(table.get("caps", "activation")?, activation);
    registry.register(table.get("caps", "font")?, font);
    registry.register(table.get("caps", "color_cache")?, color_cache);
    registry.register(table.get("caps", "share")?, share);
    registry.register(table.get("caps", "multifragment_update")?, multifragment_update);
    Ok(registry)
}

/// Serialize the capability set a client advertises during setup.
///
/// # Errors
///
/// [`ProtoError::MissingConstant`] for a missing tag and any encode error.
///
/// [`ProtoError::MissingConstant`]: crate::errors::ProtoError::MissingConstant
pub fn client_advertised(options: &SessionOptions, table: &ConstantTable) -> Result<Bytes> {
    envelope::seal_stream([
        (table.get("caps", "general")?, general()),
        (table.get("caps", "bitmap")?, bitmap(options)),
        (table.get("caps", "order")?, order()),
        (table.get("caps", "bitmap_cache")?, bitmap_cache()),
        (table.get("caps", "pointer")?, pointer(false)),
        (table.get("caps", "input")?, input(options)),
        (table.get("caps", "brush")?, brush()),
        (table.get("caps", "glyph_cache")?, glyph_cache()),
        (table.get("caps", "offscreen_cache")?, offscreen_cache()),
        (table.get("caps", "virtual_channel")?, virtual_channel()),
        (table.get("caps", "sound")?, sound()),
        (table.get("caps", "multifragment_update")?, multifragment_update()),
    ])
}

/// Decode a capability envelope stream into `(tag, body)` pairs.
///
/// # Errors
///
/// The [`envelope::decode_stream`] errors.
pub fn decode_capabilities(
    registry: &VariantRegistry,
    payload: &[u8],
) -> Result<Vec<(u64, VariantBody)>> {
    envelope::decode_stream(registry, payload)
}
