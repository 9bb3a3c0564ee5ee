//! Single-architecture image decoding.
//!
//! The image magic fixes word width and byte order for everything after it.
//! Decoding reads the header, slices exactly `sizeofcmds` bytes for the
//! record table, runs pass one over it and then pass two against the whole
//! image window.

use bitflags::bitflags;
use serde::Serialize;
use tracing::debug;

use super::cpu::{arch_name, cpu_type_description};
use super::magic;
use crate::codesign::{CodeDirectory, SuperBlob};
use crate::cursor::ByteCursor;
use crate::error::{DecodeError, Result};
use crate::records::deferred::{resolve_deferred, DeferredPayload, Stage2Record};
use crate::records::{decode_records, tags, DecodeContext, DecoderRegistry, FieldValue, RecordBody};
use crate::types::{ByteRange, DecodeOptions, Endianness, Introspect, Node, Width};

/// Mach-O file types.
pub mod file_type {
    pub const OBJECT: u32 = 0x1;
    pub const EXECUTE: u32 = 0x2;
    pub const FVMLIB: u32 = 0x3;
    pub const CORE: u32 = 0x4;
    pub const PRELOAD: u32 = 0x5;
    pub const DYLIB: u32 = 0x6;
    pub const DYLINKER: u32 = 0x7;
    pub const BUNDLE: u32 = 0x8;
    pub const DYLIB_STUB: u32 = 0x9;
    pub const DSYM: u32 = 0xA;
    pub const KEXT_BUNDLE: u32 = 0xB;
    pub const FILESET: u32 = 0xC;
}

/// Name of a Mach-O file type.
pub fn file_type_name(filetype: u32) -> &'static str {
    match filetype {
        file_type::OBJECT => "object",
        file_type::EXECUTE => "executable",
        file_type::FVMLIB => "fixed VM library",
        file_type::CORE => "core",
        file_type::PRELOAD => "preloaded executable",
        file_type::DYLIB => "dylib",
        file_type::DYLINKER => "dynamic linker",
        file_type::BUNDLE => "bundle",
        file_type::DYLIB_STUB => "dylib stub",
        file_type::DSYM => "dSYM companion",
        file_type::KEXT_BUNDLE => "kext bundle",
        file_type::FILESET => "fileset",
        _ => "unknown",
    }
}

bitflags! {
    /// Image header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct HeaderFlags: u32 {
        const NOUNDEFS = 0x1;
        const INCRLINK = 0x2;
        const DYLDLINK = 0x4;
        const BINDATLOAD = 0x8;
        const PREBOUND = 0x10;
        const SPLIT_SEGS = 0x20;
        const LAZY_INIT = 0x40;
        const TWOLEVEL = 0x80;
        const FORCE_FLAT = 0x100;
        const NOMULTIDEFS = 0x200;
        const NOFIXPREBINDING = 0x400;
        const PREBINDABLE = 0x800;
        const ALLMODSBOUND = 0x1000;
        const SUBSECTIONS_VIA_SYMBOLS = 0x2000;
        const CANONICAL = 0x4000;
        const WEAK_DEFINES = 0x8000;
        const BINDS_TO_WEAK = 0x10000;
        const ALLOW_STACK_EXECUTION = 0x20000;
        const ROOT_SAFE = 0x40000;
        const SETUID_SAFE = 0x80000;
        const NO_REEXPORTED_DYLIBS = 0x100000;
        const PIE = 0x200000;
        const DEAD_STRIPPABLE_DYLIB = 0x400000;
        const HAS_TLV_DESCRIPTORS = 0x800000;
        const NO_HEAP_EXECUTION = 0x1000000;
        const APP_EXTENSION_SAFE = 0x2000000;
        const NLIST_OUTOFSYNC_WITH_DYLDINFO = 0x4000000;
        const SIM_SUPPORT = 0x8000000;
        const DYLIB_IN_CACHE = 0x80000000;
    }
}

impl HeaderFlags {
    /// Names of the set flags, in bit order.
    pub fn names(&self) -> Vec<&'static str> {
        self.iter_names().map(|(name, _)| name).collect()
    }
}

/// Decoded `mach_header` / `mach_header_64`.
#[derive(Debug, Clone, Serialize)]
pub struct ImageHeader {
    pub magic: u32,
    pub cpu_type: u32,
    pub cpu_subtype: u32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: HeaderFlags,
    /// Only present in 64-bit headers
    pub reserved: Option<u32>,
    pub range: ByteRange,
}

/// A decoded single-architecture image.
#[derive(Debug, Clone, Serialize)]
pub struct Image {
    pub width: Width,
    pub endianness: Endianness,
    pub header: ImageHeader,
    pub records: Vec<Stage2Record>,
    /// Absolute range of the whole image in the file
    pub range: ByteRange,
}

/// Width and byte order selected by an image magic.
///
/// The magic is read big-endian, so a little-endian image shows up as the
/// byte-swapped ("cigam") constant.
pub fn image_layout(raw_magic: u32) -> Option<(Width, Endianness)> {
    match raw_magic {
        magic::MH_MAGIC => Some((Width::Bits32, Endianness::Big)),
        magic::MH_CIGAM => Some((Width::Bits32, Endianness::Little)),
        magic::MH_MAGIC_64 => Some((Width::Bits64, Endianness::Big)),
        magic::MH_CIGAM_64 => Some((Width::Bits64, Endianness::Little)),
        _ => None,
    }
}

/// Decode the image whose window is `image`.
pub fn decode_image(image: ByteCursor<'_>, options: &DecodeOptions, registry: &DecoderRegistry) -> Result<Image> {
    let raw_magic = image.peek_u32(Endianness::Big)?;
    let (width, endian) = image_layout(raw_magic).ok_or_else(|| DecodeError::BadMagic {
        offset: image.start(),
        expected: "Mach-O image".to_string(),
        actual: raw_magic,
    })?;

    let mut cursor = image;
    let header = decode_header(&mut cursor, width, endian)?;
    debug!(
        offset = image.start(),
        arch = %arch_name(header.cpu_type, header.cpu_subtype),
        %width,
        %endian,
        ncmds = header.ncmds,
        sizeofcmds = header.sizeofcmds,
        "image identified"
    );

    let mut table = cursor.slice(header.sizeofcmds as usize)?;
    let table_range = ByteRange {
        start: image.start(),
        end: table.end(),
    };

    let ctx = DecodeContext {
        width,
        endian,
        options,
        registry,
    };
    let records = decode_records(&mut table, header.ncmds, &ctx)?;
    debug!(count = records.len(), "record table decoded");
    let records = resolve_deferred(image, table_range, records, &ctx)?;

    Ok(Image {
        width,
        endianness: endian,
        header,
        records,
        range: image.range(),
    })
}

fn decode_header(cursor: &mut ByteCursor<'_>, width: Width, endian: Endianness) -> Result<ImageHeader> {
    let start = cursor.position();
    let magic = cursor.read_u32(Endianness::Big)?;
    let cpu_type = cursor.read_u32(endian)?;
    let cpu_subtype = cursor.read_u32(endian)?;
    let filetype = cursor.read_u32(endian)?;
    let ncmds = cursor.read_u32(endian)?;
    let sizeofcmds = cursor.read_u32(endian)?;
    let flags = HeaderFlags::from_bits_retain(cursor.read_u32(endian)?);
    let reserved = match width {
        Width::Bits64 => Some(cursor.read_u32(endian)?),
        Width::Bits32 => None,
    };
    Ok(ImageHeader {
        magic,
        cpu_type,
        cpu_subtype,
        filetype,
        ncmds,
        sizeofcmds,
        flags,
        reserved,
        range: cursor.range_from(start),
    })
}

impl Image {
    /// Toolchain name of the image architecture.
    pub fn arch(&self) -> String {
        arch_name(self.header.cpu_type, self.header.cpu_subtype)
    }

    /// Records with the given tag.
    pub fn records_with_tag(&self, tag: u32) -> impl Iterator<Item = &Stage2Record> {
        self.records.iter().filter(move |r| r.record.tag == tag)
    }

    /// The embedded code signature, if present and resolved.
    pub fn code_signature(&self) -> Option<&SuperBlob> {
        self.records_with_tag(tags::LC_CODE_SIGNATURE)
            .flat_map(|r| r.payloads.iter())
            .find_map(|p| match p {
                DeferredPayload::CodeSignature(sb) => Some(sb),
                _ => None,
            })
    }

    /// Shortcut to the primary code directory.
    pub fn code_directory(&self) -> Option<&CodeDirectory> {
        self.code_signature().and_then(SuperBlob::code_directory)
    }

    /// The image UUID as a hyphenated string.
    pub fn uuid(&self) -> Option<String> {
        self.records_with_tag(tags::LC_UUID).find_map(|r| match &r.record.body {
            RecordBody::Flat(flat) => match flat.field("uuid") {
                Some(uuid @ FieldValue::Uuid(_)) => Some(uuid.to_string()),
                _ => None,
            },
            _ => None,
        })
    }
}

#[cfg(feature = "digest")]
impl Image {
    /// Re-hash the code pages of this image. `file` is the whole decoded input.
    pub fn check_pages(&self, file: &[u8]) -> Option<Vec<crate::codesign::PageCheck>> {
        self.code_directory().map(|cd| cd.check_pages(file, self.range))
    }
}

impl Introspect for ImageHeader {
    fn to_node(&self) -> Node {
        let mut node = Node::new("header", self.range);
        node.push(Node::leaf("magic", format!("{:#010x}", self.magic), self.range));
        node.push(Node::leaf(
            "cpu_type",
            format!("{} ({:#x})", cpu_type_description(self.cpu_type), self.cpu_type),
            self.range,
        ));
        node.push(Node::leaf("cpu_subtype", format!("{:#x}", self.cpu_subtype), self.range));
        node.push(Node::leaf(
            "filetype",
            format!("{} ({:#x})", file_type_name(self.filetype), self.filetype),
            self.range,
        ));
        node.push(Node::leaf("ncmds", self.ncmds, self.range));
        node.push(Node::leaf("sizeofcmds", self.sizeofcmds, self.range));
        let flags = self.flags.names().join(" | ");
        node.push(Node::leaf(
            "flags",
            if flags.is_empty() { "none".to_string() } else { flags },
            self.range,
        ));
        node
    }
}

impl Introspect for Image {
    fn to_node(&self) -> Node {
        let mut node = Node::new("image", self.range).with_value(format!(
            "{} {} {}-endian",
            self.arch(),
            self.width,
            self.endianness
        ));
        node.push(self.header.to_node());
        for record in &self.records {
            node.push(record.to_node());
        }
        node
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::formats::cpu::cpu_type;
    use pretty_assertions::assert_eq;

    /// Little-endian 64-bit arm64 image with the given raw record bytes.
    pub(crate) fn build_image(ncmds: u32, records: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&magic::MH_MAGIC_64.to_le_bytes());
        data.extend_from_slice(&cpu_type::ARM64.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&file_type::EXECUTE.to_le_bytes());
        data.extend_from_slice(&ncmds.to_le_bytes());
        data.extend_from_slice(&(records.len() as u32).to_le_bytes());
        data.extend_from_slice(&(HeaderFlags::PIE | HeaderFlags::DYLDLINK).bits().to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(records);
        data
    }

    pub(crate) fn uuid_record() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&tags::LC_UUID.to_le_bytes());
        data.extend_from_slice(&24u32.to_le_bytes());
        data.extend_from_slice(&[0xAB; 16]);
        data
    }

    fn decode(data: &[u8]) -> Result<Image> {
        decode_image(ByteCursor::new(data), &DecodeOptions::new(), &DecoderRegistry::with_builtin())
    }

    #[test]
    fn test_layout_from_magic() {
        assert_eq!(
            image_layout(magic::MH_CIGAM_64),
            Some((Width::Bits64, Endianness::Little))
        );
        assert_eq!(image_layout(magic::MH_MAGIC), Some((Width::Bits32, Endianness::Big)));
        assert_eq!(image_layout(magic::FAT_MAGIC), None);
    }

    #[test]
    fn test_decode_single_record_image() {
        let data = build_image(1, &uuid_record());
        let image = decode(&data).unwrap();

        assert_eq!(image.width, Width::Bits64);
        assert_eq!(image.endianness, Endianness::Little);
        assert_eq!(image.header.ncmds, 1);
        assert_eq!(image.header.range, ByteRange::new(0, 32));
        assert_eq!(image.records.len(), image.header.ncmds as usize);
        assert_eq!(image.records[0].record.range, ByteRange::new(32, 24));
        assert_eq!(image.arch(), "arm64");
        assert!(image.header.flags.contains(HeaderFlags::PIE));
        assert!(image.code_signature().is_none());
        assert_eq!(image.uuid().as_deref(), Some("ABABABAB-ABAB-ABAB-ABAB-ABABABABABAB"));
    }

    #[test]
    fn test_big_endian_32_bit_header() {
        let mut data = Vec::new();
        for v in [magic::MH_MAGIC, cpu_type::POWERPC, 0, file_type::DYLIB, 0, 0, 0] {
            data.extend_from_slice(&v.to_be_bytes());
        }
        let image = decode(&data).unwrap();
        assert_eq!(image.width, Width::Bits32);
        assert_eq!(image.endianness, Endianness::Big);
        assert_eq!(image.header.reserved, None);
        assert_eq!(image.header.range.len(), 28);
        assert_eq!(image.arch(), "ppc");
        assert!(image.records.is_empty());
    }

    #[test]
    fn test_table_larger_than_image() {
        let mut data = build_image(1, &uuid_record());
        data[20..24].copy_from_slice(&4096u32.to_le_bytes());
        let err = decode(&data).unwrap_err();
        assert!(matches!(err, DecodeError::Bounds { offset: 32, requested: 4096, .. }));
    }

    #[test]
    fn test_wrong_magic() {
        let data = [0u8; 32];
        let err = decode(&data).unwrap_err();
        assert!(matches!(err, DecodeError::BadMagic { offset: 0, actual: 0, .. }));
    }

    #[test]
    fn test_header_flag_names() {
        let flags = HeaderFlags::NOUNDEFS | HeaderFlags::PIE;
        assert_eq!(flags.names(), vec!["NOUNDEFS", "PIE"]);
    }
}
