//! Fat (multi-architecture) container decoding.
//!
//! The fat header and its entry table are always big-endian on disk; the
//! byte-swapped magics exist for tools that wrote them in host order. Each
//! entry is decoded on its own. A member that is not an image, or an image
//! that fails to decode, is recorded as [`FatMember::Skipped`] and the other
//! members are still decoded.

use serde::Serialize;
use tracing::{debug, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::cpu::arch_name;
use super::image::{decode_image, image_layout, Image};
use super::magic;
use crate::cursor::ByteCursor;
use crate::error::{check_limit, DecodeError, Result};
use crate::records::DecoderRegistry;
use crate::types::{ByteRange, DecodeOptions, Endianness, Introspect, Node};

const FAT_HEADER_SIZE: usize = 8;
const FAT_ARCH_SIZE: usize = 20;
const FAT_ARCH_64_SIZE: usize = 32;

/// A decoded fat container.
#[derive(Debug, Clone, Serialize)]
pub struct FatArchive {
    pub magic: u32,
    /// Byte order of the header fields
    pub endianness: Endianness,
    /// Whether entries use the 64-bit `fat_arch_64` layout
    pub wide: bool,
    pub entries: Vec<FatEntry>,
    pub range: ByteRange,
}

/// One `fat_arch` entry and its member.
#[derive(Debug, Clone, Serialize)]
pub struct FatEntry {
    pub index: usize,
    pub cpu_type: u32,
    pub cpu_subtype: u32,
    pub offset: u64,
    pub size: u64,
    /// Alignment as a power of two
    pub align: u32,
    /// Where the entry itself sits in the header table
    pub range: ByteRange,
    pub member: FatMember,
}

/// What a fat entry points at.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FatMember {
    Image { image: Box<Image> },
    Skipped { kind: MemberKind, reason: String },
}

/// Classification of a member that was not decoded as an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    /// Carries an image magic but failed to decode
    Image,
    StaticArchive,
    /// Offset and size fall outside the file
    OutOfBounds,
    Unknown,
}

impl MemberKind {
    pub fn name(self) -> &'static str {
        match self {
            MemberKind::Image => "image",
            MemberKind::StaticArchive => "static archive",
            MemberKind::OutOfBounds => "out of bounds",
            MemberKind::Unknown => "unknown",
        }
    }
}

impl FatEntry {
    pub fn arch(&self) -> String {
        arch_name(self.cpu_type, self.cpu_subtype)
    }

    pub fn image(&self) -> Option<&Image> {
        match &self.member {
            FatMember::Image { image } => Some(image),
            FatMember::Skipped { .. } => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.member, FatMember::Skipped { .. })
    }
}

impl FatArchive {
    /// Successfully decoded member images, in entry order.
    pub fn images(&self) -> impl Iterator<Item = &Image> {
        self.entries.iter().filter_map(FatEntry::image)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &FatEntry> {
        self.entries.iter().filter(|e| e.is_skipped())
    }

    /// The first member image for the given toolchain architecture name.
    pub fn select(&self, arch: &str) -> Option<&Image> {
        self.entries
            .iter()
            .filter(|e| e.arch() == arch)
            .find_map(FatEntry::image)
    }
}

/// Header layout selected by a fat magic: `(endianness, wide)`.
pub fn fat_layout(raw_magic: u32) -> Option<(Endianness, bool)> {
    match raw_magic {
        magic::FAT_MAGIC => Some((Endianness::Big, false)),
        magic::FAT_CIGAM => Some((Endianness::Little, false)),
        magic::FAT_MAGIC_64 => Some((Endianness::Big, true)),
        magic::FAT_CIGAM_64 => Some((Endianness::Little, true)),
        _ => None,
    }
}

struct RawEntry {
    index: usize,
    cpu_type: u32,
    cpu_subtype: u32,
    offset: u64,
    size: u64,
    align: u32,
    range: ByteRange,
}

/// Decode a fat container covering the whole of `file`.
pub fn decode_fat(file: ByteCursor<'_>, options: &DecodeOptions, registry: &DecoderRegistry) -> Result<FatArchive> {
    let mut cursor = file;
    let mut header = cursor.slice(FAT_HEADER_SIZE)?;
    let raw_magic = header.read_u32(Endianness::Big)?;
    let (endian, wide) = fat_layout(raw_magic).ok_or_else(|| DecodeError::BadMagic {
        offset: file.start(),
        expected: "fat container".to_string(),
        actual: raw_magic,
    })?;
    let count = header.read_u32(endian)?;
    check_limit("fat entries", u64::from(count), options.max_fat_arches)?;
    debug!(count, wide, %endian, "fat container identified");

    let mut raw = Vec::with_capacity(count as usize);
    for index in 0..count as usize {
        let mut e = cursor.slice(if wide { FAT_ARCH_64_SIZE } else { FAT_ARCH_SIZE })?;
        let cpu_type = e.read_u32(endian)?;
        let cpu_subtype = e.read_u32(endian)?;
        let (offset, size) = if wide {
            (e.read_u64(endian)?, e.read_u64(endian)?)
        } else {
            (u64::from(e.read_u32(endian)?), u64::from(e.read_u32(endian)?))
        };
        let align = e.read_u32(endian)?;
        raw.push(RawEntry {
            index,
            cpu_type,
            cpu_subtype,
            offset,
            size,
            align,
            range: e.range(),
        });
    }
    let header_end = cursor.position();

    #[cfg(feature = "parallel")]
    let entries = raw
        .into_par_iter()
        .map(|r| decode_entry(file, header_end, r, options, registry))
        .collect();
    #[cfg(not(feature = "parallel"))]
    let entries = raw
        .into_iter()
        .map(|r| decode_entry(file, header_end, r, options, registry))
        .collect();

    Ok(FatArchive {
        magic: raw_magic,
        endianness: endian,
        wide,
        entries,
        range: ByteRange {
            start: file.start(),
            end: header_end,
        },
    })
}

fn decode_entry(
    file: ByteCursor<'_>,
    header_end: usize,
    raw: RawEntry,
    options: &DecodeOptions,
    registry: &DecoderRegistry,
) -> FatEntry {
    let member = match decode_member(file, header_end, &raw, options, registry) {
        Ok(image) => FatMember::Image { image: Box::new(image) },
        Err((kind, reason)) => {
            warn!(
                index = raw.index,
                arch = %arch_name(raw.cpu_type, raw.cpu_subtype),
                offset = raw.offset,
                kind = kind.name(),
                %reason,
                "skipping fat member"
            );
            FatMember::Skipped { kind, reason }
        }
    };
    FatEntry {
        index: raw.index,
        cpu_type: raw.cpu_type,
        cpu_subtype: raw.cpu_subtype,
        offset: raw.offset,
        size: raw.size,
        align: raw.align,
        range: raw.range,
        member,
    }
}

fn decode_member(
    file: ByteCursor<'_>,
    header_end: usize,
    raw: &RawEntry,
    options: &DecodeOptions,
    registry: &DecoderRegistry,
) -> std::result::Result<Image, (MemberKind, String)> {
    let out_of_bounds = || {
        (
            MemberKind::OutOfBounds,
            format!(
                "member {:#x}+{:#x} lies outside the {:#x}-byte file",
                raw.offset,
                raw.size,
                file.len()
            ),
        )
    };
    let offset = usize::try_from(raw.offset).map_err(|_| out_of_bounds())?;
    let size = usize::try_from(raw.size).map_err(|_| out_of_bounds())?;
    let view = file.view(offset, size).map_err(|_| out_of_bounds())?;
    if view.range().overlaps(&ByteRange::new(file.start(), header_end - file.start())) {
        return Err((MemberKind::OutOfBounds, "member overlaps the fat header".to_string()));
    }

    let prefix = view.window();
    if prefix.starts_with(&magic::AR_MAGIC) {
        return Err((MemberKind::StaticArchive, "static archive member".to_string()));
    }
    match view.peek_u32(Endianness::Big) {
        Ok(m) if image_layout(m).is_some() => {
            decode_image(view, options, registry).map_err(|err| (MemberKind::Image, err.to_string()))
        }
        Ok(m) => Err((MemberKind::Unknown, format!("no image magic (found {m:#010x})"))),
        Err(_) => Err((MemberKind::Unknown, "member too short for a magic".to_string())),
    }
}

impl Introspect for FatArchive {
    fn to_node(&self) -> Node {
        let mut node = Node::new("fat", self.range).with_value(format!(
            "{} entr{}{}",
            self.entries.len(),
            if self.entries.len() == 1 { "y" } else { "ies" },
            if self.wide { " (64-bit)" } else { "" }
        ));
        for entry in &self.entries {
            let mut child = Node::new(format!("arch[{}]", entry.index), entry.range).with_value(entry.arch());
            child.push(Node::leaf("offset", format!("{:#x}", entry.offset), entry.range));
            child.push(Node::leaf("size", format!("{:#x}", entry.size), entry.range));
            child.push(Node::leaf("align", format!("2^{}", entry.align), entry.range));
            match &entry.member {
                FatMember::Image { image } => child.push(image.to_node()),
                FatMember::Skipped { kind, reason } => child.push(Node::leaf(
                    "skipped",
                    format!("{}: {reason}", kind.name()),
                    entry.range,
                )),
            }
            node.push(child);
        }
        node
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::formats::cpu::cpu_type;
    use crate::formats::image::tests::{build_image, uuid_record};
    use pretty_assertions::assert_eq;

    /// Big-endian fat container with one 20-byte entry per member, members
    /// placed back to back after the table.
    pub(crate) fn build_fat(members: &[(u32, Vec<u8>)]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&magic::FAT_MAGIC.to_be_bytes());
        data.extend_from_slice(&(members.len() as u32).to_be_bytes());
        let mut offset = FAT_HEADER_SIZE + members.len() * FAT_ARCH_SIZE;
        for (cpu, body) in members {
            for v in [*cpu, 0, offset as u32, body.len() as u32, 0] {
                data.extend_from_slice(&v.to_be_bytes());
            }
            offset += body.len();
        }
        for (_, body) in members {
            data.extend_from_slice(body);
        }
        data
    }

    fn decode(data: &[u8]) -> Result<FatArchive> {
        decode_fat(ByteCursor::new(data), &DecodeOptions::new(), &DecoderRegistry::with_builtin())
    }

    #[test]
    fn test_image_and_foreign_member() {
        let image = build_image(1, &uuid_record());
        let data = build_fat(&[(cpu_type::ARM64, image), (cpu_type::X86_64, vec![0x5A; 64])]);
        let fat = decode(&data).unwrap();

        assert_eq!(fat.entries.len(), 2);
        assert_eq!(fat.images().count(), 1);
        assert_eq!(fat.skipped().count(), 1);
        assert!(matches!(
            fat.entries[1].member,
            FatMember::Skipped {
                kind: MemberKind::Unknown,
                ..
            }
        ));

        let member = fat.select("arm64").unwrap();
        let start = FAT_HEADER_SIZE + 2 * FAT_ARCH_SIZE;
        assert_eq!(member.range.start, start);
        assert_eq!(member.records[0].record.range, ByteRange::new(start + 32, 24));
    }

    #[test]
    fn test_static_archive_member() {
        let mut archive = magic::AR_MAGIC.to_vec();
        archive.extend_from_slice(&[0x20; 60]);
        let data = build_fat(&[(cpu_type::X86_64, archive)]);
        let fat = decode(&data).unwrap();
        assert!(matches!(
            fat.entries[0].member,
            FatMember::Skipped {
                kind: MemberKind::StaticArchive,
                ..
            }
        ));
    }

    #[test]
    fn test_broken_image_member_is_skipped() {
        let mut image = build_image(1, &uuid_record());
        image[20..24].copy_from_slice(&4096u32.to_le_bytes());
        let good = build_image(1, &uuid_record());
        let data = build_fat(&[(cpu_type::ARM64, image), (cpu_type::ARM64, good)]);
        let fat = decode(&data).unwrap();
        assert!(matches!(
            fat.entries[0].member,
            FatMember::Skipped {
                kind: MemberKind::Image,
                ..
            }
        ));
        assert_eq!(fat.images().count(), 1);
    }

    #[test]
    fn test_member_outside_file() {
        let mut data = build_fat(&[(cpu_type::ARM64, build_image(0, &[]))]);
        data[16..20].copy_from_slice(&0x10000u32.to_be_bytes());
        let fat = decode(&data).unwrap();
        assert!(matches!(
            fat.entries[0].member,
            FatMember::Skipped {
                kind: MemberKind::OutOfBounds,
                ..
            }
        ));
    }

    #[test]
    fn test_wide_entries() {
        let image = build_image(0, &[]);
        let offset = (FAT_HEADER_SIZE + FAT_ARCH_64_SIZE) as u64;
        let mut data = Vec::new();
        data.extend_from_slice(&magic::FAT_MAGIC_64.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&cpu_type::ARM64.to_be_bytes());
        data.extend_from_slice(&2u32.to_be_bytes());
        data.extend_from_slice(&offset.to_be_bytes());
        data.extend_from_slice(&(image.len() as u64).to_be_bytes());
        data.extend_from_slice(&14u32.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&image);

        let fat = decode(&data).unwrap();
        assert!(fat.wide);
        assert_eq!(fat.entries[0].offset, offset);
        assert_eq!(fat.entries[0].align, 14);
        assert_eq!(fat.entries[0].arch(), "arm64e");
        assert_eq!(fat.images().count(), 1);
    }

    #[test]
    fn test_entry_count_limit() {
        let mut data = build_fat(&[]);
        data[4..8].copy_from_slice(&1000u32.to_be_bytes());
        let err = decode(&data).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::LimitExceeded {
                what: "fat entries",
                limit: 32,
                actual: 1000
            }
        ));
    }

    #[test]
    fn test_truncated_entry_table() {
        let mut data = build_fat(&[]);
        data[4..8].copy_from_slice(&2u32.to_be_bytes());
        let err = decode(&data).unwrap_err();
        assert!(matches!(err, DecodeError::Bounds { offset: 8, .. }));
    }
}
