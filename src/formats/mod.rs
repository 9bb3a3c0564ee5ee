//! Container formats.
//!
//! This module identifies the outer container and decodes it:
//! - single-architecture images (32/64-bit, either byte order)
//! - fat containers (`fat_arch` and `fat_arch_64` entries)

pub mod cpu;
pub mod fat;
pub mod image;

use serde::Serialize;

use crate::cursor::ByteCursor;
use crate::error::{DecodeError, Result};
use crate::records::DecoderRegistry;
use crate::types::{DecodeOptions, Endianness, Introspect, Node, Width};

pub use fat::{FatArchive, FatEntry, FatMember, MemberKind};
pub use image::{HeaderFlags, Image, ImageHeader};

/// Magic values, as read big-endian from the first four bytes.
pub mod magic {
    /// 32-bit image, big-endian fields
    pub const MH_MAGIC: u32 = 0xFEED_FACE;
    /// 32-bit image, little-endian fields
    pub const MH_CIGAM: u32 = 0xCEFA_EDFE;
    /// 64-bit image, big-endian fields
    pub const MH_MAGIC_64: u32 = 0xFEED_FACF;
    /// 64-bit image, little-endian fields
    pub const MH_CIGAM_64: u32 = 0xCFFA_EDFE;

    /// Fat container with 32-bit entries
    pub const FAT_MAGIC: u32 = 0xCAFE_BABE;
    pub const FAT_CIGAM: u32 = 0xBEBA_FECA;
    /// Fat container with 64-bit entries
    pub const FAT_MAGIC_64: u32 = 0xCAFE_BABF;
    pub const FAT_CIGAM_64: u32 = 0xBFBA_FECA;

    /// Static archive: "!<arch>\n"
    pub const AR_MAGIC: [u8; 8] = *b"!<arch>\n";
}

/// Java class files share `0xCAFEBABE`; their minor/major version word
/// reads as an entry count far above any real fat container.
const JAVA_CLASS_MIN_COUNT: u32 = 0x2D;

/// Detected container with parsing context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedFormat {
    Image { width: Width, endian: Endianness },
    Fat { endian: Endianness, wide: bool },
    /// A bare static archive; no images to decode
    Archive,
    Unknown,
}

/// Detect the container from its magic bytes.
pub fn detect_format(data: &[u8]) -> DetectedFormat {
    if data.starts_with(&magic::AR_MAGIC) {
        return DetectedFormat::Archive;
    }
    let Some(head) = data.get(..4) else {
        return DetectedFormat::Unknown;
    };
    let raw = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);

    if let Some((width, endian)) = image::image_layout(raw) {
        return DetectedFormat::Image { width, endian };
    }
    if let Some((endian, wide)) = fat::fat_layout(raw) {
        if raw == magic::FAT_MAGIC {
            let looks_like_class = data
                .get(4..8)
                .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]) >= JAVA_CLASS_MIN_COUNT)
                .unwrap_or(false);
            if looks_like_class {
                return DetectedFormat::Unknown;
            }
        }
        return DetectedFormat::Fat { endian, wide };
    }
    DetectedFormat::Unknown
}

/// A decoded file: one image or a fat container of images.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "container", rename_all = "snake_case")]
pub enum MachFile {
    Image(Image),
    Fat(FatArchive),
}

impl MachFile {
    /// Every successfully decoded image, in file order.
    pub fn images(&self) -> Vec<&Image> {
        match self {
            MachFile::Image(image) => vec![image],
            MachFile::Fat(fat) => fat.images().collect(),
        }
    }

    pub fn is_fat(&self) -> bool {
        matches!(self, MachFile::Fat(_))
    }
}

impl Introspect for MachFile {
    fn to_node(&self) -> Node {
        match self {
            MachFile::Image(image) => image.to_node(),
            MachFile::Fat(fat) => fat.to_node(),
        }
    }
}

/// Decode a whole file.
pub fn decode(data: &[u8], options: &DecodeOptions, registry: &DecoderRegistry) -> Result<MachFile> {
    let file = ByteCursor::new(data);
    match detect_format(data) {
        DetectedFormat::Image { .. } => Ok(MachFile::Image(image::decode_image(file, options, registry)?)),
        DetectedFormat::Fat { .. } => Ok(MachFile::Fat(fat::decode_fat(file, options, registry)?)),
        DetectedFormat::Archive | DetectedFormat::Unknown => Err(DecodeError::BadMagic {
            offset: 0,
            expected: "Mach-O image or fat container".to_string(),
            actual: file.peek_u32(Endianness::Big).unwrap_or(0),
        }),
    }
}
