//! Embedded code signature decoding.
//!
//! A signature is a super-blob: a magic, a length, and an index of
//! `{slot, offset}` entries pointing at typed blobs. Every blob starts with
//! its own `{magic, length}` header, and the magic (not the slot) decides how
//! it is decoded. All code-signing structures are big-endian regardless of
//! the image byte order.

pub mod cms;
pub mod code_directory;
pub mod entitlements;
pub mod requirement;
pub mod superblob;

use serde::Serialize;

use crate::cursor::ByteCursor;
use crate::error::{DecodeError, Result};
use crate::types::{ByteRange, DecodeOptions, Endianness, Introspect, Node};

pub use cms::{Certificate, CmsSignature, SignatureBlob, SignerInfo};
pub use code_directory::{
    CodeDirectory, CodeDirectoryFlags, ExecSegFlags, FieldRanges, HashSlot, HashType, OptionalField,
};
#[cfg(feature = "digest")]
pub use code_directory::{PageCheck, PageStatus};
pub use entitlements::{EntitlementEntry, EntitlementValue, Entitlements, EntitlementsFormat};
pub use requirement::{Requirement, RequirementExpression, RequirementSet};
pub use superblob::{decode_superblob, BlobEntry, BlobOutcome, SuperBlob};

/// Code-signing structures are always big-endian.
pub(crate) const CS_ENDIAN: Endianness = Endianness::Big;

/// Blob magic values.
pub mod magic {
    pub const REQUIREMENT: u32 = 0xfade0c00;
    pub const REQUIREMENT_SET: u32 = 0xfade0c01;
    pub const CODE_DIRECTORY: u32 = 0xfade0c02;
    pub const EMBEDDED_SIGNATURE: u32 = 0xfade0cc0;
    pub const EMBEDDED_SIGNATURE_OLD: u32 = 0xfade0b02;
    pub const DETACHED_SIGNATURE: u32 = 0xfade0cc1;
    pub const EMBEDDED_ENTITLEMENTS: u32 = 0xfade7171;
    pub const EMBEDDED_DER_ENTITLEMENTS: u32 = 0xfade7172;
    pub const BLOB_WRAPPER: u32 = 0xfade0b01;
    pub const LAUNCH_CONSTRAINT: u32 = 0xfade8181;

    /// Whether `magic` introduces a super-blob of typed entries.
    pub fn is_superblob(magic: u32) -> bool {
        matches!(
            magic,
            EMBEDDED_SIGNATURE | EMBEDDED_SIGNATURE_OLD | DETACHED_SIGNATURE
        )
    }

    pub fn name(magic: u32) -> Option<&'static str> {
        Some(match magic {
            REQUIREMENT => "requirement",
            REQUIREMENT_SET => "requirement set",
            CODE_DIRECTORY => "code directory",
            EMBEDDED_SIGNATURE => "embedded signature",
            EMBEDDED_SIGNATURE_OLD => "embedded signature (old)",
            DETACHED_SIGNATURE => "detached signature",
            EMBEDDED_ENTITLEMENTS => "entitlements",
            EMBEDDED_DER_ENTITLEMENTS => "DER entitlements",
            BLOB_WRAPPER => "CMS signature",
            LAUNCH_CONSTRAINT => "launch constraint",
            _ => return None,
        })
    }
}

/// Super-blob slot numbers.
pub mod slot {
    pub const CODE_DIRECTORY: u32 = 0;
    pub const INFO: u32 = 1;
    pub const REQUIREMENTS: u32 = 2;
    pub const RESOURCE_DIR: u32 = 3;
    pub const APPLICATION: u32 = 4;
    pub const ENTITLEMENTS: u32 = 5;
    pub const REP_SPECIFIC: u32 = 6;
    pub const ENTITLEMENTS_DER: u32 = 7;
    pub const LAUNCH_CONSTRAINT_SELF: u32 = 8;
    pub const LAUNCH_CONSTRAINT_PARENT: u32 = 9;
    pub const LAUNCH_CONSTRAINT_RESPONSIBLE: u32 = 10;
    pub const LIBRARY_CONSTRAINT: u32 = 11;
    pub const ALTERNATE_CODE_DIRECTORIES: u32 = 0x1000;
    pub const ALTERNATE_CODE_DIRECTORY_MAX: u32 = 5;
    pub const SIGNATURE: u32 = 0x10000;
    pub const IDENTIFICATION: u32 = 0x10001;
    pub const TICKET: u32 = 0x10002;

    pub fn is_code_directory(slot: u32) -> bool {
        slot == CODE_DIRECTORY
            || (ALTERNATE_CODE_DIRECTORIES..ALTERNATE_CODE_DIRECTORIES + ALTERNATE_CODE_DIRECTORY_MAX)
                .contains(&slot)
    }

    pub fn name(slot: u32) -> Option<&'static str> {
        Some(match slot {
            CODE_DIRECTORY => "CodeDirectory",
            INFO => "Info",
            REQUIREMENTS => "Requirements",
            RESOURCE_DIR => "ResourceDir",
            APPLICATION => "Application",
            ENTITLEMENTS => "Entitlements",
            REP_SPECIFIC => "RepSpecific",
            ENTITLEMENTS_DER => "EntitlementsDer",
            LAUNCH_CONSTRAINT_SELF => "LaunchConstraintSelf",
            LAUNCH_CONSTRAINT_PARENT => "LaunchConstraintParent",
            LAUNCH_CONSTRAINT_RESPONSIBLE => "LaunchConstraintResponsible",
            LIBRARY_CONSTRAINT => "LibraryConstraint",
            0x1000 => "AlternateCodeDirectory0",
            0x1001 => "AlternateCodeDirectory1",
            0x1002 => "AlternateCodeDirectory2",
            0x1003 => "AlternateCodeDirectory3",
            0x1004 => "AlternateCodeDirectory4",
            SIGNATURE => "Signature",
            IDENTIFICATION => "Identification",
            TICKET => "Ticket",
            _ => return None,
        })
    }
}

/// A blob whose magic has no decoder.
#[derive(Debug, Clone, Serialize)]
pub struct UnknownBlob {
    pub magic: u32,
    pub range: ByteRange,
}

/// Decoded content of one blob, keyed by its magic.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum BlobContent {
    CodeDirectory(CodeDirectory),
    Requirement(Requirement),
    Requirements(RequirementSet),
    Entitlements(Entitlements),
    DerEntitlements(Entitlements),
    Signature(SignatureBlob),
    SuperBlob(Box<SuperBlob>),
    Unknown(UnknownBlob),
}

/// Read the `{magic, length}` header of the blob at the cursor's window start.
pub(crate) fn blob_header(blob: &ByteCursor<'_>) -> Result<(u32, usize)> {
    let mut header = *blob;
    header.seek_to_offset(0)?;
    let magic = header.read_u32(CS_ENDIAN)?;
    let length = header.read_u32(CS_ENDIAN)? as usize;
    if length < 8 {
        return Err(DecodeError::malformed(
            blob.start(),
            format!("blob {magic:#010x} declares length {length}, below its 8-byte header"),
        ));
    }
    Ok((magic, length))
}

/// Check the magic at the start of `blob` and narrow the cursor to the declared length.
pub(crate) fn expect_blob<'a>(blob: &ByteCursor<'a>, expected: u32) -> Result<ByteCursor<'a>> {
    let (magic, length) = blob_header(blob)?;
    if magic != expected {
        return Err(DecodeError::BadMagic {
            offset: blob.start(),
            expected: magic::name(expected).unwrap_or("blob").to_string(),
            actual: magic,
        });
    }
    let mut narrowed = blob.view(0, length)?;
    narrowed.skip(8)?;
    Ok(narrowed)
}

/// Decode one blob. `blob` covers exactly the blob; `depth` is the super-blob nesting level.
pub fn decode_blob(blob: ByteCursor<'_>, options: &DecodeOptions, depth: usize) -> Result<BlobContent> {
    let (blob_magic, _) = blob_header(&blob)?;
    let content = match blob_magic {
        magic::CODE_DIRECTORY => BlobContent::CodeDirectory(CodeDirectory::decode(blob)?),
        magic::REQUIREMENT => BlobContent::Requirement(requirement::decode_requirement(blob, options)?),
        magic::REQUIREMENT_SET => {
            BlobContent::Requirements(requirement::decode_requirement_set(blob, options)?)
        }
        magic::EMBEDDED_ENTITLEMENTS => BlobContent::Entitlements(entitlements::decode_xml(blob)?),
        magic::EMBEDDED_DER_ENTITLEMENTS => {
            BlobContent::DerEntitlements(entitlements::decode_der(blob, options)?)
        }
        magic::BLOB_WRAPPER => BlobContent::Signature(cms::decode_signature_blob(blob)?),
        m if magic::is_superblob(m) => {
            BlobContent::SuperBlob(Box::new(superblob::decode_nested(blob, options, depth)?))
        }
        m => BlobContent::Unknown(UnknownBlob {
            magic: m,
            range: blob.range(),
        }),
    };
    Ok(content)
}

impl Introspect for BlobContent {
    fn to_node(&self) -> Node {
        match self {
            BlobContent::CodeDirectory(cd) => cd.to_node(),
            BlobContent::Requirement(r) => r.to_node(),
            BlobContent::Requirements(set) => set.to_node(),
            BlobContent::Entitlements(e) | BlobContent::DerEntitlements(e) => e.to_node(),
            BlobContent::Signature(sig) => sig.to_node(),
            BlobContent::SuperBlob(sb) => sb.to_node(),
            BlobContent::Unknown(u) => Node::leaf(
                "blob",
                magic::name(u.magic)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{:#010x}", u.magic)),
                u.range,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_classification() {
        assert!(slot::is_code_directory(0));
        assert!(slot::is_code_directory(0x1004));
        assert!(!slot::is_code_directory(0x1005));
        assert_eq!(slot::name(slot::SIGNATURE), Some("Signature"));
        assert_eq!(slot::name(0x2000), None);
    }

    #[test]
    fn test_unknown_blob_magic() {
        let data = [0xfa, 0xde, 0x99, 0x99, 0, 0, 0, 12, 1, 2, 3, 4];
        let blob = decode_blob(ByteCursor::new(&data), &DecodeOptions::new(), 0).unwrap();
        match blob {
            BlobContent::Unknown(u) => {
                assert_eq!(u.magic, 0xfade9999);
                assert_eq!(u.range, ByteRange::new(0, 12));
            }
            other => panic!("unexpected blob {other:?}"),
        }
    }

    #[test]
    fn test_expect_blob_wrong_magic() {
        let data = [0xfa, 0xde, 0x0c, 0x00, 0, 0, 0, 8];
        let err = expect_blob(&ByteCursor::new(&data), magic::CODE_DIRECTORY).unwrap_err();
        assert!(matches!(err, DecodeError::BadMagic { actual: 0xfade0c00, .. }));
    }

    #[test]
    fn test_blob_header_length_too_small() {
        let data = [0xfa, 0xde, 0x0c, 0x02, 0, 0, 0, 4];
        assert!(matches!(
            blob_header(&ByteCursor::new(&data)),
            Err(DecodeError::Malformed { .. })
        ));
    }
}
