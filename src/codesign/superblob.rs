//! Super-blob index decoding.
//!
//! The header and the index are trusted structure: if either is broken the
//! whole signature fails. An individual entry that cannot be decoded is kept
//! as [`BlobOutcome::Skipped`] and the remaining entries are still decoded.

use serde::Serialize;
use tracing::{debug, warn};

use super::cms::SignatureBlob;
use super::code_directory::CodeDirectory;
use super::entitlements::Entitlements;
use super::requirement::RequirementSet;
use super::{blob_header, decode_blob, magic, slot, BlobContent, CS_ENDIAN};
use crate::cursor::ByteCursor;
use crate::error::{check_limit, DecodeError, Result};
use crate::types::{ByteRange, DecodeOptions, Introspect, Node};

/// Size of the `{magic, length, count}` header.
const SUPERBLOB_HEADER_SIZE: usize = 12;
/// Size of one `{slot, offset}` index entry.
const INDEX_ENTRY_SIZE: usize = 8;

/// A decoded super-blob.
#[derive(Debug, Clone, Serialize)]
pub struct SuperBlob {
    pub magic: u32,
    pub length: u32,
    pub range: ByteRange,
    pub entries: Vec<BlobEntry>,
}

/// One index entry and what became of its blob.
#[derive(Debug, Clone, Serialize)]
pub struct BlobEntry {
    pub slot: u32,
    /// Offset from the super-blob start
    pub offset: u32,
    /// The 8-byte `{slot, offset}` index entry
    pub index_range: ByteRange,
    /// The blob itself, when its header could be read
    pub blob_range: Option<ByteRange>,
    pub outcome: BlobOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BlobOutcome {
    Decoded { blob: BlobContent },
    Skipped { reason: String },
}

impl BlobEntry {
    pub fn blob(&self) -> Option<&BlobContent> {
        match &self.outcome {
            BlobOutcome::Decoded { blob } => Some(blob),
            BlobOutcome::Skipped { .. } => None,
        }
    }

    pub fn slot_name(&self) -> String {
        slot::name(self.slot)
            .map(str::to_string)
            .unwrap_or_else(|| format!("slot {:#x}", self.slot))
    }
}

impl SuperBlob {
    fn blobs(&self) -> impl Iterator<Item = (u32, &BlobContent)> {
        self.entries.iter().filter_map(|e| e.blob().map(|b| (e.slot, b)))
    }

    /// The primary code directory (slot 0).
    pub fn code_directory(&self) -> Option<&CodeDirectory> {
        self.blobs().find_map(|(s, b)| match b {
            BlobContent::CodeDirectory(cd) if s == slot::CODE_DIRECTORY => Some(cd),
            _ => None,
        })
    }

    /// The primary and alternate code directories, in index order.
    pub fn code_directories(&self) -> Vec<&CodeDirectory> {
        self.blobs()
            .filter_map(|(s, b)| match b {
                BlobContent::CodeDirectory(cd) if slot::is_code_directory(s) => Some(cd),
                _ => None,
            })
            .collect()
    }

    pub fn requirements(&self) -> Option<&RequirementSet> {
        self.blobs().find_map(|(_, b)| match b {
            BlobContent::Requirements(set) => Some(set),
            _ => None,
        })
    }

    /// XML entitlements, if present.
    pub fn entitlements(&self) -> Option<&Entitlements> {
        self.blobs().find_map(|(_, b)| match b {
            BlobContent::Entitlements(e) => Some(e),
            _ => None,
        })
    }

    pub fn der_entitlements(&self) -> Option<&Entitlements> {
        self.blobs().find_map(|(_, b)| match b {
            BlobContent::DerEntitlements(e) => Some(e),
            _ => None,
        })
    }

    pub fn signature(&self) -> Option<&SignatureBlob> {
        self.blobs().find_map(|(_, b)| match b {
            BlobContent::Signature(sig) => Some(sig),
            _ => None,
        })
    }

    /// Entries whose blob could not be decoded.
    pub fn skipped(&self) -> impl Iterator<Item = &BlobEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, BlobOutcome::Skipped { .. }))
    }
}

/// Decode a top-level super-blob. `cursor` covers the code-signature region,
/// which may be longer than the super-blob itself.
pub fn decode_superblob(cursor: ByteCursor<'_>, options: &DecodeOptions) -> Result<SuperBlob> {
    decode_nested(cursor, options, 0)
}

pub(crate) fn decode_nested(cursor: ByteCursor<'_>, options: &DecodeOptions, depth: usize) -> Result<SuperBlob> {
    check_limit("super-blob depth", depth as u64, options.max_superblob_depth)?;

    let (sb_magic, length) = blob_header(&cursor)?;
    if !magic::is_superblob(sb_magic) {
        return Err(DecodeError::BadMagic {
            offset: cursor.start(),
            expected: "code-signature super-blob".to_string(),
            actual: sb_magic,
        });
    }
    if length < SUPERBLOB_HEADER_SIZE {
        return Err(DecodeError::malformed(
            cursor.start(),
            format!("super-blob length {length} is smaller than its header"),
        ));
    }

    let mut sb = cursor.view(0, length)?;
    sb.skip(8)?;
    let count = sb.read_u32(CS_ENDIAN)?;
    check_limit("super-blob entries", u64::from(count), options.max_blob_count)?;

    let index_end = SUPERBLOB_HEADER_SIZE + count as usize * INDEX_ENTRY_SIZE;
    let mut index = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let from = sb.position();
        let slot = sb.read_u32(CS_ENDIAN)?;
        let offset = sb.read_u32(CS_ENDIAN)?;
        index.push((slot, offset, sb.range_from(from)));
    }
    debug!(magic = %format!("{sb_magic:#010x}"), length, count, depth, "decoding super-blob");

    let entries = index
        .into_iter()
        .map(|(slot, offset, index_range)| {
            let blob_range = blob_range(&sb, offset as usize, index_end);
            let outcome = match decode_entry(&sb, offset as usize, index_end, options, depth) {
                Ok(blob) => BlobOutcome::Decoded { blob },
                Err(err) => {
                    warn!(
                        slot = %format!("{slot:#x}"),
                        offset,
                        error = %err,
                        "skipping undecodable signature blob"
                    );
                    BlobOutcome::Skipped {
                        reason: err.to_string(),
                    }
                }
            };
            BlobEntry {
                slot,
                offset,
                index_range,
                blob_range,
                outcome,
            }
        })
        .collect();

    Ok(SuperBlob {
        magic: sb_magic,
        length: length as u32,
        range: sb.range(),
        entries,
    })
}

/// Range of the blob at `offset`, if its header lies past the index and inside the super-blob.
fn blob_range(sb: &ByteCursor<'_>, offset: usize, index_end: usize) -> Option<ByteRange> {
    if offset < index_end {
        return None;
    }
    let (_, length) = blob_header(&sb.view_from(offset).ok()?).ok()?;
    sb.view(offset, length).ok().map(|blob| blob.range())
}

fn decode_entry(
    sb: &ByteCursor<'_>,
    offset: usize,
    index_end: usize,
    options: &DecodeOptions,
    depth: usize,
) -> Result<BlobContent> {
    if offset < index_end {
        return Err(DecodeError::malformed(
            sb.start() + offset,
            "blob offset points into the super-blob index",
        ));
    }
    let target = sb.view_from(offset)?;
    let (_, length) = blob_header(&target)?;
    let blob = sb.view(offset, length)?;
    decode_blob(blob, options, depth + 1)
}

impl Introspect for SuperBlob {
    fn to_node(&self) -> Node {
        let mut node = Node::new("code_signature", self.range).with_value(
            magic::name(self.magic)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{:#010x}", self.magic)),
        );
        for entry in &self.entries {
            let range = entry.blob_range.unwrap_or(entry.index_range);
            let child = match &entry.outcome {
                BlobOutcome::Decoded { blob } => Node::new(entry.slot_name(), range).child(blob.to_node()),
                BlobOutcome::Skipped { reason } => Node::leaf(entry.slot_name(), format!("skipped: {reason}"), range),
            };
            node.push(child);
        }
        node
    }
}
