//! Load-command ("record") table decoding.
//!
//! Decoding is two passes. Pass one walks the record table: for each record
//! it peeks `{tag, size}`, slices exactly `size` bytes off the table and
//! hands that slice to the decoder for the tag. Records that point at bytes
//! elsewhere in the image only capture their `{offset, size}` pairs here.
//! Pass two ([`deferred`]) resolves those pairs once every record is known,
//! which lets one record's payload depend on another record (function starts
//! are relative to the `__TEXT` segment address).

pub mod deferred;
pub mod exports;
pub mod flat;
pub mod linkedit;
pub mod segment;
pub mod tags;

use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, trace};

use crate::cursor::ByteCursor;
use crate::error::{check_limit, DecodeError, Result};
use crate::types::{serialize_hex, ByteRange, DecodeOptions, Endianness, Introspect, Node, Width};

pub use deferred::{DeferredPayload, SkippedPayload, Stage2Record};
pub use flat::{Field, FieldValue, FlatRecord};
pub use linkedit::{
    DeferredRef, DyldInfoCommand, LinkeditDataCommand, NoteCommand, PayloadKind, SymtabCommand,
};
pub use segment::{Section, Segment};

/// Size of the `{tag, size}` header every record starts with.
pub const RECORD_HEADER_SIZE: usize = 8;

/// Signature of a pluggable record decoder.
///
/// The cursor covers exactly one record (header included) and cannot reach
/// past it.
pub type RecordDecoder = fn(&mut ByteCursor<'_>, Endianness) -> Result<RecordBody>;

/// Tag-keyed table of record decoders.
#[derive(Clone)]
pub struct DecoderRegistry {
    decoders: HashMap<u32, RecordDecoder>,
}

impl std::fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<_> = self.decoders.keys().copied().collect();
        tags.sort_unstable();
        f.debug_struct("DecoderRegistry").field("tags", &tags).finish()
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl DecoderRegistry {
    /// A registry with no decoders; every non-core tag decodes as unknown.
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// A registry holding the built-in flat decoders.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        flat::register_builtin(&mut registry);
        registry
    }

    /// Install a decoder for `tag`, returning the one it replaces.
    pub fn register(&mut self, tag: u32, decoder: RecordDecoder) -> Option<RecordDecoder> {
        self.decoders.insert(tag, decoder)
    }

    /// Remove the decoder for `tag`.
    pub fn unregister(&mut self, tag: u32) -> Option<RecordDecoder> {
        self.decoders.remove(&tag)
    }

    pub fn get(&self, tag: u32) -> Option<RecordDecoder> {
        self.decoders.get(&tag).copied()
    }

    pub fn contains(&self, tag: u32) -> bool {
        self.decoders.contains_key(&tag)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}

/// Everything a record decoder needs besides its bytes.
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext<'o> {
    pub width: Width,
    pub endian: Endianness,
    pub options: &'o DecodeOptions,
    pub registry: &'o DecoderRegistry,
}

/// Raw bytes of a record nothing knows how to decode.
#[derive(Debug, Clone, Serialize)]
pub struct UnknownRecord {
    #[serde(serialize_with = "serialize_hex")]
    pub raw: Vec<u8>,
}

/// Decoded body of one record.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum RecordBody {
    Segment(Segment),
    Symtab(SymtabCommand),
    LinkeditData(LinkeditDataCommand),
    DyldInfo(DyldInfoCommand),
    Note(NoteCommand),
    Flat(FlatRecord),
    Unknown(UnknownRecord),
}

impl RecordBody {
    /// Image-relative regions this record points at, in record order.
    ///
    /// `LC_SYMTAB` is resolved as a pair and reports both of its regions.
    pub fn deferred(&self) -> Vec<DeferredRef> {
        match self {
            RecordBody::Symtab(s) => vec![
                DeferredRef {
                    kind: PayloadKind::Symbols,
                    offset: u64::from(s.symoff),
                    size: u64::from(s.nsyms),
                },
                DeferredRef {
                    kind: PayloadKind::Strings,
                    offset: u64::from(s.stroff),
                    size: u64::from(s.strsize),
                },
            ],
            RecordBody::LinkeditData(l) => vec![l.deferred()],
            RecordBody::DyldInfo(d) => d.deferred().to_vec(),
            RecordBody::Note(n) => vec![n.deferred()],
            RecordBody::Segment(_) | RecordBody::Flat(_) | RecordBody::Unknown(_) => Vec::new(),
        }
    }
}

/// A record after pass one.
#[derive(Debug, Clone, Serialize)]
pub struct Stage1Record {
    /// Position in the record table
    pub index: usize,
    pub tag: u32,
    /// Declared size, header included
    pub size: u32,
    pub range: ByteRange,
    pub body: RecordBody,
}

impl Stage1Record {
    /// Symbolic tag name, or the hex tag.
    pub fn name(&self) -> String {
        tags::display_tag(self.tag)
    }

    /// Whether pass two has anything to resolve for this record.
    pub fn has_deferred(&self) -> bool {
        self.body.deferred().iter().any(|d| d.size != 0)
    }
}

impl Introspect for Stage1Record {
    fn to_node(&self) -> Node {
        let body = match &self.body {
            RecordBody::Segment(s) => s.to_node(),
            RecordBody::Symtab(s) => s.to_node_at(self.range),
            RecordBody::LinkeditData(l) => l.to_node_at(self.range),
            RecordBody::DyldInfo(d) => d.to_node_at(self.range),
            RecordBody::Note(n) => n.to_node_at(self.range),
            RecordBody::Flat(f) => f.to_node(),
            RecordBody::Unknown(u) => Node::leaf("raw", hex::encode(&u.raw), self.range),
        };
        Node::new(format!("record[{}]", self.index), self.range)
            .with_value(self.name())
            .child(body)
    }
}

/// Pass one: decode exactly `count` records from the record table.
///
/// `table` must cover exactly the `sizeofcmds` bytes after the image header.
pub fn decode_records(
    table: &mut ByteCursor<'_>,
    count: u32,
    ctx: &DecodeContext<'_>,
) -> Result<Vec<Stage1Record>> {
    check_limit("records", u64::from(count), ctx.options.max_records)?;

    let mut records = Vec::with_capacity(count as usize);
    for index in 0..count as usize {
        let start = table.position();
        let tag = table.peek_u32(ctx.endian)?;
        let size = {
            let mut peek = *table;
            peek.skip(4)?;
            peek.read_u32(ctx.endian)?
        };

        if (size as usize) < RECORD_HEADER_SIZE {
            return Err(DecodeError::malformed(
                start,
                format!("record {index} declares size {size}, below the {RECORD_HEADER_SIZE}-byte header"),
            ));
        }

        let mut body_cursor = table.slice(size as usize)?;
        let range = body_cursor.range();
        trace!(index, tag = %tags::display_tag(tag), size, "decoding record");

        let body = decode_body(tag, &mut body_cursor, ctx)?;
        records.push(Stage1Record {
            index,
            tag,
            size,
            range,
            body,
        });
    }

    if table.remaining() > 0 {
        debug!(
            trailing = table.remaining(),
            "record table has bytes after the last record"
        );
    }

    Ok(records)
}

fn decode_body(tag: u32, cursor: &mut ByteCursor<'_>, ctx: &DecodeContext<'_>) -> Result<RecordBody> {
    use tags::*;

    let endian = ctx.endian;
    let body = match tag {
        LC_SEGMENT => RecordBody::Segment(segment::decode_segment(cursor, Width::Bits32, endian)?),
        LC_SEGMENT_64 => RecordBody::Segment(segment::decode_segment(cursor, Width::Bits64, endian)?),
        LC_SYMTAB => RecordBody::Symtab(SymtabCommand::decode(cursor, endian)?),
        LC_CODE_SIGNATURE
        | LC_SEGMENT_SPLIT_INFO
        | LC_FUNCTION_STARTS
        | LC_DATA_IN_CODE
        | LC_DYLIB_CODE_SIGN_DRS
        | LC_LINKER_OPTIMIZATION_HINT
        | LC_DYLD_EXPORTS_TRIE
        | LC_DYLD_CHAINED_FIXUPS
        | LC_ATOM_INFO => RecordBody::LinkeditData(LinkeditDataCommand::decode(cursor, tag, endian)?),
        LC_DYLD_INFO | LC_DYLD_INFO_ONLY => RecordBody::DyldInfo(DyldInfoCommand::decode(cursor, endian)?),
        LC_NOTE => RecordBody::Note(NoteCommand::decode(cursor, endian)?),
        _ => match ctx.registry.get(tag) {
            Some(decoder) => decoder(cursor, endian)?,
            None if ctx.options.strict_records => {
                return Err(DecodeError::UnknownRecordTag {
                    offset: cursor.start(),
                    tag,
                });
            }
            None => {
                debug!(tag = %format!("{tag:#x}"), offset = cursor.start(), "no decoder for record tag");
                RecordBody::Unknown(UnknownRecord {
                    raw: cursor.window().to_vec(),
                })
            }
        },
    };
    Ok(body)
}
