//! Pass two: resolve the `{offset, size}` pairs captured in pass one.
//!
//! Every pair is image-relative. A pair that points outside the image is an
//! [`DecodeError::UnresolvedDeferredPayload`]; a pair that points into the
//! header or record table is malformed. Payloads that depend on another
//! record (function starts need the `__TEXT` address) look it up here, after
//! all records exist.

use serde::Serialize;
use tracing::{debug, trace, warn};

use super::exports::{decode_export_trie, ExportTrie};
use super::linkedit::{DeferredRef, PayloadKind};
use super::{DecodeContext, RecordBody, Stage1Record};
use crate::codesign::requirement::{decode_requirement_set, RequirementSet};
use crate::codesign::superblob::{decode_superblob, SuperBlob};
use crate::cursor::ByteCursor;
use crate::error::{check_limit, DecodeError, Result};
use crate::types::{ByteRange, Endianness, Introspect, Node, Width};

/// A record after pass two: the pass-one record plus its resolved payloads.
#[derive(Debug, Clone, Serialize)]
pub struct Stage2Record {
    pub record: Stage1Record,
    pub payloads: Vec<DeferredPayload>,
}

/// A resolved deferred payload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum DeferredPayload {
    CodeSignature(SuperBlob),
    /// Designated requirements of linked dylibs (`LC_DYLIB_CODE_SIGN_DRS`)
    LibraryRequirements(RequirementSet),
    Symbols(SymbolTable),
    FunctionStarts(FunctionStarts),
    DataInCode(DataInCode),
    Exports(ExportTrie),
    Raw(RawPayload),
    /// A payload inside the image that could not be decoded
    Skipped(SkippedPayload),
}

/// A payload whose contents failed to decode.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedPayload {
    pub kind: PayloadKind,
    pub range: ByteRange,
    pub reason: String,
}

/// A payload kept as a byte range.
#[derive(Debug, Clone, Serialize)]
pub struct RawPayload {
    pub kind: PayloadKind,
    pub range: ByteRange,
}

pub const N_STAB: u8 = 0xe0;
pub const N_PEXT: u8 = 0x10;
pub const N_TYPE: u8 = 0x0e;
pub const N_EXT: u8 = 0x01;

/// One `nlist` entry.
#[derive(Debug, Clone, Serialize)]
pub struct Symbol {
    /// `None` when the string index falls outside the string table
    pub name: Option<String>,
    pub n_type: u8,
    pub n_sect: u8,
    pub n_desc: u16,
    pub n_value: u64,
    pub range: ByteRange,
}

impl Symbol {
    pub fn type_name(&self) -> &'static str {
        if self.n_type & N_STAB != 0 {
            return "stab";
        }
        match self.n_type & N_TYPE {
            0x0 => "undefined",
            0x2 => "absolute",
            0xa => "indirect",
            0xc => "prebound",
            0xe => "section",
            _ => "unknown",
        }
    }

    pub fn is_external(&self) -> bool {
        self.n_type & N_EXT != 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SymbolTable {
    pub range: ByteRange,
    pub strings: ByteRange,
    pub symbols: Vec<Symbol>,
}

/// Function start addresses, already rebased onto `__TEXT`.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionStarts {
    pub range: ByteRange,
    pub text_base: u64,
    pub addresses: Vec<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataInCodeEntry {
    pub offset: u32,
    pub length: u16,
    pub kind: u16,
}

impl DataInCodeEntry {
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            1 => "DATA",
            2 => "JUMP_TABLE8",
            3 => "JUMP_TABLE16",
            4 => "JUMP_TABLE32",
            5 => "ABS_JUMP_TABLE32",
            _ => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DataInCode {
    pub range: ByteRange,
    pub entries: Vec<DataInCodeEntry>,
}

/// Resolve every record's deferred payloads against the image.
///
/// `table` is the absolute range of the header plus record table.
pub fn resolve_deferred(
    image: ByteCursor<'_>,
    table: ByteRange,
    records: Vec<Stage1Record>,
    ctx: &DecodeContext<'_>,
) -> Result<Vec<Stage2Record>> {
    let text_base = records
        .iter()
        .find_map(|r| match &r.body {
            RecordBody::Segment(s) if s.name == "__TEXT" => Some(s.vmaddr),
            _ => None,
        })
        .unwrap_or(0);

    let mut resolved = Vec::with_capacity(records.len());
    for record in records {
        let payloads = if ctx.options.resolve_deferred {
            resolve_record(&image, table, &record, text_base, ctx)?
        } else {
            Vec::new()
        };
        resolved.push(Stage2Record { record, payloads });
    }
    Ok(resolved)
}

fn resolve_record(
    image: &ByteCursor<'_>,
    table: ByteRange,
    record: &Stage1Record,
    text_base: u64,
    ctx: &DecodeContext<'_>,
) -> Result<Vec<DeferredPayload>> {
    let mut payloads = Vec::new();

    if let RecordBody::Symtab(symtab) = &record.body {
        if symtab.nsyms > 0 {
            check_limit("symbols", u64::from(symtab.nsyms), ctx.options.max_symbols)?;
            let entry_size = nlist_size(ctx.width) as u64;
            let symbols = DeferredRef {
                kind: PayloadKind::Symbols,
                offset: u64::from(symtab.symoff),
                size: u64::from(symtab.nsyms) * entry_size,
            };
            let strings = DeferredRef {
                kind: PayloadKind::Strings,
                offset: u64::from(symtab.stroff),
                size: u64::from(symtab.strsize),
            };
            let sym_view = locate(image, table, record, &symbols)?;
            let str_view = locate(image, table, record, &strings)?;
            if let Some(sym_view) = sym_view {
                let table = decode_symbols(sym_view, str_view, ctx.width, ctx.endian)?;
                payloads.push(DeferredPayload::Symbols(table));
            }
        }
        return Ok(payloads);
    }

    for region in record.body.deferred() {
        let Some(view) = locate(image, table, record, &region)? else {
            continue;
        };
        trace!(record = %record.name(), kind = ?region.kind, range = %view.range(), "resolving payload");
        let payload = match region.kind {
            PayloadKind::CodeSignature => DeferredPayload::CodeSignature(decode_superblob(view, ctx.options)?),
            PayloadKind::CodeSignDrs => match decode_requirement_set(view, ctx.options) {
                Ok(set) => DeferredPayload::LibraryRequirements(set),
                Err(err) => {
                    warn!(record = %record.name(), range = %view.range(), error = %err, "skipping undecodable library requirements");
                    DeferredPayload::Skipped(SkippedPayload {
                        kind: region.kind,
                        range: view.range(),
                        reason: err.to_string(),
                    })
                }
            },
            PayloadKind::FunctionStarts => {
                DeferredPayload::FunctionStarts(decode_function_starts(view, text_base)?)
            }
            PayloadKind::DataInCode => DeferredPayload::DataInCode(decode_data_in_code(view, ctx.endian)?),
            PayloadKind::ExportTrie => {
                DeferredPayload::Exports(decode_export_trie(view, ctx.options.max_trie_depth)?)
            }
            kind => DeferredPayload::Raw(RawPayload {
                kind,
                range: view.range(),
            }),
        };
        payloads.push(payload);
    }
    Ok(payloads)
}

/// Turn an image-relative pair into a bounded view. Empty pairs resolve to nothing.
fn locate<'a>(
    image: &ByteCursor<'a>,
    table: ByteRange,
    record: &Stage1Record,
    region: &DeferredRef,
) -> Result<Option<ByteCursor<'a>>> {
    if region.size == 0 {
        return Ok(None);
    }
    let unresolved = || DecodeError::UnresolvedDeferredPayload {
        record: record.name(),
        record_offset: record.range.start,
        offset: region.offset,
        size: region.size,
        image_size: image.len(),
    };
    let offset = usize::try_from(region.offset).map_err(|_| unresolved())?;
    let size = usize::try_from(region.size).map_err(|_| unresolved())?;
    let view = image.view(offset, size).map_err(|_| unresolved())?;

    if view.range().overlaps(&table) {
        return Err(DecodeError::malformed(
            view.start(),
            format!("{} payload {:?} overlaps the header or record table", record.name(), region.kind),
        ));
    }
    Ok(Some(view))
}

fn nlist_size(width: Width) -> usize {
    match width {
        Width::Bits32 => 12,
        Width::Bits64 => 16,
    }
}

fn decode_symbols(
    mut entries: ByteCursor<'_>,
    strings: Option<ByteCursor<'_>>,
    width: Width,
    endian: Endianness,
) -> Result<SymbolTable> {
    let range = entries.range();
    let entry_size = nlist_size(width);
    let mut symbols = Vec::with_capacity(entries.len() / entry_size);

    while entries.remaining() >= entry_size {
        let mut e = entries.slice(entry_size)?;
        let strx = e.read_u32(endian)? as usize;
        let n_type = e.read_u8()?;
        let n_sect = e.read_u8()?;
        let n_desc = e.read_u16(endian)?;
        let n_value = e.read_word(width, endian)?;

        let name = match &strings {
            Some(strtab) if strx < strtab.len() => strtab.view_from(strx)?.read_fixed_str(strtab.len() - strx).ok(),
            _ => None,
        };
        if name.is_none() && strx != 0 {
            debug!(strx, "symbol name index outside the string table");
        }

        symbols.push(Symbol {
            name,
            n_type,
            n_sect,
            n_desc,
            n_value,
            range: e.range(),
        });
    }

    Ok(SymbolTable {
        range,
        strings: strings.map(|s| s.range()).unwrap_or_default(),
        symbols,
    })
}

/// ULEB128 deltas; the first is relative to `__TEXT`, a zero delta ends the list.
fn decode_function_starts(mut view: ByteCursor<'_>, text_base: u64) -> Result<FunctionStarts> {
    let range = view.range();
    let mut addresses = Vec::new();
    let mut address = text_base;
    while view.remaining() > 0 {
        let at = view.position();
        let delta = view.read_uleb128()?;
        if delta == 0 {
            break;
        }
        address = address
            .checked_add(delta)
            .ok_or_else(|| DecodeError::malformed(at, "function start address overflows"))?;
        addresses.push(address);
    }
    Ok(FunctionStarts {
        range,
        text_base,
        addresses,
    })
}

fn decode_data_in_code(mut view: ByteCursor<'_>, endian: Endianness) -> Result<DataInCode> {
    let range = view.range();
    let mut entries = Vec::with_capacity(view.len() / 8);
    while view.remaining() >= 8 {
        entries.push(DataInCodeEntry {
            offset: view.read_u32(endian)?,
            length: view.read_u16(endian)?,
            kind: view.read_u16(endian)?,
        });
    }
    Ok(DataInCode { range, entries })
}

impl Introspect for DeferredPayload {
    fn to_node(&self) -> Node {
        match self {
            DeferredPayload::CodeSignature(sb) => sb.to_node(),
            DeferredPayload::LibraryRequirements(set) => set.to_node(),
            DeferredPayload::Exports(trie) => trie.to_node(),
            DeferredPayload::Symbols(table) => {
                let mut node = Node::new("symbols", table.range).with_value(table.symbols.len());
                for sym in &table.symbols {
                    node.push(Node::leaf(
                        sym.name.as_deref().unwrap_or("<no name>"),
                        format!("{:#x} {}", sym.n_value, sym.type_name()),
                        sym.range,
                    ));
                }
                node
            }
            DeferredPayload::FunctionStarts(fs) => {
                let mut node = Node::new("function_starts", fs.range).with_value(fs.addresses.len());
                for addr in &fs.addresses {
                    node.push(Node::leaf("start", format!("{addr:#x}"), fs.range));
                }
                node
            }
            DeferredPayload::DataInCode(dic) => {
                let mut node = Node::new("data_in_code", dic.range).with_value(dic.entries.len());
                for e in &dic.entries {
                    node.push(Node::leaf(
                        e.kind_name(),
                        format!("offset {:#x} length {}", e.offset, e.length),
                        dic.range,
                    ));
                }
                node
            }
            DeferredPayload::Raw(raw) => Node::leaf(format!("{:?}", raw.kind), format!("{} bytes", raw.range.len()), raw.range),
            DeferredPayload::Skipped(skipped) => Node::leaf(
                format!("{:?}", skipped.kind),
                format!("skipped: {}", skipped.reason),
                skipped.range,
            ),
        }
    }
}

impl Introspect for Stage2Record {
    fn to_node(&self) -> Node {
        let mut node = self.record.to_node();
        for payload in &self.payloads {
            node.push(payload.to_node());
        }
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::linkedit::{LinkeditDataCommand, SymtabCommand};
    use crate::records::{DecoderRegistry, Segment};
    use crate::types::DecodeOptions;

    fn record(index: usize, body: RecordBody) -> Stage1Record {
        Stage1Record {
            index,
            tag: 0,
            size: 16,
            range: ByteRange::new(32 + index * 16, 16),
            body,
        }
    }

    fn text_segment(vmaddr: u64) -> RecordBody {
        RecordBody::Segment(Segment {
            name: "__TEXT".to_string(),
            width: Width::Bits64,
            vmaddr,
            vmsize: 0x4000,
            fileoff: 0,
            filesize: 0x4000,
            maxprot: 5,
            initprot: 5,
            flags: 0,
            sections: Vec::new(),
            range: ByteRange::new(32, 72),
        })
    }

    fn linkedit(kind: PayloadKind, dataoff: u32, datasize: u32) -> RecordBody {
        RecordBody::LinkeditData(LinkeditDataCommand {
            kind,
            dataoff,
            datasize,
        })
    }

    fn run(image: &[u8], records: Vec<Stage1Record>) -> Result<Vec<Stage2Record>> {
        let options = DecodeOptions::new();
        let registry = DecoderRegistry::with_builtin();
        let ctx = DecodeContext {
            width: Width::Bits64,
            endian: Endianness::Little,
            options: &options,
            registry: &registry,
        };
        resolve_deferred(ByteCursor::new(image), ByteRange::new(0, 64), records, &ctx)
    }

    #[test]
    fn test_function_starts_use_text_base() {
        let mut image = vec![0u8; 0x80];
        image[0x70..0x74].copy_from_slice(&[0x80, 0x20, 0x10, 0x00]);
        let records = vec![
            record(0, text_segment(0x1_0000_0000)),
            record(1, linkedit(PayloadKind::FunctionStarts, 0x70, 4)),
        ];

        let resolved = run(&image, records).unwrap();
        match &resolved[1].payloads[0] {
            DeferredPayload::FunctionStarts(fs) => {
                assert_eq!(fs.addresses, vec![0x1_0000_1000, 0x1_0000_1010]);
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert!(resolved[0].payloads.is_empty());
    }

    #[test]
    fn test_payload_outside_image() {
        let image = vec![0u8; 0x80];
        let records = vec![record(0, linkedit(PayloadKind::DataInCode, 0x70, 0x20))];
        let err = run(&image, records).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnresolvedDeferredPayload {
                record_offset: 32,
                offset: 0x70,
                size: 0x20,
                image_size: 0x80,
                ..
            }
        ));
        assert_eq!(err.offset(), Some(32));
    }

    #[test]
    fn test_payload_overlapping_table() {
        let image = vec![0u8; 0x80];
        let records = vec![record(0, linkedit(PayloadKind::DataInCode, 0x38, 8))];
        let err = run(&image, records).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { offset: 0x38, .. }));
    }

    #[test]
    fn test_zero_size_is_skipped() {
        let image = vec![0u8; 0x80];
        let records = vec![record(0, linkedit(PayloadKind::CodeSignature, 0x1000, 0))];
        let resolved = run(&image, records).unwrap();
        assert!(resolved[0].payloads.is_empty());
    }

    #[test]
    fn test_symbols_with_names() {
        let mut image = vec![0u8; 0x100];
        // one nlist_64 at 0x40
        image[0x40..0x44].copy_from_slice(&1u32.to_le_bytes());
        image[0x44] = 0x0f; // N_SECT | N_EXT
        image[0x45] = 1;
        image[0x48..0x50].copy_from_slice(&0x1_0000_3f00u64.to_le_bytes());
        // string table at 0x60
        image[0x60..0x67].copy_from_slice(b"\0_main\0");
        let records = vec![record(
            0,
            RecordBody::Symtab(SymtabCommand {
                symoff: 0x40,
                nsyms: 1,
                stroff: 0x60,
                strsize: 7,
            }),
        )];

        let resolved = run(&image, records).unwrap();
        match &resolved[0].payloads[0] {
            DeferredPayload::Symbols(table) => {
                assert_eq!(table.symbols.len(), 1);
                let sym = &table.symbols[0];
                assert_eq!(sym.name.as_deref(), Some("_main"));
                assert_eq!(sym.type_name(), "section");
                assert!(sym.is_external());
                assert_eq!(sym.n_value, 0x1_0000_3f00);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_data_in_code_entries() {
        let mut image = vec![0u8; 0x80];
        image[0x40..0x44].copy_from_slice(&0x100u32.to_le_bytes());
        image[0x44..0x46].copy_from_slice(&12u16.to_le_bytes());
        image[0x46..0x48].copy_from_slice(&4u16.to_le_bytes());
        let records = vec![record(0, linkedit(PayloadKind::DataInCode, 0x40, 8))];

        let resolved = run(&image, records).unwrap();
        match &resolved[0].payloads[0] {
            DeferredPayload::DataInCode(dic) => {
                assert_eq!(dic.entries.len(), 1);
                assert_eq!(dic.entries[0].kind_name(), "JUMP_TABLE32");
                assert_eq!(dic.entries[0].length, 12);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
