//! Records that point at payloads elsewhere in the image.
//!
//! These records carry image-relative `{offset, size}` pairs. Pass one only
//! reads the pairs; the payloads are resolved later by
//! [`crate::records::deferred`].

use serde::Serialize;

use crate::cursor::ByteCursor;
use crate::error::Result;
use crate::types::{ByteRange, Endianness, Node};

/// Kind of a deferred payload region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    CodeSignature,
    Symbols,
    Strings,
    FunctionStarts,
    DataInCode,
    ExportTrie,
    Rebase,
    Bind,
    WeakBind,
    LazyBind,
    SplitInfo,
    CodeSignDrs,
    OptimizationHints,
    ChainedFixups,
    AtomInfo,
    Note,
    Other,
}

impl PayloadKind {
    /// Payload kind referenced by a linkedit-data record tag.
    pub fn for_linkedit_tag(tag: u32) -> Self {
        use super::tags::*;
        match tag {
            LC_CODE_SIGNATURE => PayloadKind::CodeSignature,
            LC_SEGMENT_SPLIT_INFO => PayloadKind::SplitInfo,
            LC_FUNCTION_STARTS => PayloadKind::FunctionStarts,
            LC_DATA_IN_CODE => PayloadKind::DataInCode,
            LC_DYLIB_CODE_SIGN_DRS => PayloadKind::CodeSignDrs,
            LC_LINKER_OPTIMIZATION_HINT => PayloadKind::OptimizationHints,
            LC_DYLD_EXPORTS_TRIE => PayloadKind::ExportTrie,
            LC_DYLD_CHAINED_FIXUPS => PayloadKind::ChainedFixups,
            LC_ATOM_INFO => PayloadKind::AtomInfo,
            _ => PayloadKind::Other,
        }
    }
}

/// An image-relative `{offset, size}` pair awaiting pass two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeferredRef {
    pub kind: PayloadKind,
    pub offset: u64,
    pub size: u64,
}

/// `LC_SYMTAB`
#[derive(Debug, Clone, Serialize)]
pub struct SymtabCommand {
    pub symoff: u32,
    pub nsyms: u32,
    pub stroff: u32,
    pub strsize: u32,
}

/// Any record shaped as `linkedit_data_command`.
#[derive(Debug, Clone, Serialize)]
pub struct LinkeditDataCommand {
    pub kind: PayloadKind,
    pub dataoff: u32,
    pub datasize: u32,
}

/// `LC_DYLD_INFO` and `LC_DYLD_INFO_ONLY`
#[derive(Debug, Clone, Serialize)]
pub struct DyldInfoCommand {
    pub rebase_off: u32,
    pub rebase_size: u32,
    pub bind_off: u32,
    pub bind_size: u32,
    pub weak_bind_off: u32,
    pub weak_bind_size: u32,
    pub lazy_bind_off: u32,
    pub lazy_bind_size: u32,
    pub export_off: u32,
    pub export_size: u32,
}

/// `LC_NOTE`
#[derive(Debug, Clone, Serialize)]
pub struct NoteCommand {
    pub data_owner: String,
    pub offset: u64,
    pub size: u64,
}

impl SymtabCommand {
    pub fn decode(cursor: &mut ByteCursor<'_>, endian: Endianness) -> Result<Self> {
        cursor.skip(8)?;
        Ok(Self {
            symoff: cursor.read_u32(endian)?,
            nsyms: cursor.read_u32(endian)?,
            stroff: cursor.read_u32(endian)?,
            strsize: cursor.read_u32(endian)?,
        })
    }
}

impl LinkeditDataCommand {
    pub fn decode(cursor: &mut ByteCursor<'_>, tag: u32, endian: Endianness) -> Result<Self> {
        cursor.skip(8)?;
        Ok(Self {
            kind: PayloadKind::for_linkedit_tag(tag),
            dataoff: cursor.read_u32(endian)?,
            datasize: cursor.read_u32(endian)?,
        })
    }

    pub fn deferred(&self) -> DeferredRef {
        DeferredRef {
            kind: self.kind,
            offset: u64::from(self.dataoff),
            size: u64::from(self.datasize),
        }
    }
}

impl DyldInfoCommand {
    pub fn decode(cursor: &mut ByteCursor<'_>, endian: Endianness) -> Result<Self> {
        cursor.skip(8)?;
        Ok(Self {
            rebase_off: cursor.read_u32(endian)?,
            rebase_size: cursor.read_u32(endian)?,
            bind_off: cursor.read_u32(endian)?,
            bind_size: cursor.read_u32(endian)?,
            weak_bind_off: cursor.read_u32(endian)?,
            weak_bind_size: cursor.read_u32(endian)?,
            lazy_bind_off: cursor.read_u32(endian)?,
            lazy_bind_size: cursor.read_u32(endian)?,
            export_off: cursor.read_u32(endian)?,
            export_size: cursor.read_u32(endian)?,
        })
    }

    pub fn deferred(&self) -> [DeferredRef; 5] {
        let r = |kind, offset: u32, size: u32| DeferredRef {
            kind,
            offset: u64::from(offset),
            size: u64::from(size),
        };
        [
            r(PayloadKind::Rebase, self.rebase_off, self.rebase_size),
            r(PayloadKind::Bind, self.bind_off, self.bind_size),
            r(PayloadKind::WeakBind, self.weak_bind_off, self.weak_bind_size),
            r(PayloadKind::LazyBind, self.lazy_bind_off, self.lazy_bind_size),
            r(PayloadKind::ExportTrie, self.export_off, self.export_size),
        ]
    }
}

impl NoteCommand {
    pub fn decode(cursor: &mut ByteCursor<'_>, endian: Endianness) -> Result<Self> {
        cursor.skip(8)?;
        Ok(Self {
            data_owner: cursor.read_fixed_str(16)?,
            offset: cursor.read_u64(endian)?,
            size: cursor.read_u64(endian)?,
        })
    }

    pub fn deferred(&self) -> DeferredRef {
        DeferredRef {
            kind: PayloadKind::Note,
            offset: self.offset,
            size: self.size,
        }
    }
}

fn region_node(label: &str, offset: u64, size: u64, range: ByteRange) -> Node {
    Node::leaf(label, format!("offset {offset:#x} size {size:#x}"), range)
}

impl SymtabCommand {
    pub(crate) fn to_node_at(&self, range: ByteRange) -> Node {
        Node::new("symtab", range)
            .child(region_node("symbols", self.symoff.into(), self.nsyms.into(), range))
            .child(region_node("strings", self.stroff.into(), self.strsize.into(), range))
    }
}

impl LinkeditDataCommand {
    pub(crate) fn to_node_at(&self, range: ByteRange) -> Node {
        region_node("linkedit_data", self.dataoff.into(), self.datasize.into(), range)
    }
}

impl DyldInfoCommand {
    pub(crate) fn to_node_at(&self, range: ByteRange) -> Node {
        let mut node = Node::new("dyld_info", range);
        for d in self.deferred() {
            node.push(region_node(&format!("{:?}", d.kind), d.offset, d.size, range));
        }
        node
    }
}

impl NoteCommand {
    pub(crate) fn to_node_at(&self, range: ByteRange) -> Node {
        Node::new("note", range)
            .with_value(&self.data_owner)
            .child(region_node("data", self.offset, self.size, range))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::tags::{LC_CODE_SIGNATURE, LC_FUNCTION_STARTS};

    #[test]
    fn test_linkedit_data_kinds() {
        let mut data = Vec::new();
        data.extend_from_slice(&LC_CODE_SIGNATURE.to_le_bytes());
        data.extend_from_slice(&16u32.to_le_bytes());
        data.extend_from_slice(&0x8000u32.to_le_bytes());
        data.extend_from_slice(&0x120u32.to_le_bytes());

        let mut c = ByteCursor::new(&data);
        let cmd = LinkeditDataCommand::decode(&mut c, LC_CODE_SIGNATURE, Endianness::Little).unwrap();
        assert_eq!(cmd.kind, PayloadKind::CodeSignature);
        assert_eq!(
            cmd.deferred(),
            DeferredRef {
                kind: PayloadKind::CodeSignature,
                offset: 0x8000,
                size: 0x120
            }
        );
        assert_eq!(PayloadKind::for_linkedit_tag(LC_FUNCTION_STARTS), PayloadKind::FunctionStarts);
        assert_eq!(PayloadKind::for_linkedit_tag(0x7777), PayloadKind::Other);
    }

    #[test]
    fn test_dyld_info_regions() {
        let mut data = Vec::new();
        data.extend_from_slice(&0x80000022u32.to_be_bytes());
        data.extend_from_slice(&48u32.to_be_bytes());
        for v in 1u32..=10 {
            data.extend_from_slice(&v.to_be_bytes());
        }
        let mut c = ByteCursor::new(&data);
        let info = DyldInfoCommand::decode(&mut c, Endianness::Big).unwrap();
        let regions = info.deferred();
        assert_eq!(regions[4].kind, PayloadKind::ExportTrie);
        assert_eq!((regions[4].offset, regions[4].size), (9, 10));
    }
}
