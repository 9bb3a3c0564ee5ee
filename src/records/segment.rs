//! Segment records (`LC_SEGMENT`, `LC_SEGMENT_64`) and their sections.

use serde::Serialize;

use crate::cursor::ByteCursor;
use crate::error::{DecodeError, Result};
use crate::types::{ByteRange, Endianness, Introspect, Node, Width};

/// Section type mask within `Section::flags`.
pub const SECTION_TYPE_MASK: u32 = 0x0000_00ff;

/// One segment and the sections it declares.
#[derive(Debug, Clone, Serialize)]
pub struct Segment {
    /// Segment name (`__TEXT`, `__LINKEDIT`, ...)
    pub name: String,
    /// Layout the record was written with
    pub width: Width,
    pub vmaddr: u64,
    pub vmsize: u64,
    /// Image-relative file offset
    pub fileoff: u64,
    pub filesize: u64,
    pub maxprot: u32,
    pub initprot: u32,
    pub flags: u32,
    pub sections: Vec<Section>,
    pub range: ByteRange,
}

/// One section header inside a segment record.
#[derive(Debug, Clone, Serialize)]
pub struct Section {
    pub name: String,
    pub segment_name: String,
    pub addr: u64,
    pub size: u64,
    /// Image-relative file offset
    pub offset: u32,
    /// Alignment as a power of two
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    pub flags: u32,
    pub reserved1: u32,
    pub reserved2: u32,
    /// Only present in the 64-bit layout
    pub reserved3: Option<u32>,
    pub range: ByteRange,
}

impl Section {
    /// Size of one section header for a given layout.
    pub fn header_size(width: Width) -> usize {
        match width {
            Width::Bits32 => 68,
            Width::Bits64 => 80,
        }
    }

    /// Name of the section type encoded in the low flag byte.
    pub fn type_name(&self) -> &'static str {
        match self.flags & SECTION_TYPE_MASK {
            0x00 => "S_REGULAR",
            0x01 => "S_ZEROFILL",
            0x02 => "S_CSTRING_LITERALS",
            0x03 => "S_4BYTE_LITERALS",
            0x04 => "S_8BYTE_LITERALS",
            0x05 => "S_LITERAL_POINTERS",
            0x06 => "S_NON_LAZY_SYMBOL_POINTERS",
            0x07 => "S_LAZY_SYMBOL_POINTERS",
            0x08 => "S_SYMBOL_STUBS",
            0x09 => "S_MOD_INIT_FUNC_POINTERS",
            0x0a => "S_MOD_TERM_FUNC_POINTERS",
            0x0b => "S_COALESCED",
            0x0c => "S_GB_ZEROFILL",
            0x0d => "S_INTERPOSING",
            0x0e => "S_16BYTE_LITERALS",
            0x0f => "S_DTRACE_DOF",
            0x10 => "S_LAZY_DYLIB_SYMBOL_POINTERS",
            0x11 => "S_THREAD_LOCAL_REGULAR",
            0x12 => "S_THREAD_LOCAL_ZEROFILL",
            0x13 => "S_THREAD_LOCAL_VARIABLES",
            0x14 => "S_THREAD_LOCAL_VARIABLE_POINTERS",
            0x15 => "S_THREAD_LOCAL_INIT_FUNCTION_POINTERS",
            0x16 => "S_INIT_FUNC_OFFSETS",
            _ => "S_UNKNOWN",
        }
    }
}

/// Render a VM protection value as `rwx`.
pub fn protection_string(prot: u32) -> String {
    let mut s = String::with_capacity(3);
    s.push(if prot & 0x1 != 0 { 'r' } else { '-' });
    s.push(if prot & 0x2 != 0 { 'w' } else { '-' });
    s.push(if prot & 0x4 != 0 { 'x' } else { '-' });
    s
}

/// Decode a segment record. The cursor covers exactly the record, header included.
pub fn decode_segment(cursor: &mut ByteCursor<'_>, width: Width, endian: Endianness) -> Result<Segment> {
    let range = cursor.range();
    cursor.skip(8)?;
    let name = cursor.read_fixed_str(16)?;
    let vmaddr = cursor.read_word(width, endian)?;
    let vmsize = cursor.read_word(width, endian)?;
    let fileoff = cursor.read_word(width, endian)?;
    let filesize = cursor.read_word(width, endian)?;
    let maxprot = cursor.read_u32(endian)?;
    let initprot = cursor.read_u32(endian)?;
    let nsects = cursor.read_u32(endian)? as usize;
    let flags = cursor.read_u32(endian)?;

    let section_size = Section::header_size(width);
    let needed = nsects.checked_mul(section_size).ok_or_else(|| {
        DecodeError::malformed(cursor.position(), format!("section count {nsects} overflows"))
    })?;
    if needed > cursor.remaining() {
        return Err(DecodeError::Bounds {
            offset: cursor.position(),
            requested: needed,
            available: cursor.remaining(),
        });
    }

    let mut sections = Vec::with_capacity(nsects);
    for _ in 0..nsects {
        let mut sc = cursor.slice(section_size)?;
        sections.push(decode_section(&mut sc, width, endian)?);
    }

    Ok(Segment {
        name,
        width,
        vmaddr,
        vmsize,
        fileoff,
        filesize,
        maxprot,
        initprot,
        flags,
        sections,
        range,
    })
}

fn decode_section(cursor: &mut ByteCursor<'_>, width: Width, endian: Endianness) -> Result<Section> {
    let range = cursor.range();
    Ok(Section {
        name: cursor.read_fixed_str(16)?,
        segment_name: cursor.read_fixed_str(16)?,
        addr: cursor.read_word(width, endian)?,
        size: cursor.read_word(width, endian)?,
        offset: cursor.read_u32(endian)?,
        align: cursor.read_u32(endian)?,
        reloff: cursor.read_u32(endian)?,
        nreloc: cursor.read_u32(endian)?,
        flags: cursor.read_u32(endian)?,
        reserved1: cursor.read_u32(endian)?,
        reserved2: cursor.read_u32(endian)?,
        reserved3: match width {
            Width::Bits32 => None,
            Width::Bits64 => Some(cursor.read_u32(endian)?),
        },
        range,
    })
}

impl Introspect for Segment {
    fn to_node(&self) -> Node {
        let r = self.range;
        let mut node = Node::new("segment", r).with_value(&self.name);
        node.push(Node::leaf("vmaddr", format!("{:#x}", self.vmaddr), r));
        node.push(Node::leaf("vmsize", format!("{:#x}", self.vmsize), r));
        node.push(Node::leaf("fileoff", format!("{:#x}", self.fileoff), r));
        node.push(Node::leaf("filesize", format!("{:#x}", self.filesize), r));
        node.push(Node::leaf(
            "protection",
            format!("{}/{}", protection_string(self.initprot), protection_string(self.maxprot)),
            r,
        ));
        for section in &self.sections {
            node.push(section.to_node());
        }
        node
    }
}

impl Introspect for Section {
    fn to_node(&self) -> Node {
        Node::new("section", self.range)
            .with_value(format!("{},{}", self.segment_name, self.name))
            .child(Node::leaf("addr", format!("{:#x}", self.addr), self.range))
            .child(Node::leaf("size", format!("{:#x}", self.size), self.range))
            .child(Node::leaf("offset", format!("{:#x}", self.offset), self.range))
            .child(Node::leaf("type", self.type_name(), self.range))
    }
}
