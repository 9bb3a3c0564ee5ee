//! Built-in decoders for records that decode to a flat field list.
//!
//! Each decoder has the [`RecordDecoder`](super::RecordDecoder) signature
//! and is registered by [`DecoderRegistry::with_builtin`](super::DecoderRegistry::with_builtin).
//! The cursor a decoder receives covers exactly one record, header included,
//! so `lc_str` offsets are resolved against that same window.

use serde::Serialize;
use std::fmt;

use super::tags::*;
use super::{DecoderRegistry, RecordBody};
use crate::cursor::ByteCursor;
use crate::error::Result;
use crate::types::{ByteRange, Endianness, Introspect, Node};

/// A record decoded into named fields.
#[derive(Debug, Clone, Serialize)]
pub struct FlatRecord {
    pub name: String,
    pub fields: Vec<Field>,
}

impl FlatRecord {
    /// First field with the given name.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }
}

/// One named field with the bytes it was decoded from.
#[derive(Debug, Clone, Serialize)]
pub struct Field {
    pub name: String,
    pub value: FieldValue,
    pub range: ByteRange,
}

/// Typed value of a flat field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Int(u64),
    Hex(u64),
    /// `xxxx.yy.zz` nibble-packed version
    Version(u32),
    /// `a.b.c.d.e` packed source version
    SourceVersion(u64),
    Text(String),
    Uuid([u8; 16]),
    Platform(u32),
    Tool { tool: u32, version: u32 },
    Bytes(Vec<u8>),
}

/// Name of a `LC_BUILD_VERSION` platform.
pub fn platform_name(platform: u32) -> Option<&'static str> {
    Some(match platform {
        1 => "macOS",
        2 => "iOS",
        3 => "tvOS",
        4 => "watchOS",
        5 => "bridgeOS",
        6 => "macCatalyst",
        7 => "iOSSimulator",
        8 => "tvOSSimulator",
        9 => "watchOSSimulator",
        10 => "DriverKit",
        11 => "visionOS",
        12 => "visionOSSimulator",
        _ => return None,
    })
}

fn tool_name(tool: u32) -> Option<&'static str> {
    Some(match tool {
        1 => "clang",
        2 => "swift",
        3 => "ld",
        4 => "lld",
        _ => return None,
    })
}

fn fmt_version(v: u32) -> String {
    format!("{}.{}.{}", v >> 16, (v >> 8) & 0xff, v & 0xff)
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Hex(v) => write!(f, "{v:#x}"),
            FieldValue::Version(v) => f.write_str(&fmt_version(*v)),
            FieldValue::SourceVersion(v) => write!(
                f,
                "{}.{}.{}.{}.{}",
                v >> 40,
                (v >> 30) & 0x3ff,
                (v >> 20) & 0x3ff,
                (v >> 10) & 0x3ff,
                v & 0x3ff
            ),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Uuid(b) => {
                let h = hex::encode_upper(b);
                write!(f, "{}-{}-{}-{}-{}", &h[..8], &h[8..12], &h[12..16], &h[16..20], &h[20..])
            }
            FieldValue::Platform(p) => match platform_name(*p) {
                Some(name) => f.write_str(name),
                None => write!(f, "platform {p}"),
            },
            FieldValue::Tool { tool, version } => match tool_name(*tool) {
                Some(name) => write!(f, "{name} {}", fmt_version(*version)),
                None => write!(f, "tool {tool} {}", fmt_version(*version)),
            },
            FieldValue::Bytes(b) => f.write_str(&hex::encode(b)),
        }
    }
}

impl Introspect for FlatRecord {
    fn to_node(&self) -> Node {
        let start = self.fields.first().map(|f| f.range.start).unwrap_or_default();
        let end = self.fields.last().map(|f| f.range.end).unwrap_or(start);
        let mut node = Node::new(&self.name, ByteRange { start, end });
        for field in &self.fields {
            node.push(Node::leaf(&field.name, &field.value, field.range));
        }
        node
    }
}

/// Accumulates fields while reading one record.
struct FieldReader<'c, 'a> {
    record: ByteCursor<'a>,
    cursor: &'c mut ByteCursor<'a>,
    endian: Endianness,
    name: String,
    fields: Vec<Field>,
}

impl<'c, 'a> FieldReader<'c, 'a> {
    fn new(cursor: &'c mut ByteCursor<'a>, endian: Endianness) -> Result<Self> {
        let record = *cursor;
        let tag = cursor.read_u32(endian)?;
        cursor.skip(4)?;
        Ok(Self {
            record,
            cursor,
            endian,
            name: display_tag(tag),
            fields: Vec::new(),
        })
    }

    fn push(&mut self, name: &str, value: FieldValue, from: usize) {
        self.fields.push(Field {
            name: name.to_string(),
            value,
            range: self.cursor.range_from(from),
        });
    }

    fn u32(&mut self, name: &str, wrap: fn(u64) -> FieldValue) -> Result<u32> {
        let from = self.cursor.position();
        let v = self.cursor.read_u32(self.endian)?;
        self.push(name, wrap(u64::from(v)), from);
        Ok(v)
    }

    fn u64(&mut self, name: &str, wrap: fn(u64) -> FieldValue) -> Result<u64> {
        let from = self.cursor.position();
        let v = self.cursor.read_u64(self.endian)?;
        self.push(name, wrap(v), from);
        Ok(v)
    }

    fn version(&mut self, name: &str) -> Result<()> {
        let from = self.cursor.position();
        let v = self.cursor.read_u32(self.endian)?;
        self.push(name, FieldValue::Version(v), from);
        Ok(())
    }

    /// An `lc_str`: a u32 offset from the record start to a NUL-terminated string.
    fn lc_str(&mut self, name: &str) -> Result<()> {
        let offset = self.cursor.read_u32(self.endian)? as usize;
        let mut text = self.record.view_from(offset)?;
        let from = text.position();
        let s = text.read_fixed_str(text.remaining())?;
        self.fields.push(Field {
            name: name.to_string(),
            value: FieldValue::Text(s),
            range: text.range_from(from),
        });
        Ok(())
    }

    fn finish(self) -> RecordBody {
        RecordBody::Flat(FlatRecord {
            name: self.name,
            fields: self.fields,
        })
    }
}

fn int(v: u64) -> FieldValue {
    FieldValue::Int(v)
}

fn hex_value(v: u64) -> FieldValue {
    FieldValue::Hex(v)
}

pub fn decode_uuid(cursor: &mut ByteCursor<'_>, endian: Endianness) -> Result<RecordBody> {
    let mut r = FieldReader::new(cursor, endian)?;
    let from = r.cursor.position();
    let uuid = r.cursor.read_array::<16>()?;
    r.push("uuid", FieldValue::Uuid(uuid), from);
    Ok(r.finish())
}

pub fn decode_version_min(cursor: &mut ByteCursor<'_>, endian: Endianness) -> Result<RecordBody> {
    let mut r = FieldReader::new(cursor, endian)?;
    r.version("version")?;
    r.version("sdk")?;
    Ok(r.finish())
}

pub fn decode_build_version(cursor: &mut ByteCursor<'_>, endian: Endianness) -> Result<RecordBody> {
    let mut r = FieldReader::new(cursor, endian)?;
    r.u32("platform", |v| FieldValue::Platform(v as u32))?;
    r.version("minos")?;
    r.version("sdk")?;
    let ntools = r.u32("ntools", int)?;
    for _ in 0..ntools {
        let from = r.cursor.position();
        let tool = r.cursor.read_u32(endian)?;
        let version = r.cursor.read_u32(endian)?;
        r.push("tool", FieldValue::Tool { tool, version }, from);
    }
    Ok(r.finish())
}

pub fn decode_source_version(cursor: &mut ByteCursor<'_>, endian: Endianness) -> Result<RecordBody> {
    let mut r = FieldReader::new(cursor, endian)?;
    r.u64("version", FieldValue::SourceVersion)?;
    Ok(r.finish())
}

pub fn decode_dylib(cursor: &mut ByteCursor<'_>, endian: Endianness) -> Result<RecordBody> {
    let mut r = FieldReader::new(cursor, endian)?;
    r.lc_str("name")?;
    r.u32("timestamp", int)?;
    r.version("current_version")?;
    r.version("compatibility_version")?;
    Ok(r.finish())
}

/// Records whose only payload is one `lc_str` (dylinker, rpath, sub_*).
pub fn decode_name(cursor: &mut ByteCursor<'_>, endian: Endianness) -> Result<RecordBody> {
    let mut r = FieldReader::new(cursor, endian)?;
    r.lc_str("name")?;
    Ok(r.finish())
}

pub fn decode_entry_point(cursor: &mut ByteCursor<'_>, endian: Endianness) -> Result<RecordBody> {
    let mut r = FieldReader::new(cursor, endian)?;
    r.u64("entryoff", hex_value)?;
    r.u64("stacksize", int)?;
    Ok(r.finish())
}

pub fn decode_encryption_info(cursor: &mut ByteCursor<'_>, endian: Endianness) -> Result<RecordBody> {
    let mut r = FieldReader::new(cursor, endian)?;
    r.u32("cryptoff", hex_value)?;
    r.u32("cryptsize", hex_value)?;
    r.u32("cryptid", int)?;
    Ok(r.finish())
}

pub fn decode_dysymtab(cursor: &mut ByteCursor<'_>, endian: Endianness) -> Result<RecordBody> {
    const NAMES: [&str; 18] = [
        "ilocalsym",
        "nlocalsym",
        "iextdefsym",
        "nextdefsym",
        "iundefsym",
        "nundefsym",
        "tocoff",
        "ntoc",
        "modtaboff",
        "nmodtab",
        "extrefsymoff",
        "nextrefsyms",
        "indirectsymoff",
        "nindirectsyms",
        "extreloff",
        "nextrel",
        "locreloff",
        "nlocrel",
    ];
    let mut r = FieldReader::new(cursor, endian)?;
    for name in NAMES {
        if name.ends_with("off") {
            r.u32(name, hex_value)?;
        } else {
            r.u32(name, int)?;
        }
    }
    Ok(r.finish())
}

pub fn decode_linker_option(cursor: &mut ByteCursor<'_>, endian: Endianness) -> Result<RecordBody> {
    let mut r = FieldReader::new(cursor, endian)?;
    let count = r.u32("count", int)?;
    for _ in 0..count {
        let from = r.cursor.position();
        let option = r.cursor.read_cstr()?;
        r.push("option", FieldValue::Text(option), from);
    }
    Ok(r.finish())
}

/// `LC_THREAD` / `LC_UNIXTHREAD`: `{flavor, count, state[count]}` until the record ends.
pub fn decode_thread(cursor: &mut ByteCursor<'_>, endian: Endianness) -> Result<RecordBody> {
    let mut r = FieldReader::new(cursor, endian)?;
    while r.cursor.remaining() >= 8 {
        r.u32("flavor", int)?;
        let count = r.cursor.read_u32(endian)? as usize;
        let from = r.cursor.position();
        let state = r.cursor.read_bytes(count.saturating_mul(4))?;
        r.push("state", FieldValue::Bytes(state.to_vec()), from);
    }
    Ok(r.finish())
}

pub fn decode_fileset_entry(cursor: &mut ByteCursor<'_>, endian: Endianness) -> Result<RecordBody> {
    let mut r = FieldReader::new(cursor, endian)?;
    r.u64("vmaddr", hex_value)?;
    r.u64("fileoff", hex_value)?;
    r.lc_str("entry_id")?;
    Ok(r.finish())
}

pub(super) fn register_builtin(registry: &mut DecoderRegistry) {
    registry.register(LC_UUID, decode_uuid);
    for tag in [
        LC_VERSION_MIN_MACOSX,
        LC_VERSION_MIN_IPHONEOS,
        LC_VERSION_MIN_TVOS,
        LC_VERSION_MIN_WATCHOS,
    ] {
        registry.register(tag, decode_version_min);
    }
    registry.register(LC_BUILD_VERSION, decode_build_version);
    registry.register(LC_SOURCE_VERSION, decode_source_version);
    for tag in [
        LC_LOAD_DYLIB,
        LC_ID_DYLIB,
        LC_LOAD_WEAK_DYLIB,
        LC_REEXPORT_DYLIB,
        LC_LAZY_LOAD_DYLIB,
        LC_LOAD_UPWARD_DYLIB,
    ] {
        registry.register(tag, decode_dylib);
    }
    for tag in [
        LC_LOAD_DYLINKER,
        LC_ID_DYLINKER,
        LC_DYLD_ENVIRONMENT,
        LC_RPATH,
        LC_SUB_FRAMEWORK,
        LC_SUB_UMBRELLA,
        LC_SUB_CLIENT,
        LC_SUB_LIBRARY,
    ] {
        registry.register(tag, decode_name);
    }
    registry.register(LC_MAIN, decode_entry_point);
    registry.register(LC_ENCRYPTION_INFO, decode_encryption_info);
    registry.register(LC_ENCRYPTION_INFO_64, decode_encryption_info);
    registry.register(LC_DYSYMTAB, decode_dysymtab);
    registry.register(LC_LINKER_OPTION, decode_linker_option);
    registry.register(LC_THREAD, decode_thread);
    registry.register(LC_UNIXTHREAD, decode_thread);
    registry.register(LC_FILESET_ENTRY, decode_fileset_entry);
}
