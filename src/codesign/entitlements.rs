//! Entitlement blobs.
//!
//! DER entitlements use a private schema:
//!
//! ```text
//! [APPLICATION 16] {
//!     version    INTEGER,
//!     dictionary [16] { SEQUENCE { key UTF8String, value } ... }
//! }
//! ```
//!
//! Values carry no type discriminant of their own; the wire tag decides.
//! Legacy entitlements are an XML property list and are converted into the
//! same value model.

use der_parser::ber::{parse_ber, BerObject, BerObjectContent, Class};
use serde::Serialize;
use std::fmt;

use super::{expect_blob, magic};
use crate::cursor::ByteCursor;
use crate::error::{check_limit, DecodeError, Result};
use crate::types::{serialize_hex, ByteRange, DecodeOptions, Introspect, Node};

/// Tag number shared by the root and by dictionaries.
const DICTIONARY_TAG: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementsFormat {
    Xml,
    Der,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EntitlementValue {
    Boolean(bool),
    Integer(i64),
    Real(f64),
    OctetString(#[serde(serialize_with = "serialize_hex")] Vec<u8>),
    Utf8String(String),
    DateTime(String),
    Dictionary(Vec<EntitlementEntry>),
    Array(Vec<EntitlementValue>),
    /// A node whose tag has no mapping
    Unrecognized {
        description: String,
        #[serde(serialize_with = "serialize_hex")]
        raw: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitlementEntry {
    pub key: String,
    pub value: EntitlementValue,
    /// The key/value pair in DER; the whole property list for XML
    pub range: ByteRange,
}

#[derive(Debug, Clone, Serialize)]
pub struct Entitlements {
    pub format: EntitlementsFormat,
    /// Schema version (DER only)
    pub version: Option<i64>,
    pub entries: Vec<EntitlementEntry>,
    pub range: ByteRange,
}

impl Entitlements {
    pub fn get(&self, key: &str) -> Option<&EntitlementValue> {
        self.entries.iter().find(|e| e.key == key).map(|e| &e.value)
    }

    /// Whether `key` is present and set to boolean true.
    pub fn is_enabled(&self, key: &str) -> bool {
        matches!(self.get(key), Some(EntitlementValue::Boolean(true)))
    }
}

impl fmt::Display for EntitlementValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntitlementValue::Boolean(b) => write!(f, "{b}"),
            EntitlementValue::Integer(i) => write!(f, "{i}"),
            EntitlementValue::Real(r) => write!(f, "{r}"),
            EntitlementValue::OctetString(bytes) => write!(f, "<{}>", hex::encode(bytes)),
            EntitlementValue::Utf8String(s) => write!(f, "{s:?}"),
            EntitlementValue::DateTime(t) => f.write_str(t),
            EntitlementValue::Dictionary(entries) => write!(f, "{{{} keys}}", entries.len()),
            EntitlementValue::Array(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            EntitlementValue::Unrecognized { description, .. } => write!(f, "<{description}>"),
        }
    }
}

// =============================================================================
// DER
// =============================================================================

fn der_error(offset: usize, message: impl fmt::Display) -> DecodeError {
    DecodeError::malformed(offset, format!("DER entitlements: {message}"))
}

/// Content bytes of a constructed non-universal element with the given class and tag.
fn tagged_content<'a>(obj: &BerObject<'a>, class: Class, tag: u32) -> Option<&'a [u8]> {
    if obj.header.class() != class || obj.header.tag().0 != tag {
        return None;
    }
    match &obj.content {
        BerObjectContent::Unknown(any) => Some(any.data),
        _ => None,
    }
}

struct DerWalker<'a> {
    /// The DER body; every parsed element borrows from it
    body: &'a [u8],
    /// Absolute offset of the DER body
    offset: usize,
    max_depth: usize,
}

impl<'a> DerWalker<'a> {
    /// Absolute range of `element`, a sub-slice of the body.
    fn range_of(&self, element: &[u8]) -> ByteRange {
        let relative = (element.as_ptr() as usize).saturating_sub(self.body.as_ptr() as usize);
        ByteRange::new(self.offset + relative, element.len())
    }

    fn dictionary(&self, mut data: &'a [u8], depth: usize) -> Result<Vec<EntitlementEntry>> {
        check_limit("entitlement depth", depth as u64, self.max_depth)?;
        let mut entries = Vec::new();
        while !data.is_empty() {
            let (rest, pair) = parse_ber(data).map_err(|e| der_error(self.offset, e))?;
            let range = self.range_of(&data[..data.len() - rest.len()]);
            data = rest;
            let parts = match &pair.content {
                BerObjectContent::Sequence(parts) if parts.len() == 2 => parts,
                _ => return Err(der_error(self.offset, "dictionary entry is not a key/value SEQUENCE")),
            };
            let key = match &parts[0].content {
                BerObjectContent::UTF8String(key) => key.to_string(),
                _ => return Err(der_error(self.offset, "dictionary key is not a UTF8String")),
            };
            let value = self.value(&parts[1], depth + 1)?;
            entries.push(EntitlementEntry { key, value, range });
        }
        Ok(entries)
    }

    fn value(&self, obj: &BerObject<'a>, depth: usize) -> Result<EntitlementValue> {
        check_limit("entitlement depth", depth as u64, self.max_depth)?;
        let value = match &obj.content {
            BerObjectContent::Boolean(b) => EntitlementValue::Boolean(*b),
            BerObjectContent::Integer(_) => match obj.as_i64() {
                Ok(i) => EntitlementValue::Integer(i),
                Err(_) => unrecognized(obj, "integer wider than 64 bits"),
            },
            BerObjectContent::OctetString(bytes) => EntitlementValue::OctetString(bytes.to_vec()),
            BerObjectContent::UTF8String(s) => EntitlementValue::Utf8String(s.to_string()),
            BerObjectContent::GeneralizedTime(t) => EntitlementValue::DateTime(t.to_string()),
            BerObjectContent::Sequence(items) => EntitlementValue::Array(
                items
                    .iter()
                    .map(|item| self.value(item, depth + 1))
                    .collect::<Result<_>>()?,
            ),
            _ => match tagged_content(obj, Class::ContextSpecific, DICTIONARY_TAG) {
                Some(data) => EntitlementValue::Dictionary(self.dictionary(data, depth + 1)?),
                None => unrecognized(obj, "unmapped tag"),
            },
        };
        Ok(value)
    }
}

fn unrecognized(obj: &BerObject<'_>, why: &str) -> EntitlementValue {
    let raw = match &obj.content {
        BerObjectContent::Unknown(any) => any.data.to_vec(),
        BerObjectContent::Integer(bytes) => bytes.to_vec(),
        _ => Vec::new(),
    };
    EntitlementValue::Unrecognized {
        description: format!("{why}: {:?} tag {}", obj.header.class(), obj.header.tag().0),
        raw,
    }
}

/// Decode a DER entitlements blob.
pub fn decode_der(blob: ByteCursor<'_>, options: &DecodeOptions) -> Result<Entitlements> {
    let mut c = expect_blob(&blob, magic::EMBEDDED_DER_ENTITLEMENTS)?;
    let range = c.view(0, c.len())?.range();
    let offset = c.position();
    let body = c.read_rest();

    let (_, root) = parse_ber(body).map_err(|e| der_error(offset, e))?;
    let mut content = tagged_content(&root, Class::Application, DICTIONARY_TAG)
        .ok_or_else(|| der_error(offset, "root is not [APPLICATION 16]"))?;

    let (rest, version) = parse_ber(content).map_err(|e| der_error(offset, e))?;
    let version = version
        .as_i64()
        .map_err(|_| der_error(offset, "version is not an INTEGER"))?;
    content = rest;

    let walker = DerWalker {
        body,
        offset,
        max_depth: options.max_entitlement_depth,
    };
    let entries = if content.is_empty() {
        Vec::new()
    } else {
        let (_, dict) = parse_ber(content).map_err(|e| der_error(offset, e))?;
        let data = tagged_content(&dict, Class::ContextSpecific, DICTIONARY_TAG)
            .ok_or_else(|| der_error(offset, "root does not hold a [16] dictionary"))?;
        walker.dictionary(data, 0)?
    };

    Ok(Entitlements {
        format: EntitlementsFormat::Der,
        version: Some(version),
        entries,
        range,
    })
}

// =============================================================================
// XML
// =============================================================================

fn from_plist(value: &plist::Value, range: ByteRange) -> EntitlementValue {
    use plist::Value;
    match value {
        Value::Boolean(b) => EntitlementValue::Boolean(*b),
        Value::Integer(i) => match i.as_signed() {
            Some(v) => EntitlementValue::Integer(v),
            None => EntitlementValue::Unrecognized {
                description: format!("integer {i}"),
                raw: Vec::new(),
            },
        },
        Value::Real(r) => EntitlementValue::Real(*r),
        Value::String(s) => EntitlementValue::Utf8String(s.clone()),
        Value::Data(d) => EntitlementValue::OctetString(d.clone()),
        Value::Date(d) => EntitlementValue::DateTime(d.to_xml_format()),
        Value::Array(items) => EntitlementValue::Array(items.iter().map(|v| from_plist(v, range)).collect()),
        Value::Dictionary(dict) => EntitlementValue::Dictionary(
            dict.iter()
                .map(|(key, value)| EntitlementEntry {
                    key: key.clone(),
                    value: from_plist(value, range),
                    range,
                })
                .collect(),
        ),
        other => EntitlementValue::Unrecognized {
            description: format!("{other:?}"),
            raw: Vec::new(),
        },
    }
}

/// Decode an XML (property list) entitlements blob.
pub fn decode_xml(blob: ByteCursor<'_>) -> Result<Entitlements> {
    let mut c = expect_blob(&blob, magic::EMBEDDED_ENTITLEMENTS)?;
    let range = c.view(0, c.len())?.range();
    let offset = c.position();
    let body = c.read_rest();
    let body_range = ByteRange::new(offset, body.len());

    let value = plist::Value::from_reader_xml(std::io::Cursor::new(body))?;
    let entries = match from_plist(&value, body_range) {
        EntitlementValue::Dictionary(entries) => entries,
        _ => {
            return Err(DecodeError::malformed(
                offset,
                "XML entitlements root is not a dictionary",
            ))
        }
    };
    Ok(Entitlements {
        format: EntitlementsFormat::Xml,
        version: None,
        entries,
        range,
    })
}

fn value_node(key: &str, value: &EntitlementValue, range: ByteRange) -> Node {
    let mut node = Node::leaf(key, value, range);
    match value {
        EntitlementValue::Dictionary(entries) => {
            for entry in entries {
                node.push(value_node(&entry.key, &entry.value, entry.range));
            }
        }
        EntitlementValue::Array(items) if items.iter().any(|v| matches!(v, EntitlementValue::Dictionary(_))) => {
            for (i, item) in items.iter().enumerate() {
                node.push(value_node(&format!("[{i}]"), item, range));
            }
        }
        _ => {}
    }
    node
}

impl Introspect for Entitlements {
    fn to_node(&self) -> Node {
        let label = match self.format {
            EntitlementsFormat::Xml => "entitlements",
            EntitlementsFormat::Der => "der_entitlements",
        };
        let mut node = Node::new(label, self.range).with_value(self.entries.len());
        for entry in &self.entries {
            node.push(value_node(&entry.key, &entry.value, entry.range));
        }
        node
    }
}
