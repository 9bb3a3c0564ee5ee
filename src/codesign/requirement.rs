//! Requirement expression decoding and rendering.
//!
//! A requirement blob holds a linear opcode stream. Operators are prefix:
//! `and`/`or` are followed directly by their two operands and `not` by its
//! single operand, so the stream is decoded by recursive descent with an
//! explicit position. Rendering reproduces the requirement language text.

use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use tracing::debug;

use super::{expect_blob, magic, CS_ENDIAN};
use crate::cursor::ByteCursor;
use crate::error::{check_limit, DecodeError, Result};
use crate::types::{ByteRange, DecodeOptions, Introspect, Node};

/// Expression opcodes.
pub mod opcode {
    pub const FALSE: u32 = 0;
    pub const TRUE: u32 = 1;
    pub const IDENT: u32 = 2;
    pub const APPLE_ANCHOR: u32 = 3;
    pub const ANCHOR_HASH: u32 = 4;
    pub const INFO_KEY_VALUE: u32 = 5;
    pub const AND: u32 = 6;
    pub const OR: u32 = 7;
    pub const CD_HASH: u32 = 8;
    pub const NOT: u32 = 9;
    pub const INFO_KEY_FIELD: u32 = 10;
    pub const CERT_FIELD: u32 = 11;
    pub const TRUSTED_CERT: u32 = 12;
    pub const TRUSTED_CERTS: u32 = 13;
    pub const CERT_GENERIC: u32 = 14;
    pub const APPLE_GENERIC_ANCHOR: u32 = 15;
    pub const ENTITLEMENT_FIELD: u32 = 16;
    pub const CERT_POLICY: u32 = 17;
    pub const NAMED_ANCHOR: u32 = 18;
    pub const NAMED_CODE: u32 = 19;
    pub const PLATFORM: u32 = 20;
    pub const NOTARIZED: u32 = 21;
    pub const CERT_FIELD_DATE: u32 = 22;
    pub const LEGACY_DEV_ID: u32 = 23;

    pub const FLAG_MASK: u32 = 0xFF00_0000;
    /// Unknown opcode evaluates to false
    pub const GENERIC_FALSE: u32 = 0x8000_0000;
    /// Unknown opcode carries a length-prefixed operand and may be skipped
    pub const GENERIC_SKIP: u32 = 0x4000_0000;
}

/// Requirement types inside a requirement set.
pub mod kind {
    pub const HOST: u32 = 1;
    pub const GUEST: u32 = 2;
    pub const DESIGNATED: u32 = 3;
    pub const LIBRARY: u32 = 4;
    pub const PLUGIN: u32 = 5;

    pub fn name(req_type: u32) -> Option<&'static str> {
        Some(match req_type {
            HOST => "host",
            GUEST => "guest",
            DESIGNATED => "designated",
            LIBRARY => "library",
            PLUGIN => "plugin",
            _ => return None,
        })
    }
}

/// Requirement blob kind holding an opcode stream.
pub const EXPRESSION_FORM: u32 = 1;

/// Operand bytes, rendered as a quoted string when printable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data(pub Vec<u8>);

impl Data {
    fn printable(&self) -> Option<&str> {
        let s = std::str::from_utf8(&self.0).ok()?;
        s.bytes().all(|b| (0x20..0x7f).contains(&b)).then_some(s)
    }

    fn quoted(&self, leading_star: bool, trailing_star: bool) -> String {
        let lead = if leading_star { "*" } else { "" };
        let trail = if trailing_star { "*" } else { "" };
        match self.printable() {
            Some(s) => {
                let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
                format!("\"{lead}{escaped}{trail}\"")
            }
            None => format!("{lead}0x{}{trail}", hex::encode(&self.0)),
        }
    }

    /// Render as a hash literal (`H"..."`).
    fn hash_literal(&self) -> String {
        format!("H\"{}\"", hex::encode(&self.0))
    }

    /// Render as a dotted object identifier, falling back to hex when the
    /// bytes are not a complete BER arc sequence or an arc overflows 64 bits.
    fn oid(&self) -> String {
        // the last byte of every arc has the continuation bit clear
        let complete = self.0.last().is_some_and(|b| b & 0x80 == 0);
        let oid = der_parser::oid::Oid::new(Cow::Borrowed(self.0.as_slice()));
        let rendered = match oid.iter().filter(|_| complete) {
            Some(arcs) => arcs.map(|arc| arc.to_string()).collect::<Vec<_>>().join("."),
            None => format!("0x{}", hex::encode(&self.0)),
        };
        rendered
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.quoted(false, false))
    }
}

impl Serialize for Data {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.printable() {
            Some(s) => serializer.serialize_str(s),
            None => serializer.serialize_str(&hex::encode(&self.0)),
        }
    }
}

/// Comparison applied by field-matching opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOp {
    Exists,
    Equal,
    Contains,
    BeginsWith,
    EndsWith,
    LessThan,
    GreaterThan,
    LessEqual,
    GreaterEqual,
    On,
    Before,
    After,
    OnOrBefore,
    OnOrAfter,
    Absent,
}

impl MatchOp {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => MatchOp::Exists,
            1 => MatchOp::Equal,
            2 => MatchOp::Contains,
            3 => MatchOp::BeginsWith,
            4 => MatchOp::EndsWith,
            5 => MatchOp::LessThan,
            6 => MatchOp::GreaterThan,
            7 => MatchOp::LessEqual,
            8 => MatchOp::GreaterEqual,
            9 => MatchOp::On,
            10 => MatchOp::Before,
            11 => MatchOp::After,
            12 => MatchOp::OnOrBefore,
            13 => MatchOp::OnOrAfter,
            14 => MatchOp::Absent,
            _ => return None,
        })
    }

    fn is_date(self) -> bool {
        matches!(
            self,
            MatchOp::On | MatchOp::Before | MatchOp::After | MatchOp::OnOrBefore | MatchOp::OnOrAfter
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchValue {
    None,
    Data(Data),
    /// Seconds since 2001-01-01 00:00:00 UTC
    Timestamp(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    pub op: MatchOp,
    pub value: MatchValue,
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match &self.value {
            MatchValue::None => String::new(),
            MatchValue::Data(d) => match self.op {
                MatchOp::BeginsWith => d.quoted(false, true),
                MatchOp::EndsWith => d.quoted(true, false),
                _ => d.to_string(),
            },
            MatchValue::Timestamp(t) => format!("timestamp \"{t}\""),
        };
        match self.op {
            MatchOp::Exists => f.write_str(" /* exists */"),
            MatchOp::Absent => f.write_str(" absent"),
            MatchOp::Equal | MatchOp::BeginsWith | MatchOp::EndsWith | MatchOp::On => {
                write!(f, " = {value}")
            }
            MatchOp::Contains => write!(f, " ~ {value}"),
            MatchOp::LessThan | MatchOp::Before => write!(f, " < {value}"),
            MatchOp::GreaterThan | MatchOp::After => write!(f, " > {value}"),
            MatchOp::LessEqual | MatchOp::OnOrBefore => write!(f, " <= {value}"),
            MatchOp::GreaterEqual | MatchOp::OnOrAfter => write!(f, " >= {value}"),
        }
    }
}

/// One decoded opcode with its operands.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    False,
    True,
    Identifier { value: Data },
    AppleAnchor,
    AppleGenericAnchor,
    TrustedCerts,
    Notarized,
    LegacyDeveloperId,
    AnchorHash { slot: i32, hash: Data },
    InfoKeyValue { key: Data, value: Data },
    CdHash { hash: Data },
    InfoKeyField { key: Data, matcher: Match },
    EntitlementField { key: Data, matcher: Match },
    CertField { slot: i32, field: Data, matcher: Match },
    CertGeneric { slot: i32, oid: Data, matcher: Match },
    CertPolicy { slot: i32, oid: Data, matcher: Match },
    CertFieldDate { slot: i32, oid: Data, matcher: Match },
    TrustedCert { slot: i32 },
    NamedAnchor { name: Data },
    NamedCode { name: Data },
    Platform { platform: u32 },
    And { left: Box<Expr>, right: Box<Expr> },
    Or { left: Box<Expr>, right: Box<Expr> },
    Not { operand: Box<Expr> },
    /// Unknown opcode flagged as skippable
    Skipped { opcode: u32, data: Data },
}

/// An expression node and the bytes it was decoded from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expr {
    pub range: ByteRange,
    pub op: Op,
}

/// Syntactic position an expression is rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    Top,
    Or,
    And,
    /// Operand of `not`
    Primary,
}

fn cert_slot(slot: i32) -> String {
    match slot {
        0 => "leaf".to_string(),
        -1 => "root".to_string(),
        n => n.to_string(),
    }
}

impl Expr {
    fn render(&self, f: &mut fmt::Formatter<'_>, ctx: Context) -> fmt::Result {
        match &self.op {
            Op::And { left, right } => render_binary(f, ctx, Context::And, "and", left, right),
            Op::Or { left, right } => render_binary(f, ctx, Context::Or, "or", left, right),
            Op::Not { operand } => {
                f.write_str("! ")?;
                operand.render(f, Context::Primary)
            }
            Op::False => f.write_str("never"),
            Op::True => f.write_str("always"),
            Op::Identifier { value } => write!(f, "identifier {value}"),
            Op::AppleAnchor => f.write_str("anchor apple"),
            Op::AppleGenericAnchor => f.write_str("anchor apple generic"),
            Op::TrustedCerts => f.write_str("anchor trusted"),
            Op::Notarized => f.write_str("notarized"),
            Op::LegacyDeveloperId => f.write_str("legacy"),
            Op::AnchorHash { slot, hash } => {
                write!(f, "certificate {} = {}", cert_slot(*slot), hash.hash_literal())
            }
            Op::InfoKeyValue { key, value } => write!(f, "info[{}] = {value}", key_text(key)),
            Op::CdHash { hash } => write!(f, "cdhash {}", hash.hash_literal()),
            Op::InfoKeyField { key, matcher } => write!(f, "info[{}]{matcher}", key_text(key)),
            Op::EntitlementField { key, matcher } => write!(f, "entitlement[{key}]{matcher}"),
            Op::CertField { slot, field, matcher } => {
                write!(f, "certificate {}[{}]{matcher}", cert_slot(*slot), key_text(field))
            }
            Op::CertGeneric { slot, oid, matcher } => {
                write!(f, "certificate {}[field.{}]{matcher}", cert_slot(*slot), oid.oid())
            }
            Op::CertPolicy { slot, oid, matcher } => {
                write!(f, "certificate {}[policy.{}]{matcher}", cert_slot(*slot), oid.oid())
            }
            Op::CertFieldDate { slot, oid, matcher } => {
                write!(f, "certificate {}[timestamp.{}]{matcher}", cert_slot(*slot), oid.oid())
            }
            Op::TrustedCert { slot } => write!(f, "certificate {} trusted", cert_slot(*slot)),
            Op::NamedAnchor { name } => write!(f, "anchor apple {}", key_text(name)),
            Op::NamedCode { name } => write!(f, "({})", key_text(name)),
            Op::Platform { platform } => write!(f, "platform = {platform}"),
            Op::Skipped { opcode, .. } => write!(f, "/* opcode {opcode:#x} */"),
        }
    }

    pub fn label(&self) -> &'static str {
        match &self.op {
            Op::And { .. } => "and",
            Op::Or { .. } => "or",
            Op::Not { .. } => "not",
            Op::False => "false",
            Op::True => "true",
            Op::Identifier { .. } => "identifier",
            Op::AppleAnchor | Op::AppleGenericAnchor | Op::TrustedCerts | Op::NamedAnchor { .. } => "anchor",
            Op::Notarized => "notarized",
            Op::LegacyDeveloperId => "legacy",
            Op::AnchorHash { .. } => "anchor_hash",
            Op::InfoKeyValue { .. } | Op::InfoKeyField { .. } => "info",
            Op::CdHash { .. } => "cdhash",
            Op::EntitlementField { .. } => "entitlement",
            Op::CertField { .. }
            | Op::CertGeneric { .. }
            | Op::CertPolicy { .. }
            | Op::CertFieldDate { .. }
            | Op::TrustedCert { .. } => "certificate",
            Op::NamedCode { .. } => "named_code",
            Op::Platform { .. } => "platform",
            Op::Skipped { .. } => "skipped",
        }
    }

    fn to_node(&self) -> Node {
        let mut node = Node::leaf(self.label(), self, self.range);
        match &self.op {
            Op::And { left, right } | Op::Or { left, right } => {
                node.push(left.to_node());
                node.push(right.to_node());
            }
            Op::Not { operand } => node.push(operand.to_node()),
            _ => {}
        }
        node
    }
}

/// Keys and field names are written bare when printable.
fn key_text(data: &Data) -> String {
    match data.printable() {
        Some(s) if !s.is_empty() && !s.contains(|c: char| c == ' ' || c == '"' || c == ']') => s.to_string(),
        _ => data.to_string(),
    }
}

fn render_binary(
    f: &mut fmt::Formatter<'_>,
    ctx: Context,
    own: Context,
    word: &str,
    left: &Expr,
    right: &Expr,
) -> fmt::Result {
    let parenthesize = ctx != Context::Top && ctx != own;
    if parenthesize {
        f.write_str("(")?;
    }
    left.render(f, own)?;
    write!(f, " {word} ")?;
    right.render(f, own)?;
    if parenthesize {
        f.write_str(")")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, Context::Top)
    }
}

// =============================================================================
// Decoding
// =============================================================================

fn read_data(c: &mut ByteCursor<'_>) -> Result<Data> {
    Ok(Data(c.read_len_prefixed(CS_ENDIAN)?.to_vec()))
}

fn read_match(c: &mut ByteCursor<'_>) -> Result<Match> {
    let at = c.position();
    let raw = c.read_u32(CS_ENDIAN)?;
    let op = MatchOp::from_raw(raw).ok_or_else(|| DecodeError::MalformedExpression {
        offset: at,
        message: format!("unknown match operator {raw}"),
    })?;
    let value = match op {
        MatchOp::Exists | MatchOp::Absent => MatchValue::None,
        op if op.is_date() => MatchValue::Timestamp(f64::from_bits(c.read_u64(CS_ENDIAN)?)),
        _ => MatchValue::Data(read_data(c)?),
    };
    Ok(Match { op, value })
}

fn parse_expr(c: &mut ByteCursor<'_>, depth: usize, max_depth: usize) -> Result<Expr> {
    check_limit("requirement depth", depth as u64, max_depth)?;

    let start = c.position();
    let raw = c.read_u32(CS_ENDIAN)?;
    let op = match raw & !opcode::FLAG_MASK {
        opcode::FALSE => Op::False,
        opcode::TRUE => Op::True,
        opcode::IDENT => Op::Identifier { value: read_data(c)? },
        opcode::APPLE_ANCHOR => Op::AppleAnchor,
        opcode::ANCHOR_HASH => Op::AnchorHash {
            slot: c.read_i32(CS_ENDIAN)?,
            hash: read_data(c)?,
        },
        opcode::INFO_KEY_VALUE => Op::InfoKeyValue {
            key: read_data(c)?,
            value: read_data(c)?,
        },
        opcode::AND => Op::And {
            left: Box::new(parse_expr(c, depth + 1, max_depth)?),
            right: Box::new(parse_expr(c, depth + 1, max_depth)?),
        },
        opcode::OR => Op::Or {
            left: Box::new(parse_expr(c, depth + 1, max_depth)?),
            right: Box::new(parse_expr(c, depth + 1, max_depth)?),
        },
        opcode::CD_HASH => Op::CdHash { hash: read_data(c)? },
        opcode::NOT => Op::Not {
            operand: Box::new(parse_expr(c, depth + 1, max_depth)?),
        },
        opcode::INFO_KEY_FIELD => Op::InfoKeyField {
            key: read_data(c)?,
            matcher: read_match(c)?,
        },
        opcode::CERT_FIELD => Op::CertField {
            slot: c.read_i32(CS_ENDIAN)?,
            field: read_data(c)?,
            matcher: read_match(c)?,
        },
        opcode::TRUSTED_CERT => Op::TrustedCert {
            slot: c.read_i32(CS_ENDIAN)?,
        },
        opcode::TRUSTED_CERTS => Op::TrustedCerts,
        opcode::CERT_GENERIC => Op::CertGeneric {
            slot: c.read_i32(CS_ENDIAN)?,
            oid: read_data(c)?,
            matcher: read_match(c)?,
        },
        opcode::APPLE_GENERIC_ANCHOR => Op::AppleGenericAnchor,
        opcode::ENTITLEMENT_FIELD => Op::EntitlementField {
            key: read_data(c)?,
            matcher: read_match(c)?,
        },
        opcode::CERT_POLICY => Op::CertPolicy {
            slot: c.read_i32(CS_ENDIAN)?,
            oid: read_data(c)?,
            matcher: read_match(c)?,
        },
        opcode::NAMED_ANCHOR => Op::NamedAnchor { name: read_data(c)? },
        opcode::NAMED_CODE => Op::NamedCode { name: read_data(c)? },
        opcode::PLATFORM => Op::Platform {
            platform: c.read_u32(CS_ENDIAN)?,
        },
        opcode::NOTARIZED => Op::Notarized,
        opcode::CERT_FIELD_DATE => Op::CertFieldDate {
            slot: c.read_i32(CS_ENDIAN)?,
            oid: read_data(c)?,
            matcher: read_match(c)?,
        },
        opcode::LEGACY_DEV_ID => Op::LegacyDeveloperId,
        _ if raw & opcode::GENERIC_SKIP != 0 => Op::Skipped {
            opcode: raw,
            data: read_data(c)?,
        },
        _ => {
            return Err(DecodeError::MalformedExpression {
                offset: start,
                message: format!("unknown opcode {raw:#x}"),
            })
        }
    };
    Ok(Expr {
        range: c.range_from(start),
        op,
    })
}

/// A decoded expression and its canonical text.
#[derive(Debug, Clone, Serialize)]
pub struct RequirementExpression {
    pub text: String,
    pub root: Expr,
}

impl RequirementExpression {
    /// Decode the opcode stream at the cursor position.
    ///
    /// Operands that run past the end of the stream are reported as
    /// [`DecodeError::MalformedExpression`].
    pub fn parse(cursor: &mut ByteCursor<'_>, max_depth: usize) -> Result<Self> {
        let root = parse_expr(cursor, 0, max_depth).map_err(|err| match err {
            DecodeError::Bounds {
                offset,
                requested,
                available,
            } => DecodeError::MalformedExpression {
                offset,
                message: format!(
                    "operand needs {requested} bytes but the expression has {available} left"
                ),
            },
            other => other,
        })?;
        Ok(RequirementExpression {
            text: root.to_string(),
            root,
        })
    }
}

impl fmt::Display for RequirementExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// One requirement blob.
#[derive(Debug, Clone, Serialize)]
pub struct Requirement {
    pub range: ByteRange,
    /// Blob kind; only the expression form carries an opcode stream
    pub kind: u32,
    pub expression: Option<RequirementExpression>,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.expression {
            Some(expr) => f.write_str(&expr.text),
            None => write!(f, "/* requirement kind {} */", self.kind),
        }
    }
}

/// Decode a single requirement blob.
pub fn decode_requirement(blob: ByteCursor<'_>, options: &DecodeOptions) -> Result<Requirement> {
    let mut c = expect_blob(&blob, magic::REQUIREMENT)?;
    let range = c.range();
    let kind = c.read_u32(CS_ENDIAN)?;
    let expression = if kind == EXPRESSION_FORM {
        Some(RequirementExpression::parse(&mut c, options.max_requirement_depth)?)
    } else {
        debug!(kind, offset = range.start, "requirement is not in expression form");
        None
    };
    Ok(Requirement {
        range,
        kind,
        expression,
    })
}

/// One `{type, offset}` entry of a requirement set.
#[derive(Debug, Clone, Serialize)]
pub struct RequirementEntry {
    pub req_type: u32,
    pub offset: u32,
    pub requirement: Requirement,
}

impl RequirementEntry {
    pub fn type_name(&self) -> String {
        kind::name(self.req_type)
            .map(str::to_string)
            .unwrap_or_else(|| format!("type {}", self.req_type))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RequirementSet {
    pub range: ByteRange,
    pub entries: Vec<RequirementEntry>,
}

impl RequirementSet {
    pub fn get(&self, req_type: u32) -> Option<&Requirement> {
        self.entries
            .iter()
            .find(|e| e.req_type == req_type)
            .map(|e| &e.requirement)
    }

    pub fn designated(&self) -> Option<&Requirement> {
        self.get(kind::DESIGNATED)
    }

    /// One `type => expression` line per entry.
    pub fn text(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{} => {}", e.type_name(), e.requirement))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Decode a requirement set. `cursor` starts at the set and may extend past it.
pub fn decode_requirement_set(cursor: ByteCursor<'_>, options: &DecodeOptions) -> Result<RequirementSet> {
    let mut c = expect_blob(&cursor, magic::REQUIREMENT_SET)?;
    let set = c.view(0, c.len())?;
    let count = c.read_u32(CS_ENDIAN)?;
    check_limit("requirement set entries", u64::from(count), options.max_blob_count)?;

    let mut index = Vec::with_capacity(count as usize);
    for _ in 0..count {
        index.push((c.read_u32(CS_ENDIAN)?, c.read_u32(CS_ENDIAN)?));
    }

    let mut entries = Vec::with_capacity(index.len());
    for (req_type, offset) in index {
        let requirement = decode_requirement(set.view_from(offset as usize)?, options)?;
        entries.push(RequirementEntry {
            req_type,
            offset,
            requirement,
        });
    }
    Ok(RequirementSet {
        range: set.range(),
        entries,
    })
}

impl Introspect for Requirement {
    fn to_node(&self) -> Node {
        let mut node = Node::new("requirement", self.range).with_value(self);
        if let Some(expr) = &self.expression {
            node.push(expr.root.to_node());
        }
        node
    }
}

impl Introspect for RequirementSet {
    fn to_node(&self) -> Node {
        let mut node = Node::new("requirements", self.range).with_value(self.entries.len());
        for entry in &self.entries {
            let mut child = entry.requirement.to_node();
            child.label = entry.type_name();
            node.push(child);
        }
        node
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) fn op(code: u32) -> Vec<u8> {
        code.to_be_bytes().to_vec()
    }

    pub(crate) fn data(bytes: &[u8]) -> Vec<u8> {
        let mut out = (bytes.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(bytes);
        while out.len() % 4 != 0 {
            out.push(0);
        }
        out
    }

    pub(crate) fn ident(name: &str) -> Vec<u8> {
        [op(opcode::IDENT), data(name.as_bytes())].concat()
    }

    /// Wrap an opcode stream in an expression-form requirement blob.
    pub(crate) fn requirement_blob(expr: &[u8]) -> Vec<u8> {
        let mut out = magic::REQUIREMENT.to_be_bytes().to_vec();
        out.extend_from_slice(&(12 + expr.len() as u32).to_be_bytes());
        out.extend_from_slice(&EXPRESSION_FORM.to_be_bytes());
        out.extend_from_slice(expr);
        out
    }

    fn render(expr: &[u8]) -> Result<String> {
        let blob = requirement_blob(expr);
        let req = decode_requirement(ByteCursor::new(&blob), &DecodeOptions::new())?;
        Ok(req.to_string())
    }

    #[test]
    fn test_and_of_identifiers() {
        let expr = [op(opcode::AND), ident("A"), ident("B")].concat();
        assert_eq!(render(&expr).unwrap(), r#"identifier "A" and identifier "B""#);
    }

    #[test]
    fn test_and_nested_under_or() {
        let expr = [op(opcode::OR), op(opcode::AND), ident("A"), ident("B"), ident("C")].concat();
        assert_eq!(
            render(&expr).unwrap(),
            r#"(identifier "A" and identifier "B") or identifier "C""#
        );
    }

    #[test]
    fn test_or_nested_under_and() {
        let expr = [
            op(opcode::AND),
            ident("x"),
            op(opcode::OR),
            op(opcode::APPLE_ANCHOR),
            op(opcode::TRUSTED_CERTS),
        ]
        .concat();
        assert_eq!(
            render(&expr).unwrap(),
            r#"identifier "x" and (anchor apple or anchor trusted)"#
        );
    }

    #[test]
    fn test_same_operator_chain_is_flat() {
        let expr = [op(opcode::AND), op(opcode::AND), ident("A"), ident("B"), ident("C")].concat();
        assert_eq!(
            render(&expr).unwrap(),
            r#"identifier "A" and identifier "B" and identifier "C""#
        );
    }

    #[test]
    fn test_not_parenthesizes_compound_operand() {
        let expr = [op(opcode::NOT), op(opcode::OR), ident("A"), ident("B")].concat();
        assert_eq!(render(&expr).unwrap(), r#"! (identifier "A" or identifier "B")"#);

        let expr = [op(opcode::NOT), ident("A")].concat();
        assert_eq!(render(&expr).unwrap(), r#"! identifier "A""#);
    }

    #[test]
    fn test_certificate_matches() {
        let expr = [
            op(opcode::CERT_FIELD),
            0i32.to_be_bytes().to_vec(),
            data(b"subject.CN"),
            op(1),
            data(b"Apple Development"),
        ]
        .concat();
        assert_eq!(
            render(&expr).unwrap(),
            r#"certificate leaf[subject.CN] = "Apple Development""#
        );

        let oid = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x63, 0x64, 0x06, 0x02, 0x06];
        let expr = [op(opcode::CERT_GENERIC), 1i32.to_be_bytes().to_vec(), data(&oid), op(0)].concat();
        assert_eq!(
            render(&expr).unwrap(),
            "certificate 1[field.1.2.840.113635.100.6.2.6] /* exists */"
        );
    }

    #[test]
    fn test_malformed_oid_renders_as_hex() {
        let cases: [(&[u8], &str); 3] = [
            (&[0xff, 0xff], "certificate leaf[field.0xffff] /* exists */"),
            (&[0x2a, 0x86], "certificate leaf[field.0x2a86] /* exists */"),
            (&[], "certificate leaf[field.0x] /* exists */"),
        ];
        for (oid, expected) in cases {
            let expr = [op(opcode::CERT_GENERIC), 0i32.to_be_bytes().to_vec(), data(oid), op(0)].concat();
            assert_eq!(render(&expr).unwrap(), expected);
        }

        // a well-formed policy OID still renders dotted
        let expr = [op(opcode::CERT_POLICY), 0i32.to_be_bytes().to_vec(), data(&[0x2a, 0x03]), op(0)].concat();
        assert_eq!(render(&expr).unwrap(), "certificate leaf[policy.1.2.3] /* exists */");
    }

    #[test]
    fn test_anchor_hash_and_prefix_match() {
        let expr = [
            op(opcode::AND),
            op(opcode::ANCHOR_HASH),
            (-1i32).to_be_bytes().to_vec(),
            data(&[0xde, 0xad, 0xbe, 0xef]),
            op(opcode::INFO_KEY_FIELD),
            data(b"CFBundleVersion"),
            op(3),
            data(b"1."),
        ]
        .concat();
        assert_eq!(
            render(&expr).unwrap(),
            r#"certificate root = H"deadbeef" and info[CFBundleVersion] = "1.*""#
        );
    }

    #[test]
    fn test_truncated_operand() {
        let expr = [op(opcode::AND), ident("A")].concat();
        assert!(matches!(render(&expr), Err(DecodeError::MalformedExpression { .. })));

        let mut expr = ident("A");
        expr.truncate(6);
        assert!(matches!(render(&expr), Err(DecodeError::MalformedExpression { .. })));
    }

    #[test]
    fn test_unknown_opcode() {
        let err = render(&op(99)).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedExpression { offset: 12, .. }));

        let expr = [op(opcode::AND), op(opcode::GENERIC_SKIP | 99), data(b"xx"), ident("A")].concat();
        assert_eq!(render(&expr).unwrap(), r#"/* opcode 0x40000063 */ and identifier "A""#);
    }

    #[test]
    fn test_depth_limit() {
        let mut expr: Vec<u8> = Vec::new();
        for _ in 0..300 {
            expr.extend(op(opcode::NOT));
        }
        expr.extend(op(opcode::TRUE));
        assert!(matches!(
            render(&expr),
            Err(DecodeError::LimitExceeded { what: "requirement depth", .. })
        ));
    }

    #[test]
    fn test_requirement_set() {
        let req = requirement_blob(&ident("com.example.tool"));
        let mut set = magic::REQUIREMENT_SET.to_be_bytes().to_vec();
        set.extend_from_slice(&(20 + req.len() as u32).to_be_bytes());
        set.extend_from_slice(&1u32.to_be_bytes());
        set.extend_from_slice(&kind::DESIGNATED.to_be_bytes());
        set.extend_from_slice(&20u32.to_be_bytes());
        set.extend_from_slice(&req);

        let decoded = decode_requirement_set(ByteCursor::new(&set), &DecodeOptions::new()).unwrap();
        assert_eq!(decoded.text(), r#"designated => identifier "com.example.tool""#);
        assert_eq!(decoded.designated().unwrap().range, ByteRange::new(20, req.len()));
    }
}
