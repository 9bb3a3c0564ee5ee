//! Core types shared by every decoder.
//!
//! This module defines byte ordering and word width, absolute byte ranges,
//! the decode options that carry resource caps, and the introspection tree
//! consumed by display layers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte ordering (endianness).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    /// Little-endian byte order.
    #[default]
    Little,
    /// Big-endian byte order.
    Big,
}

impl Endianness {
    /// The opposite byte order.
    pub fn swapped(self) -> Self {
        match self {
            Endianness::Little => Endianness::Big,
            Endianness::Big => Endianness::Little,
        }
    }
}

impl fmt::Display for Endianness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endianness::Little => write!(f, "little"),
            Endianness::Big => write!(f, "big"),
        }
    }
}

/// Header word width of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Width {
    /// 32-bit image (`mach_header`).
    Bits32,
    /// 64-bit image (`mach_header_64`).
    Bits64,
}

impl Width {
    /// Size in bytes of a pointer-sized field.
    pub fn word_size(self) -> usize {
        match self {
            Width::Bits32 => 4,
            Width::Bits64 => 8,
        }
    }

    /// Size in bytes of the image header.
    pub fn header_size(self) -> usize {
        match self {
            Width::Bits32 => 28,
            Width::Bits64 => 32,
        }
    }
}

impl fmt::Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Width::Bits32 => write!(f, "32-bit"),
            Width::Bits64 => write!(f, "64-bit"),
        }
    }
}

/// Half-open absolute byte range `[start, end)` within the decoded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ByteRange {
    /// First byte of the range.
    pub start: usize,
    /// One past the last byte of the range.
    pub end: usize,
}

impl ByteRange {
    /// Create a range from a start offset and a length.
    pub fn new(start: usize, len: usize) -> Self {
        Self {
            start,
            end: start.saturating_add(len),
        }
    }

    /// Length of the range in bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the range covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether two non-empty ranges share at least one byte.
    pub fn overlaps(&self, other: &ByteRange) -> bool {
        !self.is_empty() && !other.is_empty() && self.start < other.end && other.start < self.end
    }

    /// Whether `other` lies entirely inside this range.
    pub fn contains(&self, other: &ByteRange) -> bool {
        other.start >= self.start && other.end <= self.end
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}..{:#x}", self.start, self.end)
    }
}

/// Options for decoding behavior and resource caps.
///
/// Inputs are untrusted, so every count or size field is checked against
/// one of these caps before it drives an allocation or a loop.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Maximum number of records in one image
    pub max_records: usize,
    /// Maximum number of fat-archive entries
    pub max_fat_arches: usize,
    /// Maximum number of entries in one super-blob or requirement set
    pub max_blob_count: usize,
    /// Maximum super-blob nesting depth
    pub max_superblob_depth: usize,
    /// Maximum number of symbol-table entries
    pub max_symbols: usize,
    /// Maximum requirement expression nesting depth
    pub max_requirement_depth: usize,
    /// Maximum export-trie depth
    pub max_trie_depth: usize,
    /// Maximum nesting depth of entitlement dictionaries and arrays
    pub max_entitlement_depth: usize,
    /// Treat a record tag without a decoder as fatal
    pub strict_records: bool,
    /// Run pass two (deferred payload resolution)
    pub resolve_deferred: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self {
            max_records: 4096,
            max_fat_arches: 32,
            max_blob_count: 256,
            max_superblob_depth: 4,
            max_symbols: 4 * 1024 * 1024,
            max_requirement_depth: 256,
            max_trie_depth: 128,
            max_entitlement_depth: 32,
            strict_records: false,
            resolve_deferred: true,
        }
    }

    /// Options that reject anything the decoder does not fully understand.
    pub fn strict() -> Self {
        Self {
            strict_records: true,
            ..Self::new()
        }
    }

    /// Options for quick header-level inspection (no pass two, tight caps).
    pub fn lenient() -> Self {
        Self {
            max_records: 1024,
            max_blob_count: 64,
            max_symbols: 64 * 1024,
            resolve_deferred: false,
            ..Self::new()
        }
    }
}

/// Serialize raw bytes as a lowercase hex string.
pub(crate) fn serialize_hex<S>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&hex::encode(bytes))
}

// =============================================================================
// Introspection tree
// =============================================================================

/// One node of the introspection tree: `{label, value, range, children}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Short field or structure name
    pub label: String,
    /// Rendered value, if the node is a leaf or has a summary
    pub value: Option<String>,
    /// Absolute byte range the node was decoded from
    pub range: ByteRange,
    /// Child nodes
    pub children: Vec<Node>,
}

impl Node {
    /// Create a node without a value.
    pub fn new(label: impl Into<String>, range: ByteRange) -> Self {
        Self {
            label: label.into(),
            value: None,
            range,
            children: Vec::new(),
        }
    }

    /// Create a leaf node carrying a rendered value.
    pub fn leaf(label: impl Into<String>, value: impl fmt::Display, range: ByteRange) -> Self {
        Self {
            label: label.into(),
            value: Some(value.to_string()),
            range,
            children: Vec::new(),
        }
    }

    /// Attach a summary value.
    pub fn with_value(mut self, value: impl fmt::Display) -> Self {
        self.value = Some(value.to_string());
        self
    }

    /// Append a child node.
    pub fn push(&mut self, child: Node) {
        self.children.push(child);
    }

    /// Builder-style variant of [`Node::push`].
    pub fn child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    /// Find the first direct child with the given label.
    pub fn find(&self, label: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.label == label)
    }

    /// Render the tree as indented text, one node per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        use fmt::Write;
        let indent = "  ".repeat(depth);
        let _ = match &self.value {
            Some(v) => writeln!(out, "{indent}{}: {v}  [{}]", self.label, self.range),
            None => writeln!(out, "{indent}{}  [{}]", self.label, self.range),
        };
        for child in &self.children {
            child.render_into(out, depth + 1);
        }
    }
}

/// Decoded values that can describe themselves as an introspection tree.
pub trait Introspect {
    /// Build the introspection node for this value.
    fn to_node(&self) -> Node;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_range_overlap() {
        let a = ByteRange::new(0, 16);
        let b = ByteRange::new(8, 16);
        let c = ByteRange::new(16, 4);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(!a.overlaps(&ByteRange::new(4, 0)));
        assert!(a.contains(&ByteRange::new(4, 4)));
        assert_eq!(b.len(), 16);
    }

    #[test]
    fn test_options() {
        let default = DecodeOptions::new();
        let strict = DecodeOptions::strict();
        let lenient = DecodeOptions::lenient();

        assert!(!default.strict_records);
        assert!(strict.strict_records);
        assert!(!lenient.resolve_deferred);
        assert!(lenient.max_records < default.max_records);
    }

    #[test]
    fn test_node_render() {
        let node = Node::new("image", ByteRange::new(0, 32))
            .child(Node::leaf("magic", "0xfeedfacf", ByteRange::new(0, 4)));
        let text = node.render();
        assert!(text.starts_with("image  [0x0..0x20]"));
        assert!(text.contains("  magic: 0xfeedfacf  [0x0..0x4]"));
        assert!(node.find("magic").is_some());
    }

    #[test]
    fn test_width_sizes() {
        assert_eq!(Width::Bits32.header_size(), 28);
        assert_eq!(Width::Bits64.header_size(), 32);
        assert_eq!(Width::Bits64.word_size(), 8);
        assert_eq!(Endianness::Big.swapped(), Endianness::Little);
    }
}
