//! Export trie decoding.
//!
//! The trie is a prefix tree: each node holds an optional terminal payload
//! (flags, address and friends) followed by labelled edges to child nodes.
//! Child offsets are relative to the trie start and come from the file, so
//! the walk tracks visited nodes and depth instead of trusting them.

use serde::Serialize;
use std::collections::HashSet;

use crate::cursor::ByteCursor;
use crate::error::{DecodeError, Result};
use crate::types::{ByteRange, Introspect, Node};

pub const EXPORT_SYMBOL_FLAGS_KIND_MASK: u64 = 0x03;
pub const EXPORT_SYMBOL_FLAGS_KIND_REGULAR: u64 = 0x00;
pub const EXPORT_SYMBOL_FLAGS_KIND_THREAD_LOCAL: u64 = 0x01;
pub const EXPORT_SYMBOL_FLAGS_KIND_ABSOLUTE: u64 = 0x02;
pub const EXPORT_SYMBOL_FLAGS_WEAK_DEFINITION: u64 = 0x04;
pub const EXPORT_SYMBOL_FLAGS_REEXPORT: u64 = 0x08;
pub const EXPORT_SYMBOL_FLAGS_STUB_AND_RESOLVER: u64 = 0x10;

/// One exported symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Export {
    pub name: String,
    pub flags: u64,
    /// Image-relative address; absent for re-exports
    pub address: Option<u64>,
    /// Source dylib ordinal for re-exports
    pub reexport_ordinal: Option<u64>,
    /// Imported name when a re-export renames the symbol
    pub reexport_name: Option<String>,
    pub resolver: Option<u64>,
    /// Absolute offset of the terminal payload
    pub offset: usize,
}

impl Export {
    pub fn kind_name(&self) -> &'static str {
        match self.flags & EXPORT_SYMBOL_FLAGS_KIND_MASK {
            EXPORT_SYMBOL_FLAGS_KIND_REGULAR => "regular",
            EXPORT_SYMBOL_FLAGS_KIND_THREAD_LOCAL => "thread_local",
            EXPORT_SYMBOL_FLAGS_KIND_ABSOLUTE => "absolute",
            _ => "unknown",
        }
    }

    #[inline]
    pub fn is_reexport(&self) -> bool {
        self.flags & EXPORT_SYMBOL_FLAGS_REEXPORT != 0
    }

    #[inline]
    pub fn is_weak(&self) -> bool {
        self.flags & EXPORT_SYMBOL_FLAGS_WEAK_DEFINITION != 0
    }
}

/// All exports of one trie, in depth-first edge order.
#[derive(Debug, Clone, Serialize)]
pub struct ExportTrie {
    pub range: ByteRange,
    pub exports: Vec<Export>,
}

/// Walk a trie. `trie` covers exactly the trie bytes.
pub fn decode_export_trie(trie: ByteCursor<'_>, max_depth: usize) -> Result<ExportTrie> {
    let mut exports = Vec::new();
    if trie.is_empty() {
        return Ok(ExportTrie {
            range: trie.range(),
            exports,
        });
    }

    let mut visited = HashSet::new();
    let mut stack = vec![(0usize, String::new(), 0usize)];

    while let Some((node_offset, prefix, depth)) = stack.pop() {
        if depth > max_depth {
            return Err(DecodeError::LimitExceeded {
                what: "export trie depth",
                limit: max_depth,
                actual: depth as u64,
            });
        }
        if !visited.insert(node_offset) {
            return Err(DecodeError::malformed(
                trie.start() + node_offset,
                "export trie node reached twice",
            ));
        }

        let mut node = trie.view_from(node_offset)?;
        let terminal_size = node.read_uleb128()? as usize;
        if terminal_size > 0 {
            let mut terminal = node.slice(terminal_size)?;
            exports.push(decode_terminal(&mut terminal, &prefix)?);
        }

        if node.remaining() == 0 {
            continue;
        }
        let child_count = node.read_u8()?;
        let mut children = Vec::with_capacity(usize::from(child_count));
        for _ in 0..child_count {
            let label = node.read_cstr()?;
            let child_offset = node.read_uleb128()? as usize;
            children.push((child_offset, format!("{prefix}{label}"), depth + 1));
        }
        // Reverse so the first edge is walked first.
        stack.extend(children.into_iter().rev());
    }

    Ok(ExportTrie {
        range: trie.range(),
        exports,
    })
}

fn decode_terminal(terminal: &mut ByteCursor<'_>, name: &str) -> Result<Export> {
    let offset = terminal.position();
    let flags = terminal.read_uleb128()?;
    let mut export = Export {
        name: name.to_string(),
        flags,
        address: None,
        reexport_ordinal: None,
        reexport_name: None,
        resolver: None,
        offset,
    };

    if flags & EXPORT_SYMBOL_FLAGS_REEXPORT != 0 {
        export.reexport_ordinal = Some(terminal.read_uleb128()?);
        let imported = terminal.read_cstr()?;
        if !imported.is_empty() {
            export.reexport_name = Some(imported);
        }
    } else {
        export.address = Some(terminal.read_uleb128()?);
        if flags & EXPORT_SYMBOL_FLAGS_STUB_AND_RESOLVER != 0 {
            export.resolver = Some(terminal.read_uleb128()?);
        }
    }
    Ok(export)
}

impl Introspect for ExportTrie {
    fn to_node(&self) -> Node {
        let mut node = Node::new("exports", self.range).with_value(self.exports.len());
        for export in &self.exports {
            let value = match (export.address, &export.reexport_name) {
                (Some(addr), _) => format!("{addr:#x} {}", export.kind_name()),
                (None, Some(imported)) => format!("re-export of {imported}"),
                (None, None) => "re-export".to_string(),
            };
            node.push(Node::leaf(&export.name, value, ByteRange::new(export.offset, 0)));
        }
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Trie with `_main` at 0x1000 and `_foo` re-exported from ordinal 2.
    fn sample_trie() -> Vec<u8> {
        vec![
            // node 0: no terminal, one edge "_" -> 5
            0x00, 0x01, b'_', 0x00, 0x05,
            // node 5: no terminal, edges "main" -> 18, "foo" -> 23
            0x00, 0x02, b'm', b'a', b'i', b'n', 0x00, 0x12, b'f', b'o', b'o', 0x00, 0x17,
            // node 18: terminal {flags 0, addr 0x1000}, no children
            0x03, 0x00, 0x80, 0x20, 0x00,
            // node 23: terminal {flags reexport, ordinal 2, ""}, no children
            0x03, 0x08, 0x02, 0x00, 0x00,
        ]
    }

    #[test]
    fn test_walk_order_and_payloads() {
        let data = sample_trie();
        let trie = decode_export_trie(ByteCursor::new(&data), 16).unwrap();
        assert_eq!(trie.exports.len(), 2);

        assert_eq!(trie.exports[0].name, "_main");
        assert_eq!(trie.exports[0].address, Some(0x1000));
        assert_eq!(trie.exports[0].kind_name(), "regular");

        assert_eq!(trie.exports[1].name, "_foo");
        assert!(trie.exports[1].is_reexport());
        assert_eq!(trie.exports[1].reexport_ordinal, Some(2));
        assert_eq!(trie.exports[1].reexport_name, None);
    }

    #[test]
    fn test_cycle_rejected() {
        // node 0 has an edge back to itself
        let data = [0x00, 0x01, b'a', 0x00, 0x00];
        let err = decode_export_trie(ByteCursor::new(&data), 16).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { offset: 0, .. }));
    }

    #[test]
    fn test_depth_limit() {
        let data = sample_trie();
        let err = decode_export_trie(ByteCursor::new(&data), 1).unwrap_err();
        assert!(matches!(err, DecodeError::LimitExceeded { what: "export trie depth", .. }));
    }

    #[test]
    fn test_child_offset_out_of_range() {
        let data = [0x00, 0x01, b'a', 0x00, 0x40];
        assert!(decode_export_trie(ByteCursor::new(&data), 16).is_err());
    }
}
