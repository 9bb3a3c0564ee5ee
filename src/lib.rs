//! Mach-O Inspect - Defensive Structural Decoder for Mach-O Files
//!
//! This library decodes Mach-O images and fat containers into an immutable,
//! fully bounds-checked model, including the embedded code signature.
//! Inputs are treated as untrusted: every read goes through a bounded
//! cursor, and every count or size field is checked against a configurable
//! cap before it drives a loop or an allocation.
//!
//! # Features
//!
//! - **Containers**: 32/64-bit images in either byte order, fat containers
//!   with 32- or 64-bit entries
//! - **Records**: two-pass load-command decoding with a pluggable decoder
//!   registry and deferred payload resolution (symbols, function starts,
//!   export trie, code signature)
//! - **Code signing**: super-blobs, version-gated code directories,
//!   requirement expressions rendered as text, CMS signer extraction,
//!   XML and DER entitlements
//! - **Introspection**: every decoded structure renders to a
//!   `{label, value, range, children}` tree with absolute byte ranges
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use macho_inspect::{decode_file, Introspect};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let file = decode_file("path/to/binary")?;
//!     for image in file.images() {
//!         println!("{}: {} records", image.arch(), image.records.len());
//!         if let Some(cd) = image.code_directory() {
//!             println!("  signed as {}", cd.identifier);
//!         }
//!     }
//!     println!("{}", file.to_node().render());
//!     Ok(())
//! }
//! ```
//!
//! # Custom record decoders
//!
//! ```rust
//! use macho_inspect::records::{RecordBody, UnknownRecord};
//! use macho_inspect::{ByteCursor, Decoder, Endianness};
//!
//! fn keep_raw(cursor: &mut ByteCursor<'_>, _: Endianness) -> macho_inspect::Result<RecordBody> {
//!     Ok(RecordBody::Unknown(UnknownRecord {
//!         raw: cursor.read_rest().to_vec(),
//!     }))
//! }
//!
//! let mut decoder = Decoder::new();
//! decoder.register_decoder(0x1b, keep_raw);
//! ```

#![deny(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::too_many_lines)]

pub mod codesign;
pub mod cursor;
pub mod error;
pub mod formats;
pub mod records;
pub mod types;

pub use codesign::{CodeDirectory, Entitlements, RequirementSet, SuperBlob};
pub use cursor::ByteCursor;
pub use error::{DecodeError, Result};
pub use formats::{detect_format, DetectedFormat, FatArchive, Image, MachFile};
pub use records::{DecoderRegistry, RecordDecoder};
pub use types::{ByteRange, DecodeOptions, Endianness, Introspect, Node, Width};

use std::path::Path;

/// Reusable decoder: options plus a record decoder registry.
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    options: DecodeOptions,
    registry: DecoderRegistry,
}

impl Decoder {
    /// Decoder with default options and the built-in record decoders.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: DecodeOptions) -> Self {
        Self {
            options,
            registry: DecoderRegistry::with_builtin(),
        }
    }

    /// Replace the record decoder registry.
    pub fn with_registry(mut self, registry: DecoderRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Install a decoder for `tag`, replacing any existing one.
    pub fn register_decoder(&mut self, tag: u32, decoder: RecordDecoder) -> Option<RecordDecoder> {
        self.registry.register(tag, decoder)
    }

    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    pub fn registry(&self) -> &DecoderRegistry {
        &self.registry
    }

    /// Decode a complete file held in memory.
    pub fn decode(&self, data: &[u8]) -> Result<MachFile> {
        formats::decode(data, &self.options, &self.registry)
    }

    /// Read and decode a file.
    pub fn decode_file<P: AsRef<Path>>(&self, path: P) -> Result<MachFile> {
        let data = std::fs::read(path)?;
        self.decode(&data)
    }
}

/// Decode a file by path with default options.
///
/// # Example
///
/// ```rust,no_run
/// use macho_inspect::decode_file;
///
/// let file = decode_file("/bin/ls")?;
/// println!("{} image(s)", file.images().len());
/// # Ok::<(), macho_inspect::DecodeError>(())
/// ```
pub fn decode_file<P: AsRef<Path>>(path: P) -> Result<MachFile> {
    Decoder::new().decode_file(path)
}

/// Decode bytes with default options.
pub fn decode_bytes(data: &[u8]) -> Result<MachFile> {
    decode_bytes_with_options(data, &DecodeOptions::new())
}

/// Decode bytes with custom options and the built-in record decoders.
///
/// ```rust
/// use macho_inspect::{decode_bytes_with_options, DecodeOptions};
///
/// let options = DecodeOptions::strict();
/// assert!(decode_bytes_with_options(b"not a mach-o", &options).is_err());
/// ```
pub fn decode_bytes_with_options(data: &[u8], options: &DecodeOptions) -> Result<MachFile> {
    formats::decode(data, options, &DecoderRegistry::with_builtin())
}

/// Get version information for this library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
