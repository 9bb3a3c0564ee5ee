//! Code directory decoding.
//!
//! The code directory has a fixed 44-byte prefix followed by fields that
//! exist only from a given `version` onwards. Each threshold adds its fields
//! on top of the previous ones, so the set of present fields is a function
//! of the version alone.
//!
//! Hash slots come in two groups. Code slots are stored in ascending order at
//! `hashOffset`. Special slots are stored *before* `hashOffset` in descending
//! order (the slot furthest from `hashOffset` is the highest index), so they
//! are reversed after reading to give ascending indices starting at 1.

use bitflags::bitflags;
use serde::Serialize;
use std::fmt;

use super::{expect_blob, magic, CS_ENDIAN};
use crate::cursor::ByteCursor;
use crate::error::{DecodeError, Result};
use crate::types::{serialize_hex, ByteRange, Introspect, Node};

/// Size of the fixed code directory prefix.
pub const CODE_DIRECTORY_PREFIX_SIZE: usize = 44;

pub const CS_SUPPORTSSCATTER: u32 = 0x20100;
pub const CS_SUPPORTSTEAMID: u32 = 0x20200;
pub const CS_SUPPORTSCODELIMIT64: u32 = 0x20300;
pub const CS_SUPPORTSEXECSEG: u32 = 0x20400;
pub const CS_SUPPORTSRUNTIME: u32 = 0x20500;
pub const CS_SUPPORTSLINKAGE: u32 = 0x20600;

bitflags! {
    /// Code directory flags (`CS_*`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct CodeDirectoryFlags: u32 {
        const VALID = 0x0000_0001;
        const ADHOC = 0x0000_0002;
        const GET_TASK_ALLOW = 0x0000_0004;
        const INSTALLER = 0x0000_0008;
        const FORCED_LV = 0x0000_0010;
        const INVALID_ALLOWED = 0x0000_0020;
        const HARD = 0x0000_0100;
        const KILL = 0x0000_0200;
        const CHECK_EXPIRATION = 0x0000_0400;
        const RESTRICT = 0x0000_0800;
        const ENFORCEMENT = 0x0000_1000;
        const REQUIRE_LV = 0x0000_2000;
        const ENTITLEMENTS_VALIDATED = 0x0000_4000;
        const NVRAM_UNRESTRICTED = 0x0000_8000;
        /// Hardened runtime
        const RUNTIME = 0x0001_0000;
        const LINKER_SIGNED = 0x0002_0000;
    }
}

bitflags! {
    /// Executable segment flags (`CS_EXECSEG_*`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct ExecSegFlags: u64 {
        const MAIN_BINARY = 0x1;
        const ALLOW_UNSIGNED = 0x10;
        const DEBUGGER = 0x20;
        const JIT = 0x40;
        const SKIP_LV = 0x80;
        const CAN_LOAD_CDHASH = 0x100;
        const CAN_EXEC_CDHASH = 0x200;
    }
}

impl CodeDirectoryFlags {
    pub fn names(&self) -> Vec<&'static str> {
        self.iter_names().map(|(name, _)| name).collect()
    }
}

impl ExecSegFlags {
    pub fn names(&self) -> Vec<&'static str> {
        self.iter_names().map(|(name, _)| name).collect()
    }
}

/// Render the named bits of a flag set, plus any unnamed remainder.
fn flag_names<I: Iterator<Item = (&'static str, u64)>>(names: I, bits: u64) -> String {
    let mut known = 0u64;
    let mut parts: Vec<String> = names
        .map(|(name, value)| {
            known |= value;
            name.to_string()
        })
        .collect();
    let rest = bits & !known;
    if rest != 0 {
        parts.push(format!("{rest:#x}"));
    }
    if parts.is_empty() {
        "none".to_string()
    } else {
        parts.join(" | ")
    }
}

impl fmt::Display for CodeDirectoryFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.iter_names().map(|(n, v)| (n, u64::from(v.bits())));
        f.write_str(&flag_names(names, u64::from(self.bits())))
    }
}

impl fmt::Display for ExecSegFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.iter_names().map(|(n, v)| (n, v.bits()));
        f.write_str(&flag_names(names, self.bits()))
    }
}

/// Hash algorithm of a code directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HashType {
    None,
    Sha1,
    Sha256,
    Sha256Truncated,
    Sha384,
    Sha512,
    Unknown(u8),
}

impl From<u8> for HashType {
    fn from(v: u8) -> Self {
        match v {
            0 => HashType::None,
            1 => HashType::Sha1,
            2 => HashType::Sha256,
            3 => HashType::Sha256Truncated,
            4 => HashType::Sha384,
            5 => HashType::Sha512,
            other => HashType::Unknown(other),
        }
    }
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashType::None => f.write_str("none"),
            HashType::Sha1 => f.write_str("sha1"),
            HashType::Sha256 => f.write_str("sha256"),
            HashType::Sha256Truncated => f.write_str("sha256-truncated"),
            HashType::Sha384 => f.write_str("sha384"),
            HashType::Sha512 => f.write_str("sha512"),
            HashType::Unknown(v) => write!(f, "unknown({v})"),
        }
    }
}

/// A version-gated group of trailing fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionalField {
    ScatterOffset,
    TeamOffset,
    CodeLimit64,
    ExecSegment,
    Runtime,
    Linkage,
}

impl OptionalField {
    /// All groups in wire order.
    pub const ALL: [OptionalField; 6] = [
        OptionalField::ScatterOffset,
        OptionalField::TeamOffset,
        OptionalField::CodeLimit64,
        OptionalField::ExecSegment,
        OptionalField::Runtime,
        OptionalField::Linkage,
    ];

    /// First version that carries this group.
    pub fn min_version(self) -> u32 {
        match self {
            OptionalField::ScatterOffset => CS_SUPPORTSSCATTER,
            OptionalField::TeamOffset => CS_SUPPORTSTEAMID,
            OptionalField::CodeLimit64 => CS_SUPPORTSCODELIMIT64,
            OptionalField::ExecSegment => CS_SUPPORTSEXECSEG,
            OptionalField::Runtime => CS_SUPPORTSRUNTIME,
            OptionalField::Linkage => CS_SUPPORTSLINKAGE,
        }
    }

    /// Groups present in a code directory of `version`.
    pub fn present_in(version: u32) -> Vec<OptionalField> {
        Self::ALL
            .into_iter()
            .filter(|f| version >= f.min_version())
            .collect()
    }

    /// Smallest version whose presence list is exactly `fields`.
    ///
    /// Returns `None` when `fields` is not a prefix of [`OptionalField::ALL`],
    /// since no version skips a group.
    pub fn minimum_version(fields: &[OptionalField]) -> Option<u32> {
        if fields.len() > Self::ALL.len() || fields != &Self::ALL[..fields.len()] {
            return None;
        }
        Some(fields.last().map(|f| f.min_version()).unwrap_or(0x20001))
    }
}

/// One hash slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashSlot {
    /// Code slots count from 0; special slots from 1 (`Info`) upwards
    pub index: u32,
    #[serde(serialize_with = "serialize_hex")]
    pub hash: Vec<u8>,
    pub range: ByteRange,
}

impl HashSlot {
    /// Whether the slot holds the all-zero placeholder hash.
    pub fn is_empty(&self) -> bool {
        self.hash.iter().all(|b| *b == 0)
    }
}

/// Special slot names, indexed from 1.
pub fn special_slot_name(index: u32) -> Option<&'static str> {
    Some(match index {
        1 => "Info.plist",
        2 => "Requirements",
        3 => "CodeResources",
        4 => "Application",
        5 => "Entitlements",
        6 => "RepSpecific",
        7 => "EntitlementsDer",
        8 => "LaunchConstraintSelf",
        9 => "LaunchConstraintParent",
        10 => "LaunchConstraintResponsible",
        11 => "LibraryConstraint",
        _ => return None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecSegment {
    pub base: u64,
    pub limit: u64,
    pub flags: ExecSegFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeVersion {
    pub version: u32,
    pub pre_encrypt_offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Linkage {
    pub hash_type: u8,
    pub application_type: u8,
    pub application_subtype: u16,
    pub offset: u32,
    pub size: u32,
}

/// Absolute byte ranges of individual code directory fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldRanges {
    pub version: ByteRange,
    pub flags: ByteRange,
    pub hash_type: ByteRange,
    pub page_size: ByteRange,
    /// The 64-bit limit when set, otherwise the 32-bit one
    pub code_limit: ByteRange,
    /// String bytes without the terminating NUL
    pub identifier: ByteRange,
    pub team_id: Option<ByteRange>,
    pub exec_segment: Option<ByteRange>,
    pub runtime: Option<ByteRange>,
    pub special_slots: ByteRange,
    pub code_slots: ByteRange,
}

/// A decoded code directory.
#[derive(Debug, Clone, Serialize)]
pub struct CodeDirectory {
    pub range: ByteRange,
    pub fields: FieldRanges,
    pub version: u32,
    pub flags: CodeDirectoryFlags,
    pub hash_offset: u32,
    pub ident_offset: u32,
    pub special_slot_count: u32,
    pub code_slot_count: u32,
    pub code_limit: u32,
    pub hash_size: u8,
    pub hash_type: HashType,
    pub platform: u8,
    pub page_size_log2: u8,
    pub spare2: u32,
    pub scatter_offset: Option<u32>,
    pub team_offset: Option<u32>,
    pub code_limit_64: Option<u64>,
    pub exec_segment: Option<ExecSegment>,
    pub runtime: Option<RuntimeVersion>,
    pub linkage: Option<Linkage>,
    pub identifier: String,
    pub team_id: Option<String>,
    /// Ascending by index, starting at 1
    pub special_slots: Vec<HashSlot>,
    /// Ascending by index, starting at 0
    pub code_slots: Vec<HashSlot>,
}

impl CodeDirectory {
    /// Decode a code directory blob. `blob` covers exactly the blob.
    pub fn decode(blob: ByteCursor<'_>) -> Result<Self> {
        let mut c = expect_blob(&blob, magic::CODE_DIRECTORY)?;
        let blob = c.view(0, c.len())?;

        let mut fields = FieldRanges::default();
        let field = |c: &ByteCursor<'_>, len: usize| ByteRange::new(c.position(), len);

        fields.version = field(&c, 4);
        let version = c.read_u32(CS_ENDIAN)?;
        fields.flags = field(&c, 4);
        let flags = CodeDirectoryFlags::from_bits_retain(c.read_u32(CS_ENDIAN)?);
        let hash_offset = c.read_u32(CS_ENDIAN)?;
        let ident_offset = c.read_u32(CS_ENDIAN)?;
        let special_slot_count = c.read_u32(CS_ENDIAN)?;
        let code_slot_count = c.read_u32(CS_ENDIAN)?;
        fields.code_limit = field(&c, 4);
        let code_limit = c.read_u32(CS_ENDIAN)?;
        let hash_size = c.read_u8()?;
        fields.hash_type = field(&c, 1);
        let hash_type = HashType::from(c.read_u8()?);
        let platform = c.read_u8()?;
        fields.page_size = field(&c, 1);
        let page_size_log2 = c.read_u8()?;
        let spare2 = c.read_u32(CS_ENDIAN)?;

        if page_size_log2 >= 64 {
            return Err(DecodeError::malformed(
                c.position() - 5,
                format!("page size exponent {page_size_log2} is out of range"),
            ));
        }

        let present = OptionalField::present_in(version);
        let has = |f: OptionalField| present.contains(&f);

        let scatter_offset = if has(OptionalField::ScatterOffset) {
            Some(c.read_u32(CS_ENDIAN)?)
        } else {
            None
        };
        let team_offset = if has(OptionalField::TeamOffset) {
            Some(c.read_u32(CS_ENDIAN)?)
        } else {
            None
        };
        let code_limit_64 = if has(OptionalField::CodeLimit64) {
            c.skip(4)?; // spare3
            let range = field(&c, 8);
            let limit = c.read_u64(CS_ENDIAN)?;
            if limit != 0 {
                fields.code_limit = range;
            }
            Some(limit)
        } else {
            None
        };
        let exec_segment = if has(OptionalField::ExecSegment) {
            fields.exec_segment = Some(field(&c, 24));
            Some(ExecSegment {
                base: c.read_u64(CS_ENDIAN)?,
                limit: c.read_u64(CS_ENDIAN)?,
                flags: ExecSegFlags::from_bits_retain(c.read_u64(CS_ENDIAN)?),
            })
        } else {
            None
        };
        let runtime = if has(OptionalField::Runtime) {
            fields.runtime = Some(field(&c, 8));
            Some(RuntimeVersion {
                version: c.read_u32(CS_ENDIAN)?,
                pre_encrypt_offset: c.read_u32(CS_ENDIAN)?,
            })
        } else {
            None
        };
        let linkage = if has(OptionalField::Linkage) {
            Some(Linkage {
                hash_type: c.read_u8()?,
                application_type: c.read_u8()?,
                application_subtype: c.read_u16(CS_ENDIAN)?,
                offset: c.read_u32(CS_ENDIAN)?,
                size: c.read_u32(CS_ENDIAN)?,
            })
        } else {
            None
        };

        let identifier = if ident_offset != 0 {
            let (identifier, range) = read_string_at(&blob, ident_offset)?;
            fields.identifier = range;
            identifier
        } else {
            String::new()
        };
        let team_id = match team_offset {
            Some(off) if off != 0 => {
                let (team, range) = read_string_at(&blob, off)?;
                fields.team_id = Some(range);
                Some(team)
            }
            _ => None,
        };

        let (special_slots, code_slots) =
            read_hash_slots(&blob, hash_offset, special_slot_count, code_slot_count, hash_size)?;
        fields.special_slots = slot_area(&special_slots, blob.start() + hash_offset as usize);
        fields.code_slots = slot_area(&code_slots, blob.start() + hash_offset as usize);

        Ok(CodeDirectory {
            range: blob.range(),
            fields,
            version,
            flags,
            hash_offset,
            ident_offset,
            special_slot_count,
            code_slot_count,
            code_limit,
            hash_size,
            hash_type,
            platform,
            page_size_log2,
            spare2,
            scatter_offset,
            team_offset,
            code_limit_64,
            exec_segment,
            runtime,
            linkage,
            identifier,
            team_id,
            special_slots,
            code_slots,
        })
    }

    /// Optional field groups present in this directory, in wire order.
    pub fn present_fields(&self) -> Vec<OptionalField> {
        let mut fields = Vec::new();
        if self.scatter_offset.is_some() {
            fields.push(OptionalField::ScatterOffset);
        }
        if self.team_offset.is_some() {
            fields.push(OptionalField::TeamOffset);
        }
        if self.code_limit_64.is_some() {
            fields.push(OptionalField::CodeLimit64);
        }
        if self.exec_segment.is_some() {
            fields.push(OptionalField::ExecSegment);
        }
        if self.runtime.is_some() {
            fields.push(OptionalField::Runtime);
        }
        if self.linkage.is_some() {
            fields.push(OptionalField::Linkage);
        }
        fields
    }

    /// Page size in bytes (`1 << pageSizeExp`).
    ///
    /// An exponent of zero gives 1, which the signing tools use to mean a
    /// single page spanning the whole code limit; [`Self::page_range`]
    /// handles that case.
    pub fn page_size(&self) -> u64 {
        1u64 << self.page_size_log2
    }

    /// Number of signed bytes, preferring the 64-bit limit when set.
    pub fn effective_code_limit(&self) -> u64 {
        match self.code_limit_64 {
            Some(limit) if limit != 0 => limit,
            _ => u64::from(self.code_limit),
        }
    }

    /// Image-relative byte range covered by code slot `index`.
    pub fn page_range(&self, index: u32) -> Option<(u64, u64)> {
        if index >= self.code_slot_count {
            return None;
        }
        let limit = self.effective_code_limit();
        if self.page_size_log2 == 0 {
            return (index == 0).then_some((0, limit));
        }
        let size = self.page_size();
        let start = u64::from(index).checked_mul(size)?;
        if start >= limit {
            return None;
        }
        Some((start, start.saturating_add(size).min(limit)))
    }

    /// Special slot hash by index (1 = Info.plist).
    pub fn special_slot(&self, index: u32) -> Option<&HashSlot> {
        self.special_slots.iter().find(|s| s.index == index)
    }

    pub fn is_adhoc(&self) -> bool {
        self.flags.contains(CodeDirectoryFlags::ADHOC)
    }
}

/// NUL-terminated string at `offset` from the blob start, with the range of its bytes.
fn read_string_at(blob: &ByteCursor<'_>, offset: u32) -> Result<(String, ByteRange)> {
    let mut c = blob.view_from(offset as usize)?;
    let start = c.position();
    let text = c.read_cstr()?;
    let len = c.position() - start - 1;
    Ok((text, ByteRange::new(start, len)))
}

/// Span of a contiguous slot table, or an empty range at `at` when there are no slots.
fn slot_area(slots: &[HashSlot], at: usize) -> ByteRange {
    match (slots.iter().map(|s| s.range.start).min(), slots.iter().map(|s| s.range.end).max()) {
        (Some(start), Some(end)) => ByteRange { start, end },
        _ => ByteRange::new(at, 0),
    }
}

fn read_hash_slots(
    blob: &ByteCursor<'_>,
    hash_offset: u32,
    special_count: u32,
    code_count: u32,
    hash_size: u8,
) -> Result<(Vec<HashSlot>, Vec<HashSlot>)> {
    let hash_size = usize::from(hash_size);
    let hash_offset = hash_offset as usize;
    if hash_size == 0 && (special_count > 0 || code_count > 0) {
        return Err(DecodeError::malformed(
            blob.start(),
            "code directory has hash slots but a zero hash size",
        ));
    }

    let overflow = || DecodeError::malformed(blob.start(), "hash slot area overflows");
    let special_len = (special_count as usize).checked_mul(hash_size).ok_or_else(overflow)?;
    let code_len = (code_count as usize).checked_mul(hash_size).ok_or_else(overflow)?;
    let special_start = hash_offset.checked_sub(special_len).ok_or_else(|| {
        DecodeError::malformed(
            blob.start() + hash_offset,
            format!("{special_count} special slots do not fit before hash offset {hash_offset:#x}"),
        )
    })?;

    let mut area = blob.view(special_start, special_len)?;
    let mut special = Vec::with_capacity(special_count as usize);
    for i in 0..special_count {
        let from = area.position();
        let hash = area.read_bytes(hash_size)?.to_vec();
        special.push(HashSlot {
            index: special_count - i,
            hash,
            range: area.range_from(from),
        });
    }
    special.reverse();

    let mut area = blob.view(hash_offset, code_len)?;
    let mut code = Vec::with_capacity(code_count as usize);
    for index in 0..code_count {
        let from = area.position();
        let hash = area.read_bytes(hash_size)?.to_vec();
        code.push(HashSlot {
            index,
            hash,
            range: area.range_from(from),
        });
    }

    Ok((special, code))
}

impl Introspect for CodeDirectory {
    fn to_node(&self) -> Node {
        let f = &self.fields;
        let mut node = Node::new("code_directory", self.range).with_value(&self.identifier);
        node.push(Node::leaf("identifier", &self.identifier, f.identifier));
        node.push(Node::leaf("version", format!("{:#x}", self.version), f.version));
        node.push(Node::leaf("flags", self.flags, f.flags));
        node.push(Node::leaf("hash_type", self.hash_type, f.hash_type));
        node.push(Node::leaf("page_size", self.page_size(), f.page_size));
        node.push(Node::leaf("code_limit", self.effective_code_limit(), f.code_limit));
        if let (Some(team), Some(range)) = (&self.team_id, f.team_id) {
            node.push(Node::leaf("team_id", team, range));
        }
        if let (Some(exec), Some(range)) = (&self.exec_segment, f.exec_segment) {
            node.push(Node::leaf(
                "exec_segment",
                format!("base {:#x} limit {:#x} flags {}", exec.base, exec.limit, exec.flags),
                range,
            ));
        }
        if let (Some(runtime), Some(range)) = (&self.runtime, f.runtime) {
            let v = runtime.version;
            node.push(Node::leaf(
                "runtime",
                format!("{}.{}.{}", v >> 16, (v >> 8) & 0xff, v & 0xff),
                range,
            ));
        }
        let mut special = Node::new("special_slots", f.special_slots).with_value(self.special_slots.len());
        for slot in &self.special_slots {
            let label = special_slot_name(slot.index)
                .map(str::to_string)
                .unwrap_or_else(|| format!("slot {}", slot.index));
            special.push(Node::leaf(label, hex::encode(&slot.hash), slot.range));
        }
        node.push(special);
        node.push(Node::leaf("code_slots", self.code_slots.len(), f.code_slots));
        node
    }
}

// =============================================================================
// Digest checks
// =============================================================================

/// Outcome of re-hashing one code page.
#[cfg(feature = "digest")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Match,
    Mismatch,
    /// The page lies past the code limit or outside the image
    OutOfBounds,
    /// The hash type has no digest implementation
    Unsupported,
}

/// Result of re-hashing one code page.
#[cfg(feature = "digest")]
#[derive(Debug, Clone, Serialize)]
pub struct PageCheck {
    pub index: u32,
    /// Absolute range that was hashed, when the page maps into the image
    pub range: Option<ByteRange>,
    pub status: PageStatus,
}

#[cfg(feature = "digest")]
impl HashType {
    /// Digest `data`, or `None` for algorithms without an implementation.
    pub fn digest(self, data: &[u8]) -> Option<Vec<u8>> {
        use sha1::Sha1;
        use sha2::{Digest, Sha256, Sha384, Sha512};

        Some(match self {
            HashType::Sha1 => Sha1::digest(data).to_vec(),
            HashType::Sha256 | HashType::Sha256Truncated => Sha256::digest(data).to_vec(),
            HashType::Sha384 => Sha384::digest(data).to_vec(),
            HashType::Sha512 => Sha512::digest(data).to_vec(),
            HashType::None | HashType::Unknown(_) => return None,
        })
    }
}

/// Digest checks. Both take the whole file that was decoded; `image` is the
/// absolute range of the image that carries this code directory.
/// They only report and make no trust decision.
#[cfg(feature = "digest")]
impl CodeDirectory {
    /// Re-hash every code page and compare it against its code slot.
    pub fn check_pages(&self, file: &[u8], image: ByteRange) -> Vec<PageCheck> {
        self.code_slots
            .iter()
            .map(|slot| {
                let range = self
                    .page_range(slot.index)
                    .and_then(|(start, end)| {
                        let start = image.start.checked_add(usize::try_from(start).ok()?)?;
                        let end = image.start.checked_add(usize::try_from(end).ok()?)?;
                        Some(ByteRange { start, end })
                    })
                    .filter(|range| image.contains(range) && range.end <= file.len());
                let status = match range {
                    None => PageStatus::OutOfBounds,
                    Some(range) => match self.hash_type.digest(&file[range.start..range.end]) {
                        None => PageStatus::Unsupported,
                        Some(digest) if digest.get(..slot.hash.len()) == Some(slot.hash.as_slice()) => {
                            PageStatus::Match
                        }
                        Some(_) => PageStatus::Mismatch,
                    },
                };
                PageCheck {
                    index: slot.index,
                    range,
                    status,
                }
            })
            .collect()
    }

    /// The code directory hash: the digest of the blob bytes, truncated to 20 bytes.
    pub fn cdhash(&self, file: &[u8]) -> Option<Vec<u8>> {
        let bytes = file.get(self.range.start..self.range.end)?;
        let mut digest = self.hash_type.digest(bytes)?;
        digest.truncate(20);
        Some(digest)
    }
}
