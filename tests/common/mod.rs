//! Synthetic fixture builders shared by the integration tests.

#![allow(dead_code)]

use macho_inspect::codesign::magic;
use macho_inspect::records::tags;

pub const MH_MAGIC_64: u32 = 0xFEED_FACF;
pub const FAT_MAGIC: u32 = 0xCAFE_BABE;
pub const CPU_TYPE_ARM64: u32 = 0x0100_000C;
pub const CPU_TYPE_X86_64: u32 = 0x0100_0007;

/// Little-endian 64-bit arm64 executable with the given record bytes.
pub fn image(ncmds: u32, records: &[u8]) -> Vec<u8> {
    let mut data = Vec::new();
    for v in [MH_MAGIC_64, CPU_TYPE_ARM64, 0, 2, ncmds, records.len() as u32, 0x0020_0085, 0] {
        data.extend_from_slice(&v.to_le_bytes());
    }
    data.extend_from_slice(records);
    data
}

pub fn uuid_record(fill: u8) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&tags::LC_UUID.to_le_bytes());
    data.extend_from_slice(&24u32.to_le_bytes());
    data.extend_from_slice(&[fill; 16]);
    data
}

pub fn linkedit_record(tag: u32, dataoff: u32, datasize: u32) -> Vec<u8> {
    let mut data = Vec::new();
    for v in [tag, 16, dataoff, datasize] {
        data.extend_from_slice(&v.to_le_bytes());
    }
    data
}

/// Big-endian fat container with members back to back after the table.
pub fn fat(members: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&FAT_MAGIC.to_be_bytes());
    data.extend_from_slice(&(members.len() as u32).to_be_bytes());
    let mut offset = 8 + members.len() * 20;
    for (cpu, body) in members {
        for v in [*cpu, 0, offset as u32, body.len() as u32, 0] {
            data.extend_from_slice(&v.to_be_bytes());
        }
        offset += body.len();
    }
    for (_, body) in members {
        data.extend_from_slice(body);
    }
    data
}

fn be(v: u32) -> [u8; 4] {
    v.to_be_bytes()
}

/// Version 0x20400 code directory: scatter, team, codeLimit64 and the
/// executable segment, SHA-256 slots, two special slots and `n_code` code
/// slots. Special slot `i` is filled with `i`, code slot `i` with `0x80 + i`.
pub fn code_directory(identifier: &str, team: &str, n_code: u32) -> Vec<u8> {
    const HASH: usize = 32;
    let n_special = 2u32;
    let ident_offset = 44 + 4 + 4 + 12 + 24;
    let team_offset = ident_offset + identifier.len() + 1;
    let hash_offset = team_offset + team.len() + 1 + n_special as usize * HASH;
    let length = hash_offset + n_code as usize * HASH;

    let mut out = Vec::with_capacity(length);
    out.extend_from_slice(&be(magic::CODE_DIRECTORY));
    out.extend_from_slice(&be(length as u32));
    out.extend_from_slice(&be(0x20400));
    out.extend_from_slice(&be(0x0001_0002)); // ADHOC | RUNTIME
    out.extend_from_slice(&be(hash_offset as u32));
    out.extend_from_slice(&be(ident_offset as u32));
    out.extend_from_slice(&be(n_special));
    out.extend_from_slice(&be(n_code));
    out.extend_from_slice(&be(n_code * 0x1000));
    out.extend_from_slice(&[HASH as u8, 2, 0, 12]);
    out.extend_from_slice(&be(0)); // spare2
    out.extend_from_slice(&be(0)); // scatter
    out.extend_from_slice(&be(team_offset as u32));
    out.extend_from_slice(&be(0)); // spare3
    out.extend_from_slice(&0u64.to_be_bytes());
    out.extend_from_slice(&0u64.to_be_bytes()); // exec segment base
    out.extend_from_slice(&0x4000u64.to_be_bytes());
    out.extend_from_slice(&1u64.to_be_bytes()); // MAIN_BINARY
    assert_eq!(out.len(), ident_offset);
    out.extend_from_slice(identifier.as_bytes());
    out.push(0);
    out.extend_from_slice(team.as_bytes());
    out.push(0);
    for i in (1..=n_special).rev() {
        out.extend_from_slice(&[i as u8; HASH]);
    }
    for i in 0..n_code {
        out.extend_from_slice(&[0x80 + i as u8; HASH]);
    }
    assert_eq!(out.len(), length);
    out
}

pub fn op(code: u32) -> Vec<u8> {
    be(code).to_vec()
}

/// Length-prefixed operand padded to four bytes.
pub fn data(bytes: &[u8]) -> Vec<u8> {
    let mut out = be(bytes.len() as u32).to_vec();
    out.extend_from_slice(bytes);
    while out.len() % 4 != 0 {
        out.push(0);
    }
    out
}

pub fn ident(name: &str) -> Vec<u8> {
    [op(2), data(name.as_bytes())].concat()
}

pub fn requirement(expr: &[u8]) -> Vec<u8> {
    let mut out = be(magic::REQUIREMENT).to_vec();
    out.extend_from_slice(&be(12 + expr.len() as u32));
    out.extend_from_slice(&be(1));
    out.extend_from_slice(expr);
    out
}

/// Requirement set with one designated requirement.
pub fn designated_set(expr: &[u8]) -> Vec<u8> {
    let req = requirement(expr);
    let mut out = be(magic::REQUIREMENT_SET).to_vec();
    out.extend_from_slice(&be(20 + req.len() as u32));
    out.extend_from_slice(&be(1));
    out.extend_from_slice(&be(3));
    out.extend_from_slice(&be(20));
    out.extend_from_slice(&req);
    out
}

pub fn blob_wrapper(payload: &[u8]) -> Vec<u8> {
    let mut out = be(magic::BLOB_WRAPPER).to_vec();
    out.extend_from_slice(&be(8 + payload.len() as u32));
    out.extend_from_slice(payload);
    out
}

/// Embedded-signature super-blob over `(slot, blob)` entries.
pub fn superblob(blobs: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let header = 12 + blobs.len() * 8;
    let total = header + blobs.iter().map(|(_, b)| b.len()).sum::<usize>();
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&be(magic::EMBEDDED_SIGNATURE));
    out.extend_from_slice(&be(total as u32));
    out.extend_from_slice(&be(blobs.len() as u32));
    let mut offset = header;
    for (slot, blob) in blobs {
        out.extend_from_slice(&be(*slot));
        out.extend_from_slice(&be(offset as u32));
        offset += blob.len();
    }
    for (_, blob) in blobs {
        out.extend_from_slice(blob);
    }
    out
}

pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        out.extend_from_slice(&[0x82, (len >> 8) as u8, len as u8]);
    }
    out.extend_from_slice(content);
    out
}

/// ContentInfo wrapping a SignedData with no certificates and no signers.
pub fn empty_signed_data() -> Vec<u8> {
    let data_oid = tlv(0x06, &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x01]);
    let signed = tlv(
        0x30,
        &[tlv(0x02, &[1]), tlv(0x31, &[]), tlv(0x30, &data_oid), tlv(0x31, &[])].concat(),
    );
    tlv(
        0x30,
        &[
            tlv(0x06, &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02]),
            tlv(0xa0, &signed),
        ]
        .concat(),
    )
}

/// Image carrying a UUID and an embedded signature placed after the table.
pub fn signed_image(signature: &[u8]) -> Vec<u8> {
    let sig_offset = 80u32;
    let records = [
        uuid_record(0x42),
        linkedit_record(tags::LC_CODE_SIGNATURE, sig_offset, signature.len() as u32),
    ]
    .concat();
    let mut data = image(2, &records);
    data.resize(sig_offset as usize, 0);
    data.extend_from_slice(signature);
    data
}
