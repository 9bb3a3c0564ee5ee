//! Embedded code signatures decoded through a whole image.

mod common;

use common::*;
use macho_inspect::codesign::cms::extract_cms;
use macho_inspect::codesign::{slot, BlobContent, CodeDirectoryFlags, OptionalField};
use macho_inspect::{decode_bytes, DecodeError};
use pretty_assertions::assert_eq;

fn designated_expr() -> Vec<u8> {
    // identifier "com.example.signed" and anchor apple generic
    [op(6), ident("com.example.signed"), op(15)].concat()
}

fn full_signature() -> Vec<u8> {
    superblob(&[
        (slot::CODE_DIRECTORY, code_directory("com.example.signed", "ABCDE12345", 3)),
        (slot::REQUIREMENTS, designated_set(&designated_expr())),
        (slot::SIGNATURE, blob_wrapper(&[])),
    ])
}

#[test]
fn code_directory_through_image() {
    let data = signed_image(&full_signature());
    let file = decode_bytes(&data).unwrap();
    let image = file.images()[0];

    let cd = image.code_directory().unwrap();
    assert_eq!(cd.identifier, "com.example.signed");
    assert_eq!(cd.team_id.as_deref(), Some("ABCDE12345"));
    assert_eq!(
        cd.present_fields(),
        vec![
            OptionalField::ScatterOffset,
            OptionalField::TeamOffset,
            OptionalField::CodeLimit64,
            OptionalField::ExecSegment,
        ]
    );
    assert!(cd.runtime.is_none());
    assert!(cd.flags.contains(CodeDirectoryFlags::ADHOC));
    assert_eq!(cd.page_size(), 4096);

    assert_eq!(cd.code_slots.len(), 3);
    assert_eq!(cd.code_slots[2].hash, vec![0x82; 32]);

    // stored highest index first, exposed ascending
    let special: Vec<u32> = cd.special_slots.iter().map(|s| s.index).collect();
    assert_eq!(special, vec![1, 2]);
    assert_eq!(cd.special_slots[0].hash, vec![0x01; 32]);
    assert_eq!(cd.special_slots[1].hash, vec![0x02; 32]);
    assert!(cd.special_slots[0].range.start > cd.special_slots[1].range.start);
}

#[test]
fn requirements_and_adhoc_wrapper() {
    let data = signed_image(&full_signature());
    let file = decode_bytes(&data).unwrap();
    let signature = file.images()[0].code_signature().unwrap();

    assert_eq!(signature.entries.len(), 3);
    assert_eq!(signature.skipped().count(), 0);
    assert_eq!(
        signature.requirements().unwrap().text(),
        "designated => identifier \"com.example.signed\" and anchor apple generic"
    );
    assert!(signature.signature().unwrap().is_adhoc());
}

#[test]
fn precedence_of_nested_operators() {
    // or(and(A, B), C)
    let expr = [op(7), op(6), ident("A"), ident("B"), ident("C")].concat();
    let sig = superblob(&[(slot::REQUIREMENTS, designated_set(&expr))]);
    let file = decode_bytes(&signed_image(&sig)).unwrap();
    let requirements = file.images()[0].code_signature().unwrap().requirements().unwrap();

    assert_eq!(
        requirements.designated().unwrap().to_string(),
        "(identifier \"A\" and identifier \"B\") or identifier \"C\""
    );
}

#[test]
fn broken_blob_is_skipped_not_fatal() {
    let mut broken = code_directory("com.example.broken", "TEAM", 1);
    broken[4..8].copy_from_slice(&0x10_0000u32.to_be_bytes());
    let sig = superblob(&[
        (slot::CODE_DIRECTORY, broken),
        (slot::REQUIREMENTS, designated_set(&ident("ok"))),
    ]);
    let file = decode_bytes(&signed_image(&sig)).unwrap();
    let signature = file.images()[0].code_signature().unwrap();

    assert!(signature.code_directory().is_none());
    assert_eq!(signature.skipped().count(), 1);
    assert!(matches!(
        signature.entries[1].blob(),
        Some(BlobContent::Requirements(_))
    ));
}

#[test]
fn cms_padding_bound() {
    let clean = empty_signed_data();
    for pad in 0..=15 {
        let mut payload = clean.clone();
        payload.resize(clean.len() + pad, 0);
        let cms = extract_cms(&payload).unwrap();
        assert_eq!(cms.trimmed_padding, pad);
        assert!(cms.certificates.is_empty());
    }

    let mut payload = clean.clone();
    payload.resize(clean.len() + 16, 0);
    let err = extract_cms(&payload).unwrap_err();
    assert!(matches!(err, DecodeError::UnsupportedCmsEncoding { attempts: 16, .. }));
}

#[test]
fn cms_in_wrapper_through_image() {
    let mut payload = empty_signed_data();
    payload.extend_from_slice(&[0; 3]);
    let sig = superblob(&[(slot::SIGNATURE, blob_wrapper(&payload))]);
    let file = decode_bytes(&signed_image(&sig)).unwrap();
    let blob = file.images()[0].code_signature().unwrap().signature().unwrap();

    let cms = blob.cms.as_ref().unwrap();
    assert_eq!(cms.trimmed_padding, 3);
    assert_eq!(cms.content_type, "1.2.840.113549.1.7.2");
}

#[cfg(feature = "digest")]
#[test]
fn page_checks_report_every_slot() {
    use macho_inspect::codesign::PageStatus;

    let data = signed_image(&full_signature());
    let file = decode_bytes(&data).unwrap();
    let image = file.images()[0];

    // the fixture claims three 4 KiB pages but the image is far shorter
    let checks = image.check_pages(&data).unwrap();
    assert_eq!(checks.len(), 3);
    assert!(checks.iter().all(|c| c.status == PageStatus::OutOfBounds));

    let cdhash = image.code_directory().unwrap().cdhash(&data).unwrap();
    assert_eq!(cdhash.len(), 20);
}
