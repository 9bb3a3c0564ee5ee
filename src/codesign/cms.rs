//! CMS signature extraction.
//!
//! The blob wrapper's declared length can include trailing padding after the
//! BER content. Decoding tries the full payload first and then drops one
//! trailing byte per attempt, for at most [`CMS_MAX_ATTEMPTS`] attempts.
//!
//! Certificates and signing times are extracted for a caller-side trust
//! evaluation. Nothing here validates a chain or a signature.

use der_parser::ber::{parse_ber, BerObject, BerObjectContent, Class};
use serde::Serialize;
use tracing::{debug, trace};

use super::{expect_blob, magic};
use crate::cursor::ByteCursor;
use crate::error::{DecodeError, Result};
use crate::types::{serialize_hex, ByteRange, Introspect, Node};

/// Total parse attempts, trimming 0 through 15 trailing bytes.
pub const CMS_MAX_ATTEMPTS: usize = 16;

const OID_SIGNED_DATA: &str = "1.2.840.113549.1.7.2";
const OID_COMMON_NAME: &str = "2.5.4.3";
const OID_SIGNING_TIME: &str = "1.2.840.113549.1.9.5";

/// The blob wrapper in the signature slot.
#[derive(Debug, Clone, Serialize)]
pub struct SignatureBlob {
    pub range: ByteRange,
    /// `None` for an empty wrapper (ad-hoc signature)
    pub cms: Option<CmsSignature>,
}

impl SignatureBlob {
    pub fn is_adhoc(&self) -> bool {
        self.cms.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CmsSignature {
    pub content_type: String,
    pub certificates: Vec<Certificate>,
    pub signers: Vec<SignerInfo>,
    /// Trailing bytes dropped before the content parsed
    pub trimmed_padding: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Certificate {
    #[serde(serialize_with = "serialize_hex")]
    pub der: Vec<u8>,
    pub serial: String,
    pub subject_cn: Option<String>,
    pub issuer_cn: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignerInfo {
    pub digest_algorithm: Option<String>,
    pub signing_time: Option<String>,
    /// Object identifiers of the signed attributes
    pub attributes: Vec<String>,
}

/// Decode a blob wrapper holding a CMS `SignedData`.
pub fn decode_signature_blob(blob: ByteCursor<'_>) -> Result<SignatureBlob> {
    let mut c = expect_blob(&blob, magic::BLOB_WRAPPER)?;
    let range = c.view(0, c.len())?.range();
    let payload = c.read_rest();
    if payload.is_empty() {
        debug!(offset = range.start, "empty signature wrapper, ad-hoc signed");
        return Ok(SignatureBlob { range, cms: None });
    }
    Ok(SignatureBlob {
        range,
        cms: Some(extract_cms(payload)?),
    })
}

/// Parse `payload` as CMS, trimming trailing padding as needed.
pub fn extract_cms(payload: &[u8]) -> Result<CmsSignature> {
    let mut last_error = String::from("empty payload");
    let mut attempts = 0;
    for trim in 0..CMS_MAX_ATTEMPTS {
        let Some(candidate) = payload.len().checked_sub(trim).map(|len| &payload[..len]) else {
            break;
        };
        if candidate.is_empty() {
            break;
        }
        attempts += 1;
        match parse_ber(candidate) {
            Ok((rest, obj)) if rest.is_empty() => match signed_data(&obj) {
                Ok(mut sig) => {
                    sig.trimmed_padding = trim;
                    return Ok(sig);
                }
                Err(message) => last_error = message,
            },
            Ok((rest, _)) => last_error = format!("{} bytes follow the BER content", rest.len()),
            Err(err) => last_error = err.to_string(),
        }
        trace!(trim, error = %last_error, "CMS parse attempt failed");
    }
    Err(DecodeError::UnsupportedCmsEncoding {
        attempts,
        message: last_error,
    })
}

type Shape<T> = std::result::Result<T, String>;

fn items<'a, 'b>(obj: &'b BerObject<'a>, what: &str) -> Shape<&'b [BerObject<'a>]> {
    match &obj.content {
        BerObjectContent::Sequence(items) | BerObjectContent::Set(items) => Ok(items.as_slice()),
        _ => Err(format!("{what} is not a SEQUENCE or SET")),
    }
}

/// Content bytes of a context-specific element.
fn context_data<'a>(obj: &BerObject<'a>, tag: u32) -> Option<&'a [u8]> {
    if obj.header.class() != Class::ContextSpecific || obj.header.tag().0 != tag {
        return None;
    }
    match &obj.content {
        BerObjectContent::Unknown(any) => Some(any.data),
        _ => None,
    }
}

/// Split concatenated BER elements, keeping each element's raw bytes.
fn elements(mut data: &[u8]) -> Shape<Vec<(&[u8], BerObject<'_>)>> {
    let mut out = Vec::new();
    while !data.is_empty() {
        let (rest, obj) = parse_ber(data).map_err(|e| e.to_string())?;
        out.push((&data[..data.len() - rest.len()], obj));
        data = rest;
    }
    Ok(out)
}

fn oid_string(obj: &BerObject<'_>) -> Option<String> {
    obj.as_oid().ok().map(|oid| oid.to_id_string())
}

fn signed_data(content_info: &BerObject<'_>) -> Shape<CmsSignature> {
    let outer = items(content_info, "ContentInfo")?;
    let content_type = outer
        .first()
        .and_then(oid_string)
        .ok_or("ContentInfo has no content type")?;
    if content_type != OID_SIGNED_DATA {
        return Err(format!("content type {content_type} is not SignedData"));
    }
    let explicit = outer
        .get(1)
        .and_then(|o| context_data(o, 0))
        .ok_or("ContentInfo has no [0] content")?;
    let (_, signed) = parse_ber(explicit).map_err(|e| e.to_string())?;
    let fields = items(&signed, "SignedData")?;

    let mut certificates = Vec::new();
    let mut signers = Vec::new();
    // version, digestAlgorithms, encapContentInfo, then optional [0] [1], then signerInfos
    for field in fields.iter().skip(3) {
        if let Some(data) = context_data(field, 0) {
            for (der, cert) in elements(data)? {
                certificates.push(certificate(der, &cert)?);
            }
        } else if let BerObjectContent::Set(infos) = &field.content {
            for info in infos {
                signers.push(signer_info(info)?);
            }
        }
    }
    debug!(certificates = certificates.len(), signers = signers.len(), "decoded CMS SignedData");

    Ok(CmsSignature {
        content_type,
        certificates,
        signers,
        trimmed_padding: 0,
    })
}

/// Common name from an X.501 `Name`.
fn common_name(name: &BerObject<'_>) -> Option<String> {
    let rdns = items(name, "Name").ok()?;
    rdns.iter()
        .filter_map(|rdn| items(rdn, "RDN").ok())
        .flatten()
        .filter_map(|atv| items(atv, "AttributeTypeAndValue").ok())
        .find(|atv| atv.first().and_then(oid_string).as_deref() == Some(OID_COMMON_NAME))
        .and_then(|atv| atv.get(1))
        .and_then(|value| value.as_str().ok().map(str::to_string))
}

fn certificate(der: &[u8], cert: &BerObject<'_>) -> Shape<Certificate> {
    let tbs = items(cert, "Certificate")?
        .first()
        .ok_or("Certificate has no tbsCertificate")?;
    let mut fields = items(tbs, "TBSCertificate")?.iter().peekable();
    // Explicit [0] version is optional
    if fields.peek().is_some_and(|f| context_data(f, 0).is_some()) {
        fields.next();
    }
    let serial = match fields.next().map(|f| &f.content) {
        Some(BerObjectContent::Integer(bytes)) => hex::encode(bytes),
        _ => return Err("certificate serial is not an INTEGER".to_string()),
    };
    let _signature = fields.next();
    let issuer_cn = fields.next().and_then(common_name);
    let _validity = fields.next();
    let subject_cn = fields.next().and_then(common_name);

    Ok(Certificate {
        der: der.to_vec(),
        serial,
        subject_cn,
        issuer_cn,
    })
}

fn signer_info(info: &BerObject<'_>) -> Shape<SignerInfo> {
    let fields = items(info, "SignerInfo")?;
    let digest_algorithm = fields
        .get(2)
        .and_then(|alg| items(alg, "AlgorithmIdentifier").ok())
        .and_then(|alg| alg.first())
        .and_then(oid_string);

    let mut attributes = Vec::new();
    let mut signing_time = None;
    if let Some(data) = fields.get(3).and_then(|f| context_data(f, 0)) {
        for (_, attr) in elements(data)? {
            let parts = items(&attr, "Attribute")?;
            let Some(oid) = parts.first().and_then(oid_string) else {
                continue;
            };
            if oid == OID_SIGNING_TIME {
                signing_time = parts
                    .get(1)
                    .and_then(|set| items(set, "AttributeValues").ok())
                    .and_then(|values| values.first())
                    .and_then(|value| match &value.content {
                        BerObjectContent::UTCTime(t) | BerObjectContent::GeneralizedTime(t) => {
                            Some(t.to_string())
                        }
                        _ => None,
                    });
            }
            attributes.push(oid);
        }
    }

    Ok(SignerInfo {
        digest_algorithm,
        signing_time,
        attributes,
    })
}

impl Introspect for SignatureBlob {
    fn to_node(&self) -> Node {
        let r = self.range;
        let Some(cms) = &self.cms else {
            return Node::leaf("signature", "ad-hoc", r);
        };
        let mut node = Node::new("signature", r).with_value("CMS SignedData");
        if cms.trimmed_padding > 0 {
            node.push(Node::leaf("trimmed_padding", cms.trimmed_padding, r));
        }
        for cert in &cms.certificates {
            node.push(Node::leaf(
                "certificate",
                format!(
                    "{} (issuer {}, serial {})",
                    cert.subject_cn.as_deref().unwrap_or("?"),
                    cert.issuer_cn.as_deref().unwrap_or("?"),
                    cert.serial
                ),
                r,
            ));
        }
        for signer in &cms.signers {
            let mut child = Node::new("signer", r);
            if let Some(alg) = &signer.digest_algorithm {
                child.push(Node::leaf("digest_algorithm", alg, r));
            }
            if let Some(time) = &signer.signing_time {
                child.push(Node::leaf("signing_time", time, r));
            }
            node.push(child);
        }
        node
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        let len = content.len();
        if len < 0x80 {
            out.push(len as u8);
        } else if len < 0x100 {
            out.extend_from_slice(&[0x81, len as u8]);
        } else {
            out.extend_from_slice(&[0x82, (len >> 8) as u8, len as u8]);
        }
        out.extend_from_slice(content);
        out
    }

    fn seq(parts: &[Vec<u8>]) -> Vec<u8> {
        tlv(0x30, &parts.concat())
    }

    fn name(cn: &str) -> Vec<u8> {
        seq(&[tlv(0x31, &seq(&[tlv(0x06, &[0x55, 0x04, 0x03]), tlv(0x0c, cn.as_bytes())]))])
    }

    /// Minimal SignedData with one certificate and one signer.
    pub(crate) fn signed_data_der() -> Vec<u8> {
        let sha256 = tlv(0x06, &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01]);
        let tbs = seq(&[
            tlv(0xa0, &tlv(0x02, &[2])),
            tlv(0x02, &[0x01, 0x23]),
            seq(&[sha256.clone()]),
            name("Test Root CA"),
            seq(&[]),
            name("Developer ID Application: Example"),
        ]);
        let cert = seq(&[tbs, seq(&[sha256.clone()]), tlv(0x03, &[0x00, 0xaa])]);
        let signing_time = seq(&[
            tlv(0x06, &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x05]),
            tlv(0x31, &tlv(0x17, b"240101120000Z")),
        ]);
        let signer = seq(&[
            tlv(0x02, &[1]),
            seq(&[name("Test Root CA"), tlv(0x02, &[0x01, 0x23])]),
            seq(&[sha256.clone()]),
            tlv(0xa0, &signing_time),
            seq(&[tlv(0x06, &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01])]),
            tlv(0x04, &[0x55; 8]),
        ]);
        let signed = seq(&[
            tlv(0x02, &[1]),
            tlv(0x31, &seq(&[sha256])),
            seq(&[tlv(0x06, &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x01])]),
            tlv(0xa0, &cert),
            tlv(0x31, &signer),
        ]);
        seq(&[
            tlv(0x06, &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02]),
            tlv(0xa0, &signed),
        ])
    }

    fn wrapper(payload: &[u8]) -> Vec<u8> {
        let mut out = magic::BLOB_WRAPPER.to_be_bytes().to_vec();
        out.extend_from_slice(&(8 + payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_extracts_certificates_and_signer() {
        let sig = extract_cms(&signed_data_der()).unwrap();
        assert_eq!(sig.content_type, OID_SIGNED_DATA);
        assert_eq!(sig.trimmed_padding, 0);
        assert_eq!(sig.certificates.len(), 1);
        let cert = &sig.certificates[0];
        assert_eq!(cert.serial, "0123");
        assert_eq!(cert.issuer_cn.as_deref(), Some("Test Root CA"));
        assert_eq!(cert.subject_cn.as_deref(), Some("Developer ID Application: Example"));
        assert_eq!(sig.signers.len(), 1);
        assert_eq!(sig.signers[0].digest_algorithm.as_deref(), Some("2.16.840.1.101.3.4.2.1"));
        assert!(sig.signers[0].signing_time.is_some());
        assert_eq!(sig.signers[0].attributes, vec![OID_SIGNING_TIME.to_string()]);
    }

    #[test]
    fn test_padding_up_to_fifteen_bytes() {
        let reference = extract_cms(&signed_data_der()).unwrap().certificates;
        for padding in 0..CMS_MAX_ATTEMPTS {
            let mut payload = signed_data_der();
            payload.extend(std::iter::repeat(0u8).take(padding));
            let sig = extract_cms(&payload).unwrap();
            assert_eq!(sig.trimmed_padding, padding);
            assert_eq!(sig.certificates, reference);
        }
    }

    #[test]
    fn test_sixteen_padding_bytes_fail() {
        let mut payload = signed_data_der();
        payload.extend_from_slice(&[0u8; 16]);
        let err = extract_cms(&payload).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedCmsEncoding { attempts: 16, .. }));
    }

    #[test]
    fn test_empty_wrapper_is_adhoc() {
        let blob = wrapper(&[]);
        let sig = decode_signature_blob(ByteCursor::new(&blob)).unwrap();
        assert!(sig.is_adhoc());
        assert_eq!(sig.range, ByteRange::new(0, 8));
    }

    #[test]
    fn test_wrapper_with_padding() {
        let mut payload = signed_data_der();
        payload.extend_from_slice(&[0u8; 3]);
        let blob = wrapper(&payload);
        let sig = decode_signature_blob(ByteCursor::new(&blob)).unwrap();
        assert_eq!(sig.cms.unwrap().trimmed_padding, 3);
    }

    #[test]
    fn test_not_signed_data() {
        // Shorter than the retry bound: one attempt per possible trim.
        let payload = seq(&[tlv(0x06, &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x01])]);
        assert_eq!(payload.len(), 13);
        let err = extract_cms(&payload).unwrap_err();
        match err {
            DecodeError::UnsupportedCmsEncoding { attempts, message } => {
                assert_eq!(attempts, 13);
                assert!(!message.is_empty());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
