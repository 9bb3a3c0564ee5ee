//! Error types for the Mach-O decoder.
//!
//! Every variant that concerns input bytes carries the absolute file offset
//! at which the problem was detected, so a failure can be located in the
//! original file without re-running the decode.

use thiserror::Error;

/// Primary error type for decoding operations.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// IO error while loading a file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A read or slice went past the bytes available to the cursor.
    #[error("Out of bounds at offset {offset:#x}: requested {requested} bytes, {available} available")]
    Bounds {
        offset: usize,
        requested: usize,
        available: usize,
    },

    /// Wrong magic value at a structural boundary.
    #[error("Bad magic at offset {offset:#x}: expected {expected}, got {actual:#010x}")]
    BadMagic {
        offset: usize,
        expected: String,
        actual: u32,
    },

    /// A record tag with no registered decoder (strict mode only).
    #[error("Unknown record tag {tag:#x} at offset {offset:#x}")]
    UnknownRecordTag { offset: usize, tag: u32 },

    /// A requirement opcode stream that cannot be decoded.
    #[error("Malformed requirement expression at offset {offset:#x}: {message}")]
    MalformedExpression { offset: usize, message: String },

    /// The CMS payload did not parse even after trimming trailing padding.
    #[error("Unsupported CMS encoding after {attempts} attempts: {message}")]
    UnsupportedCmsEncoding { attempts: usize, message: String },

    /// A deferred `{offset, size}` pair points outside the image.
    ///
    /// `record_offset` is the absolute offset of the record that carries the
    /// pair; `offset` is the image-relative payload offset it declares.
    #[error("Unresolved deferred payload for {record} at {record_offset:#x}: offset {offset:#x} size {size:#x} (image size {image_size:#x})")]
    UnresolvedDeferredPayload {
        record: String,
        record_offset: usize,
        offset: u64,
        size: u64,
        image_size: usize,
    },

    /// Structurally inconsistent data that is not a plain bounds miss.
    #[error("Malformed data at offset {offset:#x}: {message}")]
    Malformed { offset: usize, message: String },

    /// A count or size field exceeded a configured resource cap.
    #[error("Limit exceeded for {what}: {actual} > {limit}")]
    LimitExceeded {
        what: &'static str,
        limit: usize,
        actual: u64,
    },

    /// Property-list parsing failed (legacy XML entitlements).
    #[error("Plist error: {0}")]
    Plist(#[from] plist::Error),
}

impl DecodeError {
    /// Absolute byte offset of the failure, when the error is tied to input data.
    pub fn offset(&self) -> Option<usize> {
        match self {
            DecodeError::Bounds { offset, .. }
            | DecodeError::BadMagic { offset, .. }
            | DecodeError::UnknownRecordTag { offset, .. }
            | DecodeError::MalformedExpression { offset, .. }
            | DecodeError::Malformed { offset, .. } => Some(*offset),
            DecodeError::UnresolvedDeferredPayload { record_offset, .. } => Some(*record_offset),
            _ => None,
        }
    }

    pub(crate) fn malformed(offset: usize, message: impl Into<String>) -> Self {
        DecodeError::Malformed {
            offset,
            message: message.into(),
        }
    }
}

/// Result type alias for decoding operations.
pub type Result<T> = std::result::Result<T, DecodeError>;

/// Check a count field against a configured cap.
pub(crate) fn check_limit(what: &'static str, actual: u64, limit: usize) -> Result<()> {
    if actual > limit as u64 {
        return Err(DecodeError::LimitExceeded {
            what,
            limit,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DecodeError::Bounds {
            offset: 0x40,
            requested: 16,
            available: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("0x40"));
        assert!(msg.contains("16"));
        assert_eq!(err.offset(), Some(0x40));
    }

    #[test]
    fn test_bad_magic_display() {
        let err = DecodeError::BadMagic {
            offset: 0,
            expected: "Mach-O image".to_string(),
            actual: 0xDEADBEEF,
        };
        assert!(err.to_string().contains("0xdeadbeef"));
    }

    #[test]
    fn test_check_limit() {
        assert!(check_limit("records", 10, 10).is_ok());
        let err = check_limit("records", 11, 10).unwrap_err();
        assert!(matches!(err, DecodeError::LimitExceeded { limit: 10, .. }));
        assert_eq!(err.offset(), None);
    }

    #[test]
    fn test_deferred_payload_offset_is_the_record() {
        let err = DecodeError::UnresolvedDeferredPayload {
            record: "LC_FUNCTION_STARTS".to_string(),
            record_offset: 0x20,
            offset: 0x1000,
            size: 8,
            image_size: 0x30,
        };
        assert_eq!(err.offset(), Some(0x20));
        assert!(err.to_string().contains("LC_FUNCTION_STARTS at 0x20"));
    }
}
