//! The compressed crash-report envelope.
//!
//! Exporters wrap crash reports in a small envelope before writing them to
//! disk: a 7-byte ASCII magic prefix identifying the variant, followed by a
//! raw deflate stream of the report bytes. Diagnostic logs additionally
//! carry a human-readable header between the magic and the compressed
//! payload, terminated by a blank line. Buffers that start with none of the
//! known prefixes are taken to already be in the raw format the report
//! decoder understands and are passed through unchanged.

use std::borrow::Cow;
use std::io::{self, Write};

use flate2::write::DeflateEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use thiserror::Error;

/// Magic prefix of a deflate-compressed crash report.
pub const COMPRESSED_REPORT_MAGIC: &[u8; 7] = b"zplcrsh";

/// Magic prefix written by newer exporters. The payload layout is identical
/// to [`COMPRESSED_REPORT_MAGIC`].
pub const COMPRESSED_REPORT_MAGIC_V2: &[u8; 7] = b"zplcrs2";

/// Magic prefix of a compressed diagnostic log.
///
/// The compressed payload is preceded by a textual header terminated by a
/// blank line (two consecutive newline characters).
pub const DIAGNOSTIC_LOG_MAGIC: &[u8; 7] = b"zplclog";

/// Upper bound for the size of an uncompressed crash report.
///
/// Decompression happens into a buffer of this fixed capacity; reports that
/// inflate beyond it are rejected.
pub const MAX_UNCOMPRESSED_SIZE: usize = 1024 * 1024;

/// An error returned when unwrapping a crash-report envelope.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The uncompressed report does not fit the fixed-capacity buffer.
    #[error("uncompressed crash report exceeds {0} bytes")]
    MaximumSizeExceeded(usize),

    /// The deflate stream is corrupted.
    #[error("compressed crash report corrupted")]
    Corrupted,

    /// The decompressor stopped in an unexpected state.
    #[error("crash report could not be decompressed ({0:?})")]
    DecompressionFailure(Status),

    /// A diagnostic log envelope is missing the blank-line terminator after
    /// its textual header.
    #[error("diagnostic log header not terminated")]
    InvalidHeader,
}

/// Unwraps a crash-report envelope.
///
/// Inspects the first bytes of `data` for one of the known magic prefixes
/// and inflates the wrapped payload. Unrecognized data is returned borrowed
/// and unchanged, so this function can be called unconditionally on
/// anything a caller is about to hand to the report decoder.
pub fn decompress(data: &[u8]) -> Result<Cow<'_, [u8]>, EnvelopeError> {
    let magic_len = COMPRESSED_REPORT_MAGIC.len();

    if data.starts_with(COMPRESSED_REPORT_MAGIC) || data.starts_with(COMPRESSED_REPORT_MAGIC_V2) {
        return inflate(&data[magic_len..]).map(Cow::Owned);
    }

    if data.starts_with(DIAGNOSTIC_LOG_MAGIC) {
        let body = &data[magic_len..];
        let terminator = body
            .windows(2)
            .position(|window| window == b"\n\n")
            .ok_or(EnvelopeError::InvalidHeader)?;
        return inflate(&body[terminator + 2..]).map(Cow::Owned);
    }

    Ok(Cow::Borrowed(data))
}

/// Wraps raw report bytes in the compressed envelope format.
///
/// Writes the [`COMPRESSED_REPORT_MAGIC`] prefix followed by the deflate
/// stream of `report`. Feeding the result to [`decompress`] yields the
/// original bytes.
pub fn compress(report: &[u8]) -> io::Result<Vec<u8>> {
    let out = COMPRESSED_REPORT_MAGIC.to_vec();
    let mut encoder = DeflateEncoder::new(out, Compression::default());
    encoder.write_all(report)?;
    encoder.finish()
}

fn inflate(payload: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    // Diagnostic logs may legitimately carry no payload after the header.
    if payload.is_empty() {
        return Ok(Vec::new());
    }

    let mut out = Vec::with_capacity(MAX_UNCOMPRESSED_SIZE);
    let mut decompress = Decompress::new(false);
    let status = decompress
        .decompress_vec(payload, &mut out, FlushDecompress::Finish)
        .map_err(|_| EnvelopeError::Corrupted)?;

    match status {
        Status::StreamEnd => Ok(out),
        Status::BufError => Err(EnvelopeError::MaximumSizeExceeded(MAX_UNCOMPRESSED_SIZE)),
        Status::Ok if out.len() >= MAX_UNCOMPRESSED_SIZE => {
            Err(EnvelopeError::MaximumSizeExceeded(MAX_UNCOMPRESSED_SIZE))
        }
        status => Err(EnvelopeError::DecompressionFailure(status)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_round_trip() {
        let report = b"Incident Identifier: 42\nHardware Model: Mac14,9\n";
        let envelope = compress(report).unwrap();
        assert!(envelope.starts_with(COMPRESSED_REPORT_MAGIC));

        let unwrapped = decompress(&envelope).unwrap();
        assert_eq!(unwrapped.as_ref(), report);
    }

    #[test]
    fn test_v2_magic() {
        let report = b"report payload";
        let mut envelope = COMPRESSED_REPORT_MAGIC_V2.to_vec();
        envelope.extend_from_slice(&deflate(report));

        let unwrapped = decompress(&envelope).unwrap();
        assert_eq!(unwrapped.as_ref(), report);
    }

    #[test]
    fn test_passthrough() {
        let raw = b"Process: Sample [123]";
        let unwrapped = decompress(raw).unwrap();
        assert!(matches!(unwrapped, Cow::Borrowed(_)));
        assert_eq!(unwrapped.as_ref(), raw.as_slice());
    }

    #[test]
    fn test_corrupted_stream() {
        let mut envelope = COMPRESSED_REPORT_MAGIC.to_vec();
        envelope.extend_from_slice(b"\xff\xff\xff\xffgarbage");

        let err = decompress(&envelope).unwrap_err();
        assert!(matches!(err, EnvelopeError::Corrupted));
    }

    #[test]
    fn test_maximum_size_exceeded() {
        let report = vec![0u8; MAX_UNCOMPRESSED_SIZE + 1];
        let envelope = compress(&report).unwrap();

        let err = decompress(&envelope).unwrap_err();
        assert!(matches!(
            err,
            EnvelopeError::MaximumSizeExceeded(MAX_UNCOMPRESSED_SIZE)
        ));
    }

    #[test]
    fn test_diagnostic_log() {
        let payload = b"log line one\nlog line two\n";
        let mut envelope = DIAGNOSTIC_LOG_MAGIC.to_vec();
        envelope.extend_from_slice(b"Device: iPhone\nOS: 17.0\n\n");
        envelope.extend_from_slice(&deflate(payload));

        let unwrapped = decompress(&envelope).unwrap();
        assert_eq!(unwrapped.as_ref(), payload);
    }

    #[test]
    fn test_diagnostic_log_missing_terminator() {
        let mut envelope = DIAGNOSTIC_LOG_MAGIC.to_vec();
        envelope.extend_from_slice(b"Device: iPhone\nOS: 17.0\n");

        let err = decompress(&envelope).unwrap_err();
        assert!(matches!(err, EnvelopeError::InvalidHeader));
    }

    #[test]
    fn test_empty_payload() {
        let mut envelope = DIAGNOSTIC_LOG_MAGIC.to_vec();
        envelope.extend_from_slice(b"Device: iPhone\n\n");

        let unwrapped = decompress(&envelope).unwrap();
        assert!(unwrapped.is_empty());
    }
}
