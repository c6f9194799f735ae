//! FLAC stream fingerprinting.
//!
//! The fingerprint is the MD5 digest of the unencoded audio stream that the
//! FLAC encoder records in the STREAMINFO metadata block. Reading it touches
//! only the metadata header at the front of the file, so fingerprinting a
//! large library stays cheap, and the value is stable across tag-only edits.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const FLAC_MAGIC: &[u8; 4] = b"fLaC";
const STREAMINFO_BLOCK_TYPE: u8 = 0;
const STREAMINFO_LEN: usize = 34;
const MD5_OFFSET: usize = 18;

/// Content identity of a source audio stream.
///
/// Wraps the lowercase hex form of the STREAMINFO MD5. Not a full-file hash:
/// retagging a file does not change its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_md5(bytes: &[u8; 16]) -> Self {
        use fmt::Write;

        let mut hex = String::with_capacity(32);
        for b in bytes {
            let _ = write!(hex, "{:02x}", b);
        }
        Self(hex)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity derived from a source path rather than stream content.
///
/// Used when fingerprinting is turned off; tracking then follows the file
/// name, and a moved file is a removal plus an addition.
pub fn path_identity(rel_path: &str) -> Fingerprint {
    use sha2::{Digest, Sha256};

    let digest = Sha256::digest(rel_path.as_bytes());
    let mut hex = String::with_capacity(24);
    for b in &digest[..12] {
        use fmt::Write;
        let _ = write!(hex, "{:02x}", b);
    }
    Fingerprint(format!("path-{hex}"))
}

/// Errors raised while reading a stream fingerprint.
#[derive(Debug, Error)]
pub enum FingerprintError {
    /// File does not start with a FLAC stream marker.
    #[error("not a FLAC stream")]
    NotFlac,

    /// Metadata block structure is malformed or truncated.
    #[error("malformed FLAC metadata: {0}")]
    Malformed(&'static str),

    /// The STREAMINFO MD5 field was left zeroed by the encoder.
    #[error("stream MD5 not recorded by the encoder")]
    MissingMd5,

    /// I/O error while reading the header.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FingerprintError {
    /// True when the file itself is corrupt, as opposed to a transient read
    /// failure or an encoder that never filled in the MD5 field.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            FingerprintError::NotFlac | FingerprintError::Malformed(_)
        )
    }
}

/// Reads the stream fingerprint from the STREAMINFO block of a FLAC file.
pub fn read_fingerprint(path: &Path) -> Result<Fingerprint, FingerprintError> {
    let mut file = File::open(path)?;
    read_fingerprint_from(&mut file)
}

fn read_fingerprint_from<R: Read + Seek>(reader: &mut R) -> Result<Fingerprint, FingerprintError> {
    let mut magic = [0u8; 4];
    read_header_bytes(reader, &mut magic, "truncated stream marker")?;
    if &magic != FLAC_MAGIC {
        return Err(FingerprintError::NotFlac);
    }

    loop {
        let mut header = [0u8; 4];
        read_header_bytes(reader, &mut header, "truncated block header")?;
        let last = header[0] & 0x80 != 0;
        let block_type = header[0] & 0x7f;
        let length = u32::from_be_bytes([0, header[1], header[2], header[3]]) as usize;

        if block_type == STREAMINFO_BLOCK_TYPE {
            if length != STREAMINFO_LEN {
                return Err(FingerprintError::Malformed("bad STREAMINFO length"));
            }
            let mut block = [0u8; STREAMINFO_LEN];
            read_header_bytes(reader, &mut block, "truncated STREAMINFO block")?;

            let mut md5 = [0u8; 16];
            md5.copy_from_slice(&block[MD5_OFFSET..MD5_OFFSET + 16]);
            if md5.iter().all(|b| *b == 0) {
                return Err(FingerprintError::MissingMd5);
            }
            return Ok(Fingerprint::from_md5(&md5));
        }

        if last {
            return Err(FingerprintError::Malformed("no STREAMINFO block"));
        }
        reader
            .seek(SeekFrom::Current(length as i64))
            .map_err(FingerprintError::Io)?;
    }
}

fn read_header_bytes<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    what: &'static str,
) -> Result<(), FingerprintError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => FingerprintError::Malformed(what),
        _ => FingerprintError::Io(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn streaminfo_block(md5: [u8; 16], last: bool) -> Vec<u8> {
        let mut block = Vec::new();
        let header_byte = if last { 0x80 } else { 0x00 };
        block.push(header_byte);
        block.extend_from_slice(&[0, 0, STREAMINFO_LEN as u8]);
        let mut body = [0u8; STREAMINFO_LEN];
        body[MD5_OFFSET..].copy_from_slice(&md5);
        block.extend_from_slice(&body);
        block
    }

    fn flac_with_md5(md5: [u8; 16]) -> Vec<u8> {
        let mut data = FLAC_MAGIC.to_vec();
        data.extend(streaminfo_block(md5, true));
        data
    }

    #[test]
    fn test_reads_md5_from_streaminfo() {
        let md5 = [0xab; 16];
        let fp = read_fingerprint_from(&mut Cursor::new(flac_with_md5(md5))).unwrap();
        assert_eq!(fp.as_str(), "ab".repeat(16));
    }

    #[test]
    fn test_rejects_non_flac() {
        let err = read_fingerprint_from(&mut Cursor::new(b"ID3\x04junk".to_vec())).unwrap_err();
        assert!(matches!(err, FingerprintError::NotFlac));
        assert!(err.is_corruption());
    }

    #[test]
    fn test_zero_md5_is_missing_not_corrupt() {
        let err = read_fingerprint_from(&mut Cursor::new(flac_with_md5([0; 16]))).unwrap_err();
        assert!(matches!(err, FingerprintError::MissingMd5));
        assert!(!err.is_corruption());
    }

    #[test]
    fn test_truncated_header_is_malformed() {
        let mut data = FLAC_MAGIC.to_vec();
        data.extend_from_slice(&[0x00, 0x00]);
        let err = read_fingerprint_from(&mut Cursor::new(data)).unwrap_err();
        assert!(matches!(err, FingerprintError::Malformed(_)));
    }

    #[test]
    fn test_skips_leading_blocks() {
        // A VORBIS_COMMENT block (type 4) before STREAMINFO; tolerated even
        // though spec-conformant files put STREAMINFO first.
        let mut data = FLAC_MAGIC.to_vec();
        data.push(0x04);
        data.extend_from_slice(&[0, 0, 3]);
        data.extend_from_slice(b"xyz");
        data.extend(streaminfo_block([0x01; 16], true));

        let fp = read_fingerprint_from(&mut Cursor::new(data)).unwrap();
        assert_eq!(fp.as_str(), "01".repeat(16));
    }

    #[test]
    fn test_fingerprint_display_roundtrip() {
        let fp = Fingerprint::new("deadbeef");
        assert_eq!(fp.to_string(), "deadbeef");
        assert_eq!(Fingerprint::new("deadbeef"), fp);
    }
}
