//! Binary codec for snapshot files.
//!
//! A snapshot file is:
//! - a header (magic + codec version)
//! - a framed [`FrameHeader`] naming the save generation
//! - a framed JSON body
//!
//! Each frame is length-prefixed and CRC32-checked, so truncation and bit
//! flips are detected on load.

use std::io::{Cursor, Read, Write};

use chrono::{DateTime, Utc};
use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::PersistenceError;

/// Current codec version.
pub(crate) const CODEC_VERSION: u8 = 1;

/// Magic bytes identifying snapshot files.
pub(crate) const MAGIC: [u8; 4] = *b"BIBM";

/// Largest frame accepted on load (100 MB).
const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Metadata written before each snapshot body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct FrameHeader {
    /// Shared by the graph and provenance files of one save.
    pub generation: uuid::Uuid,
    /// When the file was encoded.
    pub saved_at: DateTime<Utc>,
    /// Kind of body that follows.
    pub what: String,
}

fn corrupted(what: &'static str, message: impl Into<String>) -> PersistenceError {
    PersistenceError::Corrupted {
        what,
        message: message.into(),
    }
}

/// Serializes a value into one frame.
///
/// Format:
/// ```text
/// [version: 1 byte][length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
/// ```
pub(crate) fn encode<T: Serialize>(what: &'static str, value: &T) -> Result<Vec<u8>, PersistenceError> {
    let data = serde_json::to_vec(value).map_err(|e| PersistenceError::Encode {
        what,
        message: e.to_string(),
    })?;
    if data.len() > MAX_FRAME_SIZE {
        return Err(PersistenceError::Encode {
            what,
            message: format!("frame size {} exceeds maximum {MAX_FRAME_SIZE}", data.len()),
        });
    }

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let crc = hasher.finalize();

    let len = u32::try_from(data.len()).map_err(|_| PersistenceError::Encode {
        what,
        message: "frame length overflows u32".to_string(),
    })?;

    let mut out = Vec::with_capacity(1 + 4 + data.len() + 4);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// Deserializes one frame, verifying its checksum.
///
/// # Errors
/// - `Corrupted` on short reads, unsupported versions, oversized frames,
///   checksum mismatches or invalid JSON
pub(crate) fn decode<T: DeserializeOwned>(
    what: &'static str,
    reader: &mut impl Read,
) -> Result<T, PersistenceError> {
    let mut version = [0u8; 1];
    reader
        .read_exact(&mut version)
        .map_err(|e| corrupted(what, format!("truncated frame: {e}")))?;
    if version[0] != CODEC_VERSION {
        return Err(corrupted(
            what,
            format!("unsupported codec version: {} (expected {CODEC_VERSION})", version[0]),
        ));
    }

    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .map_err(|e| corrupted(what, format!("truncated frame: {e}")))?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(corrupted(
            what,
            format!("frame size {len} exceeds maximum {MAX_FRAME_SIZE}"),
        ));
    }

    let mut data = vec![0u8; len];
    reader
        .read_exact(&mut data)
        .map_err(|e| corrupted(what, format!("truncated frame: {e}")))?;

    let mut crc_bytes = [0u8; 4];
    reader
        .read_exact(&mut crc_bytes)
        .map_err(|e| corrupted(what, format!("truncated frame: {e}")))?;
    let stored_crc = u32::from_le_bytes(crc_bytes);

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let computed_crc = hasher.finalize();
    if stored_crc != computed_crc {
        return Err(corrupted(
            what,
            format!("CRC mismatch: stored={stored_crc:08x}, computed={computed_crc:08x}"),
        ));
    }

    serde_json::from_slice(&data).map_err(|e| corrupted(what, format!("deserialization failed: {e}")))
}

/// Write the file header (magic + version).
pub(crate) fn write_header(writer: &mut impl Write) -> std::io::Result<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])?;
    Ok(())
}

/// Read and validate the file header.
pub(crate) fn read_header(what: &'static str, reader: &mut impl Read) -> Result<u8, PersistenceError> {
    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|e| corrupted(what, format!("missing header: {e}")))?;
    if magic != MAGIC {
        return Err(corrupted(
            what,
            format!("invalid magic bytes: expected {MAGIC:?}, got {magic:?}"),
        ));
    }

    let mut version = [0u8; 1];
    reader
        .read_exact(&mut version)
        .map_err(|e| corrupted(what, format!("missing header: {e}")))?;
    if version[0] != CODEC_VERSION {
        return Err(corrupted(
            what,
            format!("unsupported file version: {} (expected {CODEC_VERSION})", version[0]),
        ));
    }
    Ok(version[0])
}

/// Encode a complete snapshot file: header, frame header, body.
pub(crate) fn encode_file<T: Serialize>(
    what: &'static str,
    generation: uuid::Uuid,
    body: &T,
) -> Result<Vec<u8>, PersistenceError> {
    let mut out = Vec::new();
    write_header(&mut out).map_err(|e| PersistenceError::Encode {
        what,
        message: e.to_string(),
    })?;
    let header = FrameHeader {
        generation,
        saved_at: Utc::now(),
        what: what.to_string(),
    };
    out.extend(encode(what, &header)?);
    out.extend(encode(what, body)?);
    Ok(out)
}

/// Decode a complete snapshot file, rejecting trailing bytes.
pub(crate) fn decode_file<T: DeserializeOwned>(
    what: &'static str,
    bytes: &[u8],
) -> Result<(FrameHeader, T), PersistenceError> {
    let mut cursor = Cursor::new(bytes);
    read_header(what, &mut cursor)?;
    let header: FrameHeader = decode(what, &mut cursor)?;
    if header.what != what {
        return Err(corrupted(
            what,
            format!("file holds '{}' instead", header.what),
        ));
    }
    let body: T = decode(what, &mut cursor)?;
    let consumed = usize::try_from(cursor.position()).unwrap_or(usize::MAX);
    if consumed != bytes.len() {
        return Err(corrupted(what, "trailing bytes after body"));
    }
    Ok((header, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_simple() {
        let value = "hello, world!".to_string();
        let encoded = encode("test", &value).unwrap();

        let mut cursor = Cursor::new(encoded);
        let decoded: String = decode("test", &mut cursor).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn test_detects_corruption() {
        let mut encoded = encode("test", &"test data".to_string()).unwrap();
        encoded[8] ^= 0xFF;

        let mut cursor = Cursor::new(encoded);
        let err = decode::<String>("test", &mut cursor).unwrap_err();
        assert!(matches!(err, PersistenceError::Corrupted { .. }));
    }

    #[test]
    fn test_rejects_oversized_entry() {
        let mut bad_data = vec![CODEC_VERSION];
        bad_data.extend_from_slice(&(200_000_000u32).to_le_bytes());

        let mut cursor = Cursor::new(bad_data);
        let err = decode::<String>("test", &mut cursor).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_header_roundtrip() {
        let mut buf = Vec::new();
        write_header(&mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_header("test", &mut cursor).unwrap(), CODEC_VERSION);
    }

    #[test]
    fn test_file_roundtrip_keeps_generation() {
        let generation = uuid::Uuid::new_v4();
        let bytes = encode_file("graph", generation, &vec![1u32, 2, 3]).unwrap();
        let (header, body): (FrameHeader, Vec<u32>) = decode_file("graph", &bytes).unwrap();
        assert_eq!(header.generation, generation);
        assert_eq!(body, vec![1, 2, 3]);
    }

    #[test]
    fn test_file_of_other_kind_is_rejected() {
        let bytes = encode_file("graph", uuid::Uuid::new_v4(), &0u8).unwrap();
        assert!(decode_file::<u8>("provenance", &bytes).is_err());
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let bytes = encode_file("graph", uuid::Uuid::new_v4(), &"body".to_string()).unwrap();
        let err = decode_file::<String>("graph", &bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(err, PersistenceError::Corrupted { .. }));
    }
}
