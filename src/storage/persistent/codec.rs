//! Framing codec for log files.
//!
//! Every record is framed as:
//! ```text
//! [version: 1 byte][length: 4 bytes LE][payload: N bytes JSON][crc32: 4 bytes LE]
//! ```
//! and every file starts with `[MAGIC: 4 bytes][VERSION: 1 byte]`.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

/// Current codec version.
pub const CODEC_VERSION: u8 = 1;

/// Magic bytes identifying a captiongraph log.
pub const MAGIC: [u8; 4] = *b"CGWL";

/// Size of the file header in bytes.
pub const HEADER_LEN: u64 = 5;

/// Frames larger than this are treated as corruption.
const MAX_FRAME_PAYLOAD: usize = 64 * 1024 * 1024;

fn invalid(message: String) -> IoError {
    IoError::new(ErrorKind::InvalidData, message)
}

fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Serializes a value into a single checksummed frame.
pub fn encode<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let payload =
        serde_json::to_vec(value).map_err(|e| invalid(format!("serialization failed: {e}")))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| invalid(format!("frame payload of {} bytes is too large", payload.len())))?;

    let mut frame = Vec::with_capacity(payload.len() + 9);
    frame.push(CODEC_VERSION);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&checksum(&payload).to_le_bytes());
    Ok(frame)
}

/// Reads one frame.
///
/// Returns `Ok(None)` at a clean end of input (no bytes before the frame).
/// A frame cut short surfaces as `ErrorKind::UnexpectedEof`; a checksum,
/// version or payload problem as `ErrorKind::InvalidData`.
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<Option<T>> {
    let mut version = [0u8; 1];
    if reader.read(&mut version)? == 0 {
        return Ok(None);
    }
    if version[0] != CODEC_VERSION {
        return Err(invalid(format!(
            "unsupported frame version {} (expected {CODEC_VERSION})",
            version[0]
        )));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_PAYLOAD {
        return Err(invalid(format!(
            "frame length {len} exceeds maximum {MAX_FRAME_PAYLOAD}"
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored = u32::from_le_bytes(crc_bytes);
    let computed = checksum(&payload);
    if stored != computed {
        return Err(invalid(format!(
            "CRC mismatch: stored={stored:08x}, computed={computed:08x}"
        )));
    }

    serde_json::from_slice(&payload)
        .map(Some)
        .map_err(|e| invalid(format!("deserialization failed: {e}")))
}

/// Offset of the first complete frame in `bytes` whose checksum matches.
///
/// Used to tell a torn final append (nothing valid after it) from a damaged
/// length field in the middle of a log.
#[must_use]
pub fn find_frame(bytes: &[u8]) -> Option<usize> {
    (0..bytes.len()).find(|&start| is_frame(&bytes[start..]))
}

fn is_frame(bytes: &[u8]) -> bool {
    let [version, l0, l1, l2, l3, rest @ ..] = bytes else {
        return false;
    };
    let len = u32::from_le_bytes([*l0, *l1, *l2, *l3]) as usize;
    if *version != CODEC_VERSION || len == 0 || len > MAX_FRAME_PAYLOAD || rest.len() < len + 4 {
        return false;
    }
    let (payload, crc) = rest.split_at(len);
    checksum(payload) == u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]])
}

/// Writes the file header.
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])
}

/// Reads and validates the file header.
pub fn read_header(reader: &mut impl Read) -> IoResult<()> {
    let mut header = [0u8; 5];
    reader.read_exact(&mut header)?;
    if header[..4] != MAGIC {
        return Err(invalid(format!(
            "invalid magic bytes: expected {MAGIC:?}, got {:?}",
            &header[..4]
        )));
    }
    if header[4] != CODEC_VERSION {
        return Err(invalid(format!("unsupported log version {}", header[4])));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_roundtrip_then_clean_eof() {
        let mut buf = encode(&"dog".to_string()).unwrap();
        buf.extend(encode(&"ball".to_string()).unwrap());

        let mut cursor = Cursor::new(buf);
        assert_eq!(decode::<String>(&mut cursor).unwrap().as_deref(), Some("dog"));
        assert_eq!(decode::<String>(&mut cursor).unwrap().as_deref(), Some("ball"));
        assert!(decode::<String>(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_truncated_frame_is_unexpected_eof() {
        let frame = encode(&"a fairly long payload".to_string()).unwrap();
        let mut cursor = Cursor::new(frame[..frame.len() - 3].to_vec());
        let err = decode::<String>(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_detects_corruption() {
        let mut frame = encode(&"test data".to_string()).unwrap();
        frame[7] ^= 0xFF;

        let err = decode::<String>(&mut Cursor::new(frame)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_rejects_oversized_frame() {
        let mut bad = vec![CODEC_VERSION];
        bad.extend_from_slice(&(200_000_000u32).to_le_bytes());
        let err = decode::<String>(&mut Cursor::new(bad)).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_find_frame_skips_garbage() {
        let frame = encode(&"ball".to_string()).unwrap();
        let mut bytes = vec![0xAB, CODEC_VERSION, 0xFF, 0x00];
        bytes.extend_from_slice(&frame);
        assert_eq!(find_frame(&bytes), Some(4));

        let torn = &frame[..frame.len() - 1];
        assert_eq!(find_frame(torn), None);
        assert_eq!(find_frame(&[]), None);
    }

    #[test]
    fn test_header_validation() {
        let mut buf = Vec::new();
        write_header(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, HEADER_LEN);
        read_header(&mut Cursor::new(buf)).unwrap();

        let err = read_header(&mut Cursor::new(b"XXXX\x01".to_vec())).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }
}
