//! Frame encoding/decoding with CRC32 checksums
//!
//! ## Frame format
//!
//! ```text
//! +-------------+---------------+---------------------+
//! | len: u32 LE | crc32: u32 LE | payload (len bytes) |
//! +-------------+---------------+---------------------+
//! ```
//!
//! The payload is the bincode encoding of one record; the checksum covers
//! the payload only. State entries and ordered store operations share the
//! format.
//!
//! A frame cut short by the end of the buffer is a torn write and decodes
//! as `None`. A complete frame with a bad checksum or an undecodable
//! payload is corruption.

use crate::entry::StateEntry;
use changelog_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Size of the frame header
pub const FRAME_HEADER_LEN: usize = 8;

/// Largest accepted payload
///
/// Update payloads are opaque and may be large; anything beyond this is
/// garbage.
pub const MAX_ENTRY_LEN: usize = 16 * 1024 * 1024;

/// Encode `record` into a frame
pub fn encode_frame<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    let payload = bincode::serialize(record).map_err(|e| Error::Serialization(e.to_string()))?;
    if payload.len() > MAX_ENTRY_LEN {
        return Err(Error::Serialization(format!(
            "record too large: {} bytes",
            payload.len()
        )));
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode the frame at the start of `buf`
///
/// `offset` is the position of `buf` in the journal and is only used in
/// error reports.
///
/// # Returns
///
/// - `Ok(Some((record, consumed)))` for a complete frame
/// - `Ok(None)` if `buf` ends before the frame does
///
/// # Errors
///
/// `Corruption` if the length is out of range, the checksum does not match
/// or the payload does not decode.
pub fn decode_frame<T: DeserializeOwned>(buf: &[u8], offset: u64) -> Result<Option<(T, usize)>> {
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let expected_crc = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);

    if len > MAX_ENTRY_LEN {
        return Err(Error::Corruption {
            offset,
            reason: format!("entry length {} exceeds {}", len, MAX_ENTRY_LEN),
        });
    }
    let end = FRAME_HEADER_LEN + len;
    if buf.len() < end {
        return Ok(None);
    }

    let payload = &buf[FRAME_HEADER_LEN..end];
    let actual_crc = crc32fast::hash(payload);
    if actual_crc != expected_crc {
        return Err(Error::Corruption {
            offset,
            reason: format!(
                "checksum mismatch: expected {:08x}, found {:08x}",
                expected_crc, actual_crc
            ),
        });
    }

    let record = bincode::deserialize(payload).map_err(|e| Error::Corruption {
        offset,
        reason: format!("undecodable entry: {}", e),
    })?;
    Ok(Some((record, end)))
}

/// Encode a state entry into a frame
pub fn encode_entry(entry: &StateEntry) -> Result<Vec<u8>> {
    encode_frame(entry)
}

/// Decode the state entry frame at the start of `buf`
pub fn decode_entry(buf: &[u8], offset: u64) -> Result<Option<(StateEntry, usize)>> {
    decode_frame(buf, offset)
}
