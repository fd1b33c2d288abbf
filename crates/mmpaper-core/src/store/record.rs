//! Single-sector binary image of a [`MemoryStore`], for flash-backed stores.
//!
//! Layout, little-endian:
//!
//! ```text
//! [magic:4][version:1][count:1][payload_len:2]
//! count x [key_len:1][tag:1][value_len:1][key][value]
//! [fnv1a32 over everything before it:4]
//! ```

use super::{KeyValueStore, MAX_KEY_LEN, MAX_VALUE_LEN, MemoryStore, StoredValue};
use heapless::String;

pub const RECORD_MAGIC: u32 = 0x314B_4D4D; // "MMK1"
pub const RECORD_VERSION: u8 = 1;
const HEADER_LEN: usize = 8;
const CHECKSUM_LEN: usize = 4;
const TAG_U32: u8 = 0;
const TAG_STR: u8 = 1;

/// Room for eight keys at their maximum sizes.
pub const RECORD_MAX_BYTES: usize =
    HEADER_LEN + 8 * (3 + MAX_KEY_LEN + MAX_VALUE_LEN) + CHECKSUM_LEN;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordError {
    /// Checksum mismatch, truncated entry or unknown tag.
    Corrupted,
    /// Encoded entries do not fit the output buffer.
    TooLarge,
    /// More entries than the target store holds.
    TooManyEntries,
}

impl RecordError {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Corrupted => "corrupted",
            Self::TooLarge => "too large",
            Self::TooManyEntries => "too many entries",
        }
    }
}

/// Serializes every entry of `store` into `out`. Returns the encoded length.
pub fn encode<const N: usize>(
    store: &MemoryStore<N>,
    out: &mut [u8],
) -> Result<usize, RecordError> {
    if out.len() < HEADER_LEN + CHECKSUM_LEN || store.len() > u8::MAX as usize {
        return Err(RecordError::TooLarge);
    }

    let mut pos = HEADER_LEN;
    for (key, value) in store.iter() {
        let word;
        let (tag, bytes): (u8, &[u8]) = match value {
            StoredValue::U32(v) => {
                word = v.to_le_bytes();
                (TAG_U32, &word)
            }
            StoredValue::Str(s) => (TAG_STR, s.as_bytes()),
        };
        let entry_len = 3 + key.len() + bytes.len();
        if pos + entry_len + CHECKSUM_LEN > out.len() {
            return Err(RecordError::TooLarge);
        }
        out[pos] = key.len() as u8;
        out[pos + 1] = tag;
        out[pos + 2] = bytes.len() as u8;
        out[pos + 3..pos + 3 + key.len()].copy_from_slice(key.as_bytes());
        out[pos + 3 + key.len()..pos + entry_len].copy_from_slice(bytes);
        pos += entry_len;
    }

    out[0..4].copy_from_slice(&RECORD_MAGIC.to_le_bytes());
    out[4] = RECORD_VERSION;
    out[5] = store.len() as u8;
    out[6..8].copy_from_slice(&((pos - HEADER_LEN) as u16).to_le_bytes());
    let checksum = checksum32(&out[..pos]);
    out[pos..pos + CHECKSUM_LEN].copy_from_slice(&checksum.to_le_bytes());
    Ok(pos + CHECKSUM_LEN)
}

/// Parses a record. Erased flash, a foreign magic or an unknown version read
/// as `Ok(None)`.
pub fn decode<const N: usize>(bytes: &[u8]) -> Result<Option<MemoryStore<N>>, RecordError> {
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Ok(None);
    }
    let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if magic != RECORD_MAGIC || bytes[4] != RECORD_VERSION {
        return Ok(None);
    }

    let count = bytes[5] as usize;
    let payload_len = u16::from_le_bytes([bytes[6], bytes[7]]) as usize;
    let end = HEADER_LEN + payload_len;
    if end + CHECKSUM_LEN > bytes.len() {
        return Err(RecordError::Corrupted);
    }
    let expected = u32::from_le_bytes([
        bytes[end],
        bytes[end + 1],
        bytes[end + 2],
        bytes[end + 3],
    ]);
    if checksum32(&bytes[..end]) != expected {
        return Err(RecordError::Corrupted);
    }
    if count > N {
        return Err(RecordError::TooManyEntries);
    }

    let mut store = MemoryStore::<N>::new();
    let mut pos = HEADER_LEN;
    for _ in 0..count {
        if pos + 3 > end {
            return Err(RecordError::Corrupted);
        }
        let key_len = bytes[pos] as usize;
        let tag = bytes[pos + 1];
        let value_len = bytes[pos + 2] as usize;
        let key_start = pos + 3;
        let value_start = key_start + key_len;
        let next = value_start + value_len;
        if next > end || key_len > MAX_KEY_LEN {
            return Err(RecordError::Corrupted);
        }

        let key = core::str::from_utf8(&bytes[key_start..value_start])
            .map_err(|_| RecordError::Corrupted)?;
        let raw = &bytes[value_start..next];
        let value = match (tag, raw) {
            (TAG_U32, &[a, b, c, d]) => StoredValue::U32(u32::from_le_bytes([a, b, c, d])),
            (TAG_STR, _) => {
                let text = core::str::from_utf8(raw).map_err(|_| RecordError::Corrupted)?;
                let mut owned = String::<MAX_VALUE_LEN>::new();
                owned.push_str(text).map_err(|_| RecordError::Corrupted)?;
                StoredValue::Str(owned)
            }
            _ => return Err(RecordError::Corrupted),
        };
        store
            .put(key, value)
            .map_err(|_| RecordError::TooManyEntries)?;
        pos = next;
    }

    if pos != end {
        return Err(RecordError::Corrupted);
    }
    Ok(Some(store))
}

/// FNV-1a, 32 bit.
pub fn checksum32(bytes: &[u8]) -> u32 {
    let mut hash = 0x811C_9DC5u32;
    for b in bytes {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}
