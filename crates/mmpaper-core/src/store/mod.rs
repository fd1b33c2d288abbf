//! Persistent schedule bookkeeping over an abstract key-value store.

use heapless::{String, Vec};

pub mod record;

use crate::{manifest::Token, time::WallTime};

pub const KEY_LAST_UPDATE_CHECK: &str = "lastUpdateCheck";
pub const KEY_LAST_UPDATE_DAY: &str = "lastUpdateDay";
pub const KEY_LAST_IMAGE_CHECK_HOUR: &str = "lastImageCheckHour";
pub const KEY_LAST_IMAGE_CHECK_DAY: &str = "lastImageCheckDay";
pub const KEY_IMAGE_MD5: &str = "imageMD5";

pub const MAX_KEY_LEN: usize = 24;
pub const MAX_VALUE_LEN: usize = 64;

/// Value stored under a key. Integers and short strings are all the schedule
/// needs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StoredValue {
    U32(u32),
    Str(String<MAX_VALUE_LEN>),
}

/// Abstract persistence backend. Values written must survive power loss and
/// deep sleep.
pub trait KeyValueStore {
    type Error;

    fn get(&mut self, key: &str) -> Result<Option<StoredValue>, Self::Error>;
    fn put(&mut self, key: &str, value: StoredValue) -> Result<(), Self::Error>;
    fn remove(&mut self, key: &str) -> Result<(), Self::Error>;

    fn get_u32(&mut self, key: &str) -> Result<Option<u32>, Self::Error> {
        Ok(match self.get(key)? {
            Some(StoredValue::U32(value)) => Some(value),
            _ => None,
        })
    }

    fn get_str(&mut self, key: &str) -> Result<Option<String<MAX_VALUE_LEN>>, Self::Error> {
        Ok(match self.get(key)? {
            Some(StoredValue::Str(value)) => Some(value),
            _ => None,
        })
    }

    fn put_u32(&mut self, key: &str, value: u32) -> Result<(), Self::Error> {
        self.put(key, StoredValue::U32(value))
    }

    fn put_str(&mut self, key: &str, value: &str) -> Result<(), Self::Error> {
        let mut owned = String::new();
        if owned.push_str(value).is_err() {
            // Callers only pass bounded tokens; keep the prefix rather than fail.
            for ch in value.chars() {
                if owned.push(ch).is_err() {
                    break;
                }
            }
        }
        self.put(key, StoredValue::Str(owned))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MemoryStoreError {
    Full,
    KeyTooLong,
}

/// RAM-only store. Used as the volatile fallback when flash is unavailable and
/// as the cache behind the flash-backed store.
#[derive(Clone, Debug)]
pub struct MemoryStore<const N: usize> {
    entries: Vec<(String<MAX_KEY_LEN>, StoredValue), N>,
    writes: u32,
}

impl<const N: usize> Default for MemoryStore<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> MemoryStore<N> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            writes: 0,
        }
    }

    /// Number of successful mutations since construction.
    pub const fn writes(&self) -> u32 {
        self.writes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StoredValue)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k.as_str() == key)
    }
}

impl<const N: usize> KeyValueStore for MemoryStore<N> {
    type Error = MemoryStoreError;

    fn get(&mut self, key: &str) -> Result<Option<StoredValue>, Self::Error> {
        Ok(self.position(key).map(|idx| self.entries[idx].1.clone()))
    }

    fn put(&mut self, key: &str, value: StoredValue) -> Result<(), Self::Error> {
        if let Some(idx) = self.position(key) {
            self.entries[idx].1 = value;
        } else {
            let mut owned_key = String::new();
            owned_key
                .push_str(key)
                .map_err(|_| MemoryStoreError::KeyTooLong)?;
            self.entries
                .push((owned_key, value))
                .map_err(|_| MemoryStoreError::Full)?;
        }
        self.writes = self.writes.wrapping_add(1);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), Self::Error> {
        if let Some(idx) = self.position(key) {
            self.entries.swap_remove(idx);
            self.writes = self.writes.wrapping_add(1);
        }
        Ok(())
    }
}

/// Schedule bookkeeping that survives reboots and deep sleep.
///
/// Absent keys load as `None` ("never"), which is distinct from hour or day 0.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScheduleRecord {
    pub last_firmware_check_at: Option<u32>,
    pub last_firmware_check_day: Option<u8>,
    pub last_content_check_hour: Option<u8>,
    pub last_content_check_day: Option<u8>,
    pub local_content_fingerprint: Token,
}

impl ScheduleRecord {
    pub fn load<S: KeyValueStore>(store: &mut S) -> Result<Self, S::Error> {
        let small = |value: Option<u32>| value.and_then(|v| u8::try_from(v).ok());

        let mut local_content_fingerprint = Token::new();
        if let Some(stored) = store.get_str(KEY_IMAGE_MD5)? {
            let _ = local_content_fingerprint.push_str(&stored);
        }

        Ok(Self {
            last_firmware_check_at: store.get_u32(KEY_LAST_UPDATE_CHECK)?,
            last_firmware_check_day: small(store.get_u32(KEY_LAST_UPDATE_DAY)?),
            last_content_check_hour: small(store.get_u32(KEY_LAST_IMAGE_CHECK_HOUR)?),
            last_content_check_day: small(store.get_u32(KEY_LAST_IMAGE_CHECK_DAY)?),
            local_content_fingerprint,
        })
    }

    /// Last recorded content window as `(hour, day)`, if both halves exist.
    pub fn content_window(&self) -> Option<(u8, u8)> {
        Some((self.last_content_check_hour?, self.last_content_check_day?))
    }

    /// Records a firmware check. The in-memory record changes even when the
    /// store write fails.
    pub fn record_firmware_check<S: KeyValueStore>(
        &mut self,
        store: &mut S,
        now: &WallTime,
    ) -> Result<(), S::Error> {
        self.last_firmware_check_at = Some(now.unix);
        self.last_firmware_check_day = Some(now.day);
        store.put_u32(KEY_LAST_UPDATE_CHECK, now.unix)?;
        store.put_u32(KEY_LAST_UPDATE_DAY, now.day as u32)
    }

    pub fn record_content_window<S: KeyValueStore>(
        &mut self,
        store: &mut S,
        hour: u8,
        day: u8,
    ) -> Result<(), S::Error> {
        self.last_content_check_hour = Some(hour);
        self.last_content_check_day = Some(day);
        store.put_u32(KEY_LAST_IMAGE_CHECK_HOUR, hour as u32)?;
        store.put_u32(KEY_LAST_IMAGE_CHECK_DAY, day as u32)
    }

    /// Adopts a new local fingerprint. Only call once the artifact it names is
    /// installed and on screen.
    pub fn commit_fingerprint<S: KeyValueStore>(
        &mut self,
        store: &mut S,
        fingerprint: &Token,
    ) -> Result<(), S::Error> {
        self.local_content_fingerprint = fingerprint.clone();
        store.put_str(KEY_IMAGE_MD5, fingerprint.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(value: &str) -> Token {
        let mut t = Token::new();
        t.push_str(value).unwrap();
        t
    }

    #[test]
    fn empty_store_loads_as_never() {
        let mut store = MemoryStore::<8>::new();
        let record = ScheduleRecord::load(&mut store).unwrap();
        assert_eq!(record, ScheduleRecord::default());
        assert_eq!(record.content_window(), None);
    }

    #[test]
    fn hour_zero_is_distinct_from_absent() {
        let mut store = MemoryStore::<8>::new();
        let mut record = ScheduleRecord::default();
        record.record_content_window(&mut store, 0, 1).unwrap();

        let reloaded = ScheduleRecord::load(&mut store).unwrap();
        assert_eq!(reloaded.content_window(), Some((0, 1)));
    }

    #[test]
    fn records_round_trip_through_store() {
        let mut store = MemoryStore::<8>::new();
        let mut record = ScheduleRecord::default();
        let now = WallTime::from_unix(1_700_000_000, 0);
        record.record_firmware_check(&mut store, &now).unwrap();
        record.record_content_window(&mut store, 21, 14).unwrap();
        record
            .commit_fingerprint(&mut store, &token("5d41402abc4b2a76b9719d911017c592"))
            .unwrap();

        let reloaded = ScheduleRecord::load(&mut store).unwrap();
        assert_eq!(reloaded, record);
        assert_eq!(reloaded.last_firmware_check_day, Some(14));
        assert_eq!(store.writes(), 5);
    }

    #[test]
    fn mismatched_value_types_read_as_absent() {
        let mut store = MemoryStore::<8>::new();
        store.put_str(KEY_LAST_IMAGE_CHECK_HOUR, "nine").unwrap();
        store.put_u32(KEY_IMAGE_MD5, 7).unwrap();
        store.put_u32(KEY_LAST_IMAGE_CHECK_DAY, 300).unwrap();

        let record = ScheduleRecord::load(&mut store).unwrap();
        assert_eq!(record.last_content_check_hour, None);
        assert_eq!(record.last_content_check_day, None);
        assert!(record.local_content_fingerprint.is_empty());
    }

    #[test]
    fn memory_store_reports_capacity_and_key_limits() {
        let mut store = MemoryStore::<1>::new();
        store.put_u32("a", 1).unwrap();
        store.put_u32("a", 2).unwrap();
        assert_eq!(store.get_u32("a").unwrap(), Some(2));
        assert_eq!(store.put_u32("b", 1), Err(MemoryStoreError::Full));
        store.remove("a").unwrap();
        assert_eq!(
            store.put_u32("a-key-that-is-far-too-long-to-fit", 1),
            Err(MemoryStoreError::KeyTooLong)
        );
        assert!(store.is_empty());
    }
}
