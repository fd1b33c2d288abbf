use log::warn;
use mmpaper_core::store::{KeyValueStore, MemoryStore, MemoryStoreError, StoredValue};
use mmpaper_hal_esp32s3::storage::flash_store::{FlashStore, FlashStoreError};

const VOLATILE_ENTRIES: usize = 8;

#[derive(Debug)]
pub(super) enum ScheduleStoreError {
    Flash(FlashStoreError),
    Volatile(MemoryStoreError),
}

/// Flash-backed schedule store, or a RAM store when the sector is unusable.
/// The RAM variant forgets everything across deep sleep.
pub(super) enum ScheduleStore {
    Flash(FlashStore),
    Volatile(MemoryStore<VOLATILE_ENTRIES>),
}

impl ScheduleStore {
    pub(super) fn open() -> Self {
        match FlashStore::open() {
            Ok(store) => Self::Flash(store),
            Err(err) => {
                warn!("store: flash unavailable ({:?}); schedule kept in RAM", err);
                Self::Volatile(MemoryStore::new())
            }
        }
    }
}

impl KeyValueStore for ScheduleStore {
    type Error = ScheduleStoreError;

    fn get(&mut self, key: &str) -> Result<Option<StoredValue>, Self::Error> {
        match self {
            Self::Flash(store) => store.get(key).map_err(ScheduleStoreError::Flash),
            Self::Volatile(store) => store.get(key).map_err(ScheduleStoreError::Volatile),
        }
    }

    fn put(&mut self, key: &str, value: StoredValue) -> Result<(), Self::Error> {
        match self {
            Self::Flash(store) => store.put(key, value).map_err(ScheduleStoreError::Flash),
            Self::Volatile(store) => store.put(key, value).map_err(ScheduleStoreError::Volatile),
        }
    }

    fn remove(&mut self, key: &str) -> Result<(), Self::Error> {
        match self {
            Self::Flash(store) => store.remove(key).map_err(ScheduleStoreError::Flash),
            Self::Volatile(store) => store.remove(key).map_err(ScheduleStoreError::Volatile),
        }
    }
}
