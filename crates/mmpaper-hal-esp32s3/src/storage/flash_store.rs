//! Schedule store in the last sector of a spare data partition.
//!
//! Reads go through a RAM cache loaded once at boot; every mutation rewrites
//! the whole record.

use embedded_storage::{ReadStorage, Storage};
use esp_bootloader_esp_idf::partitions::{
    DataPartitionSubType, PARTITION_TABLE_MAX_LEN, PartitionType, read_partition_table,
};
use esp_rom_sys::rom::spiflash::{
    ESP_ROM_SPIFLASH_RESULT_OK, esp_rom_spiflash_erase_sector, esp_rom_spiflash_read,
    esp_rom_spiflash_unlock, esp_rom_spiflash_write,
};
use log::{info, warn};
use mmpaper_core::store::{
    KeyValueStore, MemoryStore, MemoryStoreError, StoredValue,
    record::{self, RECORD_MAX_BYTES, RecordError},
};

const FLASH_SECTOR_SIZE: u32 = 4096;
const FLASH_CAPACITY_BYTES: usize = 16 * 1024 * 1024;
const CACHE_ENTRIES: usize = 8;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FlashStoreError {
    PartitionTable,
    PartitionMissing,
    FlashOpFailed(i32),
    Unaligned,
    Record(RecordError),
    Cache(MemoryStoreError),
}

impl From<RecordError> for FlashStoreError {
    fn from(err: RecordError) -> Self {
        Self::Record(err)
    }
}

impl From<MemoryStoreError> for FlashStoreError {
    fn from(err: MemoryStoreError) -> Self {
        Self::Cache(err)
    }
}

/// Word-granular access through the ROM SPI flash routines.
#[derive(Debug)]
struct RomFlash;

impl RomFlash {
    fn unlock() -> Result<Self, FlashStoreError> {
        check(unsafe { esp_rom_spiflash_unlock() })?;
        Ok(Self)
    }

    fn erase_sector(&mut self, addr: u32) -> Result<(), FlashStoreError> {
        if !addr.is_multiple_of(FLASH_SECTOR_SIZE) {
            return Err(FlashStoreError::Unaligned);
        }
        check(unsafe { esp_rom_spiflash_erase_sector(addr / FLASH_SECTOR_SIZE) })
    }

    /// `addr` must be word aligned; the tail word is read whole and trimmed.
    fn read(&mut self, addr: u32, out: &mut [u8]) -> Result<(), FlashStoreError> {
        if !addr.is_multiple_of(4) {
            return Err(FlashStoreError::Unaligned);
        }
        for (i, chunk) in out.chunks_mut(4).enumerate() {
            let mut word = 0u32;
            let rc = unsafe {
                esp_rom_spiflash_read(addr + 4 * i as u32, &mut word as *mut u32 as *const u32, 4)
            };
            check(rc)?;
            chunk.copy_from_slice(&word.to_le_bytes()[..chunk.len()]);
        }
        Ok(())
    }

    /// Programs an erased, word-aligned range. Padding bytes stay `0xFF`.
    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashStoreError> {
        if !addr.is_multiple_of(4) {
            return Err(FlashStoreError::Unaligned);
        }
        for (i, chunk) in data.chunks(4).enumerate() {
            let mut bytes = [0xFFu8; 4];
            bytes[..chunk.len()].copy_from_slice(chunk);
            let word = u32::from_le_bytes(bytes);
            check(unsafe { esp_rom_spiflash_write(addr + 4 * i as u32, &word as *const u32, 4) })?;
        }
        Ok(())
    }
}

fn check(rc: i32) -> Result<(), FlashStoreError> {
    if rc == ESP_ROM_SPIFLASH_RESULT_OK {
        Ok(())
    } else {
        Err(FlashStoreError::FlashOpFailed(rc))
    }
}

impl ReadStorage for RomFlash {
    type Error = FlashStoreError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        RomFlash::read(self, offset, bytes)
    }

    fn capacity(&self) -> usize {
        FLASH_CAPACITY_BYTES
    }
}

// Only needed to satisfy `read_partition_table`.
impl Storage for RomFlash {
    fn write(&mut self, _offset: u32, _bytes: &[u8]) -> Result<(), Self::Error> {
        Err(FlashStoreError::Unaligned)
    }
}

/// [`KeyValueStore`] persisted in one flash sector.
#[derive(Debug)]
pub struct FlashStore {
    flash: RomFlash,
    sector_addr: u32,
    cache: MemoryStore<CACHE_ENTRIES>,
}

impl FlashStore {
    /// Locates the store sector and loads the record. A corrupted record is
    /// logged and treated as empty.
    pub fn open() -> Result<Self, FlashStoreError> {
        let mut flash = RomFlash::unlock()?;
        let sector_addr = locate_sector(&mut flash)?;

        let mut buf = [0u8; RECORD_MAX_BYTES];
        flash.read(sector_addr, &mut buf)?;
        let cache = match record::decode::<CACHE_ENTRIES>(&buf) {
            Ok(Some(cache)) => cache,
            Ok(None) => MemoryStore::new(),
            Err(err) => {
                warn!("store: record {} at 0x{:x}; starting empty", err.as_str(), sector_addr);
                MemoryStore::new()
            }
        };
        info!(
            "store: sector=0x{:x} keys={}",
            sector_addr,
            cache.len()
        );

        Ok(Self {
            flash,
            sector_addr,
            cache,
        })
    }

    fn persist(&mut self) -> Result<(), FlashStoreError> {
        let mut buf = [0xFFu8; RECORD_MAX_BYTES];
        let len = record::encode(&self.cache, &mut buf)?;
        self.flash.erase_sector(self.sector_addr)?;
        self.flash.program(self.sector_addr, &buf[..len])
    }
}

/// Last sector of the first writable `data/undefined` partition, falling back
/// to the NVS partition.
fn locate_sector(flash: &mut RomFlash) -> Result<u32, FlashStoreError> {
    let mut table_buf = [0u8; PARTITION_TABLE_MAX_LEN];
    let table = read_partition_table(flash, &mut table_buf)
        .map_err(|_| FlashStoreError::PartitionTable)?;

    let mut nvs = None;
    for entry in table.iter() {
        if entry.is_read_only() || entry.len() < FLASH_SECTOR_SIZE {
            continue;
        }
        match entry.partition_type() {
            PartitionType::Data(DataPartitionSubType::Undefined) => {
                return Ok(entry.offset() + entry.len() - FLASH_SECTOR_SIZE);
            }
            PartitionType::Data(DataPartitionSubType::Nvs) if nvs.is_none() => {
                nvs = Some(entry.offset() + entry.len() - FLASH_SECTOR_SIZE);
            }
            _ => {}
        }
    }
    nvs.ok_or(FlashStoreError::PartitionMissing)
}

impl KeyValueStore for FlashStore {
    type Error = FlashStoreError;

    fn get(&mut self, key: &str) -> Result<Option<StoredValue>, Self::Error> {
        Ok(self.cache.get(key)?)
    }

    fn put(&mut self, key: &str, value: StoredValue) -> Result<(), Self::Error> {
        if self.cache.get(key)?.as_ref() == Some(&value) {
            return Ok(());
        }
        self.cache.put(key, value)?;
        self.persist()
    }

    fn remove(&mut self, key: &str) -> Result<(), Self::Error> {
        if self.cache.get(key)?.is_none() {
            return Ok(());
        }
        self.cache.remove(key)?;
        self.persist()
    }
}
