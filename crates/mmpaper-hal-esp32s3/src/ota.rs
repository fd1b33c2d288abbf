//! Firmware writer for the inactive OTA slot.

use embedded_storage::{ReadStorage, Storage};
use esp_bootloader_esp_idf::{
    ota::OtaImageState,
    ota_updater::OtaUpdater,
    partitions::{self, FlashRegion, PARTITION_TABLE_MAX_LEN},
};
use esp_storage::FlashStorage;
use log::{info, warn};
use mmpaper_core::install::{Completion, FlashUpdater};

const SECTOR_BYTES: usize = 4096;
/// First byte of every ESP application image.
const IMAGE_MAGIC: u8 = 0xE9;

#[derive(Debug)]
pub enum OtaError {
    Partition(partitions::Error),
    /// Write past the slot or without `begin`.
    OutOfRange,
    /// Image header magic missing after the download.
    InvalidImage,
}

pub struct OtaFlash<'d> {
    flash: FlashStorage<'d>,
    table: [u8; PARTITION_TABLE_MAX_LEN],
    capacity: u32,
    sector: [u8; SECTOR_BYTES],
    filled: usize,
    /// Slot offset of `sector[0]`.
    offset: u32,
    expected: Option<u32>,
    /// Boot selection moved to the new slot without its state being recorded.
    activated: bool,
}

fn with_next_region<R>(
    flash: &mut FlashStorage<'_>,
    table: &mut [u8; PARTITION_TABLE_MAX_LEN],
    f: impl FnOnce(&mut FlashRegion<'_, FlashStorage<'_>>) -> Result<R, OtaError>,
) -> Result<R, OtaError> {
    let mut ota = OtaUpdater::new(flash, table).map_err(OtaError::Partition)?;
    let (mut region, _) = ota.next_partition().map_err(OtaError::Partition)?;
    f(&mut region)
}

impl<'d> OtaFlash<'d> {
    pub fn new(flash: FlashStorage<'d>) -> Result<Self, OtaError> {
        let mut this = Self {
            flash,
            table: [0u8; PARTITION_TABLE_MAX_LEN],
            capacity: 0,
            sector: [0xFF; SECTOR_BYTES],
            filled: 0,
            offset: 0,
            expected: None,
            activated: false,
        };
        this.capacity = with_next_region(&mut this.flash, &mut this.table, |region| {
            Ok(region.capacity() as u32)
        })?;
        info!("ota: next slot capacity={}", this.capacity);
        Ok(this)
    }

    /// Marks a freshly booted image as good so the bootloader keeps it.
    pub fn confirm_running(&mut self) -> Result<(), OtaError> {
        let mut ota =
            OtaUpdater::new(&mut self.flash, &mut self.table).map_err(OtaError::Partition)?;
        let state = ota.current_ota_state().map_err(OtaError::Partition)?;
        if matches!(state, OtaImageState::New | OtaImageState::PendingVerify) {
            ota.set_current_ota_state(OtaImageState::Valid)
                .map_err(OtaError::Partition)?;
            info!("ota: running image confirmed");
        }
        Ok(())
    }

    fn flush_sector(&mut self) -> Result<(), OtaError> {
        if self.filled == 0 {
            return Ok(());
        }
        let offset = self.offset;
        let data = &self.sector[..self.filled];
        with_next_region(&mut self.flash, &mut self.table, |region| {
            region.write(offset, data).map_err(OtaError::Partition)
        })?;
        self.offset += self.filled as u32;
        self.filled = 0;
        Ok(())
    }

    /// Points the boot selection back at the running slot. With two OTA
    /// slots the "next" slot of the new selection is the running one.
    fn revert_activation(&mut self) -> Result<(), OtaError> {
        let mut ota =
            OtaUpdater::new(&mut self.flash, &mut self.table).map_err(OtaError::Partition)?;
        ota.activate_next_partition().map_err(OtaError::Partition)?;
        ota.set_current_ota_state(OtaImageState::Valid)
            .map_err(OtaError::Partition)
    }

    fn reset(&mut self) {
        self.expected = None;
        self.filled = 0;
        self.offset = 0;
    }
}

impl FlashUpdater for OtaFlash<'_> {
    type Error = OtaError;

    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn begin(&mut self, len: u32) -> Result<(), Self::Error> {
        if len > self.capacity {
            return Err(OtaError::OutOfRange);
        }
        self.reset();
        self.expected = Some(len);
        Ok(())
    }

    fn write(&mut self, mut chunk: &[u8]) -> Result<(), Self::Error> {
        let expected = self.expected.ok_or(OtaError::OutOfRange)?;
        let written = self.offset as usize + self.filled;
        if written + chunk.len() > expected as usize {
            return Err(OtaError::OutOfRange);
        }

        while !chunk.is_empty() {
            let n = (SECTOR_BYTES - self.filled).min(chunk.len());
            self.sector[self.filled..self.filled + n].copy_from_slice(&chunk[..n]);
            self.filled += n;
            chunk = &chunk[n..];
            if self.filled == SECTOR_BYTES {
                self.flush_sector()?;
            }
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<Completion, Self::Error> {
        self.expected.ok_or(OtaError::OutOfRange)?;
        self.flush_sector()?;

        let mut magic = [0u8; 1];
        with_next_region(&mut self.flash, &mut self.table, |region| {
            region.read(0, &mut magic).map_err(OtaError::Partition)
        })?;
        if magic[0] != IMAGE_MAGIC {
            warn!("ota: image magic 0x{:02x}; not activating", magic[0]);
            self.reset();
            return Err(OtaError::InvalidImage);
        }

        let mut ota =
            OtaUpdater::new(&mut self.flash, &mut self.table).map_err(OtaError::Partition)?;
        ota.activate_next_partition().map_err(OtaError::Partition)?;
        let completion = match ota.set_current_ota_state(OtaImageState::New) {
            Ok(()) => Completion::Complete,
            Err(err) => {
                warn!("ota: slot activated but state not recorded: {:?}", err);
                Completion::Uncertain
            }
        };
        self.reset();
        self.activated = completion == Completion::Uncertain;
        info!("ota: finalize -> {:?}", completion);
        Ok(completion)
    }

    fn abort(&mut self) {
        if self.expected.is_some() {
            info!("ota: abort after {} bytes", self.offset as usize + self.filled);
        }
        if self.activated {
            match self.revert_activation() {
                Ok(()) => info!("ota: boot selection reverted to running image"),
                Err(err) => warn!("ota: could not revert boot selection: {:?}", err),
            }
            self.activated = false;
        }
        self.reset();
    }
}
