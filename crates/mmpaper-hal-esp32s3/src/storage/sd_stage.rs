//! FAT staging area on the SD card, root directory only.

use embedded_hal::{
    delay::DelayNs,
    digital::OutputPin,
    spi::{Error as SpiErrorTrait, ErrorKind, ErrorType, Operation, SpiBus, SpiDevice},
};
use embedded_sdmmc::{
    Mode, RawDirectory, RawFile, RawVolume, SdCard, SdCardError, TimeSource, Timestamp, VolumeIdx,
    VolumeManager,
};
use log::{info, warn};
use mmpaper_core::install::StagingFs;

const COPY_CHUNK_BYTES: usize = 512;

/// FAT timestamps for files written by the updater.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedTimeSource;

impl TimeSource for FixedTimeSource {
    fn get_timestamp(&self) -> Timestamp {
        // 2025-01-01 00:00:00
        Timestamp {
            year_since_1970: 55,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

#[derive(Debug)]
pub enum SdStageError<BusErr, CsErr>
where
    BusErr: core::fmt::Debug,
    CsErr: core::fmt::Debug,
{
    ChipSelect(CsErr),
    Spi(BusErr),
    Card(SdCardError),
    Filesystem(embedded_sdmmc::Error<SdCardError>),
    /// `append` or `close` without a file from `create`.
    NotOpen,
}

impl<BusErr, CsErr> From<embedded_sdmmc::Error<SdCardError>> for SdStageError<BusErr, CsErr>
where
    BusErr: core::fmt::Debug,
    CsErr: core::fmt::Debug,
{
    fn from(err: embedded_sdmmc::Error<SdCardError>) -> Self {
        Self::Filesystem(err)
    }
}

#[derive(Debug)]
pub enum ExclusiveSpiError<BusErr, CsErr>
where
    BusErr: core::fmt::Debug,
    CsErr: core::fmt::Debug,
{
    Bus(BusErr),
    Cs(CsErr),
    DelayNotSupported,
}

impl<BusErr, CsErr> SpiErrorTrait for ExclusiveSpiError<BusErr, CsErr>
where
    BusErr: core::fmt::Debug,
    CsErr: core::fmt::Debug,
{
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Owns the SD bus and its chip select for the life of the mount.
pub struct ExclusiveSpiDevice<BUS, CS> {
    bus: BUS,
    cs: CS,
}

impl<BUS, CS> ErrorType for ExclusiveSpiDevice<BUS, CS>
where
    BUS: SpiBus<u8>,
    CS: OutputPin,
    BUS::Error: core::fmt::Debug,
    CS::Error: core::fmt::Debug,
{
    type Error = ExclusiveSpiError<BUS::Error, CS::Error>;
}

impl<BUS, CS> SpiDevice<u8> for ExclusiveSpiDevice<BUS, CS>
where
    BUS: SpiBus<u8>,
    CS: OutputPin,
    BUS::Error: core::fmt::Debug,
    CS::Error: core::fmt::Debug,
{
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Self::Error> {
        self.cs.set_low().map_err(ExclusiveSpiError::Cs)?;

        let mut result = Ok(());
        for operation in operations.iter_mut() {
            result = match operation {
                Operation::Read(buf) => self.bus.read(buf).map_err(ExclusiveSpiError::Bus),
                Operation::Write(buf) => self.bus.write(buf).map_err(ExclusiveSpiError::Bus),
                Operation::Transfer(read, write) => self
                    .bus
                    .transfer(read, write)
                    .map_err(ExclusiveSpiError::Bus),
                Operation::TransferInPlace(buf) => self
                    .bus
                    .transfer_in_place(buf)
                    .map_err(ExclusiveSpiError::Bus),
                Operation::DelayNs(_) => Err(ExclusiveSpiError::DelayNotSupported),
            };
            if result.is_err() {
                break;
            }
        }
        if result.is_ok() {
            result = self.bus.flush().map_err(ExclusiveSpiError::Bus);
        }

        let released = self.cs.set_high().map_err(ExclusiveSpiError::Cs);
        result.and(released)
    }
}

type Card<BUS, CS, D> = SdCard<ExclusiveSpiDevice<BUS, CS>, D>;

/// Mounted first FAT volume. Paths are 8.3 names in the root directory.
pub struct SdStaging<BUS, CS, D>
where
    BUS: SpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
    BUS::Error: core::fmt::Debug,
    CS::Error: core::fmt::Debug,
{
    volume_mgr: VolumeManager<Card<BUS, CS, D>, FixedTimeSource>,
    volume: RawVolume,
    root: RawDirectory,
    writing: Option<RawFile>,
}

impl<BUS, CS, D> SdStaging<BUS, CS, D>
where
    BUS: SpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
    BUS::Error: core::fmt::Debug,
    CS::Error: core::fmt::Debug,
{
    /// Probes the card and opens volume 0. Any failure here means "no card".
    pub fn mount(
        mut bus: BUS,
        mut cs: CS,
        delay: D,
    ) -> Result<Self, SdStageError<BUS::Error, CS::Error>> {
        cs.set_high().map_err(SdStageError::ChipSelect)?;
        // SD SPI init requires >=74 clock cycles with CS deasserted.
        bus.write(&[0xFF; 10]).map_err(SdStageError::Spi)?;

        let card = SdCard::new(ExclusiveSpiDevice { bus, cs }, delay);
        let card_bytes = card.num_bytes().map_err(SdStageError::Card)?;

        let volume_mgr = VolumeManager::new(card, FixedTimeSource);
        let volume = volume_mgr.open_raw_volume(VolumeIdx(0))?;
        let root = volume_mgr.open_root_dir(volume)?;
        info!("sd: mounted card_bytes={}", card_bytes);

        Ok(Self {
            volume_mgr,
            volume,
            root,
            writing: None,
        })
    }

    /// Closes everything that is still open.
    pub fn unmount(mut self) {
        if let Some(file) = self.writing.take() {
            let _ = self.volume_mgr.close_file(file);
        }
        let _ = self.volume_mgr.close_dir(self.root);
        let _ = self.volume_mgr.close_volume(self.volume);
    }

    fn find(&mut self, path: &str) -> Result<Option<u32>, SdStageError<BUS::Error, CS::Error>> {
        match self.volume_mgr.find_directory_entry(self.root, path) {
            Ok(entry) => Ok(Some(entry.size)),
            Err(embedded_sdmmc::Error::NotFound) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn copy(&mut self, from: &str, to: &str) -> Result<(), SdStageError<BUS::Error, CS::Error>> {
        let src = self
            .volume_mgr
            .open_file_in_dir(self.root, from, Mode::ReadOnly)?;
        let dst = match self
            .volume_mgr
            .open_file_in_dir(self.root, to, Mode::ReadWriteCreateOrTruncate)
        {
            Ok(dst) => dst,
            Err(err) => {
                let _ = self.volume_mgr.close_file(src);
                return Err(err.into());
            }
        };

        let mut buf = [0u8; COPY_CHUNK_BYTES];
        let copied = loop {
            match self.volume_mgr.read(src, &mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    if let Err(err) = self.volume_mgr.write(dst, &buf[..n]) {
                        break Err(err);
                    }
                }
                Err(err) => break Err(err),
            }
        };

        let _ = self.volume_mgr.close_file(src);
        let closed = self.volume_mgr.close_file(dst);
        copied?;
        closed?;
        Ok(())
    }
}

impl<BUS, CS, D> StagingFs for SdStaging<BUS, CS, D>
where
    BUS: SpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
    BUS::Error: core::fmt::Debug,
    CS::Error: core::fmt::Debug,
{
    type Error = SdStageError<BUS::Error, CS::Error>;

    fn create(&mut self, path: &str) -> Result<(), Self::Error> {
        if let Some(previous) = self.writing.take() {
            warn!("sd: closing stale handle before create {}", path);
            let _ = self.volume_mgr.close_file(previous);
        }
        let file = self
            .volume_mgr
            .open_file_in_dir(self.root, path, Mode::ReadWriteCreateOrTruncate)?;
        self.writing = Some(file);
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        let file = self.writing.ok_or(SdStageError::NotOpen)?;
        self.volume_mgr.write(file, bytes)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        let file = self.writing.take().ok_or(SdStageError::NotOpen)?;
        self.volume_mgr.close_file(file)?;
        Ok(())
    }

    fn size(&mut self, path: &str) -> Result<Option<u32>, Self::Error> {
        self.find(path)
    }

    fn remove(&mut self, path: &str) -> Result<(), Self::Error> {
        match self.volume_mgr.delete_file_in_dir(self.root, path) {
            Ok(()) | Err(embedded_sdmmc::Error::NotFound) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// FAT has no atomic rename here: the target is replaced by a copy and
    /// the source deleted afterwards.
    fn rename(&mut self, from: &str, to: &str) -> Result<(), Self::Error> {
        self.remove(to)?;
        self.copy(from, to)?;
        self.remove(from)
    }

    fn read_at(&mut self, path: &str, offset: u32, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let file = self
            .volume_mgr
            .open_file_in_dir(self.root, path, Mode::ReadOnly)?;

        let result = (|| {
            self.volume_mgr.file_seek_from_start(file, offset)?;
            let mut filled = 0usize;
            while filled < buf.len() {
                let n = self.volume_mgr.read(file, &mut buf[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            Ok::<_, embedded_sdmmc::Error<SdCardError>>(filled)
        })();

        let closed = self.volume_mgr.close_file(file);
        let filled = result?;
        closed?;
        Ok(filled)
    }
}
