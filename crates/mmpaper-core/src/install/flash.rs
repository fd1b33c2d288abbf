use log::{info, warn};

use super::{ArtifactSink, InstallError};

/// Completion report from the flash-update primitive.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Completion {
    /// Image verified and scheduled for the next boot.
    Complete,
    /// Primitive returned without confirming the image. Do not reboot.
    Uncertain,
}

/// Writes a firmware image into the inactive slot.
pub trait FlashUpdater {
    type Error;

    /// Bytes available in the target slot.
    fn capacity(&self) -> u32;
    fn begin(&mut self, len: u32) -> Result<(), Self::Error>;
    fn write(&mut self, chunk: &[u8]) -> Result<(), Self::Error>;
    fn finalize(&mut self) -> Result<Completion, Self::Error>;
    /// Drops the transaction; the running image stays active. After an
    /// `Uncertain` finalize this also reverts the boot slot selection.
    fn abort(&mut self);
}

/// Streams straight into the flash-update transaction.
pub struct FlashInstall<'a, U: FlashUpdater> {
    updater: &'a mut U,
    expected: u32,
    written: u32,
    active: bool,
}

impl<'a, U: FlashUpdater> FlashInstall<'a, U> {
    pub fn new(updater: &'a mut U) -> Self {
        Self {
            updater,
            expected: 0,
            written: 0,
            active: false,
        }
    }

    fn cancel(&mut self) {
        if self.active {
            self.updater.abort();
            self.active = false;
        }
    }
}

impl<U: FlashUpdater> ArtifactSink for FlashInstall<'_, U> {
    type Error = InstallError<U::Error>;

    fn destination(&self) -> &'static str {
        "ota"
    }

    fn begin(&mut self, expected_len: u32) -> Result<(), Self::Error> {
        let capacity = self.updater.capacity();
        if expected_len > capacity {
            warn!("ota: image {} bytes exceeds slot {}", expected_len, capacity);
            return Err(InstallError::TooLarge);
        }
        self.updater.begin(expected_len)?;
        self.expected = expected_len;
        self.written = 0;
        self.active = true;
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<(), Self::Error> {
        if !self.active {
            return Err(InstallError::NotStarted);
        }
        if self.written as usize + chunk.len() > self.expected as usize {
            return Err(InstallError::SizeMismatch);
        }
        self.updater.write(chunk)?;
        self.written += chunk.len() as u32;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), Self::Error> {
        if !self.active {
            return Err(InstallError::NotStarted);
        }
        if self.written != self.expected {
            self.cancel();
            return Err(InstallError::SizeMismatch);
        }

        match self.updater.finalize() {
            Ok(Completion::Complete) => {
                self.active = false;
                info!("ota: image finalized ({} bytes)", self.written);
                Ok(())
            }
            Ok(Completion::Uncertain) => {
                warn!("ota: finalize did not confirm completion");
                self.cancel();
                Err(InstallError::NotComplete)
            }
            Err(err) => {
                self.cancel();
                Err(InstallError::Backend(err))
            }
        }
    }

    fn abort(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFlash;

    #[test]
    fn completes_when_primitive_confirms() {
        let mut flash = MockFlash::with_capacity(16);
        let mut sink = FlashInstall::new(&mut flash);
        sink.begin(4).unwrap();
        sink.write(b"\xE9abc").unwrap();
        sink.finish().unwrap();

        assert!(flash.finalized);
        assert!(flash.slot_activated);
        assert_eq!(flash.aborts, 0);
    }

    #[test]
    fn uncertain_completion_is_an_error_and_aborts() {
        let mut flash = MockFlash::with_capacity(16);
        flash.completion = Completion::Uncertain;
        let mut sink = FlashInstall::new(&mut flash);
        sink.begin(2).unwrap();
        sink.write(b"ab").unwrap();

        assert_eq!(sink.finish(), Err(InstallError::NotComplete));
        assert_eq!(flash.aborts, 1);
        assert!(!flash.slot_activated);
    }

    #[test]
    fn oversized_image_is_rejected_up_front() {
        let mut flash = MockFlash::with_capacity(16);
        let mut sink = FlashInstall::new(&mut flash);
        assert_eq!(sink.begin(17), Err(InstallError::TooLarge));
        assert!(!flash.began);
    }

    #[test]
    fn partial_image_aborts_transaction() {
        let mut flash = MockFlash::with_capacity(16);
        let mut sink = FlashInstall::new(&mut flash);
        sink.begin(8).unwrap();
        sink.write(b"abc").unwrap();
        assert_eq!(sink.finish(), Err(InstallError::SizeMismatch));
        assert!(!flash.finalized);
        assert_eq!(flash.aborts, 1);
    }
}
