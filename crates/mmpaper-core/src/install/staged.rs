use log::{info, warn};

use super::{ArtifactSink, InstallError};
use crate::config::StagingPaths;

/// File operations needed for staged installs and for reading content back.
///
/// One file is open for writing at a time.
pub trait StagingFs {
    type Error;

    /// Creates or truncates `path` and keeps it open for `append`.
    fn create(&mut self, path: &str) -> Result<(), Self::Error>;
    fn append(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;
    fn close(&mut self) -> Result<(), Self::Error>;

    /// Size in bytes, `None` if the file does not exist.
    fn size(&mut self, path: &str) -> Result<Option<u32>, Self::Error>;
    /// Removing a missing file is not an error.
    fn remove(&mut self, path: &str) -> Result<(), Self::Error>;
    fn rename(&mut self, from: &str, to: &str) -> Result<(), Self::Error>;
    fn read_at(&mut self, path: &str, offset: u32, buf: &mut [u8])
    -> Result<usize, Self::Error>;

    fn exists(&mut self, path: &str) -> Result<bool, Self::Error> {
        Ok(self.size(path)?.is_some())
    }
}

/// Writes into a temporary file and swaps it over the final path only after
/// the full declared length is on disk.
///
/// The swap is bracketed by a marker file holding the verified length. If the
/// swap is cut short, the verified temp file is kept and [`recover`] finishes
/// the job on a later boot.
///
/// [`recover`]: StagedInstall::recover
pub struct StagedInstall<'a, F: StagingFs> {
    fs: &'a mut F,
    paths: StagingPaths,
    expected: u32,
    written: u32,
    open: bool,
    /// Set once the final path may have been touched.
    swapping: bool,
}

impl<'a, F: StagingFs> StagedInstall<'a, F> {
    pub fn new(fs: &'a mut F, paths: StagingPaths) -> Self {
        Self {
            fs,
            paths,
            expected: 0,
            written: 0,
            open: false,
            swapping: false,
        }
    }

    pub const fn written(&self) -> u32 {
        self.written
    }

    /// Completes a swap that an earlier boot left half done. Returns `true`
    /// when the staged file was promoted.
    pub fn recover(&mut self) -> Result<bool, InstallError<F::Error>> {
        let Some(len) = self.read_marker()? else {
            return Ok(false);
        };
        let promoted = if self.fs.size(self.paths.temp)? == Some(len) {
            warn!(
                "sd-stage: resuming swap {} -> {} ({} bytes)",
                self.paths.temp, self.paths.target, len
            );
            self.swap()?;
            true
        } else {
            false
        };
        self.fs.remove(self.paths.marker)?;
        Ok(promoted)
    }

    fn read_marker(&mut self) -> Result<Option<u32>, InstallError<F::Error>> {
        if self.fs.size(self.paths.marker)? != Some(4) {
            return Ok(None);
        }
        let mut word = [0u8; 4];
        if self.fs.read_at(self.paths.marker, 0, &mut word)? != word.len() {
            return Ok(None);
        }
        Ok(Some(u32::from_le_bytes(word)))
    }

    fn write_marker(&mut self) -> Result<(), InstallError<F::Error>> {
        self.fs.create(self.paths.marker)?;
        let appended = self.fs.append(&self.expected.to_le_bytes());
        self.fs.close()?;
        appended?;
        Ok(())
    }

    fn swap(&mut self) -> Result<(), InstallError<F::Error>> {
        self.fs.remove(self.paths.target)?;
        self.fs.rename(self.paths.temp, self.paths.target)?;
        Ok(())
    }

    fn discard_temp(&mut self) {
        if self.open {
            let _ = self.fs.close();
            self.open = false;
        }
        if self.fs.remove(self.paths.temp).is_err() {
            warn!("sd-stage: could not remove {}", self.paths.temp);
        }
        let _ = self.fs.remove(self.paths.marker);
    }

    fn commit(&mut self) -> Result<(), InstallError<F::Error>> {
        if !self.open {
            return Err(InstallError::NotStarted);
        }
        self.fs.close()?;
        self.open = false;

        let on_disk = self.fs.size(self.paths.temp)?;
        if self.written != self.expected || on_disk != Some(self.expected) {
            warn!(
                "sd-stage: {} holds {:?} bytes, expected {}",
                self.paths.temp, on_disk, self.expected
            );
            return Err(InstallError::SizeMismatch);
        }

        self.write_marker()?;
        self.swapping = true;
        self.swap()?;
        if self.fs.remove(self.paths.marker).is_err() {
            warn!("sd-stage: could not remove {}", self.paths.marker);
        }
        info!(
            "sd-stage: {} -> {} ({} bytes)",
            self.paths.temp, self.paths.target, self.expected
        );
        Ok(())
    }
}

impl<F: StagingFs> ArtifactSink for StagedInstall<'_, F> {
    type Error = InstallError<F::Error>;

    fn destination(&self) -> &'static str {
        self.paths.target
    }

    fn begin(&mut self, expected_len: u32) -> Result<(), Self::Error> {
        // A pending swap owns the temp file.
        self.recover()?;
        self.expected = expected_len;
        self.written = 0;
        self.swapping = false;
        self.fs.create(self.paths.temp)?;
        self.open = true;
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<(), Self::Error> {
        if !self.open {
            return Err(InstallError::NotStarted);
        }
        if self.written as usize + chunk.len() > self.expected as usize {
            return Err(InstallError::SizeMismatch);
        }
        self.fs.append(chunk)?;
        self.written += chunk.len() as u32;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), Self::Error> {
        let result = self.commit();
        if result.is_err() {
            if self.swapping {
                warn!(
                    "sd-stage: swap into {} interrupted; keeping {} for recovery",
                    self.paths.target, self.paths.temp
                );
            } else {
                self.discard_temp();
            }
        }
        result
    }

    fn abort(&mut self) {
        if !self.swapping {
            self.discard_temp();
        }
    }
}
