//! Install strategies: where downloaded bytes go and how they replace the
//! artifact currently in use.

mod flash;
mod staged;

pub use flash::{Completion, FlashInstall, FlashUpdater};
pub use staged::{StagedInstall, StagingFs};

/// Destination of a streamed download.
///
/// `begin` is called once with the declared length, then `write` for each
/// chunk, then exactly one of `finish` or `abort`.
pub trait ArtifactSink {
    type Error;

    /// Short label for logs.
    fn destination(&self) -> &'static str;
    fn begin(&mut self, expected_len: u32) -> Result<(), Self::Error>;
    fn write(&mut self, chunk: &[u8]) -> Result<(), Self::Error>;
    /// Verifies and commits. On error the sink has already cleaned up and the
    /// previous artifact is still in place.
    fn finish(&mut self) -> Result<(), Self::Error>;
    /// Discards partial data. Never touches the previous artifact.
    fn abort(&mut self);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstallError<E> {
    Backend(E),
    /// Bytes written differ from the declared length.
    SizeMismatch,
    /// Declared length exceeds the destination.
    TooLarge,
    /// Install primitive could not confirm completion.
    NotComplete,
    /// `write`/`finish` without a successful `begin`.
    NotStarted,
}

impl<E> From<E> for InstallError<E> {
    fn from(value: E) -> Self {
        Self::Backend(value)
    }
}

impl<E> InstallError<E> {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Backend(_) => "backend",
            Self::SizeMismatch => "size mismatch",
            Self::TooLarge => "too large",
            Self::NotComplete => "not complete",
            Self::NotStarted => "not started",
        }
    }
}
