//! Check-and-fetch: descriptor comparison followed by an artifact transfer.

use embedded_hal_async::delay::DelayNs;
use log::{info, warn};

use crate::{
    install::ArtifactSink,
    manifest::{self, ArtifactKind, Token},
    transfer::{self, HttpClient, TransferConfig},
};

/// Failure kinds surfaced by an update cycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpdateError {
    BatteryTooLow,
    NetworkUnavailable,
    ManifestUnreachable,
    ManifestUnparsable,
    TransferIncomplete,
    InstallFailed,
    TimeUnavailable,
    StorageUnavailable,
}

impl UpdateError {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BatteryTooLow => "battery too low",
            Self::NetworkUnavailable => "network unavailable",
            Self::ManifestUnreachable => "manifest unreachable",
            Self::ManifestUnparsable => "manifest unparsable",
            Self::TransferIncomplete => "transfer incomplete",
            Self::InstallFailed => "install failed",
            Self::TimeUnavailable => "time unavailable",
            Self::StorageUnavailable => "storage unavailable",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    UpToDate,
    /// Artifact installed; carries the remote token that now applies.
    Updated(Token),
    Failed(UpdateError),
}

impl Outcome {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UpToDate => "up-to-date",
            Self::Updated(_) => "updated",
            Self::Failed(_) => "failed",
        }
    }
}

/// Server paths relative to the update base.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RemotePaths {
    pub firmware_descriptor: &'static str,
    pub firmware_artifact: &'static str,
    pub content_descriptor: &'static str,
    pub content_artifact: &'static str,
}

impl Default for RemotePaths {
    fn default() -> Self {
        Self {
            firmware_descriptor: "/firmware.json",
            firmware_artifact: "/MMpaper.bin",
            content_descriptor: "/image/image_meta.json",
            content_artifact: "/image/current.jpg",
        }
    }
}

impl RemotePaths {
    pub const fn descriptor(&self, kind: ArtifactKind) -> &'static str {
        match kind {
            ArtifactKind::Firmware => self.firmware_descriptor,
            ArtifactKind::Content => self.content_descriptor,
        }
    }

    pub const fn artifact(&self, kind: ArtifactKind) -> &'static str {
        match kind {
            ArtifactKind::Firmware => self.firmware_artifact,
            ArtifactKind::Content => self.content_artifact,
        }
    }
}

/// Result of one check plus the server time observed along the way.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CheckReport {
    pub outcome: Outcome,
    pub server_time: Option<u32>,
}

/// Fetches the descriptor for `kind`, compares it to `local` and, when they
/// differ, streams the artifact into `sink`.
///
/// `on_found` runs once a differing remote token is known, before any
/// artifact byte is requested.
#[allow(clippy::too_many_arguments)]
pub async fn check_and_fetch<H, D, S, F>(
    http: &mut H,
    delay: &mut D,
    kind: ArtifactKind,
    paths: &RemotePaths,
    local: &str,
    sink: &mut S,
    config: &TransferConfig,
    mut on_found: F,
) -> CheckReport
where
    H: HttpClient,
    D: DelayNs,
    S: ArtifactSink,
    F: FnMut(&Token),
{
    let mut body = [0u8; manifest::DESCRIPTOR_MAX_BYTES];
    let descriptor = match transfer::fetch_descriptor(
        http,
        delay,
        paths.descriptor(kind),
        &mut body,
        config,
    )
    .await
    {
        Ok(descriptor) => descriptor,
        Err(err) => {
            warn!("update: {} descriptor failed: {}", kind.as_str(), err.as_str());
            return CheckReport {
                outcome: Outcome::Failed(err),
                server_time: None,
            };
        }
    };
    let server_time = descriptor.server_time;

    let remote = match manifest::decode(&body[..descriptor.len], kind) {
        Ok(token) => token,
        Err(err) => {
            warn!("update: {} descriptor unparsable", kind.as_str());
            return CheckReport {
                outcome: Outcome::Failed(err),
                server_time,
            };
        }
    };

    if remote.as_str() == local {
        info!("update: {} up to date ({})", kind.as_str(), remote);
        return CheckReport {
            outcome: Outcome::UpToDate,
            server_time,
        };
    }

    info!(
        "update: {} remote={} local={}",
        kind.as_str(),
        remote,
        if local.is_empty() { "<none>" } else { local }
    );
    on_found(&remote);

    let outcome = match transfer::stream_artifact(
        http,
        delay,
        paths.artifact(kind),
        sink,
        config,
    )
    .await
    {
        Ok(session) => {
            info!(
                "update: {} installed bytes={} dest={}",
                kind.as_str(),
                session.bytes_transferred,
                session.destination
            );
            Outcome::Updated(remote)
        }
        Err(err) => {
            warn!("update: {} transfer failed: {}", kind.as_str(), err.as_str());
            Outcome::Failed(err)
        }
    };

    CheckReport {
        outcome,
        server_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockDelay, MockFs, MockHttp, Route};
    use crate::{config::UpdateConfig, install::StagedInstall};
    use embassy_futures::block_on;

    const CONTENT: &[u8] = b"\xFF\xD8jpeg-bytes\xFF\xD9";

    fn run(
        http: &mut MockHttp,
        fs: &mut MockFs,
        local: &str,
    ) -> (CheckReport, usize) {
        let mut delay = MockDelay::default();
        let mut found = 0usize;
        let mut sink = StagedInstall::new(fs, UpdateConfig::default().content_staging);
        let report = block_on(check_and_fetch(
            http,
            &mut delay,
            ArtifactKind::Content,
            &RemotePaths::default(),
            local,
            &mut sink,
            &TransferConfig::default(),
            |_| found += 1,
        ));
        (report, found)
    }

    #[test]
    fn equal_tokens_skip_the_transfer() {
        let mut http = MockHttp::new()
            .with(Route::ok("/image/image_meta.json", br#"{"md5":"abc"}"#));
        let mut fs = MockFs::default();
        let (report, found) = run(&mut http, &mut fs, "abc");

        assert_eq!(report.outcome, Outcome::UpToDate);
        assert_eq!(found, 0);
        assert_eq!(http.requests(), ["/image/image_meta.json"]);
        assert!(fs.files.is_empty());
    }

    #[test]
    fn differing_token_downloads_and_installs() {
        let mut http = MockHttp::new()
            .with(Route::ok("/image/image_meta.json", br#"{"md5":"new"}"#).dated(1_700_000_000))
            .with(Route::ok("/image/current.jpg", CONTENT));
        let mut fs = MockFs::default();
        let (report, found) = run(&mut http, &mut fs, "old");

        let mut expected = Token::new();
        expected.push_str("new").unwrap();
        assert_eq!(report.outcome, Outcome::Updated(expected));
        assert_eq!(report.server_time, Some(1_700_000_000));
        assert_eq!(found, 1);
        assert_eq!(fs.file("IMAGE.JPG"), Some(CONTENT));
        assert_eq!(fs.file("IMAGE.TMP"), None);
    }

    #[test]
    fn non_success_descriptor_is_unreachable() {
        let mut http = MockHttp::new().with(Route::status("/image/image_meta.json", 404));
        let mut fs = MockFs::default();
        let (report, _) = run(&mut http, &mut fs, "old");
        assert_eq!(report.outcome, Outcome::Failed(UpdateError::ManifestUnreachable));
    }

    #[test]
    fn garbage_descriptor_is_unparsable_and_fetches_nothing() {
        let mut http = MockHttp::new()
            .with(Route::ok("/image/image_meta.json", b"<html>oops</html>"))
            .with(Route::ok("/image/current.jpg", CONTENT));
        let mut fs = MockFs::default();
        let (report, found) = run(&mut http, &mut fs, "old");

        assert_eq!(report.outcome, Outcome::Failed(UpdateError::ManifestUnparsable));
        assert_eq!(found, 0);
        assert_eq!(http.requests().len(), 1);
    }
}
