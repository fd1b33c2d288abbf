//! Runtime policy for one update-and-refresh cycle.

use crate::{
    network::AcquireConfig, refresh::RefreshConfig, sleep::SleepConfig,
    transfer::TransferConfig, trigger::ScheduleConfig, update::RemotePaths,
};

/// Updates are skipped below this charge.
pub const MIN_BATTERY_PERCENT: u8 = 30;

/// Where a downloaded firmware image goes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FirmwareInstall {
    /// Onto removable storage for a launcher to pick up after reboot.
    Staged,
    /// Straight into the inactive OTA slot.
    Flash,
}

/// File names of a staged artifact.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StagingPaths {
    pub temp: &'static str,
    pub target: &'static str,
    /// Holds the verified length while `temp` is being swapped over `target`.
    pub marker: &'static str,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UpdateConfig {
    /// Version string compiled into the running image.
    pub firmware_version: &'static str,
    pub min_battery_percent: u8,
    pub firmware_install: FirmwareInstall,
    pub firmware_staging: StagingPaths,
    pub content_staging: StagingPaths,
    pub paths: RemotePaths,
    pub schedule: ScheduleConfig,
    pub acquire: AcquireConfig,
    pub transfer: TransferConfig,
    pub refresh: RefreshConfig,
    pub sleep: SleepConfig,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            firmware_version: "0.1.0",
            min_battery_percent: MIN_BATTERY_PERCENT,
            firmware_install: FirmwareInstall::Flash,
            firmware_staging: StagingPaths {
                temp: "MMPAPER.TMP",
                target: "MMPAPER.BIN",
                marker: "MMPAPER.RDY",
            },
            content_staging: StagingPaths {
                temp: "IMAGE.TMP",
                target: "IMAGE.JPG",
                marker: "IMAGE.RDY",
            },
            paths: RemotePaths::default(),
            schedule: ScheduleConfig::default(),
            acquire: AcquireConfig::default(),
            transfer: TransferConfig::default(),
            refresh: RefreshConfig::default(),
            sleep: SleepConfig::default(),
        }
    }
}
