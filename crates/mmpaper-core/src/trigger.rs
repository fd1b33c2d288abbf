//! Decides whether a firmware or content check is due on this boot.

use log::{info, warn};

use crate::{
    store::{KeyValueStore, ScheduleRecord},
    time::WallTime,
};

/// Local hours at which content is refreshed.
pub const DEFAULT_CHECK_HOURS: [u8; 7] = [6, 9, 12, 15, 18, 21, 0];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ScheduleConfig {
    pub check_hours: &'static [u8],
    /// A check hour is live for minutes `0..window_minutes`.
    pub window_minutes: u8,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            check_hours: &DEFAULT_CHECK_HOURS,
            window_minutes: 5,
        }
    }
}

impl ScheduleConfig {
    pub fn is_check_hour(&self, hour: u8) -> bool {
        self.check_hours.contains(&hour)
    }

    pub fn in_window(&self, now: &WallTime) -> bool {
        self.is_check_hour(now.hour) && now.minute < self.window_minutes
    }
}

/// How the processor came out of reset.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BootKind {
    /// Power-on, reset button, brown-out or software reboot.
    ColdBoot,
    /// Timer wake-up from deep sleep.
    WakeFromDeepSleep,
}

impl BootKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ColdBoot => "cold-boot",
            Self::WakeFromDeepSleep => "deep-sleep-wake",
        }
    }
}

/// Process-lifetime trigger flags. Never persisted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BootState {
    pub kind: BootKind,
    pub firmware_check_armed: bool,
    first_content_pending: bool,
}

impl BootState {
    pub const fn new(kind: BootKind) -> Self {
        let cold = matches!(kind, BootKind::ColdBoot);
        Self {
            kind,
            firmware_check_armed: cold,
            first_content_pending: cold,
        }
    }

    pub const fn is_cold(&self) -> bool {
        matches!(self.kind, BootKind::ColdBoot)
    }

    /// True exactly once per cold boot.
    pub fn due_for_firmware_check<S: KeyValueStore>(
        &mut self,
        schedule: &mut ScheduleRecord,
        store: &mut S,
        now: Option<&WallTime>,
    ) -> bool {
        if !self.firmware_check_armed {
            return false;
        }
        self.firmware_check_armed = false;

        if let Some(now) = now
            && schedule.record_firmware_check(store, now).is_err()
        {
            warn!("trigger: failed to persist firmware check time");
        }
        info!("trigger: firmware check due ({})", self.kind.as_str());
        true
    }

    /// True on the first evaluation after a cold boot, or once per configured
    /// window. The window is persisted before returning so a crash during the
    /// check does not fire it again.
    pub fn due_for_content_check<S: KeyValueStore>(
        &mut self,
        schedule: &mut ScheduleRecord,
        store: &mut S,
        config: &ScheduleConfig,
        now: Option<&WallTime>,
    ) -> bool {
        let first_boot = core::mem::replace(&mut self.first_content_pending, false);

        let Some(now) = now else {
            if first_boot {
                info!("trigger: content check due (first boot, no wall time)");
            } else {
                warn!("trigger: time unavailable; scheduled content checks suppressed");
            }
            return first_boot;
        };

        let scheduled = config.in_window(now)
            && schedule.content_window() != Some((now.hour, now.day));
        if !first_boot && !scheduled {
            return false;
        }

        if schedule
            .record_content_window(store, now.hour, now.day)
            .is_err()
        {
            warn!("trigger: failed to persist content window");
        }
        info!(
            "trigger: content check due hour={} day={} first_boot={}",
            now.hour, now.day, first_boot
        );
        true
    }
}
