use esp_hal::rtc_cntl::Rtc;
use log::info;
use mmpaper_core::time::{MIN_SYNCED_UNIX, WallClock, WallTime};

/// Wall clock on the RTC timer, which keeps counting through deep sleep.
pub struct RtcClock<'d> {
    rtc: Rtc<'d>,
    utc_offset_secs: i32,
}

impl<'d> RtcClock<'d> {
    pub fn new(rtc: Rtc<'d>, utc_offset_secs: i32) -> Self {
        Self {
            rtc,
            utc_offset_secs,
        }
    }

    pub fn rtc_mut(&mut self) -> &mut Rtc<'d> {
        &mut self.rtc
    }

    fn unix(&self) -> u32 {
        (self.rtc.current_time_us() / 1_000_000).min(u32::MAX as u64) as u32
    }
}

impl WallClock for RtcClock<'_> {
    fn now(&mut self) -> Option<WallTime> {
        let unix = self.unix();
        (unix >= MIN_SYNCED_UNIX).then(|| WallTime::from_unix(unix, self.utc_offset_secs))
    }

    fn sync(&mut self, unix: u32) {
        let before = self.unix();
        self.rtc.set_current_time_us(unix as u64 * 1_000_000);
        info!("clock: set unix={} (was {})", unix, before);
    }
}
