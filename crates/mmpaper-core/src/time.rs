//! Wall-clock helpers: civil time from unix seconds and HTTP `Date` parsing.

pub const SECS_PER_HOUR: u32 = 3_600;
pub const SECS_PER_DAY: u32 = 86_400;

/// Earliest instant accepted as a synchronized clock (2024-01-01T00:00:00Z).
///
/// RTC counters that start from zero after power-on read as 1970 and must not
/// drive schedule decisions.
pub const MIN_SYNCED_UNIX: u32 = 1_704_067_200;

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Local civil time derived from a UTC unix timestamp.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WallTime {
    /// UTC seconds since the unix epoch.
    pub unix: u32,
    pub year: u16,
    pub month: u8,
    /// Day of month, 1-based.
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl WallTime {
    /// Converts a UTC timestamp into local civil time using a fixed offset.
    pub fn from_unix(unix: u32, utc_offset_secs: i32) -> Self {
        let local = unix as i64 + utc_offset_secs as i64;
        let days = local.div_euclid(SECS_PER_DAY as i64);
        let secs_of_day = local.rem_euclid(SECS_PER_DAY as i64) as u32;
        let (year, month, day) = civil_from_days(days);

        Self {
            unix,
            year: year.clamp(0, u16::MAX as i64) as u16,
            month,
            day,
            hour: (secs_of_day / SECS_PER_HOUR) as u8,
            minute: ((secs_of_day % SECS_PER_HOUR) / 60) as u8,
            second: (secs_of_day % 60) as u8,
        }
    }

    /// Builds a local time directly from civil fields (offset 0).
    pub fn from_civil(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        let days = days_from_civil(year as i64, month, day);
        let unix = days * SECS_PER_DAY as i64
            + hour as i64 * SECS_PER_HOUR as i64
            + minute as i64 * 60
            + second as i64;
        Self::from_unix(unix.clamp(0, u32::MAX as i64) as u32, 0)
    }

    pub const fn seconds_of_day(&self) -> u32 {
        self.hour as u32 * SECS_PER_HOUR + self.minute as u32 * 60 + self.second as u32
    }

    pub const fn seconds_to_midnight(&self) -> u32 {
        SECS_PER_DAY - self.seconds_of_day()
    }
}

/// Abstract wall clock. `None` means the clock has never been synchronized.
pub trait WallClock {
    fn now(&mut self) -> Option<WallTime>;

    /// Adopts an externally observed UTC time.
    fn sync(&mut self, unix: u32);
}

/// Parses an IMF-fixdate (`Sun, 06 Nov 1994 08:49:37 GMT`) into unix seconds.
pub fn parse_http_date(value: &str) -> Option<u32> {
    let mut parts = value.split_ascii_whitespace();
    let _weekday = parts.next()?;
    let day: u8 = parts.next()?.parse().ok()?;
    let month_name = parts.next()?;
    let year: u16 = parts.next()?.parse().ok()?;
    let clock = parts.next()?;
    if parts.next()? != "GMT" {
        return None;
    }

    let month = MONTHS.iter().position(|m| *m == month_name)? as u8 + 1;
    if !(1..=31).contains(&day) {
        return None;
    }

    let mut hms = clock.split(':');
    let hour: u8 = hms.next()?.parse().ok()?;
    let minute: u8 = hms.next()?.parse().ok()?;
    let second: u8 = hms.next()?.parse().ok()?;
    if hms.next().is_some() || hour > 23 || minute > 59 || second > 60 {
        return None;
    }

    let days = days_from_civil(year as i64, month, day);
    let unix = days * SECS_PER_DAY as i64
        + hour as i64 * SECS_PER_HOUR as i64
        + minute as i64 * 60
        + second as i64;
    u32::try_from(unix).ok()
}

fn civil_from_days(days: i64) -> (i64, u8, u8) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u8;
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };
    (year, month, day)
}

fn days_from_civil(year: i64, month: u8, day: u8) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = year.div_euclid(400);
    let yoe = year.rem_euclid(400);
    let month = month as i64;
    let shifted_month = if month > 2 { month - 3 } else { month + 9 };
    let doy = (153 * shifted_month + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}
