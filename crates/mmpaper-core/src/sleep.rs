//! Deep-sleep duration until the next scheduled check.

use log::info;

use crate::time::{SECS_PER_HOUR, WallTime};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SleepConfig {
    /// Never sleep for less than this.
    pub min_sleep_secs: u32,
    /// Added past the slot so RTC drift still lands inside the check window.
    pub wake_offset_secs: u32,
    /// Used when the wall clock is unknown.
    pub fallback_sleep_secs: u32,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            min_sleep_secs: 300,
            wake_offset_secs: 30,
            fallback_sleep_secs: 3_600,
        }
    }
}

/// Seconds from `now` to the first slot of `check_hours` strictly after it,
/// plus the wake offset and floored at the minimum sleep.
pub fn seconds_until_next_check(
    now: Option<&WallTime>,
    check_hours: &[u8],
    config: &SleepConfig,
) -> u32 {
    let Some(now) = now else {
        info!("sleep: no wall time, {} s fallback", config.fallback_sleep_secs);
        return config.fallback_sleep_secs.max(config.min_sleep_secs);
    };

    let elapsed_today = now.seconds_of_day();
    let slots = check_hours
        .iter()
        .filter(|&&hour| hour < 24)
        .map(|&hour| hour as u32 * SECS_PER_HOUR);

    let until_slot = match slots.clone().filter(|&slot| slot > elapsed_today).min() {
        Some(slot) => slot - elapsed_today,
        None => match slots.min() {
            Some(first) => now.seconds_to_midnight() + first,
            None => {
                info!("sleep: empty schedule, {} s fallback", config.fallback_sleep_secs);
                return config.fallback_sleep_secs.max(config.min_sleep_secs);
            }
        },
    };

    let seconds = (until_slot + config.wake_offset_secs).max(config.min_sleep_secs);
    info!(
        "sleep: now={:02}:{:02}:{:02} next check in {} s",
        now.hour, now.minute, now.second, seconds
    );
    seconds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::DEFAULT_CHECK_HOURS;

    fn at(hour: u8, minute: u8, second: u8) -> WallTime {
        WallTime::from_civil(2025, 6, 30, hour, minute, second)
    }

    fn sleep_at(hour: u8, minute: u8, second: u8) -> u32 {
        seconds_until_next_check(
            Some(&at(hour, minute, second)),
            &DEFAULT_CHECK_HOURS,
            &SleepConfig::default(),
        )
    }

    #[test]
    fn late_evening_rolls_over_to_midnight_slot() {
        // 23:50 -> 00:00 next day
        assert_eq!(sleep_at(23, 50, 0), 600 + 30);
    }

    #[test]
    fn targets_next_slot_today() {
        assert_eq!(sleep_at(10, 15, 0), 6_300 + 30);
        // A check that just ran at 09:00 sleeps until 12:00.
        assert_eq!(sleep_at(9, 0, 20), 3 * 3_600 - 20 + 30);
    }

    #[test]
    fn short_sleeps_are_floored() {
        assert_eq!(sleep_at(23, 58, 0), 300);
        assert_eq!(sleep_at(8, 59, 59), 300);
    }

    #[test]
    fn schedule_without_midnight_wraps_to_first_hour() {
        let hours = [6, 18];
        let config = SleepConfig::default();
        // 20:00 -> 06:00 tomorrow
        assert_eq!(
            seconds_until_next_check(Some(&at(20, 0, 0)), &hours, &config),
            4 * 3_600 + 6 * 3_600 + 30
        );
    }

    #[test]
    fn unknown_time_uses_fallback() {
        assert_eq!(
            seconds_until_next_check(None, &DEFAULT_CHECK_HOURS, &SleepConfig::default()),
            3_600
        );
        assert_eq!(
            seconds_until_next_check(Some(&at(1, 0, 0)), &[], &SleepConfig::default()),
            3_600
        );
    }
}
