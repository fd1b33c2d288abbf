use core::time::Duration;

use esp_hal::{
    gpio::RtcPin,
    peripherals::{GPIO2, LPWR},
    rtc_cntl::{Rtc, SocResetReason, reset_reason, sleep::TimerWakeupSource, wakeup_cause},
    system::{Cpu, software_reset},
};
use log::info;
use mmpaper_core::trigger::BootKind;

pub(super) fn boot_kind() -> BootKind {
    let reason = reset_reason(Cpu::ProCpu);
    info!("boot: reset_reason={:?} wakeup_cause={:?}", reason, wakeup_cause());
    if reason == Some(SocResetReason::CoreDeepSleep) {
        BootKind::WakeFromDeepSleep
    } else {
        BootKind::ColdBoot
    }
}

pub(super) fn reboot() -> ! {
    info!("power: restarting into new firmware");
    software_reset()
}

/// Keeps the panel showing its last frame and sleeps until the timer fires.
pub(super) fn enter_deep_sleep(rtc: &mut Rtc<'_>, seconds: u32) -> ! {
    // Latch DISP high so the memory panel keeps its image.
    let disp_hold = unsafe { GPIO2::steal() };
    disp_hold.rtcio_pad_hold(true);

    info!("power: deep sleep for {}s", seconds);
    let timer = TimerWakeupSource::new(Duration::from_secs(seconds as u64));
    rtc.sleep_deep(&[&timer])
}

/// Sleep path for faults hit before the board services exist.
pub(super) fn sleep_after_fault(what: &str, seconds: u32) -> ! {
    info!("power: {} failed; retrying after {}s", what, seconds);
    let mut rtc = Rtc::new(unsafe { LPWR::steal() });
    enter_deep_sleep(&mut rtc, seconds)
}
