//! The board as the update cycle sees it: panel, frame, clock and battery.

use embedded_hal::{delay::DelayNs, digital::OutputPin, spi::SpiBus};
use esp_hal::time::Instant;
use log::warn;
use mmpaper_core::{
    cycle::Appliance,
    install::StagingFs,
    refresh::{RefreshKind, RefreshPanel},
    render::{Canvas, RenderError},
    status::StatusMessage,
    time::{WallClock, WallTime},
};

use super::{
    battery::BatterySense,
    clock::RtcClock,
    display::{DisplayError, FRAME_BYTES, HEIGHT, LINE_BYTES, SharpDisplay, WIDTH},
};
use crate::render::{jpeg, status};

/// Frame being drawn plus what the panel currently shows.
pub struct FrameBuffers {
    pub draw: [u8; FRAME_BYTES],
    pub shown: [u8; FRAME_BYTES],
}

impl FrameBuffers {
    pub const fn new() -> Self {
        Self {
            draw: [0u8; FRAME_BYTES],
            shown: [0u8; FRAME_BYTES],
        }
    }
}

impl Default for FrameBuffers {
    fn default() -> Self {
        Self::new()
    }
}

pub struct BoardAppliance<'d, SPI, DISP, EMD, CS, DL, B> {
    display: SharpDisplay<SPI, DISP, EMD, CS>,
    delay: DL,
    frames: &'d mut FrameBuffers,
    clock: RtcClock<'d>,
    battery: B,
    booted_at: Instant,
}

impl<'d, SPI, DISP, EMD, CS, DL, B> BoardAppliance<'d, SPI, DISP, EMD, CS, DL, B>
where
    SPI: SpiBus<u8>,
    DISP: OutputPin,
    EMD: OutputPin,
    CS: OutputPin,
    DL: DelayNs,
    B: BatterySense,
{
    pub fn new(
        display: SharpDisplay<SPI, DISP, EMD, CS>,
        delay: DL,
        frames: &'d mut FrameBuffers,
        clock: RtcClock<'d>,
        battery: B,
    ) -> Self {
        Self {
            display,
            delay,
            frames,
            clock,
            battery,
            booted_at: Instant::now(),
        }
    }

    pub fn display_mut(&mut self) -> &mut SharpDisplay<SPI, DISP, EMD, CS> {
        &mut self.display
    }

    pub fn clock_mut(&mut self) -> &mut RtcClock<'d> {
        &mut self.clock
    }

    fn canvas(&mut self) -> Option<Canvas<'_>> {
        Canvas::new(&mut self.frames.draw, WIDTH, HEIGHT)
    }
}

impl<SPI, DISP, EMD, CS, DL, B> WallClock for BoardAppliance<'_, SPI, DISP, EMD, CS, DL, B> {
    fn now(&mut self) -> Option<WallTime> {
        self.clock.now()
    }

    fn sync(&mut self, unix: u32) {
        self.clock.sync(unix);
    }
}

impl<SPI, DISP, EMD, CS, DL, B> RefreshPanel for BoardAppliance<'_, SPI, DISP, EMD, CS, DL, B>
where
    SPI: SpiBus<u8>,
    DISP: OutputPin,
    EMD: OutputPin,
    CS: OutputPin,
    DL: DelayNs,
{
    type Error = DisplayError<SPI::Error, DISP::Error, EMD::Error, CS::Error>;

    fn refresh(&mut self, kind: RefreshKind) -> Result<(), Self::Error> {
        let frames = &mut *self.frames;
        match kind {
            RefreshKind::Full => {
                self.display.clear_all(&mut self.delay)?;
                self.display
                    .write_lines(&frames.draw, 0..HEIGHT as u16, &mut self.delay)?;
            }
            RefreshKind::Partial => {
                let (draw, shown) = (&frames.draw, &frames.shown);
                let changed = (0..HEIGHT as u16).filter(|row| {
                    let start = *row as usize * LINE_BYTES;
                    draw[start..start + LINE_BYTES] != shown[start..start + LINE_BYTES]
                });
                self.display.write_lines(draw, changed, &mut self.delay)?;
            }
        }
        frames.shown.copy_from_slice(&frames.draw);
        Ok(())
    }
}

impl<SPI, DISP, EMD, CS, DL, B> Appliance for BoardAppliance<'_, SPI, DISP, EMD, CS, DL, B>
where
    SPI: SpiBus<u8>,
    DISP: OutputPin,
    EMD: OutputPin,
    CS: OutputPin,
    DL: DelayNs,
    B: BatterySense,
{
    fn battery_percent(&mut self) -> u8 {
        self.battery.percent()
    }

    fn uptime_ms(&mut self) -> u64 {
        self.booted_at.elapsed().as_millis()
    }

    fn draw_status(&mut self, message: &StatusMessage) {
        match self.canvas() {
            Some(mut canvas) => status::draw_status(&mut canvas, message),
            None => warn!("display: frame buffer too small"),
        }
    }

    fn draw_content<F: StagingFs>(&mut self, fs: &mut F, path: &str) -> Result<(), RenderError> {
        let mut canvas = self.canvas().ok_or(RenderError::Decode)?;
        jpeg::decode_into(fs, path, &mut canvas)
    }
}
