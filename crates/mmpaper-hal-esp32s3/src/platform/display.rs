use embedded_hal::{delay::DelayNs, digital::OutputPin, spi::SpiBus};

/// Panel width in pixels.
pub const WIDTH: u32 = 400;
/// Panel height in pixels.
pub const HEIGHT: u32 = 240;
/// Bytes in one panel line.
pub const LINE_BYTES: usize = WIDTH as usize / 8;
pub const FRAME_BYTES: usize = LINE_BYTES * HEIGHT as usize;

const CS_SETUP_NS: u32 = 3_000;
const CS_HOLD_NS: u32 = 1_000;
const CLEAR_HOLD_NS: u32 = 220_000;

const CMD_WRITE: u8 = 0x80;
const CMD_CLEAR: u8 = 0x20;
const VCOM_BIT: u8 = 0x40;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DisplayError<SpiErr, DispErr, EmdErr, CsErr> {
    Spi(SpiErr),
    Disp(DispErr),
    Emd(EmdErr),
    Cs(CsErr),
    /// Frame shorter than the panel.
    FrameSize,
}

pub type SharpDisplayResult<SpiErr, DispErr, EmdErr, CsErr> =
    Result<(), DisplayError<SpiErr, DispErr, EmdErr, CsErr>>;

/// Gate address byte for a 1-based line: the line number, LSB first.
pub const fn line_address(line: u16) -> u8 {
    (line as u8).reverse_bits()
}

/// LS027B7DH01 memory-in-pixel panel on a write-only SPI bus.
///
/// The panel keeps its image without refresh, so "partial" means writing only
/// the lines that changed and "full" means all-clear followed by every line.
#[derive(Debug)]
pub struct SharpDisplay<SPI, DISP, EMD, CS> {
    spi: SPI,
    disp: DISP,
    emd: EMD,
    cs: CS,
    vcom_high: bool,
}

impl<SPI, DISP, EMD, CS> SharpDisplay<SPI, DISP, EMD, CS>
where
    SPI: SpiBus<u8>,
    DISP: OutputPin,
    EMD: OutputPin,
    CS: OutputPin,
{
    pub fn new(spi: SPI, disp: DISP, emd: EMD, cs: CS) -> Self {
        Self {
            spi,
            disp,
            emd,
            cs,
            vcom_high: false,
        }
    }

    /// Serial M1 mode, output enabled.
    pub fn initialize<D: DelayNs>(
        &mut self,
        delay: &mut D,
    ) -> SharpDisplayResult<SPI::Error, DISP::Error, EMD::Error, CS::Error> {
        self.disp.set_high().map_err(DisplayError::Disp)?;
        self.emd.set_low().map_err(DisplayError::Emd)?;
        self.cs.set_low().map_err(DisplayError::Cs)?;
        delay.delay_us(60);
        Ok(())
    }

    pub fn clear_all<D: DelayNs>(
        &mut self,
        delay: &mut D,
    ) -> SharpDisplayResult<SPI::Error, DISP::Error, EMD::Error, CS::Error> {
        let command = CMD_CLEAR | self.toggle_vcom();

        self.cs.set_high().map_err(DisplayError::Cs)?;
        delay.delay_ns(CS_SETUP_NS);
        self.spi
            .write(&[command, 0x00, 0x00])
            .map_err(DisplayError::Spi)?;
        self.spi.flush().map_err(DisplayError::Spi)?;
        delay.delay_ns(CLEAR_HOLD_NS);
        self.cs.set_low().map_err(DisplayError::Cs)?;
        Ok(())
    }

    /// Writes the 0-based `rows` of `frame` (packed, `LINE_BYTES` per row) in
    /// one CS-high transaction. Returns without touching the bus when `rows`
    /// is empty.
    pub fn write_lines<D, I>(
        &mut self,
        frame: &[u8],
        rows: I,
        delay: &mut D,
    ) -> SharpDisplayResult<SPI::Error, DISP::Error, EMD::Error, CS::Error>
    where
        D: DelayNs,
        I: IntoIterator<Item = u16>,
    {
        if frame.len() < FRAME_BYTES {
            return Err(DisplayError::FrameSize);
        }
        let mut rows = rows.into_iter().filter(|row| *row < HEIGHT as u16).peekable();
        if rows.peek().is_none() {
            return Ok(());
        }

        let command = CMD_WRITE | self.toggle_vcom();
        self.cs.set_high().map_err(DisplayError::Cs)?;
        delay.delay_ns(CS_SETUP_NS);
        self.spi.write(&[command]).map_err(DisplayError::Spi)?;

        // [address][50 data bytes][dummy]
        let mut packet = [0u8; LINE_BYTES + 2];
        for row in rows {
            packet[0] = line_address(row + 1);
            let start = row as usize * LINE_BYTES;
            packet[1..=LINE_BYTES].copy_from_slice(&frame[start..start + LINE_BYTES]);
            self.spi.write(&packet).map_err(DisplayError::Spi)?;
        }

        // Frame trailer byte.
        self.spi.write(&[0x00]).map_err(DisplayError::Spi)?;
        self.spi.flush().map_err(DisplayError::Spi)?;
        delay.delay_ns(CS_HOLD_NS);
        self.cs.set_low().map_err(DisplayError::Cs)?;
        Ok(())
    }

    fn toggle_vcom(&mut self) -> u8 {
        self.vcom_high = !self.vcom_high;
        if self.vcom_high { VCOM_BIT } else { 0x00 }
    }
}
