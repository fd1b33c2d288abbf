//! 1bpp drawing surface over a caller-owned buffer.

use super::crop::Size;

/// Grayscale level below which a pixel is drawn black.
pub const BLACK_THRESHOLD: u8 = 160;

/// Integer luma of an RGB888 pixel.
pub const fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 30 + g as u32 * 59 + b as u32 * 11) / 100) as u8
}

pub const fn is_black(r: u8, g: u8, b: u8) -> bool {
    luma(r, g, b) < BLACK_THRESHOLD
}

/// Bytes needed for a canvas of `width` x `height`.
pub const fn buffer_len(width: u32, height: u32) -> usize {
    width.div_ceil(8) as usize * height as usize
}

/// Packed framebuffer: rows of `ceil(width / 8)` bytes, bit 7 is the leftmost
/// pixel of a byte, a set bit is black.
pub struct Canvas<'a> {
    bytes: &'a mut [u8],
    width: u32,
    height: u32,
    stride: usize,
}

impl<'a> Canvas<'a> {
    /// Returns `None` when `bytes` is too small for the requested size.
    pub fn new(bytes: &'a mut [u8], width: u32, height: u32) -> Option<Self> {
        let len = buffer_len(width, height);
        if bytes.len() < len {
            return None;
        }
        Some(Self {
            bytes: &mut bytes[..len],
            width,
            height,
            stride: width.div_ceil(8) as usize,
        })
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    pub const fn height(&self) -> u32 {
        self.height
    }

    pub const fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub const fn stride(&self) -> usize {
        self.stride
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes
    }

    /// Fills with white (`black = false`) or black.
    pub fn clear(&mut self, black: bool) {
        self.bytes.fill(if black { 0xFF } else { 0x00 });
    }

    /// Returns `false` for out-of-bounds coordinates.
    pub fn set_pixel(&mut self, x: u32, y: u32, black: bool) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }

        let index = y as usize * self.stride + (x / 8) as usize;
        let mask = 1u8 << (7 - (x % 8));
        if black {
            self.bytes[index] |= mask;
        } else {
            self.bytes[index] &= !mask;
        }
        true
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<bool> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = y as usize * self.stride + (x / 8) as usize;
        Some(self.bytes[index] & (1u8 << (7 - (x % 8))) != 0)
    }

    /// Paints `xs` x `ys`, both already clipped to the canvas.
    pub fn fill_span(&mut self, xs: core::ops::Range<u32>, ys: core::ops::Range<u32>, black: bool) {
        for y in ys {
            for x in xs.clone() {
                self.set_pixel(x, y, black);
            }
        }
    }

    /// Packed bytes of row `y` (0-based).
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.stride;
        Some(&self.bytes[start..start + self.stride])
    }
}
