//! Fill-the-screen placement of an image on the canvas.

use core::ops::Range;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Where the scaled image lands, in canvas coordinates. Offsets are zero or
/// negative; the overhang is cropped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Placement {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Scales `image` so that it covers `canvas` completely, centering the
/// overhang on the cropped axis. Returns `None` for empty sizes.
pub fn smart_crop(image: Size, canvas: Size) -> Option<Placement> {
    if image.is_empty() || canvas.is_empty() {
        return None;
    }

    let (w, h) = (image.width as u64, image.height as u64);
    let (cw, ch) = (canvas.width as u64, canvas.height as u64);

    // Wider than the screen (w/h > W/H): match height, crop the sides.
    if w * ch > h * cw {
        let width = div_round_half_up(w * ch, h);
        Some(Placement {
            x: overhang_offset(width, cw),
            y: 0,
            width: clamp_u32(width),
            height: canvas.height,
        })
    } else {
        let height = div_round_half_up(h * cw, w);
        Some(Placement {
            x: 0,
            y: overhang_offset(height, ch),
            width: canvas.width,
            height: clamp_u32(height),
        })
    }
}

fn div_round_half_up(num: u64, den: u64) -> u64 {
    (2 * num + den) / (2 * den)
}

/// Negated half overhang, saturating for absurd aspect ratios.
fn overhang_offset(scaled: u64, canvas: u64) -> i32 {
    -i32::try_from((scaled - canvas) / 2).unwrap_or(i32::MAX)
}

fn clamp_u32(value: u64) -> u32 {
    value.min(u32::MAX as u64) as u32
}

/// Maps source pixels of a decoded image onto canvas spans according to a
/// [`Placement`]. Every canvas pixel inside the placement is covered by
/// exactly one source pixel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ScaledBlit {
    source: Size,
    placement: Placement,
    canvas: Size,
}

impl ScaledBlit {
    pub const fn new(source: Size, placement: Placement, canvas: Size) -> Self {
        Self {
            source,
            placement,
            canvas,
        }
    }

    pub const fn source(&self) -> Size {
        self.source
    }

    /// Canvas columns painted by source column `sx`, clipped to the canvas.
    pub fn columns(&self, sx: u32) -> Range<u32> {
        span(
            sx,
            self.source.width,
            self.placement.x,
            self.placement.width,
            self.canvas.width,
        )
    }

    /// Canvas rows painted by source row `sy`, clipped to the canvas.
    pub fn rows(&self, sy: u32) -> Range<u32> {
        span(
            sy,
            self.source.height,
            self.placement.y,
            self.placement.height,
            self.canvas.height,
        )
    }
}

fn span(s: u32, source_len: u32, offset: i32, draw_len: u32, canvas_len: u32) -> Range<u32> {
    if source_len == 0 || s >= source_len {
        return 0..0;
    }
    let draw_len = draw_len as i128;
    let start = offset as i128 + s as i128 * draw_len / source_len as i128;
    let end = offset as i128 + (s as i128 + 1) * draw_len / source_len as i128;
    let clip = |v: i128| v.clamp(0, canvas_len as i128) as u32;
    clip(start)..clip(end)
}
