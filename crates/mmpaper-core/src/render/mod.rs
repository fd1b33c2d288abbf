//! Content layout: smart crop, the 1bpp canvas and JPEG header inspection.
//!
//! Pixel decoding itself belongs to the board; this module decides where the
//! decoded pixels go.

mod canvas;
mod crop;
#[cfg(feature = "embedded-graphics")]
mod graphics;
pub mod jpeg;

pub use canvas::{BLACK_THRESHOLD, Canvas, buffer_len, is_black, luma};
pub use crop::{Placement, ScaledBlit, Size, smart_crop};

/// Largest decoder down-scale, as a power of two.
pub const MAX_DECODE_SCALE: u8 = 3;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RenderError {
    /// No artifact on the staging medium.
    Missing,
    /// Not a JPEG, or no usable frame header.
    InvalidImage,
    /// Progressive or otherwise unsupported encoding.
    Unsupported,
    /// The decoder gave up part way.
    Decode,
    Storage,
}

impl RenderError {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::InvalidImage => "invalid image",
            Self::Unsupported => "unsupported",
            Self::Decode => "decode",
            Self::Storage => "storage",
        }
    }
}

/// Decode parameters for drawing one image onto a canvas.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DecodePlan {
    /// Decoder output is `1 / 2^scale` of the image.
    pub scale: u8,
    pub blit: ScaledBlit,
}

/// Picks the coarsest decoder scale whose output still covers the placement,
/// so each canvas pixel is sampled from at least one decoded pixel.
pub fn plan_decode(image: Size, canvas: Size) -> Result<DecodePlan, RenderError> {
    let placement = smart_crop(image, canvas).ok_or(RenderError::InvalidImage)?;

    let mut scale = 0u8;
    while scale < MAX_DECODE_SCALE {
        let next = scale + 1;
        if scaled(image.width, next) < placement.width
            || scaled(image.height, next) < placement.height
        {
            break;
        }
        scale = next;
    }

    let source = Size::new(scaled(image.width, scale), scaled(image.height, scale));
    Ok(DecodePlan {
        scale,
        blit: ScaledBlit::new(source, placement, canvas),
    })
}

const fn scaled(len: u32, scale: u8) -> u32 {
    len.div_ceil(1 << scale)
}
