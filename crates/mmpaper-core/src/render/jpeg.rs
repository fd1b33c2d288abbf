//! JPEG frame header scan: image dimensions without decoding.

use log::debug;

/// Give up looking for a frame header after this many bytes.
pub const DIM_SCAN_MAX_BYTES: usize = 262_144;

fn is_sof_marker(marker: u8) -> bool {
    matches!(
        marker,
        0xC0 | 0xC1 | 0xC2 | 0xC3 | 0xC5 | 0xC6 | 0xC7 | 0xC9 | 0xCA | 0xCB | 0xCD | 0xCE | 0xCF
    )
}

/// Marker code of a baseline or extended sequential (non-progressive) frame.
pub fn is_sequential(marker: u8) -> bool {
    matches!(marker, 0xC0 | 0xC1)
}

/// Frame header fields.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameInfo {
    pub width: u16,
    pub height: u16,
    pub marker: u8,
}

/// Byte-at-a-time reader counting what it consumed.
struct Scanner<F> {
    next: F,
    consumed: usize,
}

impl<F, E> Scanner<F>
where
    F: FnMut() -> Result<Option<u8>, E>,
{
    fn byte(&mut self) -> Result<Option<u8>, E> {
        let byte = (self.next)()?;
        if byte.is_some() {
            self.consumed += 1;
        }
        Ok(byte)
    }

    fn skip(&mut self, len: usize) -> Result<bool, E> {
        for _ in 0..len {
            if self.byte()?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

macro_rules! next_or_none {
    ($scanner:expr) => {
        match $scanner.byte()? {
            Some(byte) => byte,
            None => return Ok(None),
        }
    };
}

/// Walks marker segments from SOI up to the first frame header.
///
/// `Ok(None)` means the stream is not a JPEG or ends before a usable frame
/// header; reader errors are passed through.
pub fn scan_frame<F, E>(next: F) -> Result<Option<FrameInfo>, E>
where
    F: FnMut() -> Result<Option<u8>, E>,
{
    let mut scanner = Scanner { next, consumed: 0 };
    let first = next_or_none!(scanner);
    let second = next_or_none!(scanner);
    if first != 0xFF || second != 0xD8 {
        return Ok(None);
    }

    loop {
        if scanner.consumed > DIM_SCAN_MAX_BYTES {
            debug!("jpeg: no frame header in {} bytes", scanner.consumed);
            return Ok(None);
        }

        let mut byte = loop {
            let next = next_or_none!(scanner);
            if next == 0xFF {
                break next;
            }
        };
        while byte == 0xFF {
            byte = next_or_none!(scanner);
        }
        let marker = byte;

        if marker == 0x00 || marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
            continue;
        }
        if marker == 0xD9 || marker == 0xDA {
            return Ok(None);
        }

        let seg_len = u16::from_be_bytes([next_or_none!(scanner), next_or_none!(scanner)]) as usize;
        if seg_len < 2 {
            return Ok(None);
        }
        let payload_len = seg_len - 2;

        if is_sof_marker(marker) {
            if payload_len < 5 {
                return Ok(None);
            }
            let _precision = next_or_none!(scanner);
            let height = u16::from_be_bytes([next_or_none!(scanner), next_or_none!(scanner)]);
            let width = u16::from_be_bytes([next_or_none!(scanner), next_or_none!(scanner)]);
            if width == 0 || height == 0 {
                return Ok(None);
            }
            return Ok(Some(FrameInfo {
                width,
                height,
                marker,
            }));
        }

        if !scanner.skip(payload_len)? {
            return Ok(None);
        }
    }
}

/// Frame header of an in-memory JPEG.
pub fn frame_of(bytes: &[u8]) -> Option<FrameInfo> {
    let mut iter = bytes.iter().copied();
    scan_frame(|| Ok::<_, core::convert::Infallible>(iter.next())).unwrap_or(None)
}
