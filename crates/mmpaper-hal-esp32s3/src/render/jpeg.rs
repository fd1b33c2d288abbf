//! Baseline JPEG decode straight onto the canvas with the ROM TJpgDec.
//!
//! The ROM decoder calls back through plain C function pointers, so the
//! active decode is published through a module-global guarded by
//! [`DecodeGuard`]. Only one decode may run at a time.

use core::ffi::c_void;

use log::{info, warn};
use mmpaper_core::{
    install::StagingFs,
    render::{
        Canvas, RenderError, ScaledBlit, Size, is_black,
        jpeg::{is_sequential, scan_frame},
        plan_decode,
    },
};

const STREAM_BYTES: usize = 1024;
const WORK_BYTES: usize = 8192;
const DECODER_BYTES: usize = 1536;

#[repr(C)]
#[derive(Clone, Copy, Debug)]
struct JpegRect {
    left: u16,
    right: u16,
    top: u16,
    bottom: u16,
}

unsafe extern "C" {
    fn jd_prepare(
        jd: *mut c_void,
        infunc: Option<unsafe extern "C" fn(*mut c_void, *mut u8, u32) -> u32>,
        pool: *mut c_void,
        sz_pool: u32,
        device: *mut c_void,
    ) -> i32;

    fn jd_decomp(
        jd: *mut c_void,
        outfunc: Option<unsafe extern "C" fn(*mut c_void, *mut c_void, *mut JpegRect) -> u32>,
        scale: u8,
    ) -> i32;
}

const JDR_OK: i32 = 0;
const JDR_INTR: i32 = 1;
const JDR_INP: i32 = 2;
const JDR_MEM1: i32 = 3;
const JDR_MEM2: i32 = 4;
const JDR_PAR: i32 = 5;
const JDR_FMT1: i32 = 6;
const JDR_FMT2: i32 = 7;
const JDR_FMT3: i32 = 8;

fn jdr_name(status: i32) -> &'static str {
    match status {
        JDR_OK => "ok",
        JDR_INTR => "intr",
        JDR_INP => "inp",
        JDR_MEM1 => "mem1",
        JDR_MEM2 => "mem2",
        JDR_PAR => "par",
        JDR_FMT1 => "fmt1",
        JDR_FMT2 => "fmt2",
        JDR_FMT3 => "fmt3",
        _ => "unknown",
    }
}

/// Buffered sequential reader over a staged file.
struct FileStream<'a, F: StagingFs> {
    fs: &'a mut F,
    path: &'a str,
    offset: u32,
    buf: [u8; STREAM_BYTES],
    len: usize,
    pos: usize,
    end: bool,
    failed: bool,
}

impl<'a, F: StagingFs> FileStream<'a, F> {
    fn new(fs: &'a mut F, path: &'a str) -> Self {
        Self {
            fs,
            path,
            offset: 0,
            buf: [0u8; STREAM_BYTES],
            len: 0,
            pos: 0,
            end: false,
            failed: false,
        }
    }

    /// Returns `false` at end of file or on a read error.
    fn fill(&mut self) -> bool {
        if self.pos < self.len {
            return true;
        }
        if self.end || self.failed {
            return false;
        }
        match self.fs.read_at(self.path, self.offset, &mut self.buf) {
            Ok(0) => {
                self.end = true;
                false
            }
            Ok(n) => {
                self.offset += n as u32;
                self.len = n;
                self.pos = 0;
                true
            }
            Err(_) => {
                self.failed = true;
                false
            }
        }
    }

    fn byte(&mut self) -> Result<Option<u8>, ()> {
        if !self.fill() {
            return if self.failed { Err(()) } else { Ok(None) };
        }
        let byte = self.buf[self.pos];
        self.pos += 1;
        Ok(Some(byte))
    }

    fn read_into(&mut self, out: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < out.len() && self.fill() {
            let n = (self.len - self.pos).min(out.len() - copied);
            out[copied..copied + n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            copied += n;
        }
        copied
    }

    fn skip(&mut self, len: usize) -> usize {
        let mut skipped = 0;
        while skipped < len && self.fill() {
            let n = (self.len - self.pos).min(len - skipped);
            self.pos += n;
            skipped += n;
        }
        skipped
    }
}

/// Paints decoded blocks through the crop mapping.
struct Blitter<'a, 'b> {
    canvas: &'a mut Canvas<'b>,
    blit: ScaledBlit,
    blocks: usize,
}

impl Blitter<'_, '_> {
    fn block(&mut self, rect: JpegRect, pixels: &[u8]) -> bool {
        let block_w = (rect.right as usize + 1).saturating_sub(rect.left as usize);
        let block_h = (rect.bottom as usize + 1).saturating_sub(rect.top as usize);
        // ROM TJpgDec emits RGB888.
        if pixels.len() < block_w * block_h * 3 {
            return false;
        }

        for by in 0..block_h {
            let rows = self.blit.rows(rect.top as u32 + by as u32);
            if rows.is_empty() {
                continue;
            }
            for bx in 0..block_w {
                let base = (by * block_w + bx) * 3;
                if is_black(pixels[base], pixels[base + 1], pixels[base + 2]) {
                    let columns = self.blit.columns(rect.left as u32 + bx as u32);
                    self.canvas.fill_span(columns, rows.clone(), true);
                }
            }
        }
        self.blocks += 1;
        true
    }
}

type ReadFn = unsafe fn(*mut c_void, *mut u8, usize) -> usize;
type OutFn = unsafe fn(*mut c_void, JpegRect, *const u8) -> bool;

#[derive(Clone, Copy)]
struct Dispatch {
    stream: *mut c_void,
    read: ReadFn,
    blitter: *mut c_void,
    out: OutFn,
}

static mut DISPATCH: Option<Dispatch> = None;

struct DecodeGuard;

impl DecodeGuard {
    /// # Safety
    /// The pointers in `dispatch` must stay valid until the guard drops.
    unsafe fn install(dispatch: Dispatch) -> Option<Self> {
        // SAFETY: single core, no decode runs from interrupt context.
        unsafe {
            if core::ptr::read(core::ptr::addr_of!(DISPATCH)).is_some() {
                return None;
            }
            core::ptr::write(core::ptr::addr_of_mut!(DISPATCH), Some(dispatch));
        }
        Some(Self)
    }
}

impl Drop for DecodeGuard {
    fn drop(&mut self) {
        // SAFETY: clears what `install` published.
        unsafe { core::ptr::write(core::ptr::addr_of_mut!(DISPATCH), None) }
    }
}

fn dispatch() -> Option<Dispatch> {
    // SAFETY: see `DecodeGuard::install`.
    unsafe { core::ptr::read(core::ptr::addr_of!(DISPATCH)) }
}

unsafe fn stream_read<F: StagingFs>(user: *mut c_void, buff: *mut u8, len: usize) -> usize {
    // SAFETY: `user` is the live FileStream<F> installed for this decode.
    let stream = unsafe { &mut *(user as *mut FileStream<'_, F>) };
    if buff.is_null() {
        stream.skip(len)
    } else {
        // SAFETY: TJpgDec hands a buffer of at least `len` bytes.
        stream.read_into(unsafe { core::slice::from_raw_parts_mut(buff, len) })
    }
}

unsafe fn blitter_out(user: *mut c_void, rect: JpegRect, bitmap: *const u8) -> bool {
    // SAFETY: `user` is the live Blitter installed for this decode.
    let blitter = unsafe { &mut *(user as *mut Blitter<'_, '_>) };
    let w = (rect.right as usize + 1).saturating_sub(rect.left as usize);
    let h = (rect.bottom as usize + 1).saturating_sub(rect.top as usize);
    // SAFETY: the block bitmap holds `w * h` RGB888 pixels.
    let pixels = unsafe { core::slice::from_raw_parts(bitmap, w * h * 3) };
    blitter.block(rect, pixels)
}

unsafe extern "C" fn in_callback(_jd: *mut c_void, buff: *mut u8, nbyte: u32) -> u32 {
    let Some(io) = dispatch() else {
        return 0;
    };
    // SAFETY: installed by `decode_into` for the duration of the decode.
    unsafe { (io.read)(io.stream, buff, nbyte as usize) as u32 }
}

unsafe extern "C" fn out_callback(_jd: *mut c_void, bitmap: *mut c_void, rect: *mut JpegRect) -> u32 {
    if bitmap.is_null() || rect.is_null() {
        return 0;
    }
    let Some(io) = dispatch() else {
        return 0;
    };
    // SAFETY: TJpgDec passes a valid rectangle for the callback duration.
    let rect = unsafe { *rect };
    // SAFETY: installed by `decode_into` for the duration of the decode.
    unsafe { (io.out)(io.blitter, rect, bitmap as *const u8) as u32 }
}

/// Decodes the JPEG at `path` and smart-crops it onto `canvas`, which is
/// cleared to white first.
pub fn decode_into<F: StagingFs>(
    fs: &mut F,
    path: &str,
    canvas: &mut Canvas<'_>,
) -> Result<(), RenderError> {
    match fs.size(path) {
        Ok(Some(len)) if len > 0 => {}
        Ok(_) => return Err(RenderError::Missing),
        Err(_) => return Err(RenderError::Storage),
    }

    let frame = {
        let mut stream = FileStream::new(fs, path);
        scan_frame(|| stream.byte()).map_err(|_| RenderError::Storage)?
    };
    let Some(frame) = frame else {
        info!("jpeg: {} has no frame header", path);
        return Err(RenderError::InvalidImage);
    };
    if !is_sequential(frame.marker) {
        info!("jpeg: marker 0x{:02x} not supported", frame.marker);
        return Err(RenderError::Unsupported);
    }

    let image = Size::new(frame.width as u32, frame.height as u32);
    let plan = plan_decode(image, canvas.size())?;
    info!(
        "jpeg: {}x{} scale=1/{} canvas={}x{}",
        image.width,
        image.height,
        1u32 << plan.scale,
        canvas.width(),
        canvas.height()
    );
    canvas.clear(false);

    let mut stream = FileStream::new(fs, path);
    let mut blitter = Blitter {
        canvas,
        blit: plan.blit,
        blocks: 0,
    };
    let mut decoder = [0u32; DECODER_BYTES / core::mem::size_of::<u32>()];
    let mut work = [0u8; WORK_BYTES];

    let dispatch = Dispatch {
        stream: (&mut stream as *mut FileStream<'_, F>) as *mut c_void,
        read: stream_read::<F>,
        blitter: (&mut blitter as *mut Blitter<'_, '_>) as *mut c_void,
        out: blitter_out,
    };
    // SAFETY: `stream` and `blitter` outlive the guard.
    let Some(_guard) = (unsafe { DecodeGuard::install(dispatch) }) else {
        warn!("jpeg: decoder busy");
        return Err(RenderError::Decode);
    };

    // SAFETY: opaque state, callbacks and work pool sized for ROM TJpgDec.
    let status = unsafe {
        jd_prepare(
            decoder.as_mut_ptr() as *mut c_void,
            Some(in_callback),
            work.as_mut_ptr() as *mut c_void,
            WORK_BYTES as u32,
            core::ptr::null_mut(),
        )
    };
    if status != JDR_OK {
        warn!("jpeg: prepare failed status={}", jdr_name(status));
        return Err(if stream.failed {
            RenderError::Storage
        } else {
            RenderError::Decode
        });
    }

    // SAFETY: decoder state initialized by jd_prepare.
    let status = unsafe {
        jd_decomp(
            decoder.as_mut_ptr() as *mut c_void,
            Some(out_callback),
            plan.scale,
        )
    };
    if stream.failed {
        warn!("jpeg: read failed after {} bytes", stream.offset);
        return Err(RenderError::Storage);
    }
    if status != JDR_OK || blitter.blocks == 0 {
        warn!(
            "jpeg: decompress failed status={} blocks={}",
            jdr_name(status),
            blitter.blocks
        );
        return Err(RenderError::Decode);
    }

    info!("jpeg: decoded {} blocks", blitter.blocks);
    Ok(())
}
