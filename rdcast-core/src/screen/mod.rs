//! Screen enumeration and paced capture.
//!
//! These are the **raw** frame types handed from the capture stage to
//! the encoder. They never leave the host; only [`EncodedChunk`]s
//! travel over the transport.
//!
//! The OS primitive is abstracted behind [`ScreenBackend`] (list displays)
//! and [`Grabber`] (capture one frame). [`ScreenSource`] drives a backend
//! in a paced, back-pressured loop.
//!
//! [`EncodedChunk`]: crate::encoder::EncodedChunk

mod source;
pub mod system;

use std::borrow::Cow;
use std::time::Instant;

use crate::error::CastError;

pub use source::{CaptureHandle, FrameStream, ScreenSource};
pub(crate) use source::frame_interval;
pub use system::SystemScreens;

// ── Rect / Screen ────────────────────────────────────────────────

/// A rectangle in absolute display coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// One capturable display as seen at enumeration time.
///
/// Screens are immutable snapshots; re-enumerate to observe changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Screen {
    /// Position in the enumeration order (0 = primary).
    pub index: usize,
    /// Capture region.
    pub bounds: Rect,
}

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout for raw captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha (X11 / DXGI / Quartz).
    Bgra8,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        4
    }
}

// ── RawFrame ─────────────────────────────────────────────────────

/// A raw, uncompressed screen capture obtained from the OS.
///
/// The `data` buffer holds `height` rows of `stride` bytes each.
/// `stride` may be larger than `width * bytes_per_pixel` when the
/// platform pads rows.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Row pitch in **bytes** (may exceed `width * bpp`).
    pub stride: u32,
    /// Pixel layout.
    pub format: PixelFormat,
    /// Raw pixel data, `stride * height` bytes.
    pub data: Vec<u8>,
    /// Monotonic capture timestamp.
    pub timestamp: Instant,
}

impl RawFrame {
    /// Pixel rows packed tightly, with any row padding removed.
    ///
    /// Borrows the buffer when it carries no padding. A buffer too short
    /// for its declared geometry is a [`CastError::Encode`].
    pub fn packed(&self) -> Result<Cow<'_, [u8]>, CastError> {
        let row_len = self.width as usize * self.format.bytes_per_pixel();
        let stride = self.stride as usize;
        let height = self.height as usize;
        let needed = match height {
            0 => 0,
            h => stride * (h - 1) + row_len,
        };
        if stride < row_len || self.data.len() < needed {
            return Err(CastError::Encode(format!(
                "frame buffer holds {} bytes, {}x{} at stride {} needs {needed}",
                self.data.len(),
                self.width,
                self.height,
                self.stride
            )));
        }

        if stride == row_len {
            return Ok(Cow::Borrowed(&self.data[..row_len * height]));
        }

        let mut out = Vec::with_capacity(row_len * height);
        for y in 0..height {
            let row_start = y * stride;
            out.extend_from_slice(&self.data[row_start..row_start + row_len]);
        }
        Ok(Cow::Owned(out))
    }
}

// ── Backend traits ───────────────────────────────────────────────

/// The OS display primitive: enumeration plus a per-screen grabber.
///
/// Implementations must be shareable across threads. The grabber
/// itself is created on the capture thread and never leaves it, so it
/// may hold thread-affine platform handles.
pub trait ScreenBackend: Send + Sync + 'static {
    /// Bounds of every currently active display, in enumeration order.
    fn displays(&self) -> Result<Vec<Rect>, CastError>;

    /// Open a grabber for `screen`.
    fn open(&self, screen: &Screen) -> Result<Box<dyn Grabber>, CastError>;
}

/// Captures pixels for one screen.
pub trait Grabber {
    /// Capture a single frame.
    ///
    /// `Ok(None)` means the screen has not changed since the previous
    /// grab; the capture run carries on and tries again next interval.
    /// Errors end the capture run.
    fn grab(&mut self) -> Result<Option<RawFrame>, CastError>;
}
