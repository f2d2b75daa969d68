//! Native screen backend.
//!
//! Built on `scrap`, which wraps X11 SHM, DXGI Desktop Duplication and
//! Quartz behind one API.
//!
//! # Platform
//!
//! Requires the `scrap` feature. Without it the type is still defined
//! but every operation fails with [`CastError::CaptureUnavailable`].

use crate::error::CastError;
use crate::screen::{Grabber, Rect, Screen, ScreenBackend};

/// The host's real displays.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemScreens;

impl SystemScreens {
    pub fn new() -> Self {
        Self
    }
}

// ── scrap implementation ─────────────────────────────────────────

#[cfg(feature = "scrap")]
mod platform {
    use std::io::ErrorKind;
    use std::time::Instant;

    use super::*;
    use crate::screen::{PixelFormat, RawFrame};

    fn all_displays() -> Result<Vec<scrap::Display>, CastError> {
        scrap::Display::all()
            .map_err(|e| CastError::CaptureUnavailable(format!("display enumeration failed: {e}")))
    }

    impl ScreenBackend for SystemScreens {
        fn displays(&self) -> Result<Vec<Rect>, CastError> {
            // scrap only reports sizes; lay displays out left to right.
            let mut x = 0i32;
            Ok(all_displays()?
                .iter()
                .map(|d| {
                    let rect = Rect::new(x, 0, d.width() as u32, d.height() as u32);
                    x += d.width() as i32;
                    rect
                })
                .collect())
        }

        fn open(&self, screen: &Screen) -> Result<Box<dyn Grabber>, CastError> {
            let display = all_displays()?
                .into_iter()
                .nth(screen.index)
                .ok_or_else(|| CastError::CaptureUnavailable(format!("screen {} is gone", screen.index)))?;

            let (width, height) = (display.width(), display.height());
            if (width as u32, height as u32) != (screen.bounds.width, screen.bounds.height) {
                return Err(CastError::CaptureUnavailable(format!(
                    "screen {} is now {width}x{height}",
                    screen.index
                )));
            }

            let capturer = scrap::Capturer::new(display)
                .map_err(|e| CastError::CaptureUnavailable(format!("capturer init failed: {e}")))?;

            Ok(Box::new(ScrapGrabber {
                capturer,
                width,
                height,
            }))
        }
    }

    struct ScrapGrabber {
        capturer: scrap::Capturer,
        width: usize,
        height: usize,
    }

    impl Grabber for ScrapGrabber {
        fn grab(&mut self) -> Result<Option<RawFrame>, CastError> {
            match self.capturer.frame() {
                Ok(frame) => {
                    // Row pitch may include padding.
                    let stride = frame.len() / self.height;
                    Ok(Some(RawFrame {
                        width: self.width as u32,
                        height: self.height as u32,
                        stride: stride as u32,
                        format: PixelFormat::Bgra8,
                        data: frame.to_vec(),
                        timestamp: Instant::now(),
                    }))
                }
                // DXGI and Quartz report an unchanged screen this way.
                Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
                Err(e) => Err(CastError::CaptureUnavailable(format!("capture failed: {e}"))),
            }
        }
    }
}

// ── Stub ─────────────────────────────────────────────────────────

#[cfg(not(feature = "scrap"))]
impl ScreenBackend for SystemScreens {
    fn displays(&self) -> Result<Vec<Rect>, CastError> {
        Err(CastError::CaptureUnavailable(
            "built without native capture support (enable the `scrap` feature)".into(),
        ))
    }

    fn open(&self, _screen: &Screen) -> Result<Box<dyn Grabber>, CastError> {
        Err(CastError::CaptureUnavailable(
            "built without native capture support (enable the `scrap` feature)".into(),
        ))
    }
}
