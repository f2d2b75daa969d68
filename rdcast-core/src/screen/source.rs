//! Paced capture loop.
//!
//! Each capture run gets a dedicated OS thread (platform grabbers are
//! frequently thread-affine) that drives an async loop on the caller's
//! Tokio runtime:
//!
//! ```text
//! loop:
//!   wait for room in the capacity-1 channel   (backpressure)
//!   grab one frame                            (blocking, on this thread)
//!   hand it to the consumer, unless the screen is unchanged
//!   sleep max(0, interval - elapsed)          (pacing, no catch-up)
//! ```
//!
//! Cancellation is a `CancellationToken`; every suspension point of the
//! loop races against it, so [`CaptureHandle::stop`] never waits for
//! more than the in-flight grab.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::Stream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CastError;
use crate::screen::{Grabber, RawFrame, Screen, ScreenBackend};

// ── CaptureHandle ────────────────────────────────────────────────

/// Cloneable stop/observe handle for one capture run.
#[derive(Debug, Clone, Default)]
pub struct CaptureHandle {
    token: CancellationToken,
    running: Arc<AtomicBool>,
}

impl CaptureHandle {
    /// Ask the capture loop to end. Idempotent, never blocks.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Whether [`stop`](Self::stop) has been requested.
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether a capture thread is currently alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

// ── FrameStream ──────────────────────────────────────────────────

/// Lazy, non-restartable sequence of captured frames.
///
/// Ends (yields `None`) when the source is stopped, when the capture
/// primitive fails, or when the screen disappears.
#[derive(Debug)]
pub struct FrameStream {
    rx: mpsc::Receiver<RawFrame>,
}

impl FrameStream {
    /// Pull the next frame.
    pub async fn next_frame(&mut self) -> Option<RawFrame> {
        self.rx.recv().await
    }
}

impl Stream for FrameStream {
    type Item = RawFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<RawFrame>> {
        self.rx.poll_recv(cx)
    }
}

// ── ScreenSource ─────────────────────────────────────────────────

/// Enumerates screens and runs at most one paced capture loop.
///
/// A source is single-use: once a run has started (or the source has
/// been stopped) it cannot be started again. Build a fresh source for
/// every streaming session.
pub struct ScreenSource {
    backend: Arc<dyn ScreenBackend>,
    handle: CaptureHandle,
    started: bool,
}

impl ScreenSource {
    pub fn new(backend: Arc<dyn ScreenBackend>) -> Self {
        Self {
            backend,
            handle: CaptureHandle::default(),
            started: false,
        }
    }

    /// Currently active displays. An empty list is not an error.
    pub fn list_screens(&self) -> Result<Vec<Screen>, CastError> {
        let displays = self.backend.displays()?;
        Ok(displays
            .into_iter()
            .enumerate()
            .map(|(index, bounds)| Screen { index, bounds })
            .collect())
    }

    /// Start the capture loop for `screen` at `fps` frames per second.
    ///
    /// Must be called from within a Tokio runtime. Fails with
    /// [`CastError::CaptureUnavailable`] when the grabber cannot be
    /// opened and with [`CastError::InvalidState`] on a second start.
    pub async fn start_capture(&mut self, screen: Screen, fps: u32) -> Result<FrameStream, CastError> {
        if self.started {
            return Err(CastError::InvalidState("capture already started"));
        }
        if self.handle.is_stopped() {
            return Err(CastError::InvalidState("capture source already stopped"));
        }
        if fps == 0 {
            return Err(CastError::Other("frame rate must be at least 1".into()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| CastError::CaptureUnavailable("capture requires a tokio runtime".into()))?;

        self.started = true;
        let interval = frame_interval(fps);
        let (tx, rx) = mpsc::channel(1);
        let (ready_tx, ready_rx) = oneshot::channel();
        let backend = Arc::clone(&self.backend);
        let token = self.handle.token.clone();
        let running = Arc::clone(&self.handle.running);

        running.store(true, Ordering::SeqCst);
        let spawned = std::thread::Builder::new()
            .name(format!("rdcast-capture-{}", screen.index))
            .spawn(move || {
                match backend.open(&screen) {
                    Ok(grabber) => {
                        let _ = ready_tx.send(Ok(()));
                        runtime.block_on(capture_loop(grabber, tx, interval, token));
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
                running.store(false, Ordering::SeqCst);
                debug!(screen = screen.index, "capture thread exited");
            });

        if let Err(e) = spawned {
            self.handle.running.store(false, Ordering::SeqCst);
            return Err(CastError::Io(e));
        }

        match ready_rx.await {
            Ok(Ok(())) => {
                info!(screen = screen.index, fps, ?interval, "capture started");
                Ok(FrameStream { rx })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CastError::CaptureUnavailable("capture thread exited during startup".into())),
        }
    }

    /// Stop the capture loop. Safe before start, mid-stream, after the
    /// stream has ended, and from any thread.
    pub fn stop(&self) {
        self.handle.stop();
    }

    /// A handle that can stop this source from another task.
    pub fn handle(&self) -> CaptureHandle {
        self.handle.clone()
    }
}

impl Drop for ScreenSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Fixed inter-frame budget for `fps`.
pub(crate) fn frame_interval(fps: u32) -> Duration {
    Duration::from_secs(1) / fps.max(1)
}

async fn capture_loop(
    mut grabber: Box<dyn Grabber>,
    tx: mpsc::Sender<RawFrame>,
    interval: Duration,
    token: CancellationToken,
) {
    loop {
        let started = Instant::now();

        // Only grab once the consumer has room for the result.
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            permit = tx.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        match grabber.grab() {
            Ok(Some(frame)) => {
                if token.is_cancelled() {
                    break;
                }
                permit.send(frame);
            }
            // Idle screen: nothing new to send this interval.
            Ok(None) => drop(permit),
            Err(e) => {
                warn!("capture ended: {e}");
                break;
            }
        }

        let remaining = interval.saturating_sub(started.elapsed());
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(remaining) => {}
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
