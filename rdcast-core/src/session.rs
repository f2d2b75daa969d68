//! The streaming pipeline: screen source → encoder → transport.
//!
//! A [`StreamingSession`] owns one capture run and one encoder for its
//! whole life. The pump is a single sequential loop, so frames are
//! encoded and sent strictly in capture order and the encoder is never
//! touched concurrently.
//!
//! Capture does not start until the transport reports `Connected`.
//! Whatever ends the run (local stop, peer failure or close, an encode
//! error, the capture stream ending) goes through the same teardown:
//!
//! 1. stop the screen source
//! 2. close the encoder
//! 3. close the transport

use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::encoder::{EncoderFactory, FrameEncoder, FrameSize};
use crate::error::CastError;
use crate::negotiator::{SessionEvent, SessionEvents, SessionHandle, SessionState};
use crate::screen::ScreenSource;

// ── StopHandle ───────────────────────────────────────────────────

/// Requests a local stop of a [`StreamingSession`].
///
/// Cloneable and callable from any thread or task (signal handlers
/// included). Never blocks.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once [`stop`](Self::stop) has been called.
    pub async fn stopped(&self) {
        self.token.cancelled().await
    }
}

// ── Outcome / stats ──────────────────────────────────────────────

/// Why a streaming session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Local stop requested.
    Stopped,
    /// The peer closed the session.
    Closed,
    /// Transport failure.
    Failed(String),
    /// A frame could not be encoded.
    EncodeFailed(String),
    /// The capture stream ended on its own (screen gone, capture error).
    CaptureEnded,
}

impl SessionOutcome {
    /// Run-time failures, as opposed to orderly endings.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::EncodeFailed(_))
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("stopped"),
            Self::Closed => f.write_str("closed by peer"),
            Self::Failed(reason) => write!(f, "transport failed: {reason}"),
            Self::EncodeFailed(reason) => write!(f, "encode failed: {reason}"),
            Self::CaptureEnded => f.write_str("capture ended"),
        }
    }
}

/// Counters for one streaming run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub frames_captured: u64,
    pub chunks_sent: u64,
    pub bytes_sent: u64,
}

/// Final result of [`StreamingSession::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    pub stats: StreamStats,
}

// ── StreamingSession ─────────────────────────────────────────────

/// Pumps frames from one screen into one negotiated session.
pub struct StreamingSession {
    handle: SessionHandle,
    source: ScreenSource,
    encoder: Box<dyn FrameEncoder>,
    events: SessionEvents,
    stop: StopHandle,
}

impl StreamingSession {
    /// Bind a negotiated session to a fresh screen source.
    ///
    /// The encoder is built here from the negotiated codec, the screen
    /// geometry and the session frame rate, so an unsupported codec
    /// surfaces before any capture starts. Fails with
    /// [`CastError::InvalidState`] if no answer has been produced or the
    /// session is already bound to another stream.
    ///
    /// On failure the session's transport is released.
    pub async fn new(
        mut handle: SessionHandle,
        source: ScreenSource,
        encoders: &dyn EncoderFactory,
    ) -> Result<Self, CastError> {
        match bind(&mut handle, encoders) {
            Ok((encoder, events)) => Ok(Self {
                handle,
                source,
                encoder,
                events,
                stop: StopHandle::default(),
            }),
            Err(e) => {
                warn!(session = handle.id(), "cannot bind stream: {e}");
                if let Err(close_err) = handle.close().await {
                    debug!(session = handle.id(), "transport close after failed bind: {close_err}");
                }
                Err(e)
            }
        }
    }

    /// Use an existing stop handle, e.g. one already wired to signals
    /// before the session was built.
    pub fn with_stop(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    /// Handle for stopping [`run`](Self::run) from elsewhere.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Tear the session down without streaming.
    pub async fn close(self) {
        teardown(&self.source, self.encoder, &self.handle).await;
    }

    /// Drive the session to completion.
    ///
    /// Waits for `Connected`, then captures, encodes and sends until
    /// stopped or until the session ends. Teardown always runs.
    pub async fn run(self) -> SessionReport {
        let Self {
            handle,
            mut source,
            mut encoder,
            mut events,
            stop,
        } = self;
        let session = handle.id();
        let screen = handle.screen();
        let transport = handle.transport();
        let mut stats = StreamStats::default();

        let outcome = async {
            // Phase 1: no capture before the transport is connected.
            loop {
                tokio::select! {
                    biased;
                    _ = stop.token.cancelled() => return SessionOutcome::Stopped,
                    event = events.next() => match event {
                        Some(SessionEvent::Connected) => break,
                        Some(SessionEvent::Failed) => {
                            return SessionOutcome::Failed("peer connection failed before connecting".into());
                        }
                        Some(SessionEvent::Closed) | None => return SessionOutcome::Closed,
                    },
                }
            }

            let mut frames = match source.start_capture(screen, handle.frame_rate()).await {
                Ok(frames) => frames,
                Err(e) => return SessionOutcome::Failed(format!("capture start: {e}")),
            };
            info!(session, screen = screen.index, fps = handle.frame_rate(), "streaming");

            // Phase 2: sequential pump.
            loop {
                tokio::select! {
                    biased;
                    _ = stop.token.cancelled() => return SessionOutcome::Stopped,
                    event = events.next() => match event {
                        Some(event) => {
                            if let Some(outcome) = ended_by(event) {
                                return outcome;
                            }
                        }
                        None => return SessionOutcome::Closed,
                    },
                    frame = frames.next_frame() => {
                        let Some(frame) = frame else {
                            return SessionOutcome::CaptureEnded;
                        };
                        stats.frames_captured += 1;

                        let chunk = match encoder.encode(frame) {
                            Ok(chunk) => chunk,
                            Err(e) => return SessionOutcome::EncodeFailed(e.to_string()),
                        };

                        if stop.is_stopped() {
                            return SessionOutcome::Stopped;
                        }
                        // Notifications that arrived while encoding decide
                        // whether this chunk may still go out.
                        while let Some(event) = events.try_next() {
                            if let Some(outcome) = ended_by(event) {
                                return outcome;
                            }
                        }

                        let len = chunk.data.len() as u64;
                        if let Err(e) = transport.write_chunk(&chunk).await {
                            return SessionOutcome::Failed(e.to_string());
                        }
                        stats.chunks_sent += 1;
                        stats.bytes_sent += len;
                    }
                }
            }
        }
        .await;

        teardown(&source, encoder, &handle).await;

        info!(
            session,
            %outcome,
            frames = stats.frames_captured,
            chunks = stats.chunks_sent,
            bytes = stats.bytes_sent,
            "streaming session finished"
        );

        SessionReport { outcome, stats }
    }
}

fn bind(
    handle: &mut SessionHandle,
    encoders: &dyn EncoderFactory,
) -> Result<(Box<dyn FrameEncoder>, SessionEvents), CastError> {
    if !matches!(
        handle.state(),
        SessionState::AnswerProduced | SessionState::Connecting | SessionState::Connected
    ) {
        return Err(CastError::InvalidState("session has not produced an answer"));
    }
    let codec = handle
        .codec()
        .ok_or(CastError::InvalidState("session has no negotiated codec"))?;

    let bounds = handle.screen().bounds;
    let encoder = encoders.new_encoder(
        codec,
        FrameSize::new(bounds.width, bounds.height),
        handle.frame_rate(),
    )?;

    match handle.take_events() {
        Some(events) => Ok((encoder, events)),
        None => {
            if let Err(e) = encoder.close() {
                debug!("closing unused encoder: {e}");
            }
            Err(CastError::InvalidState("session already bound to a stream"))
        }
    }
}

/// Stop the source, close the encoder, then release the transport.
async fn teardown(source: &ScreenSource, encoder: Box<dyn FrameEncoder>, handle: &SessionHandle) {
    let session = handle.id();
    source.stop();
    if let Err(e) = encoder.close() {
        warn!(session, "encoder close failed: {e}");
    }
    if let Err(e) = handle.close().await {
        warn!(session, "transport close failed: {e}");
    }
}

/// How a lifecycle notification ends a running stream, if it does.
fn ended_by(event: SessionEvent) -> Option<SessionOutcome> {
    match event {
        SessionEvent::Connected => None,
        SessionEvent::Failed => Some(SessionOutcome::Failed("peer connection failed".into())),
        SessionEvent::Closed => Some(SessionOutcome::Closed),
    }
}
