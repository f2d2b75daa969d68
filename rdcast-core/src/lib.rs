//! # rdcast-core
//!
//! Headless screen sharing over a negotiated peer connection.
//!
//! This crate contains:
//! - **Screen**: `ScreenSource`, paced capture with single-frame backpressure
//! - **Encoder**: `EncoderFactory` / `FrameEncoder`, with an OpenH264 backend
//! - **Negotiator**: `SessionNegotiator` turning a remote offer into an answer
//!   and a live `SessionHandle`, with lifecycle events as a state machine
//! - **Session**: `StreamingSession`, the capture → encode → send pump
//! - **Error**: `CastError`, typed, `thiserror`-based error hierarchy
//!
//! ```text
//!  offer ──► SessionNegotiator ──► answer
//!                  │
//!                  ▼
//!            SessionHandle ──► StreamingSession ◄── ScreenSource
//!                                   │      ▲
//!                                   ▼      │
//!                              PeerTransport  FrameEncoder
//! ```

pub mod encoder;
pub mod error;
pub mod negotiator;
pub mod screen;
pub mod session;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use encoder::{CodecService, EncodedChunk, EncoderFactory, FrameEncoder, FrameSize, VideoCodec};
pub use error::CastError;
pub use negotiator::{
    NegotiatorConfig, Offer, PeerState, PeerSubstrate, PeerTransport, RtcSubstrate, SessionEvent,
    SessionEvents, SessionHandle, SessionNegotiator, SessionState,
};
pub use screen::{
    CaptureHandle, FrameStream, Grabber, PixelFormat, RawFrame, Rect, Screen, ScreenBackend,
    ScreenSource, SystemScreens,
};
pub use session::{SessionOutcome, SessionReport, StopHandle, StreamStats, StreamingSession};
