//! Frame encoders and the factory that builds them.
//!
//! An encoder is bound to exactly one codec / geometry / frame-rate
//! triple for its whole life. Frames whose size differs from that
//! geometry are rejected with [`CastError::Encode`]; there is no
//! mid-session resize.

#[cfg(feature = "h264")]
mod h264;

use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CastError;
use crate::screen::RawFrame;

#[cfg(feature = "h264")]
pub use h264::H264Encoder;

// ── VideoCodec ───────────────────────────────────────────────────

/// Codecs a peer may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodec {
    H264,
    Vp8,
}

impl VideoCodec {
    /// All known codecs in local preference order.
    pub const ALL: [VideoCodec; 2] = [VideoCodec::H264, VideoCodec::Vp8];

    /// RTP encoding name as it appears in SDP `a=rtpmap` lines.
    pub const fn encoding_name(self) -> &'static str {
        match self {
            VideoCodec::H264 => "H264",
            VideoCodec::Vp8 => "VP8",
        }
    }

    /// Media MIME type used by the transport.
    pub const fn mime_type(self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/H264",
            VideoCodec::Vp8 => "video/VP8",
        }
    }

    /// Parse an SDP encoding name (case-insensitive).
    pub fn from_encoding_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|codec| codec.encoding_name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encoding_name())
    }
}

// ── FrameSize ────────────────────────────────────────────────────

/// Encoder geometry in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Fails with [`CastError::Encode`] unless `frame` has exactly this size.
    pub fn check(&self, frame: &RawFrame) -> Result<(), CastError> {
        if frame.width != self.width || frame.height != self.height {
            return Err(CastError::Encode(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }
        Ok(())
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ── EncodedChunk ─────────────────────────────────────────────────

/// One frame's compressed output, ready for the transport.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    /// Position in the encoder's output sequence, starting at 0.
    pub sequence: u64,
    /// Capture timestamp of the source frame.
    pub timestamp: Instant,
    /// Presentation duration (one frame interval).
    pub duration: Duration,
    /// Opaque codec bitstream.
    pub data: Bytes,
}

// ── Traits ───────────────────────────────────────────────────────

/// Stateful per-session frame transform.
///
/// Calls must arrive in capture order; implementations may keep
/// reference frames between calls.
pub trait FrameEncoder: Send {
    /// Encode exactly one frame into exactly one chunk.
    fn encode(&mut self, frame: RawFrame) -> Result<EncodedChunk, CastError>;

    /// Release codec state. Consumes the encoder, so it runs once.
    fn close(self: Box<Self>) -> Result<(), CastError>;
}

/// Selects and builds encoders.
pub trait EncoderFactory: Send + Sync {
    /// Pure capability query.
    fn supports(&self, codec: VideoCodec) -> bool;

    /// Build a fresh encoder. Fails with [`CastError::UnsupportedCodec`]
    /// whenever [`supports`](Self::supports) is false.
    fn new_encoder(
        &self,
        codec: VideoCodec,
        size: FrameSize,
        frame_rate: u32,
    ) -> Result<Box<dyn FrameEncoder>, CastError>;

    /// The subset of `offered` this factory can satisfy, order preserved.
    fn negotiable(&self, offered: &[VideoCodec]) -> Vec<VideoCodec> {
        offered.iter().copied().filter(|c| self.supports(*c)).collect()
    }
}

// ── CodecService ─────────────────────────────────────────────────

/// The built-in encoder factory.
///
/// H.264 is available when the crate is built with the `h264` feature.
/// VP8 is recognised during negotiation but has no encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecService;

impl EncoderFactory for CodecService {
    fn supports(&self, codec: VideoCodec) -> bool {
        match codec {
            VideoCodec::H264 => cfg!(feature = "h264"),
            VideoCodec::Vp8 => false,
        }
    }

    fn new_encoder(
        &self,
        codec: VideoCodec,
        size: FrameSize,
        frame_rate: u32,
    ) -> Result<Box<dyn FrameEncoder>, CastError> {
        if !self.supports(codec) {
            return Err(CastError::UnsupportedCodec(codec));
        }
        build_h264(size, frame_rate)
    }
}

#[cfg(feature = "h264")]
fn build_h264(size: FrameSize, frame_rate: u32) -> Result<Box<dyn FrameEncoder>, CastError> {
    Ok(Box::new(H264Encoder::new(size, frame_rate)?))
}

#[cfg(not(feature = "h264"))]
fn build_h264(_size: FrameSize, _frame_rate: u32) -> Result<Box<dyn FrameEncoder>, CastError> {
    Err(CastError::UnsupportedCodec(VideoCodec::H264))
}

// ── Tests ────────────────────────────────────────────────────────
