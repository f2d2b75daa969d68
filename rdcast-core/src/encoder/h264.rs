//! H.264 encoding through OpenH264.
//!
//! OpenH264 performs the BGRA → YUV420 conversion itself. Output is
//! Annex B (start-code prefixed), which is what the RTP H.264
//! packetizer expects.

use std::time::Duration;

use bytes::Bytes;
use openh264::OpenH264API;
use openh264::encoder::{Encoder, EncoderConfig, UsageType};
use openh264::formats::{BgraSliceU8, YUVBuffer};
use tracing::{debug, trace};

use crate::encoder::{EncodedChunk, FrameEncoder, FrameSize};
use crate::error::CastError;
use crate::screen::RawFrame;
use crate::screen::frame_interval;

/// OpenH264-backed [`FrameEncoder`].
pub struct H264Encoder {
    encoder: Encoder,
    size: FrameSize,
    frame_duration: Duration,
    frame_count: u64,
}

impl H264Encoder {
    /// Build an encoder for `size` at `frame_rate`.
    ///
    /// YUV420 needs even dimensions; anything else is rejected here
    /// rather than on the first frame.
    pub fn new(size: FrameSize, frame_rate: u32) -> Result<Self, CastError> {
        if size.width == 0 || size.height == 0 || size.width % 2 != 0 || size.height % 2 != 0 {
            return Err(CastError::Encode(format!("H.264 needs even, non-zero dimensions, got {size}")));
        }

        let config = EncoderConfig::new().usage_type(UsageType::ScreenContentRealTime);
        let encoder = Encoder::with_api_config(OpenH264API::from_source(), config)
            .map_err(|e| CastError::Encode(format!("OpenH264 init failed: {e:?}")))?;

        debug!(%size, frame_rate, "created H.264 encoder");

        Ok(Self {
            encoder,
            size,
            frame_duration: frame_interval(frame_rate),
            frame_count: 0,
        })
    }
}

impl FrameEncoder for H264Encoder {
    fn encode(&mut self, frame: RawFrame) -> Result<EncodedChunk, CastError> {
        self.size.check(&frame)?;

        let pixels = frame.packed()?;
        let source = BgraSliceU8::new(pixels.as_ref(), (self.size.width as usize, self.size.height as usize));
        let yuv = YUVBuffer::from_rgb_source(source);

        let bitstream = self
            .encoder
            .encode(&yuv)
            .map_err(|e| CastError::Encode(format!("OpenH264 encode failed: {e:?}")))?;
        let data = bitstream.to_vec();

        let sequence = self.frame_count;
        self.frame_count += 1;
        trace!(sequence, bytes = data.len(), "encoded frame");

        Ok(EncodedChunk {
            sequence,
            timestamp: frame.timestamp,
            duration: self.frame_duration,
            data: Bytes::from(data),
        })
    }

    fn close(self: Box<Self>) -> Result<(), CastError> {
        debug!(frames = self.frame_count, "closing H.264 encoder");
        // OpenH264 state is released when the encoder is dropped.
        Ok(())
    }
}
