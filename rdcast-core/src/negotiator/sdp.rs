//! Session-description envelopes and offer validation.
//!
//! Offers reach the host copy/pasted through files, so three shapes
//! are accepted:
//!
//! | Envelope      | Example                                   |
//! |---------------|-------------------------------------------|
//! | `RawSdp`      | `v=0\r\no=- 46117 2 IN IP4 ...`           |
//! | `Json`        | `{"type":"offer","sdp":"v=0\r\n..."}`     |
//! | `Base64Json`  | `eyJ0eXBlIjoib2ZmZXIiLCJzZHAiOiJ2PTAi...` |
//!
//! The answer is written back in the envelope the offer arrived in.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::encoder::VideoCodec;
use crate::error::CastError;

/// Wire shape of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    RawSdp,
    Json,
    Base64Json,
}

/// JSON form of a session description, as produced by browsers'
/// `RTCSessionDescription.toJSON()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
}

/// A validated remote offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    pub sdp: String,
    pub envelope: Envelope,
}

impl Offer {
    /// Decode and validate an offer payload.
    ///
    /// Fails with [`CastError::InvalidOffer`] if the payload is not one
    /// of the accepted envelopes, is not an offer, or carries no video
    /// media section.
    pub fn parse(payload: &str) -> Result<Self, CastError> {
        let trimmed = payload.trim();
        if trimmed.is_empty() {
            return Err(CastError::InvalidOffer("empty payload".into()));
        }

        let (description, envelope) = if trimmed.starts_with("v=") {
            (
                Description {
                    kind: "offer".into(),
                    sdp: trimmed.to_string(),
                },
                Envelope::RawSdp,
            )
        } else if trimmed.starts_with('{') {
            (parse_json(trimmed.as_bytes())?, Envelope::Json)
        } else {
            let raw = STANDARD
                .decode(trimmed)
                .map_err(|e| CastError::InvalidOffer(format!("not SDP, JSON or base64: {e}")))?;
            (parse_json(&raw)?, Envelope::Base64Json)
        };

        if description.kind != "offer" {
            return Err(CastError::InvalidOffer(format!(
                "expected an offer, got `{}`",
                description.kind
            )));
        }
        validate_sdp(&description.sdp)?;

        Ok(Self {
            sdp: description.sdp,
            envelope,
        })
    }

    /// Video codecs present in the offer, in the remote's preference order.
    pub fn video_codecs(&self) -> Vec<VideoCodec> {
        video_codecs(&self.sdp)
    }

    /// Wrap `answer_sdp` in this offer's envelope.
    pub fn encode_answer(&self, answer_sdp: &str) -> Result<String, CastError> {
        let description = Description {
            kind: "answer".into(),
            sdp: answer_sdp.to_string(),
        };
        Ok(match self.envelope {
            Envelope::RawSdp => description.sdp,
            Envelope::Json => serde_json::to_string(&description)?,
            Envelope::Base64Json => STANDARD.encode(serde_json::to_vec(&description)?),
        })
    }
}

fn parse_json(raw: &[u8]) -> Result<Description, CastError> {
    serde_json::from_slice(raw)
        .map_err(|e| CastError::InvalidOffer(format!("malformed session description: {e}")))
}

fn validate_sdp(sdp: &str) -> Result<(), CastError> {
    let mut lines = sdp.lines().map(str::trim).filter(|l| !l.is_empty());
    if !lines.next().is_some_and(|first| first.starts_with("v=")) {
        return Err(CastError::InvalidOffer("SDP must start with a version line".into()));
    }
    if !sdp.lines().any(|l| l.trim_start().starts_with("m=video ")) {
        return Err(CastError::InvalidOffer("offer has no video media section".into()));
    }
    Ok(())
}

/// Scan `a=rtpmap:<pt> <name>/<clock>` lines of the video sections.
///
/// Payload types appear in the remote's preference order, so the first
/// match of each codec wins. Unknown encodings are skipped.
pub fn video_codecs(sdp: &str) -> Vec<VideoCodec> {
    let mut codecs = Vec::new();
    let mut in_video = false;

    for line in sdp.lines().map(str::trim) {
        if let Some(media) = line.strip_prefix("m=") {
            in_video = media.starts_with("video ");
            continue;
        }
        if !in_video {
            continue;
        }
        let Some(rtpmap) = line.strip_prefix("a=rtpmap:") else {
            continue;
        };
        let name = rtpmap
            .split_whitespace()
            .nth(1)
            .and_then(|enc| enc.split('/').next())
            .and_then(VideoCodec::from_encoding_name);
        if let Some(codec) = name {
            if !codecs.contains(&codec) {
                codecs.push(codec);
            }
        }
    }

    codecs
}
