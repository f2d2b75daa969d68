//! Domain-specific error types for the screen-streaming core.
//!
//! All fallible operations return `Result<T, CastError>`.
//! Construction-time variants abort session setup; run-time variants
//! end a live session and are reported as its outcome.

use thiserror::Error;

use crate::encoder::VideoCodec;

/// The canonical error type for rdcast.
#[derive(Debug, Error)]
pub enum CastError {
    // ── Setup Errors ─────────────────────────────────────────────
    /// The platform capture subsystem could not be initialised, or the
    /// requested screen does not exist.
    #[error("screen capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// No encoder can be built for the requested codec.
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(VideoCodec),

    /// The transport could not allocate a session, or candidate
    /// gathering did not settle in time.
    #[error("session init failed: {0}")]
    SessionInit(String),

    /// The remote offer is not a usable session description.
    #[error("invalid offer: {0}")]
    InvalidOffer(String),

    // ── Contract Errors ──────────────────────────────────────────
    /// An operation was invoked in a state that forbids it.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    // ── Run-time Errors ──────────────────────────────────────────
    /// A frame could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// The transport reported a terminal failure or refused a write.
    #[error("transport failed: {0}")]
    TransportFailed(String),

    // ── Ambient Errors ───────────────────────────────────────────
    /// An underlying I/O operation failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl CastError {
    /// Whether this error belongs to session setup, i.e. no answer was
    /// (or should be) handed back to the remote party.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            CastError::CaptureUnavailable(_)
                | CastError::UnsupportedCodec(_)
                | CastError::SessionInit(_)
                | CastError::InvalidOffer(_)
        )
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for CastError {
    fn from(s: String) -> Self {
        CastError::Other(s)
    }
}

impl From<&str> for CastError {
    fn from(s: &str) -> Self {
        CastError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for CastError {
    fn from(e: serde_json::Error) -> Self {
        CastError::Json(e.to_string())
    }
}
