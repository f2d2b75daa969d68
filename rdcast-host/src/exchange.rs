//! Out-of-band offer/answer records.
//!
//! The caller drops an [`InputRecord`] next to the host and collects the
//! [`OutputRecord`] it writes back. How those files travel between the
//! two parties is not our concern.

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use rdcast_core::CastError;

/// Output target name that prints the record instead of writing a file.
pub const STDOUT: &str = "stdout";

/// What the remote party hands us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRecord {
    /// Session-description payload (raw SDP, JSON or base64 JSON).
    pub offer: String,
    /// Index of the screen to share.
    #[serde(default)]
    pub screen: usize,
}

/// What we hand back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub answer: String,
}

impl InputRecord {
    pub fn read(path: &Path) -> Result<Self, CastError> {
        let raw = std::fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

/// Destination of the [`OutputRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerSink {
    Stdout,
    File(PathBuf),
}

impl AnswerSink {
    pub fn parse(target: &str) -> Self {
        if target == STDOUT {
            Self::Stdout
        } else {
            Self::File(PathBuf::from(target))
        }
    }

    /// Remove an answer left over from a previous run, so a caller
    /// polling for the file never picks up a stale one.
    pub fn clear_stale(&self) -> io::Result<()> {
        let Self::File(path) = self else {
            return Ok(());
        };
        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!("removed stale {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn write(&self, record: &OutputRecord) -> Result<(), CastError> {
        let json = serde_json::to_string(record)?;
        match self {
            Self::Stdout => println!("{json}"),
            Self::File(path) => std::fs::write(path, json)?,
        }
        Ok(())
    }
}

impl std::fmt::Display for AnswerSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => f.write_str(STDOUT),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}
