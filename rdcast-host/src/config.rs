//! Configuration for the rdcast host.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use rdcast_core::NegotiatorConfig;
use rdcast_core::negotiator::{DEFAULT_GATHER_TIMEOUT, DEFAULT_STUN_SERVER};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Peer transport settings.
    pub network: NetworkConfig,
    /// Screen capture settings.
    pub screen: ScreenConfig,
    /// Offer/answer handling.
    pub negotiation: NegotiationConfig,
    /// Offer/answer exchange files.
    pub files: FilesConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// STUN server URL. Empty disables STUN (host candidates only).
    pub stun_server: String,
}

/// Screen capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    /// Target frames per second (1..=60).
    pub fps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Ceiling on ICE candidate gathering, in milliseconds.
    pub gather_timeout_ms: u64,
}

/// Where the offer comes from and where the answer goes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// JSON input record `{ "offer": ..., "screen": ... }`.
    pub input: String,
    /// JSON output record `{ "answer": ... }`, or `stdout`.
    pub output: String,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Log file path (appended to). `stderr` logs to standard error.
    pub file: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            stun_server: DEFAULT_STUN_SERVER.into(),
        }
    }
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self { fps: 24 }
    }
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            gather_timeout_ms: DEFAULT_GATHER_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            input: "rdcast-in.dat".into(),
            output: "rdcast-out.dat".into(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: "rdcast.log".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl HostConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    ///
    /// Runs before logging is up, so problems go to stderr.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                eprintln!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Render as TOML, e.g. for `--gen-config`.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Effective frame rate.
    pub fn frame_rate(&self) -> u32 {
        self.screen.fps.clamp(1, 60)
    }

    /// Convert negotiation settings into the core's `NegotiatorConfig`.
    pub fn to_negotiator_config(&self) -> NegotiatorConfig {
        NegotiatorConfig {
            stun_server: self.network.stun_server.clone(),
            gather_timeout: Duration::from_millis(self.negotiation.gather_timeout_ms.max(1)),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
