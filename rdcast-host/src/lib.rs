//! # rdcast-host: headless screen sharing host
//!
//! Reads a remote party's offer from a file, answers it, writes the
//! answer back, then streams the selected screen over WebRTC until the
//! peer goes away or the process is told to stop.
//!
//! ## Modules
//!
//! - **config**: TOML configuration with CLI overrides applied on top.
//! - **exchange**: the JSON input/output records.
//! - **service**: setup, streaming, signal handling and exit status.

pub mod config;
pub mod exchange;
pub mod service;
