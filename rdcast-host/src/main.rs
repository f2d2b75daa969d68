//! rdcast host entry point.
//!
//! ```text
//! rdcast-host                        Answer rdcast-in.dat, stream until stopped
//! rdcast-host --in offer.json --out stdout
//! rdcast-host --stun stun:host:3478  Override the STUN server
//! rdcast-host --config <path>        Load a custom config TOML
//! rdcast-host --gen-config           Write default config to stdout
//! rdcast-host --app-version          Print the version and exit
//! ```
//!
//! Exit status: 0 when the session was stopped or closed, 1 when no
//! answer could be produced, 2 when a running session failed.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use rdcast_host::config::{HostConfig, LoggingConfig};
use rdcast_host::exchange::AnswerSink;
use rdcast_host::service::{self, HostService};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "rdcast-host", about = "Share a screen with a WebRTC peer via an out-of-band offer")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "rdcast.toml")]
    config: PathBuf,

    /// STUN server URL (stun:host:port).
    #[arg(long)]
    stun: Option<String>,

    /// Input record with the offer and screen index.
    #[arg(long = "in", value_name = "FILE")]
    input: Option<String>,

    /// Where to write the answer record (`stdout` to print it).
    #[arg(long = "out", value_name = "FILE")]
    output: Option<String>,

    /// Log file (`stderr` to log to the terminal).
    #[arg(long, value_name = "FILE")]
    log: Option<String>,

    /// Capture frame rate.
    #[arg(long)]
    fps: Option<u32>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Print the version and exit.
    #[arg(long)]
    app_version: bool,
}

impl Cli {
    fn apply(&self, config: &mut HostConfig) {
        if let Some(stun) = &self.stun {
            config.network.stun_server = stun.clone();
        }
        if let Some(input) = &self.input {
            config.files.input = input.clone();
        }
        if let Some(output) = &self.output {
            config.files.output = output.clone();
        }
        if let Some(log) = &self.log {
            config.logging.file = log.clone();
        }
        if let Some(fps) = self.fps {
            config.screen.fps = fps;
        }
    }
}

// ── Logging ──────────────────────────────────────────────────────

fn init_logging(logging: &LoggingConfig) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    eprintln!("Log to: {}", logging.file);
    let (writer, ansi) = if logging.file.is_empty() || logging.file == "stderr" {
        (BoxMakeWriter::new(std::io::stderr), true)
    } else {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&logging.file)?;
        (BoxMakeWriter::new(Mutex::new(file)), false)
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .init();
    Ok(())
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.app_version {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(ExitCode::SUCCESS);
    }

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = HostConfig::default().to_toml()?;
        println!("{text}");
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = HostConfig::load(&cli.config);
    cli.apply(&mut config);

    // Never leave an old answer around for the caller to pick up.
    AnswerSink::parse(&config.files.output).clear_stale()?;

    init_logging(&config.logging)?;

    info!(
        "started: rdcast-host v{}, stun: {}, in: {}, out: {}",
        env!("CARGO_PKG_VERSION"),
        config.network.stun_server,
        config.files.input,
        config.files.output
    );
    info!("target FPS: {}", config.frame_rate());

    let service = match HostService::new(config) {
        Ok(service) => service,
        Err(e) => {
            error!("could not start session: {e}");
            return Ok(ExitCode::from(service::EXIT_SETUP_FAILED as u8));
        }
    };
    service::stop_on_signal(service.stop_handle());

    let result = service.run().await;
    match &result {
        Ok(report) => info!(
            frames = report.stats.frames_captured,
            chunks = report.stats.chunks_sent,
            "session ended: {}",
            report.outcome
        ),
        Err(e) => error!("could not start session: {e}"),
    }

    Ok(ExitCode::from(service::exit_code(&result) as u8))
}
