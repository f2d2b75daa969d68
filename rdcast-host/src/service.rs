//! Host service: one offer in, one answer out, one screen streamed.
//!
//! Everything up to writing the answer is setup. A setup failure means
//! no answer exists and the remote party must not wait for one; after
//! the answer is written the run ends with a [`SessionReport`].

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use rdcast_core::{
    CastError, CodecService, EncoderFactory, PeerSubstrate, RtcSubstrate, ScreenBackend,
    ScreenSource, SessionNegotiator, SessionReport, StopHandle, StreamingSession, SystemScreens,
};

use crate::config::HostConfig;
use crate::exchange::{AnswerSink, InputRecord, OutputRecord};

/// Process exit status for a run that never produced an answer.
pub const EXIT_SETUP_FAILED: i32 = 1;
/// Process exit status for a session that ended in failure.
pub const EXIT_SESSION_FAILED: i32 = 2;

// ── HostService ──────────────────────────────────────────────────

pub struct HostService {
    config: HostConfig,
    backend: Arc<dyn ScreenBackend>,
    encoders: Arc<dyn EncoderFactory>,
    substrate: Arc<dyn PeerSubstrate>,
    stop: StopHandle,
}

impl HostService {
    /// Service over the real displays, the built-in encoders and the
    /// WebRTC substrate.
    pub fn new(config: HostConfig) -> Result<Self, CastError> {
        let substrate = RtcSubstrate::new(&config.network.stun_server)?;
        Ok(Self::with_parts(
            config,
            Arc::new(SystemScreens::new()),
            Arc::new(CodecService),
            Arc::new(substrate),
        ))
    }

    pub fn with_parts(
        config: HostConfig,
        backend: Arc<dyn ScreenBackend>,
        encoders: Arc<dyn EncoderFactory>,
        substrate: Arc<dyn PeerSubstrate>,
    ) -> Self {
        Self {
            config,
            backend,
            encoders,
            substrate,
            stop: StopHandle::default(),
        }
    }

    /// Stops the service at any point, setup included.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Run setup and then stream until the session ends.
    ///
    /// 1. Reads the input record.
    /// 2. Resolves the requested screen.
    /// 3. Negotiates: offer → answer.
    /// 4. Binds the streaming session (builds the encoder).
    /// 5. Publishes the answer.
    /// 6. Streams until stopped, closed or failed.
    ///
    /// Once a transport session exists, every setup failure releases it.
    pub async fn run(&self) -> Result<SessionReport, CastError> {
        let session = self.setup().await?;
        info!("waiting for the peer to connect");
        Ok(session.run().await)
    }

    async fn setup(&self) -> Result<StreamingSession, CastError> {
        let input_path = PathBuf::from(&self.config.files.input);
        info!("reading input from {}", input_path.display());
        let input = InputRecord::read(&input_path)?;

        let source = ScreenSource::new(Arc::clone(&self.backend));
        let screens = source.list_screens()?;
        let screen = screens.get(input.screen).copied().ok_or_else(|| {
            CastError::CaptureUnavailable(format!(
                "screen {} not found ({} available)",
                input.screen,
                screens.len()
            ))
        })?;
        info!(screen = screen.index, bounds = ?screen.bounds, "screen selected");

        if self.stop.is_stopped() {
            return Err(stopped_during_setup());
        }

        let negotiator = SessionNegotiator::new(
            Arc::clone(&self.substrate),
            Arc::clone(&self.encoders),
            &self.config.to_negotiator_config(),
        );
        let mut handle = negotiator
            .create_session(screen, self.config.frame_rate())
            .await?;

        let negotiated = tokio::select! {
            biased;
            _ = self.stop.stopped() => Err(stopped_during_setup()),
            answer = handle.process_offer(&input.offer) => answer,
        };
        let answer = match negotiated {
            Ok(answer) => answer,
            Err(e) => {
                if let Err(close_err) = handle.close().await {
                    debug!("transport close after failed negotiation: {close_err}");
                }
                return Err(e);
            }
        };

        let session = StreamingSession::new(handle, source, self.encoders.as_ref())
            .await?
            .with_stop(self.stop.clone());

        let sink = AnswerSink::parse(&self.config.files.output);
        if let Err(e) = sink.write(&OutputRecord { answer }) {
            session.close().await;
            return Err(e);
        }
        info!("answer written to {sink}");

        Ok(session)
    }
}

fn stopped_during_setup() -> CastError {
    CastError::SessionInit("stopped during setup".into())
}

/// Map a run result to the process exit status.
pub fn exit_code(result: &Result<SessionReport, CastError>) -> i32 {
    match result {
        Err(_) => EXIT_SETUP_FAILED,
        Ok(report) if report.outcome.is_failure() => EXIT_SESSION_FAILED,
        Ok(_) => 0,
    }
}

// ── Signals ──────────────────────────────────────────────────────

/// Resolves on the first termination request (SIGINT, or SIGTERM on
/// unix) and returns its name.
pub async fn shutdown_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|_| "Ctrl-C")
    }
}

/// Forward termination requests to `stop`.
pub fn stop_on_signal(stop: StopHandle) {
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(name) => info!("{name} received, shutting down"),
            Err(e) => {
                warn!("signal handling unavailable: {e}");
                return;
            }
        }
        stop.stop();
    });
}

// ── Tests ────────────────────────────────────────────────────────
