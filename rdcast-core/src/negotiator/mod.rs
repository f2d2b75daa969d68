//! Session negotiation: from a remote offer to a live, writable session.
//!
//! ```text
//!  Idle ──► OfferReceived ──► AnswerProduced ──► Connecting ──► Connected
//!                │                  │                 │             │
//!                ▼                  ▼                 ▼             ▼
//!              Failed ◄─────────────┴─────────────────┴──────── Failed | Closed
//! ```
//!
//! The transport substrate runs on its own execution context and
//! reports raw [`PeerState`] changes through an unbounded channel.
//! [`SessionEvents`] is the single consumer of that channel: it folds
//! raw states into [`SessionState`] and yields each terminal
//! [`SessionEvent`] at most once.

pub mod rtc;
pub mod sdp;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::encoder::{EncodedChunk, EncoderFactory, VideoCodec};
use crate::error::CastError;
use crate::screen::Screen;

pub use rtc::RtcSubstrate;
pub use sdp::Offer;

/// Public Google STUN server, used when nothing else is configured.
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Upper bound on candidate gathering inside `process_offer`.
pub const DEFAULT_GATHER_TIMEOUT: Duration = Duration::from_secs(10);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

// ── SessionState ─────────────────────────────────────────────────

/// Negotiation lifecycle of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Allocated, no offer seen yet.
    #[default]
    Idle,
    /// An offer is being applied.
    OfferReceived,
    /// The answer is ready to go back to the remote party.
    AnswerProduced,
    /// ICE / DTLS connectivity checks in progress.
    Connecting,
    /// Media can flow.
    Connected,
    /// Terminal: negotiation or transport failure.
    Failed,
    /// Terminal: closed by either side.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::OfferReceived => "OfferReceived",
            Self::AnswerProduced => "AnswerProduced",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Failed => "Failed",
            Self::Closed => "Closed",
        };
        f.write_str(name)
    }
}

impl SessionState {
    /// `Failed` and `Closed` are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `OfferReceived`.
    ///
    /// Valid from: `Idle`.
    pub fn receive_offer(&mut self) -> Result<(), CastError> {
        match self {
            Self::Idle => {
                *self = Self::OfferReceived;
                Ok(())
            }
            _ => Err(CastError::InvalidState("offer already processed for this session")),
        }
    }

    /// Transition to `AnswerProduced`.
    ///
    /// Valid from: `OfferReceived`.
    pub fn produce_answer(&mut self) -> Result<(), CastError> {
        match self {
            Self::OfferReceived => {
                *self = Self::AnswerProduced;
                Ok(())
            }
            _ => Err(CastError::InvalidState("cannot answer: no offer in progress")),
        }
    }

    /// Force the session into `Failed` unless it is already terminal.
    pub fn fail(&mut self) {
        if !self.is_terminal() {
            *self = Self::Failed;
        }
    }

    /// Force the session into `Closed` unless it is already terminal.
    pub fn close(&mut self) {
        if !self.is_terminal() {
            *self = Self::Closed;
        }
    }

    /// Fold a raw transport state into the session state.
    ///
    /// Returns the notification to deliver, if any. `Connected` is only
    /// reported after an answer has been produced, and each terminal
    /// notification at most once.
    pub fn apply(&mut self, peer: PeerState) -> Option<SessionEvent> {
        match (peer, *self) {
            (PeerState::Connecting, Self::AnswerProduced) => {
                *self = Self::Connecting;
                None
            }
            (PeerState::Connected, Self::AnswerProduced | Self::Connecting) => {
                *self = Self::Connected;
                Some(SessionEvent::Connected)
            }
            (PeerState::Failed, state) if !state.is_terminal() => {
                *self = Self::Failed;
                Some(SessionEvent::Failed)
            }
            (PeerState::Closed, state) if !state.is_terminal() => {
                *self = Self::Closed;
                Some(SessionEvent::Closed)
            }
            _ => None,
        }
    }
}

// ── Transport-facing types ───────────────────────────────────────

/// Raw connection state as reported by the transport substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    /// Connectivity lost; the substrate may still recover or fail.
    Disconnected,
    Failed,
    Closed,
}

/// Lifecycle notification delivered to the streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    Failed,
    Closed,
}

/// Allocates transport sessions.
#[async_trait]
pub trait PeerSubstrate: Send + Sync {
    /// Allocate one transport session. State changes must be pushed
    /// into `events` from the substrate's own execution context.
    async fn open(
        &self,
        events: mpsc::UnboundedSender<PeerState>,
    ) -> Result<Arc<dyn PeerTransport>, CastError>;
}

/// One live transport session.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Apply `offer` as the remote description, attach a `codec` video
    /// track, create the local answer and wait for candidate gathering.
    /// Returns the answer SDP.
    async fn answer(&self, offer: &Offer, codec: VideoCodec) -> Result<String, CastError>;

    /// Push one encoded chunk on the outbound video path.
    async fn write_chunk(&self, chunk: &EncodedChunk) -> Result<(), CastError>;

    /// Release the session. Idempotent.
    async fn close(&self) -> Result<(), CastError>;
}

// ── NegotiatorConfig ─────────────────────────────────────────────

/// Configuration for [`SessionNegotiator`].
#[derive(Debug, Clone)]
pub struct NegotiatorConfig {
    /// STUN server URL (`stun:host:port`). Empty disables STUN.
    pub stun_server: String,
    /// Ceiling on candidate gathering while producing an answer.
    pub gather_timeout: Duration,
}

impl Default for NegotiatorConfig {
    fn default() -> Self {
        Self {
            stun_server: DEFAULT_STUN_SERVER.to_string(),
            gather_timeout: DEFAULT_GATHER_TIMEOUT,
        }
    }
}

// ── SessionNegotiator ────────────────────────────────────────────

/// Turns remote offers into live sessions.
pub struct SessionNegotiator {
    substrate: Arc<dyn PeerSubstrate>,
    encoders: Arc<dyn EncoderFactory>,
    gather_timeout: Duration,
}

impl SessionNegotiator {
    pub fn new(
        substrate: Arc<dyn PeerSubstrate>,
        encoders: Arc<dyn EncoderFactory>,
        config: &NegotiatorConfig,
    ) -> Self {
        Self {
            substrate,
            encoders,
            gather_timeout: config.gather_timeout,
        }
    }

    /// Negotiator backed by the WebRTC substrate.
    pub fn webrtc(config: &NegotiatorConfig, encoders: Arc<dyn EncoderFactory>) -> Result<Self, CastError> {
        let substrate = RtcSubstrate::new(&config.stun_server)?;
        Ok(Self::new(Arc::new(substrate), encoders, config))
    }

    /// Allocate a session bound to `screen` at `frame_rate`.
    ///
    /// No offer is processed yet. Fails with [`CastError::SessionInit`]
    /// if the transport cannot allocate a session.
    pub async fn create_session(&self, screen: Screen, frame_rate: u32) -> Result<SessionHandle, CastError> {
        if frame_rate == 0 {
            return Err(CastError::SessionInit("frame rate must be at least 1".into()));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = self.substrate.open(events_tx).await?;
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let (state, _) = watch::channel(SessionState::Idle);

        info!(session = id, screen = screen.index, frame_rate, "session created");

        Ok(SessionHandle {
            id,
            screen,
            frame_rate,
            transport,
            encoders: Arc::clone(&self.encoders),
            gather_timeout: self.gather_timeout,
            state: Arc::new(state),
            events: Some(events_rx),
            answer: None,
            codec: None,
        })
    }
}

// ── SessionHandle ────────────────────────────────────────────────

/// A transport session pre-bound to one screen and frame rate.
///
/// The handle is the only writer of the session state during
/// negotiation; afterwards [`SessionEvents`] takes over.
pub struct SessionHandle {
    id: u64,
    screen: Screen,
    frame_rate: u32,
    transport: Arc<dyn PeerTransport>,
    encoders: Arc<dyn EncoderFactory>,
    gather_timeout: Duration,
    state: Arc<watch::Sender<SessionState>>,
    events: Option<mpsc::UnboundedReceiver<PeerState>>,
    answer: Option<String>,
    codec: Option<VideoCodec>,
}

impl SessionHandle {
    /// Consume the remote offer and produce the answer.
    ///
    /// Returns once candidate gathering has settled; connectivity is
    /// reported later through [`SessionEvents`]. May be called exactly
    /// once: a second call fails with [`CastError::InvalidState`] and
    /// leaves the first answer untouched. Any other failure moves the
    /// session to `Failed` and releases the transport.
    pub async fn process_offer(&mut self, payload: &str) -> Result<String, CastError> {
        self.transition(SessionState::receive_offer)?;

        match self.negotiate(payload).await {
            Ok((answer, codec)) => {
                self.transition(SessionState::produce_answer)?;
                info!(session = self.id, %codec, "answer produced");
                self.codec = Some(codec);
                Ok(self.answer.insert(answer).clone())
            }
            Err(e) => {
                warn!(session = self.id, "offer processing failed: {e}");
                self.state.send_modify(SessionState::fail);
                if let Err(close_err) = self.transport.close().await {
                    debug!(session = self.id, "transport close after failure: {close_err}");
                }
                Err(e)
            }
        }
    }

    async fn negotiate(&self, payload: &str) -> Result<(String, VideoCodec), CastError> {
        let offer = Offer::parse(payload)?;
        let offered = offer.video_codecs();
        let codec = match self.encoders.negotiable(&offered).first() {
            Some(codec) => *codec,
            None => {
                return Err(match offered.first() {
                    Some(codec) => CastError::UnsupportedCodec(*codec),
                    None => CastError::InvalidOffer("offer carries no known video codec".into()),
                });
            }
        };
        debug!(session = self.id, ?offered, %codec, "codec selected");

        let sdp = tokio::time::timeout(self.gather_timeout, self.transport.answer(&offer, codec))
            .await
            .map_err(|_| {
                CastError::SessionInit(format!(
                    "candidate gathering did not settle within {:?}",
                    self.gather_timeout
                ))
            })??;

        Ok((offer.encode_answer(&sdp)?, codec))
    }

    fn transition(
        &self,
        step: impl FnOnce(&mut SessionState) -> Result<(), CastError>,
    ) -> Result<(), CastError> {
        let mut result = Ok(());
        self.state.send_if_modified(|state| {
            result = step(state);
            result.is_ok()
        });
        result
    }

    /// Take the single consumer of lifecycle notifications.
    ///
    /// Returns `None` once taken: at most one streaming session may be
    /// bound to a session.
    pub fn take_events(&mut self) -> Option<SessionEvents> {
        let rx = self.events.take()?;
        Some(SessionEvents {
            session: self.id,
            rx,
            state: Arc::clone(&self.state),
            finished: false,
        })
    }

    /// Release the transport and mark the session closed.
    pub async fn close(&self) -> Result<(), CastError> {
        self.state.send_modify(SessionState::close);
        self.transport.close().await
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    /// Current negotiation state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observe state changes without consuming events.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// The answer, once produced.
    pub fn answer(&self) -> Option<&str> {
        self.answer.as_deref()
    }

    /// Negotiated video codec, once an answer has been produced.
    pub fn codec(&self) -> Option<VideoCodec> {
        self.codec
    }

    pub fn transport(&self) -> Arc<dyn PeerTransport> {
        Arc::clone(&self.transport)
    }
}

// ── SessionEvents ────────────────────────────────────────────────

/// Single consumer of a session's transport notifications.
pub struct SessionEvents {
    session: u64,
    rx: mpsc::UnboundedReceiver<PeerState>,
    state: Arc<watch::Sender<SessionState>>,
    finished: bool,
}

impl SessionEvents {
    /// Next lifecycle notification.
    ///
    /// If the substrate goes away without reporting a terminal state,
    /// a single `Closed` is synthesised. Returns `None` afterwards.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        if self.finished {
            return None;
        }

        while let Some(peer) = self.rx.recv().await {
            if let Some(event) = self.fold(peer) {
                return Some(event);
            }
        }
        self.finish()
    }

    /// Like [`next`](Self::next), but only looks at notifications that
    /// have already arrived. Never waits.
    pub fn try_next(&mut self) -> Option<SessionEvent> {
        if self.finished {
            return None;
        }

        loop {
            match self.rx.try_recv() {
                Ok(peer) => {
                    if let Some(event) = self.fold(peer) {
                        return Some(event);
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => return None,
                Err(mpsc::error::TryRecvError::Disconnected) => return self.finish(),
            }
        }
    }

    fn fold(&mut self, peer: PeerState) -> Option<SessionEvent> {
        let mut event = None;
        self.state.send_if_modified(|state| {
            let before = *state;
            event = state.apply(peer);
            *state != before
        });

        match event {
            Some(event) => info!(session = self.session, ?event, "session event"),
            None => debug!(session = self.session, ?peer, "peer state ignored"),
        }
        event
    }

    fn finish(&mut self) -> Option<SessionEvent> {
        self.finished = true;
        let mut closed = false;
        self.state.send_if_modified(|state| {
            closed = !state.is_terminal();
            state.close();
            closed
        });
        closed.then_some(SessionEvent::Closed)
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }
}

// ── Tests ────────────────────────────────────────────────────────
