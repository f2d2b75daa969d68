//! Shared fakes for the integration tests: a counting screen backend,
//! a scriptable encoder factory and an in-memory transport substrate.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use rdcast_core::{
    CastError, EncodedChunk, EncoderFactory, FrameEncoder, FrameSize, Grabber, NegotiatorConfig,
    Offer, PeerState, PeerSubstrate, PeerTransport, PixelFormat, RawFrame, Rect, Screen,
    ScreenBackend, SessionNegotiator, VideoCodec,
};
use tokio::sync::mpsc;

pub const OFFER_SDP: &str = "v=0\r\n\
o=- 7614219274584779017 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 102 96\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=recvonly\r\n\
a=rtpmap:102 H264/90000\r\n\
a=rtpmap:96 VP8/90000\r\n";

pub const VP8_ONLY_OFFER_SDP: &str = "v=0\r\n\
o=- 1 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
a=rtpmap:96 VP8/90000\r\n";

pub const ANSWER_SDP: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=video 9 UDP/TLS/RTP/SAVPF 102\r\n";

pub fn full_hd() -> Screen {
    Screen {
        index: 0,
        bounds: Rect::new(0, 0, 1920, 1080),
    }
}

// ── Screen backend ───────────────────────────────────────────────

/// Backend whose frames carry their grab number instead of pixels.
#[derive(Clone, Default)]
pub struct CountingScreens {
    pub grabs: Arc<AtomicUsize>,
}

impl CountingScreens {
    pub fn grabs(&self) -> usize {
        self.grabs.load(Ordering::SeqCst)
    }
}

struct CountingGrabber {
    grabs: Arc<AtomicUsize>,
    bounds: Rect,
}

impl ScreenBackend for CountingScreens {
    fn displays(&self) -> Result<Vec<Rect>, CastError> {
        Ok(vec![full_hd().bounds])
    }

    fn open(&self, screen: &Screen) -> Result<Box<dyn Grabber>, CastError> {
        Ok(Box::new(CountingGrabber {
            grabs: Arc::clone(&self.grabs),
            bounds: screen.bounds,
        }))
    }
}

impl Grabber for CountingGrabber {
    fn grab(&mut self) -> Result<Option<RawFrame>, CastError> {
        let n = self.grabs.fetch_add(1, Ordering::SeqCst) as u64;
        Ok(Some(RawFrame {
            width: self.bounds.width,
            height: self.bounds.height,
            stride: self.bounds.width * 4,
            format: PixelFormat::Bgra8,
            // Pixel payload elided; the fake encoder only needs ordering.
            data: n.to_le_bytes().to_vec(),
            timestamp: Instant::now(),
        }))
    }
}

// ── Encoder factory ──────────────────────────────────────────────

/// Factory supporting a fixed codec set. Its encoders echo the grab
/// number, can be told to fail on the n-th frame (1-based) and can be
/// slowed down per frame.
#[derive(Clone, Default)]
pub struct ScriptedEncoders {
    pub supported: Vec<VideoCodec>,
    pub fail_on: Option<u64>,
    pub encode_delay: Duration,
    pub built: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
}

impl ScriptedEncoders {
    pub fn h264() -> Self {
        Self {
            supported: vec![VideoCodec::H264],
            ..Default::default()
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn failing_on(frame: u64) -> Self {
        Self {
            fail_on: Some(frame),
            ..Self::h264()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            encode_delay: delay,
            ..Self::h264()
        }
    }

    pub fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

struct ScriptedEncoder {
    size: FrameSize,
    duration: Duration,
    fail_on: Option<u64>,
    delay: Duration,
    encoded: u64,
    closed: Arc<AtomicUsize>,
}

impl EncoderFactory for ScriptedEncoders {
    fn supports(&self, codec: VideoCodec) -> bool {
        self.supported.contains(&codec)
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
        self.built.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedEncoder {
            size,
            duration: Duration::from_secs(1) / frame_rate,
            fail_on: self.fail_on,
            delay: self.encode_delay,
            encoded: 0,
            closed: Arc::clone(&self.closed),
        }))
    }
}

impl FrameEncoder for ScriptedEncoder {
    fn encode(&mut self, frame: RawFrame) -> Result<EncodedChunk, CastError> {
        self.size.check(&frame)?;
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.encoded += 1;
        if self.fail_on == Some(self.encoded) {
            return Err(CastError::Encode(format!("scripted failure on frame {}", self.encoded)));
        }
        Ok(EncodedChunk {
            sequence: self.encoded - 1,
            timestamp: frame.timestamp,
            duration: self.duration,
            data: Bytes::from(frame.data),
        })
    }

    fn close(self: Box<Self>) -> Result<(), CastError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Grab number carried by a chunk produced from a [`CountingScreens`] frame.
pub fn grab_number(chunk: &EncodedChunk) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&chunk.data[..8]);
    u64::from_le_bytes(raw)
}

// ── Transport substrate ──────────────────────────────────────────

/// In-memory substrate. Tests drive connectivity with [`emit`](Self::emit).
#[derive(Default)]
pub struct LoopbackSubstrate {
    pub transport: Arc<RecordingTransport>,
    pub fail_open: bool,
    events: Mutex<Option<mpsc::UnboundedSender<PeerState>>>,
}

impl LoopbackSubstrate {
    /// Substrate that cannot allocate sessions.
    pub fn unreachable() -> Self {
        Self {
            fail_open: true,
            ..Default::default()
        }
    }

    pub fn with_answer_delay(delay: Duration) -> Self {
        let substrate = Self::default();
        substrate.transport.answer_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
        substrate
    }

    /// Report a raw transport state, as the substrate's own thread would.
    pub fn emit(&self, state: PeerState) {
        let guard = self.events.lock().unwrap();
        // A session that already finished has dropped its receiver.
        let _ = guard.as_ref().expect("no session opened").send(state);
    }

    /// Drop the event sender, as a substrate that shuts down would.
    pub fn hang_up(&self) {
        self.events.lock().unwrap().take();
    }
}

#[async_trait]
impl PeerSubstrate for LoopbackSubstrate {
    async fn open(
        &self,
        events: mpsc::UnboundedSender<PeerState>,
    ) -> Result<Arc<dyn PeerTransport>, CastError> {
        if self.fail_open {
            return Err(CastError::SessionInit("stun server unreachable".into()));
        }
        *self.events.lock().unwrap() = Some(events);
        Ok(Arc::clone(&self.transport) as Arc<dyn PeerTransport>)
    }
}

#[derive(Default)]
pub struct RecordingTransport {
    pub chunks: Mutex<Vec<EncodedChunk>>,
    pub answers: AtomicUsize,
    pub closed: AtomicBool,
    pub codec: Mutex<Option<VideoCodec>>,
    answer_delay_ms: AtomicU64,
}

impl RecordingTransport {
    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerTransport for RecordingTransport {
    async fn answer(&self, _offer: &Offer, codec: VideoCodec) -> Result<String, CastError> {
        self.answers.fetch_add(1, Ordering::SeqCst);
        *self.codec.lock().unwrap() = Some(codec);
        let delay = self.answer_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(ANSWER_SDP.to_string())
    }

    async fn write_chunk(&self, chunk: &EncodedChunk) -> Result<(), CastError> {
        if self.is_closed() {
            return Err(CastError::TransportFailed("write after close".into()));
        }
        self.chunks.lock().unwrap().push(chunk.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), CastError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ── Wiring ───────────────────────────────────────────────────────

pub fn negotiator(
    substrate: &Arc<LoopbackSubstrate>,
    encoders: &ScriptedEncoders,
    gather_timeout: Duration,
) -> SessionNegotiator {
    let config = NegotiatorConfig {
        stun_server: String::new(),
        gather_timeout,
    };
    SessionNegotiator::new(
        Arc::clone(substrate) as Arc<dyn PeerSubstrate>,
        Arc::new(encoders.clone()),
        &config,
    )
}
