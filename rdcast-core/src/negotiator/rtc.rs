//! WebRTC transport substrate.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::encoder::{EncodedChunk, VideoCodec};
use crate::error::CastError;
use crate::negotiator::{Offer, PeerState, PeerSubstrate, PeerTransport};

impl From<RTCPeerConnectionState> for PeerState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => PeerState::New,
            RTCPeerConnectionState::Connecting => PeerState::Connecting,
            RTCPeerConnectionState::Connected => PeerState::Connected,
            RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
            RTCPeerConnectionState::Failed => PeerState::Failed,
            RTCPeerConnectionState::Closed => PeerState::Closed,
        }
    }
}

/// Builds peer connections with the default codecs and interceptors.
pub struct RtcSubstrate {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl RtcSubstrate {
    /// `stun_server` may be empty, in which case only host candidates
    /// are gathered.
    pub fn new(stun_server: &str) -> Result<Self, CastError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| CastError::SessionInit(format!("register codecs: {e}")))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| CastError::SessionInit(format!("register interceptors: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if stun_server.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: vec![stun_server.to_string()],
                ..Default::default()
            }]
        };

        Ok(Self { api, ice_servers })
    }
}

#[async_trait]
impl PeerSubstrate for RtcSubstrate {
    async fn open(
        &self,
        events: mpsc::UnboundedSender<PeerState>,
    ) -> Result<Arc<dyn PeerTransport>, CastError> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let pc = self
            .api
            .new_peer_connection(config)
            .await
            .map_err(|e| CastError::SessionInit(format!("create peer connection: {e}")))?;

        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            debug!(%state, "peer connection state changed");
            // The receiver is gone once the session has been torn down.
            let _ = events.send(PeerState::from(state));
            Box::pin(async {})
        }));

        Ok(Arc::new(RtcPeer {
            pc: Arc::new(pc),
            track: OnceLock::new(),
        }))
    }
}

struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
    track: OnceLock<Arc<TrackLocalStaticSample>>,
}

#[async_trait]
impl PeerTransport for RtcPeer {
    async fn answer(&self, offer: &Offer, codec: VideoCodec) -> Result<String, CastError> {
        if self.track.get().is_some() {
            return Err(CastError::InvalidState("answer already produced"));
        }

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: codec.mime_type().to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            "rdcast".to_owned(),
        ));
        let sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| CastError::SessionInit(format!("add video track: {e}")))?;
        self.track
            .set(track)
            .map_err(|_| CastError::InvalidState("answer already produced"))?;

        // Inbound RTCP must be drained for the interceptors (NACK, reports) to run.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
            trace!("rtcp reader finished");
        });

        let remote = RTCSessionDescription::offer(offer.sdp.clone())
            .map_err(|e| CastError::InvalidOffer(e.to_string()))?;
        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|e| CastError::InvalidOffer(format!("remote description rejected: {e}")))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| CastError::SessionInit(format!("create answer: {e}")))?;

        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| CastError::SessionInit(format!("set local description: {e}")))?;
        let _ = gathered.recv().await;
        debug!("candidate gathering complete");

        self.pc
            .local_description()
            .await
            .map(|description| description.sdp)
            .ok_or_else(|| CastError::SessionInit("no local description after gathering".into()))
    }

    async fn write_chunk(&self, chunk: &EncodedChunk) -> Result<(), CastError> {
        let track = self
            .track
            .get()
            .ok_or(CastError::InvalidState("no video track negotiated"))?;
        track
            .write_sample(&Sample {
                data: chunk.data.clone(),
                duration: chunk.duration,
                ..Default::default()
            })
            .await
            .map_err(|e| CastError::TransportFailed(format!("write sample: {e}")))
    }

    async fn close(&self) -> Result<(), CastError> {
        self.pc
            .close()
            .await
            .map_err(|e| CastError::TransportFailed(format!("close peer connection: {e}")))
    }
}
