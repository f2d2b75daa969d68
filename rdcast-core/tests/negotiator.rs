//! Negotiation scenarios: offer handling, state machine and the real
//! WebRTC substrate.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::{LoopbackSubstrate, OFFER_SDP, ScriptedEncoders, VP8_ONLY_OFFER_SDP, full_hd};
use rdcast_core::{
    CastError, NegotiatorConfig, PeerState, SessionEvent, SessionNegotiator, SessionState,
    VideoCodec,
};

const GATHER: Duration = Duration::from_secs(2);

#[tokio::test]
async fn second_offer_is_rejected_and_answer_kept() {
    let substrate = Arc::new(LoopbackSubstrate::default());
    let negotiator = common::negotiator(&substrate, &ScriptedEncoders::h264(), GATHER);
    let mut handle = negotiator.create_session(full_hd(), 24).await.unwrap();
    assert_eq!(handle.state(), SessionState::Idle);

    let first = handle.process_offer(OFFER_SDP).await.unwrap();
    assert_eq!(handle.state(), SessionState::AnswerProduced);
    assert_eq!(handle.codec(), Some(VideoCodec::H264));

    let second = handle.process_offer(OFFER_SDP).await;
    assert!(matches!(second, Err(CastError::InvalidState(_))));
    assert_eq!(handle.answer(), Some(first.as_str()));
    assert_eq!(handle.state(), SessionState::AnswerProduced);
    assert_eq!(substrate.transport.answers.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn malformed_offer_fails_session() {
    let substrate = Arc::new(LoopbackSubstrate::default());
    let negotiator = common::negotiator(&substrate, &ScriptedEncoders::h264(), GATHER);
    let mut handle = negotiator.create_session(full_hd(), 24).await.unwrap();

    let err = handle.process_offer("{\"type\":\"offer\",\"sdp\":\"hello\"}").await.unwrap_err();
    assert!(matches!(err, CastError::InvalidOffer(_)));
    assert_eq!(handle.state(), SessionState::Failed);
    assert_eq!(handle.answer(), None);
    assert!(substrate.transport.is_closed());

    // The session is spent.
    assert!(matches!(
        handle.process_offer(OFFER_SDP).await,
        Err(CastError::InvalidState(_))
    ));
}

#[tokio::test]
async fn slow_gathering_is_session_init_error() {
    let substrate = Arc::new(LoopbackSubstrate::with_answer_delay(Duration::from_millis(500)));
    let negotiator = common::negotiator(&substrate, &ScriptedEncoders::h264(), Duration::from_millis(50));
    let mut handle = negotiator.create_session(full_hd(), 24).await.unwrap();

    let started = tokio::time::Instant::now();
    let err = handle.process_offer(OFFER_SDP).await.unwrap_err();
    assert!(matches!(err, CastError::SessionInit(_)), "got {err}");
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(handle.state(), SessionState::Failed);
}

#[tokio::test]
async fn codec_follows_remote_preference() {
    let substrate = Arc::new(LoopbackSubstrate::default());
    let encoders = ScriptedEncoders {
        supported: vec![VideoCodec::H264, VideoCodec::Vp8],
        ..Default::default()
    };
    let negotiator = common::negotiator(&substrate, &encoders, GATHER);
    let mut handle = negotiator.create_session(full_hd(), 24).await.unwrap();
    handle.process_offer(VP8_ONLY_OFFER_SDP).await.unwrap();

    assert_eq!(handle.codec(), Some(VideoCodec::Vp8));
    assert_eq!(*substrate.transport.codec.lock().unwrap(), Some(VideoCodec::Vp8));
}

#[tokio::test]
async fn answer_uses_offer_envelope() {
    let substrate = Arc::new(LoopbackSubstrate::default());
    let negotiator = common::negotiator(&substrate, &ScriptedEncoders::h264(), GATHER);
    let mut handle = negotiator.create_session(full_hd(), 24).await.unwrap();

    let offer = serde_json::json!({ "type": "offer", "sdp": OFFER_SDP }).to_string();
    let answer = handle.process_offer(&STANDARD.encode(offer)).await.unwrap();

    let decoded: serde_json::Value = serde_json::from_slice(&STANDARD.decode(answer).unwrap()).unwrap();
    assert_eq!(decoded["type"], "answer");
    assert!(decoded["sdp"].as_str().unwrap().starts_with("v=0"));
}

#[tokio::test]
async fn open_failure_is_session_init_error() {
    let substrate = Arc::new(LoopbackSubstrate::unreachable());
    let negotiator = common::negotiator(&substrate, &ScriptedEncoders::h264(), GATHER);

    let err = negotiator.create_session(full_hd(), 24).await.err().unwrap();
    assert!(matches!(err, CastError::SessionInit(_)));

    let substrate = Arc::new(LoopbackSubstrate::default());
    let negotiator = common::negotiator(&substrate, &ScriptedEncoders::h264(), GATHER);
    assert!(negotiator.create_session(full_hd(), 0).await.is_err());
}

#[tokio::test]
async fn lifecycle_events_are_delivered_once() {
    let substrate = Arc::new(LoopbackSubstrate::default());
    let negotiator = common::negotiator(&substrate, &ScriptedEncoders::h264(), GATHER);
    let mut handle = negotiator.create_session(full_hd(), 24).await.unwrap();
    handle.process_offer(OFFER_SDP).await.unwrap();

    let mut events = handle.take_events().unwrap();
    assert!(handle.take_events().is_none());
    let mut state = handle.subscribe_state();

    for peer in [
        PeerState::Connecting,
        PeerState::Connected,
        PeerState::Connected,
        PeerState::Disconnected,
        PeerState::Failed,
        PeerState::Closed,
    ] {
        substrate.emit(peer);
    }
    substrate.hang_up();

    let mut seen = Vec::new();
    while let Some(event) = tokio::time::timeout(Duration::from_secs(1), events.next())
        .await
        .expect("timeout")
    {
        seen.push(event);
    }
    assert_eq!(seen, vec![SessionEvent::Connected, SessionEvent::Failed]);
    assert_eq!(*state.borrow_and_update(), SessionState::Failed);
    assert_eq!(handle.state(), SessionState::Failed);
}

// ── Real substrate ───────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn webrtc_answers_a_browser_style_offer() {
    use webrtc::api::APIBuilder;
    use webrtc::api::media_engine::MediaEngine;
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
    use webrtc::track::track_local::TrackLocal;
    use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

    // Remote party: a plain peer connection offering H.264 video.
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs().unwrap();
    let api = APIBuilder::new().with_media_engine(media_engine).build();
    let remote = api.new_peer_connection(Default::default()).await.unwrap();
    let track = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: "video/H264".to_owned(),
            ..Default::default()
        },
        "video".to_owned(),
        "remote".to_owned(),
    ));
    remote
        .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
        .await
        .unwrap();
    let offer = remote.create_offer(None).await.unwrap();
    let mut gathered = remote.gathering_complete_promise().await;
    remote.set_local_description(offer).await.unwrap();
    let _ = gathered.recv().await;
    let offer_sdp = remote.local_description().await.unwrap().sdp;

    let config = NegotiatorConfig {
        stun_server: String::new(),
        gather_timeout: Duration::from_secs(10),
    };
    let negotiator = SessionNegotiator::webrtc(&config, Arc::new(ScriptedEncoders::h264())).unwrap();
    let mut handle = negotiator.create_session(full_hd(), 24).await.unwrap();

    let payload = serde_json::json!({ "type": "offer", "sdp": offer_sdp }).to_string();
    let answer = handle.process_offer(&payload).await.unwrap();
    let answer: serde_json::Value = serde_json::from_str(&answer).unwrap();
    let sdp = answer["sdp"].as_str().unwrap();

    assert_eq!(answer["type"], "answer");
    assert!(sdp.starts_with("v=0"));
    assert!(sdp.contains("m=video"));
    assert!(sdp.contains("H264"));

    handle.close().await.unwrap();
    remote.close().await.unwrap();
}
