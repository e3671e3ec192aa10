//! The webrtc-rs implementation of the core media-stack seam.
//!
//! One stack owns one playback sink and can mint any number of peers over
//! its lifetime (the session only ever holds one at a time). The media
//! engine registers PCMU alone, so negotiation cannot select a codec the
//! capture and playback pipelines cannot feed.

use crate::{capture, codec, playback::CpalPlayback};
use async_trait::async_trait;
use mentor_core::{
    error::VoiceError,
    transport::{
        ControlChannel, LocalTrack, MediaStack, PeerEvent, PeerHandle, PeerState,
    },
};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::sync::mpsc;
use tracing::debug;
use webrtc::{
    api::{
        APIBuilder,
        interceptor_registry::register_default_interceptors,
        media_engine::{MIME_TYPE_PCMU, MediaEngine},
    },
    data_channel::{RTCDataChannel, data_channel_message::DataChannelMessage},
    ice_transport::ice_server::RTCIceServer,
    interceptor::registry::Registry,
    peer_connection::{
        RTCPeerConnection, configuration::RTCConfiguration,
        peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription,
    },
    rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType},
    track::{
        track_local::{TrackLocal, track_local_static_sample::TrackLocalStaticSample},
        track_remote::TrackRemote,
    },
};

type PendingTracks = Arc<Mutex<HashMap<String, Arc<TrackLocalStaticSample>>>>;

#[derive(Debug, Clone)]
pub struct StackConfig {
    /// ICE servers handed to every peer connection.
    pub ice_servers: Vec<String>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_owned()],
        }
    }
}

pub struct WebRtcStack {
    config: StackConfig,
    playback: Arc<CpalPlayback>,
    pending_tracks: PendingTracks,
    track_seq: AtomicU64,
}

impl WebRtcStack {
    /// Opens the audio devices and returns a ready stack.
    pub fn new(config: StackConfig) -> Result<Arc<Self>, VoiceError> {
        let playback = CpalPlayback::new()?;
        Ok(Arc::new(Self {
            config,
            playback,
            pending_tracks: Arc::new(Mutex::new(HashMap::new())),
            track_seq: AtomicU64::new(0),
        }))
    }

    /// The sink remote audio plays through; hand this to the session so
    /// teardown can silence it.
    pub fn playback(&self) -> Arc<CpalPlayback> {
        self.playback.clone()
    }
}

fn pcmu_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_PCMU.to_owned(),
        clock_rate: codec::SAMPLE_RATE,
        channels: 1,
        sdp_fmtp_line: String::new(),
        rtcp_feedback: vec![],
    }
}

fn build_api() -> anyhow::Result<webrtc::api::API> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: pcmu_capability(),
            payload_type: codec::PAYLOAD_TYPE,
            ..Default::default()
        },
        RTPCodecType::Audio,
    )?;
    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;
    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

fn transport_err(context: &'static str) -> impl Fn(webrtc::Error) -> VoiceError {
    move |e| VoiceError::Transport(format!("{context}: {e}"))
}

fn map_state(state: RTCPeerConnectionState) -> PeerState {
    match state {
        RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => PeerState::New,
        RTCPeerConnectionState::Connecting => PeerState::Connecting,
        RTCPeerConnectionState::Connected => PeerState::Connected,
        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
        RTCPeerConnectionState::Failed => PeerState::Failed,
        RTCPeerConnectionState::Closed => PeerState::Closed,
    }
}

#[async_trait]
impl MediaStack for WebRtcStack {
    async fn create_peer(
        &self,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Arc<dyn PeerHandle>, VoiceError> {
        let api = build_api()
            .map_err(|e| VoiceError::Transport(format!("media engine setup failed: {e}")))?;
        let rtc_config = RTCConfiguration {
            ice_servers: self
                .config
                .ice_servers
                .iter()
                .map(|url| RTCIceServer {
                    urls: vec![url.clone()],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(transport_err("peer connection setup failed"))?,
        );

        let state_tx = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let tx = state_tx.clone();
            Box::pin(async move {
                let _ = tx.send(PeerEvent::StateChanged(map_state(state))).await;
            })
        }));

        let playback = self.playback.clone();
        let track_tx = events.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let playback = playback.clone();
            let tx = track_tx.clone();
            Box::pin(async move {
                let id = track.id();
                let _ = tx.send(PeerEvent::RemoteTrack { id }).await;
                play_remote_track(track, playback).await;
            })
        }));

        Ok(Arc::new(WebRtcPeer {
            pc,
            pending_tracks: self.pending_tracks.clone(),
            events,
        }))
    }

    async fn capture_microphone(&self) -> Result<Vec<Arc<dyn LocalTrack>>, VoiceError> {
        let seq = self.track_seq.fetch_add(1, Ordering::SeqCst);
        let id = format!("microphone-{seq}");
        let rtc_track = Arc::new(TrackLocalStaticSample::new(
            pcmu_capability(),
            id.clone(),
            "mentor-voice".to_owned(),
        ));
        let track = capture::start_capture(id.clone(), rtc_track.clone()).await?;
        self.pending_tracks.lock().unwrap().insert(id, rtc_track);
        Ok(vec![Arc::new(track) as Arc<dyn LocalTrack>])
    }
}

/// Reads remote RTP until the track ends, feeding decoded audio to the sink.
async fn play_remote_track(track: Arc<TrackRemote>, playback: Arc<CpalPlayback>) {
    loop {
        match track.read_rtp().await {
            Ok((packet, _)) => {
                if packet.payload.is_empty() {
                    continue;
                }
                playback.push(&codec::decode_ulaw_slice(&packet.payload));
            }
            Err(e) => {
                debug!(error = %e, "remote track ended");
                break;
            }
        }
    }
}

struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    pending_tracks: PendingTracks,
    events: mpsc::Sender<PeerEvent>,
}

#[async_trait]
impl PeerHandle for WebRtcPeer {
    async fn add_track(&self, track: Arc<dyn LocalTrack>) -> Result<(), VoiceError> {
        let rtc_track = self
            .pending_tracks
            .lock()
            .unwrap()
            .remove(track.id())
            .ok_or_else(|| {
                VoiceError::Transport(format!("unknown local track '{}'", track.id()))
            })?;
        self.pc
            .add_track(rtc_track as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(transport_err("could not attach local track"))?;
        Ok(())
    }

    async fn create_control_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn ControlChannel>, VoiceError> {
        let dc = self
            .pc
            .create_data_channel(label, None)
            .await
            .map_err(transport_err("could not create control channel"))?;

        let open_tx = self.events.clone();
        dc.on_open(Box::new(move || {
            let tx = open_tx.clone();
            Box::pin(async move {
                let _ = tx.send(PeerEvent::ChannelOpen).await;
            })
        }));

        let message_tx = self.events.clone();
        dc.on_message(Box::new(move |message: DataChannelMessage| {
            let tx = message_tx.clone();
            Box::pin(async move {
                let payload = String::from_utf8_lossy(&message.data).into_owned();
                let _ = tx.send(PeerEvent::ChannelMessage(payload)).await;
            })
        }));

        Ok(Arc::new(WebRtcControlChannel { dc }))
    }

    async fn create_offer(&self) -> Result<String, VoiceError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(transport_err("could not create offer"))?;
        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(transport_err("could not set local description"))?;
        // The signaling exchange is one round-trip with no trickle path, so
        // the offer must carry every ICE candidate.
        let _ = gather_complete.recv().await;
        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| VoiceError::Transport("local description missing after offer".into()))?;
        Ok(local.sdp)
    }

    async fn apply_answer(&self, sdp: &str) -> Result<(), VoiceError> {
        let answer = RTCSessionDescription::answer(sdp.to_owned())
            .map_err(transport_err("malformed answer"))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(transport_err("could not set remote description"))
    }

    async fn close(&self) -> Result<(), VoiceError> {
        self.pc
            .close()
            .await
            .map_err(transport_err("peer close failed"))
    }
}

struct WebRtcControlChannel {
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl ControlChannel for WebRtcControlChannel {
    async fn send_event(
        &self,
        event: &mentor_core::protocol::ClientEvent,
    ) -> Result<(), VoiceError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| VoiceError::Transport(format!("unserializable control event: {e}")))?;
        self.dc
            .send_text(payload)
            .await
            .map_err(transport_err("control channel send failed"))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), VoiceError> {
        self.dc
            .close()
            .await
            .map_err(transport_err("control channel close failed"))
    }
}
