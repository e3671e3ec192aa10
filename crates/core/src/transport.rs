//! The platform media-stack seam.
//!
//! A browser hands out `RTCPeerConnection` and `getUserMedia` for free; a
//! native implementation needs an equivalent layer. These traits are that
//! layer: [`crate::session::VoiceSession`] orchestrates against them, the
//! `realtime-webrtc` crate implements them over webrtc-rs and cpal, and unit
//! tests substitute them.

use crate::{error::VoiceError, protocol::ClientEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Connection lifecycle states reported by the underlying transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerState {
    /// States that must trigger a full session teardown.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PeerState::Disconnected | PeerState::Failed | PeerState::Closed
        )
    }
}

/// Events surfaced by a live peer connection.
#[derive(Debug)]
pub enum PeerEvent {
    /// The control channel finished opening.
    ChannelOpen,
    /// A raw payload arrived on the control channel.
    ChannelMessage(String),
    /// A remote media track arrived and was attached to the playback sink.
    RemoteTrack { id: String },
    /// The transport-level connection state changed.
    StateChanged(PeerState),
}

/// Factory for peer connections and local media.
#[async_trait]
pub trait MediaStack: Send + Sync {
    /// Creates a fresh peer connection. Lifecycle events flow through
    /// `events`; remote audio is attached to the stack's playback sink as
    /// soon as the track arrives.
    async fn create_peer(
        &self,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Arc<dyn PeerHandle>, VoiceError>;

    /// Opens the microphone and returns one local track per captured input.
    ///
    /// Fails with [`VoiceError::Permission`] when access is denied or no
    /// input device exists.
    async fn capture_microphone(&self) -> Result<Vec<Arc<dyn LocalTrack>>, VoiceError>;
}

/// One live peer connection.
#[async_trait]
pub trait PeerHandle: Send + Sync {
    /// Attaches a captured local track to the connection.
    async fn add_track(&self, track: Arc<dyn LocalTrack>) -> Result<(), VoiceError>;

    /// Creates the control channel. Must happen before
    /// [`create_offer`](PeerHandle::create_offer) so the channel is
    /// negotiated within the offer.
    async fn create_control_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn ControlChannel>, VoiceError>;

    /// Generates the session offer, commits it as the local description and
    /// returns its SDP payload.
    async fn create_offer(&self) -> Result<String, VoiceError>;

    /// Commits the remote answer as the remote description.
    async fn apply_answer(&self, sdp: &str) -> Result<(), VoiceError>;

    /// Closes the connection. Safe to call on an already-closed peer.
    async fn close(&self) -> Result<(), VoiceError>;
}

/// The ordered message side-channel carried alongside the media transport.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    async fn send_event(&self, event: &ClientEvent) -> Result<(), VoiceError>;

    /// Closes the channel. Safe to call on an already-closed channel.
    async fn close(&self) -> Result<(), VoiceError>;
}

/// A captured local media track.
pub trait LocalTrack: Send + Sync {
    /// Identifier for diagnostics.
    fn id(&self) -> &str;

    /// Stops capture and releases the device. Idempotent.
    fn stop(&self);
}

/// Where remote audio ends up.
pub trait PlaybackSink: Send + Sync {
    /// Detaches the current source and silences output. Idempotent.
    fn clear(&self);
}
