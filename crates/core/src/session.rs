//! The voice session lifecycle.
//!
//! [`VoiceSession`] orchestrates the full handshake required to start a
//! bidirectional audio conversation with the remote tutor endpoint, and
//! guarantees resources are released on every termination path: explicit
//! disconnect, failed connect, or a transport that drops out from under a
//! live session. All three funnel through the same best-effort teardown, so
//! the microphone and the peer connection can never be left half-open.

use crate::{
    CONTROL_CHANNEL_LABEL,
    credential::CredentialProvider,
    error::VoiceError,
    protocol::{ClientEvent, ConversationItem, ResponseSpec, ServerEvent},
    signaling::SignalingClient,
    transport::{ControlChannel, LocalTrack, MediaStack, PeerEvent, PeerHandle, PlaybackSink},
};
use std::sync::Arc;
use tokio::{
    sync::{Mutex, broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

/// Lifecycle state of a [`VoiceSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Connected,
}

/// A document used to prime the conversation before the user speaks.
#[derive(Debug, Clone)]
pub struct DocumentContext {
    pub title: String,
    pub body: String,
}

impl DocumentContext {
    fn as_text_block(&self) -> String {
        format!("Document: {}\n\n{}", self.title, self.body)
    }

    fn has_content(&self) -> bool {
        !self.body.trim().is_empty()
    }
}

/// Caller-supplied session parameters.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Model identifier sent to the signaling endpoint and named when
    /// priming the conversation.
    pub model: String,
    /// Whether the caller opted in to context priming.
    pub include_context: bool,
    /// The document to prime with, if any.
    pub context: Option<DocumentContext>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            model: crate::DEFAULT_REALTIME_MODEL.to_owned(),
            include_context: false,
            context: None,
        }
    }
}

impl SessionOptions {
    /// The priming text block, when the caller opted in and the document has
    /// non-empty content.
    fn priming_text(&self) -> Option<String> {
        if !self.include_context {
            return None;
        }
        self.context
            .as_ref()
            .filter(|c| c.has_content())
            .map(|c| c.as_text_block())
    }
}

/// Notifications surfaced to the session's owner.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged {
        previous: SessionState,
        current: SessionState,
    },
    /// A remote audio track arrived and is playing.
    RemoteTrack { id: String },
    /// The model finished a response turn.
    TurnComplete,
    /// The model reported a failed response turn.
    TurnError { message: String },
    /// The live transport dropped; teardown has been triggered.
    TransportLost,
}

#[derive(Default)]
struct Inner {
    state: SessionState,
    peer: Option<Arc<dyn PeerHandle>>,
    channel: Option<Arc<dyn ControlChannel>>,
    tracks: Vec<Arc<dyn LocalTrack>>,
    event_task: Option<JoinHandle<()>>,
}

struct Shared {
    inner: Mutex<Inner>,
    events: broadcast::Sender<SessionEvent>,
}

/// Orchestrates one realtime voice conversation.
///
/// At most one peer connection and one control channel exist per session at
/// any time; the session is [`SessionState::Connected`] exactly when both are
/// live and the remote description has been applied.
pub struct VoiceSession {
    options: SessionOptions,
    credentials: Arc<dyn CredentialProvider>,
    signaling: Arc<dyn SignalingClient>,
    media: Arc<dyn MediaStack>,
    playback: Arc<dyn PlaybackSink>,
    shared: Arc<Shared>,
}

impl VoiceSession {
    pub fn new(
        options: SessionOptions,
        credentials: Arc<dyn CredentialProvider>,
        signaling: Arc<dyn SignalingClient>,
        media: Arc<dyn MediaStack>,
        playback: Arc<dyn PlaybackSink>,
    ) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            options,
            credentials,
            signaling,
            media,
            playback,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                events,
            }),
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SessionState {
        self.shared.inner.lock().await.state
    }

    /// Subscribes to session notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Establishes the realtime connection.
    ///
    /// A no-op unless the session is [`SessionState::Idle`], which guards
    /// against double-connecting and double-acquiring the microphone. On any
    /// failure the session is fully torn down before the error is returned.
    /// There is no automatic retry and no mid-flight cancellation: a caller
    /// wanting out must let the attempt settle, then [`disconnect`].
    ///
    /// [`disconnect`]: VoiceSession::disconnect
    pub async fn connect(&self) -> Result<(), VoiceError> {
        {
            let mut inner = self.shared.inner.lock().await;
            if inner.state != SessionState::Idle {
                info!(state = ?inner.state, "connect ignored; session is not idle");
                return Ok(());
            }
            set_state(&mut inner, &self.shared.events, SessionState::Connecting);
        }

        match self.establish().await {
            Ok(()) => {
                let mut inner = self.shared.inner.lock().await;
                // The transport can drop while the final handshake step is
                // still in flight; Connected requires live resources.
                if inner.peer.is_none() || inner.channel.is_none() {
                    drop(inner);
                    self.disconnect().await;
                    return Err(VoiceError::Transport(
                        "connection dropped during setup".into(),
                    ));
                }
                set_state(&mut inner, &self.shared.events, SessionState::Connected);
                info!(model = %self.options.model, "voice session connected");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "voice session failed to connect");
                self.disconnect().await;
                Err(e)
            }
        }
    }

    /// Tears the session down and releases every acquired resource.
    ///
    /// Idempotent: safe to call repeatedly or on a session that never
    /// connected. Each sub-step is isolated so that one failing (a channel
    /// that is already closed, say) never prevents the others, and the
    /// session always finishes [`SessionState::Idle`].
    pub async fn disconnect(&self) {
        let task = self.shared.inner.lock().await.event_task.take();
        if let Some(task) = task {
            task.abort();
        }
        release_resources(&self.shared, self.playback.as_ref()).await;
    }

    /// The sequential handshake. Each step may fail independently; the
    /// caller owns cleanup.
    async fn establish(&self) -> Result<(), VoiceError> {
        // Mint the single-use credential for this attempt. Nothing else has
        // been acquired yet, so failure here leaves nothing to release.
        let credential = self.credentials.fetch().await?;

        // Peer construction. Remote audio routes to the playback sink as
        // soon as a track arrives; channel and transport events flow through
        // the observer task for the whole lifetime of this peer.
        let (event_tx, event_rx) = mpsc::channel(64);
        let peer = self.media.create_peer(event_tx).await?;
        {
            let mut inner = self.shared.inner.lock().await;
            inner.peer = Some(peer.clone());
            inner.event_task = Some(self.spawn_event_loop(event_rx));
        }

        // Microphone. The one step users routinely see fail.
        let tracks = self.media.capture_microphone().await?;
        self.shared.inner.lock().await.tracks = tracks.clone();
        for track in &tracks {
            peer.add_track(track.clone()).await?;
        }

        // The control channel must exist before the offer so it is
        // negotiated inside the SDP.
        let channel = peer.create_control_channel(CONTROL_CHANNEL_LABEL).await?;
        self.shared.inner.lock().await.channel = Some(channel);

        // Offer out, answer in.
        let offer = peer.create_offer().await?;
        let answer = self
            .signaling
            .exchange_offer(&credential, &self.options.model, &offer)
            .await?;
        peer.apply_answer(&answer).await?;
        Ok(())
    }

    fn spawn_event_loop(&self, mut events: mpsc::Receiver<PeerEvent>) -> JoinHandle<()> {
        let shared = self.shared.clone();
        let playback = self.playback.clone();
        let priming = self.options.priming_text();
        let model = self.options.model.clone();

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    PeerEvent::ChannelOpen => {
                        let channel = shared.inner.lock().await.channel.clone();
                        let Some(channel) = channel else {
                            warn!("control channel opened with no channel registered");
                            continue;
                        };
                        if let Some(text) = &priming {
                            prime_conversation(channel.as_ref(), &model, text).await;
                        }
                    }
                    PeerEvent::ChannelMessage(payload) => {
                        dispatch_server_event(&payload, &shared.events);
                    }
                    PeerEvent::RemoteTrack { id } => {
                        debug!(track = %id, "remote audio attached to playback");
                        let _ = shared.events.send(SessionEvent::RemoteTrack { id });
                    }
                    PeerEvent::StateChanged(state) if state.is_terminal() => {
                        let live = shared.inner.lock().await.state != SessionState::Idle;
                        if live {
                            warn!(?state, "transport dropped; tearing session down");
                            let _ = shared.events.send(SessionEvent::TransportLost);
                            release_resources(&shared, playback.as_ref()).await;
                        }
                    }
                    PeerEvent::StateChanged(state) => {
                        debug!(?state, "transport state changed");
                    }
                }
            }
            debug!("peer event loop ended");
        })
    }
}

/// Sends the context-priming burst: conversation, document item, response
/// request, back-to-back. The channel is ordered and reliable; the inbound
/// turn events are the only feedback loop, so send failures are logged and
/// never escalated.
async fn prime_conversation(channel: &dyn ControlChannel, model: &str, text: &str) {
    let burst = [
        ClientEvent::ConversationCreate {
            model: model.to_owned(),
        },
        ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(text),
        },
        ClientEvent::ResponseCreate {
            response: ResponseSpec::text_and_audio(),
        },
    ];
    for event in &burst {
        if let Err(e) = channel.send_event(event).await {
            warn!(error = %e, "failed to send context priming message");
        }
    }
}

/// Parses one inbound control-channel payload and surfaces the turn events.
/// Malformed payloads are logged and dropped; the audio path does not depend
/// on them.
fn dispatch_server_event(payload: &str, events: &broadcast::Sender<SessionEvent>) {
    match serde_json::from_str::<ServerEvent>(payload) {
        Ok(ServerEvent::ResponseDone) => {
            let _ = events.send(SessionEvent::TurnComplete);
        }
        Ok(ServerEvent::ResponseError { error }) => {
            let message = error.map(|e| e.message).unwrap_or_default();
            warn!(%message, "remote reported a failed response turn");
            let _ = events.send(SessionEvent::TurnError { message });
        }
        Ok(ServerEvent::Unknown) => {}
        Err(e) => {
            warn!(error = %e, "ignoring malformed control-channel payload");
        }
    }
}

/// Releases everything a session attempt may have acquired: local tracks,
/// control channel, peer connection, playback sink, in that order. The state
/// goes to [`SessionState::Idle`] unconditionally as the last step.
async fn release_resources(shared: &Shared, playback: &dyn PlaybackSink) {
    let (tracks, channel, peer) = {
        let mut inner = shared.inner.lock().await;
        // The event task's own teardown path lands here too; dropping the
        // stale handle means a later disconnect() will not abort a task that
        // already exited.
        let _ = inner.event_task.take();
        (
            std::mem::take(&mut inner.tracks),
            inner.channel.take(),
            inner.peer.take(),
        )
    };

    for track in &tracks {
        track.stop();
    }
    if let Some(channel) = channel {
        if let Err(e) = channel.close().await {
            debug!(error = %e, "control channel close failed");
        }
    }
    if let Some(peer) = peer {
        if let Err(e) = peer.close().await {
            debug!(error = %e, "peer close failed");
        }
    }
    playback.clear();

    let mut inner = shared.inner.lock().await;
    set_state(&mut inner, &shared.events, SessionState::Idle);
}

fn set_state(inner: &mut Inner, events: &broadcast::Sender<SessionEvent>, next: SessionState) {
    if inner.state != next {
        let previous = inner.state;
        inner.state = next;
        let _ = events.send(SessionEvent::StateChanged {
            previous,
            current: next,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{EphemeralCredential, MockCredentialProvider};
    use crate::signaling::MockSignalingClient;
    use crate::transport::PeerState;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct StubCounters {
        peers_created: AtomicUsize,
        peers_closed: AtomicUsize,
        tracks_stopped: AtomicUsize,
        channels_closed: AtomicUsize,
        playback_cleared: AtomicUsize,
        offers_created: AtomicUsize,
        answers_applied: std::sync::Mutex<Vec<String>>,
        channel_sends: std::sync::Mutex<Vec<String>>,
    }

    struct StubStack {
        counters: Arc<StubCounters>,
        event_tx: Arc<std::sync::Mutex<Option<mpsc::Sender<PeerEvent>>>>,
        fail_capture: bool,
    }

    #[async_trait]
    impl MediaStack for StubStack {
        async fn create_peer(
            &self,
            events: mpsc::Sender<PeerEvent>,
        ) -> Result<Arc<dyn PeerHandle>, VoiceError> {
            self.counters.peers_created.fetch_add(1, Ordering::SeqCst);
            *self.event_tx.lock().unwrap() = Some(events);
            Ok(Arc::new(StubPeer {
                counters: self.counters.clone(),
            }))
        }

        async fn capture_microphone(&self) -> Result<Vec<Arc<dyn LocalTrack>>, VoiceError> {
            if self.fail_capture {
                return Err(VoiceError::Permission("access denied".into()));
            }
            Ok(vec![Arc::new(StubTrack {
                counters: self.counters.clone(),
            }) as Arc<dyn LocalTrack>])
        }
    }

    struct StubPeer {
        counters: Arc<StubCounters>,
    }

    #[async_trait]
    impl PeerHandle for StubPeer {
        async fn add_track(&self, _track: Arc<dyn LocalTrack>) -> Result<(), VoiceError> {
            Ok(())
        }

        async fn create_control_channel(
            &self,
            _label: &str,
        ) -> Result<Arc<dyn ControlChannel>, VoiceError> {
            Ok(Arc::new(StubChannel {
                counters: self.counters.clone(),
            }))
        }

        async fn create_offer(&self) -> Result<String, VoiceError> {
            self.counters.offers_created.fetch_add(1, Ordering::SeqCst);
            Ok("v=0\r\no=- offer".into())
        }

        async fn apply_answer(&self, sdp: &str) -> Result<(), VoiceError> {
            self.counters
                .answers_applied
                .lock()
                .unwrap()
                .push(sdp.to_owned());
            Ok(())
        }

        async fn close(&self) -> Result<(), VoiceError> {
            self.counters.peers_closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StubChannel {
        counters: Arc<StubCounters>,
    }

    #[async_trait]
    impl ControlChannel for StubChannel {
        async fn send_event(&self, event: &ClientEvent) -> Result<(), VoiceError> {
            self.counters
                .channel_sends
                .lock()
                .unwrap()
                .push(serde_json::to_string(event).unwrap());
            Ok(())
        }

        async fn close(&self) -> Result<(), VoiceError> {
            self.counters.channels_closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StubTrack {
        counters: Arc<StubCounters>,
    }

    impl LocalTrack for StubTrack {
        fn id(&self) -> &str {
            "stub-microphone"
        }

        fn stop(&self) {
            self.counters.tracks_stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct StubPlayback {
        counters: Arc<StubCounters>,
    }

    impl PlaybackSink for StubPlayback {
        fn clear(&self) {
            self.counters
                .playback_cleared
                .fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        session: VoiceSession,
        counters: Arc<StubCounters>,
        event_tx: Arc<std::sync::Mutex<Option<mpsc::Sender<PeerEvent>>>>,
    }

    impl Harness {
        fn peer_events(&self) -> mpsc::Sender<PeerEvent> {
            self.event_tx
                .lock()
                .unwrap()
                .clone()
                .expect("no peer created yet")
        }
    }

    fn credentials_expecting(times: usize) -> Arc<MockCredentialProvider> {
        let mut mock = MockCredentialProvider::new();
        mock.expect_fetch()
            .times(times)
            .returning(|| Ok(EphemeralCredential::new("ek_test")));
        Arc::new(mock)
    }

    fn signaling_answering() -> Arc<MockSignalingClient> {
        let mut mock = MockSignalingClient::new();
        mock.expect_exchange_offer()
            .returning(|_, _, _| Ok("v=0\r\no=- answer".to_owned()));
        Arc::new(mock)
    }

    fn build_harness(
        options: SessionOptions,
        credentials: Arc<MockCredentialProvider>,
        signaling: Arc<MockSignalingClient>,
        fail_capture: bool,
    ) -> Harness {
        let counters = Arc::new(StubCounters::default());
        let event_tx = Arc::new(std::sync::Mutex::new(None));
        let stack = Arc::new(StubStack {
            counters: counters.clone(),
            event_tx: event_tx.clone(),
            fail_capture,
        });
        let playback = Arc::new(StubPlayback {
            counters: counters.clone(),
        });
        let session = VoiceSession::new(options, credentials, signaling, stack, playback);
        Harness {
            session,
            counters,
            event_tx,
        }
    }

    async fn wait_for_state(session: &VoiceSession, expected: SessionState) {
        for _ in 0..200 {
            if session.state().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session never reached {expected:?}");
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within 1s");
    }

    #[tokio::test]
    async fn teardown_is_idempotent_on_a_fresh_session() {
        let harness = build_harness(
            SessionOptions::default(),
            credentials_expecting(0),
            Arc::new(MockSignalingClient::new()),
            false,
        );

        harness.session.disconnect().await;
        harness.session.disconnect().await;

        assert_eq!(harness.session.state().await, SessionState::Idle);
        assert_eq!(harness.counters.peers_closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn connect_then_double_disconnect_releases_once() {
        let harness = build_harness(
            SessionOptions::default(),
            credentials_expecting(1),
            signaling_answering(),
            false,
        );

        harness.session.connect().await.unwrap();
        harness.session.disconnect().await;
        harness.session.disconnect().await;

        assert_eq!(harness.session.state().await, SessionState::Idle);
        assert_eq!(harness.counters.peers_closed.load(Ordering::SeqCst), 1);
        assert_eq!(harness.counters.channels_closed.load(Ordering::SeqCst), 1);
        assert_eq!(harness.counters.tracks_stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connect_while_connected_is_a_noop() {
        // The credential mock is strict: a second fetch would fail the test.
        let harness = build_harness(
            SessionOptions::default(),
            credentials_expecting(1),
            signaling_answering(),
            false,
        );

        harness.session.connect().await.unwrap();
        harness.session.connect().await.unwrap();

        assert_eq!(harness.counters.peers_created.load(Ordering::SeqCst), 1);
        assert_eq!(harness.session.state().await, SessionState::Connected);
    }

    #[tokio::test]
    async fn successful_connect_is_all_or_nothing() {
        let harness = build_harness(
            SessionOptions::default(),
            credentials_expecting(1),
            signaling_answering(),
            false,
        );
        let mut events = harness.session.subscribe();

        harness.session.connect().await.unwrap();

        assert_eq!(harness.session.state().await, SessionState::Connected);
        assert_eq!(harness.counters.peers_created.load(Ordering::SeqCst), 1);
        assert_eq!(harness.counters.offers_created.load(Ordering::SeqCst), 1);
        assert_eq!(
            harness.counters.answers_applied.lock().unwrap().as_slice(),
            ["v=0\r\no=- answer"]
        );
        // Idle -> Connecting -> Connected, in order.
        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        assert!(matches!(
            first,
            SessionEvent::StateChanged {
                previous: SessionState::Idle,
                current: SessionState::Connecting,
            }
        ));
        assert!(matches!(
            second,
            SessionEvent::StateChanged {
                previous: SessionState::Connecting,
                current: SessionState::Connected,
            }
        ));
    }

    #[tokio::test]
    async fn credential_failure_never_builds_a_peer() {
        let mut credentials = MockCredentialProvider::new();
        credentials
            .expect_fetch()
            .times(1)
            .returning(|| Err(VoiceError::Credential("backend down".into())));
        let harness = build_harness(
            SessionOptions::default(),
            Arc::new(credentials),
            Arc::new(MockSignalingClient::new()),
            false,
        );

        let err = harness.session.connect().await.unwrap_err();

        assert!(matches!(err, VoiceError::Credential(_)));
        assert_eq!(harness.counters.peers_created.load(Ordering::SeqCst), 0);
        assert_eq!(harness.session.state().await, SessionState::Idle);
    }

    #[tokio::test]
    async fn microphone_failure_surfaces_a_permission_error_and_tears_down() {
        let harness = build_harness(
            SessionOptions::default(),
            credentials_expecting(1),
            Arc::new(MockSignalingClient::new()),
            true,
        );

        let err = harness.session.connect().await.unwrap_err();

        assert!(matches!(err, VoiceError::Permission(_)));
        assert_eq!(harness.counters.peers_closed.load(Ordering::SeqCst), 1);
        assert_eq!(harness.session.state().await, SessionState::Idle);
    }

    #[tokio::test]
    async fn signaling_failure_releases_the_attempts_resources() {
        let mut signaling = MockSignalingClient::new();
        signaling
            .expect_exchange_offer()
            .times(1)
            .returning(|_, _, _| Err(VoiceError::Signaling("401 Unauthorized".into())));
        let harness = build_harness(
            SessionOptions::default(),
            credentials_expecting(1),
            Arc::new(signaling),
            false,
        );

        let err = harness.session.connect().await.unwrap_err();

        assert!(matches!(err, VoiceError::Signaling(_)));
        assert_eq!(harness.counters.peers_closed.load(Ordering::SeqCst), 1);
        assert_eq!(harness.counters.tracks_stopped.load(Ordering::SeqCst), 1);
        assert!(harness.counters.playback_cleared.load(Ordering::SeqCst) >= 1);
        assert_eq!(harness.session.state().await, SessionState::Idle);
    }

    #[tokio::test]
    async fn channel_open_sends_nothing_when_priming_is_disabled() {
        let options = SessionOptions {
            include_context: false,
            context: Some(DocumentContext {
                title: "Photosynthesis".into(),
                body: "Plants convert light into chemical energy.".into(),
            }),
            ..SessionOptions::default()
        };
        let harness = build_harness(options, credentials_expecting(1), signaling_answering(), false);
        harness.session.connect().await.unwrap();

        harness
            .peer_events()
            .send(PeerEvent::ChannelOpen)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(harness.counters.channel_sends.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn channel_open_sends_nothing_when_the_document_is_empty() {
        let options = SessionOptions {
            include_context: true,
            context: Some(DocumentContext {
                title: "Empty".into(),
                body: "   \n".into(),
            }),
            ..SessionOptions::default()
        };
        let harness = build_harness(options, credentials_expecting(1), signaling_answering(), false);
        harness.session.connect().await.unwrap();

        harness
            .peer_events()
            .send(PeerEvent::ChannelOpen)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(harness.counters.channel_sends.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn channel_open_sends_the_priming_burst_in_order() {
        let options = SessionOptions {
            include_context: true,
            context: Some(DocumentContext {
                title: "Photosynthesis".into(),
                body: "Plants convert light into chemical energy.".into(),
            }),
            ..SessionOptions::default()
        };
        let harness = build_harness(options, credentials_expecting(1), signaling_answering(), false);
        harness.session.connect().await.unwrap();

        harness
            .peer_events()
            .send(PeerEvent::ChannelOpen)
            .await
            .unwrap();
        let counters = harness.counters.clone();
        wait_until(move || counters.channel_sends.lock().unwrap().len() == 3).await;

        let sends = harness.counters.channel_sends.lock().unwrap().clone();
        let types: Vec<String> = sends
            .iter()
            .map(|raw| {
                serde_json::from_str::<serde_json::Value>(raw).unwrap()["type"]
                    .as_str()
                    .unwrap()
                    .to_owned()
            })
            .collect();
        assert_eq!(
            types,
            [
                "conversation.create",
                "conversation.item.create",
                "response.create"
            ]
        );
        assert!(sends[1].contains("Photosynthesis"));
        assert!(sends[1].contains("chemical energy"));
    }

    #[tokio::test]
    async fn transport_drop_tears_the_session_down_without_disconnect() {
        let harness = build_harness(
            SessionOptions::default(),
            credentials_expecting(1),
            signaling_answering(),
            false,
        );
        harness.session.connect().await.unwrap();

        harness
            .peer_events()
            .send(PeerEvent::StateChanged(PeerState::Failed))
            .await
            .unwrap();

        wait_for_state(&harness.session, SessionState::Idle).await;
        assert_eq!(harness.counters.tracks_stopped.load(Ordering::SeqCst), 1);
        assert_eq!(harness.counters.peers_closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_terminal_transport_states_are_ignored() {
        let harness = build_harness(
            SessionOptions::default(),
            credentials_expecting(1),
            signaling_answering(),
            false,
        );
        harness.session.connect().await.unwrap();

        harness
            .peer_events()
            .send(PeerEvent::StateChanged(PeerState::Connecting))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(harness.session.state().await, SessionState::Connected);
    }

    #[tokio::test]
    async fn inbound_turn_events_are_dispatched() {
        let harness = build_harness(
            SessionOptions::default(),
            credentials_expecting(1),
            signaling_answering(),
            false,
        );
        harness.session.connect().await.unwrap();
        let mut events = harness.session.subscribe();
        let peer_events = harness.peer_events();

        peer_events
            .send(PeerEvent::ChannelMessage(
                r#"{"type":"response.done"}"#.into(),
            ))
            .await
            .unwrap();
        peer_events
            .send(PeerEvent::ChannelMessage(
                r#"{"type":"response.error","error":{"message":"boom"}}"#.into(),
            ))
            .await
            .unwrap();

        let first = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(first, SessionEvent::TurnComplete));
        let second = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        match second {
            SessionEvent::TurnError { message } => assert_eq!(message, "boom"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_and_unknown_payloads_do_not_disturb_the_session() {
        let harness = build_harness(
            SessionOptions::default(),
            credentials_expecting(1),
            signaling_answering(),
            false,
        );
        harness.session.connect().await.unwrap();
        let peer_events = harness.peer_events();

        peer_events
            .send(PeerEvent::ChannelMessage("{{not json".into()))
            .await
            .unwrap();
        peer_events
            .send(PeerEvent::ChannelMessage(
                r#"{"type":"rate_limits.updated"}"#.into(),
            ))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(harness.session.state().await, SessionState::Connected);
    }
}
