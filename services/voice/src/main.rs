//! Native voice-tutor client.
//!
//! Wires the core session to the WebRTC media stack: mints an ephemeral
//! credential from the backend, dials the realtime endpoint, optionally
//! primes the conversation with a document, and streams microphone audio
//! until Ctrl+C.

use anyhow::Context;
use clap::Parser;
use mentor_core::{
    DocumentContext, SessionEvent, SessionOptions, VoiceSession,
    credential::HttpCredentialProvider, signaling::HttpSignalingClient,
};
use realtime_webrtc::{StackConfig, WebRtcStack};
use std::{path::PathBuf, sync::Arc};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "mentor-voice", about = "Talk to the AI tutor over realtime voice")]
struct Args {
    /// Backend endpoint that mints ephemeral realtime credentials.
    #[arg(long, default_value = "http://localhost:3000/voice/session")]
    session_endpoint: String,

    /// Realtime model to converse with.
    #[arg(long, default_value = mentor_core::DEFAULT_REALTIME_MODEL)]
    model: String,

    /// Signaling endpoint offers are POSTed to.
    #[arg(long, default_value = mentor_core::DEFAULT_SIGNALING_URL)]
    signaling_url: String,

    /// Document to prime the conversation with.
    #[arg(long)]
    document: Option<PathBuf>,

    /// Title announced for the primed document; defaults to the file name.
    #[arg(long)]
    title: Option<String>,

    /// Skip context priming even when a document is given.
    #[arg(long)]
    no_context: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    let context = match &args.document {
        Some(path) => {
            let body = std::fs::read_to_string(path)
                .with_context(|| format!("could not read document {}", path.display()))?;
            let title = args.title.clone().unwrap_or_else(|| {
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .unwrap_or("document")
                    .to_string()
            });
            Some(DocumentContext { title, body })
        }
        None => None,
    };

    let options = SessionOptions {
        model: args.model.clone(),
        include_context: context.is_some() && !args.no_context,
        context,
    };

    let endpoint =
        reqwest::Url::parse(&args.session_endpoint).context("invalid session endpoint")?;
    let credentials = Arc::new(HttpCredentialProvider::new(endpoint));
    let signaling = Arc::new(HttpSignalingClient::new(args.signaling_url.clone()));
    let stack = WebRtcStack::new(StackConfig::default())?;
    let playback = stack.playback();

    let session = VoiceSession::new(options, credentials, signaling, stack, playback);
    let mut events = session.subscribe();

    info!(model = %args.model, "connecting voice session...");
    session.connect().await?;
    info!("connected; speak into the microphone (Ctrl+C to hang up)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("hanging up");
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::TurnComplete) => info!("tutor finished a turn"),
                Ok(SessionEvent::TurnError { message }) => {
                    warn!(%message, "tutor reported a failed turn");
                }
                Ok(SessionEvent::RemoteTrack { id }) => info!(track = %id, "tutor audio started"),
                Ok(SessionEvent::TransportLost) => {
                    error!("connection lost; run again to reconnect");
                    break;
                }
                Ok(SessionEvent::StateChanged { previous, current }) => {
                    info!(?previous, ?current, "session state changed");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "missed session events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    session.disconnect().await;
    info!("session closed");
    Ok(())
}
