//! Mentor core: the realtime voice-tutor session.
//!
//! This crate holds everything about a voice session that is independent of
//! the platform media stack: the lifecycle state machine, the
//! control-channel wire schema, the credential and signaling clients, and
//! the trait seam a concrete media stack plugs into. The `realtime-webrtc`
//! crate provides the production stack; tests substitute their own.

pub mod credential;
pub mod error;
pub mod protocol;
pub mod session;
pub mod signaling;
pub mod transport;

pub use error::VoiceError;
pub use session::{DocumentContext, SessionEvent, SessionOptions, SessionState, VoiceSession};

/// Model spoken to when the caller does not pick one.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";

/// The provider's realtime signaling endpoint. Offers are POSTed here with
/// the ephemeral credential as bearer auth and the model as a query
/// parameter.
pub const DEFAULT_SIGNALING_URL: &str = "https://api.openai.com/v1/realtime";

/// Label of the control channel negotiated inside the offer.
pub const CONTROL_CHANNEL_LABEL: &str = "oai-events";
