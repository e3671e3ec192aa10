//! Error taxonomy for the voice session.
//!
//! Every variant is terminal for the attempt that produced it. Nothing here
//! retries on its own; the user re-invokes `connect()` explicitly.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoiceError {
    /// The backend session endpoint was unreachable, returned a non-success
    /// status, or its body carried no usable credential.
    #[error("could not initialize a voice session: {0}")]
    Credential(String),

    /// Microphone access was denied, or no audio input device exists.
    #[error("microphone unavailable ({0}); check audio permissions and input devices")]
    Permission(String),

    /// The remote signaling endpoint rejected the session offer. The payload
    /// carries the remote's own error text.
    #[error("signaling endpoint rejected the session offer: {0}")]
    Signaling(String),

    /// The realtime transport failed, either while being established or out
    /// from under a live session.
    #[error("realtime transport failure: {0}")]
    Transport(String),
}
