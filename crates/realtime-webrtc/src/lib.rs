//! Production media stack for the voice session, built on webrtc-rs.
//!
//! Implements the `mentor-core` transport seam: peer connections and data
//! channels from the `webrtc` crate, microphone capture and speaker playback
//! through cpal, G.711 μ-law on the wire, rubato between the device rate and
//! the 8 kHz telephony rate.

pub mod audio;
pub mod codec;

mod capture;
mod playback;
mod stack;

pub use playback::CpalPlayback;
pub use stack::{StackConfig, WebRtcStack};
