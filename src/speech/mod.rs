//! Think-aloud speech: TTS synthesis and the blocking playback gate.
//!
//! The gate is a single-slot rendezvous between the loop and the operator
//! UI: at most one outstanding request, resolved by a matching ack, a
//! watchdog timeout, or run teardown.

pub mod gate;
pub mod tts;

pub use gate::{watchdog_for, SpeechGate};
pub use tts::{SpeechAudio, TtsClient};
