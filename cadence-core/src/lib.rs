//! # cadence-core
//!
//! Low-latency receive-side playback for streamed voice audio.
//!
//! ## Architecture
//!
//! ```text
//! network PCM → PlaybackSession::push_pcm16_le → RateConverter (stream → device rate)
//!                      │                                   │
//!                record_rtt                      AddOutputBuffer (crossbeam)
//!                      │                                   │
//!         AdaptiveBufferController ── Configure ──► RenderEngine::process (audio callback)
//!                                                          │
//!                                        playbackMetrics / bufferingStatus / inputData
//!                                                          │
//!                                   poll_events → broadcast::Sender<EngineEvent>
//! ```
//!
//! The render callback never locks or blocks. Playback itself does not
//! allocate in steady state; while recording, each captured block allocates
//! the `pcm16` buffer carried by its `inputData` event. Decoding, rate
//! conversion, and event fan-out happen on the control side.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod session;

// Convenience re-exports for downstream crates
pub use config::SessionConfig;
pub use control::{AdaptiveBufferController, ControllerConfig, UnderrunRecord};
pub use engine::{BlockReport, ConfigUpdate, PlaybackConfig, RenderEngine};
pub use error::{CadenceError, Result};
pub use ipc::messages::{
    BufferingStatus, ControlMessage, EngineEvent, PlaybackMetrics, PlaybackStatus,
};
pub use session::{PlaybackSession, SessionSnapshot};
