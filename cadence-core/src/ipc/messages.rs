//! Messages crossing the control ↔ render-engine boundary.
//!
//! One closed enum per direction. `EngineEvent` serializes with an
//! `eventType` tag and camelCase fields so it can be forwarded verbatim to a
//! UI or log sink.

use serde::{Deserialize, Serialize};

use crate::buffering::chunk::AudioChunk;
use crate::engine::ConfigUpdate;

/// control → engine.
#[derive(Debug, Clone)]
pub enum ControlMessage {
    /// Partial configuration update; absent fields stay unchanged.
    Configure(ConfigUpdate),
    /// Open the capture gate.
    StartRecording,
    /// Close the capture gate. Does not touch playback.
    StopRecording,
    /// Append a decoded chunk to the playback queue.
    AddOutputBuffer(AudioChunk),
}

/// engine → control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "camelCase")]
pub enum EngineEvent {
    /// One captured device block as 16-bit PCM.
    InputData { pcm16: Vec<i16> },
    /// Emitted for every block rendered while playing.
    PlaybackMetrics(PlaybackMetrics),
    /// Emitted for every block rendered as silence while buffering.
    BufferingStatus(BufferingStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackMetrics {
    /// `consumable / target` at the start of the block.
    pub buffer_health: f64,
    /// Smoothed playback rate used for the block.
    pub playback_rate: f64,
    /// Fewer samples were available than the block needed.
    pub underrun: bool,
    pub samples_read: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferingStatus {
    pub buffer_health: f64,
    /// Every queued sample, silence included.
    pub total_buffered: usize,
}

/// Coarse playback state for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    Buffering,
    Playing,
}
