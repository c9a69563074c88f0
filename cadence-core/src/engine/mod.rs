//! Real-time render engine and its configuration.
//!
//! ## Per-block cycle
//!
//! ```text
//! drain commands ─► capture gate ─► occupancy ─► Buffering? ─► silence + bufferingStatus
//!                                                   │
//!                                                Playing
//!                                                   │
//!                          rate determine ─► smooth ─► drain floor(block × rate)
//!                                                   │
//!                                   linear resample to block ─► playbackMetrics
//! ```
//!
//! `PlaybackConfig` is owned by the engine and replaced as a whole value when
//! a `Configure` message arrives between blocks, so a block never observes a
//! half-applied update.

pub mod rate;
pub mod render;

use serde::{Deserialize, Serialize};

use crate::error::{CadenceError, Result};

pub use render::{BlockReport, RenderDiagnostics, RenderEngine};

/// Playback tuning consumed by the render engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct PlaybackConfig {
    /// Fill target in device blocks. Default: 24 (~128 ms at 24 kHz / 128).
    pub target_blocks: usize,
    /// Lower playback-rate bound. Default: 0.8.
    pub rate_min: f64,
    /// Upper playback-rate bound. Default: 1.5. `rate_min >= rate_max`
    /// disables rate adaptation.
    pub rate_max: f64,
    /// Dead zone around the target, as a fraction of it. Default: 0.2.
    pub rate_affordance: f64,
    /// Single-pole smoothing coefficient in [0, 1). Default: 0.9.
    pub smoothing: f64,
    /// Leading silence does not count toward the start threshold. Default: true.
    pub skip_silence_when_idle: bool,
    /// Linear output gain applied after the block is stretched. Default: 1.0.
    pub volume: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            target_blocks: 24,
            rate_min: 0.8,
            rate_max: 1.5,
            rate_affordance: 0.2,
            smoothing: 0.9,
            skip_silence_when_idle: true,
            volume: 1.0,
        }
    }
}

impl PlaybackConfig {
    /// Fill target expressed in samples.
    pub fn target_samples(&self, block_len: usize) -> usize {
        self.target_blocks.saturating_mul(block_len)
    }

    /// Return a copy with every valid field of `update` applied.
    ///
    /// Non-finite floats, a negative affordance or volume, and a smoothing
    /// value outside [0, 1) are ignored rather than rejected.
    pub fn apply(&self, update: &ConfigUpdate) -> Self {
        let mut next = *self;
        if let Some(blocks) = update.target_blocks {
            next.target_blocks = blocks;
        }
        if let Some(v) = update.rate_min.filter(|v| v.is_finite()) {
            next.rate_min = v;
        }
        if let Some(v) = update.rate_max.filter(|v| v.is_finite()) {
            next.rate_max = v;
        }
        if let Some(v) = update.rate_affordance.filter(|v| v.is_finite() && *v >= 0.0) {
            next.rate_affordance = v;
        }
        if let Some(v) = update.smoothing.filter(|v| (0.0..1.0).contains(v)) {
            next.smoothing = v;
        }
        if let Some(skip) = update.skip_silence_when_idle {
            next.skip_silence_when_idle = skip;
        }
        if let Some(v) = update.volume.filter(|v| v.is_finite() && *v >= 0.0) {
            next.volume = v;
        }
        next
    }

    /// Startup validation. The engine itself never rejects a config.
    ///
    /// # Errors
    /// Returns `CadenceError::InvalidConfig` naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if !(self.rate_min.is_finite() && self.rate_min > 0.0) {
            return Err(CadenceError::InvalidConfig(format!(
                "rateMin must be a positive number, got {}",
                self.rate_min
            )));
        }
        if !(self.rate_max.is_finite() && self.rate_max > 0.0) {
            return Err(CadenceError::InvalidConfig(format!(
                "rateMax must be a positive number, got {}",
                self.rate_max
            )));
        }
        if !(self.rate_affordance.is_finite() && self.rate_affordance >= 0.0) {
            return Err(CadenceError::InvalidConfig(format!(
                "rateAffordance must be non-negative, got {}",
                self.rate_affordance
            )));
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(CadenceError::InvalidConfig(format!(
                "smoothing must be in [0, 1), got {}",
                self.smoothing
            )));
        }
        if !(self.volume.is_finite() && self.volume >= 0.0) {
            return Err(CadenceError::InvalidConfig(format!(
                "volume must be non-negative, got {}",
                self.volume
            )));
        }
        Ok(())
    }
}

/// Partial `PlaybackConfig`; `None` fields are left unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_blocks: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_affordance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smoothing: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_silence_when_idle: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

impl ConfigUpdate {
    /// Update carrying only a new fill target.
    pub fn target_blocks(blocks: usize) -> Self {
        Self {
            target_blocks: Some(blocks),
            ..Self::default()
        }
    }

    /// Update carrying only a new output gain.
    pub fn volume(volume: f64) -> Self {
        Self {
            volume: Some(volume),
            ..Self::default()
        }
    }
}

/// Snapshot of the render engine's playback state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackState {
    pub smoothed_rate: f64,
    /// Samples of the head chunk already played.
    pub offset: usize,
    pub in_playback: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_update_leaves_absent_fields() {
        let base = PlaybackConfig::default();
        let next = base.apply(&ConfigUpdate::target_blocks(81));
        assert_eq!(next.target_blocks, 81);
        assert_eq!(next.rate_min, base.rate_min);
        assert_eq!(next.smoothing, base.smoothing);
        assert!(next.skip_silence_when_idle);
    }

    #[test]
    fn invalid_update_fields_are_ignored() {
        let base = PlaybackConfig::default();
        let next = base.apply(&ConfigUpdate {
            rate_min: Some(f64::NAN),
            smoothing: Some(1.0),
            rate_affordance: Some(-0.1),
            rate_max: Some(1.2),
            volume: Some(-0.5),
            ..ConfigUpdate::default()
        });
        assert_eq!(next.volume, 1.0);
        assert_eq!(next.rate_min, base.rate_min);
        assert_eq!(next.smoothing, base.smoothing);
        assert_eq!(next.rate_affordance, base.rate_affordance);
        assert_eq!(next.rate_max, 1.2);
    }

    #[test]
    fn inverted_rate_bounds_pass_validation() {
        let cfg = PlaybackConfig {
            rate_min: 1.5,
            rate_max: 0.8,
            ..PlaybackConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validation_rejects_out_of_range_smoothing() {
        let cfg = PlaybackConfig {
            smoothing: 1.0,
            ..PlaybackConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(CadenceError::InvalidConfig(_))));
    }

    #[test]
    fn validation_rejects_negative_volume() {
        let cfg = PlaybackConfig {
            volume: -1.0,
            ..PlaybackConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(CadenceError::InvalidConfig(_))));
        assert!(PlaybackConfig::default().apply(&ConfigUpdate::volume(0.0)).validate().is_ok());
    }

    #[test]
    fn config_update_deserializes_partial_json() {
        let update: ConfigUpdate =
            serde_json::from_str(r#"{"targetBlocks": 30, "skipSilenceWhenIdle": false}"#)
                .expect("parse update");
        assert_eq!(update.target_blocks, Some(30));
        assert_eq!(update.skip_silence_when_idle, Some(false));
        assert!(update.rate_min.is_none());
    }
}
