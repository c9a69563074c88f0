//! Adaptive buffer-size controller.
//!
//! Runs on the control thread, paced by RTT samples rather than audio blocks.
//! At most once per `update_interval_ms` it turns the rolling mean RTT into a
//! fill target for the render engine:
//!
//! ```text
//! extra      = max(0, mean_rtt − target_buffer_ms)
//! padding    = padding_multiplier × target_buffer_ms
//! buffer_ms  = clamp(extra + padding, min_buffer_ms, max_buffer_ms)
//! blocks     = ceil(buffer_ms × sample_rate / block_len / 1000)
//! ```

pub mod rtt;

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::ConfigUpdate;
use crate::error::{CadenceError, Result};

pub use rtt::{PingTracker, RttEstimator};

/// Tuning for [`AdaptiveBufferController`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct ControllerConfig {
    /// Baseline buffer (ms). Default: 120.
    pub target_buffer_ms: f64,
    /// Fixed slack as a multiple of the baseline. Default: 1.25.
    pub padding_multiplier: f64,
    /// Default: 60.
    pub min_buffer_ms: f64,
    /// Default: 800.
    pub max_buffer_ms: f64,
    /// Minimum spacing between retunes. Default: 5000.
    pub update_interval_ms: u64,
    /// RTT samples averaged. Default: 5.
    pub rtt_window: usize,
    /// Mean RTT above which a retune logs a warning. Default: 500.
    pub high_latency_warn_ms: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            target_buffer_ms: 120.0,
            padding_multiplier: 1.25,
            min_buffer_ms: 60.0,
            max_buffer_ms: 800.0,
            update_interval_ms: 5_000,
            rtt_window: 5,
            high_latency_warn_ms: 500.0,
        }
    }
}

impl ControllerConfig {
    /// # Errors
    /// Returns `CadenceError::InvalidConfig` for non-finite or inverted bounds.
    pub fn validate(&self) -> Result<()> {
        let finite = [
            self.target_buffer_ms,
            self.padding_multiplier,
            self.min_buffer_ms,
            self.max_buffer_ms,
        ]
        .iter()
        .all(|v| v.is_finite() && *v >= 0.0);
        if !finite {
            return Err(CadenceError::InvalidConfig(
                "controller buffer bounds must be finite and non-negative".into(),
            ));
        }
        if self.min_buffer_ms > self.max_buffer_ms {
            return Err(CadenceError::InvalidConfig(format!(
                "minBufferMs ({}) exceeds maxBufferMs ({})",
                self.min_buffer_ms, self.max_buffer_ms
            )));
        }
        if self.rtt_window == 0 {
            return Err(CadenceError::InvalidConfig("rttWindow must be at least 1".into()));
        }
        Ok(())
    }

    /// Buffer length in ms for a given mean RTT.
    pub fn buffer_ms(&self, mean_rtt_ms: f64) -> f64 {
        let extra = (mean_rtt_ms - self.target_buffer_ms).max(0.0);
        let padding = self.padding_multiplier * self.target_buffer_ms;
        (extra + padding).clamp(self.min_buffer_ms, self.max_buffer_ms)
    }
}

/// Convert a buffer duration into whole device blocks, rounding up.
pub fn blocks_for_ms(buffer_ms: f64, sample_rate: u32, block_len: usize) -> usize {
    (buffer_ms * sample_rate as f64 / block_len.max(1) as f64 / 1000.0).ceil() as usize
}

/// Derives the render engine's fill target from network latency.
#[derive(Debug)]
pub struct AdaptiveBufferController {
    config: ControllerConfig,
    sample_rate: u32,
    block_len: usize,
    rtt: RttEstimator,
    last_update: Option<Instant>,
    target_blocks: Option<usize>,
}

impl AdaptiveBufferController {
    pub fn new(config: ControllerConfig, sample_rate: u32, block_len: usize) -> Self {
        Self {
            rtt: RttEstimator::new(config.rtt_window),
            config,
            sample_rate,
            block_len,
            last_update: None,
            target_blocks: None,
        }
    }

    pub fn mean_rtt_ms(&self) -> f64 {
        self.rtt.mean_ms()
    }

    /// Last target pushed, if any retune has happened.
    pub fn target_blocks(&self) -> Option<usize> {
        self.target_blocks
    }

    /// Record one RTT sample observed at `now`.
    ///
    /// Returns a configuration update when the retune interval has elapsed
    /// (the very first sample always retunes).
    pub fn record_rtt(&mut self, rtt_ms: f64, now: Instant) -> Option<ConfigUpdate> {
        if !rtt_ms.is_finite() || rtt_ms < 0.0 {
            debug!(rtt_ms, "ignoring invalid RTT sample");
            return None;
        }
        self.rtt.push(rtt_ms);

        let interval = Duration::from_millis(self.config.update_interval_ms);
        let due = self
            .last_update
            .map(|t| now.saturating_duration_since(t) > interval)
            .unwrap_or(true);
        if !due {
            return None;
        }
        self.last_update = Some(now);
        Some(self.retune())
    }

    fn retune(&mut self) -> ConfigUpdate {
        let mean_rtt_ms = self.rtt.mean_ms();
        let buffer_ms = self.config.buffer_ms(mean_rtt_ms);
        let blocks = blocks_for_ms(buffer_ms, self.sample_rate, self.block_len);
        self.target_blocks = Some(blocks);

        info!(
            buffer_ms = format_args!("{buffer_ms:.0}"),
            blocks,
            mean_rtt_ms = format_args!("{mean_rtt_ms:.0}"),
            "adjusted playback buffer"
        );
        if mean_rtt_ms > self.config.high_latency_warn_ms {
            warn!(
                mean_rtt_ms = format_args!("{mean_rtt_ms:.0}"),
                "high network latency"
            );
        }

        ConfigUpdate::target_blocks(blocks)
    }
}

/// One playback underrun as seen from the control side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnderrunRecord {
    pub time_since_stream_start_ms: u64,
    pub rtt_ms: f64,
}

/// Append-only diagnostic log of underruns.
#[derive(Debug, Default)]
pub struct UnderrunLog {
    records: Vec<UnderrunRecord>,
}

impl UnderrunLog {
    pub fn record(&mut self, since_start: Duration, rtt_ms: f64) -> UnderrunRecord {
        let record = UnderrunRecord {
            time_since_stream_start_ms: since_start.as_millis() as u64,
            rtt_ms,
        };
        self.records.push(record);
        warn!(
            rtt_ms = format_args!("{rtt_ms:.0}"),
            at_ms = record.time_since_stream_start_ms,
            "playback buffer underrun"
        );
        record
    }

    pub fn records(&self) -> &[UnderrunRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
