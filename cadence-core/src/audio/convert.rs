//! Stream-rate to device-rate conversion for incoming network packets.
//!
//! The peer sends PCM at the stream rate (24 kHz by default); the device runs
//! at whatever rate cpal reports. `RateConverter::push` turns one network
//! packet into the device-rate [`AudioChunk`]s it releases, so the playback
//! queue keeps packet boundaries and silence classification:
//!
//! - Speech packets feed a rubato `FastFixedIn` stage. Input that does not
//!   fill a whole rubato chunk stays pending.
//! - A silent packet closes the utterance. The pending tail is flushed
//!   through the resampler, then the silence is emitted as its own zero chunk
//!   without touching rubato, so the idle-skip rule still sees it as silence.
//! - [`RateConverter::flush`] releases the pending tail on demand (end of
//!   stream, or a pause in delivery).
//!
//! Equal rates bypass rubato entirely and each packet becomes one chunk.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{debug, warn};

use crate::audio::silence::is_digital_silence;
use crate::buffering::chunk::AudioChunk;
use crate::error::{CadenceError, Result};

struct Stage {
    resampler: FastFixedIn<f32>,
    chunk_size: usize,
    /// Speech input not yet handed to rubato.
    pending: Vec<f32>,
    /// `[1][output_frames_max]`
    out: Vec<Vec<f32>>,
    /// Speech has entered the resampler since the last reset.
    primed: bool,
}

/// Converts mono network packets to device-rate playback chunks.
pub struct RateConverter {
    ratio: f64,
    stage: Option<Stage>,
    /// Fractional device sample owed by earlier silent packets.
    silence_carry: f64,
}

impl RateConverter {
    /// # Errors
    /// Returns `CadenceError::InvalidConfig` if rubato rejects the ratio or chunk size.
    pub fn new(stream_rate: u32, device_rate: u32, chunk_size: usize) -> Result<Self> {
        let ratio = device_rate as f64 / stream_rate.max(1) as f64;
        if stream_rate == device_rate {
            return Ok(Self {
                ratio: 1.0,
                stage: None,
                silence_carry: 0.0,
            });
        }

        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
            .map_err(|e| CadenceError::InvalidConfig(format!("rate converter init: {e}")))?;
        let out = vec![vec![0f32; resampler.output_frames_max()]; 1];

        tracing::info!(stream_rate, device_rate, chunk_size, "stream-rate conversion enabled");

        Ok(Self {
            ratio,
            stage: Some(Stage {
                resampler,
                chunk_size,
                pending: Vec::with_capacity(chunk_size * 2),
                out,
                primed: false,
            }),
            silence_carry: 0.0,
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.stage.is_none()
    }

    /// Stream samples waiting for a full rubato chunk or a flush.
    pub fn pending(&self) -> usize {
        self.stage.as_ref().map_or(0, |s| s.pending.len())
    }

    /// Convert one network packet. Returns the chunks now ready, oldest first.
    pub fn push(&mut self, packet: &[f32]) -> Vec<AudioChunk> {
        if packet.is_empty() {
            return Vec::new();
        }
        if self.stage.is_none() {
            return vec![AudioChunk::new(packet.to_vec())];
        }

        if is_digital_silence(packet) {
            let mut ready = Vec::with_capacity(2);
            ready.extend(self.flush());
            let len = self.silent_len(packet.len());
            if len > 0 {
                ready.push(AudioChunk::new(vec![0.0; len]));
            }
            return ready;
        }

        let Some(stage) = self.stage.as_mut() else {
            return Vec::new();
        };
        stage.pending.extend_from_slice(packet);
        stage.primed = true;

        let mut converted = Vec::new();
        let mut start = 0;
        while stage.pending.len() - start >= stage.chunk_size {
            let wave_in: [&[f32]; 1] = [&stage.pending[start..start + stage.chunk_size]];
            match stage.resampler.process_into_buffer(&wave_in, &mut stage.out, None) {
                Ok((_, produced)) => converted.extend_from_slice(&stage.out[0][..produced]),
                Err(e) => warn!("rate converter dropped a chunk: {e}"),
            }
            start += stage.chunk_size;
        }
        stage.pending.drain(..start);

        if converted.is_empty() {
            Vec::new()
        } else {
            vec![AudioChunk::new(converted)]
        }
    }

    /// Release the pending tail and reset the resampler for the next utterance.
    ///
    /// The tail is zero-padded to a rubato chunk and the padding trimmed off,
    /// so it yields `round(pending × ratio)` samples.
    pub fn flush(&mut self) -> Option<AudioChunk> {
        let ratio = self.ratio;
        let stage = self.stage.as_mut()?;
        if !stage.primed {
            return None;
        }

        let mut tail = Vec::new();
        if !stage.pending.is_empty() {
            let wanted = (stage.pending.len() as f64 * ratio).round() as usize;
            let wave_in: [&[f32]; 1] = [&stage.pending];
            match stage
                .resampler
                .process_partial_into_buffer(Some(&wave_in[..]), &mut stage.out, None)
            {
                Ok((_, produced)) => {
                    tail.extend_from_slice(&stage.out[0][..produced.min(wanted)]);
                }
                Err(e) => warn!("rate converter lost the stream tail: {e}"),
            }
            debug!(pending = stage.pending.len(), emitted = tail.len(), "flushed rate converter");
            stage.pending.clear();
        }
        stage.resampler.reset();
        stage.primed = false;

        (!tail.is_empty()).then(|| AudioChunk::new(tail))
    }

    /// Device-rate length of a silent packet, carrying the fraction forward.
    fn silent_len(&mut self, stream_len: usize) -> usize {
        let exact = stream_len as f64 * self.ratio + self.silence_carry;
        let whole = exact.floor();
        self.silence_carry = exact - whole;
        whole as usize
    }
}
