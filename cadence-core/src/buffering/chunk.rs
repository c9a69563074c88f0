//! Typed audio chunk queued for playback.

use crate::audio::silence::is_digital_silence;

/// A contiguous block of mono PCM samples at the device sample rate.
///
/// Built on the control side (where allocation is allowed) and moved into the
/// render engine, which owns it until every sample has been played.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    samples: Vec<f32>,
    is_silence: bool,
}

impl AudioChunk {
    /// Wrap `samples` and classify them once.
    pub fn new(samples: Vec<f32>) -> Self {
        let is_silence = is_digital_silence(&samples);
        Self {
            samples,
            is_silence,
        }
    }

    /// Mono f32 samples in [-1.0, 1.0].
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if the chunk contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether every sample is digital silence.
    pub fn is_silence(&self) -> bool {
        self.is_silence
    }
}

impl From<Vec<f32>> for AudioChunk {
    fn from(samples: Vec<f32>) -> Self {
        Self::new(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_on_construction() {
        assert!(AudioChunk::new(vec![0.0; 40]).is_silence());
        assert!(!AudioChunk::new(vec![0.0, 0.3, 0.0]).is_silence());
    }

    #[test]
    fn zero_length_chunk_is_silent_and_empty() {
        let chunk = AudioChunk::new(Vec::new());
        assert!(chunk.is_empty());
        assert!(chunk.is_silence());
        assert_eq!(chunk.len(), 0);
    }
}
