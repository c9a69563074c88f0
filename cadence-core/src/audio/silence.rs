//! Digital-silence classification for inbound playback chunks.

/// Magnitude at or below which a sample counts as digital silence.
pub const SILENCE_EPSILON: f32 = 1e-4;

/// Returns `true` when every sample's magnitude is at or below [`SILENCE_EPSILON`].
///
/// An empty slice is silence.
pub fn is_digital_silence(samples: &[f32]) -> bool {
    samples.iter().all(|s| s.abs() <= SILENCE_EPSILON)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_zero_is_silence() {
        assert!(is_digital_silence(&[0.0; 128]));
    }

    #[test]
    fn samples_at_epsilon_are_silence() {
        let samples = [SILENCE_EPSILON, -SILENCE_EPSILON, 5e-5, -9.9e-5];
        assert!(is_digital_silence(&samples));
    }

    #[test]
    fn one_audible_sample_breaks_silence() {
        let mut samples = vec![0.0f32; 256];
        samples[200] = -2e-4;
        assert!(!is_digital_silence(&samples));
    }

    #[test]
    fn empty_is_silence() {
        assert!(is_digital_silence(&[]));
    }
}
