//! Linear-interpolation block stretcher for playback-rate changes.
//!
//! The render engine reads `floor(block_len × rate)` samples from the queue
//! and maps them onto exactly `block_len` device samples. No anti-aliasing is
//! applied; the rate stays within `[rate_min, rate_max]` and moves smoothly,
//! which keeps the artefacts inaudible for speech.
//!
//! `resample_into` is allocation-free and safe to call from the audio
//! callback. `resample` is the allocating convenience for non-RT callers.

/// Stretch or compress `source` onto `dest`, filling every slot of `dest`.
///
/// Output index `i` reads source position `p = i × N / M`. Exact positions
/// and positions whose upper neighbour falls off the end copy `source[floor(p)]`;
/// everything else blends the two neighbours. An empty source yields silence.
pub fn resample_into(source: &[f32], dest: &mut [f32]) {
    let n = source.len();
    let m = dest.len();

    if n == m {
        dest.copy_from_slice(source);
        return;
    }
    if n == 0 {
        dest.fill(0.0);
        return;
    }

    let step = n as f64 / m as f64;
    for (i, out) in dest.iter_mut().enumerate() {
        let pos = i as f64 * step;
        let lo = pos.floor() as usize;
        let hi = pos.ceil() as usize;

        *out = if lo == hi || hi >= n {
            source[lo.min(n - 1)]
        } else {
            let frac = (pos - lo as f64) as f32;
            source[lo] * (1.0 - frac) + source[hi] * frac
        };
    }
}

/// Allocating wrapper around [`resample_into`]. Returns `source` unchanged
/// when `target_len == source.len()`.
pub fn resample(source: &[f32], target_len: usize) -> Vec<f32> {
    if target_len == source.len() {
        return source.to_vec();
    }
    let mut out = vec![0.0f32; target_len];
    resample_into(source, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identity_when_lengths_match() {
        let samples: Vec<f32> = (0..128).map(|i| (i as f32 * 0.37).sin()).collect();
        assert_eq!(resample(&samples, samples.len()), samples);
    }

    #[test]
    fn halving_picks_exact_source_indices() {
        assert_eq!(resample(&[0.0, 1.0, 2.0, 3.0], 2), vec![0.0, 2.0]);
    }

    #[test]
    fn stretching_interpolates_between_neighbours() {
        // N=2, M=4: positions 0, 0.5, 1.0, 1.5
        let out = resample(&[0.0, 1.0], 4);
        assert_relative_eq!(out[0], 0.0);
        assert_relative_eq!(out[1], 0.5);
        assert_relative_eq!(out[2], 1.0);
        // hi == 2 is past the end → copy source[1]
        assert_relative_eq!(out[3], 1.0);
    }

    #[test]
    fn slight_compression_stays_within_source_range() {
        let source: Vec<f32> = (0..140).map(|i| i as f32 / 140.0).collect();
        let out = resample(&source, 128);
        assert_eq!(out.len(), 128);
        assert_relative_eq!(out[0], 0.0);
        for pair in out.windows(2) {
            assert!(pair[1] >= pair[0], "ramp must stay monotonic");
        }
        assert!(*out.last().unwrap() <= *source.last().unwrap());
    }

    #[test]
    fn empty_source_yields_silence() {
        let mut dest = [1.0f32; 16];
        resample_into(&[], &mut dest);
        assert_eq!(dest, [0.0; 16]);
    }
}
