//! 16-bit PCM conversion for the wire.
//!
//! Capture: clamp to [-1, 1], scale by `0x7FFF`, truncate toward zero.
//! Playback: little-endian `i16` bytes divided by `32767.0`.

use crate::error::{CadenceError, Result};

const PCM16_SCALE: f32 = 0x7FFF as f32;

/// Convert one captured float block into `dest` (lengths must match).
///
/// Allocation-free; runs on the render callback.
pub fn encode_block_into(samples: &[f32], dest: &mut [i16]) {
    for (out, &s) in dest.iter_mut().zip(samples) {
        *out = (s.clamp(-1.0, 1.0) * PCM16_SCALE) as i16;
    }
}

/// Convert a captured float block to a freshly allocated `i16` vector.
pub fn encode_block(samples: &[f32]) -> Vec<i16> {
    let mut out = vec![0i16; samples.len()];
    encode_block_into(samples, &mut out);
    out
}

/// Serialize `i16` samples as little-endian bytes.
pub fn pcm16_to_le_bytes(pcm: &[i16]) -> Vec<u8> {
    pcm.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Decode little-endian 16-bit PCM bytes into float samples.
///
/// # Errors
/// Returns `CadenceError::OddPcmLength` when `bytes` is not a whole number of samples.
pub fn decode_le_bytes(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(CadenceError::OddPcmLength { len: bytes.len() });
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM16_SCALE)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn encode_clamps_and_truncates() {
        let pcm = encode_block(&[0.0, 1.0, -1.0, 2.5, -3.0, 0.5, -0.5]);
        assert_eq!(pcm, vec![0, 32767, -32767, 32767, -32767, 16383, -16383]);
    }

    #[test]
    fn le_bytes_layout() {
        assert_eq!(pcm16_to_le_bytes(&[0x0102, -2]), vec![0x02, 0x01, 0xFE, 0xFF]);
    }

    #[test]
    fn decode_scales_by_full_positive_range() {
        let samples = decode_le_bytes(&[0xFF, 0x7F, 0x01, 0x80, 0x00, 0x00]).unwrap();
        assert_relative_eq!(samples[0], 1.0);
        assert_relative_eq!(samples[1], -1.0);
        assert_relative_eq!(samples[2], 0.0);
    }

    #[test]
    fn decode_rejects_odd_length() {
        let err = decode_le_bytes(&[0x00, 0x01, 0x02]).unwrap_err();
        assert!(matches!(err, CadenceError::OddPcmLength { len: 3 }));
    }
}
