//! PCM16 sample conversion
//!
//! Captured audio arrives from the device as `f32` in `[-1.0, 1.0]` and is
//! sent as little-endian signed 16-bit mono. Playback does the reverse.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;

/// Convert float samples to little-endian PCM16 bytes.
///
/// Samples are clamped to `[-1.0, 1.0]` and scaled by `32767`.
pub fn f32_to_pcm16(samples: &[f32]) -> Bytes {
    let mut out = BytesMut::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        out.put_i16_le((clamped * 32767.0) as i16);
    }
    out.freeze()
}

/// Convert little-endian PCM16 bytes to float samples in `[-1.0, 1.0)`
pub fn pcm16_to_f32(data: &[u8]) -> Result<Vec<f32>, CodecError> {
    if data.len() % 2 != 0 {
        return Err(CodecError::OddPcmLength(data.len()));
    }

    Ok(data
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_to_pcm16_scaling() {
        let pcm = f32_to_pcm16(&[0.0, 1.0, -1.0, 0.5]);
        assert_eq!(pcm.len(), 8);

        let values: Vec<i16> = pcm
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect();
        assert_eq!(values, vec![0, 32767, -32767, 16383]);
    }

    #[test]
    fn test_out_of_range_samples_are_clamped() {
        let pcm = f32_to_pcm16(&[4.0, -4.0]);
        let values: Vec<i16> = pcm
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect();
        assert_eq!(values, vec![32767, -32767]);
    }

    #[test]
    fn test_pcm16_to_f32() {
        let samples = pcm16_to_f32(&[0x00, 0x40, 0x00, 0xC0]).unwrap();
        assert_eq!(samples, vec![0.5, -0.5]);
    }

    #[test]
    fn test_odd_length_rejected() {
        assert!(matches!(
            pcm16_to_f32(&[1, 2, 3]),
            Err(CodecError::OddPcmLength(3))
        ));
    }
}
