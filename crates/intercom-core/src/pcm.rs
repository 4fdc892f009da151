//! int16 PCM to normalized float conversion and the wire byte codec
//!
//! The wire format is `pcm_i16`: little-endian signed 16-bit, exactly one
//! frame per push/pull. Internally all processing runs on normalized f32.
//! All conversions operate into caller-provided buffers so the per-frame
//! path never allocates, and the byte codec converts per sample so the
//! wire stays little-endian on any host.

use crate::types::{Sample, FRAME_SIZE};

/// Full-scale divisor/multiplier. `-32768 / 32768 == -1.0` exactly, so the
/// whole int16 range maps into `[-1.0, 1.0)` and back without drift.
pub const PCM_SCALE: f32 = 32_768.0;

/// Size of one frame on the wire, in bytes.
pub const FRAME_BYTES: usize = FRAME_SIZE * 2;

/// Convert int16 PCM samples to normalized floats: `f = s / 32768.0`.
pub fn from_pcm16(pcm: &[i16], out: &mut [Sample]) {
    debug_assert_eq!(pcm.len(), out.len());
    for (dst, &s) in out.iter_mut().zip(pcm.iter()) {
        *dst = s as f32 / PCM_SCALE;
    }
}

/// Convert normalized floats to int16 PCM.
///
/// Scales to full range, rounds to nearest, and saturates to
/// `[-32768, 32767]`. Saturation is the only overflow policy; NaN maps
/// to 0.
pub fn to_pcm16(samples: &[Sample], out: &mut [i16]) {
    debug_assert_eq!(samples.len(), out.len());
    for (dst, &x) in out.iter_mut().zip(samples.iter()) {
        let scaled = x * PCM_SCALE;
        *dst = if scaled.is_nan() {
            0
        } else {
            scaled.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
        };
    }
}

/// Decode little-endian wire bytes into PCM samples.
pub fn pcm16_from_le_bytes(bytes: &[u8], out: &mut [i16]) {
    debug_assert_eq!(bytes.len(), out.len() * 2);
    for (dst, pair) in out.iter_mut().zip(bytes.chunks_exact(2)) {
        *dst = i16::from_le_bytes([pair[0], pair[1]]);
    }
}

/// Encode PCM samples as little-endian wire bytes.
pub fn pcm16_to_le_bytes(pcm: &[i16], out: &mut [u8]) {
    debug_assert_eq!(out.len(), pcm.len() * 2);
    for (dst, &s) in out.chunks_exact_mut(2).zip(pcm.iter()) {
        dst.copy_from_slice(&s.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_full_scale_is_exact() {
        let mut f = [0.0f32; 1];
        from_pcm16(&[i16::MIN], &mut f);
        assert_eq!(f[0], -1.0);
    }

    #[test]
    fn test_pcm_roundtrip_is_identity() {
        // Every int16 value survives the float round trip.
        let mut f = [0.0f32; 1];
        let mut back = [0i16; 1];
        for s in i16::MIN..=i16::MAX {
            from_pcm16(&[s], &mut f);
            to_pcm16(&f, &mut back);
            assert_eq!(back[0], s, "roundtrip broke at {}", s);
        }
    }

    #[test]
    fn test_float_roundtrip_stays_close() {
        let mut pcm = [0i16; 1];
        let mut back = [0.0f32; 1];
        let tolerance = 1.0 / 32_767.0;

        let mut x = -1.5f32;
        while x <= 1.5 {
            to_pcm16(&[x], &mut pcm);
            from_pcm16(&pcm, &mut back);
            let expected = x.clamp(-1.0, 1.0);
            assert!(
                (back[0] - expected).abs() <= tolerance,
                "{} -> {} -> {} (expected near {})",
                x,
                pcm[0],
                back[0],
                expected
            );
            x += 0.001;
        }
    }

    #[test]
    fn test_saturation() {
        let mut pcm = [0i16; 4];
        to_pcm16(&[2.0, -2.0, 1.0, -1.0], &mut pcm);
        assert_eq!(pcm, [32767, -32768, 32767, -32768]);
    }

    #[test]
    fn test_nan_maps_to_zero() {
        let mut pcm = [1i16; 1];
        to_pcm16(&[f32::NAN], &mut pcm);
        assert_eq!(pcm[0], 0);
    }

    #[test]
    fn test_wire_bytes_are_little_endian() {
        let pcm: [i16; 2] = [0x0102, -2];
        let mut bytes = [0u8; 4];
        pcm16_to_le_bytes(&pcm, &mut bytes);
        assert_eq!(bytes, [0x02, 0x01, 0xFE, 0xFF]);
    }

    #[test]
    fn test_wire_byte_roundtrip() {
        let pcm: [i16; 4] = [0, -1, 32767, -32768];
        let mut bytes = [0u8; 8];
        pcm16_to_le_bytes(&pcm, &mut bytes);
        let mut back = [0i16; 4];
        pcm16_from_le_bytes(&bytes, &mut back);
        assert_eq!(back, pcm);
    }
}
