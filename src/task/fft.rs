//! FFT payload: `2 × 2^log_n` interleaved real/imaginary `f32` values.

use super::{word, PayloadError};

/// Largest transform that fits a default-sized block payload (16k points).
pub const MAX_LOG_N: u32 = 14;

/// Default transform length exponent.
pub const DEFAULT_LOG_N: u32 = 14;

const SAMPLE_BYTES: usize = std::mem::size_of::<f32>();

/// Number of `f32` values (real and imaginary) in a `2^log_n` point frame.
pub fn sample_count(log_n: u32) -> usize {
    2usize << log_n
}

/// Payload bytes used by a `2^log_n` point frame.
pub fn payload_bytes(log_n: u32) -> usize {
    sample_count(log_n) * SAMPLE_BYTES
}

/// Write `samples` at the start of `payload`, returning the bytes used.
pub fn write_samples(payload: &mut [u8], samples: &[f32]) -> Result<usize, PayloadError> {
    let needed = samples.len() * SAMPLE_BYTES;
    if needed > payload.len() {
        return Err(PayloadError::TooSmall {
            needed,
            available: payload.len(),
        });
    }
    for (dst, v) in payload.chunks_exact_mut(SAMPLE_BYTES).zip(samples) {
        dst.copy_from_slice(&v.to_ne_bytes());
    }
    Ok(needed)
}

/// Read `count` samples from the start of `payload`.
pub fn read_samples(payload: &[u8], count: usize) -> Result<Vec<f32>, PayloadError> {
    let needed = count * SAMPLE_BYTES;
    if needed > payload.len() {
        return Err(PayloadError::TooSmall {
            needed,
            available: payload.len(),
        });
    }
    Ok(payload[..needed]
        .chunks_exact(SAMPLE_BYTES)
        .map(|c| f32::from_ne_bytes(word(c)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sizes() {
        assert_eq!(sample_count(0), 2);
        assert_eq!(sample_count(14), 32_768);
        assert_eq!(payload_bytes(14), 131_072);
    }

    #[test]
    fn test_samples_survive_payload() {
        let mut payload = vec![0u8; 64];
        let samples = [1.5f32, -2.25, 0.0, 1e-3];
        assert_eq!(write_samples(&mut payload, &samples), Ok(16));
        assert_eq!(read_samples(&payload, 4).unwrap(), samples.to_vec());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut payload = vec![0u8; 8];
        assert_eq!(
            write_samples(&mut payload, &[0.0; 3]),
            Err(PayloadError::TooSmall {
                needed: 12,
                available: 8
            })
        );
        assert!(read_samples(&payload, 3).is_err());
    }
}
