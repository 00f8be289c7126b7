//! In-place radix-2 decimation-in-time FFT over interleaved samples.

use std::f64::consts::PI;

/// `v` with its 32 bits in reverse order.
pub fn fft_rev(v: u32) -> u32 {
    v.reverse_bits()
}

/// Permute `n` complex samples into bit-reversed index order, where indices
/// are `bits` wide.
pub fn fft_bit_reverse(w: &mut [f32], n: usize, bits: u32) {
    if bits == 0 {
        return;
    }
    let shift = u32::BITS - bits;
    for i in 0..n {
        let r = (fft_rev(i as u32) >> shift) as usize;
        if i < r {
            w.swap(2 * i, 2 * r);
            w.swap(2 * i + 1, 2 * r + 1);
        }
    }
}

/// Forward transform of `samples.len() / 2` points. The point count must be
/// a power of two; other lengths are left untouched.
pub fn transform(samples: &mut [f32]) {
    let n = samples.len() / 2;
    if n < 2 || !n.is_power_of_two() {
        return;
    }
    fft_bit_reverse(samples, n, n.trailing_zeros());

    let mut len = 2;
    while len <= n {
        let angle = -2.0 * PI / len as f64;
        for start in (0..n).step_by(len) {
            for k in 0..len / 2 {
                let (wi, wr) = (angle * k as f64).sin_cos();
                let a = start + k;
                let b = a + len / 2;
                let (br, bi) = (f64::from(samples[2 * b]), f64::from(samples[2 * b + 1]));
                let tr = br * wr - bi * wi;
                let ti = br * wi + bi * wr;
                let (ar, ai) = (f64::from(samples[2 * a]), f64::from(samples[2 * a + 1]));
                samples[2 * a] = (ar + tr) as f32;
                samples[2 * a + 1] = (ai + ti) as f32;
                samples[2 * b] = (ar - tr) as f32;
                samples[2 * b + 1] = (ai - ti) as f32;
            }
        }
        len <<= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fft_rev() {
        assert_eq!(fft_rev(1), 0x8000_0000);
        assert_eq!(fft_rev(0b110) >> (32 - 3), 0b011);
    }

    #[test]
    fn test_bit_reverse_permutation() {
        // 8 points, value = original index in the real slot.
        let mut w: Vec<f32> = (0..8).flat_map(|i| [i as f32, 0.0]).collect();
        fft_bit_reverse(&mut w, 8, 3);
        let order: Vec<f32> = w.chunks(2).map(|c| c[0]).collect();
        assert_eq!(order, vec![0.0, 4.0, 2.0, 6.0, 1.0, 5.0, 3.0, 7.0]);
    }

    #[test]
    fn test_impulse_transforms_to_flat_spectrum() {
        let mut w = vec![0.0f32; 2 * 16];
        w[0] = 1.0;
        transform(&mut w);
        for c in w.chunks(2) {
            assert!((c[0] - 1.0).abs() < 1e-6);
            assert!(c[1].abs() < 1e-6);
        }
    }

    #[test]
    fn test_single_tone_lands_in_one_bin() {
        let n = 64;
        let bin = 5;
        let mut w: Vec<f32> = (0..n)
            .flat_map(|t| {
                let phase = 2.0 * PI * (bin * t) as f64 / n as f64;
                [phase.cos() as f32, phase.sin() as f32]
            })
            .collect();
        transform(&mut w);
        for (k, c) in w.chunks(2).enumerate() {
            let mag = (c[0] * c[0] + c[1] * c[1]).sqrt();
            if k == bin {
                assert!((mag - n as f32).abs() < 1e-3);
            } else {
                assert!(mag < 1e-3, "bin {k} has {mag}");
            }
        }
    }
}
