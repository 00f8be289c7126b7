//! 32-bit fixed point used by the FFT accelerator.
//!
//! A token with `int_bits` integer bits (sign included) carries
//! `32 - int_bits` fraction bits.

/// Token width in bits.
pub const FX_WIDTH: u32 = 32;

/// Integer bits used by the FFT accelerator.
pub const DEFAULT_INT_BITS: u32 = 14;

fn scale(int_bits: u32) -> f64 {
    (1u64 << (FX_WIDTH - int_bits)) as f64
}

/// Nearest token to `value`, saturating at the format's range.
pub fn float_to_fixed(value: f32, int_bits: u32) -> i32 {
    let scaled = (f64::from(value) * scale(int_bits)).round();
    scaled.clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32
}

pub fn fixed_to_float(token: i32, int_bits: u32) -> f32 {
    (f64::from(token) / scale(int_bits)) as f32
}

/// Value of one least-significant bit.
pub fn resolution(int_bits: u32) -> f64 {
    1.0 / scale(int_bits)
}
