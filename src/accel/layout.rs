//! DMA buffer sizing.
//!
//! Word counts are rounded up to the device's DMA beat. A beat carries
//! `pointer_bytes / element_bytes` words; when that quotient is zero the raw
//! counts are used unchanged.

use std::ops::Range;

use serde::Serialize;

use crate::task::{fft, viterbi};

/// Width of a pointer on the host, the DMA beat width.
pub const POINTER_BYTES: usize = std::mem::size_of::<*const u8>();

/// Bytes per FFT accelerator token (32-bit fixed point).
pub const FFT_TOKEN_BYTES: usize = std::mem::size_of::<i32>();

/// Bytes per Viterbi accelerator token.
pub const VITERBI_TOKEN_BYTES: usize = std::mem::size_of::<u8>();

/// Viterbi input tokens: state header, pad, encoded bits.
pub const VITERBI_IN_WORDS: usize =
    viterbi::STATE_BYTES + viterbi::STATE_PAD_BYTES + viterbi::MAX_ENCODED_BITS;

/// Viterbi output tokens.
pub const VITERBI_OUT_WORDS: usize = viterbi::MAX_DECODED_BYTES;

pub fn words_per_beat(element_bytes: usize, pointer_bytes: usize) -> usize {
    if element_bytes == 0 {
        return 0;
    }
    pointer_bytes / element_bytes
}

pub fn round_up(words: usize, multiple: usize) -> usize {
    words.div_ceil(multiple) * multiple
}

/// `words` rounded up to a whole number of beats, or unchanged when the beat
/// divisor is zero.
pub fn adjust_words(words: usize, per_beat: usize) -> usize {
    if per_beat == 0 {
        words
    } else {
        round_up(words, per_beat)
    }
}

/// Input/output split of one unit's DMA buffer, in tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferLayout {
    pub element_bytes: usize,
    pub in_words: usize,
    pub out_words: usize,
    pub out_offset_words: usize,
}

impl BufferLayout {
    /// Round `in_words`/`out_words` to the DMA beat. The output region
    /// follows the input when `output_follows_input`, otherwise it starts at
    /// offset zero and aliases the input.
    pub fn new(
        element_bytes: usize,
        pointer_bytes: usize,
        in_words: usize,
        out_words: usize,
        output_follows_input: bool,
    ) -> Self {
        let per_beat = words_per_beat(element_bytes, pointer_bytes);
        let in_words = adjust_words(in_words, per_beat);
        let out_words = adjust_words(out_words, per_beat);
        Self {
            element_bytes,
            in_words,
            out_words,
            out_offset_words: if output_follows_input { in_words } else { 0 },
        }
    }

    /// `2 × 2^log_n` tokens each way; results overwrite the input in place.
    pub fn fft(log_n: u32) -> Self {
        let words = fft::sample_count(log_n);
        Self::new(FFT_TOKEN_BYTES, POINTER_BYTES, words, words, false)
    }

    pub fn viterbi() -> Self {
        Self::new(
            VITERBI_TOKEN_BYTES,
            POINTER_BYTES,
            VITERBI_IN_WORDS,
            VITERBI_OUT_WORDS,
            true,
        )
    }

    pub fn in_bytes(&self) -> usize {
        self.in_words * self.element_bytes
    }

    pub fn out_bytes(&self) -> usize {
        self.out_words * self.element_bytes
    }

    pub fn out_offset_bytes(&self) -> usize {
        self.out_offset_words * self.element_bytes
    }

    /// Bytes to request from the DMA allocator.
    pub fn total_bytes(&self) -> usize {
        (self.out_offset_bytes() + self.out_bytes()).max(self.in_bytes())
    }

    pub fn input_range(&self) -> Range<usize> {
        0..self.in_bytes()
    }

    pub fn output_range(&self) -> Range<usize> {
        self.out_offset_bytes()..self.out_offset_bytes() + self.out_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_per_beat() {
        assert_eq!(words_per_beat(4, 8), 2);
        assert_eq!(words_per_beat(1, 8), 8);
        assert_eq!(words_per_beat(16, 8), 0);
        assert_eq!(words_per_beat(0, 8), 0);
    }

    #[test]
    fn test_rounding_to_beat() {
        assert_eq!(adjust_words(24_853, words_per_beat(4, 8)), 24_854);
        assert_eq!(adjust_words(24_854, 2), 24_854);
        assert_eq!(adjust_words(24_853, 0), 24_853);
        assert_eq!(adjust_words(18_585, 8), 18_592);
    }

    #[test]
    fn test_fft_layout_aliases_output() {
        let layout = BufferLayout::new(4, 8, 32_768, 32_768, false);
        assert_eq!(layout, BufferLayout::fft(14));
        assert_eq!(layout.in_bytes(), 131_072);
        assert_eq!(layout.output_range(), 0..131_072);
        assert_eq!(layout.total_bytes(), 131_072);
    }

    #[test]
    fn test_viterbi_layout_output_follows_input() {
        let layout = BufferLayout::new(1, 8, VITERBI_IN_WORDS, VITERBI_OUT_WORDS, true);
        assert_eq!(layout.in_words, 24_856);
        assert_eq!(layout.out_words, 18_592);
        assert_eq!(layout.out_offset_bytes(), 24_856);
        assert_eq!(layout.total_bytes(), 24_856 + 18_592);
        assert_eq!(layout.output_range(), 24_856..43_448);
    }

    #[test]
    fn test_unrounded_layout_when_beat_is_zero() {
        let layout = BufferLayout::new(16, 8, 3, 5, true);
        assert_eq!((layout.in_words, layout.out_words), (3, 5));
        assert_eq!(layout.total_bytes(), (3 + 5) * 16);
    }
}
