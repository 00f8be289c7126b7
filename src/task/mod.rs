//! Payload layouts carried by task blocks.
//!
//! FFT payloads are interleaved real/imaginary `f32` samples. Viterbi
//! payloads are a fixed header followed by a data area holding the
//! input-state, input-bit and output regions back to back.

pub mod fft;
pub mod viterbi;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload holds {available} bytes, layout needs {needed}")]
    TooSmall { needed: usize, available: usize },

    #[error("viterbi header field {field} is negative ({value})")]
    NegativeField { field: &'static str, value: i32 },

    #[error("viterbi input-state region is {len} bytes, hardware needs {min}")]
    ShortStateRegion { len: usize, min: usize },
}

/// Native-endian 32-bit word starting at `bytes[0]`.
pub(crate) fn word(bytes: &[u8]) -> [u8; 4] {
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}
