//! Viterbi payload.
//!
//! ```text
//! +--------------------------------------------------+-----------------------------+
//! | header: n_cbps n_traceback n_data_bits           | data area                   |
//! |         in_mem_size in_data_size out_mem_size    | in_mem | in_data | out_mem   |
//! +--------------------------------------------------+-----------------------------+
//! ```
//!
//! Header fields are native-endian `i32`. Region offsets accumulate inside the
//! data area: `in_data` starts where `in_mem` ends and `out_mem` starts where
//! `in_data` ends. An `out_mem_size` of zero means the output region runs to
//! the end of the payload.

use std::ops::Range;

use serde::Serialize;

use super::{word, PayloadError};

/// Decoder state header copied verbatim into the accelerator input buffer.
pub const STATE_BYTES: usize = 70;
/// Reserved bytes between the state header and the encoded bits.
pub const STATE_PAD_BYTES: usize = 2;
/// Encoded-bit budget of one decode (one bit per byte).
pub const MAX_ENCODED_BITS: usize = 24_780;
/// Decoded-output budget, `3/4` of the encoded budget.
pub const MAX_DECODED_BYTES: usize = MAX_ENCODED_BITS * 3 / 4;
/// Size of the packed header in front of the data area.
pub const HEADER_BYTES: usize = 6 * std::mem::size_of::<i32>();

/// Per-decode parameters written into the accelerator descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ViterbiParams {
    /// Coded bits per OFDM symbol.
    pub cbps: u32,
    /// Traceback depth.
    pub traceback: u32,
    /// Decoded data bits.
    pub data_bits: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViterbiHeader {
    pub n_cbps: i32,
    pub n_traceback: i32,
    pub n_data_bits: i32,
    pub in_mem_size: i32,
    pub in_data_size: i32,
    pub out_mem_size: i32,
}

fn non_negative(field: &'static str, value: i32) -> Result<usize, PayloadError> {
    usize::try_from(value).map_err(|_| PayloadError::NegativeField { field, value })
}

impl ViterbiHeader {
    pub fn read(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() < HEADER_BYTES {
            return Err(PayloadError::TooSmall {
                needed: HEADER_BYTES,
                available: payload.len(),
            });
        }
        let field = |i: usize| i32::from_ne_bytes(word(&payload[i * 4..]));
        Ok(Self {
            n_cbps: field(0),
            n_traceback: field(1),
            n_data_bits: field(2),
            in_mem_size: field(3),
            in_data_size: field(4),
            out_mem_size: field(5),
        })
    }

    pub fn write(&self, payload: &mut [u8]) -> Result<(), PayloadError> {
        if payload.len() < HEADER_BYTES {
            return Err(PayloadError::TooSmall {
                needed: HEADER_BYTES,
                available: payload.len(),
            });
        }
        let fields = [
            self.n_cbps,
            self.n_traceback,
            self.n_data_bits,
            self.in_mem_size,
            self.in_data_size,
            self.out_mem_size,
        ];
        for (dst, v) in payload.chunks_exact_mut(4).zip(fields) {
            dst.copy_from_slice(&v.to_ne_bytes());
        }
        Ok(())
    }

    pub fn params(&self) -> Result<ViterbiParams, PayloadError> {
        let as_u32 =
            |field: &'static str, value: i32| non_negative(field, value).map(|v| v as u32);
        Ok(ViterbiParams {
            cbps: as_u32("n_cbps", self.n_cbps)?,
            traceback: as_u32("n_traceback", self.n_traceback)?,
            data_bits: as_u32("n_data_bits", self.n_data_bits)?,
        })
    }

    /// Locate the three regions inside a data area of `data_len` bytes.
    pub fn regions(&self, data_len: usize) -> Result<ViterbiRegions, PayloadError> {
        let in_mem = non_negative("in_mem_size", self.in_mem_size)?;
        let in_data = non_negative("in_data_size", self.in_data_size)?;
        let out_mem = non_negative("out_mem_size", self.out_mem_size)?;

        let in_data_offset = in_mem;
        let out_mem_offset = in_data_offset + in_data;
        let out_end = if out_mem == 0 {
            data_len.max(out_mem_offset)
        } else {
            out_mem_offset + out_mem
        };
        if out_end > data_len {
            return Err(PayloadError::TooSmall {
                needed: HEADER_BYTES + out_end,
                available: HEADER_BYTES + data_len,
            });
        }
        Ok(ViterbiRegions {
            in_mem: 0..in_data_offset,
            in_data: in_data_offset..out_mem_offset,
            out_mem: out_mem_offset..out_end,
        })
    }
}

/// Region ranges relative to the start of the data area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViterbiRegions {
    pub in_mem: Range<usize>,
    pub in_data: Range<usize>,
    pub out_mem: Range<usize>,
}

impl ViterbiRegions {
    /// Borrow the regions out of `data`: inputs shared, output exclusive.
    pub fn split<'a>(&self, data: &'a mut [u8]) -> (&'a [u8], &'a [u8], &'a mut [u8]) {
        let (inputs, rest) = data.split_at_mut(self.out_mem.start);
        let out_mem = &mut rest[..self.out_mem.len()];
        let inputs: &'a [u8] = inputs;
        (&inputs[self.in_mem.clone()], &inputs[self.in_data.clone()], out_mem)
    }
}

/// The data area that follows the header.
pub fn data_area(payload: &[u8]) -> &[u8] {
    payload.get(HEADER_BYTES..).unwrap_or_default()
}

pub fn data_area_mut(payload: &mut [u8]) -> &mut [u8] {
    payload.get_mut(HEADER_BYTES..).unwrap_or_default()
}

/// Pack a complete Viterbi task into `payload`, returning the bytes used.
/// The output region is `out_len` bytes and starts zeroed.
pub fn write_task(
    payload: &mut [u8],
    params: ViterbiParams,
    in_mem: &[u8],
    in_data: &[u8],
    out_len: usize,
) -> Result<usize, PayloadError> {
    let used = HEADER_BYTES + in_mem.len() + in_data.len() + out_len;
    if used > payload.len() {
        return Err(PayloadError::TooSmall {
            needed: used,
            available: payload.len(),
        });
    }
    let header = ViterbiHeader {
        n_cbps: params.cbps as i32,
        n_traceback: params.traceback as i32,
        n_data_bits: params.data_bits as i32,
        in_mem_size: in_mem.len() as i32,
        in_data_size: in_data.len() as i32,
        out_mem_size: out_len as i32,
    };
    header.write(payload)?;
    let data = data_area_mut(payload);
    let (mem_dst, rest) = data.split_at_mut(in_mem.len());
    mem_dst.copy_from_slice(in_mem);
    let (bits_dst, rest) = rest.split_at_mut(in_data.len());
    bits_dst.copy_from_slice(in_data);
    rest[..out_len].fill(0);
    Ok(used)
}
